mod plan;

use std::sync::Arc;

use clap::Parser;

use crate::args::{OutputFormat, TesterArgs};
use crate::error::{AppError, AppResult, ValidationError};
use crate::http::{ReqwestTransport, Transport};
use crate::run::{IntervalSchedule, RunOutcome, run_once, run_scheduled};
use crate::shutdown::ShutdownSignal;
use crate::shutdown_handlers::setup_signal_shutdown_handler;
use plan::{RunPlan, build_plan};

/// Parse the command line, run, and print the report.
///
/// # Errors
///
/// Returns an error for invalid arguments or configuration, runtime setup
/// failures, and runs that finish with failed requests or comparisons.
pub fn run() -> AppResult<()> {
    let args = TesterArgs::parse();
    crate::logger::init_logging(args.verbose, args.no_color);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::validation(ValidationError::RuntimeBuildFailed { source: err }))?;

    runtime.block_on(run_async(&args))
}

async fn run_async(args: &TesterArgs) -> AppResult<()> {
    let plan = match build_plan(args) {
        Ok(plan) => plan,
        Err(err) => {
            tracing::error!("{}", err);
            return Err(err);
        }
    };
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(args.timeout)?);

    let shutdown = ShutdownSignal::new();
    let signals = setup_signal_shutdown_handler(&shutdown);
    let result = execute(&plan, &transport, &shutdown, args.output_format).await;
    shutdown.trigger();
    drop(signals.await);
    result
}

async fn execute(
    plan: &RunPlan,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
    format: OutputFormat,
) -> AppResult<()> {
    match plan.every {
        None => {
            let outcome = run_once(&plan.request, transport, shutdown).await?;
            print_outcome(&outcome, format, None)?;
            if outcome.interrupted() || outcome.is_success() {
                Ok(())
            } else {
                Err(AppError::validation(ValidationError::RunFailed))
            }
        }
        Some(every) => {
            let summary = run_scheduled(
                &plan.request,
                &IntervalSchedule::new(every),
                plan.max_runs,
                transport,
                shutdown,
                |run, outcome| print_outcome(outcome, format, Some(run)),
            )
            .await?;
            tracing::info!(
                "Schedule finished: {} run(s), {} with failures, {} errored",
                summary.runs,
                summary.failed_runs,
                summary.errored_runs
            );
            if summary.failed_runs == 0 && summary.errored_runs == 0 {
                Ok(())
            } else {
                Err(AppError::validation(ValidationError::RunFailed))
            }
        }
    }
}

fn print_outcome(outcome: &RunOutcome, format: OutputFormat, run: Option<u64>) -> AppResult<()> {
    let rendered = crate::report::render(outcome, format)?;
    if let (Some(run), OutputFormat::Text) = (run, format) {
        println!("=== Run {} ===", run);
    }
    println!("{}", rendered.trim_end());
    Ok(())
}
