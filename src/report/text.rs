use std::fmt;
use std::time::Duration;

use crate::compare::CompareOutcome;
use crate::metrics::{LatencySummary, RunResult, StatsSnapshot};
use crate::run::{BatchOutcome, RunOutcome};

use super::model::{RequestRateReport, micros};

/// Human-readable summary in the spirit of `wrk`.
pub struct TextReport<'outcome> {
    outcome: &'outcome RunOutcome,
}

impl<'outcome> TextReport<'outcome> {
    #[must_use]
    pub const fn new(outcome: &'outcome RunOutcome) -> Self {
        Self { outcome }
    }
}

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            RunOutcome::Benchmark(result) => write_run(f, result, ""),
            RunOutcome::Batch(batch) => write_batch(f, batch),
            RunOutcome::Compare(compare) => write_compare(f, compare),
        }
    }
}

fn write_run(f: &mut fmt::Formatter<'_>, result: &RunResult, indent: &str) -> fmt::Result {
    let overall = &result.overall;
    if result.interrupted {
        writeln!(f, "{}Run interrupted; figures cover the time actually run.", indent)?;
    }
    writeln!(
        f,
        "{}{} requests in {}, {} read, {} written",
        indent,
        overall.requests,
        seconds(result.elapsed),
        bytes(overall.read_bytes),
        bytes(overall.write_bytes)
    )?;
    writeln!(
        f,
        "{}  Successful:         {} ({}%)",
        indent,
        overall.successes,
        x100(overall.success_rate_x100())
    )?;
    writeln!(
        f,
        "{}  Transport errors:   {}",
        indent, overall.transport_failures
    )?;
    writeln!(
        f,
        "{}  Assertion failures: {}",
        indent, overall.assertion_failures
    )?;
    write_latency(f, &overall.latency, indent)?;

    let rate = RequestRateReport::from_ticks(&result.tick_counts, result.sample_interval);
    writeln!(
        f,
        "{}Requests/sec: {:>10}   (per tick: mean {}, max {})",
        indent,
        x100(overall.rps_x100(result.elapsed)),
        x100(rate.mean_per_sec_x100),
        x100(rate.max_per_sec_x100)
    )?;
    writeln!(
        f,
        "{}Transfer/sec: {:>10}",
        indent,
        bytes(per_second(overall.read_bytes, result.elapsed))
    )?;

    write_breakdown(f, overall, indent)?;
    if result.endpoints.len() > 1 {
        writeln!(f, "{}Endpoints:", indent)?;
        for endpoint in &result.endpoints {
            writeln!(
                f,
                "{}  {:<24} {:>8} req  {:>7}% ok  p50 {}  p99 {}",
                indent,
                endpoint.label,
                endpoint.requests,
                x100(endpoint.success_rate_x100()),
                latency(endpoint.latency.p50),
                latency(endpoint.latency.p99)
            )?;
        }
    }
    Ok(())
}

fn write_latency(f: &mut fmt::Formatter<'_>, summary: &LatencySummary, indent: &str) -> fmt::Result {
    writeln!(
        f,
        "{}  Latency    min {}  mean {}  max {}",
        indent,
        latency(summary.min),
        latency(summary.mean),
        latency(summary.max)
    )?;
    writeln!(f, "{}  Latency Distribution", indent)?;
    for (label, value) in [
        ("50%", summary.p50),
        ("75%", summary.p75),
        ("90%", summary.p90),
        ("95%", summary.p95),
        ("99%", summary.p99),
    ] {
        writeln!(f, "{}    {:>4} {:>12}", indent, label, latency(value))?;
    }
    Ok(())
}

fn write_breakdown(f: &mut fmt::Formatter<'_>, snapshot: &StatsSnapshot, indent: &str) -> fmt::Result {
    if !snapshot.status_counts.is_empty() {
        writeln!(f, "{}Status codes:", indent)?;
        for (status, count) in &snapshot.status_counts {
            writeln!(f, "{}  {}: {}", indent, status, count)?;
        }
    }
    if !snapshot.transport_errors.is_empty() {
        writeln!(f, "{}Transport errors:", indent)?;
        for (message, count) in &snapshot.transport_errors {
            writeln!(f, "{}  {:>6}x {}", indent, count, message)?;
        }
    }
    if !snapshot.assertion_errors.is_empty() {
        writeln!(f, "{}Assertion failures:", indent)?;
        for (message, count) in &snapshot.assertion_errors {
            writeln!(f, "{}  {:>6}x {}", indent, count, message)?;
        }
    }
    Ok(())
}

fn write_batch(f: &mut fmt::Formatter<'_>, batch: &BatchOutcome) -> fmt::Result {
    writeln!(
        f,
        "Batch: {} test(s), {} passed, {} failed, success rate {}%, total time {}",
        batch.results.len(),
        batch.passed(),
        batch.failed(),
        x100(batch.success_rate_x100()),
        seconds(batch.elapsed)
    )?;
    if batch.interrupted {
        writeln!(f, "Batch interrupted.")?;
    }
    for test in &batch.results {
        writeln!(f)?;
        writeln!(f, "[{}] {}", pass_label(test.is_success()), test.name)?;
        if let Some(error) = &test.error {
            writeln!(f, "  error: {}", error)?;
        }
        if let Some(result) = &test.result {
            write_run(f, result, "  ")?;
        }
    }
    Ok(())
}

fn write_compare(f: &mut fmt::Formatter<'_>, compare: &CompareOutcome) -> fmt::Result {
    writeln!(
        f,
        "Compare ({}): {} pair(s), {} passed, {} failed, {} unpaired in {}",
        compare.strategy,
        compare.pairing.pairs.len(),
        compare.passed(),
        compare.failed(),
        compare.pairing.unpaired.len(),
        seconds(compare.elapsed)
    )?;
    if compare.interrupted {
        writeln!(f, "Compare interrupted; only completed pairs were compared.")?;
    }

    writeln!(f, "Entries:")?;
    for entry in compare.base_entries.iter().chain(&compare.target_entries) {
        let response = entry.result.response.as_ref();
        let status = response
            .and_then(|captured| captured.status)
            .map_or_else(|| "-".to_owned(), |status| status.to_string());
        let took = response.map_or_else(|| "-".to_owned(), |captured| latency(captured.latency));
        writeln!(
            f,
            "  {:<6} #{:<3} {:<24} status {:<4} latency {}",
            entry.side, entry.index, entry.name, status, took
        )?;
    }

    if !compare.comparisons.is_empty() {
        writeln!(f, "Comparisons:")?;
    }
    for comparison in &compare.comparisons {
        writeln!(
            f,
            "  [{}] {}  {}",
            pass_label(comparison.passed),
            comparison.label,
            comparison.rule
        )?;
        if !comparison.passed {
            writeln!(
                f,
                "         {} (base={}, target={})",
                comparison.reason, comparison.base_value, comparison.target_value
            )?;
        }
    }

    if !compare.pairing.unpaired.is_empty() {
        writeln!(f, "Unpaired:")?;
        for entry in &compare.pairing.unpaired {
            writeln!(
                f,
                "  {} #{} {}: {}",
                entry.side, entry.index, entry.name, entry.reason
            )?;
        }
    }
    Ok(())
}

const fn pass_label(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}

fn x100(value: u64) -> String {
    format!("{}.{:02}", value / 100, value % 100)
}

fn seconds(duration: Duration) -> String {
    let centis = duration.as_millis() / 10;
    format!("{}.{:02}s", centis / 100, centis % 100)
}

pub(super) fn latency(duration: Duration) -> String {
    let us = micros(duration);
    if us < 1_000 {
        return format!("{}us", us);
    }
    if us < 1_000_000 {
        return format!("{}.{:02}ms", us / 1_000, (us % 1_000) / 10);
    }
    format!("{}.{:02}s", us / 1_000_000, (us % 1_000_000) / 10_000)
}

fn per_second(total: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis().max(1);
    let scaled = u128::from(total)
        .saturating_mul(1_000)
        .checked_div(millis)
        .unwrap_or(0);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

pub(super) fn bytes(value: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if value < 1_024 {
        return format!("{}B", value);
    }
    let mut scaled_x100 = u128::from(value).saturating_mul(100) / 1_024;
    let mut unit = "KB";
    for next in UNITS.iter().skip(1) {
        if scaled_x100 < 102_400 {
            break;
        }
        scaled_x100 /= 1_024;
        unit = *next;
    }
    format!("{}.{:02}{}", scaled_x100 / 100, scaled_x100 % 100, unit)
}
