//! Base-versus-target comparison: run every scenario against both endpoints,
//! pair the results, and check compare rules on each pair.
mod pairing;
mod rules;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AppResult, ConfigError};
use crate::http::{Dispatcher, RequestBuilder, RequestTemplate, RunPlan, TemplatePool, Transport};
use crate::metrics::RunResult;
use crate::shutdown::ShutdownSignal;

pub use pairing::{EntryPair, PairLabel, Pairing, PairingStrategy, Side, UnpairedEntry};
pub use rules::{
    CompareRule, ComparisonResult, evaluate_rule, parse_compare_rule, parse_compare_rules,
};

/// Which endpoint a scenario runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScenarioSide {
    #[default]
    Both,
    Base,
    Target,
}

impl ScenarioSide {
    /// Parse a scenario's `side`. Blank means both.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than `base`, `target`, or `both`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "both" => Ok(ScenarioSide::Both),
            "base" => Ok(ScenarioSide::Base),
            "target" => Ok(ScenarioSide::Target),
            _ => Err(ConfigError::UnknownScenarioSide {
                side: raw.to_owned(),
            }),
        }
    }

    #[must_use]
    pub const fn includes(self, side: Side) -> bool {
        matches!(
            (self, side),
            (ScenarioSide::Both, Side::Base | Side::Target)
                | (ScenarioSide::Base, Side::Base)
                | (ScenarioSide::Target, Side::Target)
        )
    }
}

/// One named request of a compare document.
#[derive(Debug, Clone)]
pub struct CompareScenario {
    pub name: String,
    pub template: RequestTemplate,
    /// Identifying fields used by `group_by_field`.
    pub fields: BTreeMap<String, String>,
    pub side: ScenarioSide,
    /// Target scenario names this base scenario is compared against under
    /// `one_to_many`. Empty pairs by equal name.
    pub targets: Vec<String>,
}

impl CompareScenario {
    /// A scenario run on both sides with no explicit targets.
    #[must_use]
    pub fn new(name: impl Into<String>, template: RequestTemplate) -> Self {
        Self {
            name: name.into(),
            template,
            fields: BTreeMap::new(),
            side: ScenarioSide::Both,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompareSuite {
    pub base: String,
    pub target: String,
    pub strategy: PairingStrategy,
    pub rules: Vec<CompareRule>,
    pub scenarios: Vec<CompareScenario>,
    pub plan: RunPlan,
    pub vars: BTreeMap<String, String>,
}

impl CompareSuite {
    /// # Errors
    ///
    /// Returns an error when an endpoint is blank, a side has no scenarios,
    /// or a scenario lists a target that never runs on the target side.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base.trim().is_empty() {
            return Err(ConfigError::CompareMissingEndpoint { side: "base" });
        }
        if self.target.trim().is_empty() {
            return Err(ConfigError::CompareMissingEndpoint { side: "target" });
        }
        if self.scenarios.is_empty() {
            return Err(ConfigError::CompareNoScenarios);
        }
        for (side, label) in [(Side::Base, "base"), (Side::Target, "target")] {
            if !self.scenarios.iter().any(|scenario| scenario.side.includes(side)) {
                return Err(ConfigError::CompareSideEmpty { side: label });
            }
        }
        for scenario in &self.scenarios {
            for target in &scenario.targets {
                let known = self.scenarios.iter().any(|candidate| {
                    candidate.side.includes(Side::Target) && candidate.name == *target
                });
                if !known {
                    return Err(ConfigError::UnknownCompareTarget {
                        scenario: scenario.name.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Build every scenario's requests against both endpoints without
    /// sending anything.
    ///
    /// # Errors
    ///
    /// Returns the first URL, header, or variable error.
    pub fn validate_templates(&self) -> AppResult<()> {
        prepare_side(self, Side::Base, &self.base)?;
        prepare_side(self, Side::Target, &self.target)?;
        Ok(())
    }

    /// Configured rules, or the defaults when none are set.
    #[must_use]
    pub fn effective_rules(&self) -> Vec<CompareRule> {
        if self.rules.is_empty() {
            CompareRule::defaults()
        } else {
            self.rules.clone()
        }
    }
}

/// One scenario run against one side.
#[derive(Debug, Clone)]
pub struct CompareEntry {
    pub side: Side,
    pub name: String,
    pub index: usize,
    pub fields: BTreeMap<String, String>,
    pub targets: Vec<String>,
    pub result: RunResult,
}

impl CompareEntry {
    #[must_use]
    pub const fn assertions_passed(&self) -> bool {
        self.result.overall.assertion_failures == 0
    }
}

#[derive(Debug, Clone)]
pub struct CompareOutcome {
    pub strategy: PairingStrategy,
    pub base_entries: Vec<CompareEntry>,
    pub target_entries: Vec<CompareEntry>,
    pub pairing: Pairing,
    pub comparisons: Vec<ComparisonResult>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl CompareOutcome {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.comparisons
            .iter()
            .filter(|comparison| comparison.passed)
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.comparisons.len().saturating_sub(self.passed())
    }

    /// Every comparison passed and the run was not cut short.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed() == 0
    }
}

struct PreparedScenario<'suite> {
    scenario: &'suite CompareScenario,
    pool: Arc<TemplatePool>,
    builder: RequestBuilder,
}

/// Run the base-side scenarios against the base endpoint, then the
/// target-side scenarios against the target endpoint, then pair and compare. On cancellation no new runs start and only pairs
/// whose runs both completed are compared.
///
/// # Errors
///
/// Returns configuration errors before any request is sent, and run errors
/// from the dispatcher.
pub async fn run_compare(
    suite: &CompareSuite,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> AppResult<CompareOutcome> {
    suite.validate()?;
    let started = Instant::now();

    let base_side = prepare_side(suite, Side::Base, &suite.base)?;
    let target_side = prepare_side(suite, Side::Target, &suite.target)?;

    let mut plan = suite.plan.clone();
    plan.capture_response = true;

    let base_entries = run_side(Side::Base, base_side, &plan, transport, shutdown).await?;
    let target_entries = run_side(Side::Target, target_side, &plan, transport, shutdown).await?;

    let pairing = suite.strategy.pair(&base_entries, &target_entries);
    let rules = suite.effective_rules();
    let mut comparisons = Vec::new();
    for pair in &pairing.pairs {
        let (Some(base), Some(target)) = (base_entries.get(pair.base), target_entries.get(pair.target))
        else {
            continue;
        };
        for rule in &rules {
            comparisons.push(evaluate_rule(&pair.label, rule, base, target));
        }
    }

    let outcome = CompareOutcome {
        strategy: suite.strategy.clone(),
        base_entries,
        target_entries,
        pairing,
        comparisons,
        interrupted: shutdown.is_triggered(),
        elapsed: started.elapsed(),
    };
    tracing::info!(
        "Compare finished: {} pair(s), {} passed, {} failed, {} unpaired",
        outcome.pairing.pairs.len(),
        outcome.passed(),
        outcome.failed(),
        outcome.pairing.unpaired.len()
    );
    Ok(outcome)
}

fn prepare_side<'suite>(
    suite: &'suite CompareSuite,
    side: Side,
    endpoint: &str,
) -> AppResult<Vec<PreparedScenario<'suite>>> {
    suite
        .scenarios
        .iter()
        .filter(|scenario| scenario.side.includes(side))
        .map(|scenario| {
            let pool = TemplatePool::single(scenario.template.clone())?;
            let builder = RequestBuilder::new(&pool, Some(endpoint), &suite.vars)?;
            Ok(PreparedScenario {
                scenario,
                pool: Arc::new(pool),
                builder,
            })
        })
        .collect()
}

async fn run_side(
    side: Side,
    prepared: Vec<PreparedScenario<'_>>,
    plan: &RunPlan,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> AppResult<Vec<CompareEntry>> {
    let mut entries = Vec::new();
    for (index, prepared) in prepared.into_iter().enumerate() {
        let scenario = prepared.scenario;
        if shutdown.is_triggered() {
            tracing::warn!("Compare cancelled before {} '{}'", side, scenario.name);
            break;
        }
        tracing::debug!("Running {} '{}'", side, scenario.name);
        let dispatcher = Dispatcher::new(
            plan.clone(),
            prepared.pool,
            prepared.builder,
            Arc::clone(transport),
        )?;
        let result = dispatcher.run(shutdown).await?;
        if result.interrupted {
            tracing::warn!("Compare run {} '{}' was interrupted", side, scenario.name);
            break;
        }
        entries.push(CompareEntry {
            side,
            name: scenario.name.clone(),
            index,
            fields: scenario.fields.clone(),
            targets: scenario.targets.clone(),
            result,
        });
    }
    Ok(entries)
}
