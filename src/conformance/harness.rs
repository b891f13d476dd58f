//! Runs several engines over the same rulebook and facts, validates each
//! against the answer table and compares them with one another.

use crate::compute::{engine_by_id, Engine, ENGINE_IDS};
use crate::config::RunConfig;
use crate::output::OutputTable;
use crate::rulebook::Rulebook;
use crate::store::Dataset;
use crate::validation::{
    check_shape, validate, FieldScope, TableSide, ValidationError, ValidationReport, ValidationScope,
};
use serde::Serialize;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How one engine's run ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    Completed {
        #[serde(skip)]
        table: OutputTable,
        report: ValidationReport,
        elapsed_ms: u64,
    },
    /// Timed out, panicked, failed or produced a malformed table. Excluded
    /// from pass/fail tallies.
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRun {
    pub engine_id: String,
    pub outcome: Outcome,
}

impl EngineRun {
    pub fn table(&self) -> Option<&OutputTable> {
        match &self.outcome {
            Outcome::Completed { table, .. } => Some(table),
            Outcome::Unavailable { .. } => None,
        }
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        match &self.outcome {
            Outcome::Completed { report, .. } => Some(report),
            Outcome::Unavailable { .. } => None,
        }
    }
}

/// Comparison of two completed engines; `right` is validated against `left`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agreement {
    pub left: String,
    pub right: String,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceReport {
    pub runs: Vec<EngineRun>,
    pub agreement: Vec<Agreement>,
}

impl ConformanceReport {
    pub fn run(&self, engine_id: &str) -> Option<&EngineRun> {
        self.runs.iter().find(|r| r.engine_id == engine_id)
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &EngineRun> + '_ {
        self.runs.iter().filter(|r| r.table().is_none())
    }

    /// Every engine completed, matched the answer table and agreed with the others.
    pub fn all_passed(&self) -> bool {
        self.runs.iter().all(|r| r.report().is_some_and(ValidationReport::is_clean))
            && self.agreement.iter().all(|a| a.report.is_clean())
    }
}

type RunResult = Result<OutputTable, String>;

pub struct Harness {
    engines: Vec<Arc<dyn Engine>>,
    timeout: Duration,
    precision: u32,
    tolerance: f64,
    scope: ValidationScope,
}

impl Harness {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            engines: Vec::new(),
            timeout: config.engine_timeout(),
            precision: config.export_precision,
            tolerance: config.tolerance,
            scope: config.scope,
        }
    }

    /// A harness registered with every engine this crate ships.
    pub fn with_shipped_engines(config: &RunConfig) -> Self {
        let mut harness = Self::new(config);
        for id in ENGINE_IDS {
            // Ids come from the shipped list, so lookup cannot fail.
            if let Ok(engine) = engine_by_id(id, config.parallel) {
                harness.engines.push(Arc::from(engine));
            }
        }
        harness
    }

    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine_ids(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.id()).collect()
    }

    /// Runs every engine and validates what comes back.
    ///
    /// Only structural problems with the answer table are errors; anything
    /// an engine does wrong ends up in the report.
    pub fn run(&self, rulebook: &Rulebook, data: &Dataset, answer: &OutputTable) -> Result<ConformanceReport, ValidationError> {
        info!(event = "harness_start", engines = self.engines.len(), timeout_secs = self.timeout.as_secs_f64());
        let shared = Arc::new((rulebook.clone(), data.clone()));
        // A timeout too large for an Instant means no deadline at all.
        let deadline = Instant::now().checked_add(self.timeout);

        // 1. Launch every engine on its own thread.
        let pending: Vec<_> = self
            .engines
            .iter()
            .map(|engine| {
                let (tx, rx) = mpsc::channel::<(RunResult, Duration)>();
                let engine_id = engine.id().to_string();
                let engine = Arc::clone(engine);
                let shared = Arc::clone(&shared);
                let precision = self.precision;
                thread::spawn(move || {
                    let (rulebook, data) = &*shared;
                    let start = Instant::now();
                    let result = rulebook.evaluate(&*engine, data, precision).map_err(|e| e.to_string());
                    // The harness may have given up on us already.
                    let _ = tx.send((result, start.elapsed()));
                });
                (engine_id, rx)
            })
            .collect();

        // 2. Collect within the shared deadline.
        let scope = FieldScope::from_schema(rulebook.schema(), self.scope);
        let mut report = ConformanceReport::default();
        for (engine_id, rx) in pending {
            let received = match deadline {
                Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let outcome = match received {
                Ok((Ok(table), elapsed)) => self.check(rulebook, &scope, table, answer, elapsed)?,
                Ok((Err(message), _)) => Outcome::Unavailable { reason: message },
                Err(RecvTimeoutError::Timeout) => {
                    Outcome::Unavailable { reason: format!("did not complete within {:?}", self.timeout) }
                }
                Err(RecvTimeoutError::Disconnected) => Outcome::Unavailable { reason: "engine panicked".into() },
            };
            match &outcome {
                Outcome::Unavailable { reason } => warn!(event = "engine_unavailable", engine = %engine_id, reason = %reason),
                Outcome::Completed { report, elapsed_ms, .. } => info!(
                    event = "engine_validated",
                    engine = %engine_id,
                    passed = report.pass_count,
                    failed = report.fail_count,
                    elapsed_ms = *elapsed_ms,
                ),
            }
            report.runs.push(EngineRun { engine_id, outcome });
        }

        // 3. Pairwise agreement between completed engines.
        let completed: Vec<(&str, &OutputTable)> =
            report.runs.iter().filter_map(|r| r.table().map(|t| (r.engine_id.as_str(), t))).collect();
        let mut agreement = Vec::new();
        for (i, (left, left_table)) in completed.iter().enumerate() {
            for (right, right_table) in &completed[i + 1..] {
                match validate(right_table, left_table, &scope, self.tolerance) {
                    Ok(r) => agreement.push(Agreement { left: left.to_string(), right: right.to_string(), report: r }),
                    Err(e) => warn!(event = "agreement_skipped", left = %left, right = %right, error = %e),
                }
            }
        }
        report.agreement = agreement;
        Ok(report)
    }

    fn check(
        &self,
        rulebook: &Rulebook,
        scope: &FieldScope,
        table: OutputTable,
        answer: &OutputTable,
        elapsed: Duration,
    ) -> Result<Outcome, ValidationError> {
        if let Err(e) = check_shape(rulebook.schema(), &table) {
            return Ok(Outcome::Unavailable { reason: format!("malformed output: {}", e) });
        }
        match validate(&table, answer, scope, self.tolerance) {
            Ok(report) => Ok(Outcome::Completed { table, report, elapsed_ms: elapsed.as_millis() as u64 }),
            Err(e) if e.side() == Some(TableSide::Candidate) => {
                Ok(Outcome::Unavailable { reason: format!("malformed output: {}", e) })
            }
            Err(e) => Err(e),
        }
    }
}
