//! Pass Auto-Scan
//!
//! Draws random programs for a fusion pass, runs each one before and after the
//! pass, and scores the outcomes. Known-bad configurations are matched by
//! ignore rules: they still run, but their outcome is recorded apart and never
//! counted as a pass or a failure.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tandem_core::{check_close, SeededRng, Tolerance};
use tracing::{debug, info, warn};

use crate::engine::{EngineConfig, Predictor};
use crate::error::FusionResult;
use crate::executor::Executor;
use crate::pass::PassManager;
use crate::program::{OpDesc, OpKind, ProgramConfig, TensorConfig};

// =============================================================================
// Ignore Rules
// =============================================================================

/// Why a case is excluded from scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The pass produces wrong results for this configuration.
    PassAccuracyError,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::PassAccuracyError => write!(f, "PASS_ACCURACY_ERROR"),
        }
    }
}

type Teller = Box<dyn Fn(&ProgramConfig, &EngineConfig) -> bool + Send + Sync>;

/// Predicate over a drawn case plus the reason it is ignored.
pub struct IgnoreRule {
    teller: Teller,
    /// Reason recorded for matching cases.
    pub reason: IgnoreReason,
    /// Human-readable note recorded for matching cases.
    pub note: String,
}

impl IgnoreRule {
    /// Creates a rule.
    pub fn new(
        teller: impl Fn(&ProgramConfig, &EngineConfig) -> bool + Send + Sync + 'static,
        reason: IgnoreReason,
        note: impl Into<String>,
    ) -> Self {
        Self {
            teller: Box::new(teller),
            reason,
            note: note.into(),
        }
    }

    /// True when the rule covers this case.
    pub fn matches(&self, program: &ProgramConfig, engine: &EngineConfig) -> bool {
        (self.teller)(program, engine)
    }
}

impl fmt::Debug for IgnoreRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IgnoreRule")
            .field("reason", &self.reason)
            .field("note", &self.note)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Scan Cases
// =============================================================================

/// One engine configuration to check a drawn program against.
#[derive(Debug, Clone)]
pub struct PredictorCase {
    /// Engine settings.
    pub config: EngineConfig,
    /// Op types the pass under test must leave behind.
    pub expected_ops: Vec<String>,
    /// Tolerance between the reference run and the engine run.
    pub tolerance: Tolerance,
}

/// Generator for one family of programs.
pub trait AutoScanCase {
    /// Draws a program.
    fn sample_program_config(&self, rng: &mut SeededRng) -> ProgramConfig;

    /// Engine configurations to check the program against.
    fn sample_predictor_configs(&self, program: &ProgramConfig) -> Vec<PredictorCase>;

    /// Known-bad configurations.
    fn ignore_rules(&self) -> Vec<IgnoreRule> {
        Vec::new()
    }
}

// =============================================================================
// flatten2 + matmul + elementwise_add
// =============================================================================

/// `flatten2 -> matmul -> elementwise_add(bias)`, the pattern targeted by
/// `flatten2_matmul_fuse_pass`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Flatten2MatmulCase;

impl AutoScanCase for Flatten2MatmulCase {
    fn sample_program_config(&self, rng: &mut SeededRng) -> ProgramConfig {
        let x_shape: Vec<usize> = (0..4).map(|_| rng.int_inclusive(1, 10) as usize).collect();
        let flat_cols = x_shape[1] * x_shape[2] * x_shape[3];
        let y_shape = vec![flat_cols, rng.int_inclusive(1, 8) as usize];
        let axis = *rng.choose(&[-1, 1]).unwrap_or(&-1);
        let bias_shape = if rng.int_inclusive(0, 3) == 0 {
            vec![1, y_shape[1]]
        } else {
            vec![y_shape[1]]
        };

        ProgramConfig {
            ops: vec![
                OpDesc::new(OpKind::Flatten2 { axis: 1 }, &["flatten2_x"], "flatten2_out"),
                OpDesc::new(
                    OpKind::Matmul {
                        alpha: 1.0,
                        transpose_x: false,
                        transpose_y: false,
                    },
                    &["flatten2_out", "matmul_y"],
                    "matmul_out",
                ),
                OpDesc::new(OpKind::ElementwiseAdd { axis }, &["matmul_out", "bias"], "add_out"),
            ],
            weights: BTreeMap::from([
                ("matmul_y".to_string(), TensorConfig::new(&y_shape)),
                ("bias".to_string(), TensorConfig::new(&bias_shape)),
            ]),
            inputs: BTreeMap::from([("flatten2_x".to_string(), TensorConfig::new(&x_shape))]),
            outputs: vec!["add_out".to_string()],
        }
    }

    fn sample_predictor_configs(&self, _program: &ProgramConfig) -> Vec<PredictorCase> {
        vec![PredictorCase {
            config: EngineConfig::default(),
            expected_ops: vec!["mul".to_string(), "elementwise_add".to_string()],
            tolerance: Tolerance::new(1e-1, 1e-4),
        }]
    }

    fn ignore_rules(&self) -> Vec<IgnoreRule> {
        vec![IgnoreRule::new(
            |program, _engine| {
                let y_out = program.weights.get("matmul_y").and_then(|t| t.shape.get(1).copied());
                let bias = program.weights.get("bias").map(|t| t.shape.clone()).unwrap_or_default();
                let axis = program
                    .ops
                    .iter()
                    .find_map(|op| match op.kind {
                        OpKind::ElementwiseAdd { axis } => Some(axis),
                        _ => None,
                    })
                    .unwrap_or(-1);
                axis == 0 || bias.len() != 1 || bias.first().copied() != y_out
            },
            IgnoreReason::PassAccuracyError,
            "The fused kernel fails while the bias shape is not [out_size].",
        )]
    }
}

// =============================================================================
// Scan Runner
// =============================================================================

/// Result of one drawn case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaseOutcome {
    /// Ops and outputs matched.
    Passed,
    /// Ops or outputs did not match, or a run errored.
    Failed {
        /// What went wrong.
        reason: String,
    },
    /// Covered by an ignore rule.
    Ignored {
        /// Rule reason.
        reason: IgnoreReason,
        /// Rule note.
        note: String,
        /// What the case would have scored.
        detail: String,
    },
}

/// One scored case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    /// Draw index.
    pub index: usize,
    /// Drawn program.
    pub program: ProgramConfig,
    /// Outcome.
    pub outcome: CaseOutcome,
}

/// Tallies over a scan.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanStats {
    /// Cases drawn.
    pub examples: usize,
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
    /// Cases covered by an ignore rule.
    pub ignored: usize,
    /// Every case that did not pass.
    pub reports: Vec<CaseReport>,
}

impl ScanStats {
    /// True when nothing failed and at least one case was scored.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}

/// Runs passes over randomly drawn programs.
#[derive(Debug, Clone)]
pub struct PassAutoScan {
    /// Passes under test, in order.
    pub passes: Vec<String>,
    /// Cases to draw.
    pub max_examples: usize,
    /// Seed for the draws.
    pub seed: u64,
}

impl PassAutoScan {
    /// Creates a scan for `passes` with 50 examples.
    pub fn new<S: Into<String>>(passes: impl IntoIterator<Item = S>) -> Self {
        Self {
            passes: passes.into_iter().map(Into::into).collect(),
            max_examples: 50,
            seed: 0,
        }
    }

    /// Sets the number of cases.
    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Draws and scores `max_examples` cases.
    ///
    /// Errors only when the pass list itself is invalid.
    pub fn run(&self, case: &dyn AutoScanCase) -> FusionResult<ScanStats> {
        let manager = PassManager::from_names(&self.passes)?;
        let rules = case.ignore_rules();
        let mut rng = SeededRng::new(self.seed);
        let mut stats = ScanStats::default();

        for index in 0..self.max_examples {
            let config = case.sample_program_config(&mut rng);
            let data_seed = self.seed.wrapping_add(index as u64);
            for predictor in case.sample_predictor_configs(&config) {
                let verdict = check_case(&config, data_seed, &manager, &predictor);
                let outcome = match rules.iter().find(|r| r.matches(&config, &predictor.config)) {
                    Some(rule) => CaseOutcome::Ignored {
                        reason: rule.reason,
                        note: rule.note.clone(),
                        detail: verdict.err().unwrap_or_else(|| "passed".to_string()),
                    },
                    None => match verdict {
                        Ok(()) => CaseOutcome::Passed,
                        Err(reason) => CaseOutcome::Failed { reason },
                    },
                };
                stats.examples += 1;
                match &outcome {
                    CaseOutcome::Passed => stats.passed += 1,
                    CaseOutcome::Failed { reason } => {
                        warn!(index, %reason, "case failed");
                        stats.failed += 1;
                    }
                    CaseOutcome::Ignored { reason, .. } => {
                        debug!(index, %reason, "case ignored");
                        stats.ignored += 1;
                    }
                }
                if outcome != CaseOutcome::Passed {
                    stats.reports.push(CaseReport {
                        index,
                        program: config.clone(),
                        outcome,
                    });
                }
            }
        }

        info!(
            passes = ?self.passes,
            examples = stats.examples,
            passed = stats.passed,
            failed = stats.failed,
            ignored = stats.ignored,
            "auto-scan finished"
        );
        Ok(stats)
    }
}

/// Runs one case; `Err` carries the reason it failed.
fn check_case(
    config: &ProgramConfig,
    data_seed: u64,
    manager: &PassManager,
    predictor: &PredictorCase,
) -> Result<(), String> {
    let program = config.materialize(data_seed);
    let feeds = config.sample_inputs(data_seed.wrapping_add(1));
    let baseline = Executor::run(&program, &feeds).map_err(|e| format!("baseline run: {}", e))?;

    let mut optimized = program;
    manager
        .run(&mut optimized)
        .map_err(|e| format!("pass: {}", e))?;
    let ops = optimized.op_types();
    if ops != predictor.expected_ops {
        return Err(format!(
            "ops after pass {:?}, expected {:?}",
            ops, predictor.expected_ops
        ));
    }

    let engine = Predictor::new(optimized, predictor.config.clone())
        .map_err(|e| format!("engine build: {}", e))?;
    let outputs = engine.run(&feeds).map_err(|e| format!("engine run: {}", e))?;
    for (actual, expected) in outputs.iter().zip(&baseline) {
        check_close(actual, expected, predictor.tolerance).map_err(|d| d.to_string())?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
