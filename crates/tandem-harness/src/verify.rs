//! Verify - Result Checking
//!
//! Compares each worker's decoded result with the reference computed from
//! the seeds that worker was given.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::Serialize;
use tandem_core::{check_close, Tolerance};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::payload::WorkerResult;
use crate::reference;
use crate::spec::{CollectiveKind, ExecutionMode};

/// Tolerance used for `op`.
///
/// The embedding only copies table rows, so it is held to a tight absolute bound.
pub fn tolerance_for(op: CollectiveKind, base: Tolerance) -> Tolerance {
    match op {
        CollectiveKind::ParallelEmbedding => base.with_atol(1e-8),
        _ => base,
    }
}

/// Outcome for one rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankVerdict {
    /// Rank.
    pub rank: usize,
    /// Seed the rank ran with.
    pub seed: u64,
    /// False for ranks whose output is not defined by the op.
    pub checked: bool,
    /// Tensors compared.
    pub items: usize,
}

/// A passed verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    /// Collective.
    pub op: CollectiveKind,
    /// Mode the workers ran in.
    pub mode: ExecutionMode,
    /// Tolerance applied.
    pub tolerance: Tolerance,
    /// Per-rank outcomes.
    pub ranks: Vec<RankVerdict>,
}

/// Checks every rank's result against the reference for `seeds`.
pub fn verify(
    op: CollectiveKind,
    mode: ExecutionMode,
    results: &[WorkerResult],
    seeds: &[u64],
    base: Tolerance,
) -> HarnessResult<Verdict> {
    if results.len() != seeds.len() {
        return Err(HarnessError::InvalidSpec(format!(
            "{} results for {} seeds",
            results.len(),
            seeds.len()
        )));
    }
    let tolerance = tolerance_for(op, base);
    let mismatch = |rank: usize, label: String, detail: String| HarnessError::ResultMismatch {
        op: op.to_string(),
        rank,
        label,
        detail,
        tolerance,
    };

    for (rank, result) in results.iter().enumerate() {
        if result.rank != rank {
            return Err(mismatch(rank, "rank".to_string(), format!("result reports rank {}", result.rank)));
        }
        if result.op != op {
            return Err(mismatch(rank, "op".to_string(), format!("result reports op {}", result.op)));
        }
        if result.seed != seeds[rank] {
            return Err(mismatch(
                rank,
                "seed".to_string(),
                format!("worker used seed {}, harness recorded {}", result.seed, seeds[rank]),
            ));
        }
    }

    let expected = reference::expected(op, mode, seeds)?;
    let mut ranks = Vec::with_capacity(results.len());
    for (rank, (result, expectation)) in results.iter().zip(expected).enumerate() {
        let Some(expected_items) = expectation else {
            ranks.push(RankVerdict {
                rank,
                seed: result.seed,
                checked: false,
                items: 0,
            });
            continue;
        };

        let actual_items = result.payload.items();
        // An empty payload stands for zero-element arrays.
        let empty_ok = actual_items.is_empty() && expected_items.iter().all(|e| e.is_empty());
        if !empty_ok {
            if actual_items.len() != expected_items.len() {
                return Err(mismatch(
                    rank,
                    "items".to_string(),
                    format!("{} tensors, expected {}", actual_items.len(), expected_items.len()),
                ));
            }
            for (i, (actual, expected)) in actual_items.iter().zip(&expected_items).enumerate() {
                check_close(actual, expected, tolerance)
                    .map_err(|d| mismatch(rank, format!("item {}", i), d.to_string()))?;
            }
        }
        debug!(%op, rank, items = expected_items.len(), "rank verified");
        ranks.push(RankVerdict {
            rank,
            seed: result.seed,
            checked: true,
            items: expected_items.len(),
        });
    }

    Ok(Verdict {
        op,
        mode,
        tolerance,
        ranks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use crate::recipe;

    const SEEDS: [u64; 2] = [21, 22];

    fn allreduce_results() -> Vec<WorkerResult> {
        let sum = recipe::dense_input(21).add(&recipe::dense_input(22)).unwrap();
        (0..2)
            .map(|rank| WorkerResult {
                rank,
                seed: SEEDS[rank],
                op: CollectiveKind::Allreduce,
                payload: Payload::Tensor(sum.clone()),
            })
            .collect()
    }

    #[test]
    fn test_matching_results_pass() {
        let verdict = verify(
            CollectiveKind::Allreduce,
            ExecutionMode::Graph,
            &allreduce_results(),
            &SEEDS,
            Tolerance::default(),
        )
        .unwrap();
        assert!(verdict.ranks.iter().all(|r| r.checked && r.items == 1));
    }

    #[test]
    fn test_perturbed_value_is_reported() {
        let mut results = allreduce_results();
        if let Payload::Tensor(t) = &mut results[1].payload {
            t.as_mut_slice()[17] += 0.5;
        }
        let err = verify(
            CollectiveKind::Allreduce,
            ExecutionMode::Graph,
            &results,
            &SEEDS,
            Tolerance::default(),
        )
        .unwrap_err();
        match err {
            HarnessError::ResultMismatch { rank, label, detail, .. } => {
                assert_eq!(rank, 1);
                assert_eq!(label, "item 0");
                assert!(detail.contains("flat index 17"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_seed_mismatch_is_rejected() {
        let mut results = allreduce_results();
        results[0].seed = 99;
        let err = verify(
            CollectiveKind::Allreduce,
            ExecutionMode::Graph,
            &results,
            &SEEDS,
            Tolerance::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::ResultMismatch { ref label, .. } if label == "seed"));
    }

    #[test]
    fn test_unchecked_rank_may_be_empty() {
        let sum = recipe::dense_input(21).add(&recipe::dense_input(22)).unwrap();
        let results = vec![
            WorkerResult {
                rank: 0,
                seed: 21,
                op: CollectiveKind::Reduce,
                payload: Payload::Tensor(sum),
            },
            WorkerResult {
                rank: 1,
                seed: 22,
                op: CollectiveKind::Reduce,
                payload: Payload::Empty,
            },
        ];
        let verdict = verify(
            CollectiveKind::Reduce,
            ExecutionMode::Eager,
            &results,
            &SEEDS,
            Tolerance::default(),
        )
        .unwrap();
        assert!(!verdict.ranks[1].checked);
    }

    #[test]
    fn test_embedding_tolerance() {
        let t = tolerance_for(CollectiveKind::ParallelEmbedding, Tolerance::default());
        assert_eq!(t.atol, 1e-8);
        assert_eq!(tolerance_for(CollectiveKind::Scatter, Tolerance::default()), Tolerance::default());
    }
}
