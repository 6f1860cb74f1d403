//! Reference - Expected Results From Seeds
//!
//! Recomputes what every rank should have produced using only the seeds and
//! the shared data recipes. Nothing here touches a process group.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::Array;

use crate::error::{HarnessError, HarnessResult};
use crate::recipe::{self, ExpertDraw, N_EXPERT};
use crate::spec::{CollectiveKind, ExecutionMode};

/// Expected items for one rank; `None` means the rank is not checked.
pub type Expectation = Option<Vec<Array>>;

/// Expected results for every rank, indexed by rank.
pub fn expected(op: CollectiveKind, mode: ExecutionMode, seeds: &[u64]) -> HarnessResult<Vec<Expectation>> {
    let world = seeds.len();
    if world != 2 {
        return Err(HarnessError::InvalidSpec(format!(
            "references are defined for two ranks, got {}",
            world
        )));
    }

    let dense = || seeds.iter().map(|&s| recipe::dense_input(s)).collect::<Vec<_>>();
    let same_for_all = |items: Vec<Array>| vec![Some(items); world];

    let out = match op {
        CollectiveKind::Allgather => same_for_all(dense()),
        CollectiveKind::Broadcast => same_for_all(vec![recipe::dense_input(seeds[1])]),
        CollectiveKind::Reduce => {
            let x = dense();
            vec![Some(vec![x[0].add(&x[1])?]), None]
        }
        CollectiveKind::Allreduce => {
            let x = dense();
            same_for_all(vec![x[0].add(&x[1])?])
        }
        CollectiveKind::Scatter => {
            let x1 = recipe::dense_input(seeds[1]);
            x1.split_rows(world)?.into_iter().map(|part| Some(vec![part])).collect()
        }
        CollectiveKind::Alltoall => {
            let halves = dense()
                .iter()
                .map(|x| x.split_rows(world))
                .collect::<tandem_core::Result<Vec<_>>>()?;
            (0..world)
                .map(|r| Some(halves.iter().map(|h| h[r].clone()).collect()))
                .collect()
        }
        CollectiveKind::Sendrecv => vec![None, Some(vec![recipe::dense_input(seeds[0])])],
        CollectiveKind::GlobalScatter | CollectiveKind::GlobalGather => expert_routing(op, mode, seeds)?,
        CollectiveKind::ParallelEmbedding => {
            let ids = recipe::embedding_ids(seeds[0]);
            let lookup = embedding_lookup(&recipe::embedding_table(), &ids)?;
            same_for_all(vec![ids, lookup])
        }
        CollectiveKind::RowParallelLinear | CollectiveKind::ColumnParallelLinear => {
            let x0 = recipe::dense_input(seeds[0]);
            same_for_all(vec![x0.matmul(&recipe::linear_weight())?])
        }
    };
    Ok(out)
}

/// `table[ids]` with `ids` carried as `f32`; result shape `[ids.shape..., dim]`.
fn embedding_lookup(table: &Array, ids: &Array) -> HarnessResult<Array> {
    let dim = table.row_len();
    let mut data = Vec::with_capacity(ids.numel() * dim);
    for &id in recipe::ids_to_i64(ids).as_slice() {
        let row = usize::try_from(id)
            .map_err(|_| HarnessError::InvalidSpec(format!("negative embedding id {}", id)))?;
        data.extend_from_slice(table.row(row)?);
    }
    let mut shape = ids.shape().to_vec();
    shape.push(dim);
    Ok(Array::from_vec(data, &shape)?)
}

// =============================================================================
// Expert Routing
// =============================================================================

fn expert_routing(op: CollectiveKind, mode: ExecutionMode, seeds: &[u64]) -> HarnessResult<Vec<Expectation>> {
    let world = seeds.len();
    let draws: Vec<ExpertDraw> = seeds.iter().map(|&s| ExpertDraw::new(s, world)).collect();
    let locals: Vec<Vec<i64>> = draws.iter().map(|d| d.local_count.clone()).collect();
    let globals: Vec<Vec<i64>> = (0..world).map(|r| recipe::global_count_for(r, &locals)).collect();

    let inputs: Vec<Array> = draws
        .into_iter()
        .enumerate()
        .map(|(r, draw)| {
            let rows = if op == CollectiveKind::GlobalScatter {
                recipe::total_rows(&locals[r])
            } else {
                recipe::total_rows(&globals[r])
            };
            draw.rows(rows)
        })
        .collect();

    let mut out = Vec::with_capacity(world);
    for r in 0..world {
        let routed = if op == CollectiveKind::GlobalScatter {
            scatter_rows(r, &inputs, &locals)?
        } else {
            gather_rows(r, &inputs, &globals)?
        };
        let mut items = vec![routed];
        if mode == ExecutionMode::Eager {
            items.push(inputs[r].scale(2.0));
        }
        out.push(Some(items));
    }
    Ok(out)
}

/// Rows landing on `rank`: for each of its experts, each source's segment.
fn scatter_rows(rank: usize, inputs: &[Array], locals: &[Vec<i64>]) -> HarnessResult<Array> {
    let segments: Vec<_> = locals.iter().map(|l| recipe::segments(l)).collect();
    let mut pieces = Vec::new();
    for e in 0..N_EXPERT {
        for (src, input) in inputs.iter().enumerate() {
            pieces.push((input, segments[src][rank * N_EXPERT + e].clone()));
        }
    }
    recipe::gather_rows(&pieces)
}

/// Rows returned to `rank`: from each holder, its expert pieces that came from `rank`.
fn gather_rows(rank: usize, inputs: &[Array], globals: &[Vec<i64>]) -> HarnessResult<Array> {
    let world = inputs.len();
    let mut pieces = Vec::new();
    for (holder, input) in inputs.iter().enumerate() {
        // A holder's input is expert-major: piece (e, s) has globals[holder][s * N_EXPERT + e] rows.
        let order: Vec<i64> = (0..N_EXPERT)
            .flat_map(|e| (0..world).map(move |s| globals[holder][s * N_EXPERT + e]))
            .collect();
        let segments = recipe::segments(&order);
        for e in 0..N_EXPERT {
            pieces.push((input, segments[e * world + rank].clone()));
        }
    }
    recipe::gather_rows(&pieces)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEEDS: [u64; 2] = [3, 4];

    #[test]
    fn test_reduce_and_sendrecv_leave_ranks_unchecked() {
        let reduce = expected(CollectiveKind::Reduce, ExecutionMode::Graph, &SEEDS).unwrap();
        assert!(reduce[0].is_some());
        assert!(reduce[1].is_none());
        let sendrecv = expected(CollectiveKind::Sendrecv, ExecutionMode::Graph, &SEEDS).unwrap();
        assert!(sendrecv[0].is_none());
        assert_eq!(sendrecv[1], Some(vec![recipe::dense_input(3)]));
    }

    #[test]
    fn test_scatter_splits_rank_one() {
        let out = expected(CollectiveKind::Scatter, ExecutionMode::Eager, &SEEDS).unwrap();
        let x1 = recipe::dense_input(4);
        assert_eq!(out[0], Some(vec![x1.slice_rows(0..5).unwrap()]));
        assert_eq!(out[1], Some(vec![x1.slice_rows(5..10).unwrap()]));
    }

    #[test]
    fn test_alltoall_sender_order() {
        let out = expected(CollectiveKind::Alltoall, ExecutionMode::Graph, &SEEDS).unwrap();
        let (x0, x1) = (recipe::dense_input(3), recipe::dense_input(4));
        assert_eq!(
            out[1],
            Some(vec![x0.slice_rows(5..10).unwrap(), x1.slice_rows(5..10).unwrap()])
        );
    }

    #[test]
    fn test_embedding_lookup() {
        let table = Array::from_vec((0..6).map(|v| v as f32).collect(), &[3, 2]).unwrap();
        let ids = Array::from_vec(vec![2.0, 0.0], &[1, 2]).unwrap();
        let out = embedding_lookup(&table, &ids).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2]);
        assert_eq!(out.to_vec(), vec![4.0, 5.0, 0.0, 1.0]);
    }

    #[test]
    fn test_expert_scatter_row_counts() {
        let out = expected(CollectiveKind::GlobalScatter, ExecutionMode::Eager, &SEEDS).unwrap();
        let locals: Vec<_> = SEEDS.iter().map(|&s| ExpertDraw::new(s, 2).local_count).collect();
        for (r, items) in out.iter().enumerate() {
            let items = items.as_ref().unwrap();
            assert_eq!(items.len(), 2);
            let global = recipe::global_count_for(r, &locals);
            assert_eq!(items[0].rows(), recipe::total_rows(&global));
            assert_eq!(items[1].rows(), recipe::total_rows(&locals[r]));
        }
    }

    #[test]
    fn test_gather_inverts_scatter_layout() {
        // Hand-built: both ranks route one row to every (rank, expert) slot.
        let locals = vec![vec![1, 1, 1, 1], vec![1, 1, 1, 1]];
        let globals: Vec<_> = (0..2).map(|r| recipe::global_count_for(r, &locals)).collect();
        let inputs: Vec<Array> = (0..2)
            .map(|r| {
                let base = r as f32 * 10.0;
                Array::from_vec((0..8).map(|i| base + i as f32).collect(), &[4, 2]).unwrap()
            })
            .collect();
        let scattered: Vec<Array> = (0..2).map(|r| scatter_rows(r, &inputs, &locals).unwrap()).collect();
        for r in 0..2 {
            assert_eq!(gather_rows(r, &scattered, &globals).unwrap(), inputs[r]);
        }
    }

    #[test]
    fn test_rejects_other_world_sizes() {
        assert!(expected(CollectiveKind::Allreduce, ExecutionMode::Graph, &[1, 2, 3]).is_err());
    }
}
