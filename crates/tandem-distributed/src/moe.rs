//! MoE - Expert Routing Collectives
//!
//! Rows are routed to the rank hosting their expert. With `n_expert` experts
//! per rank, a rank's `local_count` has `world_size * n_expert` entries:
//! `local_count[j * n_expert + e]` rows go to expert `e` on rank `j`, and the
//! input rows are laid out in that same order.
//!
//! `global_count` is the receiving view: `global_count[s * n_expert + e]` rows
//! arrive from source rank `s` for local expert `e`. `global_scatter` emits
//! them grouped by expert, then by source rank; `global_gather` is its exact
//! inverse and returns rows to their original owner and position.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::Array;

use crate::error::{CommError, CommResult};
use crate::process_group::ProcessGroup;

fn to_usize(counts: &[i64]) -> CommResult<Vec<usize>> {
    counts
        .iter()
        .map(|&c| {
            usize::try_from(c)
                .map_err(|_| CommError::Protocol(format!("negative expert count {}", c)))
        })
        .collect()
}

fn check_counts(counts: &[i64], world: usize) -> CommResult<usize> {
    if world == 0 || counts.is_empty() || counts.len() % world != 0 {
        return Err(CommError::Protocol(format!(
            "expert count length {} is not a multiple of world size {}",
            counts.len(),
            world
        )));
    }
    Ok(counts.len() / world)
}

/// Exchanges routing counts: turns each rank's `local_count` into its `global_count`.
pub fn exchange_expert_counts(local_count: &[i64], pg: &ProcessGroup) -> CommResult<Vec<i64>> {
    let world = pg.world_size();
    let n_expert = check_counts(local_count, world)?;
    let chunks: Vec<Vec<f32>> = local_count
        .chunks(n_expert)
        .map(|c| c.iter().map(|&v| v as f32).collect())
        .collect();
    let received = pg.backend().all_to_all(&chunks)?;
    let mut global = Vec::with_capacity(local_count.len());
    for (peer, chunk) in received.into_iter().enumerate() {
        if chunk.len() != n_expert {
            return Err(CommError::SizeMismatch {
                peer,
                expected: n_expert,
                actual: chunk.len(),
            });
        }
        global.extend(chunk.into_iter().map(|v| v as i64));
    }
    Ok(global)
}

/// Sends each row to the rank hosting its expert.
///
/// `input` has `sum(local_count)` rows; the result has `sum(global_count)`
/// rows ordered expert-major, then by source rank.
pub fn global_scatter(
    input: &Array,
    local_count: &[i64],
    global_count: &[i64],
    pg: &ProcessGroup,
) -> CommResult<Array> {
    let world = pg.world_size();
    let n_expert = check_counts(local_count, world)?;
    if global_count.len() != local_count.len() {
        return Err(CommError::Protocol(format!(
            "global count length {} != local count length {}",
            global_count.len(),
            local_count.len()
        )));
    }
    let local = to_usize(local_count)?;
    let global = to_usize(global_count)?;

    // Rows bound for rank j are contiguous in the input; send them as one part.
    let per_rank: Vec<usize> = local.chunks(n_expert).map(|c| c.iter().sum()).collect();
    let outgoing = input.split_rows_by(&per_rank)?;
    let incoming = pg.all_to_all_v(&outgoing)?;

    let mut by_source = Vec::with_capacity(world);
    for (src, block) in incoming.iter().enumerate() {
        by_source.push(block.split_rows_by(&global[src * n_expert..(src + 1) * n_expert])?);
    }
    let mut ordered = Vec::with_capacity(local.len());
    for expert in 0..n_expert {
        for pieces in &by_source {
            ordered.push(pieces[expert].clone());
        }
    }
    concat_or_empty(&ordered, input)
}

/// Returns expert outputs to the ranks that own the rows.
///
/// `input` has `sum(global_count)` rows in `global_scatter` output order; the
/// result has `sum(local_count)` rows in the original input order.
pub fn global_gather(
    input: &Array,
    local_count: &[i64],
    global_count: &[i64],
    pg: &ProcessGroup,
) -> CommResult<Array> {
    let world = pg.world_size();
    let n_expert = check_counts(global_count, world)?;
    if global_count.len() != local_count.len() {
        return Err(CommError::Protocol(format!(
            "global count length {} != local count length {}",
            global_count.len(),
            local_count.len()
        )));
    }
    let local = to_usize(local_count)?;
    let global = to_usize(global_count)?;
    let global = global.as_slice();

    // Input is expert-major: piece (e, s) holds global[s * n_expert + e] rows.
    let order: Vec<usize> = (0..n_expert)
        .flat_map(|e| (0..world).map(move |s| global[s * n_expert + e]))
        .collect();
    let pieces = input.split_rows_by(&order)?;
    let mut outgoing = Vec::with_capacity(world);
    for dst in 0..world {
        let for_dst: Vec<Array> = (0..n_expert)
            .map(|e| pieces[e * world + dst].clone())
            .collect();
        outgoing.push(concat_or_empty(&for_dst, input)?);
    }
    let incoming = pg.all_to_all_v(&outgoing)?;

    for (holder, block) in incoming.iter().enumerate() {
        let expected: usize = local[holder * n_expert..(holder + 1) * n_expert].iter().sum();
        if block.rows() != expected {
            return Err(CommError::SizeMismatch {
                peer: holder,
                expected,
                actual: block.rows(),
            });
        }
    }
    concat_or_empty(&incoming, input)
}

/// Backward of [`global_scatter`]: gathers the output gradient back.
pub fn global_scatter_backward(
    grad_output: &Array,
    local_count: &[i64],
    global_count: &[i64],
    pg: &ProcessGroup,
) -> CommResult<Array> {
    global_gather(grad_output, local_count, global_count, pg)
}

/// Backward of [`global_gather`]: scatters the output gradient back out.
pub fn global_gather_backward(
    grad_output: &Array,
    local_count: &[i64],
    global_count: &[i64],
    pg: &ProcessGroup,
) -> CommResult<Array> {
    global_scatter(grad_output, local_count, global_count, pg)
}

/// Stacks rows; falls back to a zero-row array shaped like `like`.
fn concat_or_empty(parts: &[Array], like: &Array) -> CommResult<Array> {
    if parts.iter().all(Array::is_empty) {
        return Ok(Array::empty(like.shape().get(1..).unwrap_or(&[])));
    }
    Ok(Array::concat_rows(parts)?)
}
