//! Ops - Collective Calls by API Layer
//!
//! Each helper runs one collective either through the `ProcessGroup` tensor
//! API or straight through the raw `Backend` slice API, as selected by the
//! worker's `path_id`.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use tandem_core::Array;
use tandem_distributed::{ProcessGroup, ReduceOp, Tag};

use crate::error::{HarnessError, HarnessResult};
use crate::spec::CollectiveKind;

/// Tag used by the point-to-point op.
pub const SENDRECV_TAG: Tag = 7;

/// API layer a collective is issued through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    /// `ProcessGroup` tensor methods.
    Group,
    /// Raw `Backend` slice methods.
    Backend,
}

impl Api {
    /// Resolves a `path_id` for `op`.
    pub fn from_path_id(path_id: u32, op: CollectiveKind) -> HarnessResult<Self> {
        match path_id {
            0 => Ok(Api::Group),
            1 if op.supports_backend_path() => Ok(Api::Backend),
            1 => Err(HarnessError::InvalidSpec(format!("{} has no raw backend path", op))),
            other => Err(HarnessError::InvalidSpec(format!("unknown path_id {}", other))),
        }
    }
}

fn shaped(data: Vec<f32>, shape: &[usize]) -> HarnessResult<Array> {
    Ok(Array::from_vec(data, shape)?)
}

/// Every rank's tensor, in rank order.
pub fn all_gather(pg: &ProcessGroup, api: Api, x: &Array) -> HarnessResult<Vec<Array>> {
    match api {
        Api::Group => Ok(pg.all_gather_tensor(x)?),
        Api::Backend => pg
            .backend()
            .all_gather(x.as_slice())?
            .into_iter()
            .map(|data| shaped(data, x.shape()))
            .collect(),
    }
}

/// Overwrites `x` with `src`'s tensor.
pub fn broadcast(pg: &ProcessGroup, api: Api, x: &mut Array, src: usize) -> HarnessResult<()> {
    match api {
        Api::Group => pg.broadcast_tensor(x, src)?,
        Api::Backend => pg.backend().broadcast(x.as_mut_slice(), src)?,
    }
    Ok(())
}

/// Sum onto `dst`; other ranks get `None`.
pub fn reduce(pg: &ProcessGroup, api: Api, x: &Array, dst: usize) -> HarnessResult<Option<Array>> {
    match api {
        Api::Group => Ok(pg.reduce_tensor(x, dst, ReduceOp::Sum)?),
        Api::Backend => pg
            .backend()
            .reduce(x.as_slice(), dst, ReduceOp::Sum)?
            .map(|data| shaped(data, x.shape()))
            .transpose(),
    }
}

/// Sum onto every rank, in place.
pub fn all_reduce(pg: &ProcessGroup, api: Api, x: &mut Array) -> HarnessResult<()> {
    match api {
        Api::Group => pg.all_reduce_tensor(x, ReduceOp::Sum)?,
        Api::Backend => pg.backend().all_reduce(x.as_mut_slice(), ReduceOp::Sum)?,
    }
    Ok(())
}

/// Splits `src`'s rows evenly across ranks.
pub fn scatter(pg: &ProcessGroup, api: Api, x: &Array, src: usize) -> HarnessResult<Array> {
    match api {
        Api::Group => Ok(pg.scatter_tensor(x, src)?),
        Api::Backend => {
            let world = pg.world_size();
            let chunks = if pg.rank() == src {
                Some(
                    x.split_rows(world)?
                        .into_iter()
                        .map(Array::into_vec)
                        .collect::<Vec<_>>(),
                )
            } else {
                None
            };
            let data = pg.backend().scatter(chunks.as_deref(), src)?;
            let mut shape = x.shape().to_vec();
            if let Some(rows) = shape.first_mut() {
                *rows /= world;
            }
            shaped(data, &shape)
        }
    }
}

/// Row blocks exchanged between every pair, returned in sender order.
pub fn all_to_all(pg: &ProcessGroup, x: &Array) -> HarnessResult<Vec<Array>> {
    Ok(pg.all_to_all_tensor(x)?)
}

/// Sends `x` to `dst`.
pub fn send(pg: &ProcessGroup, api: Api, x: &Array, dst: usize) -> HarnessResult<()> {
    match api {
        Api::Group => pg.send_tensor(x, dst, SENDRECV_TAG)?,
        Api::Backend => pg.backend().send(x.as_slice(), dst, SENDRECV_TAG)?,
    }
    Ok(())
}

/// Receives a tensor of `shape` from `src`.
pub fn recv(pg: &ProcessGroup, api: Api, src: usize, shape: &[usize]) -> HarnessResult<Array> {
    match api {
        Api::Group => Ok(pg.recv_tensor(src, SENDRECV_TAG, shape)?),
        Api::Backend => shaped(pg.backend().recv(src, SENDRECV_TAG)?, shape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn on_two_ranks<F>(f: F) -> Vec<Array>
    where
        F: Fn(ProcessGroup) -> Array + Send + Sync + Copy + 'static,
    {
        let handles: Vec<_> = ProcessGroup::local_world(2)
            .into_iter()
            .map(|pg| thread::spawn(move || f(pg)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    fn rank_tensor(rank: usize) -> Array {
        let base = rank as f32 * 10.0;
        Array::from_vec((0..4).map(|i| base + i as f32).collect(), &[4, 1]).unwrap()
    }

    #[test]
    fn test_path_id_resolution() {
        assert_eq!(Api::from_path_id(0, CollectiveKind::GlobalGather).unwrap(), Api::Group);
        assert_eq!(Api::from_path_id(1, CollectiveKind::Sendrecv).unwrap(), Api::Backend);
        assert!(Api::from_path_id(1, CollectiveKind::Alltoall).is_err());
        assert!(Api::from_path_id(5, CollectiveKind::Allreduce).is_err());
    }

    #[test]
    fn test_backend_all_reduce_matches_group() {
        for api in [Api::Group, Api::Backend] {
            let out = on_two_ranks(move |pg| {
                let mut x = rank_tensor(pg.rank());
                all_reduce(&pg, api, &mut x).unwrap();
                x
            });
            let expected = rank_tensor(0).add(&rank_tensor(1)).unwrap();
            assert_eq!(out, vec![expected.clone(), expected]);
        }
    }

    #[test]
    fn test_backend_scatter() {
        let out = on_two_ranks(|pg| scatter(&pg, Api::Backend, &rank_tensor(pg.rank()), 1).unwrap());
        assert_eq!(out[0], rank_tensor(1).slice_rows(0..2).unwrap());
        assert_eq!(out[1], rank_tensor(1).slice_rows(2..4).unwrap());
    }

    #[test]
    fn test_backend_reduce_only_on_dst() {
        let out = on_two_ranks(|pg| {
            reduce(&pg, Api::Backend, &rank_tensor(pg.rank()), 0)
                .unwrap()
                .unwrap_or_else(|| Array::empty(&[1]))
        });
        assert_eq!(out[0], rank_tensor(0).add(&rank_tensor(1)).unwrap());
        assert!(out[1].is_empty());
    }

    #[test]
    fn test_send_recv() {
        for api in [Api::Group, Api::Backend] {
            let out = on_two_ranks(move |pg| {
                if pg.rank() == 0 {
                    send(&pg, api, &rank_tensor(0), 1).unwrap();
                    Array::empty(&[1])
                } else {
                    recv(&pg, api, 0, &[4, 1]).unwrap()
                }
            });
            assert_eq!(out[1], rank_tensor(0));
        }
    }
}
