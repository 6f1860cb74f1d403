//! Payload - Worker Result Codec
//!
//! A worker writes exactly one blob to stdout: the magic bytes `TNDM`
//! followed by a bincode-encoded [`WorkerResult`].
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};
use tandem_core::{checked_numel, Array};

use crate::error::{HarnessError, HarnessResult};
use crate::spec::CollectiveKind;

/// Leading bytes of every worker output.
pub const MAGIC: &[u8; 4] = b"TNDM";

/// Bytes of raw output shown when decoding fails.
const PREVIEW_LEN: usize = 64;

// =============================================================================
// Payload
// =============================================================================

/// What a worker produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A single tensor.
    Tensor(Array),
    /// An ordered list of tensors.
    Tensors(Vec<Array>),
    /// Nothing to report on this rank.
    Empty,
}

impl Payload {
    /// The tensors in order; `Empty` has none.
    pub fn items(&self) -> Vec<&Array> {
        match self {
            Payload::Tensor(t) => vec![t],
            Payload::Tensors(ts) => ts.iter().collect(),
            Payload::Empty => Vec::new(),
        }
    }

    /// True for [`Payload::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// One worker's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Rank that produced the result.
    pub rank: usize,
    /// Seed the worker used.
    pub seed: u64,
    /// Collective that ran.
    pub op: CollectiveKind,
    /// Output tensors.
    pub payload: Payload,
}

// =============================================================================
// Codec
// =============================================================================

/// Serializes a result for stdout.
pub fn encode(result: &WorkerResult) -> HarnessResult<Vec<u8>> {
    let body = bincode::serialize(result).map_err(|e| HarnessError::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(MAGIC.len() + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parses the stdout of the worker with the given rank.
pub fn decode(rank: usize, bytes: &[u8]) -> HarnessResult<WorkerResult> {
    let malformed = |reason: String| HarnessError::MalformedOutput {
        rank,
        reason,
        preview: String::from_utf8_lossy(&bytes[..bytes.len().min(PREVIEW_LEN)]).into_owned(),
    };

    if bytes.is_empty() {
        return Err(malformed("no output".to_string()));
    }
    let Some(body) = bytes.strip_prefix(MAGIC.as_slice()) else {
        return Err(malformed("missing TNDM header".to_string()));
    };
    let result: WorkerResult =
        bincode::deserialize(body).map_err(|e| malformed(format!("undecodable body: {}", e)))?;
    for (i, item) in result.payload.items().into_iter().enumerate() {
        if checked_numel(item.shape()) != Some(item.as_slice().len()) {
            return Err(malformed(format!(
                "item {} has {} values for shape {:?}",
                i,
                item.as_slice().len(),
                item.shape()
            )));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkerResult {
        WorkerResult {
            rank: 1,
            seed: 4242,
            op: CollectiveKind::Alltoall,
            payload: Payload::Tensors(vec![
                Array::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap(),
                Array::empty(&[2]),
            ]),
        }
    }

    #[test]
    fn test_decode_encoded_result() {
        let bytes = encode(&sample()).unwrap();
        assert!(bytes.starts_with(MAGIC));
        assert_eq!(decode(1, &bytes).unwrap(), sample());
    }

    #[test]
    fn test_empty_output() {
        let err = decode(0, b"").unwrap_err();
        assert!(matches!(err, HarnessError::MalformedOutput { rank: 0, ref reason, .. } if reason == "no output"));
    }

    #[test]
    fn test_text_output_is_previewed() {
        let err = decode(1, b"Traceback: something went wrong").unwrap_err();
        match err {
            HarnessError::MalformedOutput { rank, preview, .. } => {
                assert_eq!(rank, 1);
                assert!(preview.starts_with("Traceback"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_truncated_body() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(1, &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, HarnessError::MalformedOutput { .. }));
    }

    /// Same wire layout as `WorkerResult`, with an unchecked tensor.
    #[derive(Serialize)]
    struct ForgedResult {
        rank: usize,
        seed: u64,
        op: CollectiveKind,
        payload: ForgedPayload,
    }

    #[derive(Serialize)]
    enum ForgedPayload {
        Tensor { data: Vec<f32>, shape: Vec<usize> },
    }

    fn forged(shape: Vec<usize>) -> Vec<u8> {
        let result = ForgedResult {
            rank: 0,
            seed: 1,
            op: CollectiveKind::Allreduce,
            payload: ForgedPayload::Tensor {
                data: Vec::new(),
                shape,
            },
        };
        let mut bytes = MAGIC.to_vec();
        bytes.extend(bincode::serialize(&result).unwrap());
        bytes
    }

    #[test]
    fn test_overflowing_shape_is_malformed() {
        for shape in [vec![usize::MAX, 2], vec![1usize << 63, 2], vec![3]] {
            let err = decode(0, &forged(shape.clone())).unwrap_err();
            assert!(
                matches!(err, HarnessError::MalformedOutput { rank: 0, .. }),
                "shape {shape:?} gave {err}"
            );
        }
        assert!(decode(0, &forged(vec![0, 4])).is_ok());
    }

    #[test]
    fn test_preview_is_bounded() {
        let noise = vec![b'x'; 500];
        match decode(0, &noise).unwrap_err() {
            HarnessError::MalformedOutput { preview, .. } => assert_eq!(preview.len(), PREVIEW_LEN),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_payload_items() {
        assert!(Payload::Empty.items().is_empty());
        assert!(Payload::Empty.is_empty());
        let t = Array::zeros(&[3]);
        assert_eq!(Payload::Tensor(t.clone()).items(), vec![&t]);
    }
}
