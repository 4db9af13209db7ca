use crate::error::DecodeError;

/// Where a decode runs.
///
/// `Gpu(n)` selects CUDA device `n` when the `cuda` feature is enabled,
/// otherwise the first compatible `wgpu` adapter (feature `gpu`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu(usize),
}

/// Borrowed time-varying categorical scores.
///
/// Shape is `(batch, frames, states)`, row-major contiguous, so
/// `scores[b * frames * states + t * states + s]` is the score of state `s`
/// at frame `t` of batch item `b`. Scores are probabilities in `[0, 1]` or
/// natural logs, depending on the `log_probs` flag passed to the decoder.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    scores: &'a [f32],
    batch: usize,
    frames: usize,
    states: usize,
}

impl<'a> Observation<'a> {
    pub fn new(
        scores: &'a [f32],
        batch: usize,
        frames: usize,
        states: usize,
    ) -> Result<Self, DecodeError> {
        if batch == 0 || frames == 0 || states == 0 {
            return Err(DecodeError::invalid_argument(format!(
                "observation shape ({batch}, {frames}, {states}) has a zero axis"
            )));
        }
        let expected = batch
            .checked_mul(frames)
            .and_then(|n| n.checked_mul(states))
            .ok_or_else(|| {
                DecodeError::invalid_argument(format!(
                    "observation shape ({batch}, {frames}, {states}) overflows"
                ))
            })?;
        if scores.len() != expected {
            return Err(DecodeError::invalid_argument(format!(
                "observation has {} elements, expected {expected} for shape ({batch}, {frames}, {states})",
                scores.len()
            )));
        }
        Ok(Self {
            scores,
            batch,
            frames,
            states,
        })
    }

    /// A single sequence of shape `(frames, states)`, treated as batch size 1.
    pub fn single(scores: &'a [f32], frames: usize, states: usize) -> Result<Self, DecodeError> {
        Self::new(scores, 1, frames, states)
    }

    pub fn scores(&self) -> &'a [f32] {
        self.scores
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn states(&self) -> usize {
        self.states
    }
}

/// Decoded state indices, shape `(batch, frames)`.
///
/// Each row holds the most probable state sequence for one batch item.
/// Positions at or beyond that item's frame count are zero-filled and carry
/// no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBatch {
    indices: Vec<u32>,
    batch: usize,
    frames: usize,
}

impl DecodedBatch {
    pub(crate) fn from_parts(indices: Vec<u32>, batch: usize, frames: usize) -> Self {
        debug_assert_eq!(indices.len(), batch * frames);
        Self {
            indices,
            batch,
            frames,
        }
    }

    /// The full `(batch, frames)` index array, row-major.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The decoded row for batch item `b`, including any zero-filled padding.
    pub fn row(&self, b: usize) -> &[u32] {
        &self.indices[b * self.frames..(b + 1) * self.frames]
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub(crate) fn into_indices(self) -> Vec<u32> {
        self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_rejects_length_mismatch() {
        let scores = vec![0.0f32; 11];
        let err = Observation::new(&scores, 2, 3, 2).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidArgument { .. }));
    }

    #[test]
    fn observation_rejects_zero_axis() {
        let scores: Vec<f32> = Vec::new();
        assert!(Observation::new(&scores, 1, 0, 4).is_err());
        assert!(Observation::new(&scores, 0, 1, 4).is_err());
        assert!(Observation::new(&scores, 1, 1, 0).is_err());
    }

    #[test]
    fn observation_single_is_batch_one() {
        let scores = vec![0.25f32; 6];
        let obs = Observation::single(&scores, 3, 2).unwrap();
        assert_eq!(obs.batch(), 1);
        assert_eq!(obs.frames(), 3);
        assert_eq!(obs.states(), 2);
    }

    #[test]
    fn decoded_batch_rows() {
        let decoded = DecodedBatch::from_parts(vec![1, 2, 3, 4, 5, 6], 2, 3);
        assert_eq!(decoded.row(0), &[1, 2, 3]);
        assert_eq!(decoded.row(1), &[4, 5, 6]);
        assert_eq!(decoded.batch(), 2);
        assert_eq!(decoded.frames(), 3);
    }
}
