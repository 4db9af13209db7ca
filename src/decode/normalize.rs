//! Parameter validation, default synthesis, and log-domain conversion.
//!
//! Every decode starts here: shapes are checked, missing transition/initial
//! distributions are filled in as uniform, and all score arrays are brought
//! into the natural-log domain exactly once. The kernels never see raw
//! probabilities or absent parameters.

use std::borrow::Cow;

use crate::error::DecodeError;
use crate::types::Observation;

/// Normalized decode inputs. All score arrays are in the natural-log domain;
/// `-inf` marks an impossible state or transition (`ln 0`).
#[derive(Debug)]
pub struct NormalizedParams<'a> {
    /// `(batch, max_frames, states)` log scores, row-major.
    pub(crate) observation: Cow<'a, [f32]>,
    /// True frame count per batch item, each in `[1, max_frames]`.
    pub(crate) frame_counts: Cow<'a, [usize]>,
    /// `(states, states)` log transition scores; `[i * states + j]` is from `i` to `j`.
    pub(crate) transition: Vec<f32>,
    /// `(states,)` log initial scores.
    pub(crate) initial: Vec<f32>,
    pub(crate) batch: usize,
    pub(crate) max_frames: usize,
    pub(crate) states: usize,
}

pub fn normalize<'a>(
    observation: &Observation<'a>,
    frame_counts: Option<&'a [usize]>,
    transition: Option<&[f32]>,
    initial: Option<&[f32]>,
    log_probs: bool,
) -> Result<NormalizedParams<'a>, DecodeError> {
    let batch = observation.batch();
    let max_frames = observation.frames();
    let states = observation.states();

    let frame_counts = match frame_counts {
        Some(counts) => {
            if counts.len() != batch {
                return Err(DecodeError::invalid_argument(format!(
                    "frame_counts has {} entries, expected {batch}",
                    counts.len()
                )));
            }
            if let Some(&bad) = counts.iter().find(|&&n| n == 0 || n > max_frames) {
                return Err(DecodeError::invalid_argument(format!(
                    "frame count {bad} outside [1, {max_frames}]"
                )));
            }
            Cow::Borrowed(counts)
        }
        None => Cow::Owned(vec![max_frames; batch]),
    };

    let transition = match transition {
        Some(scores) => {
            if scores.len() != states * states {
                return Err(DecodeError::invalid_argument(format!(
                    "transition has {} elements, expected {} for shape ({states}, {states})",
                    scores.len(),
                    states * states
                )));
            }
            to_log(scores, log_probs)
        }
        None => uniform_log(states, states * states),
    };

    let initial = match initial {
        Some(scores) => {
            if scores.len() != states {
                return Err(DecodeError::invalid_argument(format!(
                    "initial has {} elements, expected {states}",
                    scores.len()
                )));
            }
            to_log(scores, log_probs)
        }
        None => uniform_log(states, states),
    };

    let observation = if log_probs {
        Cow::Borrowed(observation.scores())
    } else {
        Cow::Owned(observation.scores().iter().map(|&p| p.ln()).collect())
    };

    Ok(NormalizedParams {
        observation,
        frame_counts,
        transition,
        initial,
        batch,
        max_frames,
        states,
    })
}

impl NormalizedParams<'_> {
    /// Starting offset of item `b` within the observation array.
    pub(crate) fn observation_offset(&self, b: usize) -> usize {
        b * self.max_frames * self.states
    }
}

/// `ln(1/states)` repeated `len` times.
fn uniform_log(states: usize, len: usize) -> Vec<f32> {
    vec![-(states as f32).ln(); len]
}

fn to_log(scores: &[f32], log_probs: bool) -> Vec<f32> {
    if log_probs {
        scores.to_vec()
    } else {
        scores.iter().map(|&p| p.ln()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(scores: &[f32], batch: usize, frames: usize, states: usize) -> Observation<'_> {
        Observation::new(scores, batch, frames, states).unwrap()
    }

    #[test]
    fn synthesizes_uniform_defaults_in_log_space() {
        let scores = vec![0.5f32; 8];
        let params = normalize(&obs(&scores, 1, 2, 4), None, None, None, false).unwrap();
        let expected = -(4.0f32).ln();
        assert_eq!(params.transition.len(), 16);
        assert!(params.transition.iter().all(|&x| x == expected));
        assert_eq!(params.initial, vec![expected; 4]);
        assert_eq!(params.frame_counts.as_ref(), &[2]);
    }

    #[test]
    fn defaults_are_log_space_regardless_of_flag() {
        let scores = vec![-1.0f32; 8];
        let params = normalize(&obs(&scores, 1, 2, 4), None, None, None, true).unwrap();
        assert_eq!(params.initial, vec![-(4.0f32).ln(); 4]);
    }

    #[test]
    fn converts_probabilities_once() {
        let scores = vec![0.5f32, 0.5, 1.0, 0.25];
        let params = normalize(&obs(&scores, 1, 2, 2), None, None, None, false).unwrap();
        assert!((params.observation[0] - 0.5f32.ln()).abs() < 1e-7);
        assert_eq!(params.observation[2], 0.0);
    }

    #[test]
    fn log_inputs_are_borrowed_untouched() {
        let scores = vec![-0.7f32, -0.7, -0.1, -2.3];
        let params = normalize(&obs(&scores, 1, 2, 2), None, None, None, true).unwrap();
        assert!(matches!(params.observation, Cow::Borrowed(_)));
        assert_eq!(params.observation.as_ref(), scores.as_slice());
    }

    #[test]
    fn zero_probability_becomes_neg_infinity() {
        let scores = vec![0.0f32, 1.0, 1.0, 0.0];
        let params = normalize(&obs(&scores, 1, 2, 2), None, None, None, false).unwrap();
        assert_eq!(params.observation[0], f32::NEG_INFINITY);
        assert_eq!(params.observation[1], 0.0);
    }

    #[test]
    fn rejects_bad_frame_counts() {
        let scores = vec![0.5f32; 8];
        let o = obs(&scores, 2, 2, 2);
        assert!(normalize(&o, Some(&[2]), None, None, false).is_err());
        assert!(normalize(&o, Some(&[2, 0]), None, None, false).is_err());
        assert!(normalize(&o, Some(&[2, 3]), None, None, false).is_err());
        assert!(normalize(&o, Some(&[2, 1]), None, None, false).is_ok());
    }

    #[test]
    fn rejects_bad_transition_and_initial_shapes() {
        let scores = vec![0.5f32; 6];
        let o = obs(&scores, 1, 2, 3);
        let bad_transition = vec![0.1f32; 6];
        assert!(normalize(&o, None, Some(&bad_transition), None, false).is_err());
        let bad_initial = vec![0.5f32, 0.5];
        assert!(normalize(&o, None, None, Some(&bad_initial), false).is_err());
    }

    #[test]
    fn observation_offsets_are_row_major() {
        let scores = vec![0.5f32; 12];
        let params = normalize(&obs(&scores, 2, 3, 2), None, None, None, true).unwrap();
        assert_eq!(params.observation_offset(0), 0);
        assert_eq!(params.observation_offset(1), 6);
    }
}
