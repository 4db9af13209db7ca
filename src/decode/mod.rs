//! Decode orchestration: normalize, plan, run a kernel, return indices.

pub mod normalize;
pub mod plan;

use crate::error::DecodeError;
use crate::types::{DecodedBatch, Device, Observation};
use crate::viterbi;

/// Decode a batch of time-varying categorical distributions.
///
/// `observation` holds `(batch, max_frames, states)` scores; `frame_counts`
/// gives the true length of each item (defaults to `max_frames` for all),
/// `transition` and `initial` default to uniform distributions. When
/// `log_probs` is false all scores are probabilities and are converted to
/// natural logs before decoding.
///
/// Returns the `(batch, max_frames)` most-probable state indices. Positions
/// at or beyond an item's frame count are zero-filled. Ties resolve to the
/// smallest state index at every step.
pub fn from_probabilities(
    observation: &Observation<'_>,
    frame_counts: Option<&[usize]>,
    transition: Option<&[f32]>,
    initial: Option<&[f32]>,
    log_probs: bool,
    device: Device,
) -> Result<DecodedBatch, DecodeError> {
    let params = normalize::normalize(observation, frame_counts, transition, initial, log_probs)?;
    let mut plan = plan::plan(&params, device)?;
    viterbi::decode_batch(&params, &mut plan)?;
    Ok(DecodedBatch::from_parts(
        plan.indices,
        params.batch,
        params.max_frames,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(
        scores: &[f32],
        batch: usize,
        frames: usize,
        states: usize,
        frame_counts: Option<&[usize]>,
        transition: Option<&[f32]>,
        initial: Option<&[f32]>,
        log_probs: bool,
    ) -> DecodedBatch {
        let obs = Observation::new(scores, batch, frames, states).unwrap();
        from_probabilities(
            &obs,
            frame_counts,
            transition,
            initial,
            log_probs,
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn uniform_parameters_collapse_to_per_frame_argmax() {
        let scores = vec![
            0.1f32, 0.7, 0.2, //
            0.5, 0.2, 0.3, //
            0.3, 0.3, 0.4,
        ];
        let decoded = decode(&scores, 1, 3, 3, None, None, None, false);
        assert_eq!(decoded.row(0), &[1, 0, 2]);
    }

    #[test]
    fn readme_example_decodes_to_pinned_path() {
        let observation = vec![
            0.25f32, 0.5, 0.25, //
            0.25, 0.25, 0.5, //
            0.33, 0.33, 0.33,
        ];
        let transition = vec![
            0.5f32, 0.25, 0.25, //
            0.33, 0.34, 0.33, //
            0.25, 0.25, 0.5,
        ];
        let initial = vec![0.4f32, 0.35, 0.25];
        let decoded = decode(
            &observation,
            1,
            3,
            3,
            None,
            Some(&transition),
            Some(&initial),
            false,
        );
        assert_eq!(decoded.row(0), &[1, 2, 2]);
    }

    #[test]
    fn log_and_probability_inputs_agree() {
        let observation = vec![0.3f32, 0.7, 0.6, 0.4, 0.2, 0.8];
        let transition = vec![0.9f32, 0.1, 0.4, 0.6];
        let initial = vec![0.5f32, 0.5];
        let from_probs = decode(
            &observation,
            1,
            3,
            2,
            None,
            Some(&transition),
            Some(&initial),
            false,
        );

        let log_obs: Vec<f32> = observation.iter().map(|&p| p.ln()).collect();
        let log_transition: Vec<f32> = transition.iter().map(|&p| p.ln()).collect();
        let log_initial: Vec<f32> = initial.iter().map(|&p| p.ln()).collect();
        let from_logs = decode(
            &log_obs,
            1,
            3,
            2,
            None,
            Some(&log_transition),
            Some(&log_initial),
            true,
        );

        assert_eq!(from_probs, from_logs);
    }

    #[test]
    fn ragged_batch_matches_individual_decodes() {
        // Item 1 has two valid frames; its padding is garbage that must
        // never be read.
        let scores = vec![
            0.2f32, 0.8, 0.9, 0.1, 0.3, 0.7, 0.6, 0.4, //
            0.7, 0.3, 0.1, 0.9, 9.0, 9.0, 9.0, 9.0,
        ];
        let batched = decode(&scores, 2, 4, 2, Some(&[4, 2]), None, None, false);
        let alone = decode(&scores[8..12], 1, 2, 2, None, None, None, false);
        assert_eq!(&batched.row(1)[..2], alone.row(0));
        assert_eq!(&batched.row(1)[2..], &[0, 0]);
    }

    #[test]
    fn validation_errors_precede_any_decode() {
        let scores = vec![0.5f32; 8];
        let obs = Observation::new(&scores, 2, 2, 2).unwrap();
        let err = from_probabilities(&obs, Some(&[2, 3]), None, None, false, Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidArgument { .. }));
    }

    #[cfg(not(any(feature = "cuda", feature = "gpu")))]
    #[test]
    fn gpu_request_without_backend_is_a_device_error() {
        let scores = vec![0.5f32; 4];
        let obs = Observation::new(&scores, 1, 2, 2).unwrap();
        let err =
            from_probabilities(&obs, None, None, None, false, Device::Gpu(0)).unwrap_err();
        assert!(matches!(err, DecodeError::Device { .. }));
    }
}
