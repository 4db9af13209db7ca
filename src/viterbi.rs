//! Viterbi forward/traceback kernels.
//!
//! The CPU kernel runs one sequence per worker, parallel over the batch.
//! The GPU backends parallelize the state axis as well: `cuda` compiles a
//! batched kernel through NVRTC, `gpu` runs a WGSL compute shader on any
//! Vulkan/DX12/Metal adapter. All three visit predecessor states in
//! ascending order and break ties toward the smallest index, so their
//! outputs are bit-identical for identical inputs.

use rayon::prelude::*;

use crate::decode::normalize::NormalizedParams;
use crate::decode::plan::DecodePlan;
use crate::error::DecodeError;
use crate::types::Device;

#[cfg(feature = "cuda")]
#[path = "viterbi/cuda/viterbi_cuda.rs"]
pub mod cuda;

#[cfg(feature = "gpu")]
#[path = "viterbi/gpu/viterbi_gpu.rs"]
pub mod gpu;

/// Largest state count the cooperative GPU kernel supports: two delta
/// buffers of `states` floats must fit the 48 KiB static shared-memory
/// window of a block.
pub(crate) const MAX_GPU_STATES: usize = 6_144;

/// Run the planned decode, filling `plan.indices` in place.
pub(crate) fn decode_batch(
    params: &NormalizedParams<'_>,
    plan: &mut DecodePlan,
) -> Result<(), DecodeError> {
    match plan.device {
        Device::Cpu => {
            decode_batch_cpu(params, plan);
            Ok(())
        }
        Device::Gpu(index) => decode_batch_gpu(params, plan, index),
    }
}

#[allow(unused_variables)]
fn decode_batch_gpu(
    params: &NormalizedParams<'_>,
    plan: &mut DecodePlan,
    index: usize,
) -> Result<(), DecodeError> {
    #[cfg(feature = "cuda")]
    {
        return cuda::decode_batch_cuda(params, plan, index);
    }

    #[cfg(all(not(feature = "cuda"), feature = "gpu"))]
    {
        if gpu::decode_batch_wgpu(params, plan).is_some() {
            return Ok(());
        }
        return Err(DecodeError::device(
            "wgpu decode",
            "no compatible GPU adapter available",
        ));
    }

    #[cfg(all(not(feature = "cuda"), not(feature = "gpu")))]
    {
        Err(DecodeError::device(
            "gpu decode",
            format!("GPU device {index} requested but no GPU backend was compiled in"),
        ))
    }
}

/// Batch-parallel CPU Viterbi. Items are independent; each worker owns its
/// two delta buffers and writes disjoint slices of the back-pointer table
/// and the output.
pub(crate) fn decode_batch_cpu(params: &NormalizedParams<'_>, plan: &mut DecodePlan) {
    let max_frames = params.max_frames;
    let states = params.states;
    let DecodePlan {
        offsets,
        backptr,
        indices,
        ..
    } = plan;
    let offsets = offsets.as_slice();

    indices
        .par_chunks_mut(max_frames)
        .zip(backptr.par_chunks_mut(max_frames * states))
        .enumerate()
        .for_each(|(b, (path, backptr))| {
            let offset = offsets[b];
            let observation = &params.observation[offset..offset + max_frames * states];
            viterbi_item(
                observation,
                &params.transition,
                &params.initial,
                params.frame_counts[b],
                states,
                path,
                backptr,
            );
        });
}

/// Serial Viterbi for one sequence.
///
/// `observation` is `(frames, states)` log scores for this item; `path` and
/// `backptr` are its slices of the output and the back-pointer table.
/// Positions of `path` at or beyond `frames` are left untouched.
fn viterbi_item(
    observation: &[f32],
    transition: &[f32],
    initial: &[f32],
    frames: usize,
    states: usize,
    path: &mut [u32],
    backptr: &mut [u32],
) {
    let mut prev = vec![0.0f32; states];
    let mut curr = vec![0.0f32; states];

    for s in 0..states {
        prev[s] = initial[s] + observation[s];
    }

    for t in 1..frames {
        let row = &observation[t * states..(t + 1) * states];
        let bp_row = &mut backptr[t * states..(t + 1) * states];
        for s in 0..states {
            // The emission score is constant in the predecessor, so it is
            // added after the max; tie-break stays with the smallest index
            // because the scan is ascending and the comparison strict.
            let mut best = f32::NEG_INFINITY;
            let mut best_i = 0u32;
            for (i, &score) in prev.iter().enumerate() {
                let cand = score + transition[i * states + s];
                if cand > best {
                    best = cand;
                    best_i = i as u32;
                }
            }
            curr[s] = best + row[s];
            bp_row[s] = best_i;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let mut state = argmax(&prev);
    path[frames - 1] = state as u32;
    for t in (0..frames - 1).rev() {
        state = backptr[(t + 1) * states + state] as usize;
        path[t] = state as u32;
    }
}

/// Index of the maximum score, smallest index on ties.
fn argmax(scores: &[f32]) -> usize {
    let mut best = f32::NEG_INFINITY;
    let mut best_i = 0;
    for (i, &score) in scores.iter().enumerate() {
        if score > best {
            best = score;
            best_i = i;
        }
    }
    best_i
}
