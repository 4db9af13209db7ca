//! Batch planning: device binding and scratch/output allocation.
//!
//! The back-pointer table dominates decode memory at
//! `batch * max_frames * states * 4` bytes, so it is allocated here with a
//! fallible reserve rather than inside a kernel. GPU plans skip the host
//! table; the device kernel owns its own copy.

use crate::decode::normalize::NormalizedParams;
use crate::error::DecodeError;
use crate::types::Device;
use crate::viterbi::MAX_GPU_STATES;

#[derive(Debug)]
pub struct DecodePlan {
    /// Device the decode is bound to. May differ from the caller's hint when
    /// the state count does not fit the cooperative GPU kernel.
    pub(crate) device: Device,
    /// Per-item starting offsets into the observation array.
    pub(crate) offsets: Vec<usize>,
    /// `(batch, max_frames, states)` back-pointer table, zeroed. Empty for
    /// GPU plans. Frame 0 of each item is defined but never read.
    pub(crate) backptr: Vec<u32>,
    /// `(batch, max_frames)` output indices, zeroed so padded positions never
    /// leak uninitialized memory.
    pub(crate) indices: Vec<u32>,
}

pub fn plan(params: &NormalizedParams<'_>, device: Device) -> Result<DecodePlan, DecodeError> {
    let device = match device {
        Device::Gpu(_) if params.states > MAX_GPU_STATES => {
            tracing::debug!(
                states = params.states,
                max = MAX_GPU_STATES,
                "state count exceeds the GPU kernel's shared-memory budget; using CPU kernel"
            );
            Device::Cpu
        }
        other => other,
    };

    let offsets = (0..params.batch)
        .map(|b| params.observation_offset(b))
        .collect();

    let backptr = match device {
        Device::Cpu => alloc_zeroed(
            params.batch * params.max_frames * params.states,
            "allocating back-pointer table",
        )?,
        Device::Gpu(_) => Vec::new(),
    };
    let indices = alloc_zeroed(
        params.batch * params.max_frames,
        "allocating output indices",
    )?;

    Ok(DecodePlan {
        device,
        offsets,
        backptr,
        indices,
    })
}

fn alloc_zeroed(len: usize, context: &'static str) -> Result<Vec<u32>, DecodeError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| DecodeError::out_of_resources(context))?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::normalize::normalize;
    use crate::types::Observation;

    fn params(scores: &[f32], batch: usize, frames: usize, states: usize) -> NormalizedParams<'_> {
        let obs = Observation::new(scores, batch, frames, states).unwrap();
        normalize(&obs, None, None, None, true).unwrap()
    }

    #[test]
    fn cpu_plan_allocates_zeroed_scratch() {
        let scores = vec![-1.0f32; 24];
        let plan = plan(&params(&scores, 2, 3, 4), Device::Cpu).unwrap();
        assert_eq!(plan.device, Device::Cpu);
        assert_eq!(plan.offsets, vec![0, 12]);
        assert_eq!(plan.backptr.len(), 24);
        assert!(plan.backptr.iter().all(|&x| x == 0));
        assert_eq!(plan.indices.len(), 6);
        assert!(plan.indices.iter().all(|&x| x == 0));
    }

    #[test]
    fn gpu_plan_skips_host_backptr() {
        let scores = vec![-1.0f32; 24];
        let plan = plan(&params(&scores, 2, 3, 4), Device::Gpu(0)).unwrap();
        assert_eq!(plan.device, Device::Gpu(0));
        assert!(plan.backptr.is_empty());
        assert_eq!(plan.indices.len(), 6);
    }

    #[test]
    fn oversized_state_count_falls_back_to_cpu() {
        let states = MAX_GPU_STATES + 1;
        let scores = vec![-1.0f32; states];
        let plan = plan(&params(&scores, 1, 1, states), Device::Gpu(0)).unwrap();
        assert_eq!(plan.device, Device::Cpu);
        assert_eq!(plan.backptr.len(), states);
    }
}
