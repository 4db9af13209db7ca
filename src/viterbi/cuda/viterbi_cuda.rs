//! Batched CUDA Viterbi kernel via cudarc.
//!
//! The kernel source is compiled once per device with NVRTC and cached.
//! One cooperative block per batch item; only the `(batch, max_frames)`
//! index array is copied back to the host — the back-pointer table lives
//! and dies on the device.
//!
//! Feature-gated: `cuda`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use cudarc::driver::{CudaDevice, CudaSlice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;

use crate::decode::normalize::NormalizedParams;
use crate::decode::plan::DecodePlan;
use crate::error::DecodeError;

const KERNEL_SRC: &str = include_str!("viterbi.cu");
const MAX_BLOCK_SIZE: u32 = 256;

static DEVICES: OnceLock<Mutex<HashMap<usize, Arc<CudaDevice>>>> = OnceLock::new();

fn device(index: usize) -> Result<Arc<CudaDevice>, DecodeError> {
    let cache = DEVICES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache
        .lock()
        .map_err(|_| DecodeError::internal("cuda device cache poisoned"))?;
    if let Some(dev) = cache.get(&index) {
        return Ok(dev.clone());
    }

    let dev = CudaDevice::new(index)
        .map_err(|e| DecodeError::device("initializing cuda device", e))?;
    let ptx =
        compile_ptx(KERNEL_SRC).map_err(|e| DecodeError::device("compiling viterbi kernel", e))?;
    dev.load_ptx(ptx, "viterbi", &["viterbi_forward"])
        .map_err(|e| DecodeError::device("loading viterbi module", e))?;
    cache.insert(index, dev.clone());
    Ok(dev)
}

/// Number of cooperating lanes per block: the largest power of two that is
/// no bigger than the state count, capped at `MAX_BLOCK_SIZE`.
fn block_size(states: usize) -> u32 {
    let floor_pow2 = 1usize << (usize::BITS - 1 - states.leading_zeros());
    (floor_pow2 as u32).min(MAX_BLOCK_SIZE)
}

pub(crate) fn decode_batch_cuda(
    params: &NormalizedParams<'_>,
    plan: &mut DecodePlan,
    index: usize,
) -> Result<(), DecodeError> {
    let dev = device(index)?;
    let func = dev.get_func("viterbi", "viterbi_forward").ok_or_else(|| {
        DecodeError::device("looking up viterbi kernel", "viterbi_forward missing from module")
    })?;

    let batch = params.batch;
    let max_frames = params.max_frames;
    let states = params.states;

    let observation: CudaSlice<f32> = dev
        .htod_sync_copy(&params.observation[..])
        .map_err(|e| DecodeError::device("uploading observation", e))?;
    let transition: CudaSlice<f32> = dev
        .htod_sync_copy(&params.transition[..])
        .map_err(|e| DecodeError::device("uploading transition", e))?;
    let initial: CudaSlice<f32> = dev
        .htod_sync_copy(&params.initial[..])
        .map_err(|e| DecodeError::device("uploading initial", e))?;
    let frame_counts: Vec<i32> = params.frame_counts.iter().map(|&n| n as i32).collect();
    let frame_counts: CudaSlice<i32> = dev
        .htod_copy(frame_counts)
        .map_err(|e| DecodeError::device("uploading frame counts", e))?;

    let mut backptr: CudaSlice<i32> = dev
        .alloc_zeros(batch * max_frames * states)
        .map_err(|_| DecodeError::out_of_resources("allocating device back-pointer table"))?;
    let mut indices: CudaSlice<i32> = dev
        .alloc_zeros(batch * max_frames)
        .map_err(|_| DecodeError::out_of_resources("allocating device output indices"))?;

    let shared_mem = (2 * states * std::mem::size_of::<f32>()) as u32;
    let cfg = LaunchConfig {
        grid_dim: (batch as u32, 1, 1),
        block_dim: (block_size(states), 1, 1),
        shared_mem_bytes: shared_mem,
    };

    unsafe {
        func.launch(
            cfg,
            (
                &observation,
                &transition,
                &initial,
                &frame_counts,
                &mut backptr,
                &mut indices,
                max_frames as i32,
                states as i32,
            ),
        )
    }
    .map_err(|e| DecodeError::device("launching viterbi kernel", e))?;

    let host_indices: Vec<i32> = dev
        .dtoh_sync_copy(&indices)
        .map_err(|e| DecodeError::device("copying indices to host", e))?;
    for (dst, &src) in plan.indices.iter_mut().zip(host_indices.iter()) {
        *dst = src as u32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::normalize::normalize;
    use crate::decode::plan::plan;
    use crate::types::{Device, Observation};
    use crate::viterbi::decode_batch_cpu;

    #[test]
    fn block_size_is_a_power_of_two_no_larger_than_states() {
        assert_eq!(block_size(1), 1);
        assert_eq!(block_size(2), 2);
        assert_eq!(block_size(3), 2);
        assert_eq!(block_size(255), 128);
        assert_eq!(block_size(256), 256);
        assert_eq!(block_size(1440), 256);
    }

    #[test]
    fn cuda_matches_cpu() {
        let scores = vec![
            0.2f32, 0.5, 0.3, //
            0.6, 0.2, 0.2, //
            0.1, 0.1, 0.8, //
            0.3, 0.4, 0.3, //
            0.2, 0.2, 0.6, //
            0.9, 0.05, 0.05,
        ];
        let obs = Observation::new(&scores, 2, 3, 3).unwrap();
        let params = normalize(&obs, Some(&[3, 2]), None, None, false).unwrap();

        let mut cpu_plan = plan(&params, Device::Cpu).unwrap();
        decode_batch_cpu(&params, &mut cpu_plan);

        let mut gpu_plan = plan(&params, Device::Gpu(0)).unwrap();
        match decode_batch_cuda(&params, &mut gpu_plan, 0) {
            Ok(()) => assert_eq!(cpu_plan.indices, gpu_plan.indices, "CUDA must match CPU"),
            Err(err) => eprintln!("CUDA unavailable, skipping: {err}"),
        }
    }
}
