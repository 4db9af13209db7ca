//! Portable GPU Viterbi via wgpu compute shaders.
//!
//! Enabled with the `gpu` feature flag; used when the crate is built
//! without CUDA support. Runs on Vulkan, DX12, or Metal.
//!
//! The shader runs the entire forward pass for a batch in a single
//! dispatch — one workgroup per item with barrier synchronization between
//! frames, no per-frame launch overhead. Only the index array is read back.

use std::sync::OnceLock;

use crate::decode::normalize::NormalizedParams;
use crate::decode::plan::DecodePlan;

/// Shared GPU context, initialized once on first use.
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

static GPU_CTX: OnceLock<Option<GpuContext>> = OnceLock::new();

fn get_gpu_context() -> Option<&'static GpuContext> {
    GPU_CTX
        .get_or_init(|| {
            pollster::block_on(async {
                let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                    backends: wgpu::Backends::VULKAN
                        | wgpu::Backends::DX12
                        | wgpu::Backends::METAL,
                    ..Default::default()
                });

                let adapter = instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::HighPerformance,
                        compatible_surface: None,
                        force_fallback_adapter: false,
                    })
                    .await?;

                let (device, queue) = adapter
                    .request_device(
                        &wgpu::DeviceDescriptor {
                            label: Some("viterbi-gpu"),
                            required_features: wgpu::Features::empty(),
                            required_limits: wgpu::Limits::default(),
                            ..Default::default()
                        },
                        None,
                    )
                    .await
                    .ok()?;

                let shader_src = include_str!("viterbi.wgsl");
                let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("viterbi-shader"),
                    source: wgpu::ShaderSource::Wgsl(shader_src.into()),
                });

                let bind_group_layout =
                    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("viterbi-bgl"),
                        entries: &[
                            // 0: observation (read-only storage)
                            bgl_entry(0, true),
                            // 1: transition (read-only storage)
                            bgl_entry(1, true),
                            // 2: initial (read-only storage)
                            bgl_entry(2, true),
                            // 3: frame_counts (read-only storage)
                            bgl_entry(3, true),
                            // 4: params (uniform)
                            wgpu::BindGroupLayoutEntry {
                                binding: 4,
                                visibility: wgpu::ShaderStages::COMPUTE,
                                ty: wgpu::BindingType::Buffer {
                                    ty: wgpu::BufferBindingType::Uniform,
                                    has_dynamic_offset: false,
                                    min_binding_size: None,
                                },
                                count: None,
                            },
                            // 5: backptr (read-write storage)
                            bgl_entry(5, false),
                            // 6: delta scratch (read-write storage)
                            bgl_entry(6, false),
                            // 7: indices (read-write storage)
                            bgl_entry(7, false),
                        ],
                    });

                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("viterbi-pl"),
                        bind_group_layouts: &[&bind_group_layout],
                        push_constant_ranges: &[],
                    });

                let pipeline =
                    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some("viterbi-pipeline"),
                        layout: Some(&pipeline_layout),
                        module: &shader,
                        entry_point: Some("viterbi_main"),
                        compilation_options: Default::default(),
                        cache: None,
                    });

                Some(GpuContext {
                    device,
                    queue,
                    pipeline,
                    bind_group_layout,
                })
            })
        })
        .as_ref()
}

fn bgl_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Params struct matching the WGSL layout (16 bytes, uniform-aligned).
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParams {
    batch: u32,
    max_frames: u32,
    states: u32,
    _pad: u32,
}

/// Run the batched Viterbi decode on the wgpu adapter, writing the decoded
/// indices into `plan.indices`.
///
/// Returns `None` if no GPU is available — caller decides whether that is
/// an error or a fallback.
pub(crate) fn decode_batch_wgpu(
    params: &NormalizedParams<'_>,
    plan: &mut DecodePlan,
) -> Option<()> {
    let ctx = get_gpu_context()?;

    let batch = params.batch;
    let max_frames = params.max_frames;
    let states = params.states;

    let frame_counts: Vec<u32> = params.frame_counts.iter().map(|&n| n as u32).collect();
    let gpu_params = GpuParams {
        batch: batch as u32,
        max_frames: max_frames as u32,
        states: states as u32,
        _pad: 0,
    };

    let device = &ctx.device;
    let queue = &ctx.queue;

    let buf_observation = create_buffer_init(
        device,
        "observation",
        bytemuck::cast_slice(&params.observation[..]),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_transition = create_buffer_init(
        device,
        "transition",
        bytemuck::cast_slice(&params.transition),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_initial = create_buffer_init(
        device,
        "initial",
        bytemuck::cast_slice(&params.initial),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_frame_counts = create_buffer_init(
        device,
        "frame-counts",
        bytemuck::cast_slice(&frame_counts),
        wgpu::BufferUsages::STORAGE,
    );
    let buf_params = create_buffer_init(
        device,
        "params",
        bytemuck::bytes_of(&gpu_params),
        wgpu::BufferUsages::UNIFORM,
    );

    let backptr_size = (batch * max_frames * states * 4) as u64;
    let buf_backptr = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("backptr"),
        size: backptr_size,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });

    let delta_size = (batch * 2 * states * 4) as u64;
    let buf_delta = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("delta"),
        size: delta_size,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });

    let indices_size = (batch * max_frames * 4) as u64;
    let buf_indices = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("indices"),
        size: indices_size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let staging_indices = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging-indices"),
        size: indices_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("viterbi-bg"),
        layout: &ctx.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: buf_observation.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: buf_transition.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: buf_initial.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: buf_frame_counts.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: buf_params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 5,
                resource: buf_backptr.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: buf_delta.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 7,
                resource: buf_indices.as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("viterbi-enc"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("viterbi-pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&ctx.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(batch as u32, 1, 1); // one workgroup per item
    }
    encoder.copy_buffer_to_buffer(&buf_indices, 0, &staging_indices, 0, indices_size);
    queue.submit(std::iter::once(encoder.finish()));

    let indices_data = read_buffer(device, &staging_indices, indices_size);
    plan.indices
        .copy_from_slice(bytemuck::cast_slice(&indices_data));

    Some(())
}

/// Create a buffer initialized with data.
fn create_buffer_init(
    device: &wgpu::Device,
    label: &str,
    data: &[u8],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: data,
        usage,
    })
}

/// Blocking readback from a mappable buffer.
fn read_buffer(device: &wgpu::Device, buffer: &wgpu::Buffer, size: u64) -> Vec<u8> {
    let slice = buffer.slice(..size);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).unwrap();
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .expect("GPU readback channel closed")
        .expect("GPU readback failed");
    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    data
}
