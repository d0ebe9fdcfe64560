//! wgpu compute backend (Vulkan / Metal / DX12 / GL, whichever the host has).

use bytemuck::{Pod, Zeroable};
use tracing::{debug, error};
use wgpu::util::DeviceExt;

use super::{ComputeBackend, DeviceErrors, GpuError, KernelParams, StressKernel, WORKGROUP_SIZE};

const SHADER: &str = include_str!("shaders/stress.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KernelUniform {
    iterations: u32,
    len: u32,
    row_stride: u32,
    _pad: u32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    adapter_name: String,
    errors: DeviceErrors,
}

impl WgpuBackend {
    /// Open the highest-performance hardware adapter. Software rasterizers
    /// are rejected; they are not an accelerator.
    pub fn request() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|e| GpuError::NoAdapter(e.to_string()))?;

        let info = adapter.get_info();
        if info.device_type == wgpu::DeviceType::Cpu {
            return Err(GpuError::NoAdapter(format!(
                "only a software adapter was found ({})",
                info.name
            )));
        }

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("burncheck stress device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            ..Default::default()
        }))
        .map_err(|e| GpuError::Device(e.to_string()))?;

        // wgpu panics on uncaptured errors unless a handler is installed.
        let errors = DeviceErrors::default();
        let handler = errors.clone();
        device.on_uncaptured_error(Box::new(move |e| {
            error!("GPU device error: {}", e);
            handler.record(e.to_string());
        }));

        Ok(Self {
            device,
            queue,
            limits,
            adapter_name: format!("{} ({:?})", info.name, info.backend),
            errors,
        })
    }

    /// Split the workgroup count over x and y when it exceeds one dimension.
    fn dispatch_shape(&self, params: &KernelParams) -> Result<(u32, u32), GpuError> {
        let total = params.workgroups().max(1);
        let max_dim = self.limits.max_compute_workgroups_per_dimension;
        let x = total.min(max_dim);
        let y = total.div_ceil(x);
        if y > max_dim {
            return Err(GpuError::DispatchTooLarge {
                workgroups: total,
                limit: max_dim,
            });
        }
        Ok((x, y))
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> String {
        self.adapter_name.clone()
    }

    fn prepare(&self, params: KernelParams) -> Result<Box<dyn StressKernel>, GpuError> {
        let bytes = params.buffer_bytes();
        let limit =
            (self.limits.max_storage_buffer_binding_size as u64).min(self.limits.max_buffer_size);
        if bytes > limit {
            return Err(GpuError::BufferTooLarge {
                requested: bytes,
                limit,
            });
        }
        let (x, y) = self.dispatch_shape(&params)?;

        let initial = vec![1.0f32; params.elements];
        let data = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("stress data"),
                contents: bytemuck::cast_slice(&initial),
                usage: wgpu::BufferUsages::STORAGE,
            });
        drop(initial);

        let uniform = KernelUniform {
            iterations: params.inner_iterations,
            len: params.elements as u32,
            row_stride: x * WORKGROUP_SIZE,
            _pad: 0,
        };
        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("stress params"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("stress kernel"),
                source: wgpu::ShaderSource::Wgsl(SHADER.into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("stress pipeline"),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("stress bindings"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: data.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform.as_entire_binding(),
                },
            ],
        });

        // Pipeline and binding validation failures land in the handler.
        self.errors.check()?;

        debug!(bytes, workgroups_x = x, workgroups_y = y, "device buffer allocated");

        Ok(Box::new(WgpuKernel {
            errors: self.errors.clone(),
            device: self.device.clone(),
            queue: self.queue.clone(),
            pipeline,
            bind_group,
            data,
            uniform,
            groups: (x, y),
        }))
    }
}

struct WgpuKernel {
    errors: DeviceErrors,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    data: wgpu::Buffer,
    uniform: wgpu::Buffer,
    groups: (u32, u32),
}

impl StressKernel for WgpuKernel {
    fn dispatch_and_wait(&mut self) -> Result<(), GpuError> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("stress dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("stress pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.groups.0, self.groups.1, 1);
        }
        let submission = self.queue.submit(Some(encoder.finish()));

        self.device
            .poll(wgpu::PollType::WaitForSubmissionIndex(submission))
            .map_err(|e| GpuError::Sync(e.to_string()))?;
        self.errors.check()
    }
}

impl Drop for WgpuKernel {
    fn drop(&mut self) {
        self.data.destroy();
        self.uniform.destroy();
        debug!("device buffer released");
    }
}
