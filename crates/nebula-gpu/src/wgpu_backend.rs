//! wgpu device/queue context running WGSL compute programs.

use tracing::info;
use wgpu::util::DeviceExt;
use wgpu::{Device, Instance, Queue};

use crate::backend::ComputeBackend;
use crate::config::GpuConfig;
use crate::error::{GpuError, Result};

/// Round a byte count up to a whole number of 4-byte words, minimum one word.
fn padded_size(bytes: usize) -> u64 {
    (bytes.div_ceil(4).max(1) * 4) as u64
}

/// A compiled compute pipeline.
pub struct WgpuProgram {
    pipeline: wgpu::ComputePipeline,
}

/// GPU context holding device and queue, plus the shared input/output layout.
pub struct WgpuBackend {
    /// The wgpu device for creating resources and pipelines.
    pub device: Device,
    /// The command queue for submitting work.
    pub queue: Queue,
    info: wgpu::AdapterInfo,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
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

impl WgpuBackend {
    /// Create the GPU context asynchronously.
    pub async fn new(config: &GpuConfig) -> Result<Self> {
        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends.into(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("nebula compute device"),
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .await?;

        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "GPU context created");

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compute Bind Group Layout"),
            entries: &[storage_entry(0, true), storage_entry(1, false)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            device,
            queue,
            info,
            bind_group_layout,
            pipeline_layout,
        })
    }

    /// Create the GPU context synchronously.
    pub fn new_blocking(config: &GpuConfig) -> Result<Self> {
        pollster::block_on(Self::new(config))
    }

    /// The adapter the device was created on.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    fn pop_validation_error(&self) -> Option<String> {
        pollster::block_on(self.device.pop_error_scope()).map(|err| err.to_string())
    }
}

impl ComputeBackend for WgpuBackend {
    type Program = WgpuProgram;

    fn compile(&mut self, source: &str) -> Result<WgpuProgram> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Compute Shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Compute Pipeline"),
                layout: Some(&self.pipeline_layout),
                module: &module,
                entry_point: None,
                compilation_options: Default::default(),
                cache: None,
            });

        match self.pop_validation_error() {
            Some(message) => Err(GpuError::Compile(message)),
            None => Ok(WgpuProgram { pipeline }),
        }
    }

    fn dispatch(
        &mut self,
        program: &WgpuProgram,
        input: &[u8],
        output_size: usize,
        groups: [u32; 3],
    ) -> Result<Vec<u8>> {
        let input_size = padded_size(input.len());
        let output_bytes = padded_size(output_size);

        let mut contents = input.to_vec();
        contents.resize(input_size as usize, 0);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let input_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Input Buffer"),
                contents: &contents,
                usage: wgpu::BufferUsages::STORAGE,
            });

        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: output_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compute Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Compute Encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compute Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }

        // Copy results to staging buffer; the pass boundary orders the
        // shader writes before the copy.
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: output_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_bytes);

        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(message) = self.pop_validation_error() {
            return Err(GpuError::Dispatch(message));
        }

        // Read back results
        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GpuError::BufferMapping)?
            .map_err(|_| GpuError::BufferMapping)?;

        let data = buffer_slice.get_mapped_range();
        let output = data[..output_size].to_vec();
        drop(data);
        staging_buffer.unmap();

        Ok(output)
    }
}
