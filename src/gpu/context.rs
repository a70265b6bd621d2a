//! wgpu device ownership, pipeline cache and blocking dispatch.

use super::shaders;
use crate::error::GpuError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use wgpu::util::DeviceExt;

/// Compute kernels this backend can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Matmul,
    Softmax,
    Relu,
    Add,
    Scale,
}

impl Kernel {
    fn source(self) -> &'static str {
        match self {
            Kernel::Matmul => shaders::MATMUL_SRC,
            Kernel::Softmax => shaders::SOFTMAX_SRC,
            Kernel::Relu => shaders::RELU_SRC,
            Kernel::Add => shaders::ADD_SRC,
            Kernel::Scale => shaders::SCALE_SRC,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Kernel::Matmul => "microgpt_matmul",
            Kernel::Softmax => "microgpt_softmax",
            Kernel::Relu => "microgpt_relu",
            Kernel::Add => "microgpt_add",
            Kernel::Scale => "microgpt_scale",
        }
    }
}

/// Uniform block shared by the matmul kernel: `[m, k, n, pad]`
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MatmulDims {
    pub m: u32,
    pub k: u32,
    pub n: u32,
    pub _pad: u32,
}

/// Uniform block shared by the vector kernels: `[n, scalar, pad, pad]`
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VectorParams {
    pub n: u32,
    pub scalar: f32,
    pub _pad: [u32; 2],
}

/// Device, queue and compiled pipelines for one backend instance.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    lost: Arc<AtomicBool>,
    pipelines: Mutex<HashMap<Kernel, Arc<wgpu::ComputePipeline>>>,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter_name", &self.adapter_name)
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Request an adapter and device, giving up after `timeout`.
    ///
    /// The request runs on a helper thread; if it has not answered in time it
    /// is abandoned and [`GpuError::InitTimeout`] is returned.
    pub fn init(timeout: Duration) -> Result<Self, GpuError> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("microgpt-gpu-init".into())
            .spawn(move || {
                let _ = tx.send(pollster::block_on(Self::request()));
            })
            .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(GpuError::InitTimeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(GpuError::DeviceRequest("initialization thread exited".into()))
            }
        }
    }

    async fn request() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        info!(
            backend = ?adapter_info.backend,
            device = %adapter_info.name,
            "selected GPU adapter"
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("microgpt"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "GPU device lost");
            lost_flag.store(true, Ordering::SeqCst);
        });
        device.on_uncaptured_error(Box::new(|err| {
            warn!(error = %err, "uncaptured GPU error");
        }));

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            lost,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn pipeline(&self, kernel: Kernel) -> Result<Arc<wgpu::ComputePipeline>, GpuError> {
        let mut cache = self
            .pipelines
            .lock()
            .map_err(|_| GpuError::Validation("pipeline cache poisoned".into()))?;
        if let Some(p) = cache.get(&kernel) {
            return Ok(Arc::clone(p));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel.label()),
                source: wgpu::ShaderSource::Wgsl(kernel.source().into()),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.label()),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Validation(err.to_string()));
        }

        let pipeline = Arc::new(pipeline);
        cache.insert(kernel, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Upload inputs, dispatch `kernel`, and block until the output is read back.
    ///
    /// Binding layout: 0 = `uniform`, `1..=inputs.len()` = inputs, last = output.
    pub fn run(
        &self,
        kernel: Kernel,
        uniform: &[u8],
        inputs: &[&[f32]],
        out_len: usize,
        workgroups: [u32; 3],
    ) -> Result<Vec<f32>, GpuError> {
        if self.is_lost() {
            return Err(GpuError::DeviceLost);
        }
        let max_groups = self.device.limits().max_compute_workgroups_per_dimension;
        if workgroups.iter().any(|&g| g > max_groups) {
            return Err(GpuError::Validation(format!(
                "dispatch {:?} exceeds {} workgroups per dimension",
                workgroups, max_groups
            )));
        }

        let pipeline = self.pipeline(kernel)?;
        let out_size = (out_len * std::mem::size_of::<f32>()) as u64;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let uniform_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("microgpt_uniform"),
                contents: uniform,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let input_bufs: Vec<wgpu::Buffer> = inputs
            .iter()
            .map(|data| {
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("microgpt_input"),
                        contents: bytemuck::cast_slice(data),
                        usage: wgpu::BufferUsages::STORAGE,
                    })
            })
            .collect();
        let output_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("microgpt_output"),
            size: out_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("microgpt_staging"),
            size: out_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut entries = Vec::with_capacity(inputs.len() + 2);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buf.as_entire_binding(),
        });
        for (i, buf) in input_bufs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: (i + 1) as u32,
                resource: buf.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: (inputs.len() + 1) as u32,
            resource: output_buf.as_entire_binding(),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.label()),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("microgpt_dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.label()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        encoder.copy_buffer_to_buffer(&output_buf, 0, &staging, 0, out_size);
        self.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Validation(err.to_string()));
        }

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| GpuError::BufferMap(e.to_string()))?
            .map_err(|e| GpuError::BufferMap(e.to_string()))?;

        if self.is_lost() {
            return Err(GpuError::DeviceLost);
        }

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();

        Ok(result)
    }
}

pub fn div_ceil(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_blocks_are_16_bytes() {
        assert_eq!(std::mem::size_of::<MatmulDims>(), 16);
        assert_eq!(std::mem::size_of::<VectorParams>(), 16);
    }

    #[test]
    fn test_workgroup_rounding() {
        assert_eq!(div_ceil(1024, 256), 4);
        assert_eq!(div_ceil(1025, 256), 5);
        assert_eq!(div_ceil(1, 16), 1);
    }
}
