//! WebGPU render pipeline, modeled as an explicit state machine.
//!
//! One shader program, one static full-viewport quad, one streaming luma
//! texture. The texture's pixel store is overwritten in place each draw and
//! reallocated only when frame dimensions change; the projection is
//! recomputed only when the surface or frame geometry changes.

use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use tracing::{info, trace};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::capture::PackedFrame;
use crate::error::RenderError;
use crate::render::RenderMode;

const SHADER_SOURCE: &str = include_str!("shader.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 3],
    tex_coord: [f32; 2],
}

// Full-screen quad in triangle-strip order. Texture V is flipped so frame
// row zero lands at the top of the viewport.
const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [-1.0, -1.0, 0.0],
        tex_coord: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0, 0.0],
        tex_coord: [1.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, 1.0, 0.0],
        tex_coord: [0.0, 0.0],
    },
    QuadVertex {
        position: [1.0, 1.0, 0.0],
        tex_coord: [1.0, 0.0],
    },
];

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct Uniforms {
    mvp: [[f32; 4]; 4],
    mode: u32,
    _pad: [u32; 3],
}

/// Orthographic projection over the [-1,1]x[-1,1] quad, combined with an
/// aspect-fit scale so the frame is letterboxed instead of stretched when
/// surface and frame aspect ratios differ.
fn mvp_matrix(surface: (u32, u32), frame: (u32, u32)) -> [[f32; 4]; 4] {
    let surface_aspect = surface.0.max(1) as f32 / surface.1.max(1) as f32;
    let frame_aspect = frame.0.max(1) as f32 / frame.1.max(1) as f32;

    let (sx, sy) = if surface_aspect > frame_aspect {
        (frame_aspect / surface_aspect, 1.0)
    } else {
        (1.0, surface_aspect / frame_aspect)
    };

    [
        [sx, 0.0, 0.0, 0.0],
        [0.0, sy, 0.0, 0.0],
        [0.0, 0.0, -1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Lifecycle of the GPU pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Uninitialized,
    SurfaceReady,
    Rendering,
    Destroyed,
}

struct FrameTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: Option<wgpu::BindGroup>,
    texture: Option<FrameTexture>,
    uniforms: Uniforms,
}

pub struct RenderPipeline {
    phase: RenderPhase,
    vsync: bool,
    gpu: Option<GpuContext>,
}

impl RenderPipeline {
    pub fn new(vsync: bool) -> Self {
        Self {
            phase: RenderPhase::Uninitialized,
            vsync,
            gpu: None,
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    /// `Uninitialized -> SurfaceReady`: the windowing system has a drawable
    /// surface. Compiles and links the shader program under validation
    /// error scopes so failures surface as [`RenderError`] instead of being
    /// swallowed. Also the recovery path after a destroyed surface.
    pub async fn initialize(&mut self, window: Arc<Window>) -> Result<(), RenderError> {
        info!("Initializing WebGPU display");

        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("edgecam device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if self.vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &surface_config);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("frame shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });
        if let Some(e) = device.pop_error_scope().await {
            return Err(RenderError::ShaderCompile(e.to_string()));
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("frame pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("frame pipeline"),
            layout: Some(&pipeline_layout),
            cache: None,
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<QuadVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        if let Some(e) = device.pop_error_scope().await {
            return Err(RenderError::PipelineLink(e.to_string()));
        }

        // Static quad geometry, created once and reused for every draw.
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniforms = Uniforms {
            mvp: mvp_matrix(
                (surface_config.width, surface_config.height),
                (surface_config.width, surface_config.height),
            ),
            mode: RenderMode::Normal.as_uniform(),
            _pad: [0; 3],
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("frame uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        self.gpu = Some(GpuContext {
            device,
            queue,
            surface,
            surface_config,
            pipeline,
            vertex_buffer,
            uniform_buffer,
            sampler,
            bind_group_layout,
            bind_group: None,
            texture: None,
            uniforms,
        });
        self.phase = RenderPhase::SurfaceReady;
        Ok(())
    }

    /// Draw tick: upload the new frame if one arrived, then draw the quad.
    /// With no new frame the previous texture is redrawn. Surface loss is
    /// handled by reconfiguring; the next tick recovers.
    pub fn draw(
        &mut self,
        mode: RenderMode,
        new_frame: Option<PackedFrame>,
    ) -> Result<(), RenderError> {
        let ctx = self.gpu.as_mut().ok_or(RenderError::NotInitialized)?;
        let render_start = Instant::now();

        if let Some(frame) = new_frame {
            ctx.upload_frame(&frame);
        }

        let mode = mode.as_uniform();
        if ctx.uniforms.mode != mode {
            ctx.uniforms.mode = mode;
            ctx.queue
                .write_buffer(&ctx.uniform_buffer, 0, bytemuck::bytes_of(&ctx.uniforms));
        }

        let output = match ctx.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                ctx.surface.configure(&ctx.device, &ctx.surface_config);
                return Err(RenderError::SurfaceLost);
            }
            Err(e) => return Err(RenderError::Surface(e)),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            // Before the first frame arrives there is nothing to sample;
            // the pass still runs so the clear color is presented.
            if let Some(bind_group) = &ctx.bind_group {
                render_pass.set_pipeline(&ctx.pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.set_vertex_buffer(0, ctx.vertex_buffer.slice(..));
                render_pass.draw(0..QUAD_VERTICES.len() as u32, 0..1);
            }
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.phase = RenderPhase::Rendering;
        metrics::histogram!("render_time_us").record(render_start.elapsed().as_micros() as f64);
        Ok(())
    }

    /// Reconfigure the surface and recompute the projection. No-op unless
    /// the dimensions actually changed.
    pub fn resize(&mut self, width: u32, height: u32) {
        let Some(ctx) = self.gpu.as_mut() else {
            return;
        };
        if width == 0 || height == 0 {
            return;
        }
        if (ctx.surface_config.width, ctx.surface_config.height) == (width, height) {
            return;
        }

        trace!("surface resized to {}x{}", width, height);
        ctx.surface_config.width = width;
        ctx.surface_config.height = height;
        ctx.surface.configure(&ctx.device, &ctx.surface_config);
        ctx.refresh_projection();
    }

    /// `* -> Destroyed`: release texture, shader program and device state.
    /// Callable from any state, including after a failed initialization.
    pub fn destroy(&mut self) {
        self.gpu = None;
        self.phase = RenderPhase::Destroyed;
    }
}

impl GpuContext {
    /// Overwrite the streaming texture with the frame's luma plane,
    /// reallocating only when the frame geometry changed.
    fn upload_frame(&mut self, frame: &PackedFrame) {
        let needs_realloc = !matches!(
            &self.texture,
            Some(t) if t.width == frame.width && t.height == frame.height
        );
        if needs_realloc {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("frame texture"),
                size: wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("frame bind group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.uniform_buffer.as_entire_binding(),
                    },
                ],
            }));
            self.texture = Some(FrameTexture {
                texture,
                width: frame.width,
                height: frame.height,
            });
            self.refresh_projection();
        }

        let Some(frame_texture) = &self.texture else {
            return;
        };
        // Luminance-only upload: exactly width*height bytes from the packed
        // buffer's luma prefix.
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &frame_texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.luma(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.width),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn refresh_projection(&mut self) {
        let frame = self
            .texture
            .as_ref()
            .map(|t| (t.width, t.height))
            .unwrap_or((self.surface_config.width, self.surface_config.height));
        self.uniforms.mvp = mvp_matrix(
            (self.surface_config.width, self.surface_config.height),
            frame,
        );
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_buffer_layout_is_wgsl_compatible() {
        assert_eq!(std::mem::size_of::<Uniforms>(), 80);
        assert_eq!(std::mem::size_of::<QuadVertex>(), 20);
    }

    #[test]
    fn matching_aspects_give_identity_scale() {
        let mvp = mvp_matrix((800, 600), (400, 300));
        assert_eq!(mvp[0][0], 1.0);
        assert_eq!(mvp[1][1], 1.0);
    }

    #[test]
    fn wide_surface_letterboxes_horizontally() {
        // 2:1 surface showing a 1:1 frame: x shrinks, y fills.
        let mvp = mvp_matrix((800, 400), (480, 480));
        assert!(mvp[0][0] < 1.0);
        assert_eq!(mvp[1][1], 1.0);
    }

    #[test]
    fn resize_changes_projection() {
        let before = mvp_matrix((640, 480), (640, 480));
        let after = mvp_matrix((800, 400), (640, 480));
        assert_ne!(before, after);
    }

    #[test]
    fn new_pipeline_starts_uninitialized() {
        let pipeline = RenderPipeline::new(true);
        assert_eq!(pipeline.phase(), RenderPhase::Uninitialized);
    }

    #[test]
    fn draw_before_initialize_is_an_error() {
        let mut pipeline = RenderPipeline::new(true);
        assert!(matches!(
            pipeline.draw(RenderMode::Normal, None),
            Err(RenderError::NotInitialized)
        ));
    }

    #[test]
    fn destroy_is_safe_from_any_state() {
        let mut pipeline = RenderPipeline::new(true);
        pipeline.destroy();
        assert_eq!(pipeline.phase(), RenderPhase::Destroyed);
        // Idempotent, including after partial initialization.
        pipeline.destroy();
        assert_eq!(pipeline.phase(), RenderPhase::Destroyed);
        // Resizing a destroyed pipeline is a no-op, not a crash.
        pipeline.resize(800, 600);
    }
}
