pub mod grid;
pub mod height_textures;
pub mod pipeline;

use std::fmt;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use perlinscape_core::frame::ChunkDraw;
use perlinscape_shared::config::RenderSettings;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::camera::Camera;
use crate::renderer::grid::TerrainGrid;
use crate::renderer::height_textures::HeightTextures;
use crate::renderer::pipeline::TerrainPipeline;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const SUN_DIRECTION: Vec3 = Vec3::new(0.4, 0.8, 0.3);
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.62,
    g: 0.75,
    b: 0.88,
    a: 1.0,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    sun_dir: [f32; 4],
    height_scale: f32,
    fog_start: f32,
    fog_end: f32,
    _padding: f32,
}

impl CameraUniform {
    fn from_camera(camera: &Camera, height_scale: f32) -> Self {
        let sun = SUN_DIRECTION.normalize();
        Self {
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            camera_pos: [camera.position.x, camera.position.y, camera.position.z, 0.0],
            sun_dir: [sun.x, sun.y, sun.z, 0.0],
            height_scale,
            fog_start: camera.far * 0.55,
            fog_end: camera.far * 0.95,
            _padding: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderFrameStats {
    pub draw_calls: u32,
    pub missing_textures: u32,
}

#[derive(Debug)]
struct DepthTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl DepthTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Perlinscape Depth Texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

pub struct Renderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    depth_texture: DepthTexture,
    pipeline: TerrainPipeline,
    camera_uniform_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    grid: TerrainGrid,
    height_textures: HeightTextures,
    last_frame_stats: RenderFrameStats,
}

#[derive(Debug)]
pub enum RendererInitError {
    CreateSurface(wgpu::CreateSurfaceError),
    RequestAdapter(wgpu::RequestAdapterError),
    RequestDevice(wgpu::RequestDeviceError),
    UnsupportedSurface,
}

impl fmt::Display for RendererInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateSurface(err) => write!(f, "failed to create surface: {err}"),
            Self::RequestAdapter(err) => write!(f, "failed to request adapter: {err}"),
            Self::RequestDevice(err) => write!(f, "failed to request device: {err}"),
            Self::UnsupportedSurface => write!(f, "adapter does not support this surface"),
        }
    }
}

impl std::error::Error for RendererInitError {}

impl Renderer {
    pub fn new(window: Arc<Window>, settings: &RenderSettings) -> Result<Self, RendererInitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(RendererInitError::CreateSurface)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(RendererInitError::RequestAdapter)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Perlinscape Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(RendererInitError::RequestDevice)?;

        let initial_size = window.inner_size();
        let surface_config = surface
            .get_default_config(&adapter, initial_size.width.max(1), initial_size.height.max(1))
            .ok_or(RendererInitError::UnsupportedSurface)?;

        surface.configure(&device, &surface_config);

        let pipeline = TerrainPipeline::new(&device, surface_config.format, DEPTH_FORMAT);
        let camera_uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Terrain Camera Uniform Buffer"),
            contents: bytemuck::bytes_of(&CameraUniform::from_camera(
                &Camera::default(),
                settings.height_scale,
            )),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Terrain Camera Bind Group"),
            layout: &pipeline.camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_uniform_buffer.as_entire_binding(),
            }],
        });
        let depth_texture = DepthTexture::new(&device, surface_config.width, surface_config.height);
        let grid = TerrainGrid::new(&device, settings.patch_count);
        let height_textures = HeightTextures::new(
            device.clone(),
            queue.clone(),
            pipeline.chunk_bind_group_layout.clone(),
        );

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            depth_texture,
            pipeline,
            camera_uniform_buffer,
            camera_bind_group,
            grid,
            height_textures,
            last_frame_stats: RenderFrameStats::default(),
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }

        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_texture = DepthTexture::new(&self.device, width, height);
    }

    /// Texture backend the frame loop promotes chunks into.
    pub fn height_textures_mut(&mut self) -> &mut HeightTextures {
        &mut self.height_textures
    }

    pub fn last_frame_stats(&self) -> RenderFrameStats {
        self.last_frame_stats
    }

    /// Uploads the view, fog and vertical scale used by the terrain shader.
    pub fn update_camera_uniform(&self, camera: &Camera, height_scale: f32) {
        let uniform = CameraUniform::from_camera(camera, height_scale);
        self.queue
            .write_buffer(&self.camera_uniform_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    pub fn render_frame(&mut self, draws: &[ChunkDraw]) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut frame_stats = RenderFrameStats::default();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Perlinscape Command Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Terrain Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(self.pipeline.pipeline());
            render_pass.set_bind_group(0, &self.camera_bind_group, &[]);
            self.grid.bind(&mut render_pass);
            for draw in draws {
                let Some(bind_group) = self.height_textures.bind_group(draw.handle) else {
                    frame_stats.missing_textures += 1;
                    continue;
                };
                render_pass.set_bind_group(1, bind_group, &[]);
                render_pass.draw_indexed(0..self.grid.index_count(), 0, 0..1);
                frame_stats.draw_calls += 1;
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        self.last_frame_stats = frame_stats;
        Ok(())
    }
}
