use bytemuck::{Pod, Zeroable};
use perlinscape_core::promoter::{PromoteError, TextureBackend};
use perlinscape_shared::chunk::GpuHandle;
use perlinscape_shared::coords::{ChunkDims, GridCoord, BORDER};
use perlinscape_shared::heightfield::HeightField;
use rustc_hash::FxHashMap;
use tracing::debug;
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ChunkUniform {
    origin: [f32; 2],
    size: [f32; 2],
    border: f32,
    _padding: [f32; 3],
}

struct HeightTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    _uniform_buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

/// GPU side of chunk promotion: one R32Float texture plus bind group per handle.
pub struct HeightTextures {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    next_handle: u32,
    textures: FxHashMap<GpuHandle, HeightTexture>,
}

impl HeightTextures {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, layout: wgpu::BindGroupLayout) -> Self {
        Self {
            device,
            queue,
            layout,
            next_handle: 0,
            textures: FxHashMap::default(),
        }
    }

    pub fn bind_group(&self, handle: GpuHandle) -> Option<&wgpu::BindGroup> {
        self.textures.get(&handle).map(|texture| &texture.bind_group)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    fn upload(&self, texture: &wgpu::Texture, heights: &HeightField) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            heights.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(heights.width() * 4),
                rows_per_image: Some(heights.height()),
            },
            wgpu::Extent3d {
                width: heights.width(),
                height: heights.height(),
                depth_or_array_layers: 1,
            },
        );
    }
}

impl TextureBackend for HeightTextures {
    fn create_height_texture(
        &mut self,
        coord: GridCoord,
        heights: &HeightField,
    ) -> Result<GpuHandle, PromoteError> {
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        if heights.width() > max_dimension || heights.height() > max_dimension {
            return Err(PromoteError::Backend(format!(
                "{}x{} height texture exceeds device limit {max_dimension}",
                heights.width(),
                heights.height()
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Chunk Height Texture"),
            size: wgpu::Extent3d {
                width: heights.width(),
                height: heights.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            texture.destroy();
            return Err(PromoteError::Backend(err.to_string()));
        }
        self.upload(&texture, heights);

        let dims = ChunkDims::new(heights.width() - 2 * BORDER, heights.height() - 2 * BORDER);
        let origin = dims.grid_origin(coord);
        let uniform = ChunkUniform {
            origin: [origin.x, origin.z],
            size: [dims.width as f32, dims.height as f32],
            border: BORDER as f32,
            _padding: [0.0; 3],
        };
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Chunk Uniform Buffer"),
                contents: bytemuck::bytes_of(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Chunk Height Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        let handle = GpuHandle::from_raw(self.next_handle)
            .ok_or_else(|| PromoteError::Backend("handle space exhausted".to_string()))?;
        self.textures.insert(
            handle,
            HeightTexture {
                width: heights.width(),
                height: heights.height(),
                texture,
                bind_group,
                _uniform_buffer: uniform_buffer,
            },
        );
        debug!("Uploaded height texture {handle} for chunk {coord}");
        Ok(handle)
    }

    fn update_height_texture(
        &mut self,
        handle: GpuHandle,
        heights: &HeightField,
    ) -> Result<(), PromoteError> {
        let entry = self
            .textures
            .get(&handle)
            .ok_or(PromoteError::UnknownHandle(handle))?;
        if entry.width != heights.width() || entry.height != heights.height() {
            return Err(PromoteError::Backend(format!(
                "texture {handle} is {}x{}, new heights are {}x{}",
                entry.width,
                entry.height,
                heights.width(),
                heights.height()
            )));
        }
        self.upload(&entry.texture, heights);
        Ok(())
    }

    fn release(&mut self, handle: GpuHandle) {
        if let Some(entry) = self.textures.remove(&handle) {
            entry.texture.destroy();
        }
    }
}
