use crate::controller::RenderState;
use crate::decode::VatUniforms;
use crate::instancing::{InstanceLayout, InstanceRaw};
use crate::material::AlbedoTexture;
use crate::mesh::{VatMesh, VatVertex};
use crate::texture::{FloatTextureFormat, TexturePayload, VatTexture};
use glam::{Mat4, Vec3};
use std::sync::Arc;
use wgpu::util::DeviceExt;

use super::DEPTH_FORMAT;

const MIN_INSTANCE_CAPACITY: usize = 64;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    light_dir: [f32; 4],
    light_color: [f32; 4],
    ambient_color: [f32; 4],
    base_color: [f32; 4],
    material_params: [f32; 4],
}

/// Single directional light plus ambient term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lighting {
    pub direction: Vec3,
    pub color: Vec3,
    pub ambient: Vec3,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.4, -1.0, -0.3).normalize(),
            color: Vec3::splat(0.9),
            ambient: Vec3::splat(0.18),
        }
    }
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

/// GPU copy of a CPU resource, keyed by the `Arc` it was uploaded from.
struct Uploaded<S, G> {
    source: Arc<S>,
    gpu: G,
}

impl<S, G> Uploaded<S, G> {
    fn matches(slot: &Option<Self>, source: Option<&Arc<S>>) -> bool {
        match (slot, source) {
            (Some(uploaded), Some(source)) => Arc::ptr_eq(&uploaded.source, source),
            (None, None) => true,
            _ => false,
        }
    }
}

pub(super) struct VatPass {
    pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    vat_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_bgl: wgpu::BindGroupLayout,
    texture_bind_group: Option<wgpu::BindGroup>,
    sampler: wgpu::Sampler,
    fallback: GpuTexture,
    float_format: FloatTextureFormat,
    mesh: Option<Uploaded<VatMesh, MeshBuffers>>,
    positions: Option<Uploaded<VatTexture, GpuTexture>>,
    normals: Option<Uploaded<VatTexture, GpuTexture>>,
    albedo: Option<Uploaded<AlbedoTexture, GpuTexture>>,
    instances: Option<Arc<InstanceLayout>>,
    instance_buffer: Option<wgpu::Buffer>,
    instance_capacity: usize,
    instance_count: u32,
}

impl VatPass {
    pub(super) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        float_format: FloatTextureFormat,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("VAT Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../assets/shaders/vat.wgsl").into()),
        });

        let uniform_entry = |binding: u32, visibility: wgpu::ShaderStages| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VAT Uniform BGL"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT),
                uniform_entry(1, wgpu::ShaderStages::VERTEX_FRAGMENT),
            ],
        });

        let texture_entry = |binding: u32, visibility: wgpu::ShaderStages, filterable: bool| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                },
                count: None,
            }
        };
        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VAT Texture BGL"),
            entries: &[
                texture_entry(0, wgpu::ShaderStages::VERTEX, false),
                texture_entry(1, wgpu::ShaderStages::VERTEX, false),
                texture_entry(2, wgpu::ShaderStages::FRAGMENT, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VAT Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let vat_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VAT Decode Uniforms"),
            size: std::mem::size_of::<VatUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VAT Uniform BG"),
            layout: &uniform_bgl,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: frame_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: vat_buffer.as_entire_binding() },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VAT Pipeline Layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("VAT Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[VatVertex::layout(), InstanceRaw::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Decoded poses may flip winding; draw both faces.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("VAT Albedo Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let fallback =
            upload_rgba8(device, queue, "VAT Fallback Texture", 1, 1, &[255, 255, 255, 255], false);

        Self {
            pipeline,
            frame_buffer,
            vat_buffer,
            uniform_bind_group,
            texture_bgl,
            texture_bind_group: None,
            sampler,
            fallback,
            float_format,
            mesh: None,
            positions: None,
            normals: None,
            albedo: None,
            instances: None,
            instance_buffer: None,
            instance_capacity: 0,
            instance_count: 0,
        }
    }

    /// Brings GPU resources in line with `state` and writes this frame's uniforms.
    pub(super) fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        state: &RenderState,
        time: f32,
        view_proj: Mat4,
        lighting: &Lighting,
    ) {
        self.sync_mesh(device, state.mesh.as_ref());
        let mut textures_changed = self.texture_bind_group.is_none();
        if !Uploaded::matches(&self.positions, state.positions.as_ref()) {
            self.positions = state.positions.as_ref().map(|source| Uploaded {
                gpu: upload_vat_texture(device, queue, source, self.float_format),
                source: Arc::clone(source),
            });
            textures_changed = true;
        }
        if !Uploaded::matches(&self.normals, state.normals.as_ref()) {
            self.normals = state.normals.as_ref().map(|source| Uploaded {
                gpu: upload_vat_texture(device, queue, source, self.float_format),
                source: Arc::clone(source),
            });
            textures_changed = true;
        }
        let albedo = state.material.albedo_texture();
        if !Uploaded::matches(&self.albedo, albedo) {
            self.albedo = albedo.map(|source| Uploaded {
                gpu: upload_rgba8(
                    device,
                    queue,
                    "VAT Albedo Texture",
                    source.width,
                    source.height,
                    &source.rgba,
                    true,
                ),
                source: Arc::clone(source),
            });
            textures_changed = true;
        }
        if textures_changed {
            self.rebuild_texture_bind_group(device);
        }
        self.sync_instances(device, queue, &state.instances);

        let frame = FrameUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            light_dir: lighting.direction.extend(0.0).to_array(),
            light_color: lighting.color.extend(1.0).to_array(),
            ambient_color: lighting.ambient.extend(1.0).to_array(),
            base_color: state.material.base_color(),
            material_params: [if self.albedo.is_some() { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        };
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&frame));
        queue.write_buffer(&self.vat_buffer, 0, bytemuck::bytes_of(&VatUniforms::new(&state.params, time)));
    }

    fn sync_mesh(&mut self, device: &wgpu::Device, mesh: Option<&Arc<VatMesh>>) {
        if Uploaded::matches(&self.mesh, mesh) {
            return;
        }
        self.mesh = mesh.map(|source| {
            let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("VAT Vertex Buffer"),
                contents: bytemuck::cast_slice(source.vertices()),
                usage: wgpu::BufferUsages::VERTEX,
            });
            let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("VAT Index Buffer"),
                contents: bytemuck::cast_slice(source.indices()),
                usage: wgpu::BufferUsages::INDEX,
            });
            Uploaded {
                gpu: MeshBuffers { vertex, index, index_count: source.index_count() },
                source: Arc::clone(source),
            }
        });
    }

    fn sync_instances(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, layout: &Arc<InstanceLayout>) {
        if self.instances.as_ref().is_some_and(|current| Arc::ptr_eq(current, layout)) {
            return;
        }
        let raw = layout.to_raw();
        if self.instance_capacity < raw.len() || self.instance_buffer.is_none() {
            let mut capacity = self.instance_capacity.max(MIN_INSTANCE_CAPACITY);
            while capacity < raw.len() {
                capacity *= 2;
            }
            self.instance_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("VAT Instance Buffer"),
                size: (capacity * std::mem::size_of::<InstanceRaw>()) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.instance_capacity = capacity;
        }
        if let Some(buffer) = &self.instance_buffer {
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(&raw));
        }
        self.instance_count = raw.len() as u32;
        self.instances = Some(Arc::clone(layout));
    }

    fn rebuild_texture_bind_group(&mut self, device: &wgpu::Device) {
        let position_view = self.positions.as_ref().map(|t| &t.gpu.view).unwrap_or(&self.fallback.view);
        let normal_view = self.normals.as_ref().map(|t| &t.gpu.view).unwrap_or(&self.fallback.view);
        let albedo_view = self.albedo.as_ref().map(|t| &t.gpu.view).unwrap_or(&self.fallback.view);
        self.texture_bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("VAT Texture BG"),
            layout: &self.texture_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(position_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(normal_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(albedo_view),
                },
                wgpu::BindGroupEntry { binding: 3, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
        }));
    }

    /// Records the draw. Nothing is drawn until playback is active.
    pub(super) fn draw(&self, pass: &mut wgpu::RenderPass<'_>, state: &RenderState) {
        if !state.active || self.positions.is_none() {
            return;
        }
        let (Some(mesh), Some(textures), Some(instances)) =
            (self.mesh.as_ref(), self.texture_bind_group.as_ref(), self.instance_buffer.as_ref())
        else {
            return;
        };
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        pass.set_bind_group(1, textures, &[]);
        pass.set_vertex_buffer(0, mesh.gpu.vertex.slice(..));
        pass.set_vertex_buffer(1, instances.slice(..));
        pass.set_index_buffer(mesh.gpu.index.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.gpu.index_count, 0, 0..self.instance_count);
    }
}

fn upload_vat_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &VatTexture,
    float_format: FloatTextureFormat,
) -> GpuTexture {
    let payload = texture.gpu_payload(float_format);
    tracing::debug!(
        texture = texture.label(),
        format = ?payload.format,
        width = texture.width(),
        height = texture.height(),
        "uploading VAT texture"
    );
    upload_payload(device, queue, texture.label(), texture.width(), texture.height(), &payload)
}

fn upload_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    rgba: &[u8],
    srgb: bool,
) -> GpuTexture {
    let format = if srgb { wgpu::TextureFormat::Rgba8UnormSrgb } else { wgpu::TextureFormat::Rgba8Unorm };
    let payload = TexturePayload { format, bytes: rgba.to_vec(), bytes_per_pixel: 4 };
    upload_payload(device, queue, label, width, height, &payload)
}

fn upload_payload(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    payload: &TexturePayload,
) -> GpuTexture {
    let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: payload.format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &payload.bytes,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * payload.bytes_per_pixel),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { _texture: texture, view }
}
