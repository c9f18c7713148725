mod vat_pass;
mod window_surface;

pub use vat_pass::Lighting;
pub use window_surface::WindowSurface;

use crate::config::WindowConfig;
use crate::controller::FrameInputs;
use crate::texture::FloatTextureFormat;
use anyhow::{Context, Result};
use glam::Mat4;
use vat_pass::VatPass;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const CLEAR_COLOR: wgpu::Color = wgpu::Color { r: 0.05, g: 0.06, b: 0.1, a: 1.0 };

pub struct Renderer {
    surface: WindowSurface,
    vat_pass: Option<VatPass>,
    float_format: FloatTextureFormat,
}

impl Renderer {
    pub fn new(window_cfg: &WindowConfig, float_format: FloatTextureFormat) -> Self {
        Self { surface: WindowSurface::new(window_cfg), vat_pass: None, float_format }
    }

    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        self.surface.ensure_window(event_loop)?;
        self.ensure_vat_pass()
    }

    /// Device-only setup for tests; pair with [`Renderer::render_offscreen`].
    pub async fn init_headless_for_test(&mut self) -> Result<()> {
        self.surface.init_headless_for_test().await?;
        self.ensure_vat_pass()
    }

    fn ensure_vat_pass(&mut self) -> Result<()> {
        if self.vat_pass.is_none() {
            let pass = VatPass::new(
                self.surface.device()?,
                self.surface.queue()?,
                self.surface.surface_format()?,
                self.float_format,
            );
            self.vat_pass = Some(pass);
        }
        Ok(())
    }

    /// Largest 2D texture side the device accepts.
    pub fn max_texture_dimension(&self) -> Result<u32> {
        Ok(self.surface.device()?.limits().max_texture_dimension_2d)
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.surface.size()
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.surface.resize(new_size);
    }

    pub fn set_status_title(&self, status: &str) {
        self.surface.set_status_title(status);
    }

    /// Draws one frame of `inputs`. An inactive state only clears the screen.
    pub fn render(&mut self, inputs: &FrameInputs, view_proj: Mat4, lighting: &Lighting) -> Result<()> {
        let size = self.surface.size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        let frame = self.surface.acquire_surface_frame()?;
        self.draw_frame(frame.view(), inputs, view_proj, lighting)?;
        frame.present();
        Ok(())
    }

    /// Draws one frame into a throwaway colour target the size of the window.
    pub fn render_offscreen(
        &mut self,
        inputs: &FrameInputs,
        view_proj: Mat4,
        lighting: &Lighting,
    ) -> Result<()> {
        let size = self.surface.size();
        let target = self.surface.device()?.create_texture(&wgpu::TextureDescriptor {
            label: Some("VAT Offscreen Target"),
            size: wgpu::Extent3d {
                width: size.width.max(1),
                height: size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.surface.surface_format()?,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        self.draw_frame(&view, inputs, view_proj, lighting)
    }

    fn draw_frame(
        &mut self,
        target: &wgpu::TextureView,
        inputs: &FrameInputs,
        view_proj: Mat4,
        lighting: &Lighting,
    ) -> Result<()> {
        let device = self.surface.device()?;
        let queue = self.surface.queue()?;
        let depth_view = self.surface.depth_view()?;
        let vat_pass = self.vat_pass.as_mut().context("VAT pass not initialized")?;
        vat_pass.prepare(device, queue, &inputs.state, inputs.time, view_proj, lighting);

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("VAT Encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("VAT Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            vat_pass.draw(&mut pass, &inputs.state);
        }
        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
