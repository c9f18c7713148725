use crate::camera3d::OrbitCamera;
use crate::config::{AppConfig, AssetsConfig};
use crate::controller::{FrameInputs, LoadOutcome, LoadSlot, PlaybackController};
use crate::error::VatError;
use crate::input::{Input, InputEvent, PlayerAction, DEFAULT_INPUT_PATH};
use crate::loader::{AssetLoader, LoadRequest};
use crate::renderer::{Lighting, Renderer};
use crate::time::Time;

use anyhow::{Context, Result};
use glam::Vec3;
use std::path::Path;
use std::sync::Arc;
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};

const CAMERA_FOV_RADIANS: f32 = std::f32::consts::FRAC_PI_4;
const CAMERA_NEAR: f32 = 0.05;
const ORBIT_SENSITIVITY: f32 = 0.005;
const ZOOM_STEP: f32 = 0.9;
const SPEED_STEP: f32 = 0.25;

pub fn run(config: AppConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create winit event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("Event loop execution failed")?;
    Ok(())
}

pub struct App {
    renderer: Renderer,
    controller: PlaybackController,
    loader: AssetLoader,
    input: Input,
    time: Time,
    orbit: OrbitCamera,
    lighting: Lighting,
    assets: AssetsConfig,
    // Mesh and instance layout the camera was last framed on.
    framed_on: Option<(usize, usize)>,
    last_title: String,
    should_close: bool,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let controller = PlaybackController::new(
            config.mode_settings(),
            config.instancing_settings(),
            config.playback_clock(),
        );
        let mut app = Self {
            renderer: Renderer::new(&config.window, config.texture.float_format),
            controller,
            loader: AssetLoader::new(),
            input: Input::from_config(DEFAULT_INPUT_PATH),
            time: Time::new(),
            orbit: OrbitCamera::new(Vec3::ZERO, 4.0),
            lighting: Lighting::default(),
            assets: config.assets,
            framed_on: None,
            last_title: String::new(),
            should_close: false,
        };
        app.queue_configured_assets();
        app
    }

    /// Metadata first so texture checks see the final calibration.
    fn queue_configured_assets(&mut self) {
        if self.assets.is_empty() {
            return;
        }
        let configured = [
            (LoadSlot::Metadata, self.assets.metadata.clone()),
            (LoadSlot::Mesh, self.assets.mesh.clone()),
            (LoadSlot::PositionTexture, self.assets.position_texture.clone()),
            (LoadSlot::NormalTexture, self.assets.normal_texture.clone()),
        ];
        for (slot, path) in configured {
            if let Some(path) = path {
                self.request_load(LoadRequest::new(slot, path));
            }
        }
    }

    fn request_load(&mut self, request: LoadRequest) {
        let ticket = self.controller.begin_load(request.slot);
        tracing::info!(slot = request.slot.label(), path = %request.path.display(), "loading");
        self.loader.request(ticket, request);
    }

    fn handle_dropped_file(&mut self, path: &Path) {
        match LoadRequest::classify(path) {
            Some(request) => self.request_load(request),
            None => self.controller.report_error(&VatError::load(format!(
                "don't know how to load '{}'",
                path.display()
            ))),
        }
    }

    fn apply_completed_loads(&mut self) {
        for completion in self.loader.drain() {
            if let LoadOutcome::Failed(reason) = self.controller.finish_load(completion) {
                tracing::debug!("load failed: {reason}");
            }
        }
    }

    fn apply_action(&mut self, action: PlayerAction) {
        match action {
            PlayerAction::TogglePlayback => self.controller.toggle_playback(),
            PlayerAction::Reset => self.controller.reset(),
            PlayerAction::ToggleFlipV => self.controller.toggle_flip_v(),
            PlayerAction::ToggleOffset => self.controller.toggle_use_offset(),
            PlayerAction::ToggleNormalTexture => self.controller.toggle_normal_texture(),
            PlayerAction::CycleDebugMode => self.controller.cycle_debug_mode(),
            PlayerAction::CycleEncoding => self.controller.cycle_encoding_override(),
            PlayerAction::ToggleInstancing => self.controller.toggle_instancing(),
            PlayerAction::FewerInstances => {
                let count = self.controller.instancing().count;
                self.controller.set_instance_count((count / 2).max(1));
            }
            PlayerAction::MoreInstances => {
                let count = self.controller.instancing().count;
                self.controller.set_instance_count(count.saturating_mul(2));
            }
            PlayerAction::SlowDown => {
                let speed = self.controller.clock().speed();
                self.controller.set_speed(speed - SPEED_STEP);
            }
            PlayerAction::SpeedUp => {
                let speed = self.controller.clock().speed();
                self.controller.set_speed(speed + SPEED_STEP);
            }
            PlayerAction::FrameCamera => self.framed_on = None,
            PlayerAction::ReloadAssets => self.queue_configured_assets(),
            PlayerAction::Quit => self.should_close = true,
        }
    }

    fn update_camera(&mut self, inputs: &FrameInputs) {
        if let Some(drag) = self.input.take_drag() {
            self.orbit.orbit(-drag * ORBIT_SENSITIVITY);
        }
        if let Some(wheel) = self.input.take_wheel() {
            self.orbit.zoom(ZOOM_STEP.powf(wheel));
        }
        let key = frame_key(inputs);
        if self.framed_on != Some(key) {
            let (center, extent) = framing_target(inputs);
            self.orbit.frame(center, extent, CAMERA_FOV_RADIANS);
            self.framed_on = Some(key);
        }
    }

    fn refresh_title(&mut self, inputs: &FrameInputs) {
        let title = status_line(inputs, self.controller.clock().speed(), self.controller.status());
        if title != self.last_title {
            self.renderer.set_status_title(&title);
            self.last_title = title;
        }
    }
}

// Identity of the mesh and instance layout the camera is framed on.
fn frame_key(inputs: &FrameInputs) -> (usize, usize) {
    let mesh = inputs.state.mesh.as_ref().map(|mesh| Arc::as_ptr(mesh) as usize).unwrap_or(0);
    (mesh, Arc::as_ptr(&inputs.state.instances) as usize)
}

fn framing_target(inputs: &FrameInputs) -> (Vec3, f32) {
    let grid = inputs.state.instances.half_extent() * std::f32::consts::SQRT_2;
    match &inputs.state.mesh {
        Some(mesh) => {
            let bounds = mesh.bounds();
            (bounds.center, bounds.radius + grid)
        }
        None => (Vec3::ZERO, 1.0 + grid),
    }
}

fn status_line(inputs: &FrameInputs, speed: f32, status: &str) -> String {
    let params = &inputs.state.params;
    let transport = if inputs.playing { "Playing" } else { "Paused" };
    if !inputs.state.active {
        return format!("{transport} | {status}");
    }
    let frame = params.frame_at(inputs.time, 0.0);
    format!(
        "{transport} {speed:.2}x | frame {}/{} | {} | {} instances | {status}",
        frame + 1,
        params.num_frames,
        params.debug_mode.label(),
        inputs.state.instances.len()
    )
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.renderer.ensure_window(event_loop) {
            tracing::error!("Renderer initialization error: {err:?}");
            self.should_close = true;
            return;
        }
        if let Ok(max) = self.renderer.max_texture_dimension() {
            self.controller.set_max_texture_dimension(max);
        }
    }

    fn window_event(&mut self, _el: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => self.renderer.resize(*size),
            WindowEvent::DroppedFile(path) => self.handle_dropped_file(path),
            _ => self.input.push(InputEvent::from_window_event(&event)),
        }
    }

    fn device_event(&mut self, _el: &ActiveEventLoop, _dev: winit::event::DeviceId, ev: DeviceEvent) {
        self.input.push(InputEvent::from_device_event(&ev));
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        for action in self.input.take_actions() {
            self.apply_action(action);
        }
        if self.should_close {
            event_loop.exit();
            return;
        }
        self.time.tick();
        self.apply_completed_loads();

        let inputs = self.controller.tick(self.time.delta_seconds());
        self.update_camera(&inputs);
        let far = (self.orbit.radius * 4.0).max(100.0);
        let view_proj = self
            .orbit
            .to_camera(CAMERA_FOV_RADIANS, CAMERA_NEAR, far)
            .view_projection(self.renderer.size());
        if let Err(err) = self.renderer.render(&inputs, view_proj, &self.lighting) {
            tracing::debug!("Frame skipped: {err:#}");
        }
        self.refresh_title(&inputs);
    }
}
