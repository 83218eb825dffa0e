use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec2;
use perlinscape_core::frame::{FrameLoop, FrameStats};
use perlinscape_core::loader::ChunkLoader;
use perlinscape_shared::config::{load_or_create_settings, NoiseParams, TerrainSettings};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{CursorGrabMode, Window, WindowId};

use crate::camera::Camera;
use crate::controls::{apply_param_key, apply_render_key, describe, scroll_lines};
use crate::input::InputState;
use crate::renderer::Renderer;

const SETTINGS_FILE: &str = "perlinscape.toml";
const TITLE_REFRESH_SECONDS: f32 = 0.5;
const MAX_FRAME_SECONDS: f32 = 0.1;

struct Streaming {
    frame_loop: FrameLoop,
    loader: ChunkLoader,
}

struct TerrainApp {
    settings: TerrainSettings,
    settings_path: PathBuf,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    streaming: Option<Streaming>,
    camera: Camera,
    input: InputState,
    cursor_grabbed: bool,
    /// Parameters being edited; published on the next regeneration.
    pending_params: NoiseParams,
    last_frame: Option<Instant>,
    last_stats: FrameStats,
    title_timer: f32,
    fps_frames: u32,
}

impl TerrainApp {
    fn new(settings: TerrainSettings, settings_path: PathBuf) -> Self {
        let camera = Camera::overlooking(settings.render.height_scale);
        Self {
            pending_params: settings.noise.clone(),
            settings,
            settings_path,
            window: None,
            renderer: None,
            streaming: None,
            camera,
            input: InputState::default(),
            cursor_grabbed: false,
            last_frame: None,
            last_stats: FrameStats::default(),
            title_timer: 0.0,
            fps_frames: 0,
        }
    }

    fn set_cursor_grab(&mut self, enabled: bool) {
        let Some(window) = self.window.as_ref() else {
            self.cursor_grabbed = false;
            return;
        };

        let grabbed = if enabled {
            window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined))
                .is_ok()
        } else {
            let _ = window.set_cursor_grab(CursorGrabMode::None);
            false
        };

        if !grabbed {
            self.input.release_all();
        }
        window.set_cursor_visible(!grabbed);
        self.cursor_grabbed = grabbed;
    }

    fn handle_key_presses(&mut self) {
        for key in self.input.take_just_pressed() {
            match key {
                KeyCode::Escape => self.set_cursor_grab(!self.cursor_grabbed),
                KeyCode::KeyR => self.regenerate(),
                KeyCode::F5 => self.save_settings(),
                key => {
                    if apply_render_key(&mut self.settings.render, key) {
                        info!("Height scale set to {:.1}", self.settings.render.height_scale);
                    } else if apply_param_key(&mut self.pending_params, key) {
                        info!("Pending terrain parameters: {}", describe(&self.pending_params));
                    }
                }
            }
        }
    }

    fn regenerate(&mut self) {
        let (Some(streaming), Some(renderer)) = (self.streaming.as_mut(), self.renderer.as_mut())
        else {
            return;
        };
        match streaming
            .frame_loop
            .regenerate(self.pending_params.clone(), renderer.height_textures_mut())
        {
            Ok(count) => info!(
                "Regenerated {count} chunks with {}",
                describe(&self.pending_params)
            ),
            Err(err) => warn!("Rejected terrain parameters: {err}"),
        }
    }

    fn save_settings(&mut self) {
        self.settings.noise = self.pending_params.clone();
        match self.settings.save(&self.settings_path) {
            Ok(()) => info!("Saved settings to {}", self.settings_path.display()),
            Err(err) => warn!(
                "Failed to save settings to {}: {err}",
                self.settings_path.display()
            ),
        }
    }

    fn update_and_render(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let dt = self
            .last_frame
            .map(|last| (now - last).as_secs_f32())
            .unwrap_or(0.0)
            .min(MAX_FRAME_SECONDS);
        self.last_frame = Some(now);

        self.handle_key_presses();
        if self.cursor_grabbed {
            self.camera
                .update_look(&self.input, self.settings.render.mouse_sensitivity);
        }
        self.camera
            .fly(&self.input, self.settings.render.move_speed, dt);
        if self.input.scroll != 0.0 {
            self.camera.zoom(self.input.scroll);
        }
        self.input.clear_frame();

        let (Some(window), Some(renderer), Some(streaming)) = (
            self.window.as_ref(),
            self.renderer.as_mut(),
            self.streaming.as_mut(),
        ) else {
            return;
        };

        let output = streaming
            .frame_loop
            .run_frame(self.camera.position, renderer.height_textures_mut());
        renderer.update_camera_uniform(&self.camera, self.settings.render.height_scale);

        let size = window.inner_size();
        match renderer.render_frame(&output.draws) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                renderer.resize(size.width, size.height);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                error!("Out of GPU memory; shutting down");
                event_loop.exit();
            }
            Err(wgpu::SurfaceError::Timeout | wgpu::SurfaceError::Other) => {}
        }

        self.last_stats = output.stats;
        self.fps_frames += 1;
        self.title_timer += dt;
        if self.title_timer >= TITLE_REFRESH_SECONDS {
            let fps = self.fps_frames as f32 / self.title_timer;
            let stats = self.last_stats;
            let render_stats = renderer.last_frame_stats();
            window.set_title(&format!(
                "Perlinscape | {fps:.0} fps | drawn {} holes {} missing {} | loaded {} queued {} textures {} | height {:.0} fov {:.0} | {}",
                render_stats.draw_calls,
                stats.holes,
                render_stats.missing_textures,
                streaming.frame_loop.store().len(),
                streaming.frame_loop.pending_promotions(),
                renderer.height_textures_mut().len(),
                self.settings.render.height_scale,
                self.camera.fov.to_degrees(),
                describe(streaming.frame_loop.params().snapshot().params()),
            ));
            self.title_timer = 0.0;
            self.fps_frames = 0;
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut streaming) = self.streaming.take() {
            streaming.loader.stop();
            if let Some(renderer) = self.renderer.as_mut() {
                streaming.frame_loop.shutdown(renderer.height_textures_mut());
            }
            info!(
                "Streaming stopped after {} chunks",
                streaming.loader.stats().chunks_generated()
            );
        }
    }
}

impl ApplicationHandler for TerrainApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes().with_title("Perlinscape");
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                error!("failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };
        let renderer = match Renderer::new(window.clone(), &self.settings.render) {
            Ok(renderer) => renderer,
            Err(err) => {
                error!("failed to initialize renderer: {err}");
                event_loop.exit();
                return;
            }
        };
        let (frame_loop, loader) = match FrameLoop::start(&self.settings, self.camera.position) {
            Ok(started) => started,
            Err(err) => {
                error!("failed to start terrain streaming: {err}");
                event_loop.exit();
                return;
            }
        };

        let size = window.inner_size();
        self.camera.set_viewport(size.width, size.height);
        let streaming = &self.settings.streaming;
        let reach = (streaming.render_distance as f32 + 1.0)
            * streaming.chunk_width.max(streaming.chunk_height) as f32;
        self.camera.fit_view_distance(reach);
        renderer.update_camera_uniform(&self.camera, self.settings.render.height_scale);

        info!("Window and renderer initialized");
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.streaming = Some(Streaming { frame_loop, loader });
        self.last_frame = Some(Instant::now());
        self.set_cursor_grab(true);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested; shutting down");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
                self.camera.set_viewport(size.width, size.height);
            }
            WindowEvent::Focused(false) => self.set_cursor_grab(false),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => self.input.press_key(key),
                        ElementState::Released => self.input.release_key(key),
                    }
                }
            }
            WindowEvent::MouseWheel { delta, .. } => self.input.add_scroll(scroll_lines(delta)),
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } if !self.cursor_grabbed => self.set_cursor_grab(true),
            WindowEvent::RedrawRequested => self.update_and_render(event_loop),
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if !self.cursor_grabbed {
            return;
        }

        if let DeviceEvent::MouseMotion { delta } = event {
            self.input
                .add_mouse_delta(Vec2::new(delta.0 as f32, delta.1 as f32));
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

pub fn run() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let settings_path = PathBuf::from(SETTINGS_FILE);
    let settings = load_or_create_settings(&settings_path);
    info!(
        "Perlinscape starting: {} (render distance {}, {}x{} chunks)",
        describe(&settings.noise),
        settings.streaming.render_distance,
        settings.streaming.chunk_width,
        settings.streaming.chunk_height
    );

    let event_loop = match EventLoop::new() {
        Ok(loop_handle) => loop_handle,
        Err(err) => {
            eprintln!("Failed to create event loop: {err}");
            return;
        }
    };

    let mut app = TerrainApp::new(settings, settings_path);
    if let Err(err) = event_loop.run_app(&mut app) {
        eprintln!("Event loop exited with error: {err}");
    }
}
