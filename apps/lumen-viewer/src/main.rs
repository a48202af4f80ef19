mod fly;

use anyhow::{Context, Result};
use clap::Parser;
use fly::FlyCamera;
use glam::{Mat4, Quat, Vec3};
use lumen_common::{Color, InstanceKey, RenderConfig};
use lumen_render::texture::{DecodedImage, Placeholder};
use lumen_render::{
    Camera, DrawCallId, GpuMesh, Lights, Material, Mesh, Pass, Pipeline, RenderContext, Scene, Texture,
};
use lumen_render_wgpu::WgpuGpu;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser)]
#[command(name = "lumen-viewer", about = "Lumen renderer desktop viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Renderer configuration (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Side of the instanced cube grid
    #[arg(long, default_value = "6")]
    grid: u32,
}

const CHECKER_SIZE: u32 = 64;
const FOV_STEPS: [f32; 3] = [60.0, 75.0, 45.0];

/// Checkerboard produced off the render thread, as a decoder would.
fn checkerboard(size: u32) -> DecodedImage {
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / 8) + (y / 8)) % 2 == 0;
            let v = if light { 230 } else { 150 };
            rgba.extend_from_slice(&[v, v, v, 255]);
        }
    }
    DecodedImage {
        width: size,
        height: size,
        rgba,
    }
}

/// Everything that lives on the GPU side of the window.
struct View {
    window: Arc<Window>,
    ctx: RenderContext,
    pipeline: Pipeline,
    scene: Scene,
    camera: Camera,
    lights: Lights,
    spinner: DrawCallId,
    grid: DrawCallId,
    grid_side: u32,
    floor: Rc<Texture>,
    meshes: Vec<GpuMesh>,
}

impl View {
    fn new(event_loop: &ActiveEventLoop, config: &RenderConfig, grid_side: u32) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Lumen")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs).context("create window")?);
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone()).context("create surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("find adapter")?;
        let (device, queue) = lumen_render_wgpu::request_device(&adapter)?;
        let gpu = WgpuGpu::with_surface(&adapter, device, queue, surface, size.width, size.height)?;

        let mut ctx = RenderContext::new(gpu, config.depth_bias);
        let pipeline = Pipeline::new(&mut ctx, config)?;
        tracing::info!(tier = pipeline.tier(), backend = %pipeline.capabilities().backend, "pipeline ready");

        let (floor, sender) = Texture::pending(&mut ctx, "floor", Placeholder::Color)?;
        std::thread::spawn(move || {
            if !sender.send(checkerboard(CHECKER_SIZE)) {
                tracing::debug!("floor texture dropped before its image arrived");
            }
        });
        let floor = Rc::new(floor);

        let mut ground = Mesh::new();
        ground.add_box(Vec3::new(0.0, -0.5, 0.0), Vec3::new(30.0, 0.2, 30.0), None)?;
        let mut pillar = Mesh::new();
        pillar.add_box(Vec3::new(0.0, 1.0, 0.0), Vec3::new(1.0, 3.0, 1.0), Some(Color::rgb(0.85, 0.4, 0.25)))?;
        let mut glass = Mesh::new();
        glass.add_quad(
            [
                Vec3::new(-2.0, 0.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(2.0, 2.5, 0.0),
                Vec3::new(-2.0, 2.5, 0.0),
            ],
            Some(Color::rgba(0.4, 0.7, 1.0, 0.35)),
        )?;
        let mut cube = Mesh::new();
        cube.add_box(Vec3::ZERO, Vec3::splat(0.6), Some(Color::rgb(0.35, 0.75, 0.45)))?;

        let ground = ground.upload(&mut ctx, "ground")?;
        let pillar = pillar.upload(&mut ctx, "pillar")?;
        let glass = glass.upload(&mut ctx, "glass")?;
        let cube = cube.upload(&mut ctx, "cube")?;

        let mut scene = Scene::new();
        let floor_id = scene.create_draw_call(
            ground,
            Rc::new(Material::new(Pass::Opaque).with_diffuse(Rc::clone(&floor))),
        );
        let spinner = scene.create_draw_call(pillar, Rc::new(Material::new(Pass::Opaque)));
        let glass_id = scene.create_draw_call(glass, Rc::new(Material::new(Pass::Translucent)));
        if let Some(call) = scene.draw_call_mut(glass_id) {
            call.set_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 3.0)));
        }
        let grid = scene.create_instanced_draw_call(cube, Rc::new(Material::new(Pass::Instanced)));
        for id in [floor_id, spinner, glass_id, grid] {
            scene.add(id)?;
        }

        let mut camera = Camera::new(size.width, size.height);
        camera.set_projection(FOV_STEPS[0].to_radians(), 0.1, 500.0);
        let lights = Lights::new(
            Vec3::splat(0.35),
            Vec3::new(0.9, 0.85, 0.8),
            Vec3::new(-0.4, -1.0, -0.3),
        );

        let mut view = Self {
            window,
            ctx,
            pipeline,
            scene,
            camera,
            lights,
            spinner,
            grid,
            grid_side,
            floor,
            meshes: vec![ground, pillar, glass, cube],
        };
        view.animate(0.0);
        Ok(view)
    }

    /// Spin the pillar and bob the instanced grid.
    fn animate(&mut self, t: f32) {
        if let Some(call) = self.scene.draw_call_mut(self.spinner) {
            call.set_transform(Mat4::from_rotation_translation(
                Quat::from_rotation_y(t * 0.5),
                Vec3::new(-4.0, 0.0, -2.0),
            ));
        }
        let side = self.grid_side;
        if let Some(call) = self.scene.instanced_mut(self.grid) {
            for z in 0..side {
                for x in 0..side {
                    let phase = t + (x + z) as f32 * 0.4;
                    let position = Vec3::new(
                        (x as f32 - side as f32 / 2.0) * 1.5 + 4.0,
                        0.3 + 0.25 * phase.sin(),
                        (z as f32 - side as f32 / 2.0) * 1.5 - 4.0,
                    );
                    call.set_instance(
                        InstanceKey::from_u64(u64::from(x + z * side)),
                        Mat4::from_translation(position),
                    );
                }
            }
        }
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if let Err(e) = self
            .pipeline
            .resize(&mut self.ctx, &mut self.camera, size.width, size.height)
        {
            tracing::error!("resize failed: {e}");
        }
    }

    fn render(&mut self) {
        self.floor.poll(&mut self.ctx);
        match self
            .pipeline
            .render_frame(&mut self.ctx, &mut self.scene, &self.camera, &self.lights)
        {
            Ok(stats) => tracing::trace!(passes = stats.passes, draws = stats.draws, "frame"),
            Err(e) => tracing::warn!("frame dropped: {e}"),
        }
    }

    fn destroy(&mut self) {
        self.scene.destroy(&mut self.ctx);
        for mesh in self.meshes.drain(..) {
            mesh.destroy(&mut self.ctx);
        }
        self.floor.destroy(&mut self.ctx);
        self.pipeline.destroy(&mut self.ctx);
        self.ctx.destroy();
    }
}

struct App {
    config: RenderConfig,
    grid_side: u32,
    view: Option<View>,
    fly: FlyCamera,
    keys_held: HashSet<KeyCode>,
    mouse_captured: bool,
    fov_step: usize,
    started: Instant,
    last_frame: Instant,
}

impl App {
    fn new(config: RenderConfig, grid_side: u32) -> Self {
        Self {
            config,
            grid_side,
            view: None,
            fly: FlyCamera::default(),
            keys_held: HashSet::new(),
            mouse_captured: false,
            fov_step: 0,
            started: Instant::now(),
            last_frame: Instant::now(),
        }
    }

    fn handle_key(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            self.keys_held.insert(key);
        } else {
            self.keys_held.remove(&key);
        }
        if !pressed {
            return;
        }
        if key == KeyCode::KeyF {
            self.fov_step = (self.fov_step + 1) % FOV_STEPS.len();
            let fov = FOV_STEPS[self.fov_step];
            if let Some(view) = &mut self.view {
                let (near, far) = (view.camera.near(), view.camera.far());
                view.camera.set_projection(fov.to_radians(), near, far);
            }
            tracing::info!(fov, "field of view changed");
        }
    }

    fn update(&mut self, dt: f32) {
        let held = |k: KeyCode| if self.keys_held.contains(&k) { 1.0 } else { 0.0 };
        let dir = Vec3::new(
            held(KeyCode::KeyD) - held(KeyCode::KeyA),
            held(KeyCode::Space) - held(KeyCode::ControlLeft),
            held(KeyCode::KeyW) - held(KeyCode::KeyS),
        );
        let boost = if self.keys_held.contains(&KeyCode::ShiftLeft) {
            3.0
        } else {
            1.0
        };
        self.fly.travel(dir, dt * boost);

        let t = self.started.elapsed().as_secs_f32();
        if let Some(view) = &mut self.view {
            self.fly.apply(&mut view.camera);
            view.animate(t);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.view.is_some() {
            return;
        }
        match View::new(event_loop, &self.config, self.grid_side) {
            Ok(view) => self.view = Some(view),
            Err(e) => {
                tracing::error!("failed to start renderer: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                if let Some(view) = &mut self.view {
                    view.destroy();
                }
                self.view = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(view) = &mut self.view {
                    view.resize(size);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state,
                        ..
                    },
                ..
            } => {
                if key == KeyCode::Escape && state == ElementState::Pressed {
                    self.mouse_captured = false;
                }
                self.handle_key(key, state == ElementState::Pressed);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.mouse_captured = state == ElementState::Pressed;
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = now.duration_since(self.last_frame).as_secs_f32();
                self.last_frame = now;
                self.update(dt);
                if let Some(view) = &mut self.view {
                    view.render();
                    view.window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: winit::event::DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.mouse_captured {
                self.fly.rotate(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(view) = &self.view {
            view.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => RenderConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RenderConfig::default(),
    };
    tracing::info!("lumen-viewer starting");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, cli.grid);
    event_loop.run_app(&mut app)?;

    Ok(())
}
