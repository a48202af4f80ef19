use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use glam::{Mat4, Vec3};
use lumen_common::{Color, InstanceKey, RenderConfig};
use lumen_render::gpu::{Capabilities, RecordingGpu, Support};
use lumen_render::pipeline::{select_tier, supports_tier};
use lumen_render::{ssao, Camera, GpuMesh, Lights, Material, Mesh, Pass, Pipeline, RenderContext, Scene};
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumen-cli", about = "Headless tools for the lumen renderer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Host capability profiles the recording backend can impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Profile {
    /// Single color attachment, no instancing.
    Baseline,
    /// Multiple render targets through an extension, no instancing.
    Extension,
    /// Everything native.
    Full,
}

impl Profile {
    fn capabilities(self) -> Capabilities {
        match self {
            Self::Baseline => Capabilities::baseline("recording"),
            Self::Extension => Capabilities {
                instancing: Support::None,
                multiple_render_targets: Support::Extension,
                ..Capabilities::full("recording")
            },
            Self::Full => Capabilities::full("recording"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Show which tier each capability profile runs
    Tiers {
        /// Configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the SSAO sample kernel and rotation table
    Kernel {
        /// World-space kernel radius
        #[arg(short, long, default_value = "0.6")]
        radius: f32,
        /// Number of samples
        #[arg(short, long, default_value = "16")]
        samples: u32,
        /// Vertical field of view in degrees
        #[arg(short, long, default_value = "60")]
        fov: f32,
        /// Rotation table entries
        #[arg(short, long, default_value = "4")]
        dither: u32,
    },
    /// Validate a configuration file and print the effective values
    Config {
        path: PathBuf,
    },
    /// Render frames of a demo scene against the recording backend
    Frame {
        /// Configuration file (YAML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value = "full")]
        profile: Profile,
        #[arg(long, default_value = "640")]
        width: u32,
        #[arg(long, default_value = "480")]
        height: u32,
        /// Number of frames to render
        #[arg(short, long, default_value = "1")]
        frames: u32,
        /// Instances in the instanced bucket
        #[arg(short, long, default_value = "8")]
        instances: u32,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RenderConfig> {
    match path {
        Some(path) => RenderConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(RenderConfig::default()),
    }
}

/// A ground slab, a few opaque boxes, a translucent pane and an instanced
/// row of cubes.
fn demo_scene(ctx: &mut RenderContext, instances: u32) -> anyhow::Result<(Scene, Vec<GpuMesh>)> {
    let mut ground = Mesh::new();
    ground.add_box(Vec3::new(0.0, -0.55, 0.0), Vec3::new(20.0, 0.1, 20.0), Some(Color::rgb(0.5, 0.5, 0.45)))?;
    let mut boxes = Mesh::new();
    for i in 0..3 {
        let x = (i as f32 - 1.0) * 2.5;
        boxes.add_box(Vec3::new(x, 0.0, 0.0), Vec3::ONE, Some(Color::rgb(0.8, 0.3 + 0.2 * i as f32, 0.2)))?;
    }
    let mut pane = Mesh::new();
    pane.add_box(Vec3::ZERO, Vec3::new(4.0, 2.0, 0.05), Some(Color::rgba(0.3, 0.6, 0.9, 0.4)))?;
    let mut cube = Mesh::new();
    cube.add_box(Vec3::ZERO, Vec3::splat(0.5), None)?;

    let ground = ground.upload(ctx, "ground")?;
    let boxes = boxes.upload(ctx, "boxes")?;
    let pane = pane.upload(ctx, "pane")?;
    let cube = cube.upload(ctx, "cube")?;

    let opaque = Rc::new(Material::new(Pass::Opaque));
    let mut scene = Scene::new();
    let ids = [
        scene.create_draw_call(ground, Rc::clone(&opaque)),
        scene.create_draw_call(boxes, opaque),
    ];
    let pane_id = scene.create_draw_call(pane, Rc::new(Material::new(Pass::Translucent)));
    if let Some(call) = scene.draw_call_mut(pane_id) {
        call.set_transform(Mat4::from_translation(Vec3::new(0.0, 0.5, 2.0)));
    }
    let row = scene.create_instanced_draw_call(cube, Rc::new(Material::new(Pass::Instanced)));
    if let Some(call) = scene.instanced_mut(row) {
        for i in 0..instances {
            let x = (i as f32 - instances as f32 / 2.0) * 1.0;
            call.set_instance(
                InstanceKey::from_u64(u64::from(i)),
                Mat4::from_translation(Vec3::new(x, 0.0, -3.0)),
            );
        }
    }
    for id in ids.into_iter().chain([pane_id, row]) {
        scene.add(id)?;
    }
    Ok((scene, vec![ground, boxes, pane, cube]))
}

fn render_frames(
    config: &RenderConfig,
    profile: Profile,
    (width, height): (u32, u32),
    frames: u32,
    instances: u32,
) -> anyhow::Result<()> {
    let gpu = RecordingGpu::with_capabilities(width, height, profile.capabilities());
    let mut ctx = RenderContext::new(gpu, config.depth_bias);
    let mut pipeline = Pipeline::new(&mut ctx, config)?;
    let (mut scene, meshes) = demo_scene(&mut ctx, instances)?;
    let mut camera = Camera::new(width, height);
    camera.look_at(Vec3::new(0.0, 4.0, 10.0), Vec3::ZERO, Vec3::Y);
    let lights = Lights::default();

    println!(
        "tier {} on {:?} ({} programs)",
        pipeline.tier(),
        profile,
        pipeline.programs().count()
    );
    for frame in 0..frames {
        let stats = pipeline.render_frame(&mut ctx, &mut scene, &camera, &lights)?;
        println!(
            "frame {frame}: passes={} draws={} skipped={}",
            stats.passes, stats.draws, stats.skipped
        );
        let recorded = ctx
            .backend_mut::<RecordingGpu>()
            .map(RecordingGpu::take_passes)
            .unwrap_or_default();
        for pass in recorded {
            let instanced: u32 = pass.draws.iter().map(|d| d.instance_count).sum();
            println!(
                "  {:<10} {:?} draws={} instances={}",
                pass.label,
                pass.target,
                pass.draws.len(),
                instanced
            );
        }
    }

    scene.destroy(&mut ctx);
    for mesh in meshes {
        mesh.destroy(&mut ctx);
    }
    pipeline.destroy(&mut ctx);
    ctx.destroy();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("lumen-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", lumen_render::crate_info());
            println!(
                "shader entry points: {} / {}",
                lumen_render::shader::reflect::VERTEX_ENTRY,
                lumen_render::shader::reflect::FRAGMENT_ENTRY
            );
        }
        Commands::Tiers { config } => {
            let config = load_config(config.as_ref())?;
            for profile in [Profile::Baseline, Profile::Extension, Profile::Full] {
                let caps = profile.capabilities();
                let supported: Vec<String> = (0..=2)
                    .filter(|&t| supports_tier(&caps, t))
                    .map(|t| t.to_string())
                    .collect();
                println!(
                    "{:<10} supports [{}] -> tier {}",
                    format!("{profile:?}"),
                    supported.join(", "),
                    select_tier(Some(&caps), &config)
                );
            }
        }
        Commands::Kernel {
            radius,
            samples,
            fov,
            dither,
        } => {
            let fov = fov.to_radians();
            println!("kernel radius {:.4}", ssao::kernel_radius(radius, fov));
            for (i, p) in ssao::kernel(radius, samples, fov).iter().enumerate() {
                println!("  {i:>3}: ({:>8.4}, {:>8.4})  |{:.4}|", p.x, p.y, p.length());
            }
            let side = ssao::tile_side(dither);
            println!("rotation tile {side}x{side}");
            for (i, r) in ssao::rotations(dither).iter().enumerate() {
                println!("  ({}, {}): cos={:>7.4} sin={:>7.4}", i as u32 % side, i as u32 / side, r.x, r.y);
            }
        }
        Commands::Config { path } => {
            let config = RenderConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Frame {
            config,
            profile,
            width,
            height,
            frames,
            instances,
        } => {
            let config = load_config(config.as_ref())?;
            render_frames(&config, profile, (width, height), frames, instances)?;
        }
    }

    Ok(())
}
