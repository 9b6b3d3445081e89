//! Culling demo
//!
//! Renders a random asteroid field around an orbiting camera with the
//! headless backend and logs what culling and batching did each frame.
//!
//! ```text
//! RUST_LOG=info cargo run -p culling_demo -- [config.toml|config.ron] [frames]
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use render_core::batching::BatchError;
use render_core::config::ConfigError;
use render_core::prelude::*;
use render_core::queue::RenderQueueStats;
use std::sync::Arc;

const ASTEROID_COUNT: usize = 2_000;
const FIELD_RADIUS: f32 = 400.0;
const DEFAULT_FRAMES: u32 = 120;

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Invalid frame count: {0}")]
    FrameCount(String),
}

struct Asteroid {
    id: u32,
    position: Vec3,
    spin_axis: Vec3,
    spin_speed: f32,
    scale: f32,
}

impl Asteroid {
    fn transform(&self, time: f32) -> Mat4 {
        Mat4::new_translation(&self.position)
            * Mat4::new_rotation(self.spin_axis * self.spin_speed * time)
            * Mat4::new_scaling(self.scale)
    }
}

fn cube_mesh(id: u32, half: f32) -> Mesh {
    let vertices = (0..8)
        .map(|i| {
            let p = [
                if i & 1 == 0 { -half } else { half },
                if i & 2 == 0 { -half } else { half },
                if i & 4 == 0 { -half } else { half },
            ];
            Vertex::new(p, p, [0.0, 0.0])
        })
        .collect();
    let indices = vec![
        0, 1, 3, 0, 3, 2, 4, 6, 7, 4, 7, 5, 0, 4, 5, 0, 5, 1, 2, 3, 7, 2, 7, 6, 0, 2, 6, 0, 6, 4, 1, 5, 7, 1, 7, 3,
    ];
    Mesh::new(MeshId(id), vertices, indices)
}

fn load_config(path: Option<&String>) -> Result<RenderCoreConfig, DemoError> {
    match path {
        Some(path) => Ok(RenderCoreConfig::load_from_file(path)?),
        None => Ok(RenderCoreConfig::default()
            .with_culling(CullingConfig::default().with_max_render_distance(350.0).with_bvh(true))),
    }
}

fn spawn_field(renderer: &mut FrameRenderer, rng: &mut StdRng) -> Vec<Asteroid> {
    let meshes: Vec<Arc<Mesh>> = (1..=3).map(|id| Arc::new(cube_mesh(id, 0.5 + id as f32 * 0.25))).collect();
    let rock = Material::new(1, 1).with_texture(1);
    let ice = Material::new(2, 1).with_texture(2).with_blend_mode(BlendMode::AlphaBlend);

    (0..ASTEROID_COUNT)
        .map(|i| {
            let direction = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            let position = direction.try_normalize(1e-6).unwrap_or_else(Vec3::x) * rng.gen_range(20.0..FIELD_RADIUS);
            let spin_axis = Vec3::new(rng.gen_range(-1.0..1.0), 1.0, rng.gen_range(-1.0..1.0)).normalize();
            let mut asteroid = Asteroid {
                id: 0,
                position,
                spin_axis,
                spin_speed: rng.gen_range(0.1..1.5),
                scale: rng.gen_range(0.5..4.0),
            };
            let material = if i % 10 == 0 { ice } else { rock };
            let mesh = Arc::clone(&meshes[i % meshes.len()]);
            asteroid.id = renderer.add_drawable(mesh, material, asteroid.transform(0.0));
            asteroid
        })
        .collect()
}

/// Merge a ring of hull plates into one static station
fn build_station(renderer: &mut FrameRenderer) -> Result<usize, DemoError> {
    let plate = cube_mesh(100, 2.0);
    let transforms: Vec<Mat4> = (0..24)
        .map(|i| {
            let angle = i as f32 / 24.0 * std::f32::consts::TAU;
            Mat4::new_translation(&Vec3::new(angle.cos() * 30.0, 0.0, angle.sin() * 30.0))
        })
        .collect();
    let meshes: Vec<&Mesh> = transforms.iter().map(|_| &plate).collect();
    let materials = vec![Material::new(50, 2); transforms.len()];
    Ok(renderer.batching_mut().create_static_batch(&meshes, &materials, &transforms)?)
}

fn log_queue(stats: &RenderQueueStats) {
    for (pass, count) in RenderPass::ALL.iter().zip(stats.items_per_pass) {
        if count > 0 {
            log::debug!("  {:?}: {} items", pass, count);
        }
    }
}

fn run() -> Result<(), DemoError> {
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1))?;
    let frames = match args.get(2) {
        Some(text) => text.parse::<u32>().map_err(|_| DemoError::FrameCount(text.clone()))?,
        None => DEFAULT_FRAMES,
    };

    let mut renderer = FrameRenderer::new(config);
    let mut backend = HeadlessBackend::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);

    let asteroids = spawn_field(&mut renderer, &mut rng);
    let station = build_station(&mut renderer)?;
    log::info!(
        "Spawned {} asteroids and static station {} ({} vertices)",
        asteroids.len(),
        station,
        renderer.batching().static_batch(station).map_or(0, |b| b.mesh.vertex_count())
    );

    let mut totals = (0usize, 0usize, 0u64);
    for frame in 0..frames {
        let time = frame as f32 / 60.0;
        let eye = Vec3::new(time.cos() * 120.0, 25.0, time.sin() * 120.0);
        let camera = Camera::perspective(eye, 60.0, 16.0 / 9.0, 0.5, 1_000.0).looking_at(Vec3::zeros());

        for asteroid in &asteroids {
            renderer.update_transform(asteroid.id, asteroid.transform(time));
        }

        backend.clear_frame();
        let stats = renderer.render_frame(&camera, &mut backend)?;
        totals.0 += stats.culling.visible_objects;
        totals.1 += stats.batching.draw_calls;
        totals.2 += stats.frame_time_us;

        if frame % 30 == 0 {
            log::info!(
                "Frame {}: {}/{} visible ({:.0}% culled), {} draw calls for {} instances ({:.1} per batch), {}us",
                stats.culling.frame_index,
                stats.culling.visible_objects,
                stats.culling.total_objects,
                stats.culling.culling_efficiency * 100.0,
                stats.batching.draw_calls,
                stats.batching.instance_count,
                stats.batching.avg_instances_per_batch(),
                stats.frame_time_us
            );
            log_queue(&stats.queue);
        }
    }

    if frames > 0 {
        let n = frames as usize;
        log::info!(
            "Average over {} frames: {} visible, {} draw calls, {}us per frame",
            frames,
            totals.0 / n,
            totals.1 / n,
            totals.2 / u64::from(frames)
        );
    }
    renderer.shutdown(&mut backend);
    log::info!("{} buffers still alive after shutdown", backend.live_buffer_count());
    Ok(())
}

fn main() {
    render_core::foundation::logging::init();
    if let Err(error) = run() {
        log::error!("Culling demo failed: {}", error);
        std::process::exit(1);
    }
}
