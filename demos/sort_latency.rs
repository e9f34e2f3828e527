// Sort Latency Demo
// Orbits a camera around a test splat set without a GPU and reports how long
// the worker takes from camera change to uploaded order.
//
// Run: cargo run --example sort_latency --release
// Splat count: first argument (default 500000)
// Log level: RUST_LOG (default info)

use std::time::{Duration, Instant};

use glam::{Mat4, Vec3};
use gsplat_sort::*;
use tracing::info;

struct Headless;

impl Backend for Headless {
    type Texture = usize;
    type Sampler = ();
    type Mesh = usize;
}

/// Counts uploaded bytes, stores nothing
#[derive(Default)]
struct NullGpu {
    next: usize,
    uploaded_bytes: usize,
}

impl GpuContext<Headless> for NullGpu {
    fn create_texture(&mut self, _desc: &TextureDescriptor) -> usize {
        self.next += 1;
        self.next
    }

    fn upload_texture(&mut self, _texture: &usize, desc: &TextureDescriptor, data: &[u8]) -> Result<()> {
        desc.check_upload(data)?;
        self.uploaded_bytes += data.len();
        Ok(())
    }

    fn destroy_texture(&mut self, _texture: &usize) {}

    fn create_mesh(&mut self, _mesh: &InstanceMesh) -> usize {
        self.next += 1;
        self.next
    }

    fn destroy_mesh(&mut self, _mesh: &usize) {}

    fn point_sampler(&mut self) {}
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let count: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(500_000);

    let splats = create_test_splats(count);
    let radius = splats
        .bounding_box()
        .map(|(min, max)| (max - min).length())
        .unwrap_or(1.0)
        * 1.5;

    let mut gpu = NullGpu::default();
    let started = Instant::now();
    let resource = std::sync::Arc::new(SplatResource::new(&mut gpu, &splats));
    info!(count, elapsed_ms = started.elapsed().as_millis() as u64, "Built splat resource");

    let mut binder = RenderBinder::new(GsplatConfig::default());
    if let Err(err) = binder.set_resource(&mut gpu, Some(resource)) {
        tracing::error!(%err, "Failed to attach splat resource");
        return;
    }

    let frames = 120;
    let mut latencies = Vec::with_capacity(frames);

    // Two stationary frames first: only the first one sorts
    let still = CameraTransform::new(Vec3::new(0.0, 0.0, radius), Vec3::NEG_Z);
    binder.update(Some(&still), &Mat4::IDENTITY);
    binder.update(Some(&still), &Mat4::IDENTITY);
    binder.sorter_mut().flush(&mut gpu, Duration::from_secs(30));

    for frame in 0..frames {
        let angle = frame as f32 / frames as f32 * std::f32::consts::TAU;
        let position = Vec3::new(angle.sin(), 0.3, angle.cos()) * radius;
        let camera = CameraTransform::new(position, (-position).normalize());

        let requested = Instant::now();
        if !matches!(binder.update(Some(&camera), &Mat4::IDENTITY), FrameUpdate::SortRequested(_)) {
            continue;
        }
        if binder.sorter_mut().flush(&mut gpu, Duration::from_secs(30)) {
            latencies.push(requested.elapsed());
        }
    }

    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let mean = total / latencies.len().max(1) as u32;
    let p95 = latencies
        .get(latencies.len() * 95 / 100)
        .copied()
        .unwrap_or_default();

    info!(
        sorts = latencies.len(),
        mean_ms = %format!("{:.2}", mean.as_secs_f64() * 1000.0),
        p95_ms = %format!("{:.2}", p95.as_secs_f64() * 1000.0),
        uploaded_mb = gpu.uploaded_bytes / (1024 * 1024),
        "Sort latency"
    );
    // Logs the skip statistics
    binder.dispose(&mut gpu);
}
