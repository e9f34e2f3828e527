// Render binder: per-frame glue between the host camera, the sorter and the
// material that draws the splat mesh.
//
// Each frame: resolve the camera, move it into the mesh's local space, and
// request a sort if it moved. On resource (re)assignment: create the order
// texture, restart the sorter and mark the material for rebinding.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use tracing::{debug, warn};

use crate::backend::{Backend, Binding, GpuContext, MaterialPass};
use crate::error::{GsplatError, Result};
use crate::sorter::{SortOrder, Sorter};
use crate::splat_resource::{binding_names, SplatResource};
use crate::temporal_coherence::{
    CameraPose, PoseTracker, TemporalCoherenceConfig, TemporalCoherenceStats,
};

/// Renderer configuration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GsplatConfig {
    /// Draw order produced by the sorter
    /// Default: BackToFront (alpha blending)
    pub sort_order: SortOrder,
    /// Camera change detection
    pub coherence: TemporalCoherenceConfig,
    /// Rebind material parameters every frame, tolerating live material reloads
    /// Default: false
    pub rebind_every_frame: bool,
    /// Prefer the editor camera override over the explicit camera
    /// Default: false
    pub editing: bool,
}

impl Default for GsplatConfig {
    fn default() -> Self {
        Self {
            sort_order: SortOrder::BackToFront,
            coherence: TemporalCoherenceConfig::default(),
            rebind_every_frame: false,
            editing: false,
        }
    }
}

impl GsplatConfig {
    /// Editing context: editor camera wins, materials rebound every frame
    pub fn editor() -> Self {
        Self {
            rebind_every_frame: true,
            editing: true,
            ..Default::default()
        }
    }
}

/// World-space camera position and forward direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransform {
    pub position: Vec3,
    pub forward: Vec3,
}

impl CameraTransform {
    pub fn new(position: Vec3, forward: Vec3) -> Self {
        Self { position, forward }
    }

    /// From a camera world matrix; cameras look down their local -Z
    pub fn from_world_matrix(world: &Mat4) -> Self {
        Self {
            position: world.w_axis.truncate(),
            forward: -world.z_axis.truncate(),
        }
    }
}

/// Pick the camera to sort for: the editor override while editing, otherwise
/// the explicitly assigned camera
pub fn resolve_camera<'a, T>(
    explicit: Option<&'a T>,
    editor_override: Option<&'a T>,
    editing: bool,
) -> Option<&'a T> {
    match (editing, editor_override) {
        (true, Some(camera)) => Some(camera),
        _ => explicit,
    }
}

/// Camera pose in the local space of a mesh with world matrix `model_world`
pub fn local_camera_pose(camera: &CameraTransform, model_world: &Mat4) -> CameraPose {
    let inverse = model_world.inverse();
    CameraPose::new(
        inverse.transform_point3(camera.position),
        inverse.transform_vector3(camera.forward).normalize_or_zero(),
    )
}

/// What a frame update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUpdate {
    /// No resource, an empty one, or the binder is disposed
    NoResource,
    NoCamera,
    /// Camera did not move; the resident order stays
    Unchanged,
    /// A sort pass was requested with this sequence number
    SortRequested(u64),
    /// Camera moved but the sorter could not take the request
    Dropped,
}

/// Outcome of a material rebind
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BindReport {
    pub bound: Vec<&'static str>,
    /// Parameters skipped because the material does not declare them
    pub missing: Vec<GsplatError>,
}

impl BindReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct RenderBinder<B: Backend> {
    config: GsplatConfig,
    resource: Option<Arc<SplatResource<B>>>,
    sorter: Sorter<B>,
    tracker: PoseTracker,
    stats: TemporalCoherenceStats,
    dirty: bool,
    disposed: bool,
}

impl<B: Backend> RenderBinder<B> {
    pub fn new(config: GsplatConfig) -> Self {
        Self {
            config,
            resource: None,
            sorter: Sorter::new(config.sort_order),
            tracker: PoseTracker::new(),
            stats: TemporalCoherenceStats::default(),
            dirty: false,
            disposed: false,
        }
    }

    /// Assign (or clear) the splat resource. Assigning the same resource again
    /// is a no-op.
    pub fn set_resource<C: GpuContext<B> + ?Sized>(
        &mut self,
        ctx: &mut C,
        resource: Option<Arc<SplatResource<B>>>,
    ) -> Result<()> {
        if self.disposed {
            return Err(GsplatError::DisposedResource { what: "render binder" });
        }

        let same = match (&self.resource, &resource) {
            (Some(current), Some(next)) => Arc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }

        self.resource = resource;
        self.reload(ctx)
    }

    /// Replace the configuration; a new sort order restarts the sorter
    pub fn set_config<C: GpuContext<B> + ?Sized>(
        &mut self,
        ctx: &mut C,
        config: GsplatConfig,
    ) -> Result<()> {
        let order_changed = config.sort_order != self.config.sort_order;
        self.config = config;
        if order_changed && !self.disposed {
            return self.reload(ctx);
        }
        Ok(())
    }

    fn reload<C: GpuContext<B> + ?Sized>(&mut self, ctx: &mut C) -> Result<()> {
        let mut previous = std::mem::replace(&mut self.sorter, Sorter::new(self.config.sort_order));
        previous.dispose(ctx);

        self.tracker.reset();
        self.dirty = true;

        let Some(resource) = &self.resource else {
            debug!("Splat resource cleared");
            return Ok(());
        };

        if resource.num_splats() == 0 {
            debug!("{}", GsplatError::EmptyDataset);
            return Ok(());
        }
        if resource.is_destroyed() {
            warn!("Assigned splat resource was already destroyed");
            return Err(GsplatError::DisposedResource { what: "splat resource" });
        }

        let desc = resource.order_texture_descriptor();
        let texture = ctx.create_texture(&desc);
        self.sorter.init(ctx, texture, desc, resource.shared_centers())
    }

    /// Per-frame camera check. Feeds the sorter when the local-space camera
    /// pose changed since the last request; never waits for a sort.
    pub fn update(&mut self, camera: Option<&CameraTransform>, model_world: &Mat4) -> FrameUpdate {
        if self.disposed {
            return FrameUpdate::NoResource;
        }
        match &self.resource {
            Some(resource) if resource.num_splats() > 0 => {}
            _ => return FrameUpdate::NoResource,
        }
        let Some(camera) = camera else {
            return FrameUpdate::NoCamera;
        };

        let pose = local_camera_pose(camera, model_world);
        let changed = self.tracker.observe(pose, &self.config.coherence);
        self.stats.update(!changed);

        if !changed {
            return FrameUpdate::Unchanged;
        }
        if self.sorter.set_camera(pose) {
            FrameUpdate::SortRequested(self.sorter.dispatched())
        } else {
            // Not dispatched: the next frame must retry this pose
            self.tracker.reset();
            FrameUpdate::Dropped
        }
    }

    /// Upload the newest finished sort, if any
    pub fn poll<C: GpuContext<B> + ?Sized>(&mut self, ctx: &mut C) -> Option<u64> {
        if self.disposed {
            return None;
        }
        self.sorter.poll(ctx)
    }

    pub fn needs_rebind(&self) -> bool {
        !self.disposed && (self.dirty || self.config.rebind_every_frame)
    }

    /// Bind the order/attribute textures and the splat count to `pass`.
    ///
    /// Parameters the material does not declare are skipped and reported.
    /// Calling this repeatedly binds the same handles again and allocates
    /// nothing.
    pub fn rebind<C, P>(&mut self, ctx: &mut C, pass: &mut P) -> BindReport
    where
        C: GpuContext<B> + ?Sized,
        P: MaterialPass<B> + ?Sized,
    {
        let mut report = BindReport::default();
        if self.disposed {
            report
                .missing
                .push(GsplatError::DisposedResource { what: "render binder" });
            return report;
        }
        let Some(resource) = &self.resource else {
            return report;
        };

        let sampler = ctx.point_sampler();
        let textures = [
            (binding_names::SPLAT_ORDER, self.sorter.order_texture()),
            (binding_names::TRANSFORM_A, resource.transform_a()),
            (binding_names::TRANSFORM_B, resource.transform_b()),
            (binding_names::SPLAT_COLOR, resource.color_texture()),
        ];

        for (name, texture) in textures {
            let Some(texture) = texture else {
                continue;
            };
            match pass.binding(name) {
                Binding::Found(index) => {
                    pass.bind_texture(index, texture, &sampler);
                    report.bound.push(name);
                }
                Binding::Missing => {
                    let err = GsplatError::InvalidBinding { name: name.to_string() };
                    warn!(%err, "Skipping splat texture binding");
                    report.missing.push(err);
                }
            }
        }

        match pass.binding(binding_names::NUM_SPLATS) {
            Binding::Found(index) => {
                pass.set_uint(index, resource.num_splats());
                report.bound.push(binding_names::NUM_SPLATS);
            }
            Binding::Missing => {
                let err = GsplatError::InvalidBinding {
                    name: binding_names::NUM_SPLATS.to_string(),
                };
                warn!(%err, "Skipping splat count binding");
                report.missing.push(err);
            }
        }

        self.dirty = false;
        report
    }

    /// Stop sorting and free the order texture. Returns the resource so the
    /// caller can release its registry reference.
    pub fn dispose<C: GpuContext<B> + ?Sized>(
        &mut self,
        ctx: &mut C,
    ) -> Option<Arc<SplatResource<B>>> {
        if self.disposed {
            return None;
        }
        self.disposed = true;
        self.sorter.dispose(ctx);
        self.tracker.reset();
        self.stats.log_summary();
        self.resource.take()
    }

    pub fn config(&self) -> &GsplatConfig {
        &self.config
    }

    pub fn resource(&self) -> Option<&Arc<SplatResource<B>>> {
        self.resource.as_ref()
    }

    pub fn sorter(&self) -> &Sorter<B> {
        &self.sorter
    }

    pub fn sorter_mut(&mut self) -> &mut Sorter<B> {
        &mut self.sorter
    }

    pub fn stats(&self) -> &TemporalCoherenceStats {
        &self.stats
    }

    pub fn last_pose(&self) -> Option<CameraPose> {
        self.tracker.last()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}
