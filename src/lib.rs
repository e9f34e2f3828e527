// Gaussian splat visibility sorting
// Keeps a per-splat draw order texture in camera depth order, re-sorted on a
// worker thread whenever the camera moves, plus the shared splat resources and
// material binding around it. The Bevy plugin drives it from an App.

pub mod backend;
pub mod error;
pub mod gaussian_splats;
pub mod radix_sort;
pub mod registry;
pub mod render_binder;
pub mod sorter;
pub mod splat_resource;
pub mod temporal_coherence;

// Bevy integration (optional feature)
#[cfg(feature = "bevy-plugin")]
pub mod plugin;

// Re-exports - core types always available
pub use backend::{
    eval_texture_size, Backend, Binding, GpuContext, MaterialPass, TextureDescriptor,
    TextureFormat, TextureSize,
};
pub use error::{GsplatError, Result};
pub use gaussian_splats::{create_test_splats, inverse_sigmoid, sigmoid, GaussianSplats, SplatSource};
pub use radix_sort::{float_to_sortable, RadixSorter};
pub use registry::ResourceRegistry;
pub use render_binder::{
    local_camera_pose, resolve_camera, BindReport, CameraTransform, FrameUpdate, GsplatConfig,
    RenderBinder,
};
pub use sorter::{is_permutation, sort_splats, OrderBuffer, SortOrder, SortScratch, Sorter, SorterState};
pub use splat_resource::{
    binding_names, padded_count, Aabb, InstanceMesh, SplatResource, SplatSet, SPLAT_INSTANCE_SIZE,
};
pub use temporal_coherence::{CameraPose, PoseTracker, TemporalCoherenceConfig, TemporalCoherenceStats};

#[cfg(feature = "bevy-plugin")]
pub use plugin::{
    BevyBackend, BevyGpu, EditorCameraOverride, Gsplat, GsplatAsset, GsplatMaterialParams,
    GsplatPlugin, GsplatRegistry, GsplatRenderState, GsplatSettings,
};
