// Bevy integration for the splat sort pipeline
//
// Textures are `Image` assets, the instanced index mesh is a `Mesh` asset and
// cameras are entities with a `GlobalTransform`. Per frame (Update, chained):
//   attach resources -> update cameras -> apply sort results -> rebind materials
// Removed splats release their registry reference in PostUpdate.

use std::collections::HashMap;

use bevy::{
    asset::RenderAssetUsages,
    camera::primitives::Aabb as CullingAabb,
    image::ImageSampler,
    mesh::Indices,
    prelude::*,
    render::render_resource::{
        Extent3d, PrimitiveTopology, TextureDimension, TextureFormat as ImageFormat,
    },
};
use tracing::{debug, warn};

use crate::backend::{Backend, Binding, GpuContext, MaterialPass, TextureDescriptor, TextureFormat};
use crate::error::{GsplatError, Result};
use crate::gaussian_splats::GaussianSplats;
use crate::registry::ResourceRegistry;
use crate::render_binder::{resolve_camera, CameraTransform, GsplatConfig, RenderBinder};
use crate::sorter::SortOrder;
use crate::splat_resource::{binding_names, Aabb, InstanceMesh, SplatResource};
use crate::temporal_coherence::TemporalCoherenceConfig;

/// Handle types used when running inside a Bevy app
#[derive(Debug, Clone, Copy)]
pub struct BevyBackend;

impl Backend for BevyBackend {
    type Texture = Handle<Image>;
    type Sampler = ImageSampler;
    type Mesh = Handle<Mesh>;
}

/// GPU context over the main-world asset stores
pub struct BevyGpu<'a> {
    images: &'a mut Assets<Image>,
    meshes: &'a mut Assets<Mesh>,
}

impl<'a> BevyGpu<'a> {
    pub fn new(images: &'a mut Assets<Image>, meshes: &'a mut Assets<Mesh>) -> Self {
        Self { images, meshes }
    }
}

fn image_format(format: TextureFormat) -> ImageFormat {
    match format {
        TextureFormat::R32Uint => ImageFormat::R32Uint,
        TextureFormat::Rgba32Uint => ImageFormat::Rgba32Uint,
        TextureFormat::Rgba16Float => ImageFormat::Rgba16Float,
    }
}

impl GpuContext<BevyBackend> for BevyGpu<'_> {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Handle<Image> {
        let mut image = Image::new_uninit(
            Extent3d {
                width: desc.size.width,
                height: desc.size.height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            image_format(desc.format),
            RenderAssetUsages::default(),
        );
        // Integer textures cannot be filtered
        image.sampler = ImageSampler::nearest();
        self.images.add(image)
    }

    fn upload_texture(
        &mut self,
        texture: &Handle<Image>,
        desc: &TextureDescriptor,
        data: &[u8],
    ) -> Result<()> {
        desc.check_upload(data)?;
        let Some(image) = self.images.get_mut(texture) else {
            return Err(GsplatError::DisposedResource { what: "texture" });
        };
        image.data = Some(data.to_vec());
        Ok(())
    }

    fn destroy_texture(&mut self, texture: &Handle<Image>) {
        self.images.remove(texture);
    }

    fn create_mesh(&mut self, mesh: &InstanceMesh) -> Handle<Mesh> {
        let positions: Vec<[f32; 3]> = mesh
            .positions
            .chunks_exact(3)
            .map(|p| [p[0], p[1], p[2]])
            .collect();
        let mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
            .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions)
            .with_inserted_indices(Indices::U32(mesh.indices.clone()));
        self.meshes.add(mesh)
    }

    fn destroy_mesh(&mut self, mesh: &Handle<Mesh>) {
        self.meshes.remove(mesh);
    }

    /// Samplers are values in Bevy; every nearest sampler compares equal
    fn point_sampler(&mut self) -> ImageSampler {
        ImageSampler::nearest()
    }
}

/// Culling box of the splat centers. The mesh vertices only hold quad
/// corners and slot indices, so Bevy cannot derive it from the mesh.
fn culling_aabb(bounds: &Aabb) -> CullingAabb {
    CullingAabb {
        center: bounds.center().into(),
        half_extents: bounds.half_extents().into(),
    }
}

/// Decoded splat data as a Bevy asset
#[derive(Asset, TypePath, Debug, Clone)]
pub struct GsplatAsset {
    pub splats: GaussianSplats,
}

impl GsplatAsset {
    pub fn new(splats: GaussianSplats) -> Self {
        Self { splats }
    }
}

/// Splat resources shared between every entity rendering the same asset
#[derive(Resource, Default)]
pub struct GsplatRegistry {
    resources: ResourceRegistry<AssetId<GsplatAsset>, BevyBackend>,
    owners: HashMap<Entity, AssetId<GsplatAsset>>,
}

impl GsplatRegistry {
    fn acquire(
        &mut self,
        owner: Entity,
        asset_id: AssetId<GsplatAsset>,
        asset: &GsplatAsset,
        gpu: &mut BevyGpu,
    ) -> std::sync::Arc<SplatResource<BevyBackend>> {
        self.release(owner, gpu);
        let resource = self
            .resources
            .acquire(&asset_id, || SplatResource::new(gpu, &asset.splats));
        self.owners.insert(owner, asset_id);
        resource
    }

    /// Drop `owner`'s reference, destroying the resource with its last owner
    fn release(&mut self, owner: Entity, gpu: &mut BevyGpu) {
        let Some(asset_id) = self.owners.remove(&owner) else {
            return;
        };
        if let Some(resource) = self.resources.release(&asset_id) {
            resource.destroy(gpu);
        }
    }

    pub fn ref_count(&self, asset: AssetId<GsplatAsset>) -> usize {
        self.resources.ref_count(&asset)
    }

    pub fn get(&self, asset: AssetId<GsplatAsset>) -> Option<std::sync::Arc<SplatResource<BevyBackend>>> {
        self.resources.get(&asset)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Camera used instead of each splat's own camera while editing
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct EditorCameraOverride(pub Option<Entity>);

/// A splat asset to render from this entity
#[derive(Component, Debug, Clone)]
pub struct Gsplat {
    pub asset: Handle<GsplatAsset>,
    /// Camera to sort for. None: the first camera in the world
    pub camera: Option<Entity>,
}

impl Gsplat {
    pub fn new(asset: Handle<GsplatAsset>) -> Self {
        Self { asset, camera: None }
    }

    pub fn with_camera(mut self, camera: Entity) -> Self {
        self.camera = Some(camera);
        self
    }
}

/// Per-entity renderer settings (user-configurable)
/// Attach to a Gsplat entity to override the defaults
#[derive(Component, Clone, Copy, Debug, Reflect)]
#[reflect(Component)]
pub struct GsplatSettings {
    /// Nearest splats first instead of farthest first (default: false)
    pub front_to_back: bool,
    /// Camera movement below this (summed component delta) does not re-sort (default: 1e-6)
    pub epsilon: f32,
    /// Rebind material parameters every frame (default: false)
    pub rebind_every_frame: bool,
    /// Sort for the editor camera override when set (default: false)
    pub editing: bool,
}

impl Default for GsplatSettings {
    fn default() -> Self {
        GsplatConfig::default().into()
    }
}

impl GsplatSettings {
    pub fn editor() -> Self {
        GsplatConfig::editor().into()
    }

    pub fn config(&self) -> GsplatConfig {
        GsplatConfig {
            sort_order: if self.front_to_back {
                SortOrder::FrontToBack
            } else {
                SortOrder::BackToFront
            },
            coherence: TemporalCoherenceConfig {
                epsilon: self.epsilon,
            },
            rebind_every_frame: self.rebind_every_frame,
            editing: self.editing,
        }
    }
}

impl From<GsplatConfig> for GsplatSettings {
    fn from(config: GsplatConfig) -> Self {
        Self {
            front_to_back: config.sort_order == SortOrder::FrontToBack,
            epsilon: config.coherence.epsilon,
            rebind_every_frame: config.rebind_every_frame,
            editing: config.editing,
        }
    }
}

/// Shader parameters of the host material drawing the splat mesh.
///
/// Declares which names the material has; the pipeline fills in textures and
/// scalars. A host system copies them into its own material type.
#[derive(Component, Debug, Clone, Default)]
pub struct GsplatMaterialParams {
    names: Vec<String>,
    textures: HashMap<u32, (Handle<Image>, ImageSampler)>,
    uints: HashMap<u32, u32>,
}

impl GsplatMaterialParams {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Declares every parameter the pipeline binds
    pub fn standard() -> Self {
        Self::new([
            binding_names::SPLAT_ORDER,
            binding_names::TRANSFORM_A,
            binding_names::TRANSFORM_B,
            binding_names::SPLAT_COLOR,
            binding_names::NUM_SPLATS,
        ])
    }

    fn index_of(&self, name: &str) -> Option<u32> {
        self.names.iter().position(|n| n == name).map(|i| i as u32)
    }

    pub fn texture(&self, name: &str) -> Option<&Handle<Image>> {
        let index = self.index_of(name)?;
        self.textures.get(&index).map(|(texture, _)| texture)
    }

    pub fn sampler(&self, name: &str) -> Option<&ImageSampler> {
        let index = self.index_of(name)?;
        self.textures.get(&index).map(|(_, sampler)| sampler)
    }

    pub fn uint(&self, name: &str) -> Option<u32> {
        let index = self.index_of(name)?;
        self.uints.get(&index).copied()
    }
}

impl MaterialPass<BevyBackend> for GsplatMaterialParams {
    fn binding(&self, name: &str) -> Binding {
        match self.index_of(name) {
            Some(index) => Binding::Found(index),
            None => Binding::Missing,
        }
    }

    fn bind_texture(&mut self, binding: u32, texture: &Handle<Image>, sampler: &ImageSampler) {
        self.textures.insert(binding, (texture.clone(), sampler.clone()));
    }

    fn set_uint(&mut self, binding: u32, value: u32) {
        self.uints.insert(binding, value);
    }
}

/// Sorter and binder state attached to every Gsplat entity with a loaded asset
#[derive(Component)]
pub struct GsplatRenderState {
    binder: RenderBinder<BevyBackend>,
    asset: AssetId<GsplatAsset>,
}

impl GsplatRenderState {
    pub fn binder(&self) -> &RenderBinder<BevyBackend> {
        &self.binder
    }

    pub fn asset(&self) -> AssetId<GsplatAsset> {
        self.asset
    }
}

/// Gaussian splat sort plugin
pub struct GsplatPlugin;

impl Plugin for GsplatPlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<GsplatAsset>();
        app.init_resource::<GsplatRegistry>();
        app.init_resource::<EditorCameraOverride>();
        app.register_type::<GsplatSettings>();

        app.add_systems(
            Update,
            (
                attach_splat_resources,
                update_splat_cameras,
                apply_sort_results,
                rebind_splat_materials,
            )
                .chain(),
        );
        app.add_systems(PostUpdate, release_removed_splats);
    }
}

/// Acquire the shared resource for new or re-pointed Gsplat entities and
/// push settings changes into their binders
fn attach_splat_resources(
    mut commands: Commands,
    mut registry: ResMut<GsplatRegistry>,
    assets: Res<Assets<GsplatAsset>>,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut splats: Query<(
        Entity,
        &Gsplat,
        Option<&GsplatSettings>,
        Option<&mut GsplatRenderState>,
    )>,
) {
    let mut gpu = BevyGpu::new(&mut images, &mut meshes);

    for (entity, gsplat, settings, mut state) in &mut splats {
        let config = settings.map(GsplatSettings::config).unwrap_or_default();
        let asset_id = gsplat.asset.id();

        if let Some(state) = state.as_mut() {
            if *state.binder.config() != config {
                if let Err(err) = state.binder.set_config(&mut gpu, config) {
                    warn!(?entity, %err, "Failed to apply splat settings");
                }
            }
            if state.asset == asset_id {
                continue;
            }
        }

        let Some(asset) = assets.get(asset_id) else {
            debug!(?entity, "{}", GsplatError::MissingAsset);
            continue;
        };

        // Asset swapped: the old binder's order texture goes before the
        // registry reference of the old asset
        if let Some(state) = state.as_mut() {
            state.binder.dispose(&mut gpu);
        }

        let resource = registry.acquire(entity, asset_id, asset, &mut gpu);
        let mesh = resource.mesh().cloned();
        let bounds = resource.set().bounds();

        let mut binder = RenderBinder::new(config);
        if let Err(err) = binder.set_resource(&mut gpu, Some(resource)) {
            warn!(?entity, %err, "Failed to attach splat resource");
        }

        let mut entity_commands = commands.entity(entity);
        entity_commands.insert(GsplatRenderState {
            binder,
            asset: asset_id,
        });
        if let Some(mesh) = mesh {
            entity_commands.insert((Mesh3d(mesh), culling_aabb(&bounds)));
        } else {
            entity_commands.remove::<(Mesh3d, CullingAabb)>();
        }
        debug!(?entity, "Attached splat resource");
    }
}

fn update_splat_cameras(
    editor: Res<EditorCameraOverride>,
    transforms: Query<&GlobalTransform>,
    cameras: Query<&GlobalTransform, With<Camera>>,
    mut splats: Query<(&Gsplat, &GlobalTransform, &mut GsplatRenderState)>,
) {
    let editor_camera = editor.0.and_then(|entity| transforms.get(entity).ok());

    for (gsplat, model, mut state) in &mut splats {
        let explicit = match gsplat.camera {
            Some(entity) => transforms.get(entity).ok(),
            None => cameras.iter().next(),
        };
        let editing = state.binder.config().editing;
        let camera = resolve_camera(explicit, editor_camera, editing)
            .map(|transform| CameraTransform::from_world_matrix(&transform.to_matrix()));

        state.binder.update(camera.as_ref(), &model.to_matrix());
    }
}

fn apply_sort_results(
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut splats: Query<&mut GsplatRenderState>,
) {
    let mut gpu = BevyGpu::new(&mut images, &mut meshes);
    for mut state in &mut splats {
        state.binder.poll(&mut gpu);
    }
}

fn rebind_splat_materials(
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut splats: Query<(Entity, &mut GsplatRenderState, &mut GsplatMaterialParams)>,
) {
    let mut gpu = BevyGpu::new(&mut images, &mut meshes);
    for (entity, mut state, mut params) in &mut splats {
        if !state.binder.needs_rebind() {
            continue;
        }
        let report = state.binder.rebind(&mut gpu, &mut *params);
        if !report.is_complete() {
            debug!(?entity, missing = report.missing.len(), "Splat material bound partially");
        }
    }
}

/// Release registry references of entities whose Gsplat went away
fn release_removed_splats(
    mut commands: Commands,
    mut removed: RemovedComponents<Gsplat>,
    mut registry: ResMut<GsplatRegistry>,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut states: Query<&mut GsplatRenderState>,
) {
    let mut gpu = BevyGpu::new(&mut images, &mut meshes);
    for entity in removed.read() {
        // Despawned entities already dropped their binder; the order texture
        // handle went with it
        if let Ok(mut state) = states.get_mut(entity) {
            state.binder.dispose(&mut gpu);
            commands.entity(entity).remove::<(GsplatRenderState, Mesh3d, CullingAabb)>();
        }
        registry.release(entity, &mut gpu);
        debug!(?entity, "Released splat resource");
    }
}
