// Recording mock backend shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use glam::{Mat4, Vec3};
use gsplat_sort::{
    Aabb, Backend, Binding, GpuContext, GsplatError, InstanceMesh, MaterialPass, RenderBinder, Result,
    SplatResource, TextureDescriptor,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerId(pub u32);

pub struct Mock;

impl Backend for Mock {
    type Texture = TextureId;
    type Sampler = SamplerId;
    type Mesh = MeshId;
}

/// Keeps every texture's contents and counts allocations
#[derive(Default)]
pub struct RecordingGpu {
    next_id: u32,
    textures: HashMap<TextureId, (TextureDescriptor, Vec<u8>)>,
    meshes: HashMap<MeshId, Aabb>,
    sampler: Option<SamplerId>,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub meshes_created: usize,
    pub meshes_destroyed: usize,
    pub samplers_created: usize,
    pub uploads: Vec<TextureId>,
}

impl RecordingGpu {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    /// Bounding box the mesh was created with
    pub fn mesh_bounds(&self, mesh: MeshId) -> Option<Aabb> {
        self.meshes.get(&mesh).copied()
    }

    pub fn is_live(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn descriptor(&self, texture: TextureId) -> Option<TextureDescriptor> {
        self.textures.get(&texture).map(|(desc, _)| *desc)
    }

    /// Contents of an R32Uint texture as u32 values
    pub fn read_u32(&self, texture: TextureId) -> Vec<u32> {
        self.textures
            .get(&texture)
            .map(|(_, data)| {
                data.chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl GpuContext<Mock> for RecordingGpu {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureId {
        let id = TextureId(self.next());
        self.textures.insert(id, (*desc, vec![0; desc.byte_len()]));
        self.textures_created += 1;
        id
    }

    fn upload_texture(&mut self, texture: &TextureId, desc: &TextureDescriptor, data: &[u8]) -> Result<()> {
        desc.check_upload(data)?;
        let Some((_, contents)) = self.textures.get_mut(texture) else {
            return Err(GsplatError::DisposedResource { what: "texture" });
        };
        contents.copy_from_slice(data);
        self.uploads.push(*texture);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: &TextureId) {
        if self.textures.remove(texture).is_some() {
            self.textures_destroyed += 1;
        }
    }

    fn create_mesh(&mut self, mesh: &InstanceMesh) -> MeshId {
        let id = MeshId(self.next());
        self.meshes.insert(id, mesh.bounds);
        self.meshes_created += 1;
        id
    }

    fn destroy_mesh(&mut self, mesh: &MeshId) {
        if self.meshes.remove(mesh).is_some() {
            self.meshes_destroyed += 1;
        }
    }

    fn point_sampler(&mut self) -> SamplerId {
        if let Some(sampler) = self.sampler {
            return sampler;
        }
        let sampler = SamplerId(self.next());
        self.sampler = Some(sampler);
        self.samplers_created += 1;
        sampler
    }
}

/// Material pass that declares a fixed set of parameter names
#[derive(Default)]
pub struct RecordingPass {
    names: Vec<&'static str>,
    pub textures: HashMap<u32, (TextureId, SamplerId)>,
    pub uints: HashMap<u32, u32>,
    pub texture_binds: usize,
}

impl RecordingPass {
    pub fn with_names(names: &[&'static str]) -> Self {
        Self {
            names: names.to_vec(),
            ..Default::default()
        }
    }

    pub fn standard() -> Self {
        Self::with_names(&["splatOrder", "transformA", "transformB", "splatColor", "numSplats"])
    }

    fn index_of(&self, name: &str) -> Option<u32> {
        self.names.iter().position(|n| *n == name).map(|i| i as u32)
    }

    pub fn texture(&self, name: &str) -> Option<TextureId> {
        self.textures.get(&self.index_of(name)?).map(|(texture, _)| *texture)
    }

    pub fn sampler(&self, name: &str) -> Option<SamplerId> {
        self.textures.get(&self.index_of(name)?).map(|(_, sampler)| *sampler)
    }

    pub fn uint(&self, name: &str) -> Option<u32> {
        self.uints.get(&self.index_of(name)?).copied()
    }
}

impl MaterialPass<Mock> for RecordingPass {
    fn binding(&self, name: &str) -> Binding {
        match self.index_of(name) {
            Some(index) => Binding::Found(index),
            None => Binding::Missing,
        }
    }

    fn bind_texture(&mut self, binding: u32, texture: &TextureId, sampler: &SamplerId) {
        self.textures.insert(binding, (*texture, *sampler));
        self.texture_binds += 1;
    }

    fn set_uint(&mut self, binding: u32, value: u32) {
        self.uints.insert(binding, value);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Splats at (0, 0, i)
pub fn line_centers(count: usize) -> Vec<Vec3> {
    (0..count).map(|i| Vec3::new(0.0, 0.0, i as f32)).collect()
}

pub fn random_centers(count: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Vec3::new(
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
                rng.gen_range(-50.0..50.0),
            )
        })
        .collect()
}

pub fn resource_from(gpu: &mut RecordingGpu, centers: &[Vec3]) -> Arc<SplatResource<Mock>> {
    Arc::new(SplatResource::new(gpu, centers))
}

/// Current contents of the binder's order texture
pub fn resident_order(gpu: &RecordingGpu, binder: &RenderBinder<Mock>) -> Vec<u32> {
    binder
        .sorter()
        .order_texture()
        .map(|texture| gpu.read_u32(*texture))
        .unwrap_or_default()
}

pub fn identity() -> Mat4 {
    Mat4::IDENTITY
}
