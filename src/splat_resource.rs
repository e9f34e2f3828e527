// Splat resource: the immutable, once-per-asset data shared by every
// renderer that references the same source asset.
//
// Holds the splat centers and bounds used by the sorter, the instanced quad
// mesh, and the packed transform/color attribute textures sampled by the
// vertex shader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{Mat3, Quat, Vec3, Vec4};
use half::f16;
use tracing::{debug, warn};

use crate::backend::{
    eval_texture_size, Backend, GpuContext, TextureDescriptor, TextureFormat, TextureSize,
};
use crate::gaussian_splats::SplatSource;

/// Number of quads combined into a single mesh instance.
/// Larger batches raise vertex shader occupancy.
pub const SPLAT_INSTANCE_SIZE: u32 = 128;

/// Shader parameter names the resource's textures are bound to
pub mod binding_names {
    pub const SPLAT_ORDER: &str = "splatOrder";
    pub const TRANSFORM_A: &str = "transformA";
    pub const TRANSFORM_B: &str = "transformB";
    pub const SPLAT_COLOR: &str = "splatColor";
    pub const NUM_SPLATS: &str = "numSplats";
}

/// `count` rounded up to a whole number of mesh instances
pub fn padded_count(count: u32) -> u32 {
    count.div_ceil(SPLAT_INSTANCE_SIZE) * SPLAT_INSTANCE_SIZE
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const ZERO: Self = Self {
        min: Vec3::ZERO,
        max: Vec3::ZERO,
    };

    /// Bounds of `points`, zero box when empty
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(&first) = points.first() else {
            return Self::ZERO;
        };
        points.iter().fold(
            Self {
                min: first,
                max: first,
            },
            |aabb, &p| Self {
                min: aabb.min.min(p),
                max: aabb.max.max(p),
            },
        )
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// Centers and counts derived once from the source data
#[derive(Debug, Clone, PartialEq)]
pub struct SplatSet {
    centers: Arc<[Vec3]>,
    bounds: Aabb,
    count: u32,
    padded_count: u32,
}

impl SplatSet {
    pub fn from_source<S: SplatSource + ?Sized>(source: &S) -> Self {
        let num_splats = source.num_splats();
        let count = u32::try_from(num_splats).unwrap_or_else(|_| {
            warn!(num_splats, "Splat count exceeds u32 range, truncating");
            u32::MAX - SPLAT_INSTANCE_SIZE
        });

        let centers: Vec<Vec3> = (0..count as usize).map(|i| source.center(i)).collect();
        let bounds = Aabb::from_points(&centers);

        Self {
            centers: centers.into(),
            bounds,
            count,
            padded_count: padded_count(count),
        }
    }

    pub fn centers(&self) -> &[Vec3] {
        &self.centers
    }

    /// Cheap handle to the centers for the sort worker
    pub fn shared_centers(&self) -> Arc<[Vec3]> {
        self.centers.clone()
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn padded_count(&self) -> u32 {
        self.padded_count
    }

    pub fn instance_count(&self) -> u32 {
        self.padded_count / SPLAT_INSTANCE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// The instanced quad mesh: one quad per draw slot.
///
/// Vertex positions only carry the quad corner in xy and the local slot index
/// in z; the real splat position is resolved in the vertex shader through the
/// order and transform textures.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceMesh {
    /// Flat xyz positions, four vertices per slot
    pub positions: Vec<f32>,
    /// Two triangles per slot
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl InstanceMesh {
    pub fn build(padded_count: u32, bounds: Aabb) -> Self {
        let num_instances = padded_count / SPLAT_INSTANCE_SIZE;
        let num_slots = (num_instances * SPLAT_INSTANCE_SIZE) as usize;

        let mut positions = Vec::with_capacity(num_slots * 12);
        let mut indices = Vec::with_capacity(num_slots * 6);

        for ins in 0..num_instances {
            for i in 0..SPLAT_INSTANCE_SIZE {
                let slot = i as f32;
                positions.extend_from_slice(&[
                    -1.0, -1.0, slot, //
                    1.0, -1.0, slot, //
                    1.0, 1.0, slot, //
                    -1.0, 1.0, slot,
                ]);

                let b = (i + ins * SPLAT_INSTANCE_SIZE) * 4;
                indices.extend_from_slice(&[b, b + 1, b + 2, b, b + 2, b + 3]);
            }
        }

        Self {
            positions,
            indices,
            bounds,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// Attribute payloads laid out texel by texel, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct PackedAttributes {
    pub size: TextureSize,
    /// Rgba32Uint: center xyz as f32 bits, (covA.x, covA.y) as half2
    pub transform_a: Vec<u32>,
    /// Rgba16Float: covA.z, covB.x, covB.y, covB.z
    pub transform_b: Vec<u16>,
    /// Rgba16Float: linear rgb, opacity
    pub color: Vec<u16>,
}

impl PackedAttributes {
    pub fn transform_a_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor::new(
            binding_names::TRANSFORM_A,
            TextureFormat::Rgba32Uint,
            self.size,
        )
    }

    pub fn transform_b_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor::new(
            binding_names::TRANSFORM_B,
            TextureFormat::Rgba16Float,
            self.size,
        )
    }

    pub fn color_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor::new(
            binding_names::SPLAT_COLOR,
            TextureFormat::Rgba16Float,
            self.size,
        )
    }
}

/// Pack two f32 values into f16 format and store in u32
fn pack_half2(a: f32, b: f32) -> u32 {
    let a_u16 = f16::from_f32(a).to_bits();
    let b_u16 = f16::from_f32(b).to_bits();
    (a_u16 as u32) | ((b_u16 as u32) << 16)
}

fn half_bits(v: Vec4) -> [u16; 4] {
    v.to_array().map(|c| f16::from_f32(c).to_bits())
}

/// Upper triangle of the 3D covariance `R S Sᵀ Rᵀ`, split as
/// `covA = (m00, m01, m02)` and `covB = (m11, m12, m22)`
pub fn covariance(rotation: Quat, scale: Vec3) -> (Vec3, Vec3) {
    let m = Mat3::from_quat(rotation) * Mat3::from_diagonal(scale);
    let sigma = m * m.transpose();
    (
        Vec3::new(sigma.x_axis.x, sigma.y_axis.x, sigma.z_axis.x),
        Vec3::new(sigma.y_axis.y, sigma.z_axis.y, sigma.z_axis.z),
    )
}

/// Packs centers, covariances and colors into texture payloads sized by
/// `eval_texture_size(count)`. Texels past `count` stay zeroed.
pub fn pack_attributes<S: SplatSource + ?Sized>(source: &S, count: u32) -> PackedAttributes {
    let size = eval_texture_size(count);
    let texels = size.capacity();

    let mut transform_a = vec![0u32; texels * 4];
    let mut transform_b = vec![0u16; texels * 4];
    let mut color = vec![0u16; texels * 4];

    for i in 0..count as usize {
        let center = source.center(i);
        let (cov_a, cov_b) = covariance(source.rotation(i), source.scale(i));

        transform_a[i * 4..i * 4 + 4].copy_from_slice(&[
            center.x.to_bits(),
            center.y.to_bits(),
            center.z.to_bits(),
            pack_half2(cov_a.x, cov_a.y),
        ]);
        transform_b[i * 4..i * 4 + 4]
            .copy_from_slice(&half_bits(Vec4::new(cov_a.z, cov_b.x, cov_b.y, cov_b.z)));
        color[i * 4..i * 4 + 4].copy_from_slice(&half_bits(source.color(i)));
    }

    PackedAttributes {
        size,
        transform_a,
        transform_b,
        color,
    }
}

/// GPU-side splat resource shared read-only between renderers
#[derive(Debug)]
pub struct SplatResource<B: Backend> {
    set: SplatSet,
    mesh: Option<B::Mesh>,
    transform_a: Option<B::Texture>,
    transform_b: Option<B::Texture>,
    color: Option<B::Texture>,
    destroyed: AtomicBool,
}

impl<B: Backend> SplatResource<B> {
    /// Build the resource and its GPU objects.
    ///
    /// Zero splats produce a resource without mesh or textures, which renders
    /// nothing.
    pub fn new<S, C>(ctx: &mut C, source: &S) -> Self
    where
        S: SplatSource + ?Sized,
        C: GpuContext<B> + ?Sized,
    {
        let set = SplatSet::from_source(source);

        if set.is_empty() {
            warn!("Splat source has no splats, resource will render nothing");
            return Self {
                set,
                mesh: None,
                transform_a: None,
                transform_b: None,
                color: None,
                destroyed: AtomicBool::new(false),
            };
        }

        let mesh = InstanceMesh::build(set.padded_count(), set.bounds());
        let mesh = ctx.create_mesh(&mesh);

        let packed = pack_attributes(source, set.count());
        let transform_a = upload_attribute(
            ctx,
            &packed.transform_a_descriptor(),
            bytemuck::cast_slice(&packed.transform_a),
        );
        let transform_b = upload_attribute(
            ctx,
            &packed.transform_b_descriptor(),
            bytemuck::cast_slice(&packed.transform_b),
        );
        let color = upload_attribute(
            ctx,
            &packed.color_descriptor(),
            bytemuck::cast_slice(&packed.color),
        );

        debug!(
            count = set.count(),
            padded = set.padded_count(),
            width = packed.size.width,
            height = packed.size.height,
            "Created splat resource"
        );

        Self {
            set,
            mesh: Some(mesh),
            transform_a,
            transform_b,
            color,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn set(&self) -> &SplatSet {
        &self.set
    }

    pub fn centers(&self) -> &[Vec3] {
        self.set.centers()
    }

    pub fn shared_centers(&self) -> Arc<[Vec3]> {
        self.set.shared_centers()
    }

    pub fn num_splats(&self) -> u32 {
        self.set.count()
    }

    pub fn instance_size(&self) -> u32 {
        SPLAT_INSTANCE_SIZE
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn live<'a, T>(&self, handle: &'a Option<T>) -> Option<&'a T> {
        if self.is_destroyed() {
            None
        } else {
            handle.as_ref()
        }
    }

    pub fn mesh(&self) -> Option<&B::Mesh> {
        self.live(&self.mesh)
    }

    pub fn transform_a(&self) -> Option<&B::Texture> {
        self.live(&self.transform_a)
    }

    pub fn transform_b(&self) -> Option<&B::Texture> {
        self.live(&self.transform_b)
    }

    pub fn color_texture(&self) -> Option<&B::Texture> {
        self.live(&self.color)
    }

    /// Descriptor of the per-renderer draw order texture. Sized by the padded
    /// count so every slot of the instanced mesh has an order entry.
    pub fn order_texture_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor::new(
            binding_names::SPLAT_ORDER,
            TextureFormat::R32Uint,
            eval_texture_size(self.set.padded_count()),
        )
    }

    /// Free the mesh and textures. Later calls are no-ops.
    pub fn destroy<C: GpuContext<B> + ?Sized>(&self, ctx: &mut C) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(mesh) = &self.mesh {
            ctx.destroy_mesh(mesh);
        }
        for texture in [&self.transform_a, &self.transform_b, &self.color]
            .into_iter()
            .flatten()
        {
            ctx.destroy_texture(texture);
        }
        debug!(count = self.set.count(), "Destroyed splat resource");
    }
}

fn upload_attribute<B, C>(ctx: &mut C, desc: &TextureDescriptor, data: &[u8]) -> Option<B::Texture>
where
    B: Backend,
    C: GpuContext<B> + ?Sized,
{
    match ctx.create_texture_with_data(desc, data) {
        Ok(texture) => Some(texture),
        Err(err) => {
            warn!(label = desc.label, %err, "Attribute texture upload failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rounds_to_instance_size() {
        assert_eq!(padded_count(0), 0);
        assert_eq!(padded_count(1), 128);
        assert_eq!(padded_count(128), 128);
        assert_eq!(padded_count(130), 256);
    }

    #[test]
    fn splat_set_from_centers() {
        let centers = vec![Vec3::new(-1.0, 2.0, 0.5), Vec3::new(3.0, -4.0, 1.0)];
        let set = SplatSet::from_source(centers.as_slice());
        assert_eq!(set.count(), 2);
        assert_eq!(set.padded_count(), 128);
        assert_eq!(set.instance_count(), 1);
        assert_eq!(set.bounds().min, Vec3::new(-1.0, -4.0, 0.5));
        assert_eq!(set.bounds().max, Vec3::new(3.0, 2.0, 1.0));
        assert!(set.bounds().contains(Vec3::new(0.0, 0.0, 0.75)));
    }

    #[test]
    fn empty_set_has_zero_bounds() {
        let empty: &[Vec3] = &[];
        let set = SplatSet::from_source(empty);
        assert!(set.is_empty());
        assert_eq!(set.bounds(), Aabb::ZERO);
        assert_eq!(set.padded_count(), 0);
    }

    #[test]
    fn instance_mesh_layout() {
        let mesh = InstanceMesh::build(256, Aabb::ZERO);
        assert_eq!(mesh.vertex_count(), 256 * 4);
        assert_eq!(mesh.indices.len(), 256 * 6);

        // second slot of the second instance
        let slot = 128 + 1;
        assert_eq!(
            &mesh.indices[slot * 6..slot * 6 + 6],
            &[516, 517, 518, 516, 518, 519]
        );
        // z carries the local slot index, not the global one
        assert_eq!(mesh.positions[slot * 12 + 2], 1.0);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));
    }

    #[test]
    fn covariance_of_axis_aligned_splat() {
        let (a, b) = covariance(Quat::IDENTITY, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(a, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(b, Vec3::new(4.0, 0.0, 9.0));
    }

    #[test]
    fn covariance_is_rotation_invariant_for_isotropic_scale() {
        let q = Quat::from_euler(glam::EulerRot::XYZ, 0.3, -1.1, 2.0);
        let (a, b) = covariance(q, Vec3::splat(0.5));
        assert!(a.abs_diff_eq(Vec3::new(0.25, 0.0, 0.0), 1e-5));
        assert!(b.abs_diff_eq(Vec3::new(0.25, 0.0, 0.25), 1e-5));
    }

    #[test]
    fn packed_attributes_hold_centers() {
        let centers = vec![Vec3::new(1.5, -2.0, 3.25); 5];
        let packed = pack_attributes(centers.as_slice(), 5);
        assert_eq!(packed.size, TextureSize::new(3, 2));
        assert_eq!(packed.transform_a.len(), 6 * 4);
        assert_eq!(f32::from_bits(packed.transform_a[4]), 1.5);
        assert_eq!(f32::from_bits(packed.transform_a[5]), -2.0);
        assert_eq!(f32::from_bits(packed.transform_a[6]), 3.25);
        // unit scale, identity rotation: covA = (1, 0, 0)
        let half = packed.transform_a[7];
        assert_eq!(f16::from_bits((half & 0xFFFF) as u16).to_f32(), 1.0);
        assert_eq!(f16::from_bits((half >> 16) as u16).to_f32(), 0.0);
        // padding texel untouched
        assert!(packed.color[20..24].iter().all(|&c| c == 0));
        assert_eq!(f16::from_bits(packed.color[3]).to_f32(), 1.0);
    }
}
