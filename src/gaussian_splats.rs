// Gaussian Splats data structure and the source trait resources read from

use glam::{Quat, Vec3, Vec4};

/// Zeroth-order spherical harmonic constant
pub const SH_C0: f32 = 0.282_094_8;

/// Decoded splat data handed over by the host's asset layer.
///
/// The pipeline reads splats through [`SplatSource`] so hosts with their own
/// layout can skip this type entirely.
pub trait SplatSource {
    /// Number of splats
    fn num_splats(&self) -> usize;

    /// Object-space center of splat `index`
    fn center(&self, index: usize) -> Vec3;

    /// Unit rotation of splat `index`
    fn rotation(&self, index: usize) -> Quat;

    /// Linear (not log) scale of splat `index`
    fn scale(&self, index: usize) -> Vec3;

    /// Linear RGB color and opacity of splat `index`
    fn color(&self, index: usize) -> Vec4;
}

/// A Gaussian Splat set in the usual trained-model layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaussianSplats {
    /// Positions of splats (N x 3)
    pub means: Vec<Vec3>,
    /// Rotation quaternions stored as (w, x, y, z) (N x 4)
    pub rotations: Vec<Vec4>,
    /// Log-space scales (N x 3)
    pub log_scales: Vec<Vec3>,
    /// Spherical harmonic coefficients (N x C x 3), only the DC term is read here
    pub sh_coeffs: Vec<Vec<Vec3>>,
    /// Raw opacity values (before sigmoid) (N)
    pub raw_opacities: Vec<f32>,
}

impl GaussianSplats {
    /// Create new Gaussian Splats from raw data
    pub fn new(
        means: Vec<Vec3>,
        rotations: Vec<Vec4>,
        log_scales: Vec<Vec3>,
        sh_coeffs: Vec<Vec<Vec3>>,
        raw_opacities: Vec<f32>,
    ) -> Self {
        assert_eq!(means.len(), rotations.len(), "Means and rotations must have same length");
        assert_eq!(means.len(), log_scales.len(), "Means and log_scales must have same length");
        assert_eq!(means.len(), sh_coeffs.len(), "Means and sh_coeffs must have same length");
        assert_eq!(means.len(), raw_opacities.len(), "Means and raw_opacities must have same length");

        Self {
            means,
            rotations,
            log_scales,
            sh_coeffs,
            raw_opacities,
        }
    }

    /// Splats at the given centers with identity rotation, unit scale and
    /// opaque mid-grey color
    pub fn from_centers(means: Vec<Vec3>) -> Self {
        let count = means.len();
        Self {
            means,
            rotations: vec![Vec4::new(1.0, 0.0, 0.0, 0.0); count],
            log_scales: vec![Vec3::ZERO; count],
            sh_coeffs: vec![vec![Vec3::ZERO]; count],
            raw_opacities: vec![inverse_sigmoid(0.99); count],
        }
    }

    /// Number of splats
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Axis-aligned bounding box of all splat centers, `None` when empty
    pub fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.means.first()?;
        Some(
            self.means
                .iter()
                .fold((first, first), |(min, max), &pos| (min.min(pos), max.max(pos))),
        )
    }
}

impl SplatSource for GaussianSplats {
    fn num_splats(&self) -> usize {
        self.len()
    }

    fn center(&self, index: usize) -> Vec3 {
        self.means[index]
    }

    fn rotation(&self, index: usize) -> Quat {
        let r = self.rotations[index];
        let q = Quat::from_xyzw(r.y, r.z, r.w, r.x);
        if q.length_squared() > f32::EPSILON {
            q.normalize()
        } else {
            Quat::IDENTITY
        }
    }

    fn scale(&self, index: usize) -> Vec3 {
        self.log_scales[index].exp()
    }

    fn color(&self, index: usize) -> Vec4 {
        let dc = self.sh_coeffs[index].first().copied().unwrap_or(Vec3::ZERO);
        let rgb = Vec3::splat(0.5) + dc * SH_C0;
        rgb.extend(sigmoid(self.raw_opacities[index]))
    }
}

/// Bare centers: identity rotation, unit scale, opaque white
impl SplatSource for [Vec3] {
    fn num_splats(&self) -> usize {
        self.len()
    }

    fn center(&self, index: usize) -> Vec3 {
        self[index]
    }

    fn rotation(&self, _index: usize) -> Quat {
        Quat::IDENTITY
    }

    fn scale(&self, _index: usize) -> Vec3 {
        Vec3::ONE
    }

    fn color(&self, _index: usize) -> Vec4 {
        Vec4::ONE
    }
}

/// Inverse sigmoid function
pub fn inverse_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x)).ln()
}

/// Sigmoid function
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Create example/test Gaussian Splats on a dense 3D grid
pub fn create_test_splats(count: usize) -> GaussianSplats {
    let mut means = Vec::with_capacity(count);
    let mut rotations = Vec::with_capacity(count);
    let mut log_scales = Vec::with_capacity(count);
    let mut sh_coeffs = Vec::with_capacity(count);
    let mut raw_opacities = Vec::with_capacity(count);

    let grid_size = ((count as f32).cbrt().ceil() as usize).max(1);
    let spacing = 0.1;
    let offset = -(grid_size as f32 * spacing) / 2.0;
    let extent = grid_size as f32 * spacing;

    for i in 0..count {
        let x = (i % grid_size) as f32 * spacing + offset;
        let y = ((i / grid_size) % grid_size) as f32 * spacing + offset;
        let z = (i / (grid_size * grid_size)) as f32 * spacing + offset;

        means.push(Vec3::new(x, y, z));

        // Rotation derived from position so covariances differ per splat
        let angle = (x + y + z) * 0.5;
        let axis = Vec3::new(x, y, z).normalize_or_zero();
        let s = (angle * 0.5).sin();
        let c = (angle * 0.5).cos();
        rotations.push(Vec4::new(c, axis.x * s, axis.y * s, axis.z * s));

        log_scales.push(Vec3::splat(-4.0));

        let color = Vec3::new(
            (x - offset) / extent,
            (y - offset) / extent,
            (z - offset) / extent,
        );
        sh_coeffs.push(vec![color * 0.5]);

        raw_opacities.push(inverse_sigmoid(0.9));
    }

    GaussianSplats::new(means, rotations, log_scales, sh_coeffs, raw_opacities)
}
