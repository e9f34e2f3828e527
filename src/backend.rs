// GPU seam between the sort pipeline and the host engine
//
// The pipeline never talks to a graphics API directly. Handle types come from
// a `Backend`, GPU work goes through a `GpuContext`, and shader parameters are
// bound through a `MaterialPass`. The Bevy plugin provides one implementation;
// tests use a recording mock.

use std::fmt;

use crate::error::{GsplatError, Result};
use crate::splat_resource::InstanceMesh;

/// Pixel formats used by the splat textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Single-channel 32-bit unsigned integer (draw order)
    R32Uint,
    /// Four-channel 32-bit unsigned integer (center + packed covariance)
    Rgba32Uint,
    /// Four-channel 16-bit float (covariance, color)
    Rgba16Float,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> usize {
        match self {
            TextureFormat::R32Uint => 4,
            TextureFormat::Rgba32Uint => 16,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Width and height of a 2D texture in texels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureSize {
    pub width: u32,
    pub height: u32,
}

impl TextureSize {
    pub const ZERO: Self = Self { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of texels (width x height)
    pub fn capacity(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.capacity() == 0
    }
}

/// Evaluates the size of a texture holding one texel per splat.
///
/// `width = ceil(sqrt(count))`, `height = ceil(count / width)`, so the capacity
/// is always at least `count`. Zero splats yield a zero-sized texture.
pub fn eval_texture_size(count: u32) -> TextureSize {
    if count == 0 {
        return TextureSize::ZERO;
    }

    let n = count as u64;
    let mut width = (n as f64).sqrt().ceil() as u64;
    // f64 sqrt can land one off for very large counts
    while width * width < n {
        width += 1;
    }
    while width > 1 && (width - 1) * (width - 1) >= n {
        width -= 1;
    }

    let height = n.div_ceil(width);
    TextureSize::new(width as u32, height as u32)
}

/// Everything needed to create or upload a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub format: TextureFormat,
    pub size: TextureSize,
}

impl TextureDescriptor {
    pub fn new(label: &'static str, format: TextureFormat, size: TextureSize) -> Self {
        Self { label, format, size }
    }

    /// Byte length of a full, tightly packed, row-major upload
    pub fn byte_len(&self) -> usize {
        self.size.capacity() * self.format.bytes_per_texel()
    }

    /// Rejects payloads that do not cover the texture exactly
    pub fn check_upload(&self, data: &[u8]) -> Result<()> {
        let expected = self.byte_len();
        if data.len() != expected {
            return Err(GsplatError::UploadSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

/// Handle types of a host graphics backend
pub trait Backend: 'static {
    type Texture: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Sampler: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Mesh: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
}

/// GPU operations the pipeline needs from the host
pub trait GpuContext<B: Backend> {
    fn create_texture(&mut self, desc: &TextureDescriptor) -> B::Texture;

    /// Replaces the full contents of `texture` (row-major, `desc.byte_len()` bytes)
    fn upload_texture(
        &mut self,
        texture: &B::Texture,
        desc: &TextureDescriptor,
        data: &[u8],
    ) -> Result<()>;

    fn destroy_texture(&mut self, texture: &B::Texture);

    fn create_mesh(&mut self, mesh: &InstanceMesh) -> B::Mesh;

    fn destroy_mesh(&mut self, mesh: &B::Mesh);

    /// Nearest-filter, clamp-to-edge sampler. Implementations create it once
    /// and hand out the same sampler afterwards.
    fn point_sampler(&mut self) -> B::Sampler;

    /// Create a texture and fill it in one go
    fn create_texture_with_data(
        &mut self,
        desc: &TextureDescriptor,
        data: &[u8],
    ) -> Result<B::Texture> {
        desc.check_upload(data)?;
        let texture = self.create_texture(desc);
        self.upload_texture(&texture, desc, data)?;
        Ok(texture)
    }
}

/// Result of looking up a shader parameter by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Found(u32),
    Missing,
}

impl Binding {
    pub fn index(self) -> Option<u32> {
        match self {
            Binding::Found(index) => Some(index),
            Binding::Missing => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, Binding::Found(_))
    }
}

/// A material pass whose parameters are looked up by name at runtime
pub trait MaterialPass<B: Backend> {
    fn binding(&self, name: &str) -> Binding;

    fn bind_texture(&mut self, binding: u32, texture: &B::Texture, sampler: &B::Sampler);

    fn set_uint(&mut self, binding: u32, value: u32);
}
