//! Common resource types and descriptors.

use bitflags::bitflags;

/// Opaque handle to a GPU resource (image or buffer).
///
/// Handles are issued by the backend that owns the underlying object; the
/// core components (state tracker, index allocator, frame scheduler) only
/// ever hold handles, never the resources themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Create a resource id from a raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Opaque handle to a compiled compute pipeline.
///
/// Pipeline construction and caching is a backend concern; the recorded
/// command stream refers to pipelines by handle only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(u64);

impl PipelineHandle {
    /// Create a pipeline handle from a raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// 2D extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2d {
    /// Create a new extent.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Texture format enumeration.
///
/// Only the formats the sample actually touches; extend as needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
}

impl TextureFormat {
    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8Unorm | Self::Bgra8UnormSrgb => 4,
            Self::Rgba16Float => 8,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be copied from.
        const COPY_SRC = 1 << 0;
        /// Image can be copied to.
        const COPY_DST = 1 << 1;
        /// Image can be sampled in a shader.
        const SAMPLED = 1 << 2;
        /// Image can be written as a storage image.
        const STORAGE = 1 << 3;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a 2D image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Size of the image.
    pub extent: Extent2d,
    /// Texel format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: ImageUsage,
}

impl ImageDesc {
    /// Create a new 2D image descriptor.
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: ImageUsage) -> Self {
        Self {
            label: None,
            extent: Extent2d::new(width, height),
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Preset sampler configurations.
///
/// The sample never needs arbitrary sampler descriptors; a small fixed
/// preset table covers it, and presets double as the identity key for the
/// sampler descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerPreset {
    /// Linear filtering, clamp to edge.
    LinearClamp,
    /// Linear filtering, repeat.
    LinearWrap,
    /// Nearest filtering, clamp to edge.
    PointClamp,
    /// Nearest filtering, repeat.
    PointWrap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_roundtrip() {
        let id = ResourceId::from_raw(42);
        assert_eq!(id.raw(), 42);
    }

    #[test]
    fn test_format_block_size() {
        assert_eq!(TextureFormat::Rgba8Unorm.block_size(), 4);
        assert_eq!(TextureFormat::Rgba16Float.block_size(), 8);
    }

    #[test]
    fn test_image_desc_builder() {
        let desc = ImageDesc::new(
            640,
            480,
            TextureFormat::Bgra8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        )
        .with_label("source");

        assert_eq!(desc.label.as_deref(), Some("source"));
        assert_eq!(desc.extent, Extent2d::new(640, 480));
        assert!(desc.usage.contains(ImageUsage::SAMPLED));
    }
}
