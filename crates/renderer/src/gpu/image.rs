use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use super::buffer::{BufferError, BufferKind, GpuBuffer};
use super::context::GpuContext;

/// Channel layout of one texel as it crosses the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferLayout {
    R,
    Rg,
    Rgba,
}

impl TransferLayout {
    pub fn channels(self) -> u32 {
        match self {
            TransferLayout::R => 1,
            TransferLayout::Rg => 2,
            TransferLayout::Rgba => 4,
        }
    }
}

/// Scalar type of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    UnsignedByte,
    HalfFloat,
    Float,
}

impl ComponentType {
    pub fn size(self) -> u32 {
        match self {
            ComponentType::UnsignedByte => 1,
            ComponentType::HalfFloat => 2,
            ComponentType::Float => 4,
        }
    }
}

/// Internal format plus how texels are laid out when uploaded or read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    internal: wgpu::TextureFormat,
    layout: TransferLayout,
    component: ComponentType,
}

impl PixelFormat {
    /// Eight-bit normalised RGBA.
    pub const RGBA8: PixelFormat = PixelFormat {
        internal: wgpu::TextureFormat::Rgba8Unorm,
        layout: TransferLayout::Rgba,
        component: ComponentType::UnsignedByte,
    };

    /// Half-float RGBA.
    pub const RGBA16F: PixelFormat = PixelFormat {
        internal: wgpu::TextureFormat::Rgba16Float,
        layout: TransferLayout::Rgba,
        component: ComponentType::HalfFloat,
    };

    /// Checks that the transfer description has the same texel size as the
    /// internal format.
    pub fn new(
        internal: wgpu::TextureFormat,
        layout: TransferLayout,
        component: ComponentType,
    ) -> Result<Self, ImageError> {
        let format = Self {
            internal,
            layout,
            component,
        };
        match internal.block_copy_size(None) {
            Some(size) if size == format.bytes_per_texel() => Ok(format),
            _ => Err(ImageError::FormatMismatch {
                internal,
                transfer_bytes: format.bytes_per_texel(),
            }),
        }
    }

    pub fn internal(self) -> wgpu::TextureFormat {
        self.internal
    }

    pub fn layout(self) -> TransferLayout {
        self.layout
    }

    pub fn component(self) -> ComponentType {
        self.component
    }

    pub fn bytes_per_texel(self) -> u32 {
        self.layout.channels() * self.component.size()
    }

    /// The storage-image format a program must declare to write this format.
    pub fn storage_format(self) -> Option<wgpu::naga::StorageFormat> {
        use wgpu::naga::StorageFormat;
        let format = match self.internal {
            wgpu::TextureFormat::R8Unorm => StorageFormat::R8Unorm,
            wgpu::TextureFormat::Rg8Unorm => StorageFormat::Rg8Unorm,
            wgpu::TextureFormat::Rgba8Unorm => StorageFormat::Rgba8Unorm,
            wgpu::TextureFormat::R16Float => StorageFormat::R16Float,
            wgpu::TextureFormat::Rg16Float => StorageFormat::Rg16Float,
            wgpu::TextureFormat::Rgba16Float => StorageFormat::Rgba16Float,
            wgpu::TextureFormat::R32Float => StorageFormat::R32Float,
            wgpu::TextureFormat::Rg32Float => StorageFormat::Rg32Float,
            wgpu::TextureFormat::Rgba32Float => StorageFormat::Rgba32Float,
            _ => return None,
        };
        Some(format)
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::RGBA8
    }
}

/// Process-unique identifier of one image allocation.
///
/// A fresh handle is issued every time storage is (re)allocated, so a changed
/// handle is how bind groups notice they are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(NonZeroU64);

impl ImageHandle {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let raw = NEXT.fetch_add(1, Ordering::Relaxed);
        // The counter starts at one and would need 2^64 allocations to wrap.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image '{label}' has zero size ({width}x{height})")]
    ZeroSize {
        label: String,
        width: u32,
        height: u32,
    },
    #[error("image '{label}' is {width}x{height} but the device limit is {max}")]
    TooLarge {
        label: String,
        width: u32,
        height: u32,
        max: u32,
    },
    #[error("texture format {internal:?} does not hold {transfer_bytes} bytes per texel")]
    FormatMismatch {
        internal: wgpu::TextureFormat,
        transfer_bytes: u32,
    },
    #[error("image '{label}' could not be allocated: {message}")]
    Allocation { label: String, message: String },
    #[error("image '{label}' has no storage")]
    Invalid { label: String },
    #[error("texel is {actual} bytes, format expects {expected}")]
    TexelSize { expected: u32, actual: usize },
    #[error(transparent)]
    Readback(#[from] BufferError),
}

/// Usage an image is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUsage {
    /// Written by compute, sampled by the present pass.
    Storage,
    /// Colour attachment for offscreen presentation.
    RenderTarget,
}

impl ImageUsage {
    fn flags(self) -> wgpu::TextureUsages {
        let common = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        match self {
            ImageUsage::Storage => common | wgpu::TextureUsages::STORAGE_BINDING,
            ImageUsage::RenderTarget => common | wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }
}

struct Storage {
    handle: ImageHandle,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// A 2-D device image that owns its storage.
///
/// When allocation fails the image is left without storage: its handle is
/// `None` and every operation on it is a no-op or returns
/// [`ImageError::Invalid`].
pub struct GpuImage {
    label: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    usage: ImageUsage,
    storage: Option<Storage>,
}

impl fmt::Debug for GpuImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuImage")
            .field("label", &self.label)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("handle", &self.handle())
            .finish()
    }
}

impl GpuImage {
    pub fn new(
        context: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ImageError> {
        Self::with_usage(context, label, width, height, format, ImageUsage::Storage)
    }

    pub fn render_target(
        context: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, ImageError> {
        Self::with_usage(context, label, width, height, format, ImageUsage::RenderTarget)
    }

    /// An image description with no storage behind it; the state a failed
    /// allocation leaves behind. [`GpuImage::resize`] can still allocate it.
    pub fn unallocated(label: &str, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            label: label.to_string(),
            width,
            height,
            format,
            usage: ImageUsage::Storage,
            storage: None,
        }
    }

    fn with_usage(
        context: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: ImageUsage,
    ) -> Result<Self, ImageError> {
        let mut image = Self {
            label: label.to_string(),
            width,
            height,
            format,
            usage,
            storage: None,
        };
        image.storage = Some(image.allocate(context)?);
        tracing::debug!(label, width, height, format = ?format.internal(), "created image");
        Ok(image)
    }

    /// Releases the current storage and allocates `width x height` with the
    /// same format. Contents are not preserved.
    ///
    /// On failure the image is left invalid.
    pub fn resize(&mut self, context: &GpuContext, width: u32, height: u32) -> Result<(), ImageError> {
        let previous = self.storage.take();
        drop(previous);
        self.width = width;
        self.height = height;
        let storage = self.allocate(context)?;
        tracing::debug!(
            label = %self.label,
            width,
            height,
            handle = %storage.handle,
            "resized image"
        );
        self.storage = Some(storage);
        Ok(())
    }

    fn allocate(&self, context: &GpuContext) -> Result<Storage, ImageError> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(ImageError::ZeroSize {
                label: self.label.clone(),
                width,
                height,
            });
        }
        let max = context.limits.max_texture_dimension_2d;
        if width > max || height > max {
            return Err(ImageError::TooLarge {
                label: self.label.clone(),
                width,
                height,
                max,
            });
        }

        let (texture, error) = context.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&self.label),
                size: extent(width, height),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.format.internal(),
                usage: self.usage.flags(),
                view_formats: &[],
            })
        });
        if let Some(error) = error {
            tracing::error!(label = %self.label, width, height, %error, "image allocation failed");
            return Err(ImageError::Allocation {
                label: self.label.clone(),
                message: error.to_string(),
            });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Storage {
            handle: ImageHandle::next(),
            texture,
            view,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn handle(&self) -> Option<ImageHandle> {
        self.storage.as_ref().map(|storage| storage.handle)
    }

    pub fn is_valid(&self) -> bool {
        self.storage.is_some()
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.storage.as_ref().map(|storage| &storage.view)
    }

    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.storage.as_ref().map(|storage| &storage.texture)
    }

    pub fn size_in_bytes(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_texel())
    }

    /// Fills every texel with `texel`, given in the transfer layout.
    pub fn fill_solid(&self, context: &GpuContext, texel: &[u8]) -> Result<(), ImageError> {
        let storage = self.storage.as_ref().ok_or_else(|| ImageError::Invalid {
            label: self.label.clone(),
        })?;
        let expected = self.format.bytes_per_texel();
        if texel.len() != expected as usize {
            return Err(ImageError::TexelSize {
                expected,
                actual: texel.len(),
            });
        }

        let data = texel.repeat((self.width * self.height) as usize);
        context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * expected),
                rows_per_image: Some(self.height),
            },
            extent(self.width, self.height),
        );
        Ok(())
    }

    /// Copies the image back to the host, tightly packed row by row.
    ///
    /// Submits its own copy and blocks until it completes, so everything
    /// submitted before the call is reflected in the result.
    pub fn read_back(&self, context: &GpuContext) -> Result<Vec<u8>, ImageError> {
        let storage = self.storage.as_ref().ok_or_else(|| ImageError::Invalid {
            label: self.label.clone(),
        })?;
        let row_bytes = self.width * self.format.bytes_per_texel();
        let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_len = u64::from(padded_row_bytes) * u64::from(self.height);

        let readback = GpuBuffer::new(
            context,
            &format!("{} readback", self.label),
            BufferKind::Readback,
            padded_len,
        )?;

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("image readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &storage.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: readback.raw(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            extent(self.width, self.height),
        );
        context.queue.submit(Some(encoder.finish()));

        let padded = readback.read(context, padded_len)?;
        let mut pixels = Vec::with_capacity(self.size_in_bytes() as usize);
        for row in padded.chunks(padded_row_bytes as usize) {
            pixels.extend_from_slice(&row[..row_bytes as usize]);
        }
        Ok(pixels)
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}
