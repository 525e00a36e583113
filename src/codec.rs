//! Rasterizer and encoder collaborators.
//!
//! The search loop never touches pixels or containers directly; it goes through these traits so
//! that the native implementations (the `image` crate, lopdf and pdf-writer) can be swapped for
//! other backends or for deterministic test doubles.

use crate::image_processor;
use crate::pdf_processor;
use crate::types::{CompressionError, SourceFormat};
use image::DynamicImage;
use std::sync::{Arc, OnceLock};

/// Largest canvas edge any rasterizer is asked for. Keeps absurd page boxes and upscaled
/// uploads from turning into multi-gigabyte pixel buffers.
pub const MAX_RENDER_DIMENSION: u32 = 10_000;

/// Physical page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// One page image ready to be placed into an output document.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub data: Vec<u8>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub page_size: PageSize,
}

/// A source document opened for repeated page rendering.
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Size of the page at scale 1.0.
    fn native_page_size(&self, page_index: usize) -> Result<PageSize, CompressionError>;

    fn render_page(&self, page_index: usize, scale: f64) -> Result<DynamicImage, CompressionError>;
}

pub trait Rasterizer: Send + Sync {
    fn open_document<'a>(
        &self,
        source: &'a [u8],
    ) -> Result<Box<dyn RasterDocument + 'a>, CompressionError>;

    fn decode_image(&self, source: &[u8]) -> Result<DynamicImage, CompressionError>;

    fn render_image(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CompressionError>;
}

pub trait Encoder: Send + Sync {
    /// `quality` is in `[0, 1]`; lossless formats ignore it.
    fn encode_pixels(
        &self,
        pixels: &DynamicImage,
        format: SourceFormat,
        quality: f64,
    ) -> Result<Vec<u8>, CompressionError>;

    fn assemble_document(&self, pages: &[EncodedPage]) -> Result<Vec<u8>, CompressionError>;
}

/// Default backend: `image` for raster work, lopdf for reading documents, pdf-writer for
/// writing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCodec;

impl Rasterizer for NativeCodec {
    fn open_document<'a>(
        &self,
        source: &'a [u8],
    ) -> Result<Box<dyn RasterDocument + 'a>, CompressionError> {
        Ok(Box::new(pdf_processor::LopdfDocument::load(source)?))
    }

    fn decode_image(&self, source: &[u8]) -> Result<DynamicImage, CompressionError> {
        image_processor::decode_image(source)
    }

    fn render_image(
        &self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CompressionError> {
        Ok(image_processor::resize_image(image, width, height))
    }
}

impl Encoder for NativeCodec {
    fn encode_pixels(
        &self,
        pixels: &DynamicImage,
        format: SourceFormat,
        quality: f64,
    ) -> Result<Vec<u8>, CompressionError> {
        match format {
            SourceFormat::Jpeg => image_processor::encode_jpeg(pixels, quality),
            SourceFormat::Png => image_processor::encode_png(pixels),
            SourceFormat::Pdf => Err(CompressionError::UnsupportedFormat {
                format: "pdf as page image".to_string(),
            }),
        }
    }

    fn assemble_document(&self, pages: &[EncodedPage]) -> Result<Vec<u8>, CompressionError> {
        pdf_processor::assemble_pdf(pages)
    }
}

/// Lazily initialised, injectable holder for a shared collaborator.
///
/// A slot is filled at most once, either explicitly through [`CodecSlot::init`] or on first use
/// through [`CodecSlot::get_or_init`].
pub struct CodecSlot<T: ?Sized> {
    inner: OnceLock<Arc<T>>,
}

impl<T: ?Sized> CodecSlot<T> {
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    pub fn with(value: Arc<T>) -> Self {
        let slot = Self::new();
        let _ = slot.inner.set(value);
        slot
    }

    /// Returns `false` if the slot was already filled; the existing value is kept.
    pub fn init(&self, value: Arc<T>) -> bool {
        self.inner.set(value).is_ok()
    }

    pub fn get(&self) -> Result<Arc<T>, CompressionError> {
        self.inner
            .get()
            .cloned()
            .ok_or(CompressionError::CodecUnavailable)
    }

    pub fn get_or_init(&self, init: impl FnOnce() -> Arc<T>) -> Arc<T> {
        self.inner.get_or_init(init).clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl<T: ?Sized> Default for CodecSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
