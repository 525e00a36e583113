use crate::codec::{Encoder, NativeCodec, Rasterizer, MAX_RENDER_DIMENSION};
use crate::estimator::{estimate_image_parameters, scaled_dimensions};
use crate::search::{AdjustContext, CancellationToken, IterativeSearch, RenderStrategy};
use crate::types::*;
use crate::utils::{detect_format, format_file_size};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;

pub struct ImageProcessor {
    settings: ImageSettings,
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            settings: ImageSettings::default(),
        }
    }

    pub fn with_settings(settings: ImageSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    /// Compress a JPEG or PNG to roughly `target` `unit`s using the built-in codecs.
    pub fn compress_image_to_target(
        &self,
        content: &[u8],
        target: f64,
        unit: SizeUnit,
    ) -> Result<CompressionOutcome, CompressionError> {
        let target_size = unit.to_bytes(target)?;
        self.compress(&NativeCodec, &NativeCodec, content, target_size, None, &mut |_| {})
    }

    /// Run the search with explicit collaborators. The output keeps the source's format.
    pub fn compress(
        &self,
        rasterizer: &dyn Rasterizer,
        encoder: &dyn Encoder,
        content: &[u8],
        target_size: u64,
        cancel: Option<&CancellationToken>,
        on_attempt: &mut dyn FnMut(&AttemptRecord),
    ) -> Result<CompressionOutcome, CompressionError> {
        let request = CompressionRequest::new(content, target_size, self.settings.search.tolerance, 1)?;

        let format = detect_format(content)?;
        if format == SourceFormat::Pdf {
            return Err(CompressionError::UnsupportedFormat {
                format: "pdf passed to the image compressor".to_string(),
            });
        }

        let source = rasterizer.decode_image(content)?;
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(CompressionError::decode("image has no pixels"));
        }

        log::info!(
            "Compressing {:?} image {}x{} from {} to {}",
            format,
            width,
            height,
            format_file_size(request.original_size),
            format_file_size(request.target_size)
        );

        let mut advisories = Vec::new();
        if request.target_size >= request.original_size {
            log::warn!(
                "Target {} is not smaller than the original {}",
                format_file_size(request.target_size),
                format_file_size(request.original_size)
            );
            advisories.push(Advisory::TargetExceedsOriginal {
                original_size: request.original_size,
                target_size: request.target_size,
            });
        }

        let initial =
            estimate_image_parameters(&self.settings, request.original_size, request.target_size);
        let mut strategy = ImageRenderStrategy {
            rasterizer,
            encoder,
            source: &source,
            native: (width, height),
            format,
            settings: &self.settings,
        };

        let outcome = IterativeSearch::new(&self.settings.search, request.target_size)
            .with_cancellation(cancel)
            .run(&mut strategy, initial, |record| on_attempt(record))?;

        Ok(outcome.into_compression_outcome(&request, advisories))
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Dimensions are the primary lever; quality only drops once the attempt budget is half spent
/// and the output is still too large.
pub struct ImageRenderStrategy<'a> {
    rasterizer: &'a dyn Rasterizer,
    encoder: &'a dyn Encoder,
    source: &'a DynamicImage,
    native: (u32, u32),
    format: SourceFormat,
    settings: &'a ImageSettings,
}

impl ImageRenderStrategy<'_> {
    /// Scale range for this image once the search is running. The floor is where the shorter
    /// side reaches `min_dimension`; the ceiling keeps the longer side within
    /// `MAX_RENDER_DIMENSION`.
    pub fn scale_bounds(&self) -> ParameterBounds {
        let (width, height) = self.native;
        let shorter = width.min(height).max(1) as f64;
        let longer = width.max(height).max(1) as f64;

        let max = self
            .settings
            .search
            .scale
            .max
            .min(MAX_RENDER_DIMENSION as f64 / longer);
        let min = (self.settings.min_dimension as f64 / shorter).min(max);
        ParameterBounds::new(min, max)
    }

    pub fn dimensions_for(&self, scale: f64) -> (u32, u32) {
        let scale = self.scale_bounds().clamp(scale);
        scaled_dimensions(self.native.0, self.native.1, scale, self.settings.min_dimension)
    }
}

impl RenderStrategy for ImageRenderStrategy<'_> {
    fn render(&mut self, parameters: &CompressionParameters) -> Result<Vec<u8>, CompressionError> {
        let (width, height) = self.dimensions_for(parameters.scale);
        let pixels = self.rasterizer.render_image(self.source, width, height)?;
        let encoded = self
            .encoder
            .encode_pixels(&pixels, self.format, parameters.quality)?;
        drop(pixels);

        log::debug!(
            "Encoded {}x{} {:?} at quality {:.2}: {} bytes",
            width,
            height,
            self.format,
            parameters.quality,
            encoded.len()
        );
        Ok(encoded)
    }

    fn adjust(
        &self,
        parameters: CompressionParameters,
        context: &AdjustContext<'_>,
    ) -> CompressionParameters {
        let mut next = CompressionParameters {
            scale: parameters.scale * context.scale_factor(),
            ..parameters
        };

        if self.format.is_lossy()
            && context.is_over()
            && context.attempt >= self.settings.quality_fallback_after
        {
            next.quality = (parameters.quality - self.settings.quality_step)
                .max(self.settings.search.quality.min);
        }

        next
    }

    fn clamp(
        &self,
        parameters: CompressionParameters,
        settings: &SearchSettings,
    ) -> CompressionParameters {
        CompressionParameters {
            quality: settings.quality.clamp(parameters.quality),
            scale: self.scale_bounds().clamp(parameters.scale),
        }
    }
}

pub fn decode_image(content: &[u8]) -> Result<DynamicImage, CompressionError> {
    image::load_from_memory(content)
        .map_err(|e| CompressionError::decode(format!("failed to decode image: {}", e)))
}

pub fn resize_image(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    img.resize_exact(width, height, FilterType::Triangle)
}

/// Encode as baseline JPEG. `quality` in `[0, 1]` maps onto the encoder's 1-100 scale.
pub fn encode_jpeg(img: &DynamicImage, quality: f64) -> Result<Vec<u8>, CompressionError> {
    let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut output = Vec::new();
    let mut cursor = Cursor::new(&mut output);

    // JPEG has no alpha channel.
    let result = match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => {
            img.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))
        }
        _ => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut cursor, ImageOutputFormat::Jpeg(quality)),
    };
    result.map_err(|e| CompressionError::encode(format!("JPEG encoding failed: {}", e)))?;

    Ok(output)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, CompressionError> {
    let mut output = Vec::new();
    let mut cursor = Cursor::new(&mut output);

    img.write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| CompressionError::encode(format!("PNG encoding failed: {}", e)))?;
    Ok(output)
}
