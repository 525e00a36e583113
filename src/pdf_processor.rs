use crate::codec::{
    EncodedPage, Encoder, NativeCodec, PageSize, RasterDocument, Rasterizer, MAX_RENDER_DIMENSION,
};
use crate::estimator::estimate_document_parameters;
use crate::image_processor::resize_image;
use crate::search::{AdjustContext, CancellationToken, IterativeSearch, RenderStrategy};
use crate::types::*;
use crate::utils::{detect_format, format_file_size};
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document as PdfDocument, Object, ObjectId, Stream};
use pdf_writer::{Content, Filter, Finish, Name, Pdf, Rect, Ref};

/// US Letter, used when a page carries no MediaBox anywhere up its tree.
const DEFAULT_PAGE_SIZE: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

const MAX_INHERITANCE_DEPTH: usize = 32;

pub struct PdfProcessor {
    settings: DocumentSettings,
}

impl PdfProcessor {
    pub fn new() -> Self {
        Self {
            settings: DocumentSettings::default(),
        }
    }

    pub fn with_settings(settings: DocumentSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    /// Rasterize every page and re-encode until the PDF is roughly `target` `unit`s.
    pub fn compress_document_to_target(
        &self,
        content: &[u8],
        target: f64,
        unit: SizeUnit,
    ) -> Result<CompressionOutcome, CompressionError> {
        let target_size = unit.to_bytes(target)?;
        self.compress(&NativeCodec, &NativeCodec, content, target_size, None, &mut |_| {})
    }

    pub fn compress(
        &self,
        rasterizer: &dyn Rasterizer,
        encoder: &dyn Encoder,
        content: &[u8],
        target_size: u64,
        cancel: Option<&CancellationToken>,
        on_attempt: &mut dyn FnMut(&AttemptRecord),
    ) -> Result<CompressionOutcome, CompressionError> {
        let request =
            CompressionRequest::new(content, target_size, self.settings.search.tolerance, 1)?;

        let format = detect_format(content)?;
        if format != SourceFormat::Pdf {
            return Err(CompressionError::UnsupportedFormat {
                format: format!("{:?} passed to the document compressor", format).to_lowercase(),
            });
        }

        let document = rasterizer.open_document(content)?;
        let request = request.with_page_count(document.page_count())?;

        // Output pages keep the source's physical size whatever scale the search settles on.
        let page_sizes = (0..request.page_count)
            .map(|index| document.native_page_size(index))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Compressing {}-page PDF from {} to {}",
            request.page_count,
            format_file_size(request.original_size),
            format_file_size(request.target_size)
        );

        let mut advisories = Vec::new();
        if request.target_size >= request.original_size {
            log::warn!(
                "Target {} is not smaller than the original {}; output may grow",
                format_file_size(request.target_size),
                format_file_size(request.original_size)
            );
            advisories.push(Advisory::TargetExceedsOriginal {
                original_size: request.original_size,
                target_size: request.target_size,
            });
        }

        let initial = estimate_document_parameters(
            &self.settings,
            request.original_size,
            request.target_size,
        );
        let mut strategy = DocumentRenderStrategy {
            document: document.as_ref(),
            encoder,
            page_sizes,
            settings: &self.settings,
        };

        let outcome = IterativeSearch::new(&self.settings.search, request.target_size)
            .with_cancellation(cancel)
            .run(&mut strategy, initial, |record| on_attempt(record))?;

        Ok(outcome.into_compression_outcome(&request, advisories))
    }
}

impl Default for PdfProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spends JPEG quality first and only touches render scale once quality is pinned at a bound.
pub struct DocumentRenderStrategy<'a> {
    document: &'a dyn RasterDocument,
    encoder: &'a dyn Encoder,
    page_sizes: Vec<PageSize>,
    settings: &'a DocumentSettings,
}

impl RenderStrategy for DocumentRenderStrategy<'_> {
    fn render(&mut self, parameters: &CompressionParameters) -> Result<Vec<u8>, CompressionError> {
        let mut pages = Vec::with_capacity(self.page_sizes.len());

        for (index, page_size) in self.page_sizes.iter().enumerate() {
            let pixels = match self.document.render_page(index, parameters.scale)? {
                pixels @ DynamicImage::ImageRgb8(_) => pixels,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
            let (pixel_width, pixel_height) = (pixels.width(), pixels.height());
            let data = self
                .encoder
                .encode_pixels(&pixels, SourceFormat::Jpeg, parameters.quality)?;
            // Only the encoded page survives into the next step.
            drop(pixels);

            pages.push(EncodedPage {
                data,
                pixel_width,
                pixel_height,
                page_size: *page_size,
            });
        }

        self.encoder.assemble_document(&pages)
    }

    fn adjust(
        &self,
        parameters: CompressionParameters,
        context: &AdjustContext<'_>,
    ) -> CompressionParameters {
        let quality = self.settings.search.quality;
        let mut next = parameters;

        let quality_has_room = if context.is_over() {
            parameters.quality > quality.min
        } else {
            parameters.quality < quality.max
        };

        if quality_has_room {
            next.quality = parameters.quality * context.quality_factor();
        } else {
            next.scale = parameters.scale * context.scale_factor();
        }

        next
    }
}

/// Document backed by lopdf. Pages are rasterized from their embedded images, which covers
/// scanned documents; pages drawn with vector operators need a full renderer injected
/// through [`Rasterizer`].
pub struct LopdfDocument {
    doc: PdfDocument,
    pages: Vec<ObjectId>,
}

impl LopdfDocument {
    pub fn load(content: &[u8]) -> Result<Self, CompressionError> {
        let doc = PdfDocument::load_mem(content)
            .map_err(|e| CompressionError::decode(format!("failed to load PDF: {}", e)))?;

        if doc.is_encrypted() {
            return Err(CompressionError::decode("encrypted PDFs are not supported"));
        }

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(CompressionError::decode("PDF has no pages"));
        }

        Ok(Self { doc, pages })
    }

    fn resolve<'b>(&'b self, object: &'b Object) -> Result<&'b Object, CompressionError> {
        match object {
            Object::Reference(id) => self.doc.get_object(*id).map_err(|e| {
                CompressionError::decode(format!("dangling reference {:?}: {}", id, e))
            }),
            other => Ok(other),
        }
    }

    fn page_dictionary(&self, page_index: usize) -> Result<&Dictionary, CompressionError> {
        let id = self.pages.get(page_index).ok_or_else(|| {
            CompressionError::invalid_input(format!(
                "page index {} out of range (document has {} pages)",
                page_index,
                self.pages.len()
            ))
        })?;

        self.doc
            .get_dictionary(*id)
            .map_err(|e| CompressionError::decode(format!("page {}: {}", page_index + 1, e)))
    }

    /// Look up an inheritable page attribute, walking `/Parent` links.
    fn inherited<'b>(&'b self, page: &'b Dictionary, key: &[u8]) -> Option<&'b Object> {
        let mut current = page;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = current.get(key) {
                return self.resolve(value).ok();
            }
            let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
            current = self.doc.get_dictionary(parent).ok()?;
        }
        None
    }

    fn largest_image(&self, page_index: usize) -> Result<Option<&Stream>, CompressionError> {
        let page = self.page_dictionary(page_index)?;
        let Some(resources) = self.inherited(page, b"Resources") else {
            return Ok(None);
        };
        let Ok(resources) = resources.as_dict() else {
            return Ok(None);
        };
        let Ok(xobjects) = resources.get(b"XObject") else {
            return Ok(None);
        };
        let Ok(xobjects) = self.resolve(xobjects)?.as_dict() else {
            return Ok(None);
        };

        let mut best: Option<(&Stream, i64)> = None;
        for (_, object) in xobjects.iter() {
            let Ok(stream) = self.resolve(object)?.as_stream() else {
                continue;
            };
            if !matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image") {
                continue;
            }
            let area = dict_integer(&stream.dict, b"Width").unwrap_or(0)
                * dict_integer(&stream.dict, b"Height").unwrap_or(0);
            if best.map_or(true, |(_, best_area)| area > best_area) {
                best = Some((stream, area));
            }
        }

        Ok(best.map(|(stream, _)| stream))
    }

    fn decode_image_stream(&self, stream: &Stream) -> Result<DynamicImage, CompressionError> {
        let filters = stream_filters(&stream.dict);
        let width = dict_integer(&stream.dict, b"Width").unwrap_or(0);
        let height = dict_integer(&stream.dict, b"Height").unwrap_or(0);
        if width <= 0 || height <= 0 {
            return Err(CompressionError::decode("image XObject without dimensions"));
        }

        match filters.as_slice() {
            [only] if only.as_slice() == b"DCTDecode" => {
                image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
                    .map_err(|e| CompressionError::decode(format!("embedded JPEG: {}", e)))
            }
            [] | [_] => {
                let raw = if filters.is_empty() {
                    stream.content.clone()
                } else {
                    stream.decompressed_content().map_err(|e| {
                        CompressionError::decode(format!("embedded image stream: {}", e))
                    })?
                };
                self.raw_pixels_to_image(&stream.dict, raw, width as u32, height as u32)
            }
            _ => Err(CompressionError::decode(format!(
                "unsupported image filter chain {:?}",
                filters
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).into_owned())
                    .collect::<Vec<_>>()
            ))),
        }
    }

    fn raw_pixels_to_image(
        &self,
        dict: &Dictionary,
        mut raw: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage, CompressionError> {
        if dict_integer(dict, b"BitsPerComponent").unwrap_or(8) != 8 {
            return Err(CompressionError::decode(
                "only 8-bit embedded images can be rasterized",
            ));
        }

        let components = self.color_components(dict)?;
        let expected = width as usize * height as usize * components;
        if raw.len() < expected {
            return Err(CompressionError::decode(format!(
                "embedded image has {} bytes, expected {}",
                raw.len(),
                expected
            )));
        }
        raw.truncate(expected);

        let image = match components {
            1 => GrayImage::from_raw(width, height, raw).map(DynamicImage::ImageLuma8),
            _ => RgbImage::from_raw(width, height, raw).map(DynamicImage::ImageRgb8),
        };
        image.ok_or_else(|| CompressionError::decode("embedded image buffer mismatch"))
    }

    fn color_components(&self, dict: &Dictionary) -> Result<usize, CompressionError> {
        let color_space = dict
            .get(b"ColorSpace")
            .map_err(|_| CompressionError::decode("embedded image without colour space"))?;

        match self.resolve(color_space)? {
            Object::Name(name) if name == b"DeviceRGB" => Ok(3),
            Object::Name(name) if name == b"DeviceGray" => Ok(1),
            Object::Array(items) if matches!(items.first(), Some(Object::Name(n)) if n == b"ICCBased") => {
                let profile = items
                    .get(1)
                    .ok_or_else(|| CompressionError::decode("ICCBased colour space without profile"))?;
                let profile = self.resolve(profile)?.as_stream().map_err(|_| {
                    CompressionError::decode("ICCBased profile is not a stream")
                })?;
                match dict_integer(&profile.dict, b"N") {
                    Some(1) => Ok(1),
                    Some(3) => Ok(3),
                    other => Err(CompressionError::decode(format!(
                        "unsupported ICC component count {:?}",
                        other
                    ))),
                }
            }
            other => Err(CompressionError::decode(format!(
                "unsupported colour space {:?}",
                other
            ))),
        }
    }
}

impl RasterDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn native_page_size(&self, page_index: usize) -> Result<PageSize, CompressionError> {
        let page = self.page_dictionary(page_index)?;
        let Some(Object::Array(media_box)) = self.inherited(page, b"MediaBox") else {
            return Ok(DEFAULT_PAGE_SIZE);
        };

        let corners: Vec<f32> = media_box
            .iter()
            .filter_map(|value| self.resolve(value).ok().and_then(as_number))
            .collect();
        match corners.as_slice() {
            [x1, y1, x2, y2] if (x2 - x1).abs() > 0.0 && (y2 - y1).abs() > 0.0 => Ok(PageSize {
                width: (x2 - x1).abs(),
                height: (y2 - y1).abs(),
            }),
            _ => Err(CompressionError::decode(format!(
                "page {} has a malformed MediaBox",
                page_index + 1
            ))),
        }
    }

    fn render_page(&self, page_index: usize, scale: f64) -> Result<DynamicImage, CompressionError> {
        let size = self.native_page_size(page_index)?;
        let width = render_dimension(size.width, scale);
        let height = render_dimension(size.height, scale);

        let stream = self.largest_image(page_index)?.ok_or_else(|| {
            CompressionError::decode(format!(
                "page {} has no raster content to render",
                page_index + 1
            ))
        })?;
        let pixels = self.decode_image_stream(stream)?;

        Ok(resize_image(&pixels, width, height))
    }
}

fn render_dimension(points: f32, scale: f64) -> u32 {
    let pixels = (points as f64 * scale).round();
    if pixels.is_finite() {
        (pixels as u32).clamp(1, MAX_RENDER_DIMENSION)
    } else {
        1
    }
}

fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn dict_integer(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict.get(key).ok()? {
        Object::Integer(value) => Some(*value),
        Object::Real(value) => Some(*value as i64),
        _ => None,
    }
}

fn stream_filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Build a PDF with one full-bleed JPEG per page. Pages must hold baseline RGB JPEG data.
pub fn assemble_pdf(pages: &[EncodedPage]) -> Result<Vec<u8>, CompressionError> {
    if pages.is_empty() {
        return Err(CompressionError::encode("cannot assemble a PDF without pages"));
    }

    let mut pdf = Pdf::new();
    let catalog_id = Ref::new(1);
    let page_tree_id = Ref::new(2);
    // Three objects per page: page, image, content stream.
    let object_id = |index: usize, offset: i32| Ref::new(3 + 3 * index as i32 + offset);
    let page_ids: Vec<Ref> = (0..pages.len()).map(|index| object_id(index, 0)).collect();
    let image_name = Name(b"Im0");

    pdf.catalog(catalog_id).pages(page_tree_id);
    pdf.pages(page_tree_id)
        .kids(page_ids.iter().copied())
        .count(pages.len() as i32);

    for (index, page) in pages.iter().enumerate() {
        let PageSize { width, height } = page.page_size;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(CompressionError::encode(format!(
                "page {} has invalid size {}x{}",
                index + 1,
                width,
                height
            )));
        }
        if page.pixel_width == 0 || page.pixel_height == 0 || page.data.is_empty() {
            return Err(CompressionError::encode(format!(
                "page {} has no image data",
                index + 1
            )));
        }

        let image_id = object_id(index, 1);
        let content_id = object_id(index, 2);

        let mut page_writer = pdf.page(page_ids[index]);
        page_writer.media_box(Rect::new(0.0, 0.0, width, height));
        page_writer.parent(page_tree_id);
        page_writer.contents(content_id);
        page_writer.resources().x_objects().pair(image_name, image_id);
        page_writer.finish();

        let mut image = pdf.image_xobject(image_id, &page.data);
        image.filter(Filter::DctDecode);
        image.width(page.pixel_width as i32);
        image.height(page.pixel_height as i32);
        image.color_space().device_rgb();
        image.bits_per_component(8);
        image.finish();

        // Stretch the unit-square image over the whole page.
        let mut content = Content::new();
        content.save_state();
        content.transform([width, 0.0, 0.0, height, 0.0, 0.0]);
        content.x_object(image_name);
        content.restore_state();
        pdf.stream(content_id, &content.finish());
    }

    Ok(pdf.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processor::encode_jpeg;
    use image::Rgb;

    const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };
    const A4: PageSize = PageSize {
        width: 595.0,
        height: 842.0,
    };

    fn noisy_page(width: u32, height: u32, seed: u32) -> DynamicImage {
        let mut state = seed;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let noise = (state >> 16) as u8;
            Rgb([noise, (x as u8).wrapping_add(noise / 4), (y as u8) ^ noise])
        }))
    }

    fn scanned_pdf(pages: &[(PageSize, (u32, u32))]) -> Vec<u8> {
        let encoded: Vec<EncodedPage> = pages
            .iter()
            .enumerate()
            .map(|(index, (page_size, (w, h)))| EncodedPage {
                data: encode_jpeg(&noisy_page(*w, *h, index as u32 + 7), 0.95).unwrap(),
                pixel_width: *w,
                pixel_height: *h,
                page_size: *page_size,
            })
            .collect();
        assemble_pdf(&encoded).unwrap()
    }

    /// Fixed page sizes; every render is a blank canvas of the scaled size.
    struct BlankDocument {
        sizes: Vec<PageSize>,
    }

    impl RasterDocument for BlankDocument {
        fn page_count(&self) -> usize {
            self.sizes.len()
        }

        fn native_page_size(&self, page_index: usize) -> Result<PageSize, CompressionError> {
            Ok(self.sizes[page_index])
        }

        fn render_page(
            &self,
            page_index: usize,
            scale: f64,
        ) -> Result<DynamicImage, CompressionError> {
            let size = self.sizes[page_index];
            Ok(DynamicImage::new_rgb8(
                render_dimension(size.width, scale),
                render_dimension(size.height, scale),
            ))
        }
    }

    struct BlankRasterizer {
        sizes: Vec<PageSize>,
    }

    impl Rasterizer for BlankRasterizer {
        fn open_document<'a>(
            &self,
            _: &'a [u8],
        ) -> Result<Box<dyn RasterDocument + 'a>, CompressionError> {
            Ok(Box::new(BlankDocument {
                sizes: self.sizes.clone(),
            }))
        }

        fn decode_image(&self, _: &[u8]) -> Result<DynamicImage, CompressionError> {
            Err(CompressionError::decode("not an image"))
        }

        fn render_image(
            &self,
            image: &DynamicImage,
            _: u32,
            _: u32,
        ) -> Result<DynamicImage, CompressionError> {
            Ok(image.clone())
        }
    }

    /// Page bytes grow with pixel area times quality; the container adds nothing.
    struct AreaQualityEncoder {
        bytes_per_pixel: f64,
    }

    impl Encoder for AreaQualityEncoder {
        fn encode_pixels(
            &self,
            pixels: &DynamicImage,
            _: SourceFormat,
            quality: f64,
        ) -> Result<Vec<u8>, CompressionError> {
            let area = (pixels.width() * pixels.height()) as f64;
            Ok(vec![0; (area * quality * self.bytes_per_pixel).round() as usize])
        }

        fn assemble_document(&self, pages: &[EncodedPage]) -> Result<Vec<u8>, CompressionError> {
            Ok(vec![0; pages.iter().map(|p| p.data.len()).sum()])
        }
    }

    fn fake_pdf(len: usize) -> Vec<u8> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(len, 0);
        bytes
    }

    /// Calibrated so quality 0.85 at scale 1.0 reproduces the original size.
    fn calibrated_encoder(sizes: &[PageSize], original_len: usize) -> AreaQualityEncoder {
        let area: f64 = sizes
            .iter()
            .map(|s| (s.width as f64).round() * (s.height as f64).round())
            .sum();
        AreaQualityEncoder {
            bytes_per_pixel: original_len as f64 / (area * 0.85),
        }
    }

    fn run_mock(sizes: Vec<PageSize>, original_len: usize, target_size: u64) -> CompressionOutcome {
        let encoder = calibrated_encoder(&sizes, original_len);
        let rasterizer = BlankRasterizer { sizes };
        PdfProcessor::new()
            .compress(
                &rasterizer,
                &encoder,
                &fake_pdf(original_len),
                target_size,
                None,
                &mut |_| {},
            )
            .unwrap()
    }

    #[test]
    fn three_megabytes_to_five_hundred_kilobytes() {
        let kb = 1024u64;
        let outcome = run_mock(vec![LETTER, LETTER], 3 * 1024 * 1024, 500 * kb);

        assert!(outcome.within_tolerance);
        assert!(outcome.actual_size >= 475 * kb && outcome.actual_size <= 525 * kb);
        assert!(outcome.attempt_count <= 10);
        assert_eq!(outcome.history[0].parameters.quality, 0.15);
        assert_eq!(outcome.history[0].parameters.scale, 1.0);
    }

    #[test]
    fn recompressing_an_on_target_document_is_stable() {
        let target = 500 * 1024;
        let first = run_mock(vec![LETTER, LETTER], 3 * 1024 * 1024, target);
        assert!(first.within_tolerance);

        // The encoder is recalibrated on the new input, so re-rendering at the estimated
        // parameters reproduces its size.
        let second = run_mock(vec![LETTER, LETTER], first.bytes.len(), target);
        assert!(second.within_tolerance);
        assert!(second.attempt_count <= 2);
        assert_eq!(second.history[0].parameters.quality, 0.85);
        assert_eq!(second.history[0].parameters.scale, 1.0);
    }

    #[test]
    fn quality_is_exhausted_before_scale_drops() {
        let outcome = run_mock(vec![LETTER, A4], 3 * 1024 * 1024, 1024);

        assert_eq!(outcome.attempt_count, 10);
        assert!(!outcome.within_tolerance);
        for pair in outcome.history.windows(2) {
            if pair[1].parameters.scale != pair[0].parameters.scale {
                assert_eq!(pair[0].parameters.quality, 0.05);
            }
        }
        let last = outcome.history.last().unwrap();
        assert_eq!(last.parameters.quality, 0.05);
        assert_eq!(last.parameters.scale, 0.5);
        for record in &outcome.history {
            assert!(record.parameters.quality >= 0.05 && record.parameters.quality <= 1.0);
            assert!(record.parameters.scale >= 0.5 && record.parameters.scale <= 2.0);
        }
    }

    #[test]
    fn larger_target_raises_quality_then_scale_to_cap() {
        let outcome = run_mock(vec![LETTER], 100 * 1024, 1024 * 1024);

        assert!(!outcome.bytes.is_empty());
        assert_eq!(outcome.history[0].parameters.quality, 0.85);
        assert_eq!(outcome.history[1].parameters.quality, 1.0);
        assert_eq!(outcome.history[1].parameters.scale, 1.0);
        assert_eq!(outcome.history.last().unwrap().parameters.scale, 2.0);
        assert!(outcome
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::TargetExceedsOriginal { .. })));
        assert!(outcome
            .advisories
            .iter()
            .any(|a| matches!(a, Advisory::ToleranceNotReached { .. })));
    }

    #[test]
    fn output_pages_keep_native_size_at_any_scale() {
        let sizes = vec![LETTER, PageSize {
            width: 200.0,
            height: 100.0,
        }];
        let rasterizer = BlankRasterizer {
            sizes: sizes.clone(),
        };
        // Unreachably small target drives the search down to the minimum scale.
        let outcome = PdfProcessor::new()
            .compress(&rasterizer, &NativeCodec, &fake_pdf(4096), 10, None, &mut |_| {})
            .unwrap();
        assert!(outcome.history.iter().any(|r| r.parameters.scale < 1.0));

        let output = LopdfDocument::load(&outcome.bytes).unwrap();
        assert_eq!(output.page_count(), 2);
        for (index, size) in sizes.iter().enumerate() {
            assert_eq!(output.native_page_size(index).unwrap(), *size);
        }
    }

    #[test]
    fn assembled_pdf_round_trips_through_lopdf() {
        let bytes = scanned_pdf(&[(LETTER, (306, 396)), (A4, (119, 168))]);
        assert!(bytes.starts_with(b"%PDF"));

        let document = LopdfDocument::load(&bytes).unwrap();
        assert_eq!(document.page_count(), 2);
        assert_eq!(document.native_page_size(0).unwrap(), LETTER);
        assert_eq!(document.native_page_size(1).unwrap(), A4);

        let rendered = document.render_page(1, 0.5).unwrap();
        assert_eq!((rendered.width(), rendered.height()), (298, 421));
    }

    #[test]
    fn native_compression_preserves_pages() {
        let source = scanned_pdf(&[
            (LETTER, (400, 518)),
            (A4, (400, 566)),
            (
                PageSize {
                    width: 300.0,
                    height: 200.0,
                },
                (300, 200),
            ),
        ]);
        let target = (source.len() as f64 * 0.4) as u64;

        let outcome = PdfProcessor::new()
            .compress(&NativeCodec, &NativeCodec, &source, target, None, &mut |_| {})
            .unwrap();

        assert!(outcome.attempt_count >= 1 && outcome.attempt_count <= 10);
        assert!(outcome.bytes.starts_with(b"%PDF"));
        let output = LopdfDocument::load(&outcome.bytes).unwrap();
        assert_eq!(output.page_count(), 3);
        assert_eq!(output.native_page_size(0).unwrap(), LETTER);
        assert_eq!(output.native_page_size(1).unwrap(), A4);
        assert!(output.render_page(2, 1.0).is_ok());
    }

    #[test]
    fn vector_only_page_is_a_decode_error() {
        let mut pdf = Pdf::new();
        let catalog_id = Ref::new(1);
        let tree_id = Ref::new(2);
        let page_id = Ref::new(3);
        pdf.catalog(catalog_id).pages(tree_id);
        pdf.pages(tree_id).kids([page_id]).count(1);
        pdf.page(page_id)
            .media_box(Rect::new(0.0, 0.0, 612.0, 792.0))
            .parent(tree_id);
        let bytes = pdf.finish();

        let err = PdfProcessor::new()
            .compress_document_to_target(&bytes, 1.0, SizeUnit::Kilobytes)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn corrupt_pdf_is_a_decode_error() {
        let err = PdfProcessor::new()
            .compress_document_to_target(b"%PDF-1.4 this is not a pdf", 1.0, SizeUnit::Kilobytes)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn image_input_is_rejected() {
        let jpeg = encode_jpeg(&noisy_page(16, 16, 1), 0.8).unwrap();
        let err = PdfProcessor::new()
            .compress_document_to_target(&jpeg, 1.0, SizeUnit::Kilobytes)
            .unwrap_err();
        assert!(matches!(err, CompressionError::UnsupportedFormat { .. }));
    }

    #[test]
    fn assembling_nothing_is_an_encode_error() {
        let err = assemble_pdf(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
    }

    #[test]
    fn unfiltered_embedded_images_are_decoded() {
        let mut doc = PdfDocument::with_version("1.5");
        let image = Stream::new(
            Dictionary::from_iter(vec![
                ("Type", Object::Name(b"XObject".to_vec())),
                ("Subtype", Object::Name(b"Image".to_vec())),
                ("Width", Object::Integer(4)),
                ("Height", Object::Integer(3)),
                ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
                ("BitsPerComponent", Object::Integer(8)),
            ]),
            vec![200u8; 4 * 3 * 3],
        );
        let image_id = doc.add_object(image);

        let pages_id = doc.new_object_id();
        let xobjects = Dictionary::from_iter(vec![("Im0", Object::Reference(image_id))]);
        let resources = Dictionary::from_iter(vec![("XObject", Object::Dictionary(xobjects))]);
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("Resources", Object::Dictionary(resources)),
        ]));
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(vec![Object::Reference(page_id)])),
                ("Count", Object::Integer(1)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(40),
                        Object::Integer(30),
                    ]),
                ),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let document = LopdfDocument::load(&bytes).unwrap();
        // MediaBox is inherited from the page tree node.
        assert_eq!(
            document.native_page_size(0).unwrap(),
            PageSize {
                width: 40.0,
                height: 30.0
            }
        );
        let rendered = document.render_page(0, 1.0).unwrap().to_rgb8();
        assert_eq!(rendered.dimensions(), (40, 30));
        assert_eq!(rendered.get_pixel(20, 15), &Rgb([200, 200, 200]));
    }
}
