use crate::codec::{CodecSlot, Encoder, NativeCodec, Rasterizer};
use crate::image_processor::ImageProcessor;
use crate::pdf_processor::PdfProcessor;
use crate::search::CancellationToken;
use crate::types::*;
use crate::utils::{detect_format, format_file_size};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Result of one `compress` call, whichever variant handled it.
#[derive(Debug, Clone)]
pub struct CompressionReport {
    pub format: SourceFormat,
    pub result_bytes: Vec<u8>,
    pub result_size: u64,
    pub original_size: u64,
    pub target_size: u64,
    pub attempt_count: u32,
    pub within_tolerance: bool,
    pub advisories: Vec<Advisory>,
    pub history: Vec<AttemptRecord>,
}

impl CompressionReport {
    fn from_outcome(format: SourceFormat, outcome: CompressionOutcome) -> Self {
        Self {
            format,
            result_size: outcome.actual_size,
            original_size: outcome.original_size,
            target_size: outcome.target_size,
            attempt_count: outcome.attempt_count,
            within_tolerance: outcome.within_tolerance,
            advisories: outcome.advisories,
            history: outcome.history,
            result_bytes: outcome.bytes,
        }
    }

    pub fn compression_ratio(&self) -> Option<f64> {
        if self.original_size > 0 {
            Some(self.result_size as f64 / self.original_size as f64)
        } else {
            None
        }
    }
}

/// Entry point used by the service: picks the image or document compressor from the content.
///
/// Clones share the same codec collaborators.
#[derive(Clone)]
pub struct DocumentConverter {
    rasterizer: Arc<CodecSlot<dyn Rasterizer>>,
    encoder: Arc<CodecSlot<dyn Encoder>>,
    image_processor: Arc<ImageProcessor>,
    pdf_processor: Arc<PdfProcessor>,
}

impl DocumentConverter {
    pub fn new() -> Self {
        Self::with_settings(CompressionSettings::default())
    }

    pub fn with_settings(settings: CompressionSettings) -> Self {
        Self {
            rasterizer: Arc::new(CodecSlot::new()),
            encoder: Arc::new(CodecSlot::new()),
            image_processor: Arc::new(ImageProcessor::with_settings(settings.image)),
            pdf_processor: Arc::new(PdfProcessor::with_settings(settings.document)),
        }
    }

    /// Use the given collaborators instead of the lazily created native codec.
    pub fn with_codecs(self, rasterizer: Arc<dyn Rasterizer>, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            rasterizer: Arc::new(CodecSlot::with(rasterizer)),
            encoder: Arc::new(CodecSlot::with(encoder)),
            ..self
        }
    }

    fn collaborators(&self) -> (Arc<dyn Rasterizer>, Arc<dyn Encoder>) {
        let rasterizer = self
            .rasterizer
            .get_or_init(|| Arc::new(NativeCodec) as Arc<dyn Rasterizer>);
        let encoder = self
            .encoder
            .get_or_init(|| Arc::new(NativeCodec) as Arc<dyn Encoder>);
        (rasterizer, encoder)
    }

    pub fn compress(
        &self,
        source: &[u8],
        target: f64,
        unit: SizeUnit,
    ) -> Result<CompressionReport, CompressionError> {
        let target_size = unit.to_bytes(target)?;
        self.compress_with(source, target_size, None, &mut |_| {})
    }

    pub fn compress_with(
        &self,
        source: &[u8],
        target_size: u64,
        cancel: Option<&CancellationToken>,
        on_attempt: &mut dyn FnMut(&AttemptRecord),
    ) -> Result<CompressionReport, CompressionError> {
        if source.is_empty() {
            return Err(CompressionError::invalid_input("source content is empty"));
        }

        let format = detect_format(source)?;
        let (rasterizer, encoder) = self.collaborators();

        log::info!(
            "Compressing {} {} to {}",
            format_file_size(source.len() as u64),
            format.mime_type(),
            format_file_size(target_size)
        );

        let outcome = match format {
            SourceFormat::Pdf => self.pdf_processor.compress(
                rasterizer.as_ref(),
                encoder.as_ref(),
                source,
                target_size,
                cancel,
                on_attempt,
            )?,
            SourceFormat::Jpeg | SourceFormat::Png => self.image_processor.compress(
                rasterizer.as_ref(),
                encoder.as_ref(),
                source,
                target_size,
                cancel,
                on_attempt,
            )?,
        };

        Ok(CompressionReport::from_outcome(format, outcome))
    }

    /// Runs the CPU-bound search on the blocking pool. Cancelling `cancel` stops the search
    /// before its next attempt.
    pub async fn compress_async(
        &self,
        source: Vec<u8>,
        target: f64,
        unit: SizeUnit,
        cancel: CancellationToken,
    ) -> Result<CompressionReport, CompressionError> {
        let target_size = unit.to_bytes(target)?;
        let converter = self.clone();

        tokio::task::spawn_blocking(move || {
            converter.compress_with(&source, target_size, Some(&cancel), &mut |_| {})
        })
        .await
        .map_err(|e| CompressionError::Internal {
            message: format!("compression worker failed: {}", e),
        })?
    }
}

impl Default for DocumentConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub format: SourceFormat,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StorageStats {
    pub file_count: usize,
    pub total_size: u64,
}

pub const DEFAULT_STORE_MAX_FILES: usize = 64;
pub const DEFAULT_STORE_MAX_BYTES: u64 = 256 * 1024 * 1024;

/// Compressed outputs kept in memory for download. Once either limit would be exceeded the
/// oldest files are evicted first.
#[derive(Debug)]
pub struct ResultStore {
    temp_storage: HashMap<String, StoredFile>,
    insertion_order: VecDeque<String>,
    total_size: u64,
    max_files: usize,
    max_bytes: u64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_STORE_MAX_FILES, DEFAULT_STORE_MAX_BYTES)
    }

    /// `max_files` is raised to at least one so the newest result is always kept.
    pub fn with_limits(max_files: usize, max_bytes: u64) -> Self {
        Self {
            temp_storage: HashMap::new(),
            insertion_order: VecDeque::new(),
            total_size: 0,
            max_files: max_files.max(1),
            max_bytes,
        }
    }

    /// Returns the id to download the file with.
    pub fn store(&mut self, name: String, format: SourceFormat, content: Vec<u8>) -> String {
        let size = content.len() as u64;
        self.evict_for(size);

        let file_id = Uuid::new_v4().to_string();
        log::info!(
            "Stored {} ({}) as {}",
            name,
            format_file_size(size),
            file_id
        );
        self.temp_storage.insert(
            file_id.clone(),
            StoredFile {
                name,
                format,
                content,
            },
        );
        self.insertion_order.push_back(file_id.clone());
        self.total_size += size;
        file_id
    }

    // A single file larger than max_bytes still gets stored, alone.
    fn evict_for(&mut self, incoming: u64) {
        while !self.insertion_order.is_empty()
            && (self.temp_storage.len() >= self.max_files
                || self.total_size + incoming > self.max_bytes)
        {
            if let Some(file_id) = self.insertion_order.pop_front() {
                if let Some(file) = self.temp_storage.remove(&file_id) {
                    self.total_size -= file.content.len() as u64;
                    log::info!("Evicted {} ({}) from result store", file.name, file_id);
                }
            }
        }
    }

    pub fn get(&self, file_id: &str) -> Option<&StoredFile> {
        self.temp_storage.get(file_id)
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            file_count: self.temp_storage.len(),
            total_size: self.total_size,
        }
    }

    /// Drop every stored file and report what was removed.
    pub fn cleanup(&mut self) -> StorageStats {
        let stats = self.stats();
        self.temp_storage.clear();
        self.insertion_order.clear();
        self.total_size = 0;
        log::info!(
            "Cleaned up {} temporary files ({})",
            stats.file_count,
            format_file_size(stats.total_size)
        );
        stats
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `report.pdf` -> `report_compressed.pdf`, keeping the output format's extension.
pub fn compressed_file_name(original_name: &str, format: SourceFormat) -> String {
    let base_name = match original_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ if !original_name.is_empty() => original_name,
        _ => "document",
    };
    format!("{}_compressed.{}", base_name, format.extension())
}
