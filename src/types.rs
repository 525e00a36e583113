use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Could not decode source: {message}")]
    Decode { message: String },

    #[error("Could not encode output: {message}")]
    Encode { message: String },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Compression cancelled")]
    Cancelled,

    #[error("Codec collaborator has not been initialised")]
    CodecUnavailable,

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Coarse classification used by callers that map failures to user-facing statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Input,
    Decode,
    Encode,
    Cancelled,
    Internal,
}

impl CompressionError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } | Self::Base64(_) => ErrorKind::Input,
            Self::Decode { .. } | Self::UnsupportedFormat { .. } => ErrorKind::Decode,
            Self::Encode { .. } => ErrorKind::Encode,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::CodecUnavailable | Self::Internal { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Unit a caller expresses the target size in. 1 KB = 1024 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeUnit {
    #[serde(rename = "B", alias = "b")]
    Bytes,
    #[serde(rename = "KB", alias = "kb", alias = "Kb")]
    Kilobytes,
    #[serde(rename = "MB", alias = "mb", alias = "Mb")]
    Megabytes,
}

impl SizeUnit {
    pub fn multiplier(self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::Kilobytes => 1024,
            SizeUnit::Megabytes => 1024 * 1024,
        }
    }

    /// Convert `value` expressed in this unit to a positive byte count.
    pub fn to_bytes(self, value: f64) -> Result<u64, CompressionError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(CompressionError::invalid_input(format!(
                "target size must be positive, got {}",
                value
            )));
        }

        let bytes = (value * self.multiplier() as f64).round();
        if bytes < 1.0 {
            return Err(CompressionError::invalid_input(format!(
                "target size {} {} rounds to zero bytes",
                value, self
            )));
        }
        if bytes > u64::MAX as f64 {
            return Err(CompressionError::invalid_input("target size is too large"));
        }

        Ok(bytes as u64)
    }
}

impl FromStr for SizeUnit {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "B" => Ok(SizeUnit::Bytes),
            "KB" => Ok(SizeUnit::Kilobytes),
            "MB" => Ok(SizeUnit::Megabytes),
            other => Err(CompressionError::invalid_input(format!(
                "unknown size unit '{}', expected KB or MB",
                other
            ))),
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SizeUnit::Bytes => "B",
            SizeUnit::Kilobytes => "KB",
            SizeUnit::Megabytes => "MB",
        };
        f.write_str(label)
    }
}

/// Content families the compressor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Jpeg,
    Png,
    Pdf,
}

impl SourceFormat {
    /// Whether the encoder for this format exposes a quality knob.
    pub fn is_lossy(self) -> bool {
        matches!(self, SourceFormat::Jpeg)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Png => "image/png",
            SourceFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Jpeg => "jpg",
            SourceFormat::Png => "png",
            SourceFormat::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterBounds {
    pub min: f64,
    pub max: f64,
}

impl ParameterBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Knobs shared by both variants of the search loop.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub tolerance: f64,
    pub max_attempts: u32,
    pub dampening: f64,
    pub quality: ParameterBounds,
    pub scale: ParameterBounds,
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub search: SearchSettings,
    pub initial_quality: f64,
    /// Quality is only lowered once this many attempts have run and the result is still too big.
    pub quality_fallback_after: u32,
    pub quality_step: f64,
    pub min_dimension: u32,
}

/// Initial quality bands keyed on `target / original`, checked top to bottom.
#[derive(Debug, Clone)]
pub struct QualityBand {
    pub min_ratio: f64,
    pub quality: f64,
}

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    pub search: SearchSettings,
    pub initial_scale: f64,
    pub quality_bands: Vec<QualityBand>,
    pub fallback_quality: f64,
}

pub const MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub image: ImageSettings,
    pub document: DocumentSettings,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            search: SearchSettings {
                tolerance: 0.01,
                max_attempts: MAX_ATTEMPTS,
                dampening: 0.5,
                quality: ParameterBounds::new(0.1, 1.0),
                // Only bounds the initial estimate; later attempts are floored by min_dimension.
                scale: ParameterBounds::new(0.1, 2.0),
            },
            initial_quality: 0.92,
            quality_fallback_after: 5,
            quality_step: 0.1,
            min_dimension: 10,
        }
    }
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            search: SearchSettings {
                tolerance: 0.05,
                max_attempts: MAX_ATTEMPTS,
                dampening: 0.5,
                quality: ParameterBounds::new(0.05, 1.0),
                scale: ParameterBounds::new(0.5, 2.0),
            },
            initial_scale: 1.0,
            quality_bands: vec![
                QualityBand {
                    min_ratio: 0.8,
                    quality: 0.85,
                },
                QualityBand {
                    min_ratio: 0.4,
                    quality: 0.6,
                },
                QualityBand {
                    min_ratio: 0.2,
                    quality: 0.35,
                },
            ],
            fallback_quality: 0.15,
        }
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            image: ImageSettings::default(),
            document: DocumentSettings::default(),
        }
    }
}

impl CompressionSettings {
    /// Override the attempt budget of both variants. Values outside `1..=10` are clamped.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        let attempts = attempts.clamp(1, MAX_ATTEMPTS);
        self.image.search.max_attempts = attempts;
        self.document.search.max_attempts = attempts;
        self
    }
}

/// One compression run's input, validated on construction.
#[derive(Debug, Clone)]
pub struct CompressionRequest<'a> {
    pub source: &'a [u8],
    pub target_size: u64,
    pub tolerance: f64,
    pub page_count: usize,
    pub original_size: u64,
}

impl<'a> CompressionRequest<'a> {
    pub fn new(
        source: &'a [u8],
        target_size: u64,
        tolerance: f64,
        page_count: usize,
    ) -> Result<Self, CompressionError> {
        if source.is_empty() {
            return Err(CompressionError::invalid_input("source content is empty"));
        }
        if target_size == 0 {
            return Err(CompressionError::invalid_input("target size must be positive"));
        }
        if !(tolerance > 0.0 && tolerance < 1.0) {
            return Err(CompressionError::invalid_input(format!(
                "tolerance {} must lie strictly between 0 and 1",
                tolerance
            )));
        }
        if page_count == 0 {
            return Err(CompressionError::invalid_input("source has no pages"));
        }

        Ok(Self {
            source,
            target_size,
            tolerance,
            page_count,
            original_size: source.len() as u64,
        })
    }

    /// Re-validate with the page count learned after opening the source.
    pub fn with_page_count(self, page_count: usize) -> Result<Self, CompressionError> {
        if page_count == 0 {
            return Err(CompressionError::decode("source has no pages"));
        }
        Ok(Self { page_count, ..self })
    }

    pub fn band(&self) -> ToleranceBand {
        ToleranceBand::new(self.target_size, self.tolerance)
    }

    pub fn size_ratio(&self) -> f64 {
        self.target_size as f64 / self.original_size as f64
    }
}

/// Mutable iteration state. For documents `scale` is the render resolution multiplier; for images
/// it is the factor applied to the native pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompressionParameters {
    pub quality: f64,
    pub scale: f64,
}

impl CompressionParameters {
    pub fn clamped(self, settings: &SearchSettings) -> Self {
        Self {
            quality: settings.quality.clamp(self.quality),
            scale: settings.scale.clamp(self.scale),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceBand {
    pub lower: f64,
    pub upper: f64,
}

impl ToleranceBand {
    pub fn new(target_size: u64, tolerance: f64) -> Self {
        let target = target_size as f64;
        Self {
            lower: target * (1.0 - tolerance),
            upper: target * (1.0 + tolerance),
        }
    }

    pub fn contains(&self, size: u64) -> bool {
        let size = size as f64;
        size >= self.lower && size <= self.upper
    }

    pub fn is_over(&self, size: u64) -> bool {
        size as f64 > self.upper
    }
}

#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub encoded: Vec<u8>,
    pub actual_size: u64,
    pub difference: u64,
}

impl AttemptResult {
    pub fn new(encoded: Vec<u8>, target_size: u64) -> Self {
        let actual_size = encoded.len() as u64;
        Self {
            encoded,
            actual_size,
            difference: actual_size.abs_diff(target_size),
        }
    }
}

/// Running champion across one request's attempts.
#[derive(Debug, Clone, Default)]
pub struct BestResult {
    attempt: Option<AttemptResult>,
    parameters: Option<CompressionParameters>,
    attempt_number: u32,
}

impl BestResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// `u64::MAX` until the first attempt has been recorded.
    pub fn difference(&self) -> u64 {
        self.attempt.as_ref().map_or(u64::MAX, |a| a.difference)
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn parameters(&self) -> Option<CompressionParameters> {
        self.parameters
    }

    pub fn actual_size(&self) -> Option<u64> {
        self.attempt.as_ref().map(|a| a.actual_size)
    }

    /// Keep `attempt` if it is strictly closer to the target. Returns whether it was kept.
    pub fn consider(
        &mut self,
        attempt: AttemptResult,
        parameters: CompressionParameters,
        attempt_number: u32,
    ) -> bool {
        if attempt.difference < self.difference() {
            self.attempt = Some(attempt);
            self.parameters = Some(parameters);
            self.attempt_number = attempt_number;
            true
        } else {
            false
        }
    }

    pub fn into_attempt(self) -> Option<AttemptResult> {
        self.attempt
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub parameters: CompressionParameters,
    pub actual_size: u64,
    pub difference: u64,
    pub best_difference: u64,
    pub within_tolerance: bool,
}

/// Non-fatal conditions surfaced next to a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    TargetExceedsOriginal { original_size: u64, target_size: u64 },
    ToleranceNotReached { best_size: u64, target_size: u64 },
}

/// What a variant adapter hands back: the best bytes found plus diagnostics.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub bytes: Vec<u8>,
    pub actual_size: u64,
    pub original_size: u64,
    pub target_size: u64,
    pub attempt_count: u32,
    pub within_tolerance: bool,
    pub parameters: CompressionParameters,
    pub advisories: Vec<Advisory>,
    pub history: Vec<AttemptRecord>,
}

impl CompressionOutcome {
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.original_size > 0 {
            Some(self.actual_size as f64 / self.original_size as f64)
        } else {
            None
        }
    }
}

// === HTTP TRANSPORT TYPES ===

#[derive(Debug, Deserialize)]
pub struct CompressRequest {
    pub content: String, // base64 encoded
    pub target_size: f64,
    #[serde(default = "default_unit")]
    pub unit: SizeUnit,
    #[serde(default)]
    pub file_name: Option<String>,
}

fn default_unit() -> SizeUnit {
    SizeUnit::Kilobytes
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressedFile {
    pub original_name: String,
    pub compressed_name: String,
    pub download_url: String,
    pub format: SourceFormat,
    pub original_size: u64,
    pub target_size: u64,
    pub size: u64,
    pub size_label: String,
    pub attempts: u32,
    pub within_tolerance: bool,
    pub compression_ratio: Option<f64>,
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, Serialize)]
pub struct CompressResponse {
    pub success: bool,
    pub file: Option<CompressedFile>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_unit_parses_case_insensitively() {
        assert_eq!("kb".parse::<SizeUnit>().unwrap(), SizeUnit::Kilobytes);
        assert_eq!(" MB ".parse::<SizeUnit>().unwrap(), SizeUnit::Megabytes);
        assert!("GB".parse::<SizeUnit>().is_err());
    }

    #[test]
    fn size_unit_converts_fractional_targets() {
        assert_eq!(SizeUnit::Megabytes.to_bytes(0.5).unwrap(), 512 * 1024);
        assert_eq!(SizeUnit::Kilobytes.to_bytes(500.0).unwrap(), 512_000);
        assert!(SizeUnit::Kilobytes.to_bytes(0.0).is_err());
        assert!(SizeUnit::Kilobytes.to_bytes(-3.0).is_err());
        assert!(SizeUnit::Bytes.to_bytes(0.2).is_err());
        assert!(SizeUnit::Bytes.to_bytes(f64::NAN).is_err());
    }

    #[test]
    fn request_rejects_non_positive_target() {
        let err = CompressionRequest::new(b"abc", 0, 0.05, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);

        let err = CompressionRequest::new(b"abc", 10, 1.0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);

        let err = CompressionRequest::new(b"", 10, 0.05, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
    }

    #[test]
    fn tolerance_band_is_inclusive() {
        let band = ToleranceBand::new(1000, 0.05);
        assert!(band.contains(950));
        assert!(band.contains(1050));
        assert!(!band.contains(949));
        assert!(band.is_over(1051));
        assert!(!band.is_over(1050));
    }

    #[test]
    fn best_result_only_keeps_strict_improvements() {
        let params = CompressionParameters {
            quality: 0.5,
            scale: 1.0,
        };
        let mut best = BestResult::new();
        assert_eq!(best.difference(), u64::MAX);

        assert!(best.consider(AttemptResult::new(vec![0; 150], 100), params, 1));
        assert!(!best.consider(AttemptResult::new(vec![0; 50], 100), params, 2));
        assert!(best.consider(AttemptResult::new(vec![0; 90], 100), params, 3));

        assert_eq!(best.difference(), 10);
        assert_eq!(best.attempt_number(), 3);
        assert_eq!(best.actual_size(), Some(90));
    }

    #[test]
    fn default_settings_match_variant_constants() {
        let settings = CompressionSettings::default();
        assert_eq!(settings.image.search.tolerance, 0.01);
        assert_eq!(settings.document.search.tolerance, 0.05);
        assert_eq!(settings.image.search.max_attempts, 10);
        assert_eq!(settings.document.search.quality.min, 0.05);
        assert_eq!(settings.document.search.scale, ParameterBounds::new(0.5, 2.0));

        let capped = CompressionSettings::default().with_max_attempts(50);
        assert_eq!(capped.document.search.max_attempts, 10);
        let floor = CompressionSettings::default().with_max_attempts(0);
        assert_eq!(floor.image.search.max_attempts, 1);
    }
}
