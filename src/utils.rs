use crate::types::{CompressionError, SourceFormat};

/// Human-readable byte count, e.g. `512.00 KB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;
    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Identify the source family from its leading bytes.
pub fn detect_format(bytes: &[u8]) -> Result<SourceFormat, CompressionError> {
    if bytes.starts_with(b"%PDF") {
        return Ok(SourceFormat::Pdf);
    }

    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Ok(SourceFormat::Png);
    }

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Ok(SourceFormat::Jpeg);
    }

    let format = match image::guess_format(bytes) {
        Ok(format) => format!("{:?}", format).to_lowercase(),
        Err(_) => "unknown".to_string(),
    };
    Err(CompressionError::UnsupportedFormat { format })
}
