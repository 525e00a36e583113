//! Starting-point heuristics for the search loop.
//!
//! A good first guess keeps the number of render/encode passes low, which matters most for
//! documents where every pass rasterizes every page.

use crate::types::{CompressionParameters, DocumentSettings, ImageSettings};

/// Documents always start at native resolution so text stays sharp; only quality is seeded from
/// the size ratio.
pub fn estimate_document_parameters(
    settings: &DocumentSettings,
    original_size: u64,
    target_size: u64,
) -> CompressionParameters {
    let ratio = size_ratio(original_size, target_size);
    let quality = settings
        .quality_bands
        .iter()
        .find(|band| ratio >= band.min_ratio)
        .map_or(settings.fallback_quality, |band| band.quality);

    CompressionParameters {
        quality,
        scale: settings.initial_scale,
    }
    .clamped(&settings.search)
}

/// Images scale pixel area with the size ratio, so the linear factor is its square root.
pub fn estimate_image_parameters(
    settings: &ImageSettings,
    original_size: u64,
    target_size: u64,
) -> CompressionParameters {
    let ratio = size_ratio(original_size, target_size);

    CompressionParameters {
        quality: settings.initial_quality,
        scale: ratio.sqrt(),
    }
    .clamped(&settings.search)
}

/// Pixel dimensions for `scale`, never below `min_dimension` on either axis.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64, min_dimension: u32) -> (u32, u32) {
    let scale_axis = |native: u32| -> u32 {
        let scaled = (native as f64 * scale).round();
        if scaled.is_finite() && scaled < u32::MAX as f64 {
            (scaled as u32).max(min_dimension)
        } else {
            min_dimension
        }
    };

    (scale_axis(width), scale_axis(height))
}

fn size_ratio(original_size: u64, target_size: u64) -> f64 {
    if original_size == 0 {
        return 1.0;
    }
    target_size as f64 / original_size as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: u64 = 1024;

    #[test]
    fn document_quality_follows_ratio_bands() {
        let settings = DocumentSettings::default();
        let cases = [
            (1000 * KB, 900 * KB, 0.85),
            (1000 * KB, 800 * KB, 0.85),
            (1000 * KB, 500 * KB, 0.6),
            (1000 * KB, 400 * KB, 0.6),
            (1000 * KB, 250 * KB, 0.35),
            (1000 * KB, 200 * KB, 0.35),
            (1000 * KB, 100 * KB, 0.15),
        ];

        for (original, target, expected) in cases {
            let params = estimate_document_parameters(&settings, original, target);
            assert_eq!(params.quality, expected, "target {} of {}", target, original);
            assert_eq!(params.scale, 1.0);
        }
    }

    #[test]
    fn document_target_larger_than_original_uses_top_band() {
        let settings = DocumentSettings::default();
        let params = estimate_document_parameters(&settings, 100 * KB, 1024 * KB);
        assert_eq!(params.quality, 0.85);
        assert_eq!(params.scale, 1.0);
    }

    #[test]
    fn image_scale_is_square_root_of_ratio() {
        let settings = ImageSettings::default();

        let same = estimate_image_parameters(&settings, 2048 * KB, 2048 * KB);
        assert_eq!(same.scale, 1.0);
        assert_eq!(same.quality, 0.92);

        let quarter = estimate_image_parameters(&settings, 400 * KB, 100 * KB);
        assert!((quarter.scale - 0.5).abs() < 1e-12);
    }

    #[test]
    fn image_scale_is_clamped_for_extreme_ratios() {
        let settings = ImageSettings::default();

        let tiny = estimate_image_parameters(&settings, 100_000 * KB, KB);
        assert_eq!(tiny.scale, 0.1);

        let huge = estimate_image_parameters(&settings, KB, 100 * KB);
        assert_eq!(huge.scale, 2.0);
    }

    #[test]
    fn scaled_dimensions_respect_floor() {
        assert_eq!(scaled_dimensions(1000, 500, 0.5, 10), (500, 250));
        assert_eq!(scaled_dimensions(40, 20, 0.1, 10), (10, 10));
        assert_eq!(scaled_dimensions(3, 3, 1.0, 10), (10, 10));
    }
}
