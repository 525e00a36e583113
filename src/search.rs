//! Bounded iterative search shared by the image and document compressors.
//!
//! Each attempt renders with the current parameters, measures the encoded size, keeps the
//! closest result seen so far and, unless the size landed inside the tolerance band, asks the
//! strategy for the next parameters. Attempts are strictly sequential: the next parameters
//! depend on the size the previous attempt produced.

use crate::types::{
    Advisory, AttemptRecord, AttemptResult, BestResult, CompressionError, CompressionOutcome,
    CompressionParameters, CompressionRequest, SearchSettings, ToleranceBand, MAX_ATTEMPTS,
};
use crate::utils::format_file_size;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked before every render.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the token when the returned guard is dropped, e.g. when a request future is
    /// abandoned while the search runs on another thread.
    pub fn drop_guard(&self) -> DropGuard {
        DropGuard {
            token: Some(self.clone()),
        }
    }
}

#[derive(Debug)]
pub struct DropGuard {
    token: Option<CancellationToken>,
}

impl DropGuard {
    /// Keep the token alive without cancelling it.
    pub fn disarm(mut self) -> CancellationToken {
        self.token.take().unwrap_or_default()
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

/// Multiplier for parameters that move byte size roughly linearly (encoder quality).
pub fn dampened_quality_factor(ratio: f64, dampening: f64) -> f64 {
    1.0 + (ratio - 1.0) * dampening
}

/// Multiplier for parameters that move byte size through pixel area (scale, dimensions).
pub fn dampened_scale_factor(ratio: f64, dampening: f64) -> f64 {
    1.0 + (ratio.sqrt() - 1.0) * dampening
}

/// What a strategy sees when it is asked for the next parameters.
#[derive(Debug, Clone)]
pub struct AdjustContext<'a> {
    pub attempt: u32,
    pub actual_size: u64,
    pub target_size: u64,
    pub band: ToleranceBand,
    pub settings: &'a SearchSettings,
}

impl AdjustContext<'_> {
    /// `target / actual`; an empty output counts as one byte.
    pub fn ratio(&self) -> f64 {
        self.target_size as f64 / self.actual_size.max(1) as f64
    }

    pub fn is_over(&self) -> bool {
        self.band.is_over(self.actual_size)
    }

    pub fn quality_factor(&self) -> f64 {
        dampened_quality_factor(self.ratio(), self.settings.dampening)
    }

    pub fn scale_factor(&self) -> f64 {
        dampened_scale_factor(self.ratio(), self.settings.dampening)
    }
}

/// A variant plugs into the search by knowing how to render one attempt and how to move its
/// parameters afterwards. The search passes whatever `adjust` returns through `clamp`.
pub trait RenderStrategy {
    fn render(&mut self, parameters: &CompressionParameters) -> Result<Vec<u8>, CompressionError>;

    fn adjust(
        &self,
        parameters: CompressionParameters,
        context: &AdjustContext<'_>,
    ) -> CompressionParameters;

    /// Bounds applied to every attempt's parameters. Defaults to the configured bounds.
    fn clamp(
        &self,
        parameters: CompressionParameters,
        settings: &SearchSettings,
    ) -> CompressionParameters {
        parameters.clamped(settings)
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: AttemptResult,
    pub parameters: CompressionParameters,
    pub best_attempt: u32,
    pub attempts: u32,
    pub within_tolerance: bool,
    pub history: Vec<AttemptRecord>,
}

impl SearchOutcome {
    /// Attach request context. Adds a `ToleranceNotReached` advisory when the band was missed.
    pub fn into_compression_outcome(
        self,
        request: &CompressionRequest<'_>,
        mut advisories: Vec<Advisory>,
    ) -> CompressionOutcome {
        if !self.within_tolerance {
            log::warn!(
                "Target {} not reached after {} attempts; best result is {}",
                format_file_size(request.target_size),
                self.attempts,
                format_file_size(self.best.actual_size)
            );
            advisories.push(Advisory::ToleranceNotReached {
                best_size: self.best.actual_size,
                target_size: request.target_size,
            });
        }

        CompressionOutcome {
            actual_size: self.best.actual_size,
            bytes: self.best.encoded,
            original_size: request.original_size,
            target_size: request.target_size,
            attempt_count: self.attempts,
            within_tolerance: self.within_tolerance,
            parameters: self.parameters,
            advisories,
            history: self.history,
        }
    }
}

pub struct IterativeSearch<'a> {
    settings: &'a SearchSettings,
    target_size: u64,
    band: ToleranceBand,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> IterativeSearch<'a> {
    pub fn new(settings: &'a SearchSettings, target_size: u64) -> Self {
        Self {
            settings,
            target_size,
            band: ToleranceBand::new(target_size, settings.tolerance),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: Option<&'a CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    pub fn band(&self) -> ToleranceBand {
        self.band
    }

    fn max_attempts(&self) -> u32 {
        self.settings.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    pub fn run<S, F>(
        &self,
        strategy: &mut S,
        initial: CompressionParameters,
        mut on_attempt: F,
    ) -> Result<SearchOutcome, CompressionError>
    where
        S: RenderStrategy + ?Sized,
        F: FnMut(&AttemptRecord),
    {
        let max_attempts = self.max_attempts();
        let mut parameters = strategy.clamp(initial.clamped(self.settings), self.settings);
        let mut best = BestResult::new();
        let mut history = Vec::with_capacity(max_attempts as usize);

        for attempt in 1..=max_attempts {
            if self.cancel.is_some_and(|token| token.is_cancelled()) {
                log::info!("Compression cancelled before attempt {}", attempt);
                return Err(CompressionError::Cancelled);
            }

            let encoded = strategy.render(&parameters)?;
            let result = AttemptResult::new(encoded, self.target_size);
            let actual_size = result.actual_size;
            let difference = result.difference;
            best.consider(result, parameters, attempt);

            let within_tolerance = self.band.contains(actual_size);
            let record = AttemptRecord {
                attempt,
                parameters,
                actual_size,
                difference,
                best_difference: best.difference(),
                within_tolerance,
            };

            log::info!(
                "Attempt {}/{}: {} (target {}, quality {:.2}, scale {:.2})",
                attempt,
                max_attempts,
                format_file_size(actual_size),
                format_file_size(self.target_size),
                parameters.quality,
                parameters.scale
            );

            on_attempt(&record);
            history.push(record);

            if within_tolerance || attempt == max_attempts {
                break;
            }

            let context = AdjustContext {
                attempt,
                actual_size,
                target_size: self.target_size,
                band: self.band,
                settings: self.settings,
            };
            let next = strategy.clamp(strategy.adjust(parameters, &context), self.settings);
            log::debug!(
                "Adjusting after attempt {}: quality {:.3} -> {:.3}, scale {:.3} -> {:.3}",
                attempt,
                parameters.quality,
                next.quality,
                parameters.scale,
                next.scale
            );
            parameters = next;
        }

        let best_attempt = best.attempt_number();
        let best_parameters = best.parameters().unwrap_or(parameters);
        let best = best
            .into_attempt()
            .ok_or_else(|| CompressionError::encode("search finished without any attempt"))?;
        let within_tolerance = self.band.contains(best.actual_size);

        Ok(SearchOutcome {
            best,
            parameters: best_parameters,
            best_attempt,
            attempts: history.len() as u32,
            within_tolerance,
            history,
        })
    }
}
