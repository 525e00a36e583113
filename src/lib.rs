//! Target size compression
//!
//! Compresses JPEG, PNG and PDF files until their encoded size lands within a tolerance band
//! around a requested byte count. Images are driven mainly through their pixel dimensions,
//! documents through per-page JPEG quality and then render scale.

pub mod codec;
pub mod config;
pub mod converter;
pub mod estimator;
pub mod image_processor;
pub mod pdf_processor;
pub mod search;
pub mod types;
pub mod utils;

pub use codec::{CodecSlot, Encoder, NativeCodec, Rasterizer};
pub use converter::{CompressionReport, DocumentConverter};
pub use image_processor::ImageProcessor;
pub use pdf_processor::PdfProcessor;
pub use search::{CancellationToken, IterativeSearch, RenderStrategy};
pub use types::*;
