//! QR code rendering for ticket payloads.
//!
//! Pure and offline: no session, no network. The same payload rendered with
//! the same settings always produces byte-identical PNG data.

use std::io::Cursor;

use image::{ImageFormat, Luma};
use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode};
use thiserror::Error;
use tracing::debug;

use crate::models::CodeImage;

/// Pixels per QR module.
/// 8 keeps codes scannable from a phone screen at arm's length.
const DEFAULT_MODULE_SCALE: u32 = 8;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Payload too large for a QR code ({len} bytes)")]
    PayloadTooLarge { len: usize },

    #[error("QR encoding failed: {0}")]
    Qr(QrError),

    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// QR error-correction level. Higher levels survive more damage but hold
/// less data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCorrection {
    Low,
    #[default]
    Medium,
    Quartile,
    High,
}

impl ErrorCorrection {
    fn level(self) -> EcLevel {
        match self {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRenderer {
    error_correction: ErrorCorrection,
    scale: u32,
}

impl Default for CodeRenderer {
    fn default() -> Self {
        Self::new(ErrorCorrection::default(), DEFAULT_MODULE_SCALE)
    }
}

impl CodeRenderer {
    pub fn new(error_correction: ErrorCorrection, scale: u32) -> Self {
        Self {
            error_correction,
            scale: scale.max(1),
        }
    }

    /// Render `payload` as a PNG QR code.
    pub fn render(&self, payload: &str) -> Result<CodeImage, RenderError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), self.error_correction.level())
            .map_err(|e| match e {
                QrError::DataTooLong => RenderError::PayloadTooLarge { len: payload.len() },
                other => RenderError::Qr(other),
            })?;

        let image = code
            .render::<Luma<u8>>()
            .quiet_zone(true)
            .module_dimensions(self.scale, self.scale)
            .build();

        let mut data = Vec::new();
        image.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)?;
        debug!(
            payload_len = payload.len(),
            width = image.width(),
            bytes = data.len(),
            "Rendered QR code"
        );

        Ok(CodeImage::png(data))
    }

    /// Render straight to an embeddable `data:image/png;base64,...` string.
    pub fn render_data_uri(&self, payload: &str) -> Result<String, RenderError> {
        Ok(self.render(payload)?.data_uri())
    }
}

/// Render with the default settings.
pub fn render(payload: &str) -> Result<CodeImage, RenderError> {
    CodeRenderer::default().render(payload)
}
