//! Pairing code rendering: raw pairing payload → scannable QR image as a data URL.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qrcode::render::svg;
use qrcode::QrCode;
use switchboard_core::error::{Result, SwitchboardError};

const DATA_URL_PREFIX: &str = "data:image/svg+xml;base64,";
const MIN_DIMENSION: u32 = 256;

pub fn render_pairing_image(code: &str) -> Result<String> {
    if code.is_empty() {
        return Err(SwitchboardError::Invalid("pairing code is empty".to_string()));
    }
    let qr = QrCode::new(code.as_bytes())
        .map_err(|e| SwitchboardError::Invalid(format!("pairing code cannot be encoded: {}", e)))?;
    let image = qr
        .render::<svg::Color>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .quiet_zone(true)
        .build();
    Ok(format!("{}{}", DATA_URL_PREFIX, STANDARD.encode(image)))
}
