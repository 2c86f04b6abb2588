//! QR rendering for pairing codes.

use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Edge length of the rendered QR image, in pixels.
pub const QR_IMAGE_SIZE: u32 = 256;

/// Render `data` as a medium-ECC QR code PNG of at least `size`x`size` and base64-encode it.
pub fn encode_png_base64(data: &str, size: u32) -> anyhow::Result<String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .build();
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}
