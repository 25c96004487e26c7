use std::borrow::Cow;

use super::frame::PixelFormat;

/// Convert raw pixels between formats. Same-format input is borrowed as is.
pub fn convert_pixels(
    data: &[u8],
    from: PixelFormat,
    to: PixelFormat,
) -> Result<Cow<'_, [u8]>, String> {
    if from == to {
        return Ok(Cow::Borrowed(data));
    }

    let converted = match (from, to) {
        (PixelFormat::Rgb565, PixelFormat::Rgb888) => rgb565_to_rgb888(data)?,
        (PixelFormat::Rgb565, PixelFormat::Grayscale) => {
            rgb888_to_gray(&rgb565_to_rgb888(data)?)
        }
        (PixelFormat::Grayscale, PixelFormat::Rgb888) => {
            data.iter().flat_map(|&y| [y, y, y]).collect()
        }
        (PixelFormat::Rgb888, PixelFormat::Grayscale) => rgb888_to_gray(data),
        // Y0 U Y1 V: luma sits on every even byte
        (PixelFormat::Yuv422, PixelFormat::Grayscale) => {
            data.iter().step_by(2).copied().collect()
        }
        (PixelFormat::Jpeg, _) => {
            return Err("JPEG frames must be decoded before inference".into())
        }
        _ => return Err(format!("no conversion from {from:?} to {to:?}")),
    };

    Ok(Cow::Owned(converted))
}

/// The sensor emits RGB565 big-endian: RRRRRGGG GGGBBBBB
fn rgb565_to_rgb888(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() % 2 != 0 {
        return Err(format!("odd RGB565 buffer length {}", data.len()));
    }

    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(2) {
        let pixel = u16::from_be_bytes([chunk[0], chunk[1]]);
        let r = ((pixel >> 11) & 0x1f) as u8;
        let g = ((pixel >> 5) & 0x3f) as u8;
        let b = (pixel & 0x1f) as u8;
        // Replicate high bits so full scale maps to 255
        rgb.push((r << 3) | (r >> 2));
        rgb.push((g << 2) | (g >> 4));
        rgb.push((b << 3) | (b >> 2));
    }
    Ok(rgb)
}

fn rgb888_to_gray(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .map(|px| ((px[0] as u32 * 77 + px[1] as u32 * 150 + px[2] as u32 * 29) >> 8) as u8)
        .collect()
}
