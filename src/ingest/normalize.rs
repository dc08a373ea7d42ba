use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Nv12,
}

/// Convert a source buffer to tightly packed RGB24.
pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = rgb_len(width, height)?;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    }
}

/// Extract the luminance plane of a frame.
///
/// NV12 already carries it as the leading Y plane; RGB24 is weighted with
/// BT.601 coefficients.
pub fn luminance(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Nv12 => {
            let y_plane = (width as usize)
                .checked_mul(height as usize)
                .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
            if pixels.len() < y_plane {
                return Err(anyhow!(
                    "NV12 frame too short for Y plane: expected {}, got {}",
                    y_plane,
                    pixels.len()
                ));
            }
            Ok(pixels[..y_plane].to_vec())
        }
        PixelFormat::Rgb24 => luminance_from_rgb(pixels, width, height),
    }
}

pub fn luminance_from_rgb(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = rgb_len(width, height)?;
    if rgb.len() != expected {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {}, got {}",
            expected,
            rgb.len()
        ));
    }
    Ok(rgb
        .chunks_exact(3)
        .map(|px| {
            clamp_to_u8(0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
        })
        .collect())
}

/// Byte length of an NV12 buffer: a full-size Y plane followed by an
/// interleaved UV plane subsampled 2x2, rounded up on odd dimensions.
pub fn nv12_len(width: u32, height: u32) -> Result<usize> {
    let y_plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let uv_plane = chroma_stride(width)
        .checked_mul((height as usize).div_ceil(2))
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    y_plane
        .checked_add(uv_plane)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))
}

pub fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = nv12_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    let uv_stride = chroma_stride(width);
    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv = y_plane + (j / 2) * uv_stride + (i / 2) * 2;
            let u = pixels[uv] as f32 - 128.0;
            let v = pixels[uv + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(y + 1.402 * v);
            rgb[offset + 1] = clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v);
            rgb[offset + 2] = clamp_to_u8(y + 1.772 * u);
        }
    }

    Ok(rgb)
}

/// Bytes per UV row: one U/V pair per two luma columns.
fn chroma_stride(width: u32) -> usize {
    (width as usize).div_ceil(2) * 2
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
