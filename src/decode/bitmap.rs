use crate::foundation::error::DecodeError;

/// Decoded, displayable frame in premultiplied RGBA8 form.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBitmap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel bytes in row-major premultiplied RGBA8, tightly packed.
    pub rgba8_premul: Vec<u8>,
}

impl std::fmt::Debug for FrameBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba8_premul.len())
            .finish()
    }
}

impl FrameBitmap {
    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.rgba8_premul.len()
    }
}

/// Turns raw encoded frame bytes into a displayable bitmap.
///
/// Decoding runs on the resolver's worker pool, so implementations must be shareable.
pub trait FrameDecoder: Send + Sync + 'static {
    /// Decoded bitmap type held by the frame cache.
    type Bitmap: Send + Sync + 'static;

    /// Decode one frame.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Bitmap, DecodeError>;
}

/// Decoder for any raster format the `image` crate understands (PNG, JPEG, WebP, ...).
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageDecoder;

impl FrameDecoder for ImageDecoder {
    type Bitmap = FrameBitmap;

    fn decode(&self, bytes: &[u8]) -> Result<FrameBitmap, DecodeError> {
        decode_image(bytes)
    }
}

/// Decode encoded image bytes and convert to premultiplied RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<FrameBitmap, DecodeError> {
    let dyn_img = image::load_from_memory(bytes)
        .map_err(|e| DecodeError::new(format!("decode image from memory: {e}")))?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut rgba8_premul = rgba.into_raw();
    premultiply_rgba8_in_place(&mut rgba8_premul);

    Ok(FrameBitmap {
        width,
        height,
        rgba8_premul,
    })
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/decode/bitmap.rs"]
mod tests;
