//! NovelAI "stealth" metadata hidden in the alpha channel.
//!
//! One bit per pixel is taken from the least-significant bit of alpha, column
//! by column (row varies fastest), most-significant bit first. The stream
//! layout is:
//!
//! | Field | Size |
//! |-------|------|
//! | magic `stealth_pngcomp` (gzip) or `stealth_pnginfo` (plain) | 15 bytes |
//! | payload length in **bits**, big-endian | 4 bytes |
//! | payload: gzip'd or plain UTF-8 JSON | length / 8 bytes |
//!
//! Bits past the end of the image read as zero, so truncated or absent data
//! ends up failing the magic, length or JSON checks instead of panicking.

use flate2::read::GzDecoder;
use std::io::{Cursor, Read};

use crate::json::{self, JsonObject};

/// Magic for a gzip-compressed payload.
pub const COMPRESSED_MAGIC: &[u8] = b"stealth_pngcomp";
/// Magic for an uncompressed payload.
pub const PLAIN_MAGIC: &[u8] = b"stealth_pnginfo";
/// Default ceiling on the declared payload size.
pub const DEFAULT_MAX_PAYLOAD_BYTES: u32 = 50_000_000;

/// Why the alpha channel yielded no payload. None of these are errors for
/// the caller; they only explain a fall-through.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StealthMiss {
    #[error("bitmap could not be decoded")]
    NoBitmap,
    #[error("alpha channel carries no stealth magic")]
    NoMagic,
    #[error("declared payload of {0} bytes is outside 1..={1}")]
    BadLength(u32, u32),
    #[error("payload failed to decompress: {0}")]
    Decompress(String),
    #[error("payload is not a JSON object")]
    NotJson,
}

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealthLimits {
    pub max_payload_bytes: u32,
    pub max_inflate_bytes: usize,
}

impl Default for StealthLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_inflate_bytes: 256 * 1024 * 1024,
        }
    }
}

/// The alpha plane of a decoded bitmap, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaGrid {
    width: u32,
    height: u32,
    alpha: Vec<u8>,
}

impl AlphaGrid {
    /// `alpha` must hold exactly `width * height` values.
    pub fn new(width: u32, height: u32, alpha: Vec<u8>) -> Option<Self> {
        let expected = usize::try_from(u64::from(width) * u64::from(height)).ok()?;
        (alpha.len() == expected).then_some(Self { width, height, alpha })
    }

    /// Build a grid from a per-pixel function of `(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> u8) -> Self {
        let mut alpha = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                alpha.push(f(x, y));
            }
        }
        Self { width, height, alpha }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn alpha_at(&self, x: u32, y: u32) -> u8 {
        self.alpha[y as usize * self.width as usize + x as usize]
    }
}

/// Turns an image stream into pixels. Codecs live outside this crate.
pub trait BitmapDecoder: Send + Sync {
    /// Decode the alpha plane, or `None` if the stream is not a decodable image.
    fn decode_alpha(&self, bytes: &[u8]) -> Option<AlphaGrid>;

    /// Read the image dimensions from the header.
    fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)>;
}

/// [`BitmapDecoder`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl BitmapDecoder for ImageCrateDecoder {
    fn decode_alpha(&self, bytes: &[u8]) -> Option<AlphaGrid> {
        let img = match image::load_from_memory(bytes) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("Bitmap decode failed: {e}");
                return None;
            }
        };
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let alpha = rgba.pixels().map(|p| p.0[3]).collect();
        AlphaGrid::new(width, height, alpha)
    }

    fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

/// Column-major LSB bit reader.
struct LsbReader<'g> {
    grid: &'g AlphaGrid,
    index: u64,
    capacity: u64,
}

impl<'g> LsbReader<'g> {
    fn new(grid: &'g AlphaGrid) -> Self {
        Self {
            grid,
            index: 0,
            capacity: u64::from(grid.width) * u64::from(grid.height),
        }
    }

    fn next_bit(&mut self) -> u8 {
        if self.index >= self.capacity {
            return 0;
        }
        let height = u64::from(self.grid.height);
        let x = (self.index / height) as u32;
        let y = (self.index % height) as u32;
        self.index += 1;
        self.grid.alpha_at(x, y) & 1
    }

    fn next_byte(&mut self) -> u8 {
        (0..8).fold(0u8, |acc, _| (acc << 1) | self.next_bit())
    }

    fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.index >= self.capacity {
                out.resize(n, 0);
                break;
            }
            out.push(self.next_byte());
        }
        out
    }

    fn read_u32_be(&mut self) -> u32 {
        let b = self.read_bytes(4);
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }
}

/// Recover the JSON object hidden in `grid`.
pub fn decode(grid: &AlphaGrid, limits: StealthLimits) -> Result<JsonObject, StealthMiss> {
    let mut reader = LsbReader::new(grid);

    let magic = reader.read_bytes(COMPRESSED_MAGIC.len());
    let compressed = if magic == COMPRESSED_MAGIC {
        true
    } else if magic == PLAIN_MAGIC {
        false
    } else {
        return Err(StealthMiss::NoMagic);
    };

    let byte_len = reader.read_u32_be() / 8;
    if byte_len == 0 || byte_len > limits.max_payload_bytes {
        return Err(StealthMiss::BadLength(byte_len, limits.max_payload_bytes));
    }

    let payload = reader.read_bytes(byte_len as usize);
    let text = if compressed {
        gunzip(&payload, limits.max_inflate_bytes)?
    } else {
        payload
    };

    json::parse_object(&String::from_utf8_lossy(&text)).ok_or(StealthMiss::NotJson)
}

fn gunzip(data: &[u8], max_out: usize) -> Result<Vec<u8>, StealthMiss> {
    let mut out = Vec::new();
    let limit = u64::try_from(max_out).unwrap_or(u64::MAX).saturating_add(1);
    GzDecoder::new(data)
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|e| StealthMiss::Decompress(e.to_string()))?;
    if out.len() > max_out {
        return Err(StealthMiss::Decompress(format!("exceeds {max_out} bytes")));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    pub(crate) fn gzip(text: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    /// The bit stream for `magic + bit length + payload`.
    pub(crate) fn stream(magic: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut out = magic.to_vec();
        out.extend_from_slice(&((payload.len() as u32) * 8).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Alpha values (254/255) carrying `bytes` column-major, MSB first.
    pub(crate) fn embed(bytes: &[u8], width: u32, height: u32) -> AlphaGrid {
        let bits: Vec<u8> = bytes
            .iter()
            .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
            .collect();
        AlphaGrid::from_fn(width, height, |x, y| {
            let index = x as usize * height as usize + y as usize;
            254 | bits.get(index).copied().unwrap_or(0)
        })
    }

    fn size_for(bytes: usize) -> (u32, u32) {
        let side = ((bytes * 8) as f64).sqrt().ceil() as u32 + 1;
        (side, side)
    }

    // ── grid ─────────────────────────────────────────────────────────

    #[test]
    fn alpha_grid_rejects_wrong_length() {
        assert!(AlphaGrid::new(2, 2, vec![0; 3]).is_none());
        assert!(AlphaGrid::new(2, 2, vec![0; 4]).is_some());
    }

    #[test]
    fn bits_are_read_column_major_msb_first() {
        // 8 rows x 1 column: row order is bit order.
        let grid = AlphaGrid::from_fn(1, 8, |_, y| if y == 0 || y == 7 { 1 } else { 0 });
        let mut reader = LsbReader::new(&grid);
        assert_eq!(reader.next_byte(), 0b1000_0001);
    }

    #[test]
    fn reading_past_the_end_yields_zero_bits() {
        let grid = AlphaGrid::from_fn(1, 1, |_, _| 255);
        let mut reader = LsbReader::new(&grid);
        assert_eq!(reader.read_bytes(3), vec![0b1000_0000, 0, 0]);
    }

    // ── decode ───────────────────────────────────────────────────────

    #[test]
    fn decodes_gzip_empty_object() {
        let data = stream(COMPRESSED_MAGIC, &gzip("{}"));
        let (w, h) = size_for(data.len());
        let decoded = decode(&embed(&data, w, h), StealthLimits::default()).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn decodes_plain_payload() {
        let data = stream(PLAIN_MAGIC, br#"{"prompt":"a fox","uc":"blurry"}"#);
        let (w, h) = size_for(data.len());
        let decoded = decode(&embed(&data, w, h), StealthLimits::default()).unwrap();
        assert_eq!(json::str_field(&decoded, "prompt"), Some("a fox"));
    }

    #[test]
    fn flipping_any_magic_bit_yields_no_magic() {
        let data = stream(COMPRESSED_MAGIC, &gzip("{}"));
        let (w, h) = size_for(data.len());
        let clean = embed(&data, w, h);
        for bit in 0..(COMPRESSED_MAGIC.len() * 8) {
            let flipped = AlphaGrid::from_fn(w, h, |x, y| {
                let index = x as usize * h as usize + y as usize;
                let a = clean.alpha_at(x, y);
                if index == bit { a ^ 1 } else { a }
            });
            assert_eq!(
                decode(&flipped, StealthLimits::default()),
                Err(StealthMiss::NoMagic),
                "bit {bit}"
            );
        }
    }

    #[test]
    fn opaque_image_has_no_magic() {
        let grid = AlphaGrid::from_fn(64, 64, |_, _| 255);
        assert_eq!(decode(&grid, StealthLimits::default()), Err(StealthMiss::NoMagic));
    }

    #[test]
    fn zero_and_oversized_lengths_are_rejected() {
        let mut zero = COMPRESSED_MAGIC.to_vec();
        zero.extend_from_slice(&7u32.to_be_bytes()); // 7 bits -> 0 bytes
        let (w, h) = size_for(zero.len());
        assert_eq!(
            decode(&embed(&zero, w, h), StealthLimits::default()),
            Err(StealthMiss::BadLength(0, DEFAULT_MAX_PAYLOAD_BYTES))
        );

        let data = stream(COMPRESSED_MAGIC, &gzip("{\"a\":1}"));
        let (w, h) = size_for(data.len());
        let limits = StealthLimits {
            max_payload_bytes: 4,
            ..StealthLimits::default()
        };
        assert!(matches!(
            decode(&embed(&data, w, h), limits),
            Err(StealthMiss::BadLength(_, 4))
        ));
    }

    #[test]
    fn truncated_payload_fails_softly() {
        let data = stream(COMPRESSED_MAGIC, &gzip("{\"prompt\":\"long enough to be cut\"}"));
        // Room for the header and only part of the payload.
        let grid = embed(&data, 1, ((COMPRESSED_MAGIC.len() + 4 + 6) * 8) as u32);
        assert!(matches!(
            decode(&grid, StealthLimits::default()),
            Err(StealthMiss::Decompress(_))
        ));
    }

    #[test]
    fn non_object_json_is_rejected() {
        let data = stream(COMPRESSED_MAGIC, &gzip("[1,2,3]"));
        let (w, h) = size_for(data.len());
        assert_eq!(
            decode(&embed(&data, w, h), StealthLimits::default()),
            Err(StealthMiss::NotJson)
        );
    }

    #[test]
    fn empty_grid_never_panics() {
        let grid = AlphaGrid::from_fn(0, 0, |_, _| 0);
        assert_eq!(decode(&grid, StealthLimits::default()), Err(StealthMiss::NoMagic));
    }
}
