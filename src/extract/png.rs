//! PNG textual chunk reader.
//!
//! Walks the chunk stream (length, type, payload, CRC) and collects `tEXt`,
//! `zTXt` and `iTXt` entries. CRCs are skipped, not verified. Malformed text
//! payloads are dropped; a truncated stream simply ends the walk.

use anyhow::{Result, bail};
use flate2::read::ZlibDecoder;
use std::io::Read;

use super::RawMetadataBag;

/// The 8-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// The textual chunk types this reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextChunkKind {
    /// `tEXt`: Latin-1 text.
    Plain,
    /// `zTXt`: deflated text.
    Compressed,
    /// `iTXt`: UTF-8 text, optionally deflated.
    International,
}

impl TextChunkKind {
    fn from_type(chunk_type: &[u8; 4]) -> Option<Self> {
        match chunk_type {
            b"tEXt" => Some(Self::Plain),
            b"zTXt" => Some(Self::Compressed),
            b"iTXt" => Some(Self::International),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "tEXt",
            Self::Compressed => "zTXt",
            Self::International => "iTXt",
        }
    }
}

struct RawChunk<'b> {
    chunk_type: [u8; 4],
    data: &'b [u8],
}

/// Successive chunks after the signature. Stops at the first truncated chunk.
struct ChunkIter<'b> {
    rest: &'b [u8],
}

impl<'b> Iterator for ChunkIter<'b> {
    type Item = RawChunk<'b>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = std::mem::take(&mut self.rest);
        let (len, bytes) = bytes.split_first_chunk::<4>()?;
        let (chunk_type, bytes) = bytes.split_first_chunk::<4>()?;
        let len = usize::try_from(u32::from_be_bytes(*len)).ok()?;
        if bytes.len() < len {
            return None;
        }
        let (data, bytes) = bytes.split_at(len);
        // A missing CRC still yields the chunk; the stream just ends after it.
        self.rest = bytes.get(4..).unwrap_or_default();
        Some(RawChunk {
            chunk_type: *chunk_type,
            data,
        })
    }
}

/// Read every textual chunk of a PNG stream into a bag.
///
/// The signature is re-checked here even when the caller already sniffed it;
/// a mismatch is the one structural error this reader raises. Inflated text is
/// capped at `max_inflate_bytes` per chunk.
pub fn read_text_chunks(bytes: &[u8], max_inflate_bytes: usize) -> Result<RawMetadataBag> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        bail!("Not a PNG stream: signature mismatch");
    }

    let mut bag = RawMetadataBag::new();
    let chunks = ChunkIter {
        rest: &bytes[PNG_SIGNATURE.len()..],
    };

    for chunk in chunks {
        if &chunk.chunk_type == b"IEND" {
            break;
        }
        let Some(kind) = TextChunkKind::from_type(&chunk.chunk_type) else {
            continue;
        };
        match decode_text_chunk(kind, chunk.data, max_inflate_bytes) {
            Some((key, text)) => {
                if !bag.insert(key.as_str(), text) {
                    log::debug!("Dropping duplicate {} key {key:?}", kind.name());
                }
            }
            None => log::debug!("Skipping malformed {} chunk", kind.name()),
        }
    }

    Ok(bag)
}

fn decode_text_chunk(
    kind: TextChunkKind,
    data: &[u8],
    max_inflate: usize,
) -> Option<(String, String)> {
    let (key, rest) = split_nul(data)?;
    let key = latin1(key);
    if key.trim().is_empty() {
        return None;
    }

    let text = match kind {
        TextChunkKind::Plain => latin1(rest),
        TextChunkKind::Compressed => {
            let (&method, compressed) = rest.split_first()?;
            if method != 0 {
                return None;
            }
            utf8(&inflate(compressed, max_inflate)?)
        }
        TextChunkKind::International => {
            let [flag, method, rest @ ..] = rest else {
                return None;
            };
            let (_language, rest) = split_nul(rest)?;
            let (_translated_key, text) = split_nul(rest)?;
            match (*flag, *method) {
                (0, _) => utf8(text),
                (1, 0) => utf8(&inflate(text, max_inflate)?),
                _ => return None,
            }
        }
    };

    Some((key, text))
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let idx = data.iter().position(|&b| b == 0)?;
    Some((&data[..idx], &data[idx + 1..]))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn inflate(data: &[u8], max_out: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let limit = u64::try_from(max_out).unwrap_or(u64::MAX).saturating_add(1);
    if let Err(e) = ZlibDecoder::new(data).take(limit).read_to_end(&mut out) {
        log::debug!("Inflate failed: {e}");
        return None;
    }
    if out.len() > max_out {
        log::debug!("Inflated text exceeds {max_out} bytes");
        return None;
    }
    Some(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    const LIMIT: usize = 1 << 20;

    /// Append a chunk with a zero CRC (the reader never checks it).
    pub(crate) fn push_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(chunk_type);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0, 0, 0, 0]);
    }

    /// A PNG stream holding only `tEXt` chunks and `IEND`.
    pub(crate) fn png_with_text(fields: &[(&str, &str)]) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        for (key, value) in fields {
            let mut data = key.as_bytes().to_vec();
            data.push(0);
            data.extend_from_slice(value.as_bytes());
            push_chunk(&mut out, b"tEXt", &data);
        }
        push_chunk(&mut out, b"IEND", &[]);
        out
    }

    fn zlib(text: &str) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    // ── signature ────────────────────────────────────────────────────

    #[test]
    fn rejects_non_png_signature() {
        assert!(read_text_chunks(b"\xFF\xD8\xFF\xE0 not a png", LIMIT).is_err());
        assert!(read_text_chunks(&[], LIMIT).is_err());
    }

    #[test]
    fn signature_only_yields_empty_bag() {
        let bag = read_text_chunks(&PNG_SIGNATURE, LIMIT).unwrap();
        assert!(bag.is_empty());
    }

    // ── tEXt ─────────────────────────────────────────────────────────

    #[test]
    fn reads_text_chunks_in_order() {
        let png = png_with_text(&[("parameters", "a cat"), ("Software", "Tool")]);
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.key_list(), "parameters,Software");
        assert_eq!(bag.get("parameters"), Some("a cat"));
    }

    #[test]
    fn text_is_latin1() {
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"tEXt", b"Comment\0caf\xE9");
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.get("Comment"), Some("café"));
    }

    #[test]
    fn duplicate_keys_keep_first() {
        let png = png_with_text(&[("prompt", "one"), ("prompt", "two")]);
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.get("prompt"), Some("one"));
    }

    #[test]
    fn malformed_text_chunk_is_skipped() {
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"tEXt", b"no separator here");
        push_chunk(&mut png, b"tEXt", b"\0empty key");
        push_chunk(&mut png, b"tEXt", b"ok\0value");
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get("ok"), Some("value"));
    }

    // ── zTXt / iTXt ──────────────────────────────────────────────────

    #[test]
    fn reads_compressed_text() {
        let mut data = b"workflow\0\0".to_vec();
        data.extend(zlib("{\"nodes\":[]}"));
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"zTXt", &data);
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.get("workflow"), Some("{\"nodes\":[]}"));
    }

    #[test]
    fn compressed_text_with_unknown_method_is_skipped() {
        let mut data = b"workflow\0\x01".to_vec();
        data.extend(zlib("x"));
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"zTXt", &data);
        assert!(read_text_chunks(&png, LIMIT).unwrap().is_empty());
    }

    #[test]
    fn corrupt_deflate_is_skipped() {
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"zTXt", b"prompt\0\0not zlib at all");
        assert!(read_text_chunks(&png, LIMIT).unwrap().is_empty());
    }

    #[test]
    fn inflate_respects_limit() {
        let mut data = b"prompt\0\0".to_vec();
        data.extend(zlib(&"x".repeat(4096)));
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"zTXt", &data);
        assert!(read_text_chunks(&png, 1024).unwrap().is_empty());
        assert_eq!(read_text_chunks(&png, 4096).unwrap().len(), 1);
    }

    #[test]
    fn reads_international_text_plain_and_deflated() {
        let mut plain = b"prompt\0\0\0en\0Prompt\0".to_vec();
        plain.extend_from_slice("ünïcode".as_bytes());

        let mut deflated = b"parameters\0\x01\0\0\0".to_vec();
        deflated.extend(zlib("a dog"));

        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"iTXt", &plain);
        push_chunk(&mut png, b"iTXt", &deflated);
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.get("prompt"), Some("ünïcode"));
        assert_eq!(bag.get("parameters"), Some("a dog"));
    }

    #[test]
    fn international_text_missing_separators_is_skipped() {
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"iTXt", b"prompt\0\0\0no-more-nuls");
        assert!(read_text_chunks(&png, LIMIT).unwrap().is_empty());
    }

    // ── stream shape ─────────────────────────────────────────────────

    #[test]
    fn stops_at_iend() {
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"IEND", &[]);
        push_chunk(&mut png, b"tEXt", b"late\0ignored");
        assert!(read_text_chunks(&png, LIMIT).unwrap().is_empty());
    }

    #[test]
    fn truncated_stream_keeps_earlier_chunks() {
        let mut png = png_with_text(&[("parameters", "a cat")]);
        png.truncate(png.len() - 12); // drop IEND
        png.extend_from_slice(&100u32.to_be_bytes());
        png.extend_from_slice(b"tEXt");
        png.extend_from_slice(b"short");
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.get("parameters"), Some("a cat"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn skips_non_text_chunks() {
        let mut png = PNG_SIGNATURE.to_vec();
        push_chunk(&mut png, b"IHDR", &[0; 13]);
        push_chunk(&mut png, b"tEXt", b"Software\0NovelAI");
        let bag = read_text_chunks(&png, LIMIT).unwrap();
        assert_eq!(bag.get("Software"), Some("NovelAI"));
    }
}
