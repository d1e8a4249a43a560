use anyhow::{Context, Result};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::webp::WebP;
use img_parts::{Bytes, ImageEXIF};
use nom_exif::*;
use std::borrow::Cow;
use std::io::Cursor;

use super::RawMetadataBag;
use crate::pipeline::ContainerFormat;

/// Bag key for the EXIF `UserComment` tag.
pub const USER_COMMENT: &str = "UserComment";
/// Bag key for the EXIF `Software` tag.
pub const SOFTWARE: &str = "Software";
/// Bag key for the EXIF `ImageDescription` tag.
pub const IMAGE_DESCRIPTION: &str = "ImageDescription";

/// EXIF segments are `APP1` segments whose contents start with this prefix.
const APP1: u8 = 0xE1;
const EXIF_PREFIX: &[u8] = b"Exif\0\0";
/// SOI immediately followed by EOI.
const EMPTY_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];

/// The three EXIF tags generation tools write into JPEG and WebP files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifTags {
    pub user_comment: Option<String>,
    pub software: Option<String>,
    pub image_description: Option<String>,
}

impl ExifTags {
    /// Convert to a bag, skipping absent tags.
    pub fn into_bag(self) -> RawMetadataBag {
        [
            (USER_COMMENT, self.user_comment),
            (SOFTWARE, self.software),
            (IMAGE_DESCRIPTION, self.image_description),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect()
    }
}

/// Looks up named EXIF tags in an image stream.
///
/// The default implementation is [`NomExifReader`]; tests and embedders can
/// substitute their own. Failures are not errors: a reader that finds nothing
/// returns [`ExifTags::default`].
pub trait TagReader: Send + Sync {
    fn read_tags(&self, bytes: &[u8], format: ContainerFormat) -> ExifTags;
}

/// [`TagReader`] backed by `nom-exif`.
///
/// JPEG streams are handed over whole. For WebP the `EXIF` chunk is pulled out
/// with `img-parts` and re-wrapped as the `APP1` segment of an empty JPEG,
/// since `nom-exif` cannot identify a short bare TIFF stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct NomExifReader;

impl TagReader for NomExifReader {
    fn read_tags(&self, bytes: &[u8], format: ContainerFormat) -> ExifTags {
        let source = match format {
            ContainerFormat::WebP => match webp_exif_as_jpeg(bytes) {
                Ok(Some(jpeg)) => Cow::Owned(jpeg),
                Ok(None) => {
                    log::debug!("No EXIF chunk in WebP stream");
                    return ExifTags::default();
                }
                Err(e) => {
                    log::warn!("Failed to read WebP EXIF chunk: {e:#}");
                    return ExifTags::default();
                }
            },
            _ => Cow::Borrowed(bytes),
        };

        match read_exif_tags(&source) {
            Ok(tags) => tags,
            Err(e) => {
                log::warn!("Failed to read EXIF tags: {e:#}");
                ExifTags::default()
            }
        }
    }
}

/// Take the TIFF body of a WebP `EXIF` chunk and return it as a JPEG holding
/// a single `APP1` EXIF segment. `None` when the stream has no such chunk.
pub(crate) fn webp_exif_as_jpeg(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let webp = WebP::from_bytes(Bytes::copy_from_slice(bytes))
        .map_err(|e| anyhow::anyhow!("Failed to parse WebP: {e}"))?;
    let Some(exif) = webp.exif() else {
        return Ok(None);
    };
    let tiff = exif[..].strip_prefix(EXIF_PREFIX).unwrap_or(&exif[..]);
    if tiff.is_empty() {
        return Ok(None);
    }

    let mut jpeg = Jpeg::from_bytes(Bytes::from_static(EMPTY_JPEG))
        .map_err(|e| anyhow::anyhow!("Failed to build JPEG wrapper: {e}"))?;
    let mut contents = Vec::with_capacity(EXIF_PREFIX.len() + tiff.len());
    contents.extend_from_slice(EXIF_PREFIX);
    contents.extend_from_slice(tiff);
    jpeg.segments_mut()
        .insert(0, JpegSegment::new_with_contents(APP1, Bytes::from(contents)));
    Ok(Some(jpeg.encoder().bytes().to_vec()))
}

fn read_exif_tags(payload: &[u8]) -> Result<ExifTags> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::seekable(Cursor::new(payload.to_vec()))
        .context("Failed to open EXIF source")?;

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found");
            return Ok(ExifTags::default());
        }
    };
    let exif: Exif = iter.into();

    Ok(ExifTags {
        user_comment: exif.get(ExifTag::UserComment).and_then(user_comment_to_string),
        software: exif.get(ExifTag::Software).and_then(entry_to_string),
        image_description: exif.get(ExifTag::ImageDescription).and_then(entry_to_string),
    })
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').trim_end_matches('\0').to_string();
    if s.is_empty() { None } else { Some(s) }
}

/// `UserComment` is stored as undefined bytes behind an 8-byte charset code.
fn user_comment_to_string(val: &EntryValue) -> Option<String> {
    match val {
        EntryValue::Undefined(bytes) => {
            let s = decode_user_comment(bytes);
            let s = s.trim_end_matches('\0').trim();
            if s.is_empty() { None } else { Some(s.to_string()) }
        }
        other => entry_to_string(other),
    }
}

pub(crate) fn decode_user_comment(bytes: &[u8]) -> String {
    if bytes.len() < 8 {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let (charset, body) = bytes.split_at(8);
    match charset {
        b"UNICODE\0" => decode_utf16_guess(body),
        b"ASCII\0\0\0" | b"\0\0\0\0\0\0\0\0" => String::from_utf8_lossy(body).into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// UTF-16 without a BOM; endianness is guessed from where the zero bytes of
/// ASCII-range characters fall.
fn decode_utf16_guess(body: &[u8]) -> String {
    let pairs = body.chunks_exact(2);
    let (even_zeros, odd_zeros) = pairs
        .clone()
        .fold((0usize, 0usize), |(e, o), p| {
            (e + usize::from(p[0] == 0), o + usize::from(p[1] == 0))
        });
    let big_endian = even_zeros >= odd_zeros;
    let units = pairs.map(|p| {
        if big_endian {
            u16::from_be_bytes([p[0], p[1]])
        } else {
            u16::from_le_bytes([p[0], p[1]])
        }
    });
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}
