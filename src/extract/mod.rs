//! Raw metadata extraction from image containers.
//!
//! - [`png::read_text_chunks`]: `tEXt` / `zTXt` / `iTXt` chunks of a PNG stream
//! - [`exif::TagReader`]: the three EXIF tags used by JPEG and WebP writers
//!
//! Both produce a [`RawMetadataBag`], the keyed text fields the parser cascade
//! consumes.

pub mod exif;
pub mod png;

pub use exif::{ExifTags, NomExifReader, TagReader};
pub use png::{PNG_SIGNATURE, read_text_chunks};

/// Field name to raw text, in first-seen order.
///
/// Keys are case-sensitive and the first occurrence of a key wins. Outside this
/// crate a bag can only be built whole (via `FromIterator`), so it is immutable
/// once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMetadataBag {
    fields: Vec<(String, String)>,
}

impl RawMetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless `key` is already present. Returns `false` for a dropped duplicate.
    pub(crate) fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.fields.push((key, value.into()));
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The value of `key` unless it is missing or whitespace-only.
    pub fn get_nonblank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Comma-joined key list, used in detection paths.
    pub fn key_list(&self) -> String {
        self.keys().collect::<Vec<_>>().join(",")
    }

    /// The whole bag as a JSON object string.
    pub fn dump(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}

impl FromIterator<(String, String)> for RawMetadataBag {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (key, value) in iter {
            bag.insert(key, value);
        }
        bag
    }
}
