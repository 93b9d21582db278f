use std::borrow::Borrow;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::temporal::now_ms;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random part of a generated [`ImageKey`].
pub const IMAGE_KEY_SUFFIX_LEN: usize = 9;

/// Length of the random suffix appended to a [`ProjectId`] slug.
pub const PROJECT_ID_SUFFIX_LEN: usize = 6;

/// Longest slug kept in a [`ProjectId`]. Ids double as backend keys, and
/// the filesystem backend hex-encodes keys into file names.
pub const MAX_SLUG_LEN: usize = 64;

/// Prefix used for project ids whose name slugs to nothing.
const FALLBACK_SLUG: &str = "project";

/// `len` random lowercase base36 characters.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// URL-safe slug of a display name.
///
/// Lowercases the input, collapses every run of characters outside
/// `[a-z0-9]` into a single `-`, and strips leading and trailing hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for ch in name.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Opaque identifier for a stored image blob.
///
/// Generated keys have the form `img_<unix-millis>_<9 base36 chars>`. The
/// store never reuses a key; callers treat the contents as opaque.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    /// Generate a fresh key from the current time and a random suffix.
    pub fn generate() -> Self {
        Self(format!(
            "img_{}_{}",
            now_ms(),
            random_suffix(IMAGE_KEY_SUFFIX_LEN)
        ))
    }

    /// Wrap an existing key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageKey({})", self.0)
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for ImageKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Stable identifier of a project record.
///
/// The slug part is cosmetic; uniqueness comes from the random suffix, so two
/// projects with the same name still get distinct ids.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Derive a new id from a display name: `<slug>-<6 base36 chars>`.
    ///
    /// The slug is cut to [`MAX_SLUG_LEN`] characters.
    pub fn derive(name: &str) -> Self {
        let mut slug = slugify(name);
        // Slugs are ASCII, so any byte index is a char boundary.
        slug.truncate(MAX_SLUG_LEN);
        let slug = slug.trim_end_matches('-');
        let slug = if slug.is_empty() { FALLBACK_SLUG } else { slug };
        Self(format!("{slug}-{}", random_suffix(PROJECT_ID_SUFFIX_LEN)))
    }

    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectId({})", self.0)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
