use std::fmt;

use serde::{Deserialize, Serialize};

/// The three independent key spaces every backend provides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Singleton settings values (hero slides, gallery list).
    Settings,
    /// Image blobs keyed by image key.
    Images,
    /// Project records keyed by project id.
    Projects,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Settings, Self::Images, Self::Projects];

    /// Stable on-disk name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Images => "images",
            Self::Projects => "projects",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
