use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::ImageKey;

/// Number of slides in the home page hero carousel.
pub const HERO_SLIDE_COUNT: usize = 5;

/// The full hero carousel: exactly five image keys in display order.
///
/// Slots may repeat a key. A partial set cannot be constructed, which keeps
/// the all-or-nothing rule out of every caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<ImageKey>", try_from = "Vec<ImageKey>")]
pub struct HeroSlides([ImageKey; HERO_SLIDE_COUNT]);

impl HeroSlides {
    pub fn keys(&self) -> &[ImageKey] {
        &self.0
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.0.contains(key)
    }

    pub fn into_vec(self) -> Vec<ImageKey> {
        self.0.into()
    }
}

impl TryFrom<Vec<ImageKey>> for HeroSlides {
    type Error = ValidationError;

    fn try_from(keys: Vec<ImageKey>) -> Result<Self, Self::Error> {
        let actual = keys.len();
        <[ImageKey; HERO_SLIDE_COUNT]>::try_from(keys)
            .map(Self)
            .map_err(|_| ValidationError::HeroSlideCount {
                expected: HERO_SLIDE_COUNT,
                actual,
            })
    }
}

impl From<HeroSlides> for Vec<ImageKey> {
    fn from(slides: HeroSlides) -> Self {
        slides.into_vec()
    }
}
