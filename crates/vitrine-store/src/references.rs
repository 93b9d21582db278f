//! The derived image reference index.
//!
//! Nothing persists reference counts. The index is rebuilt from the hero
//! slides, the gallery list and every project whenever a deletion needs
//! to know whether a key is still in use.

use std::collections::HashMap;

use serde::Serialize;
use vitrine_types::{HeroSlides, ImageKey, Project, ProjectId};

/// Something that points at an image key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Referrer {
    /// Slot in the hero carousel (0-based).
    HeroSlide { slot: usize },
    /// Position in the gallery list (0 = newest).
    Gallery { position: usize },
    /// A project's photo set.
    Project { id: ProjectId },
}

/// Every image key reachable from hero slides, the gallery or a project,
/// with the referrers for each.
#[derive(Clone, Debug, Default)]
pub struct ReferenceIndex {
    refs: HashMap<ImageKey, Vec<Referrer>>,
}

impl ReferenceIndex {
    pub fn build(hero: Option<&HeroSlides>, gallery: &[ImageKey], projects: &[Project]) -> Self {
        let mut index = Self::default();
        if let Some(slides) = hero {
            for (slot, key) in slides.keys().iter().enumerate() {
                index.add(key, Referrer::HeroSlide { slot });
            }
        }
        for (position, key) in gallery.iter().enumerate() {
            index.add(key, Referrer::Gallery { position });
        }
        for project in projects {
            for key in &project.image_keys {
                let referrer = Referrer::Project {
                    id: project.id.clone(),
                };
                // A project listing the same key twice counts once.
                let entry = index.refs.entry(key.clone()).or_default();
                if !entry.contains(&referrer) {
                    entry.push(referrer);
                }
            }
        }
        index
    }

    fn add(&mut self, key: &ImageKey, referrer: Referrer) {
        self.refs.entry(key.clone()).or_default().push(referrer);
    }

    pub fn contains(&self, key: &ImageKey) -> bool {
        self.refs.contains_key(key)
    }

    /// Referrers of `key`; empty when unreferenced.
    pub fn referrers(&self, key: &ImageKey) -> &[Referrer] {
        self.refs.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct referenced keys.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Referenced keys, sorted.
    pub fn keys(&self) -> Vec<&ImageKey> {
        let mut keys: Vec<&ImageKey> = self.refs.keys().collect();
        keys.sort();
        keys
    }
}
