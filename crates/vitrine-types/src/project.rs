use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::{ImageKey, ProjectId};

/// Fewest images a project may hold.
pub const MIN_PROJECT_IMAGES: usize = 1;

/// Most images a project may hold.
pub const MAX_PROJECT_IMAGES: usize = 6;

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// A geolocated project shown on the site map, with its photo set.
///
/// Timestamps are unix milliseconds. Records written by older builds may
/// lack them; they decode as 0 and therefore sort last.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub image_keys: Vec<ImageKey>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Project {
    /// Build a fresh record from a validated submission.
    pub fn create(id: ProjectId, new: NewProject, now: u64) -> Self {
        Self {
            id,
            name: new.name,
            lat: new.lat,
            lng: new.lng,
            image_keys: new.image_keys,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the record-level invariants: a name, finite coordinates and
    /// between one and six images.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.name, self.lat, self.lng, &self.image_keys)
    }

    /// Ordering for listings: most recently updated first, ties broken by
    /// most recently created.
    pub fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
    }
}

/// Fields supplied when adding a project. The store assigns id and
/// timestamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewProject {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub image_keys: Vec<ImageKey>,
}

impl NewProject {
    pub fn new(
        name: impl Into<String>,
        lat: f64,
        lng: f64,
        image_keys: impl IntoIterator<Item = ImageKey>,
    ) -> Self {
        Self {
            name: name.into(),
            lat,
            lng,
            image_keys: image_keys.into_iter().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_fields(&self.name, self.lat, self.lng, &self.image_keys)
    }
}

/// Partial update for an existing project.
///
/// Every field is optional; absent fields keep their stored value. The id
/// and timestamps are not part of the patch, and unknown fields are
/// rejected when a patch is decoded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keys: Option<Vec<ImageKey>>,
}

impl ProjectPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn location(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }

    pub fn image_keys(mut self, keys: impl IntoIterator<Item = ImageKey>) -> Self {
        self.image_keys = Some(keys.into_iter().collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.lat.is_none() && self.lng.is_none() && self.image_keys.is_none()
    }

    /// Merge this patch over `existing`, keeping its id and creation time and
    /// stamping `updated_at` with `now`. The result is not validated.
    pub fn apply(&self, existing: &Project, now: u64) -> Project {
        Project {
            id: existing.id.clone(),
            name: self.name.clone().unwrap_or_else(|| existing.name.clone()),
            lat: self.lat.unwrap_or(existing.lat),
            lng: self.lng.unwrap_or(existing.lng),
            image_keys: self
                .image_keys
                .clone()
                .unwrap_or_else(|| existing.image_keys.clone()),
            created_at: existing.created_at,
            updated_at: now,
        }
    }
}

fn validate_fields(
    name: &str,
    lat: f64,
    lng: f64,
    image_keys: &[ImageKey],
) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    for (field, value) in [("lat", lat), ("lng", lng)] {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate { field, value });
        }
    }
    if image_keys.len() < MIN_PROJECT_IMAGES {
        return Err(ValidationError::TooFewImages {
            min: MIN_PROJECT_IMAGES,
        });
    }
    if image_keys.len() > MAX_PROJECT_IMAGES {
        return Err(ValidationError::TooManyImages {
            max: MAX_PROJECT_IMAGES,
            actual: image_keys.len(),
        });
    }
    Ok(())
}

/// Range check for map coordinates, applied by input collaborators before a
/// submission reaches the store.
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), ValidationError> {
    for (field, value, (min, max)) in [("lat", lat, LATITUDE_RANGE), ("lng", lng, LONGITUDE_RANGE)] {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteCoordinate { field, value });
        }
        if value < min || value > max {
            return Err(ValidationError::CoordinateOutOfRange {
                field,
                value,
                min,
                max,
            });
        }
    }
    Ok(())
}
