//! Foundation types for the Vitrine content store.
//!
//! Every other Vitrine crate depends on `vitrine-types`. Nothing here does
//! I/O: these are the identifiers, records and invariant checks that the
//! store and its collaborators share.
//!
//! # Key Types
//!
//! - [`ImageKey`] — opaque, never-reused identifier of an image blob
//! - [`ProjectId`] — slug plus random suffix identifying a project
//! - [`Project`] / [`NewProject`] / [`ProjectPatch`] — project records,
//!   submissions and typed partial updates
//! - [`HeroSlides`] — the five-slot hero carousel
//! - [`ValidationError`] — invariant violations in caller-supplied data

pub mod diff;
pub mod error;
pub mod identity;
pub mod project;
pub mod settings;
pub mod temporal;

pub use diff::removed_keys;
pub use error::ValidationError;
pub use identity::{random_suffix, slugify, ImageKey, ProjectId};
pub use project::{
    validate_coordinates, NewProject, Project, ProjectPatch, MAX_PROJECT_IMAGES,
    MIN_PROJECT_IMAGES,
};
pub use settings::{HeroSlides, HERO_SLIDE_COUNT};
pub use temporal::now_ms;
