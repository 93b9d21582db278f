//! Local content store for the Vitrine site.
//!
//! Persists the content a small portfolio site shows: five hero slides, an
//! ordered gallery, and a set of geolocated projects, each pointing at image
//! blobs by [`ImageKey`](vitrine_types::ImageKey). Deletions are
//! reference-checked so an image disappears only once nothing shows it.
//!
//! # Key Types
//!
//! - [`ContentStore`] -- the facade every collaborator talks to
//! - [`DisplayHandle`] -- revocable, memoized view of one stored image
//! - [`ReferenceIndex`] -- image keys reachable from hero, gallery and projects
//! - [`CleanupReport`] -- outcome of a best-effort cascade or sweep
//! - [`StoreConfig`] -- backend selection, usually read from `vitrine.toml`
//!
//! # Design Rules
//!
//! 1. Validation happens before any I/O; a rejected call leaves state untouched.
//! 2. Reference counts are never stored. Every check rebuilds the index.
//! 3. When a reference check cannot complete, the image is kept.
//! 4. Image cleanup after a project change never fails the change itself.
//! 5. Backend errors are propagated with the collection and key they hit.

pub mod config;
pub mod error;
pub mod handle;
pub mod references;
pub mod report;
pub mod store;

pub use config::{BackendKind, ConfigError, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use handle::{DisplayHandle, HandleCache, HandleTicket};
pub use references::{ReferenceIndex, Referrer};
pub use report::{CleanupFailure, CleanupReport, Disposition};
pub use store::{ContentStore, GALLERY_KEY, HERO_SLIDES_KEY};

// Re-export the record types callers pass in and get back.
pub use vitrine_types::{HeroSlides, ImageKey, NewProject, Project, ProjectId, ProjectPatch};
