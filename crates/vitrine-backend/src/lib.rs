//! Persistent storage backends for the Vitrine content store.
//!
//! A backend is a plain key-value store with three independent named
//! collections (see [`Collection`]). It never interprets values: the content
//! store above it owns the encoding of settings and project records, and
//! image blobs are stored as raw bytes.
//!
//! # Backends
//!
//! All backends implement the [`Backend`] trait and are opened through a
//! [`Connector`]:
//!
//! - [`InMemoryBackend`] / [`InMemoryConnector`] -- map-based store for tests
//!   and embedding, with an optional byte quota
//! - [`FsBackend`] / [`FsConnector`] -- one directory per collection, atomic
//!   per-key writes
//!
//! # Design Rules
//!
//! 1. Writes are atomic per key; there are no multi-key transactions.
//! 2. Opening provisions missing collections; it never deletes data.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod collection;
pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use collection::Collection;
pub use error::{BackendError, BackendResult};
pub use fs::{FsBackend, FsConnector, SCHEMA_VERSION};
pub use memory::{InMemoryBackend, InMemoryConnector};
pub use traits::{Backend, Connector};
