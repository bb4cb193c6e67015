//! Input validation
//!
//! Manifest and request checks that run before any side effect.

pub mod manifest;
pub mod request;

pub use manifest::{validate_manifest, ManifestKind};
pub use request::{validate_relative_path, validate_request, ValidatedRequest};
