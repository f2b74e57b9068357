//! Archive handling utilities.
//!
//! Package and livery archives are plain ZIP files, extracted natively with
//! the zip crate. Entry paths are sanitized against the destination root.

pub mod extract;

pub use extract::{
    ensure_zip, extract_archive, ExtractError, ExtractStats, ExtractionTarget, Placement,
};
