//! Image management module
//!
//! Images are named directory trees kept in a local store and moved between
//! hosts as gzip-compressed tar archives.

pub mod archive;
pub mod builder;
pub mod store;

pub use archive::{format_digest, DigestWriter, ImageArchive, DIGEST_PREFIX};
pub use builder::{BuildContext, BuildOutcome, ImageBuilder, NOT_IMPLEMENTED_MESSAGE};
pub use store::{ImageContent, ImageStore, StagedImage};
