//! Image builder
//!
//! Building images from a build file is not supported yet; the builder
//! validates its inputs and reports that outcome.

use crate::error::Result;
use crate::storage::validate_name;
use std::path::PathBuf;
use tracing::info;

/// Message shown when a build is requested
pub const NOT_IMPLEMENTED_MESSAGE: &str = "Building images is not implemented yet.";

/// Build context for image building
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Name of the image to produce
    pub image: String,
    /// Build file path
    pub build_file: PathBuf,
}

impl BuildContext {
    /// Create a new build context
    pub fn new(image: &str, build_file: PathBuf) -> Self {
        Self {
            image: image.to_string(),
            build_file,
        }
    }
}

/// Result of a build request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    NotImplemented,
}

/// Image builder
pub struct ImageBuilder {
    context: BuildContext,
}

impl ImageBuilder {
    /// Create a new image builder
    pub fn new(context: BuildContext) -> Self {
        Self { context }
    }

    /// Build the image. Only the image name is checked.
    pub fn build(&self) -> Result<BuildOutcome> {
        validate_name(&self.context.image)?;
        info!(
            image = %self.context.image,
            file = %self.context.build_file.display(),
            "image build requested"
        );
        Ok(BuildOutcome::NotImplemented)
    }
}
