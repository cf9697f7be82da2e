//! hearth-project: plant description loading.
//!
//! A YAML schema describing the plant (sensors and relays by name), a
//! structural validator, and a builder that resolves names against the I/O
//! backend and constructs the runnable `Plant`, `Models` and scheduler.
//!
//! Cross-field semantic invariants (limit ordering, law shape) are
//! re-validated by each entity's `online()`; this crate only guarantees the
//! description is structurally sound.

pub mod builder;
pub mod schema;
pub mod validate;

pub use builder::{BuildError, build};
pub use schema::ProjectDef;
pub use validate::{ValidationError, validate_project};

use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ProjectError {
    #[error("project read failure")]
    Io(#[from] std::io::Error),

    #[error("project parse failure")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Load and validate a project file.
pub fn load(path: &Path) -> Result<ProjectDef, ProjectError> {
    let content = std::fs::read_to_string(path)?;
    let project: ProjectDef = serde_yaml::from_str(&content)?;
    validate_project(&project)?;
    Ok(project)
}
