//! Container lifecycle management through the `docker` command-line tool.
//!
//! [`Driver`] turns each lifecycle action into a `docker` invocation and
//! parses what comes back. Process execution sits behind [`Backend`] so the
//! driver can be exercised without a daemon.

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;

use std::path::Path;

use sha2::{Digest, Sha256};

pub use backend::{Backend, Subprocess};
pub use config::StackedConfig;
pub use driver::{ContainerState, CreateParams, Driver};
pub use error::{DriverError, Result};

/// Stable container name for a project directory: `dockdriver-<dirname>-<hash>`.
pub fn container_name(project_dir: &Path) -> String {
    let basename = project_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project");

    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let hash = format!(
        "{:x}",
        Sha256::digest(canonical.as_os_str().as_encoded_bytes())
    );

    format!("dockdriver-{}-{}", basename, &hash[..8])
}
