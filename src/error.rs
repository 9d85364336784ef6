use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Reasons a counting run is aborted.
#[derive(Error, Debug)]
pub enum CountError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line mentioned a pull request event but wasn't valid JSON.
    #[error("{}:{line}: invalid JSON", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to list input files")]
    Walk(#[from] walkdir::Error),
}
