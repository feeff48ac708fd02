use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reading or writing the process catalog. Lifecycle problems
/// (unknown id, already running, spawn failure) are not errors; they show
/// up as `false`/`None` results and in the process status.
#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("catalog I/O error on {}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("catalog {} is not valid JSON: {source}", .path.display())]
	Corrupt {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to encode catalog: {0}")]
	Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
