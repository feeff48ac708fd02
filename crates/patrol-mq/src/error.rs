use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("queue I/O error on {}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// The queue file exists but does not parse. Nothing is written until
	/// it is fixed by hand.
	#[error("queue file {} is corrupt: {source}", .path.display())]
	Corrupt {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to encode queue: {0}")]
	Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
