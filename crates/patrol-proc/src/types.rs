use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
	#[default]
	Stopped,
	Running,
	Error,
}

impl ProcessStatus {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessStatus::Running)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ProcessStatus::Stopped => "stopped",
			ProcessStatus::Running => "running",
			ProcessStatus::Error => "error",
		}
	}
}

impl std::fmt::Display for ProcessStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Static projection of a managed process. This is the only part that is
/// written to the catalog file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessDef {
	pub id: String,
	pub name: String,
	pub script_path: PathBuf,
	pub cwd: PathBuf,
	pub command: String,
	/// Advisory only, see [`crate::script::extract_port`].
	#[serde(default)]
	pub port: String,
	#[serde(default)]
	pub pinned: bool,
	#[serde(default)]
	pub config_file: String,
}

/// Static projection plus freshly reconciled runtime state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
	#[serde(flatten)]
	pub def: ProcessDef,
	pub status: ProcessStatus,
	pub pid: Option<u32>,
	pub started_at: Option<DateTime<Local>>,
	pub exit_code: Option<i32>,
	pub restart_count: u32,
}

impl ProcessRecord {
	pub fn id(&self) -> &str {
		&self.def.id
	}

	pub fn name(&self) -> &str {
		&self.def.name
	}
}

/// Incremental view over a log buffer, for pollers that remember where they
/// left off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogPage {
	pub lines: Vec<String>,
	pub offset: usize,
	pub total: usize,
}
