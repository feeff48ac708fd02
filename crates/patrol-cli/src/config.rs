use patrol_proc::SupervisorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "patrol";

// ── Global config (~/.config/patrol/config.toml) ────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PatrolConfig {
	#[serde(default)]
	pub storage: StorageConfig,
	#[serde(default)]
	pub supervisor: SupervisorSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
	pub catalog_path: Option<String>,
	pub queue_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
	#[serde(default = "default_log_capacity")]
	pub log_capacity: usize,
	#[serde(default = "default_stop_grace_secs")]
	pub stop_grace_secs: u64,
	#[serde(default = "default_subscriber_buffer")]
	pub subscriber_buffer: usize,
}

impl Default for SupervisorSection {
	fn default() -> Self {
		Self {
			log_capacity: default_log_capacity(),
			stop_grace_secs: default_stop_grace_secs(),
			subscriber_buffer: default_subscriber_buffer(),
		}
	}
}

fn default_log_capacity() -> usize { 5000 }
fn default_stop_grace_secs() -> u64 { 5 }
fn default_subscriber_buffer() -> usize { 1024 }

impl PatrolConfig {
	pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(content)
	}

	/// `PATROL_CATALOG`, then the config file, then the state dir.
	pub fn catalog_path(&self) -> PathBuf {
		resolve_path(
			std::env::var("PATROL_CATALOG").ok(),
			self.storage.catalog_path.as_deref(),
			state_dir().join("services.json"),
		)
	}

	/// `PATROL_QUEUE`, then the config file, then the state dir.
	pub fn queue_path(&self) -> PathBuf {
		resolve_path(
			std::env::var("PATROL_QUEUE").ok(),
			self.storage.queue_path.as_deref(),
			state_dir().join("mq.json"),
		)
	}

	pub fn supervisor_config(&self) -> SupervisorConfig {
		SupervisorConfig {
			log_capacity: self.supervisor.log_capacity,
			stop_grace: Duration::from_secs(self.supervisor.stop_grace_secs),
			subscriber_buffer: self.supervisor.subscriber_buffer,
		}
	}
}

/// A non-empty env value wins over the config file, which wins over
/// `default`.
fn resolve_path(env_value: Option<String>, configured: Option<&str>, default: PathBuf) -> PathBuf {
	if let Some(path) = env_value.filter(|p| !p.is_empty()) {
		return expand_tilde(&path);
	}
	match configured {
		Some(path) => expand_tilde(path),
		None => default,
	}
}

pub fn load_config() -> PatrolConfig {
	load_config_from(&config_dir().join("config.toml"))
}

fn load_config_from(path: &Path) -> PatrolConfig {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match PatrolConfig::from_toml(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	PatrolConfig::default()
}

// ── XDG locations ────────────────────────────────────────────────────────────

pub fn state_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".local").join("state").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME)
	}
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".config").join(APP_NAME)
	} else {
		PathBuf::from("/tmp").join(APP_NAME).join("config")
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

fn expand_tilde(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~/") {
		if let Some(home) = home_dir() {
			return home.join(rest);
		}
	}
	PathBuf::from(path)
}
