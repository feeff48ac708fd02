use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::error::{RegistryError, Result};
use crate::output::{LogSubscription, SubscriberId, DEFAULT_LOG_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER};
use crate::process::ManagedProcess;
use crate::script;
use crate::types::*;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	/// Lines kept per process before the oldest is evicted.
	pub log_capacity: usize,
	/// How long `stop` waits after SIGTERM before sending SIGKILL.
	pub stop_grace: Duration,
	/// Per-subscriber queue depth for live tailing.
	pub subscriber_buffer: usize,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			log_capacity: DEFAULT_LOG_CAPACITY,
			stop_grace: DEFAULT_STOP_GRACE,
			subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
		}
	}
}

/// Owns every managed process and is the only writer of the catalog file.
///
/// Runtime state is never persisted: after [`Registry::open`] every entry is
/// stopped. Running two registries against the same catalog is not
/// supported.
pub struct Registry {
	catalog_path: PathBuf,
	config: SupervisorConfig,
	processes: RwLock<Vec<Arc<ManagedProcess>>>,
}

impl Registry {
	pub fn open(catalog_path: impl Into<PathBuf>, config: SupervisorConfig) -> Result<Arc<Self>> {
		let catalog_path = catalog_path.into();
		let defs = load_catalog(&catalog_path)?;

		let processes = defs
			.into_iter()
			.map(|mut def| {
				if def.port.is_empty() {
					def.port = script::extract_port(&def.script_path);
				}
				Arc::new(ManagedProcess::new(def, &config))
			})
			.collect::<Vec<_>>();

		tracing::info!(
			"loaded {} process(es) from {}",
			processes.len(),
			catalog_path.display()
		);

		Ok(Arc::new(Self {
			catalog_path,
			config,
			processes: RwLock::new(processes),
		}))
	}

	pub fn catalog_path(&self) -> &Path {
		&self.catalog_path
	}

	/// Add a script. The caller has already checked that `script_path`
	/// exists.
	pub async fn register(&self, script_path: &Path, name: Option<&str>) -> Result<ProcessRecord> {
		let script_path = std::path::absolute(script_path).map_err(|source| RegistryError::Io {
			path: script_path.to_path_buf(),
			source,
		})?;
		let cwd = script_path
			.parent()
			.map(Path::to_path_buf)
			.unwrap_or_else(|| PathBuf::from("/"));
		let name = match name {
			Some(name) => name.to_string(),
			None => script::default_name(&script_path),
		};

		let def = ProcessDef {
			id: uuid::Uuid::new_v4().to_string(),
			name,
			command: script::resolve_command(&script_path),
			port: script::extract_port(&script_path),
			script_path,
			cwd,
			pinned: false,
			config_file: String::new(),
		};
		tracing::info!("registered {} as {} ({})", def.name, def.id, def.command);

		let process = Arc::new(ManagedProcess::new(def, &self.config));
		let mut processes = self.processes.write().await;
		let mut next = processes.clone();
		next.push(Arc::clone(&process));
		self.persist(&next).await?;
		*processes = next;
		drop(processes);

		Ok(process.snapshot().await)
	}

	/// Stop and forget a process. `Ok(false)` if the id is unknown.
	pub async fn unregister(&self, id: &str) -> Result<bool> {
		let Some(process) = self.find(id).await else {
			return Ok(false);
		};
		process.stop().await;

		let mut processes = self.processes.write().await;
		let next: Vec<_> = processes.iter().filter(|p| p.id() != id).cloned().collect();
		self.persist(&next).await?;
		*processes = next;
		tracing::info!("unregistered {}", id);
		Ok(true)
	}

	pub async fn start(&self, id: &str) -> bool {
		match self.find(id).await {
			Some(process) => process.start().await,
			None => false,
		}
	}

	pub async fn stop(&self, id: &str) -> bool {
		match self.find(id).await {
			Some(process) => process.stop().await,
			None => false,
		}
	}

	pub async fn restart(&self, id: &str) -> bool {
		match self.find(id).await {
			Some(process) => process.restart().await,
			None => false,
		}
	}

	pub async fn get(&self, id: &str) -> Option<ProcessRecord> {
		let process = self.find(id).await?;
		Some(process.snapshot().await)
	}

	/// Every process in registration order.
	pub async fn list_all(&self) -> Vec<ProcessRecord> {
		let processes = self.processes.read().await.clone();
		let mut records = Vec::with_capacity(processes.len());
		for process in processes {
			records.push(process.snapshot().await);
		}
		records
	}

	/// Buffered output; empty for an unknown id.
	pub async fn get_logs(&self, id: &str) -> Vec<String> {
		match self.find(id).await {
			Some(process) => process.logs().await,
			None => Vec::new(),
		}
	}

	pub async fn logs_since(&self, id: &str, offset: usize) -> Option<LogPage> {
		let process = self.find(id).await?;
		Some(process.logs_since(offset).await)
	}

	pub async fn subscribe_logs(&self, id: &str) -> Option<LogSubscription> {
		let process = self.find(id).await?;
		Some(process.subscribe().await)
	}

	pub async fn unsubscribe_logs(&self, id: &str, subscriber: SubscriberId) -> bool {
		match self.find(id).await {
			Some(process) => process.unsubscribe(subscriber).await,
			None => false,
		}
	}

	pub async fn set_port(&self, id: &str, port: &str) -> Result<Option<ProcessRecord>> {
		let port = port.trim().to_string();
		self.edit(id, move |def| def.port = port).await
	}

	pub async fn set_pinned(&self, id: &str, pinned: bool) -> Result<Option<ProcessRecord>> {
		self.edit(id, move |def| def.pinned = pinned).await
	}

	pub async fn set_config_file(&self, id: &str, config_file: &str) -> Result<Option<ProcessRecord>> {
		let config_file = config_file.to_string();
		self.edit(id, move |def| def.config_file = config_file).await
	}

	/// Stop everything that is still running.
	pub async fn shutdown(&self) {
		let processes = self.processes.read().await.clone();
		let mut stops = JoinSet::new();
		for process in processes {
			stops.spawn(async move { process.stop().await });
		}
		let mut count = 0;
		while let Some(result) = stops.join_next().await {
			if matches!(result, Ok(true)) {
				count += 1;
			}
		}
		if count > 0 {
			tracing::info!("stopped {} process(es) on shutdown", count);
		}
	}

	async fn edit(
		&self,
		id: &str,
		apply: impl FnOnce(&mut ProcessDef),
	) -> Result<Option<ProcessRecord>> {
		let processes = self.processes.write().await;
		let Some(process) = processes.iter().find(|p| p.id() == id).cloned() else {
			return Ok(None);
		};
		let mut edited = process.def().await;
		apply(&mut edited);

		let mut defs = Vec::with_capacity(processes.len());
		for p in processes.iter() {
			defs.push(if p.id() == id { edited.clone() } else { p.def().await });
		}
		save_catalog(&self.catalog_path, &defs)?;
		process.update_def(|def| *def = edited).await;
		drop(processes);
		Ok(Some(process.snapshot().await))
	}

	async fn find(&self, id: &str) -> Option<Arc<ManagedProcess>> {
		let processes = self.processes.read().await;
		processes.iter().find(|p| p.id() == id).cloned()
	}

	/// Write the catalog for `processes`. Callers commit the in-memory list
	/// only after this succeeds.
	async fn persist(&self, processes: &[Arc<ManagedProcess>]) -> Result<()> {
		let mut defs = Vec::with_capacity(processes.len());
		for process in processes {
			defs.push(process.def().await);
		}
		save_catalog(&self.catalog_path, &defs)
	}
}

fn load_catalog(path: &Path) -> Result<Vec<ProcessDef>> {
	let content = match std::fs::read_to_string(path) {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(source) => {
			return Err(RegistryError::Io {
				path: path.to_path_buf(),
				source,
			})
		}
	};
	if content.trim().is_empty() {
		return Ok(Vec::new());
	}
	serde_json::from_str(&content).map_err(|source| RegistryError::Corrupt {
		path: path.to_path_buf(),
		source,
	})
}

fn save_catalog(path: &Path, defs: &[ProcessDef]) -> Result<()> {
	let io_err = |source| RegistryError::Io {
		path: path.to_path_buf(),
		source,
	};
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		std::fs::create_dir_all(parent).map_err(io_err)?;
	}
	let data = serde_json::to_string_pretty(defs)?;
	let mut tmp = path.as_os_str().to_os_string();
	tmp.push(".tmp");
	let tmp = PathBuf::from(tmp);
	std::fs::write(&tmp, data).map_err(|source| RegistryError::Io {
		path: tmp.clone(),
		source,
	})?;
	std::fs::rename(&tmp, path).map_err(io_err)
}
