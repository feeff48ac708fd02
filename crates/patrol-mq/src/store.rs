use chrono::Local;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, StoreError};
use crate::message::{Message, MessageStatus, Meta};

pub const DEFAULT_QUERY_LIMIT: usize = 200;

/// Filter and page for [`MessageStore::query`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
	/// One or more statuses separated by commas, matched with OR.
	#[serde(default)]
	pub status: Option<String>,
	/// Exact match on `source`.
	#[serde(default)]
	pub source: Option<String>,
	#[serde(default = "default_limit")]
	pub limit: usize,
	#[serde(default)]
	pub offset: usize,
}

fn default_limit() -> usize {
	DEFAULT_QUERY_LIMIT
}

impl Default for Query {
	fn default() -> Self {
		Self {
			status: None,
			source: None,
			limit: DEFAULT_QUERY_LIMIT,
			offset: 0,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryPage {
	pub messages: Vec<Message>,
	/// Size of the filtered view, not of the whole store.
	pub total: usize,
	pub offset: usize,
	pub limit: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
	pub total: usize,
	pub new: usize,
	pub ack: usize,
	pub done: usize,
}

/// Append-only event queue kept as a single JSON file.
///
/// Every mutation is a full read-modify-write under one lock: an in-process
/// mutex plus an exclusive OS lock on `<queue>.lock`, so two processes
/// sharing the file also serialize. Writes land in a temp file that is
/// renamed over the queue, which lets reads run without the lock and still
/// see a whole snapshot.
pub struct MessageStore {
	path: PathBuf,
	lock_path: PathBuf,
	write_lock: Mutex<()>,
}

impl MessageStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let lock_path = sibling(&path, "lock");
		Self {
			path,
			lock_path,
			write_lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Source and title are expected to be non-empty; that is checked by
	/// the caller.
	pub fn publish(
		&self,
		source: &str,
		kind: &str,
		title: &str,
		detail: Option<&str>,
		meta: Option<Meta>,
	) -> Result<Message> {
		let message = Message::new(
			source,
			kind,
			title,
			detail.unwrap_or_default(),
			meta.unwrap_or_default(),
		);
		self.mutate(|messages| {
			messages.push(message.clone());
			((), true)
		})?;
		tracing::info!("published {} from {}: {}", message.id, message.source, message.title);
		Ok(message)
	}

	/// Newest first. Not serialized against writers; it reads whichever
	/// snapshot is on disk.
	pub fn query(&self, query: &Query) -> Result<QueryPage> {
		let statuses = query
			.status
			.as_deref()
			.filter(|s| !s.trim().is_empty())
			.map(parse_status_filter);

		let mut filtered: Vec<Message> = self
			.load()?
			.into_iter()
			.filter(|m| statuses.as_ref().map_or(true, |set| set.contains(&m.status)))
			.filter(|m| query.source.as_deref().map_or(true, |src| m.source == src))
			.collect();

		let total = filtered.len();
		filtered.reverse();
		filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		let messages = filtered
			.into_iter()
			.skip(query.offset)
			.take(query.limit)
			.collect();

		Ok(QueryPage {
			messages,
			total,
			offset: query.offset,
			limit: query.limit,
		})
	}

	pub fn get(&self, id: &str) -> Result<Option<Message>> {
		Ok(self.load()?.into_iter().find(|m| m.id == id))
	}

	/// `new -> ack`. An ack or done message comes back unchanged.
	pub fn ack(&self, id: &str) -> Result<Option<Message>> {
		let now = Local::now();
		self.mutate(|messages| match messages.iter_mut().find(|m| m.id == id) {
			Some(m) => {
				let changed = m.ack(now);
				(Some(m.clone()), changed)
			}
			None => (None, false),
		})
	}

	/// `new|ack -> done`. A done message comes back unchanged.
	pub fn done(&self, id: &str) -> Result<Option<Message>> {
		let now = Local::now();
		self.mutate(|messages| match messages.iter_mut().find(|m| m.id == id) {
			Some(m) => {
				let changed = m.resolve(now);
				(Some(m.clone()), changed)
			}
			None => (None, false),
		})
	}

	/// Resolve every open message created no later than `before_id`.
	/// Returns how many changed; 0 when `before_id` is unknown.
	pub fn batch_done(&self, before_id: &str) -> Result<usize> {
		let now = Local::now();
		let count = self.mutate(|messages| {
			let Some(cutoff) = messages.iter().find(|m| m.id == before_id).map(|m| m.created_at) else {
				return (0, false);
			};
			let count = messages
				.iter_mut()
				.filter(|m| m.created_at <= cutoff)
				.map(|m| m.resolve(now))
				.filter(|changed| *changed)
				.count();
			(count, count > 0)
		})?;
		if count > 0 {
			tracing::info!("batch done: {} message(s) up to {}", count, before_id);
		}
		Ok(count)
	}

	/// Ack every `new` message.
	pub fn batch_ack_new(&self) -> Result<usize> {
		let now = Local::now();
		let count = self.mutate(|messages| {
			let count = messages.iter_mut().map(|m| m.ack(now)).filter(|changed| *changed).count();
			(count, count > 0)
		})?;
		if count > 0 {
			tracing::info!("batch ack: {} message(s)", count);
		}
		Ok(count)
	}

	pub fn stats(&self) -> Result<Stats> {
		let messages = self.load()?;
		let mut stats = Stats {
			total: messages.len(),
			..Stats::default()
		};
		for m in &messages {
			match m.status {
				MessageStatus::New => stats.new += 1,
				MessageStatus::Ack => stats.ack += 1,
				MessageStatus::Done => stats.done += 1,
			}
		}
		Ok(stats)
	}

	/// Run `apply` on the whole queue under the write lock. `apply` returns
	/// its result and whether anything changed; only changes are written.
	fn mutate<T>(&self, apply: impl FnOnce(&mut Vec<Message>) -> (T, bool)) -> Result<T> {
		let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
		let _file_lock = self.lock_file()?;

		let mut messages = self.load()?;
		let (result, dirty) = apply(&mut messages);
		if dirty {
			self.save(&messages)?;
		}
		Ok(result)
	}

	fn lock_file(&self) -> Result<File> {
		self.ensure_parent()?;
		let file = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&self.lock_path)
			.map_err(|source| self.io_error(&self.lock_path, source))?;
		file.lock_exclusive()
			.map_err(|source| self.io_error(&self.lock_path, source))?;
		Ok(file)
	}

	fn load(&self) -> Result<Vec<Message>> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(source) => return Err(self.io_error(&self.path, source)),
		};
		if content.trim().is_empty() {
			return Ok(Vec::new());
		}
		serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
			path: self.path.clone(),
			source,
		})
	}

	fn save(&self, messages: &[Message]) -> Result<()> {
		self.ensure_parent()?;
		let data = serde_json::to_string_pretty(messages)?;
		let tmp = sibling(&self.path, "tmp");
		fs::write(&tmp, data).map_err(|source| self.io_error(&tmp, source))?;
		fs::rename(&tmp, &self.path).map_err(|source| self.io_error(&self.path, source))
	}

	fn ensure_parent(&self) -> Result<()> {
		match self.path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => {
				fs::create_dir_all(parent).map_err(|source| self.io_error(parent, source))
			}
			_ => Ok(()),
		}
	}

	fn io_error(&self, path: &Path, source: std::io::Error) -> StoreError {
		StoreError::Io {
			path: path.to_path_buf(),
			source,
		}
	}
}

/// `"new, ack"` -> {New, Ack}. Unknown names are dropped, so a filter made
/// only of unknown names matches nothing.
fn parse_status_filter(raw: &str) -> Vec<MessageStatus> {
	raw.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.filter_map(|s| s.parse().ok())
		.collect()
}

/// `mq.json` -> `mq.json.<ext>`
fn sibling(path: &Path, ext: &str) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(".");
	name.push(ext);
	path.with_file_name(name)
}
