use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type Meta = serde_json::Map<String, serde_json::Value>;

/// `new -> ack -> done`, or `new -> done`. `done` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
	New,
	Ack,
	Done,
}

impl MessageStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			MessageStatus::New => "new",
			MessageStatus::Ack => "ack",
			MessageStatus::Done => "done",
		}
	}
}

impl std::fmt::Display for MessageStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"new" => Ok(MessageStatus::New),
			"ack" => Ok(MessageStatus::Ack),
			"done" => Ok(MessageStatus::Done),
			other => Err(format!("unknown message status: {}", other)),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
	pub id: String,
	pub source: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub title: String,
	#[serde(default)]
	pub detail: String,
	pub status: MessageStatus,
	pub created_at: DateTime<Local>,
	pub acked_at: Option<DateTime<Local>>,
	pub done_at: Option<DateTime<Local>>,
	#[serde(default)]
	pub meta: Meta,
}

impl Message {
	pub fn new(source: &str, kind: &str, title: &str, detail: &str, meta: Meta) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			source: source.to_string(),
			kind: kind.to_string(),
			title: title.to_string(),
			detail: detail.to_string(),
			status: MessageStatus::New,
			created_at: Local::now(),
			acked_at: None,
			done_at: None,
			meta,
		}
	}

	/// `new -> ack`. Anything else is left alone. Returns whether the
	/// message changed.
	pub fn ack(&mut self, now: DateTime<Local>) -> bool {
		if self.status != MessageStatus::New {
			return false;
		}
		self.status = MessageStatus::Ack;
		self.acked_at = Some(now);
		true
	}

	/// `new|ack -> done`. A message that was never acked gets
	/// `acked_at = done_at`, so every done message carries both stamps.
	pub fn resolve(&mut self, now: DateTime<Local>) -> bool {
		if self.status == MessageStatus::Done {
			return false;
		}
		self.status = MessageStatus::Done;
		self.done_at = Some(now);
		if self.acked_at.is_none() {
			self.acked_at = Some(now);
		}
		true
	}
}
