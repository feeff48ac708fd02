use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use patrol_mq::{Message, MessageStatus, MessageStore, Meta, Query, QueryPage};
use serde::Serialize;

use crate::args::{resolve_id, ParsedArgs};
use crate::config::PatrolConfig;

const SCAN_LIMIT: usize = 50;
const SCAN_SUMMARY_ENTRIES: usize = 20;
const SCAN_DETAIL_CHARS: usize = 100;

pub fn cmd_mq(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let store = MessageStore::new(config.queue_path());
	let rest = args.get(1..).unwrap_or_default();

	match args.first().map(|s| s.as_str()) {
		Some("publish" | "pub") => cmd_publish(&store, rest),
		Some("list" | "ls") => cmd_list(&store, rest),
		Some("get") => {
			let id = resolve_message(&store, rest)?;
			print_json(&store.get(&id)?)
		}
		Some("ack") => {
			let id = resolve_message(&store, rest)?;
			print_json(&store.ack(&id)?)
		}
		Some("done") => {
			let id = resolve_message(&store, rest)?;
			print_json(&store.done(&id)?)
		}
		Some("batch-done") => {
			let id = resolve_message(&store, rest)?;
			let count = store.batch_done(&id)?;
			println!("{}", serde_json::json!({ "updated": count }));
			Ok(())
		}
		Some("batch-ack") => {
			let count = store.batch_ack_new()?;
			println!("{}", serde_json::json!({ "updated": count }));
			Ok(())
		}
		Some("stats") => print_json(&store.stats()?),
		Some("scan") => cmd_scan(&store, rest),
		Some(other) => bail!("unknown mq command: {}", other),
		None => bail!("usage: patrol mq <publish|list|get|ack|done|batch-done|batch-ack|stats|scan>"),
	}
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

fn cmd_publish(store: &MessageStore, args: &[String]) -> Result<()> {
	let parsed = ParsedArgs::parse(args, &["type", "detail", "meta"])?;
	let (Some(source), Some(title)) = (parsed.positional.first(), parsed.positional.get(1)) else {
		bail!("usage: patrol mq publish <source> <title> [--type T] [--detail D] [--meta k=v]...");
	};
	if source.trim().is_empty() || title.trim().is_empty() {
		bail!("source and title must not be empty");
	}

	let kind = parsed.value("type").unwrap_or("info");
	let meta = parse_meta(&parsed.values("meta"))?;
	let message = store.publish(source, kind, title, parsed.value("detail"), Some(meta))?;
	print_json(&message)
}

/// `k=v` pairs. A value that parses as JSON keeps its type, anything else is
/// stored as a string.
fn parse_meta(pairs: &[&str]) -> Result<Meta> {
	let mut meta = Meta::new();
	for pair in pairs {
		let Some((key, value)) = pair.split_once('=') else {
			bail!("--meta expects key=value, got '{}'", pair);
		};
		if key.is_empty() {
			bail!("--meta key must not be empty");
		}
		let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
		meta.insert(key.to_string(), value);
	}
	Ok(meta)
}

fn cmd_list(store: &MessageStore, args: &[String]) -> Result<()> {
	let parsed = ParsedArgs::parse(args, &["status", "source", "limit", "offset"])?;
	let mut query = Query {
		status: parsed.value("status").map(String::from),
		source: parsed.value("source").map(String::from),
		..Query::default()
	};
	if let Some(limit) = parsed.usize_value("limit")? {
		query.limit = limit;
	}
	if let Some(offset) = parsed.usize_value("offset")? {
		query.offset = offset;
	}

	let page = store.query(&query)?;
	if parsed.has("json") {
		return print_json(&page);
	}
	if page.messages.is_empty() {
		eprintln!("no messages");
		return Ok(());
	}
	for m in &page.messages {
		println!(
			" {} {} {} {} {}",
			status_label(m.status),
			m.id.get(..8).unwrap_or(m.id.as_str()).dimmed(),
			m.created_at.format("%m-%d %H:%M:%S"),
			format!("[{}]", m.source).cyan(),
			m.title
		);
	}
	if page.offset + page.messages.len() < page.total {
		eprintln!(
			"{}",
			format!("showing {}-{} of {}", page.offset + 1, page.offset + page.messages.len(), page.total).dimmed()
		);
	}
	Ok(())
}

fn status_label(status: MessageStatus) -> String {
	match status {
		MessageStatus::New => format!("{:<4}", "new").red().bold().to_string(),
		MessageStatus::Ack => format!("{:<4}", "ack").yellow().to_string(),
		MessageStatus::Done => format!("{:<4}", "done").dimmed().to_string(),
	}
}

/// Exact id or a unique prefix of one.
fn resolve_message(store: &MessageStore, args: &[String]) -> Result<String> {
	let Some(key) = args.first() else {
		bail!("missing message id");
	};
	if store.get(key)?.is_some() {
		return Ok(key.clone());
	}
	let all = store.query(&Query {
		limit: usize::MAX,
		..Query::default()
	})?;
	resolve_id(key, all.messages.iter().map(|m| m.id.as_str())).context("unknown message")
}

#[derive(Debug, Serialize)]
struct ScanReport {
	has_events: bool,
	new_count: usize,
	summary: String,
	messages: Vec<Message>,
}

fn cmd_scan(store: &MessageStore, args: &[String]) -> Result<()> {
	let parsed = ParsedArgs::parse(args, &[])?;
	let page = store.query(&Query {
		status: Some(MessageStatus::New.to_string()),
		limit: SCAN_LIMIT,
		..Query::default()
	})?;
	let report = build_scan_report(page);
	print_json(&report)?;

	if parsed.has("ack") && report.has_events {
		let count = store.batch_ack_new()?;
		tracing::debug!("scan acked {} message(s)", count);
	}
	Ok(())
}

fn build_scan_report(page: QueryPage) -> ScanReport {
	if page.messages.is_empty() {
		return ScanReport {
			has_events: false,
			new_count: 0,
			summary: String::new(),
			messages: Vec::new(),
		};
	}

	let mut lines = vec![format!("{} new event(s):", page.total)];
	for m in page.messages.iter().take(SCAN_SUMMARY_ENTRIES) {
		let mut line = format!("- [{}] {}", m.source, m.title);
		if !m.detail.is_empty() {
			line.push_str(": ");
			line.push_str(&truncate_chars(&m.detail, SCAN_DETAIL_CHARS));
		}
		lines.push(line);
	}
	if page.total > SCAN_SUMMARY_ENTRIES {
		lines.push(format!("... and {} more", page.total - SCAN_SUMMARY_ENTRIES));
	}

	ScanReport {
		has_events: true,
		new_count: page.total,
		summary: lines.join("\n"),
		messages: page.messages.into_iter().take(SCAN_SUMMARY_ENTRIES).collect(),
	}
}

fn truncate_chars(s: &str, max: usize) -> String {
	match s.char_indices().nth(max) {
		Some((cut, _)) => format!("{}...", &s[..cut]),
		None => s.to_string(),
	}
}
