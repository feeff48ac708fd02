use anyhow::{bail, Context, Result};
use owo_colors::OwoColorize;
use patrol_proc::{ProcessRecord, ProcessStatus, Registry};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::args::resolve_id;
use crate::config::PatrolConfig;

fn open_registry(config: &PatrolConfig) -> Result<Arc<Registry>> {
	let path = config.catalog_path();
	Registry::open(&path, config.supervisor_config())
		.with_context(|| format!("failed to open catalog {}", path.display()))
}

/// Exact id, then exact name, then a unique id prefix.
async fn resolve_process(registry: &Registry, key: &str) -> Result<ProcessRecord> {
	let records = registry.list_all().await;
	if let Some(record) = records.iter().find(|r| r.id() == key) {
		return Ok(record.clone());
	}
	let named: Vec<&ProcessRecord> = records.iter().filter(|r| r.name() == key).collect();
	match named.as_slice() {
		[only] => return Ok((*only).clone()),
		[] => {}
		many => bail!("'{}' names {} processes, use an id", key, many.len()),
	}
	let id = resolve_id(key, records.iter().map(|r| r.id())).context("unknown process")?;
	records
		.into_iter()
		.find(|r| r.id() == id)
		.context("unknown process")
}

fn short_id(id: &str) -> &str {
	id.get(..8).unwrap_or(id)
}

pub async fn cmd_add(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let Some(path) = args.first() else {
		bail!("usage: patrol add <script> [name]");
	};
	let path = Path::new(path);
	if !path.is_file() {
		bail!("no such script: {}", path.display());
	}
	let name = args.get(1).map(|s| s.as_str()).filter(|s| !s.trim().is_empty());

	let registry = open_registry(config)?;
	let record = registry.register(path, name).await?;
	eprintln!("{} {} {}", "added".green(), record.name().bold(), short_id(record.id()).dimmed());
	eprintln!("  command: {}", record.def.command);
	if !record.def.port.is_empty() {
		eprintln!("  port:    {}", record.def.port);
	}
	Ok(())
}

pub async fn cmd_remove(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let Some(key) = args.first() else {
		bail!("usage: patrol rm <id>");
	};
	let registry = open_registry(config)?;
	let record = resolve_process(&registry, key).await?;
	registry.unregister(record.id()).await?;
	eprintln!("{} {}", "removed".yellow(), record.name());
	Ok(())
}

pub async fn cmd_list(config: &PatrolConfig) -> Result<()> {
	let registry = open_registry(config)?;
	let records = registry.list_all().await;
	if records.is_empty() {
		eprintln!("no scripts registered. add one with: patrol add <script>");
		return Ok(());
	}

	let width = records.iter().map(|r| r.name().len()).max().unwrap_or(0);
	for record in &records {
		let pin = if record.def.pinned { "*".yellow().to_string() } else { " ".to_string() };
		let port = if record.def.port.is_empty() {
			String::new()
		} else {
			format!(":{}", record.def.port)
		};
		println!(
			" {}{} {:<width$} {} {:<6} {}",
			status_dot(record.status),
			pin,
			record.name(),
			short_id(record.id()).dimmed(),
			port.cyan(),
			record.def.script_path.display(),
			width = width
		);
	}
	Ok(())
}

fn status_dot(status: ProcessStatus) -> String {
	match status {
		ProcessStatus::Running => "●".green().to_string(),
		ProcessStatus::Error => "●".red().to_string(),
		ProcessStatus::Stopped => "○".dimmed().to_string(),
	}
}

pub async fn cmd_show(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let Some(key) = args.first() else {
		bail!("usage: patrol show <id>");
	};
	let registry = open_registry(config)?;
	let record = resolve_process(&registry, key).await?;
	println!("{}", serde_json::to_string_pretty(&record)?);
	Ok(())
}

pub async fn cmd_port(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let (Some(key), Some(port)) = (args.first(), args.get(1)) else {
		bail!("usage: patrol port <id> <port>");
	};
	match port.parse::<u16>() {
		Ok(p) if p > 0 => {}
		_ => bail!("invalid port: {}", port),
	}
	let registry = open_registry(config)?;
	let record = resolve_process(&registry, key).await?;
	registry.set_port(record.id(), port).await?;
	eprintln!("{} port {}", record.name().bold(), port);
	Ok(())
}

pub async fn cmd_pin(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let Some(key) = args.first() else {
		bail!("usage: patrol pin <id> [on|off]");
	};
	let pinned = match args.get(1).map(|s| s.as_str()) {
		None | Some("on") | Some("true") => true,
		Some("off") | Some("false") => false,
		Some(other) => bail!("expected on or off, got '{}'", other),
	};
	let registry = open_registry(config)?;
	let record = resolve_process(&registry, key).await?;
	registry.set_pinned(record.id(), pinned).await?;
	eprintln!("{} {}", record.name().bold(), if pinned { "pinned" } else { "unpinned" });
	Ok(())
}

pub async fn cmd_config_file(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let (Some(key), Some(path)) = (args.first(), args.get(1)) else {
		bail!("usage: patrol config-file <id> <path>");
	};
	let registry = open_registry(config)?;
	let record = resolve_process(&registry, key).await?;
	registry.set_config_file(record.id(), path).await?;
	eprintln!("{} config file {}", record.name().bold(), path);
	Ok(())
}

/// Start the selected processes (all of them when none are named), print
/// their output with a name prefix, and stop everything on Ctrl-C or once
/// nothing is left running.
pub async fn cmd_run(config: &PatrolConfig, args: &[String]) -> Result<()> {
	let registry = open_registry(config)?;
	let targets = if args.is_empty() {
		registry.list_all().await
	} else {
		let mut targets = Vec::new();
		for key in args {
			targets.push(resolve_process(&registry, key).await?);
		}
		targets
	};
	if targets.is_empty() {
		bail!("nothing to run. add a script with: patrol add <script>");
	}

	let width = targets.iter().map(|r| r.name().len()).max().unwrap_or(0);
	let (tx, mut rx) = mpsc::channel::<(usize, String)>(1024);
	for (index, record) in targets.iter().enumerate() {
		// subscribe first so the opening lines are not missed
		if let Some(mut subscription) = registry.subscribe_logs(record.id()).await {
			let tx = tx.clone();
			tokio::spawn(async move {
				while let Some(line) = subscription.receiver.recv().await {
					if tx.send((index, line)).await.is_err() {
						break;
					}
				}
			});
		}
		if registry.start(record.id()).await {
			tracing::info!("started {}", record.name());
		}
	}
	drop(tx);

	let labels: Vec<String> = targets
		.iter()
		.enumerate()
		.map(|(i, r)| label(i, &format!("{:<width$}", r.name(), width = width)))
		.collect();

	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);
	let mut ticker = tokio::time::interval(Duration::from_millis(500));

	loop {
		tokio::select! {
			_ = &mut ctrl_c => {
				eprintln!();
				tracing::info!("stopping {} process(es)", targets.len());
				break;
			}
			Some((index, line)) = rx.recv() => {
				println!("{} | {}", labels[index], line);
			}
			_ = ticker.tick() => {
				if !any_running(&registry, &targets).await {
					// let the forwarders hand over what is already buffered
					tokio::time::sleep(Duration::from_millis(200)).await;
					while let Ok((index, line)) = rx.try_recv() {
						println!("{} | {}", labels[index], line);
					}
					break;
				}
			}
		}
	}

	registry.shutdown().await;
	for record in &targets {
		if let Some(record) = registry.get(record.id()).await {
			let code = record.exit_code.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
			eprintln!(" {} {:<width$} exit {}", status_dot(record.status), record.name(), code, width = width);
		}
	}
	Ok(())
}

async fn any_running(registry: &Registry, targets: &[ProcessRecord]) -> bool {
	for record in targets {
		if let Some(current) = registry.get(record.id()).await {
			if current.status.is_running() {
				return true;
			}
		}
	}
	false
}

fn label(index: usize, name: &str) -> String {
	match index % 5 {
		0 => name.cyan().to_string(),
		1 => name.magenta().to_string(),
		2 => name.yellow().to_string(),
		3 => name.blue().to_string(),
		_ => name.green().to_string(),
	}
}
