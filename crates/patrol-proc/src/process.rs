use chrono::{DateTime, Local};
use std::io;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;

use crate::output::{pipe_output, LogSubscription, OutputCapture, SubscriberId};
use crate::registry::SupervisorConfig;
use crate::types::*;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One supervised script: its catalog entry, at most one live child, and
/// the captured output.
pub struct ManagedProcess {
	id: String,
	def: RwLock<ProcessDef>,
	runtime: Arc<Mutex<Runtime>>,
	output: OutputCapture,
	stop_grace: Duration,
}

#[derive(Default)]
struct Runtime {
	child: Option<Child>,
	/// Bumped on every spawn so a capture task can tell whether the child it
	/// was started for is still the current one.
	generation: u64,
	status: ProcessStatus,
	pid: Option<u32>,
	started_at: Option<DateTime<Local>>,
	exit_code: Option<i32>,
	restart_count: u32,
}

impl Runtime {
	/// Poll the OS handle and fold the result into the stored state.
	fn reconcile(&mut self) {
		let Some(child) = self.child.as_mut() else {
			return;
		};
		match child.try_wait() {
			Ok(None) => self.status = ProcessStatus::Running,
			Ok(Some(status)) => self.finish(status),
			Err(e) => tracing::warn!("failed to poll pid {:?}: {}", self.pid, e),
		}
	}

	fn is_alive(&mut self) -> bool {
		self.reconcile();
		self.child.is_some()
	}

	fn finish(&mut self, status: ExitStatus) {
		self.child = None;
		self.status = ProcessStatus::Stopped;
		self.pid = None;
		self.exit_code = Some(exit_code(status));
	}
}

impl ManagedProcess {
	pub fn new(def: ProcessDef, config: &SupervisorConfig) -> Self {
		Self {
			id: def.id.clone(),
			def: RwLock::new(def),
			runtime: Arc::new(Mutex::new(Runtime::default())),
			output: OutputCapture::new(config.log_capacity, config.subscriber_buffer),
			stop_grace: config.stop_grace,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn output(&self) -> &OutputCapture {
		&self.output
	}

	pub async fn def(&self) -> ProcessDef {
		self.def.read().await.clone()
	}

	pub async fn update_def(&self, edit: impl FnOnce(&mut ProcessDef)) {
		let mut def = self.def.write().await;
		edit(&mut def);
		def.id = self.id.clone();
	}

	/// Spawn the command unless a live child already exists. A spawn error
	/// is recorded as `error` status plus a log line, and reported as
	/// `false`.
	pub async fn start(&self) -> bool {
		let mut rt = self.runtime.lock().await;
		if rt.is_alive() {
			return false;
		}
		let def = self.def().await;

		let (child, output_pipe) = match spawn_command(&def) {
			Ok(spawned) => spawned,
			Err(e) => {
				tracing::warn!("failed to start {} ({}): {}", def.name, def.command, e);
				rt.status = ProcessStatus::Error;
				rt.pid = None;
				drop(rt);
				self.output
					.push_line(format!("[patrol] failed to start: {}", e))
					.await;
				return false;
			}
		};

		rt.generation += 1;
		rt.pid = child.id();
		rt.started_at = Some(Local::now());
		rt.exit_code = None;
		rt.status = ProcessStatus::Running;
		rt.child = Some(child);

		tracing::info!("started {} (pid {:?})", def.name, rt.pid);

		tokio::spawn(capture(
			Arc::clone(&self.runtime),
			self.output.clone(),
			rt.generation,
			def.name,
			output_pipe,
		));
		true
	}

	/// Terminate the process group, escalating to SIGKILL once the grace
	/// period runs out. Returns `false` if nothing was running.
	pub async fn stop(&self) -> bool {
		let mut rt = self.runtime.lock().await;
		if !rt.is_alive() {
			return false;
		}
		let Some(mut child) = rt.child.take() else {
			return false;
		};

		match terminate(&mut child, self.stop_grace).await {
			Ok(status) => rt.exit_code = Some(exit_code(status)),
			Err(e) => tracing::warn!("failed to reap pid {:?}: {}", rt.pid, e),
		}
		rt.status = ProcessStatus::Stopped;
		rt.pid = None;
		tracing::info!("stopped {} (exit {:?})", self.id, rt.exit_code);
		true
	}

	/// Counts every call, including ones where nothing was running.
	pub async fn restart(&self) -> bool {
		self.stop().await;
		self.runtime.lock().await.restart_count += 1;
		self.start().await
	}

	/// Reconciled record, safe to hand to callers.
	pub async fn snapshot(&self) -> ProcessRecord {
		let mut rt = self.runtime.lock().await;
		rt.reconcile();
		ProcessRecord {
			def: self.def().await,
			status: rt.status,
			pid: rt.pid,
			started_at: rt.started_at,
			exit_code: rt.exit_code,
			restart_count: rt.restart_count,
		}
	}

	pub async fn logs(&self) -> Vec<String> {
		self.output.snapshot().await
	}

	pub async fn logs_since(&self, offset: usize) -> LogPage {
		self.output.since(offset).await
	}

	pub async fn subscribe(&self) -> LogSubscription {
		self.output.subscribe().await
	}

	pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
		self.output.unsubscribe(id).await
	}
}

/// Spawn `sh -c <command>` with stdout and stderr on one pipe, so the read
/// end sees both streams in the order they were written.
fn spawn_command(def: &ProcessDef) -> io::Result<(Child, pipe::Receiver)> {
	let (reader, writer) = io::pipe()?;
	let stderr = writer.try_clone()?;
	let output_pipe = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;

	let mut cmd = Command::new("sh");
	cmd.args(["-c", def.command.as_str()])
		.current_dir(&def.cwd)
		.env("PYTHONIOENCODING", "utf-8")
		.stdin(Stdio::null())
		.stdout(writer)
		.stderr(stderr)
		.process_group(0);
	let child = cmd.spawn()?;
	// the parent's copies of the write end must close or the reader never
	// sees EOF
	drop(cmd);
	Ok((child, output_pipe))
}

/// Drain the output pipe, then settle the runtime state for this
/// generation. A reader panic is contained here so the finalizer always
/// runs.
async fn capture(
	runtime: Arc<Mutex<Runtime>>,
	output: OutputCapture,
	generation: u64,
	name: String,
	output_pipe: pipe::Receiver,
) {
	let mut reader = JoinSet::new();
	reader.spawn(pipe_output(output_pipe, output));
	while let Some(result) = reader.join_next().await {
		if let Err(e) = result {
			tracing::warn!("output reader for {} ended abnormally: {}", name, e);
		}
	}

	// The pipe can close a moment before the child is reapable, or much
	// earlier if the script detaches its output. Poll until it exits or a
	// newer spawn takes over.
	loop {
		{
			let mut rt = runtime.lock().await;
			if rt.generation != generation || rt.child.is_none() {
				return;
			}
			rt.reconcile();
			if rt.child.is_none() {
				tracing::info!("{} exited (code {:?})", name, rt.exit_code);
				return;
			}
		}
		tokio::time::sleep(EXIT_POLL_INTERVAL).await;
	}
}

async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
	if let Some(pid) = child.id() {
		signal_group(pid, nix::sys::signal::Signal::SIGTERM);
	}
	match tokio::time::timeout(grace, child.wait()).await {
		Ok(status) => status,
		Err(_) => {
			tracing::warn!(
				"pid {:?} ignored SIGTERM for {:?}, killing",
				child.id(),
				grace
			);
			if let Some(pid) = child.id() {
				signal_group(pid, nix::sys::signal::Signal::SIGKILL);
			}
			let _ = child.start_kill();
			child.wait().await
		}
	}
}

/// The child leads its own group (`process_group(0)`), so its pid is the
/// group id.
pub fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
	use nix::sys::signal::killpg;
	use nix::unistd::Pid;
	if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
		tracing::debug!("killpg({}, {:?}) failed: {}", pid, signal, e);
	}
}

/// Exit code, or the negated signal number for signal deaths.
pub fn exit_code(status: ExitStatus) -> i32 {
	use std::os::unix::process::ExitStatusExt;
	status
		.code()
		.or_else(|| status.signal().map(|sig| -sig))
		.unwrap_or(-1)
}
