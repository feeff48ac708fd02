use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use patrol_proc::registry::{Registry, SupervisorConfig};
use patrol_proc::types::*;
use patrol_proc::{LogSubscription, ManagedProcess, RegistryError};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
	let path = dir.join(name);
	std::fs::write(&path, body).unwrap();
	path
}

fn test_registry(dir: &Path) -> Arc<Registry> {
	Registry::open(dir.join("services.json"), SupervisorConfig::default()).unwrap()
}

fn raw_def(dir: &Path, command: &str) -> ProcessDef {
	ProcessDef {
		id: "raw".into(),
		name: "raw".into(),
		script_path: dir.join("raw.sh"),
		cwd: dir.to_path_buf(),
		command: command.into(),
		port: String::new(),
		pinned: false,
		config_file: String::new(),
	}
}

async fn wait_until_stopped(registry: &Registry, id: &str) -> ProcessRecord {
	let deadline = Instant::now() + Duration::from_secs(10);
	loop {
		let record = registry.get(id).await.unwrap();
		if !record.status.is_running() || Instant::now() > deadline {
			return record;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
}

async fn recv(sub: &mut LogSubscription) -> Option<String> {
	tokio::time::timeout(Duration::from_secs(5), sub.receiver.recv())
		.await
		.expect("timed out waiting for a log line")
}

// --- Registration and catalog ---

#[tokio::test]
async fn register_batch_file_derives_name_and_command() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "start_worker.bat", "@echo off\r\n");

	let record = registry.register(&script, None).await.unwrap();

	assert_eq!(record.name(), "worker");
	assert_eq!(record.def.command, format!("cmd.exe /c \"{}\"", script.display()));
	assert_eq!(record.def.cwd, dir.path());
	assert_eq!(record.status, ProcessStatus::Stopped);
	assert_eq!(record.restart_count, 0);
	assert!(record.pid.is_none());

	let catalog: serde_json::Value =
		serde_json::from_str(&std::fs::read_to_string(registry.catalog_path()).unwrap()).unwrap();
	let entries = catalog.as_array().unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0]["id"], record.id());
	assert!(entries[0].get("status").is_none(), "runtime state must not be persisted");
}

#[tokio::test]
async fn explicit_name_and_port_hint() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "serve.sh", "python -m http.server 8123\n");

	let record = registry.register(&script, Some("docs")).await.unwrap();
	assert_eq!(record.name(), "docs");
	assert_eq!(record.def.port, "8123");
	assert_eq!(record.def.command, format!("bash \"{}\"", script.display()));
}

#[tokio::test]
async fn reopen_restores_static_fields_as_stopped() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "start_api.sh", "sleep 30\n");
	let record = registry.register(&script, None).await.unwrap();
	assert!(registry.start(record.id()).await);

	let reopened = test_registry(dir.path());
	let restored = reopened.get(record.id()).await.unwrap();
	assert_eq!(restored.def, record.def);
	assert_eq!(restored.status, ProcessStatus::Stopped);
	assert!(restored.pid.is_none());
	assert!(reopened.get_logs(record.id()).await.is_empty());

	registry.shutdown().await;
}

#[tokio::test]
async fn reopen_fills_in_missing_port() {
	let dir = tempfile::tempdir().unwrap();
	let script = write_script(dir.path(), "web.sh", "node app.js --listen localhost:4000\n");
	let catalog = serde_json::json!([{
		"id": "abc",
		"name": "web",
		"script_path": script,
		"cwd": dir.path(),
		"command": format!("bash \"{}\"", script.display()),
		"port": ""
	}]);
	std::fs::write(dir.path().join("services.json"), catalog.to_string()).unwrap();

	let registry = test_registry(dir.path());
	let record = registry.get("abc").await.unwrap();
	assert_eq!(record.def.port, "4000");
	assert!(!record.def.pinned);
}

#[tokio::test]
async fn corrupt_catalog_is_an_error() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("services.json"), "{ not json").unwrap();
	let result = Registry::open(dir.path().join("services.json"), SupervisorConfig::default());
	assert!(matches!(result, Err(RegistryError::Corrupt { .. })));
}

#[tokio::test]
async fn static_edits_are_persisted() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "job.sh", "true\n");
	let record = registry.register(&script, None).await.unwrap();

	let updated = registry.set_port(record.id(), " 9000 ").await.unwrap().unwrap();
	assert_eq!(updated.def.port, "9000");
	registry.set_pinned(record.id(), true).await.unwrap();
	registry.set_config_file(record.id(), "/etc/job.json").await.unwrap();
	assert!(registry.set_port("missing", "1").await.unwrap().is_none());

	let reopened = test_registry(dir.path());
	let restored = reopened.get(record.id()).await.unwrap();
	assert_eq!(restored.def.port, "9000");
	assert!(restored.def.pinned);
	assert_eq!(restored.def.config_file, "/etc/job.json");
}

/// A directory where the catalog file should be makes every save fail.
fn block_catalog(registry: &Registry) {
	let path = registry.catalog_path();
	if path.exists() {
		std::fs::remove_file(path).unwrap();
	}
	std::fs::create_dir(path).unwrap();
}

#[tokio::test]
async fn failed_save_leaves_registry_unchanged() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let kept = write_script(dir.path(), "kept.sh", "true\n");
	let kept = registry.register(&kept, None).await.unwrap();
	block_catalog(&registry);

	let extra = write_script(dir.path(), "extra.sh", "true\n");
	assert!(registry.register(&extra, None).await.is_err());
	let names: Vec<String> = registry
		.list_all()
		.await
		.iter()
		.map(|r| r.name().to_string())
		.collect();
	assert_eq!(names, vec!["kept"]);

	assert!(registry.unregister(kept.id()).await.is_err());
	assert!(registry.get(kept.id()).await.is_some());

	assert!(registry.set_port(kept.id(), "8080").await.is_err());
	assert_eq!(registry.get(kept.id()).await.unwrap().def.port, kept.def.port);
}

#[tokio::test]
async fn unknown_ids_are_falsy() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());

	assert!(!registry.start("nope").await);
	assert!(!registry.stop("nope").await);
	assert!(!registry.restart("nope").await);
	assert!(registry.get("nope").await.is_none());
	assert!(registry.get_logs("nope").await.is_empty());
	assert!(registry.subscribe_logs("nope").await.is_none());
	assert!(!registry.unregister("nope").await.unwrap());
}

#[tokio::test]
async fn list_all_keeps_registration_order() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	for name in ["b.sh", "a.sh", "c.sh"] {
		let script = write_script(dir.path(), name, "true\n");
		registry.register(&script, None).await.unwrap();
	}
	let names: Vec<String> = registry
		.list_all()
		.await
		.iter()
		.map(|r| r.name().to_string())
		.collect();
	assert_eq!(names, vec!["b", "a", "c"]);
}

// --- Lifecycle ---

#[tokio::test]
async fn start_twice_spawns_once() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "sleeper.sh", "sleep 30\n");
	let record = registry.register(&script, None).await.unwrap();

	assert!(registry.start(record.id()).await);
	let running = registry.get(record.id()).await.unwrap();
	assert_eq!(running.status, ProcessStatus::Running);
	assert!(running.pid.is_some());
	assert!(running.started_at.is_some());

	assert!(!registry.start(record.id()).await);
	assert_eq!(registry.get(record.id()).await.unwrap().pid, running.pid);

	assert!(registry.stop(record.id()).await);
	let stopped = registry.get(record.id()).await.unwrap();
	assert_eq!(stopped.status, ProcessStatus::Stopped);
	assert!(stopped.pid.is_none());
	assert!(stopped.exit_code.is_some());

	assert!(!registry.stop(record.id()).await);
}

#[tokio::test]
async fn graceful_stop_is_quick() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "sleeper.sh", "sleep 30\n");
	let record = registry.register(&script, None).await.unwrap();
	registry.start(record.id()).await;
	tokio::time::sleep(Duration::from_millis(200)).await;

	let began = Instant::now();
	assert!(registry.stop(record.id()).await);
	assert!(began.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn ignoring_sigterm_gets_killed_after_grace() {
	let dir = tempfile::tempdir().unwrap();
	let process = ManagedProcess::new(
		raw_def(dir.path(), "trap '' TERM; sleep 30"),
		&SupervisorConfig::default(),
	);
	assert!(process.start().await);
	tokio::time::sleep(Duration::from_millis(300)).await;

	let began = Instant::now();
	assert!(process.stop().await);
	let elapsed = began.elapsed();
	assert!(elapsed >= Duration::from_millis(4500), "stopped after {:?}", elapsed);

	let record = process.snapshot().await;
	assert_eq!(record.status, ProcessStatus::Stopped);
	assert_eq!(record.exit_code, Some(-9));
	assert!(record.pid.is_none());
}

#[tokio::test]
async fn restart_counts_every_call() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "sleeper.sh", "sleep 30\n");
	let record = registry.register(&script, None).await.unwrap();

	// nothing running yet, still counted
	assert!(registry.restart(record.id()).await);
	let first = registry.get(record.id()).await.unwrap();
	assert_eq!(first.restart_count, 1);
	assert!(first.status.is_running());

	assert!(registry.restart(record.id()).await);
	let second = registry.get(record.id()).await.unwrap();
	assert_eq!(second.restart_count, 2);
	assert!(second.status.is_running());
	assert_ne!(second.pid, first.pid);

	registry.shutdown().await;
	assert!(!registry.get(record.id()).await.unwrap().status.is_running());
}

#[tokio::test]
async fn spawn_failure_is_recorded_not_raised() {
	let dir = tempfile::tempdir().unwrap();
	let mut def = raw_def(dir.path(), "true");
	def.cwd = dir.path().join("does-not-exist");
	let process = ManagedProcess::new(def, &SupervisorConfig::default());

	assert!(!process.start().await);
	let record = process.snapshot().await;
	assert_eq!(record.status, ProcessStatus::Error);
	assert!(record.pid.is_none());
	let logs = process.logs().await;
	assert_eq!(logs.len(), 1);
	assert!(logs[0].starts_with("[patrol] failed to start"), "{:?}", logs);
}

#[tokio::test]
async fn unregister_stops_and_forgets() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "sleeper.sh", "sleep 30\n");
	let record = registry.register(&script, None).await.unwrap();
	registry.start(record.id()).await;
	let pid = registry.get(record.id()).await.unwrap().pid.unwrap();

	assert!(registry.unregister(record.id()).await.unwrap());
	assert!(registry.get(record.id()).await.is_none());
	assert!(test_registry(dir.path()).list_all().await.is_empty());

	// the group is gone, so signal 0 fails
	let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
	assert!(!alive);
}

// --- Output capture ---

#[tokio::test]
async fn captures_stdout_and_stderr_lines() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(
		dir.path(),
		"talk.sh",
		"echo out-line\necho err-line >&2\nprintf 'no-newline'\n",
	);
	let record = registry.register(&script, None).await.unwrap();
	registry.start(record.id()).await;

	let finished = wait_until_stopped(&registry, record.id()).await;
	assert_eq!(finished.status, ProcessStatus::Stopped);
	assert_eq!(finished.exit_code, Some(0));

	// give the reader a moment to drain after the exit was observed
	tokio::time::sleep(Duration::from_millis(100)).await;
	let logs = registry.get_logs(record.id()).await;
	assert!(logs.contains(&"out-line".to_string()), "{:?}", logs);
	assert!(logs.contains(&"err-line".to_string()), "{:?}", logs);
	assert!(logs.contains(&"no-newline".to_string()), "{:?}", logs);
}

#[tokio::test]
async fn stdout_and_stderr_keep_production_order() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(
		dir.path(),
		"interleave.sh",
		"for i in $(seq 0 199); do\n\techo out$i\n\techo err$i >&2\ndone\n",
	);
	let record = registry.register(&script, None).await.unwrap();
	registry.start(record.id()).await;
	wait_until_stopped(&registry, record.id()).await;

	let deadline = Instant::now() + Duration::from_secs(5);
	let mut logs = registry.get_logs(record.id()).await;
	while logs.len() < 400 && Instant::now() < deadline {
		tokio::time::sleep(Duration::from_millis(50)).await;
		logs = registry.get_logs(record.id()).await;
	}

	let expected: Vec<String> = (0..200)
		.flat_map(|i| [format!("out{}", i), format!("err{}", i)])
		.collect();
	assert_eq!(logs, expected);
}

#[tokio::test]
async fn nonzero_exit_code_is_kept() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "fail.sh", "echo bye\nexit 3\n");
	let record = registry.register(&script, None).await.unwrap();
	registry.start(record.id()).await;

	let finished = wait_until_stopped(&registry, record.id()).await;
	assert_eq!(finished.status, ProcessStatus::Stopped);
	assert_eq!(finished.exit_code, Some(3));
	assert!(finished.pid.is_none());
}

#[tokio::test]
async fn buffer_keeps_most_recent_lines_in_order() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(dir.path(), "flood.sh", "seq 1 5100\n");
	let record = registry.register(&script, None).await.unwrap();
	registry.start(record.id()).await;
	wait_until_stopped(&registry, record.id()).await;

	let deadline = Instant::now() + Duration::from_secs(5);
	let mut logs = registry.get_logs(record.id()).await;
	while logs.last().map(String::as_str) != Some("5100") && Instant::now() < deadline {
		tokio::time::sleep(Duration::from_millis(50)).await;
		logs = registry.get_logs(record.id()).await;
	}

	assert_eq!(logs.len(), 5000);
	assert_eq!(logs.first().map(String::as_str), Some("101"));
	assert_eq!(logs.last().map(String::as_str), Some("5100"));
	let expected: Vec<String> = (101..=5100).map(|n| n.to_string()).collect();
	assert_eq!(logs, expected);
}

#[tokio::test]
async fn subscribers_see_live_lines() {
	let dir = tempfile::tempdir().unwrap();
	let registry = test_registry(dir.path());
	let script = write_script(
		dir.path(),
		"slow.sh",
		"sleep 0.3\necho '\x1b[1mone\x1b[0m'\necho two\n",
	);
	let record = registry.register(&script, None).await.unwrap();

	let mut first = registry.subscribe_logs(record.id()).await.unwrap();
	let mut second = registry.subscribe_logs(record.id()).await.unwrap();
	assert!(registry.unsubscribe_logs(record.id(), second.id).await);

	registry.start(record.id()).await;

	assert_eq!(recv(&mut first).await.as_deref(), Some("one"));
	assert_eq!(recv(&mut first).await.as_deref(), Some("two"));
	assert_eq!(recv(&mut second).await, None);

	let page = registry.logs_since(record.id(), 1).await.unwrap();
	assert_eq!(page.lines, vec!["two"]);
	assert_eq!(page.offset, 2);
}
