//! Helpers that look at a script file before it is ever run.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::decode::decode_bytes;

const NAME_PREFIX: &str = "start_";

static PORT_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
	[
		Regex::new(r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0)[:/](\d{2,5})"),
		Regex::new(r"(?i)port[=\s:]+?(\d{2,5})"),
		Regex::new(r"http\.server\s+(\d{2,5})"),
	]
	.map(|re| re.expect("static port pattern"))
});

/// Shell command line that runs `script`, picked by extension.
pub fn resolve_command(script: &Path) -> String {
	let path = script.display();
	let ext = script
		.extension()
		.and_then(|e| e.to_str())
		.map(|e| e.to_ascii_lowercase())
		.unwrap_or_default();

	match ext.as_str() {
		"cmd" | "bat" => format!("cmd.exe /c \"{}\"", path),
		"ps1" => format!("powershell -ExecutionPolicy Bypass -File \"{}\"", path),
		"sh" => format!("bash \"{}\"", path),
		_ => format!("\"{}\"", path),
	}
}

/// `start_worker.bat` -> `worker`.
pub fn default_name(script: &Path) -> String {
	let stem = script
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	match stem.strip_prefix(NAME_PREFIX) {
		Some(rest) => rest.to_string(),
		None => stem,
	}
}

/// Best-effort guess at the port a script listens on. Returns an empty
/// string when the file can't be read or nothing looks like a port. The
/// result is a hint for display and never authoritative.
pub fn extract_port(script: &Path) -> String {
	let raw = match std::fs::read(script) {
		Ok(raw) => raw,
		Err(e) => {
			tracing::debug!("port scan skipped for {}: {}", script.display(), e);
			return String::new();
		}
	};
	find_port(&decode_bytes(&raw)).unwrap_or_default()
}

fn find_port(text: &str) -> Option<String> {
	PORT_PATTERNS.iter().find_map(|re| {
		re.captures(text)
			.and_then(|caps| caps.get(1))
			.map(|m| m.as_str().to_string())
	})
}
