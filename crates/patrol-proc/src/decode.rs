//! Turning raw child output into clean text lines.

use regex::Regex;
use std::sync::LazyLock;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\[\?[0-9;]*[a-zA-Z]").expect("static ANSI pattern")
});

/// Decode bytes with the first encoding that accepts them: UTF-8, then GBK
/// (which also covers cp936), then Latin-1. The last step maps every byte to
/// a char, so this never fails.
pub fn decode_bytes(raw: &[u8]) -> String {
	if let Ok(text) = std::str::from_utf8(raw) {
		return text.to_string();
	}
	if let Some(text) = encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(raw) {
		return text.into_owned();
	}
	latin1(raw)
}

fn latin1(raw: &[u8]) -> String {
	raw.iter().map(|&b| b as char).collect()
}

pub fn strip_ansi(line: &str) -> String {
	ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Decode and strip one line of output.
pub fn normalize_line(raw: &[u8]) -> String {
	strip_ansi(&decode_bytes(raw))
}

/// Splits an incremental byte stream on `\n`. The terminator (and a `\r`
/// right before it) is not part of the returned line.
#[derive(Debug, Default)]
pub struct LineAssembler {
	pending: Vec<u8>,
}

impl LineAssembler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
		let mut lines = Vec::new();
		let mut rest = chunk;
		while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
			self.pending.extend_from_slice(&rest[..pos]);
			lines.push(trim_cr(std::mem::take(&mut self.pending)));
			rest = &rest[pos + 1..];
		}
		self.pending.extend_from_slice(rest);
		lines
	}

	/// Flush whatever is left once the stream has ended.
	pub fn finish(&mut self) -> Option<Vec<u8>> {
		if self.pending.is_empty() {
			None
		} else {
			Some(trim_cr(std::mem::take(&mut self.pending)))
		}
	}
}

fn trim_cr(mut line: Vec<u8>) -> Vec<u8> {
	if line.last() == Some(&b'\r') {
		line.pop();
	}
	line
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn utf8_passes_through() {
		assert_eq!(decode_bytes("héllo 世界".as_bytes()), "héllo 世界");
	}

	#[test]
	fn gbk_fallback() {
		// "中文" in GBK
		assert_eq!(decode_bytes(&[0xD6, 0xD0, 0xCE, 0xC4]), "中文");
	}

	#[test]
	fn latin1_never_fails() {
		// 0xFF is not a valid lead byte in UTF-8 or GBK
		assert_eq!(decode_bytes(&[b'a', 0xFF]), "a\u{ff}");
	}

	#[test]
	fn strips_color_and_cursor_codes() {
		assert_eq!(strip_ansi("\x1b[31merror\x1b[0m: boom"), "error: boom");
		assert_eq!(strip_ansi("\x1b[?25lhidden\x1b[?25h"), "hidden");
		assert_eq!(strip_ansi("plain"), "plain");
	}

	#[test]
	fn assembler_splits_across_chunks() {
		let mut asm = LineAssembler::new();
		assert!(asm.push(b"hel").is_empty());
		assert_eq!(asm.push(b"lo\r\nwor"), vec![b"hello".to_vec()]);
		assert_eq!(asm.push(b"ld\n\n"), vec![b"world".to_vec(), Vec::new()]);
		assert_eq!(asm.finish(), None);
	}

	#[test]
	fn assembler_flushes_partial_line() {
		let mut asm = LineAssembler::new();
		assert!(asm.push(b"no newline").is_empty());
		assert_eq!(asm.finish(), Some(b"no newline".to_vec()));
		assert_eq!(asm.finish(), None);
	}
}
