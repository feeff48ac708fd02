use anyhow::{bail, Result};

/// Flags and positionals pulled out of a raw argument list.
#[derive(Debug, Default)]
pub struct ParsedArgs {
	pub positional: Vec<String>,
	flags: Vec<(String, Option<String>)>,
}

impl ParsedArgs {
	/// `value_flags` take the next argument (or `--flag=value`); any other
	/// `--name` is a switch.
	pub fn parse(args: &[String], value_flags: &[&str]) -> Result<Self> {
		let mut parsed = ParsedArgs::default();
		let mut iter = args.iter();
		while let Some(arg) = iter.next() {
			let Some(flag) = arg.strip_prefix("--") else {
				parsed.positional.push(arg.clone());
				continue;
			};
			if let Some((name, value)) = flag.split_once('=') {
				parsed.flags.push((name.to_string(), Some(value.to_string())));
			} else if value_flags.contains(&flag) {
				match iter.next() {
					Some(value) => parsed.flags.push((flag.to_string(), Some(value.clone()))),
					None => bail!("--{} needs a value", flag),
				}
			} else {
				parsed.flags.push((flag.to_string(), None));
			}
		}
		Ok(parsed)
	}

	/// Last value given for `name`.
	pub fn value(&self, name: &str) -> Option<&str> {
		self.flags
			.iter()
			.rev()
			.find(|(n, _)| n == name)
			.and_then(|(_, v)| v.as_deref())
	}

	pub fn values(&self, name: &str) -> Vec<&str> {
		self.flags
			.iter()
			.filter(|(n, _)| n == name)
			.filter_map(|(_, v)| v.as_deref())
			.collect()
	}

	pub fn has(&self, name: &str) -> bool {
		self.flags.iter().any(|(n, _)| n == name)
	}

	pub fn usize_value(&self, name: &str) -> Result<Option<usize>> {
		match self.value(name) {
			Some(raw) => match raw.parse() {
				Ok(n) => Ok(Some(n)),
				Err(_) => bail!("--{} expects a number, got '{}'", name, raw),
			},
			None => Ok(None),
		}
	}
}

/// Resolve `key` against `ids`: an exact match wins, otherwise the key must
/// be a prefix of exactly one id.
pub fn resolve_id<'a>(key: &str, ids: impl IntoIterator<Item = &'a str>) -> Result<String> {
	let mut matches = Vec::new();
	for id in ids {
		if id == key {
			return Ok(id.to_string());
		}
		if id.starts_with(key) {
			matches.push(id);
		}
	}
	match matches.as_slice() {
		[] => bail!("no match for '{}'", key),
		[only] => Ok(only.to_string()),
		many => bail!("'{}' is ambiguous ({} matches)", key, many.len()),
	}
}
