//! Parser for the `desc` files found in pacman's local and sync databases.
//!
//! The format is a list of blocks, each a `%FIELD%` header followed by one value per line and ended by a blank line.
//!
//! ```text
//! %NAME%
//! bash
//!
//! %DEPENDS%
//! readline>=7.0
//! glibc
//! ```

use std::collections::HashMap;

use super::package::*;

/// The fields of one `desc` file, keyed by field name without the `%`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Desc {
	fields: HashMap<String, Vec<String>>,
}

impl Desc {
	pub fn parse(content: &str) -> Self {
		let mut fields: HashMap<String, Vec<String>> = HashMap::new();
		let mut current: Option<String> = None;

		for line in content.lines() {
			let line = line.trim_end();
			if line.len() > 2 && line.starts_with('%') && line.ends_with('%') {
				let key = line[1..line.len() - 1].to_string();
				fields.entry(key.clone()).or_default();
				current = Some(key);
			} else if line.is_empty() {
				current = None;
			} else if let Some(key) = &current {
				fields.entry(key.clone()).or_default().push(line.to_string());
			}
		}

		Self { fields }
	}

	/// Adds the fields of `other`, used for old databases which split `depends` into its own file.
	pub fn merge(&mut self, other: Desc) {
		for (key, values) in other.fields {
			self.fields.entry(key).or_default().extend(values);
		}
	}

	pub fn first(&self, field: &str) -> Option<&str> {
		self.fields.get(field).and_then(|v| v.first()).map(String::as_str)
	}

	pub fn list(&self, field: &str) -> &[String] {
		self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
	}

	/// Converts the fields into a record.
	///
	/// Unparseable dependency entries are logged and skipped rather than failing the whole package.
	///
	/// # Errors
	/// - [`Parse`](crate::Error::Parse) when `NAME` or `VERSION` is missing or the version is malformed.
	pub fn into_record(self, origin: Origin) -> crate::Result<PackageRecord> {
		let name = self.first("NAME")
			.ok_or_else(|| crate::Error::Parse("desc has no %NAME%".to_string()))?
			.to_string();
		let version = self.first("VERSION")
			.ok_or_else(|| crate::Error::Parse(format!("desc for {} has no %VERSION%", name)))?;
		let version = PackageVersion::new(version)?;

		let refs = |field: &str| -> Vec<PackageRef> {
			self.list(field).iter()
				.filter_map(|s| match PackageRef::parse(s) {
					Ok(r) => Some(r),
					Err(e) => {
						log::warn!("Skipping {} entry \"{}\" of {}: {}", field, s, name, e);
						None
					},
				})
				.collect()
		};

		let mut build = refs("MAKEDEPENDS");
		build.extend(refs("CHECKDEPENDS"));

		let dependencies = Dependencies {
			runtime: refs("DEPENDS"),
			build,
			optional: refs("OPTDEPENDS"),
		};
		let conflicts = refs("CONFLICTS");

		let provides = self.list("PROVIDES").iter()
			.filter_map(|s| match Provide::parse(s) {
				Ok(p) => Some(p),
				Err(e) => {
					log::warn!("Skipping provide \"{}\" of {}: {}", s, name, e);
					None
				},
			})
			.collect();

		Ok(PackageRecord {
			description: self.first("DESC").map(str::to_string),
			name,
			version,
			origin,
			dependencies,
			provides,
			conflicts,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;

	const BASH: &str = "%NAME%\nbash\n\n%VERSION%\n5.2.026-2\n\n%DESC%\nThe GNU Bourne Again shell\n\n\
		%DEPENDS%\nreadline>=7.0\nglibc\nncurses\n\n%OPTDEPENDS%\nbash-completion: for tab completion\n\n\
		%PROVIDES%\nsh\n\n";

	#[test]
	fn desc_fields_are_split_into_blocks() {
		let desc = Desc::parse(BASH);
		assert_eq!(desc.first("NAME"), Some("bash"));
		assert_eq!(desc.list("DEPENDS").len(), 3);
		assert!(desc.list("MAKEDEPENDS").is_empty());
	}

	#[test]
	fn desc_converts_to_record() {
		let record = Desc::parse(BASH).into_record(Origin::Native { repository: "core".to_string() }).unwrap();
		assert_eq!(record.name, "bash");
		assert_eq!(record.version, PackageVersion::new("5.2.026-2").unwrap());
		assert_eq!(record.dependencies.runtime[0], PackageRef::parse("readline>=7.0").unwrap());
		assert_eq!(record.dependencies.optional[0].name, "bash-completion");
		assert_eq!(record.provides, vec![Provide::parse("sh").unwrap()]);
		assert_eq!(record.description.as_deref(), Some("The GNU Bourne Again shell"));
	}

	#[test]
	fn desc_without_version_is_rejected() {
		let desc = Desc::parse("%NAME%\nfoo\n\n");
		assert!(desc.into_record(Origin::Native { repository: "core".to_string() }).is_err());
	}

	#[test]
	fn split_depends_file_is_merged() {
		let mut desc = Desc::parse("%NAME%\nfoo\n\n%VERSION%\n1-1\n\n");
		desc.merge(Desc::parse("%DEPENDS%\nbar\n\n"));
		let record = desc.into_record(Origin::Native { repository: "core".to_string() }).unwrap();
		assert_eq!(record.dependencies.runtime.len(), 1);
	}
}
