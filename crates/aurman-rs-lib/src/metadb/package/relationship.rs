use super::*;

/// Forces where a [`PackageRef`] is looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginHint {
	/// `<repo>/name`, only the named native repository is consulted.
	Native(String),
	/// `aur/name`, only the source repository is consulted.
	Source,
}

/// Describes a package using a name and a version requirement.
///
/// Parsed from the `name[op version]` syntax used in dependency lists, e.g. `glibc>=2.38`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
	pub name: String,
	pub constraint: VersionConstraint,
	pub origin_hint: Option<OriginHint>,
}

const OPERATORS: [&str; 7] = [">=", "<=", "!=", "==", "=", ">", "<"];

/// Splits `name[op version]` into its parts.
fn split_requirement(s: &str) -> Result<(&str, &str, &str), VersionParseError> {
	match s.find(|c| matches!(c, '<' | '>' | '=' | '!')) {
		Some(idx) => {
			let (name, rest) = s.split_at(idx);
			let op = OPERATORS.iter()
				.find(|op| rest.starts_with(*op))
				.ok_or_else(|| VersionParseError::UnknownOperator(s.to_string()))?;
			Ok((name, op, &rest[op.len()..]))
		},
		None => Ok((s, "", "")),
	}
}

impl PackageRef {
	pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
		Self {
			name: name.into(),
			constraint,
			origin_hint: None,
		}
	}

	/// Parses a dependency string.
	///
	/// Optional dependency descriptions (`name: why it's useful`) are dropped.
	pub fn parse(s: &str) -> Result<Self, VersionParseError> {
		let s = match s.split_once(": ") {
			Some((dep, _description)) => dep,
			None => s,
		}.trim();

		let (name, op, version) = split_requirement(s)?;
		if op.is_empty() && version.is_empty() && s.contains(char::is_whitespace) {
			return Err(VersionParseError::Whitespace(s.to_string()));
		}

		let (origin_hint, name) = match name.split_once('/') {
			Some(("aur", name)) => (Some(OriginHint::Source), name),
			Some((repo, name)) => (Some(OriginHint::Native(repo.to_string())), name),
			None => (None, name),
		};
		if name.is_empty() {
			return Err(VersionParseError::MissingName(s.to_string()));
		}

		Ok(Self {
			name: name.to_string(),
			constraint: VersionConstraint::parse(op, version)?,
			origin_hint,
		})
	}

	pub fn with_origin_hint(mut self, hint: OriginHint) -> Self {
		self.origin_hint = Some(hint);
		self
	}
}

impl std::str::FromStr for PackageRef {
	type Err = VersionParseError;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl std::fmt::Display for PackageRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}{}", self.name, self.constraint)
	}
}

/// A name a package can stand in for, optionally at a specific version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provide {
	pub name: String,
	pub version: Option<PackageVersion>,
}

impl Provide {
	/// Parses `name` or `name=version`.
	pub fn parse(s: &str) -> Result<Self, VersionParseError> {
		let (name, op, version) = split_requirement(s.trim())?;
		if name.is_empty() {
			return Err(VersionParseError::MissingName(s.to_string()));
		}
		let version = match op {
			"" => None,
			"=" => Some(PackageVersion::new(version)?),
			_ => return Err(VersionParseError::UnknownOperator(s.to_string())),
		};
		Ok(Self { name: name.to_string(), version })
	}

	/// An unversioned provide never satisfies a versioned requirement.
	pub fn satisfies(&self, requirement: &PackageRef) -> bool {
		if self.name != requirement.name {
			return false
		}
		match &self.version {
			Some(v) => requirement.constraint.is_satisfied_by(v),
			None => requirement.constraint.is_any(),
		}
	}
}

impl std::fmt::Display for Provide {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.version {
			Some(v) => write!(f, "{}={}", self.name, v),
			None => write!(f, "{}", self.name),
		}
	}
}

/// Checks if the record is the named package at a matching version or provides it.
pub fn does_package_provide_ref(package: &PackageRecord, requirement: &PackageRef) -> bool {
	does_package_match_ref(package, requirement)
		|| package.provides.iter().any(|p| p.satisfies(requirement))
}

/// Checks only the package's own name and version, provides are ignored.
pub fn does_package_match_ref(package: &PackageRecord, requirement: &PackageRef) -> bool {
	package.name == requirement.name && requirement.constraint.is_satisfied_by(&package.version)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parse_plain_name() {
		let r = PackageRef::parse("glibc").unwrap();
		assert_eq!(r.name, "glibc");
		assert!(r.constraint.is_any());
		assert_eq!(r.origin_hint, None);
	}

	#[test]
	fn parse_versioned_requirement() {
		let r = PackageRef::parse("python>=3.11").unwrap();
		assert_eq!(r.name, "python");
		assert_eq!(r.constraint, VersionConstraint::AtLeast(PackageVersion::new("3.11").unwrap()));
	}

	#[test]
	fn parse_strips_optional_description() {
		let r = PackageRef::parse("git: for fetching sources").unwrap();
		assert_eq!(r.name, "git");
	}

	#[test]
	fn parse_origin_hints() {
		assert_eq!(PackageRef::parse("aur/yay").unwrap().origin_hint, Some(OriginHint::Source));
		assert_eq!(PackageRef::parse("extra/git").unwrap().origin_hint, Some(OriginHint::Native("extra".to_string())));
	}

	#[test] fn parse_rejects_missing_name() { assert!(PackageRef::parse(">=1.0").is_err()) }
	#[test] fn parse_rejects_bad_operator() { assert!(PackageRef::parse("foo=<1.0").is_err()) }
	#[test] fn parse_rejects_missing_version() { assert!(PackageRef::parse("foo>=").is_err()) }
	#[test] fn display_round_trips() { assert_eq!(PackageRef::parse("foo<2").unwrap().to_string(), "foo<2") }

	#[test]
	fn versioned_provide_satisfies_requirement() {
		let p = Provide::parse("java-runtime=17").unwrap();
		assert!(p.satisfies(&PackageRef::parse("java-runtime>=11").unwrap()));
		assert!(!p.satisfies(&PackageRef::parse("java-runtime>=21").unwrap()));
	}

	#[test]
	fn unversioned_provide_only_satisfies_unversioned() {
		let p = Provide::parse("sh").unwrap();
		assert!(p.satisfies(&PackageRef::parse("sh").unwrap()));
		assert!(!p.satisfies(&PackageRef::parse("sh>=1").unwrap()));
	}
}
