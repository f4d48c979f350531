//! Various types associated with packages.

mod package_version;
pub use package_version::PackageVersion;
pub use package_version::VersionParseError;

mod version_bounds;
pub use version_bounds::VersionConstraint;

mod relationship;
pub use relationship::PackageRef;
pub use relationship::OriginHint;
pub use relationship::Provide;
pub use relationship::does_package_provide_ref;
pub use relationship::does_package_match_ref;

/// Where a package comes from and so how it gets onto the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
	/// A prebuilt binary in one of the native repositories.
	Native { repository: String },
	/// A recipe in the source repository, `base` names the recipe repository shared by split packages.
	Source { base: String },
}

impl Origin {
	pub fn is_native(&self) -> bool {
		matches!(self, Origin::Native { .. })
	}

	pub fn is_source(&self) -> bool {
		matches!(self, Origin::Source { .. })
	}
}

impl std::fmt::Display for Origin {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Origin::Native { repository } => write!(f, "{}", repository),
			Origin::Source { .. } => write!(f, "aur"),
		}
	}
}

/// The dependency lists of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
	/// `depends`, needed to run the package.
	pub runtime: Vec<PackageRef>,
	/// `makedepends` and `checkdepends`, only needed when building from source.
	pub build: Vec<PackageRef>,
	/// `optdepends`, never installed automatically.
	pub optional: Vec<PackageRef>,
}

/// Everything known about one version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
	pub name: String,
	pub version: PackageVersion,
	pub origin: Origin,
	pub description: Option<String>,
	pub dependencies: Dependencies,
	pub provides: Vec<Provide>,
	pub conflicts: Vec<PackageRef>,
}

impl PackageRecord {
	pub fn new(name: impl Into<String>, version: PackageVersion, origin: Origin) -> Self {
		Self {
			name: name.into(),
			version,
			origin,
			description: None,
			dependencies: Dependencies::default(),
			provides: Vec::new(),
			conflicts: Vec::new(),
		}
	}

	/// The recipe repository for source packages.
	pub fn recipe_base(&self) -> Option<&str> {
		match &self.origin {
			Origin::Source { base } => Some(base),
			Origin::Native { .. } => None,
		}
	}

	pub fn declares_provide(&self, name: &str) -> bool {
		self.provides.iter().any(|p| p.name == name)
	}

	/// Checks if the given packages conflict with each other.
	pub fn do_packages_conflict(lhs: &Self, rhs: &Self) -> bool {
		lhs.conflicts.iter().any(|c| c.name != lhs.name && does_package_provide_ref(rhs, c))
			|| rhs.conflicts.iter().any(|c| c.name != rhs.name && does_package_provide_ref(lhs, c))
	}
}

impl std::fmt::Display for PackageRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{} {}", self.origin, self.name, self.version)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn record(name: &str, version: &str) -> PackageRecord {
		PackageRecord::new(name, PackageVersion::new(version).unwrap(), Origin::Source { base: name.to_string() })
	}

	#[test]
	fn record_provides_named_ref() {
		let mut r = record("jre-openjdk", "21.0.1-1");
		r.provides.push(Provide::parse("java-runtime=21").unwrap());
		assert!(does_package_provide_ref(&r, &PackageRef::parse("java-runtime>=17").unwrap()));
		assert!(does_package_provide_ref(&r, &PackageRef::parse("jre-openjdk").unwrap()));
		assert!(!does_package_match_ref(&r, &PackageRef::parse("java-runtime").unwrap()));
	}

	#[test]
	fn conflicts_are_symmetric() {
		let mut a = record("vim", "9.0");
		let b = record("gvim", "9.0");
		a.conflicts.push(PackageRef::parse("gvim").unwrap());
		assert!(PackageRecord::do_packages_conflict(&a, &b));
		assert!(PackageRecord::do_packages_conflict(&b, &a));
	}
}
