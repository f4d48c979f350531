use std::cmp::Ordering;

use thiserror::Error;

/// Reasons a version or dependency string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
	#[error("version string is empty")]
	Empty,
	#[error("version \"{0}\" contains whitespace")]
	Whitespace(String),
	#[error("version \"{0}\" has an epoch that is not a number")]
	InvalidEpoch(String),
	#[error("version \"{0}\" has an empty component")]
	EmptyComponent(String),
	#[error("version \"{0}\" contains invalid character '{1}'")]
	InvalidCharacter(String, char),
	#[error("dependency \"{0}\" has an unknown comparison operator")]
	UnknownOperator(String),
	#[error("dependency \"{0}\" has no package name")]
	MissingName(String),
}

/// The version of a package.
///
/// # Format
/// Package versions follow the format `[epoch:]pkgver[-pkgrel]`.
/// - `epoch` overrides every other part of the version and is used when a versioning scheme changes.
/// - `pkgver` is the upstream version, compared segment by segment.
/// - `pkgrel` is the packaging release. Constraints written without one ignore it, see [`PackageVersion::cmp_for_constraint`].
///
/// Equality follows the ordering so `1.0` and `1.00` are equal.
#[derive(Debug, Clone)]
pub struct PackageVersion {
	epoch: u64,
	version: String,
	release: Option<String>,
}

fn is_version_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '~' | '@')
}

impl PackageVersion {
	pub fn new(version: &str) -> Result<Self, VersionParseError> {
		if version.is_empty() {
			return Err(VersionParseError::Empty);
		}
		if version.chars().any(char::is_whitespace) {
			return Err(VersionParseError::Whitespace(version.to_string()));
		}

		let (epoch, rest) = match version.split_once(':') {
			Some((epoch, rest)) => {
				if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
					return Err(VersionParseError::InvalidEpoch(version.to_string()));
				}
				let epoch = epoch.parse::<u64>().map_err(|_| VersionParseError::InvalidEpoch(version.to_string()))?;
				(epoch, rest)
			},
			None => (0, version),
		};

		let (pkgver, release) = match rest.rsplit_once('-') {
			Some((pkgver, release)) => (pkgver, Some(release)),
			None => (rest, None),
		};

		if pkgver.is_empty() || release.map_or(false, str::is_empty) {
			return Err(VersionParseError::EmptyComponent(version.to_string()));
		}
		if let Some(c) = pkgver.chars().find(|c| !is_version_char(*c)) {
			return Err(VersionParseError::InvalidCharacter(version.to_string(), c));
		}
		if !pkgver.chars().any(|c| c.is_ascii_alphanumeric()) {
			return Err(VersionParseError::EmptyComponent(version.to_string()));
		}
		if let Some(release) = release {
			if let Some(c) = release.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '.')) {
				return Err(VersionParseError::InvalidCharacter(version.to_string(), c));
			}
		}

		Ok(PackageVersion {
			epoch,
			version: pkgver.to_string(),
			release: release.map(str::to_string),
		})
	}

	pub fn epoch(&self) -> u64 {
		self.epoch
	}

	pub fn pkgver(&self) -> &str {
		&self.version
	}

	pub fn release(&self) -> Option<&str> {
		self.release.as_deref()
	}

	/// Compares `self` against a version taken from a constraint.
	///
	/// When the constraint's version has no release the release of `self` is not considered,
	/// so `1.2-3` satisfies `=1.2`.
	pub fn cmp_for_constraint(&self, constraint: &PackageVersion) -> Ordering {
		match self.epoch.cmp(&constraint.epoch) {
			Ordering::Equal => {},
			ord => return ord,
		}
		match segment_cmp(&self.version, &constraint.version) {
			Ordering::Equal => {},
			ord => return ord,
		}
		match (&self.release, &constraint.release) {
			(Some(lhs), Some(rhs)) => segment_cmp(lhs, rhs),
			_ => Ordering::Equal,
		}
	}
}

impl TryFrom<&str> for PackageVersion {
	type Error = VersionParseError;
	fn try_from(value: &str) -> Result<Self, Self::Error> { Self::new(value) }
}

impl std::str::FromStr for PackageVersion {
	type Err = VersionParseError;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::new(s) }
}

/// Compares two version fragments the way the native package manager does.
///
/// Both strings are split into runs of digits and runs of letters, anything else is a separator.
/// - Digit runs compare numerically, leading zeros are ignored.
/// - Letter runs compare lexically.
/// - A digit run is always newer than a letter run.
/// - When one string runs out, a remaining letter run is older (`1.0rc1 < 1.0`) and anything else is newer (`1.0 < 1.0.1`).
fn segment_cmp(lhs: &str, rhs: &str) -> Ordering {
	if lhs == rhs {
		return Ordering::Equal;
	}

	let a = lhs.as_bytes();
	let b = rhs.as_bytes();
	let (mut one, mut two) = (0usize, 0usize);
	let (mut p1, mut p2) = (0usize, 0usize);

	while p1 < a.len() && p2 < b.len() {
		while p1 < a.len() && !a[p1].is_ascii_alphanumeric() { p1 += 1; }
		while p2 < b.len() && !b[p2].is_ascii_alphanumeric() { p2 += 1; }

		if p1 >= a.len() || p2 >= b.len() {
			break;
		}

		/* Differing amounts of separators, the longer one is newer */
		if p1 - one != p2 - two {
			return (p1 - one).cmp(&(p2 - two));
		}

		one = p1;
		two = p2;

		let is_num = a[p1].is_ascii_digit();
		if is_num {
			while p1 < a.len() && a[p1].is_ascii_digit() { p1 += 1; }
			while p2 < b.len() && b[p2].is_ascii_digit() { p2 += 1; }
		} else {
			while p1 < a.len() && a[p1].is_ascii_alphabetic() { p1 += 1; }
			while p2 < b.len() && b[p2].is_ascii_alphabetic() { p2 += 1; }
		}

		/* Segments of different kinds, numbers are newer */
		if two == p2 {
			return if is_num { Ordering::Greater } else { Ordering::Less };
		}

		let mut seg1 = &a[one..p1];
		let mut seg2 = &b[two..p2];

		if is_num {
			while let [b'0', rest @ ..] = seg1 { seg1 = rest; }
			while let [b'0', rest @ ..] = seg2 { seg2 = rest; }
			match seg1.len().cmp(&seg2.len()) {
				Ordering::Equal => {},
				ord => return ord,
			}
		}

		match seg1.cmp(seg2) {
			Ordering::Equal => {},
			ord => return ord,
		}

		one = p1;
		two = p2;
	}

	/* Trailing separators were skipped, look past them */
	match (a.get(p1), b.get(p2)) {
		(None, None) => Ordering::Equal,
		(None, Some(c)) if !c.is_ascii_alphabetic() => Ordering::Less,
		(Some(c), _) if c.is_ascii_alphabetic() => Ordering::Less,
		_ => Ordering::Greater,
	}
}

impl PartialEq for PackageVersion {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for PackageVersion {}

impl Ord for PackageVersion {
	fn cmp(&self, other: &Self) -> Ordering {
		match self.epoch.cmp(&other.epoch) {
			Ordering::Equal => {},
			ord => return ord,
		}
		match segment_cmp(&self.version, &other.version) {
			Ordering::Equal => {},
			ord => return ord,
		}
		/* A missing release sorts first so the ordering stays total */
		match (&self.release, &other.release) {
			(None, None) => Ordering::Equal,
			(None, Some(_)) => Ordering::Less,
			(Some(_), None) => Ordering::Greater,
			(Some(lhs), Some(rhs)) => segment_cmp(lhs, rhs),
		}
	}
}

impl PartialOrd for PackageVersion {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl std::fmt::Display for PackageVersion {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.epoch > 0 {
			write!(f, "{}:", self.epoch)?;
		}
		write!(f, "{}", self.version)?;
		if let Some(release) = &self.release {
			write!(f, "-{}", release)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn v(s: &str) -> PackageVersion { PackageVersion::new(s).unwrap() }

	#[test] fn package_version_are_not_compared_lexically() { assert!(v("1.2.4") < v("1.2.10")) }
	#[test] fn package_version_short_version_is_lt() { assert!(v("1.2") < v("1.2.3")) }
	#[test] fn package_version_identical_are_eq() { assert!(v("1.2.3") == v("1.2.3")) }
	#[test] fn package_version_leading_zeros_are_ignored() { assert!(v("1.02") == v("1.2")) }
	#[test] fn package_version_higher_version_is_gt() { assert!(v("1.2.3") < v("1.2.4")) }
	#[test] fn package_version_prerelease_is_lt() { assert!(v("1.0rc1") < v("1.0")) }
	#[test] fn package_version_alpha_before_rc() { assert!(v("1.0alpha") < v("1.0rc1")) }
	#[test] fn package_version_number_beats_letters() { assert!(v("1.0.a") < v("1.0.1")) }
	#[test] fn package_version_epoch_is_respected() { assert!(v("1:0.1") > v("9.9")) }
	#[test] fn package_version_release_breaks_ties() { assert!(v("1.0-1") < v("1.0-2")) }
	#[test] fn package_version_release_is_numeric() { assert!(v("1.0-2") < v("1.0-10")) }
	#[test] fn package_version_missing_release_is_lt() { assert!(v("1.0") < v("1.0-1")) }
	#[test] fn package_version_trailing_separators_are_eq() { assert!(v("1.0.") == v("1.0..")) }
	#[test] fn package_version_trailing_separator_is_gt() { assert!(v("1.0") < v("1.0.")) }
	#[test] fn package_version_git_suffix_is_gt() { assert!(v("1.0") < v("1.0.r12.gabc123")) }
	#[test] fn package_version_display_round_trips() { assert_eq!(v("2:1.0.3-4").to_string(), "2:1.0.3-4") }

	#[test] fn package_version_rejects_empty() { assert_eq!(PackageVersion::new(""), Err(VersionParseError::Empty)) }
	#[test] fn package_version_rejects_whitespace() { assert!(PackageVersion::new("1.0 beta").is_err()) }
	#[test] fn package_version_rejects_bad_epoch() { assert!(PackageVersion::new("a:1.0").is_err()) }
	#[test] fn package_version_rejects_empty_release() { assert!(PackageVersion::new("1.0-").is_err()) }
	#[test] fn package_version_rejects_empty_pkgver() { assert!(PackageVersion::new("1:-1").is_err()) }
	#[test] fn package_version_rejects_dash_in_pkgver() { assert!(PackageVersion::new("1.0-2-3").is_err()) }
	#[test] fn package_version_rejects_separators_only() { assert!(PackageVersion::new("...").is_err()) }

	#[test]
	fn constraint_comparison_ignores_missing_release() {
		assert_eq!(v("1.2-3").cmp_for_constraint(&v("1.2")), Ordering::Equal);
		assert_eq!(v("1.2-3").cmp_for_constraint(&v("1.2-4")), Ordering::Less);
	}

	const CORPUS: &[&str] = &[
		"0.9_beta", "1.0a", "1.0alpha", "1.0rc1", "1.0", "1.00", "1.0-1", "1.0-2", "1.0-10",
		"1.0+git", "1.0.r12.gabc123", "1.0.", "1.0..", "1.0.1", "1.0.1.1", "1.2.4", "1.2.10", "2.0",
		"20240101", "1:0.1", "1:0.1-3", "2:0.0.1",
	];

	#[test]
	fn package_version_compare_is_reflexive() {
		for a in CORPUS {
			assert_eq!(v(a).cmp(&v(a)), Ordering::Equal, "{a}");
		}
	}

	#[test]
	fn package_version_compare_is_antisymmetric() {
		for a in CORPUS {
			for b in CORPUS {
				assert_eq!(v(a).cmp(&v(b)), v(b).cmp(&v(a)).reverse(), "{a} vs {b}");
			}
		}
	}

	#[test]
	fn package_version_compare_is_transitive() {
		for a in CORPUS {
			for b in CORPUS {
				for c in CORPUS {
					let (a, b, c) = (v(a), v(b), v(c));
					if a <= b && b <= c {
						assert!(a <= c, "{a} <= {b} <= {c} but not {a} <= {c}");
					}
				}
			}
		}
	}
}
