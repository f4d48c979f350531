use std::cmp::Ordering;

use super::{PackageVersion, VersionParseError};

/// A requirement placed on the version of a package.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
	#[default] Any,
	Exact(PackageVersion),
	AtLeast(PackageVersion),
	AtMost(PackageVersion),
	Greater(PackageVersion),
	Less(PackageVersion),
	NotEqual(PackageVersion),
}

/// One end of a version range. `inclusive` is false for strict bounds.
struct Bound<'a> {
	version: &'a PackageVersion,
	inclusive: bool,
}

impl VersionConstraint {
	/// Builds a constraint from a comparison operator and version as they appear in dependency strings.
	///
	/// An empty operator with an empty version gives [`VersionConstraint::Any`].
	pub fn parse(operator: &str, version: &str) -> Result<Self, VersionParseError> {
		if operator.is_empty() && version.is_empty() {
			return Ok(VersionConstraint::Any);
		}
		let v = PackageVersion::new(version)?;
		match operator {
			"=" | "==" => Ok(VersionConstraint::Exact(v)),
			">=" => Ok(VersionConstraint::AtLeast(v)),
			"<=" => Ok(VersionConstraint::AtMost(v)),
			">" => Ok(VersionConstraint::Greater(v)),
			"<" => Ok(VersionConstraint::Less(v)),
			"!=" => Ok(VersionConstraint::NotEqual(v)),
			_ => Err(VersionParseError::UnknownOperator(format!("{}{}", operator, version))),
		}
	}

	pub fn version(&self) -> Option<&PackageVersion> {
		match self {
			VersionConstraint::Any => None,
			VersionConstraint::Exact(v)
			| VersionConstraint::AtLeast(v)
			| VersionConstraint::AtMost(v)
			| VersionConstraint::Greater(v)
			| VersionConstraint::Less(v)
			| VersionConstraint::NotEqual(v) => Some(v),
		}
	}

	pub fn operator(&self) -> &'static str {
		match self {
			VersionConstraint::Any => "",
			VersionConstraint::Exact(_) => "=",
			VersionConstraint::AtLeast(_) => ">=",
			VersionConstraint::AtMost(_) => "<=",
			VersionConstraint::Greater(_) => ">",
			VersionConstraint::Less(_) => "<",
			VersionConstraint::NotEqual(_) => "!=",
		}
	}

	pub fn is_any(&self) -> bool {
		matches!(self, VersionConstraint::Any)
	}

	pub fn is_satisfied_by(&self, candidate: &PackageVersion) -> bool {
		match self {
			VersionConstraint::Any => true,
			VersionConstraint::Exact(v) => candidate.cmp_for_constraint(v) == Ordering::Equal,
			VersionConstraint::AtLeast(v) => candidate.cmp_for_constraint(v) != Ordering::Less,
			VersionConstraint::AtMost(v) => candidate.cmp_for_constraint(v) != Ordering::Greater,
			VersionConstraint::Greater(v) => candidate.cmp_for_constraint(v) == Ordering::Greater,
			VersionConstraint::Less(v) => candidate.cmp_for_constraint(v) == Ordering::Less,
			VersionConstraint::NotEqual(v) => candidate.cmp_for_constraint(v) != Ordering::Equal,
		}
	}

	fn lower(&self) -> Option<Bound> {
		match self {
			VersionConstraint::Exact(v) | VersionConstraint::AtLeast(v) => Some(Bound { version: v, inclusive: true }),
			VersionConstraint::Greater(v) => Some(Bound { version: v, inclusive: false }),
			_ => None,
		}
	}

	fn upper(&self) -> Option<Bound> {
		match self {
			VersionConstraint::Exact(v) | VersionConstraint::AtMost(v) => Some(Bound { version: v, inclusive: true }),
			VersionConstraint::Less(v) => Some(Bound { version: v, inclusive: false }),
			_ => None,
		}
	}

	/// Checks whether some version could satisfy both constraints at once.
	///
	/// Versions are treated as dense, there is always another version between two distinct ones.
	pub fn is_compatible_with(&self, other: &Self) -> bool {
		match (self, other) {
			(VersionConstraint::Any, _) | (_, VersionConstraint::Any) => true,
			(VersionConstraint::NotEqual(a), VersionConstraint::Exact(b))
			| (VersionConstraint::Exact(b), VersionConstraint::NotEqual(a)) => a.cmp_for_constraint(b) != Ordering::Equal,
			(VersionConstraint::NotEqual(_), _) | (_, VersionConstraint::NotEqual(_)) => true,
			_ => {
				let lower = match (self.lower(), other.lower()) {
					(Some(a), Some(b)) => Some(tighter(a, b, Ordering::Greater)),
					(a, b) => a.or(b),
				};
				let upper = match (self.upper(), other.upper()) {
					(Some(a), Some(b)) => Some(tighter(a, b, Ordering::Less)),
					(a, b) => a.or(b),
				};
				match (lower, upper) {
					(Some(lo), Some(hi)) => match lo.version.cmp_for_constraint(hi.version) {
						Ordering::Less => true,
						Ordering::Equal => lo.inclusive && hi.inclusive,
						Ordering::Greater => false,
					},
					_ => true,
				}
			},
		}
	}
}

/// Picks the more restrictive of two bounds, `prefer` is the ordering that wins.
fn tighter<'a>(a: Bound<'a>, b: Bound<'a>, prefer: Ordering) -> Bound<'a> {
	match a.version.cmp_for_constraint(b.version) {
		Ordering::Equal => Bound { version: a.version, inclusive: a.inclusive && b.inclusive },
		ord if ord == prefer => a,
		_ => b,
	}
}

impl std::fmt::Display for VersionConstraint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.version() {
			Some(v) => write!(f, "{}{}", self.operator(), v),
			None => Ok(()),
		}
	}
}
