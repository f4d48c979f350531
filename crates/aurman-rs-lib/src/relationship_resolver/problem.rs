use thiserror::Error;

use crate::metadb::LookupError;
use crate::metadb::package::*;

/// One requirement placed on a package, and who placed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
	/// `None` when requested directly.
	pub required_by: Option<String>,
	pub constraint: VersionConstraint,
}

impl std::fmt::Display for Requirement {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let constraint = if self.constraint.is_any() { "any version".to_string() } else { self.constraint.to_string() };
		match &self.required_by {
			Some(by) => write!(f, "{} (required by {})", constraint, by),
			None => write!(f, "{} (requested)", constraint),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConflict {
	/// Two requirements on one package that can't both hold.
	Constraints { name: String, first: Requirement, second: Requirement },
	/// No candidate satisfies the requirement.
	Unavailable {
		name: String,
		required: Requirement,
		available: Option<PackageVersion>,
		installed: Option<PackageVersion>,
	},
}

impl std::fmt::Display for VersionConflict {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			VersionConflict::Constraints { name, first, second } => {
				write!(f, "conflicting requirements on {}: {} and {}", name, first, second)
			},
			VersionConflict::Unavailable { name, required, available, installed } => {
				write!(f, "no version of {} satisfies {}", name, required)?;
				if let Some(v) = available {
					write!(f, ", available is {}", v)?;
				}
				if let Some(v) = installed {
					write!(f, ", installed is {}", v)?;
				}
				Ok(())
			},
		}
	}
}

/// A reason the requested packages can't be planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveProblem {
	NotFound { name: String, required_by: Option<String> },
	/// Several packages provide `name` and nothing decides between them.
	/// Answer with [`Resolver::add_decision`](super::Resolver::add_decision) using one of `options`.
	AmbiguousProvider { name: String, options: Vec<String>, required_by: Option<String> },
	VersionConflict(VersionConflict),
	/// Starts and ends with the first discovered member of the cycle.
	CycleDetected { chain: Vec<String> },
	TransientLookupFailure { name: String, error: LookupError },
}

impl std::fmt::Display for ResolveProblem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ResolveProblem::NotFound { name, required_by: Some(by) } => write!(f, "{} not found (required by {})", name, by),
			ResolveProblem::NotFound { name, required_by: None } => write!(f, "{} not found", name),
			ResolveProblem::AmbiguousProvider { name, options, .. } => {
				write!(f, "{} is provided by several packages: {}", name, options.join(", "))
			},
			ResolveProblem::VersionConflict(c) => write!(f, "{}", c),
			ResolveProblem::CycleDetected { chain } => write!(f, "dependency cycle: {}", chain.join(" -> ")),
			ResolveProblem::TransientLookupFailure { name, error } => write!(f, "couldn't look up {}: {}", name, error),
		}
	}
}

/// Every problem found while resolving, planning is all or nothing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub struct ResolveError {
	pub problems: Vec<ResolveProblem>,
}

impl ResolveError {
	pub fn new(problems: Vec<ResolveProblem>) -> Self {
		Self { problems }
	}

	/// The ambiguous providers, the only problems a caller can answer.
	pub fn ambiguous_providers(&self) -> impl Iterator<Item = (&str, &[String])> {
		self.problems.iter().filter_map(|p| match p {
			ResolveProblem::AmbiguousProvider { name, options, .. } => Some((name.as_str(), options.as_slice())),
			_ => None,
		})
	}

	/// True when every problem can be answered with a decision.
	pub fn only_needs_decisions(&self) -> bool {
		!self.problems.is_empty() && self.problems.iter().all(|p| matches!(p, ResolveProblem::AmbiguousProvider { .. }))
	}
}

impl std::fmt::Display for ResolveError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "dependency resolution failed:")?;
		for p in &self.problems {
			write!(f, "\n  - {}", p)?;
		}
		Ok(())
	}
}
