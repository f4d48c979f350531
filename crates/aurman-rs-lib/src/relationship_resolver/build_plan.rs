use std::collections::HashSet;

use crate::metadb::package::*;
use crate::native::InstallReason;

/// What happens to a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
	/// Already installed at a suitable version.
	Skip,
	/// Installed from the native repositories.
	InstallBinary,
	/// Recipe fetched, built and the artifact installed.
	BuildFromSource,
}

impl std::fmt::Display for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Action::Skip => write!(f, "skip"),
			Action::InstallBinary => write!(f, "install"),
			Action::BuildFromSource => write!(f, "build"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
	pub name: String,
	pub action: Action,
	/// Version to be installed, or the installed version for [`Action::Skip`].
	pub version: PackageVersion,
	/// `None` for skipped packages that were never looked up.
	pub record: Option<PackageRecord>,
	/// Direct dependencies that are also in the plan.
	pub depends_on: Vec<String>,
	pub reason: InstallReason,
}

impl PlanEntry {
	/// The recipe repository for entries built from source.
	pub fn recipe_base(&self) -> Option<&str> {
		match self.action {
			Action::BuildFromSource => self.record.as_ref().and_then(PackageRecord::recipe_base),
			_ => None,
		}
	}
}

/// Deduplicated entries, every entry after all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
	entries: Vec<PlanEntry>,
}

impl BuildPlan {
	/// # Errors
	/// - [`Validation`](crate::Error::Validation) when a name appears twice or an entry comes before one of its dependencies.
	pub fn new(entries: Vec<PlanEntry>) -> crate::Result<Self> {
		let mut seen = HashSet::<&str>::new();
		let names = entries.iter().map(|e| e.name.as_str()).collect::<HashSet<_>>();
		for entry in &entries {
			for dep in &entry.depends_on {
				if names.contains(dep.as_str()) && !seen.contains(dep.as_str()) {
					return Err(crate::Error::Validation(format!("{} is planned before its dependency {}", entry.name, dep)));
				}
			}
			if !seen.insert(&entry.name) {
				return Err(crate::Error::Validation(format!("{} is planned twice", entry.name)));
			}
			if entry.action == Action::BuildFromSource && entry.recipe_base().is_none() {
				return Err(crate::Error::Validation(format!("{} is built from source but has no recipe", entry.name)));
			}
		}
		Ok(Self { entries })
	}

	/// Entries already produced in dependency order by the planner.
	pub(crate) fn from_ordered(entries: Vec<PlanEntry>) -> Self {
		debug_assert!(Self::new(entries.clone()).is_ok());
		Self { entries }
	}

	pub fn entries(&self) -> &[PlanEntry] {
		&self.entries
	}

	pub fn iter(&self) -> std::slice::Iter<'_, PlanEntry> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, name: &str) -> Option<&PlanEntry> {
		self.entries.iter().find(|e| e.name == name)
	}

	pub fn position(&self, name: &str) -> Option<usize> {
		self.entries.iter().position(|e| e.name == name)
	}

	/// True when running the plan would change nothing.
	pub fn is_noop(&self) -> bool {
		self.entries.iter().all(|e| e.action == Action::Skip)
	}

	pub fn with_action(&self, action: Action) -> impl Iterator<Item = &PlanEntry> {
		self.entries.iter().filter(move |e| e.action == action)
	}
}

impl<'a> IntoIterator for &'a BuildPlan {
	type Item = &'a PlanEntry;
	type IntoIter = std::slice::Iter<'a, PlanEntry>;
	fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}

#[cfg(test)]
mod test {
	use super::*;

	fn entry(name: &str, deps: &[&str]) -> PlanEntry {
		PlanEntry {
			name: name.to_string(),
			action: Action::InstallBinary,
			version: PackageVersion::new("1.0-1").unwrap(),
			record: None,
			depends_on: deps.iter().map(|d| d.to_string()).collect(),
			reason: InstallReason::Dependency,
		}
	}

	#[test] fn ordered_plan_is_accepted() { assert!(BuildPlan::new(vec![entry("b", &[]), entry("a", &["b"])]).is_ok()) }
	#[test] fn dependency_after_dependent_is_rejected() { assert!(BuildPlan::new(vec![entry("a", &["b"]), entry("b", &[])]).is_err()) }
	#[test] fn duplicate_entry_is_rejected() { assert!(BuildPlan::new(vec![entry("a", &[]), entry("a", &[])]).is_err()) }
	#[test] fn build_without_recipe_is_rejected() {
		let mut e = entry("a", &[]);
		e.action = Action::BuildFromSource;
		assert!(BuildPlan::new(vec![e]).is_err());
	}
}
