//! Utilities for getting an ordered plan of packages to install or build from a list of requested packages.
//!
//! # Usage
//! 1. Create a [`Resolver`] over a [`MetaDB`] and a [`NativePackageManager`].
//! 1. [`Resolver::resolve()`] the requested [`PackageRef`]s.
//! 1. When the returned [`ResolveError`] only holds [`ResolveProblem::AmbiguousProvider`] problems,
//! answer them by calling [`Resolver::add_decision()`] with one of the options and resolve again.
//! 1. Hand the [`BuildPlan`] to an [`Orchestrator`](crate::installer::Orchestrator).

use std::collections::{HashMap, HashSet};

use petgraph::prelude::*;

use crate::Config;
use crate::metadb::{LookupError, MetaDB, OriginKind};
use crate::metadb::package::*;
use crate::native::{InstallReason, InstalledPackage, NativePackageManager};

pub mod dependency_graph;
use dependency_graph::*;

mod graph_builder;
use graph_builder::GraphBuilder;
mod planner;

pub mod build_plan;
pub use build_plan::{Action, BuildPlan, PlanEntry};
pub mod problem;
pub use problem::{Requirement, ResolveError, ResolveProblem, VersionConflict};

/// Choices between several providers of one name.
#[derive(Debug, Clone, Default)]
pub struct Decisions {
	/// Chosen package names, applied wherever exactly one of them is an option.
	global: HashSet<String>,
	/// Provided name to chosen package name.
	per_name: HashMap<String, String>,
}

impl Decisions {
	pub fn add(&mut self, choice: &str) {
		self.global.insert(choice.to_string());
	}

	pub fn add_for(&mut self, name: &str, choice: &str) {
		self.per_name.insert(name.to_string(), choice.to_string());
	}

	pub fn is_empty(&self) -> bool {
		self.global.is_empty() && self.per_name.is_empty()
	}

	/// The decided option for `name`, if any.
	pub fn pick<'o>(&self, name: &str, options: &'o [String]) -> Option<&'o String> {
		if let Some(choice) = self.per_name.get(name) {
			if let Some(o) = options.iter().find(|o| *o == choice) {
				return Some(o);
			}
			log::warn!("{} was chosen for {} but doesn't provide it", choice, name);
		}
		let mut decided = options.iter().filter(|o| self.global.contains(*o));
		match (decided.next(), decided.next()) {
			(Some(o), None) => Some(o),
			_ => None,
		}
	}
}

pub struct Resolver<'a> {
	config: &'a Config,
	metadb: &'a MetaDB,
	package_manager: &'a dyn NativePackageManager,
	decisions: Decisions,
}

impl<'a> Resolver<'a> {
	pub fn new(config: &'a Config, metadb: &'a MetaDB, package_manager: &'a dyn NativePackageManager) -> Self {
		Self {
			config,
			metadb,
			package_manager,
			decisions: Decisions::default(),
		}
	}

	/// Adds a package to pick whenever it is one of several providers.
	pub fn add_decision(&mut self, choice: &str) {
		self.decisions.add(choice);
	}

	/// Picks `choice` as the provider of `name` only.
	pub fn add_decision_for(&mut self, name: &str, choice: &str) {
		self.decisions.add_for(name, choice);
	}

	pub fn decisions(&self) -> &Decisions {
		&self.decisions
	}

	/// Expands `requests` into a dependency graph and plans it.
	///
	/// # Errors
	/// Every problem found during expansion and planning, collected into one [`ResolveError`].
	/// Nothing is planned unless every requirement can be met.
	pub async fn resolve(&self, requests: &[PackageRef]) -> Result<BuildPlan, ResolveError> {
		if requests.is_empty() {
			return Ok(BuildPlan::default());
		}
		log::info!("Resolving {} requested packages", requests.len());

		let builder = GraphBuilder::new(self.config, self.metadb, self.package_manager, &self.decisions);
		let (graph, mut problems) = builder.expand(requests).await;
		problems.extend(planner::check_conflicts(&graph));

		if !problems.is_empty() {
			log::debug!("Resolution found {} problems", problems.len());
			return Err(ResolveError::new(problems));
		}

		let plan = planner::plan(&graph)?;
		log::info!("Planned {} entries, {} to build", plan.len(), plan.with_action(Action::BuildFromSource).count());
		Ok(plan)
	}

	/// Requests for every foreign package with a newer version in the source repository.
	pub async fn upgrade_requests(&self) -> crate::Result<Vec<PackageRef>> {
		let foreign = self.package_manager.foreign_packages().await;
		if foreign.is_empty() {
			return Ok(Vec::new());
		}

		let names = foreign.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
		let available = self.metadb.lookup_many(OriginKind::Source, &names).await?
			.into_iter()
			.map(|r| (r.name.clone(), r))
			.collect::<HashMap<_, _>>();

		let mut requests = Vec::new();
		for installed in foreign {
			match available.get(&installed.name) {
				Some(record) if record.version > installed.version => {
					log::info!("{} {} -> {}", installed.name, installed.version, record.version);
					requests.push(PackageRef::new(&installed.name, VersionConstraint::Any).with_origin_hint(OriginHint::Source));
				},
				Some(_) => log::trace!("{} is up to date", installed.name),
				None => log::debug!("{} is not in {} or any sync repository", installed.name, OriginKind::Source),
			}
		}
		Ok(requests)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn options(names: &[&str]) -> Vec<String> {
		names.iter().map(|n| n.to_string()).collect()
	}

	#[test]
	fn global_decision_needs_single_match() {
		let mut d = Decisions::default();
		d.add("jre-openjdk");
		d.add("jdk-openjdk");
		assert_eq!(d.pick("java-runtime", &options(&["jre-openjdk", "jre8"])).map(String::as_str), Some("jre-openjdk"));
		assert_eq!(d.pick("java-environment", &options(&["jre-openjdk", "jdk-openjdk"])), None);
	}

	#[test]
	fn named_decision_wins() {
		let mut d = Decisions::default();
		d.add("a");
		d.add_for("virtual", "b");
		assert_eq!(d.pick("virtual", &options(&["a", "b"])).map(String::as_str), Some("b"));
		assert_eq!(d.pick("other", &options(&["a", "b"])).map(String::as_str), Some("a"));
	}

	#[test] fn no_decisions_pick_nothing() { assert_eq!(Decisions::default().pick("x", &options(&["a"])), None) }
}
