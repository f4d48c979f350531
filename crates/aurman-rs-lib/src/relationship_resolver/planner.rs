//! Turns an expanded [`DependencyGraph`] into a [`BuildPlan`].

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::*;

/// Finds requirements the chosen packages don't meet.
///
/// A failing requirement clashing with another requirement on the same name is reported as a pair,
/// otherwise against the available and installed versions.
pub(super) fn check_conflicts(graph: &DependencyGraph) -> Vec<ResolveProblem> {
	let mut problems = Vec::new();

	for (i, node) in graph.packages() {
		if node.status != NodeStatus::Resolved {
			continue;
		}
		let requirements = graph.requirements_on(i);
		let mut reported = HashSet::<(usize, usize)>::new();

		for (f, (by, edge)) in requirements.iter().enumerate() {
			let required = edge.requirement(&node.name);
			if node.satisfies(&required) {
				continue;
			}

			let clash = requirements.iter().enumerate().find(|(j, (_, other))| {
				*j != f && other.via == edge.via && !edge.constraint.is_compatible_with(&other.constraint)
			});

			match clash {
				Some((j, (other_by, other))) => {
					if !reported.insert((f.min(j), f.max(j))) {
						continue;
					}
					let this = Requirement { required_by: by.map(str::to_string), constraint: edge.constraint.clone() };
					let that = Requirement { required_by: other_by.map(str::to_string), constraint: other.constraint.clone() };
					let (first, second) = if f < j { (this, that) } else { (that, this) };
					problems.push(ResolveProblem::VersionConflict(VersionConflict::Constraints { name: required.name, first, second }));
				},
				None => {
					problems.push(ResolveProblem::VersionConflict(VersionConflict::Unavailable {
						name: required.name,
						required: Requirement { required_by: by.map(str::to_string), constraint: edge.constraint.clone() },
						available: node.record.as_ref().map(|r| r.version.clone()),
						installed: node.installed.as_ref().map(|p| p.version.clone()),
					}));
				},
			}
		}
	}

	problems
}

fn classify(node: &PackageNode) -> Option<(Action, PackageVersion)> {
	if !node.install {
		let version = node.installed.as_ref().map(|p| p.version.clone())
			.or_else(|| node.record.as_ref().map(|r| r.version.clone()))?;
		return Some((Action::Skip, version));
	}
	let record = node.record.as_ref()?;
	let action = match record.origin {
		Origin::Native { .. } => Action::InstallBinary,
		Origin::Source { .. } => Action::BuildFromSource,
	};
	Some((action, record.version.clone()))
}

/// Linearizes the graph, dependencies first.
///
/// Kahn's algorithm where ties go to the node discovered first so the same graph always gives the same plan.
pub(super) fn plan(graph: &DependencyGraph) -> Result<BuildPlan, ResolveError> {
	let nodes = graph.packages();
	let mut remaining = HashMap::<NodeIndex, usize>::with_capacity(nodes.len());
	let mut dependents = HashMap::<NodeIndex, Vec<NodeIndex>>::new();
	let mut ready = BinaryHeap::new();

	for (i, node) in &nodes {
		let deps = graph.dependencies(*i);
		for d in &deps {
			dependents.entry(*d).or_default().push(*i);
		}
		if deps.is_empty() {
			ready.push(Reverse((node.discovered, *i)));
		}
		remaining.insert(*i, deps.len());
	}

	let mut entries = Vec::with_capacity(nodes.len());
	while let Some(Reverse((_, i))) = ready.pop() {
		let Some(node) = graph.package(i) else { continue };
		let Some((action, version)) = classify(node) else {
			return Err(ResolveError::new(vec![ResolveProblem::NotFound { name: node.name.clone(), required_by: None }]));
		};

		log::trace!("Planned {} {} ({})", node.name, version, action);
		entries.push(PlanEntry {
			name: node.name.clone(),
			action,
			version,
			record: node.record.clone(),
			depends_on: graph.dependencies(i).into_iter().filter_map(|d| graph.name(d).map(str::to_string)).collect(),
			reason: if graph.is_requested(i) { InstallReason::Explicit } else { InstallReason::Dependency },
		});

		for dependent in dependents.get(&i).into_iter().flatten() {
			if let Some(count) = remaining.get_mut(dependent) {
				*count -= 1;
				if *count == 0 {
					if let Some(p) = graph.package(*dependent) {
						ready.push(Reverse((p.discovered, *dependent)));
					}
				}
			}
		}
	}

	if entries.len() != nodes.len() {
		let problems = graph.find_cycles().into_iter()
			.map(|c| ResolveProblem::CycleDetected { chain: c.iter().filter_map(|i| graph.name(*i).map(str::to_string)).collect() })
			.collect();
		return Err(ResolveError::new(problems));
	}

	warn_conflicting_installs(&entries);
	Ok(BuildPlan::from_ordered(entries))
}

/// Conflicts between planned packages are left for the native package manager to ask about.
fn warn_conflicting_installs(entries: &[PlanEntry]) {
	let records = entries.iter()
		.filter(|e| e.action != Action::Skip)
		.filter_map(|e| e.record.as_ref())
		.collect::<Vec<_>>();
	for (n, a) in records.iter().enumerate() {
		for b in &records[n + 1..] {
			if PackageRecord::do_packages_conflict(a, b) {
				log::warn!("{} and {} conflict with each other", a.name, b.name);
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn add(graph: &mut DependencyGraph, name: &str, version: &str, origin: Origin) -> NodeIndex {
		let i = graph.add_package_node(name);
		graph.advance(i, NodeStatus::Resolving);
		let node = graph.package_mut(i).unwrap();
		node.record = Some(PackageRecord::new(name, PackageVersion::new(version).unwrap(), origin));
		node.install = true;
		graph.advance(i, NodeStatus::Resolved);
		i
	}

	fn source(name: &str) -> Origin { Origin::Source { base: name.to_string() } }

	fn edge(constraint: VersionConstraint) -> EdgeData {
		EdgeData { constraint, via: None, kind: DependencyKind::Runtime }
	}

	fn names(plan: &BuildPlan) -> Vec<&str> {
		plan.iter().map(|e| e.name.as_str()).collect()
	}

	#[test]
	fn dependencies_come_first() {
		let mut g = DependencyGraph::default();
		let a = add(&mut g, "a", "1", source("a"));
		let b = add(&mut g, "b", "1", source("b"));
		let c = add(&mut g, "c", "1", source("c"));
		g.add_requirement(g.meta_node, a, edge(VersionConstraint::Any));
		g.add_requirement(a, b, edge(VersionConstraint::Any));
		g.add_requirement(a, c, edge(VersionConstraint::Any));
		g.add_requirement(c, b, edge(VersionConstraint::Any));

		let plan = plan(&g).unwrap();
		assert_eq!(names(&plan), vec!["b", "c", "a"]);
		assert_eq!(plan.get("a").unwrap().reason, InstallReason::Explicit);
		assert_eq!(plan.get("b").unwrap().reason, InstallReason::Dependency);
	}

	#[test]
	fn ties_follow_discovery_order() {
		let mut g = DependencyGraph::default();
		let root = add(&mut g, "root", "1", source("root"));
		let z = add(&mut g, "z", "1", Origin::Native { repository: "extra".to_string() });
		let y = add(&mut g, "y", "1", Origin::Native { repository: "extra".to_string() });
		g.add_requirement(root, z, edge(VersionConstraint::Any));
		g.add_requirement(root, y, edge(VersionConstraint::Any));

		let plan = plan(&g).unwrap();
		assert_eq!(names(&plan), vec!["z", "y", "root"]);
		assert_eq!(plan.get("z").unwrap().action, Action::InstallBinary);
		assert_eq!(plan.get("root").unwrap().action, Action::BuildFromSource);
	}

	#[test]
	fn incompatible_requirements_are_reported_as_pair() {
		let mut g = DependencyGraph::default();
		let a = add(&mut g, "a", "1", source("a"));
		let b = add(&mut g, "b", "1", source("b"));
		let lib = add(&mut g, "lib", "1.5", source("lib"));
		g.add_requirement(a, lib, edge(VersionConstraint::parse(">=", "2").unwrap()));
		g.add_requirement(b, lib, edge(VersionConstraint::parse("<", "1.8").unwrap()));

		let problems = check_conflicts(&g);
		assert_eq!(problems.len(), 1);
		match &problems[0] {
			ResolveProblem::VersionConflict(VersionConflict::Constraints { name, first, second }) => {
				assert_eq!(name, "lib");
				assert_eq!(first.required_by.as_deref(), Some("a"));
				assert_eq!(second.required_by.as_deref(), Some("b"));
			},
			p => panic!("unexpected problem {:?}", p),
		}
	}

	#[test]
	fn unmet_requirement_names_available_version() {
		let mut g = DependencyGraph::default();
		let pkg = add(&mut g, "pkg", "1.9", source("pkg"));
		g.add_requirement(g.meta_node, pkg, edge(VersionConstraint::parse(">=", "2.0").unwrap()));

		let problems = check_conflicts(&g);
		assert_eq!(problems, vec![ResolveProblem::VersionConflict(VersionConflict::Unavailable {
			name: "pkg".to_string(),
			required: Requirement { required_by: None, constraint: VersionConstraint::parse(">=", "2.0").unwrap() },
			available: Some(PackageVersion::new("1.9").unwrap()),
			installed: None,
		})]);
	}
}
