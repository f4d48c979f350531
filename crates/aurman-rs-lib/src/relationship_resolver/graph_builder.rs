//! Breadth first expansion of the requested packages into a [`DependencyGraph`].
//!
//! Each level is resolved together so lookups can be batched:
//! 1. Requests for names already in the graph only gain an edge, unless they rule out the installed package
//!    a leaf was resolved to. Those leaves are resolved again.
//! 1. Installed packages satisfying every request become leaves without any lookup.
//! 1. Remaining names are looked up natively, then in the source repository.
//! 1. Names that are not real packages go through provider selection.

use std::collections::{HashMap, HashSet};

use futures::{stream, StreamExt};

use super::*;

struct Pending {
	request: PackageRef,
	parent: NodeIndex,
	kind: DependencyKind,
}

/// Every request for one name within a level.
struct Group {
	name: String,
	pending: Vec<Pending>,
	/// Installed leaf being resolved again.
	reopen: Option<NodeIndex>,
}

impl Group {
	fn is_requested(&self, meta: NodeIndex) -> bool {
		self.pending.iter().any(|p| p.parent == meta)
	}

	fn hint(&self) -> Option<&OriginHint> {
		self.pending.iter().find_map(|p| p.request.origin_hint.as_ref())
	}

	fn satisfied_by_installed(&self, installed: &InstalledPackage) -> bool {
		self.pending.iter().all(|p| installed.satisfies(&PackageRef::new(&self.name, p.request.constraint.clone())))
	}

	fn satisfied_by_record(&self, record: &PackageRecord) -> bool {
		self.pending.iter().all(|p| does_package_provide_ref(record, &PackageRef::new(&self.name, p.request.constraint.clone())))
	}

	fn allows_native(&self, record: &PackageRecord) -> bool {
		match (self.hint(), &record.origin) {
			(Some(OriginHint::Source), _) => false,
			(Some(OriginHint::Native(repo)), Origin::Native { repository }) => repo == repository,
			_ => true,
		}
	}

	fn allows_source(&self) -> bool {
		!matches!(self.hint(), Some(OriginHint::Native(_)))
	}
}

enum Outcome {
	Resolved {
		name: String,
		record: Option<PackageRecord>,
		installed: Option<InstalledPackage>,
		install: bool,
	},
	Problem(ResolveProblem),
}

pub(super) struct GraphBuilder<'a> {
	metadb: &'a MetaDB,
	package_manager: &'a dyn NativePackageManager,
	decisions: &'a Decisions,
	prefer_installed_provider: bool,
	parallel_limit: usize,
	graph: DependencyGraph,
	problems: Vec<ResolveProblem>,
	reopened: HashSet<NodeIndex>,
}

impl<'a> GraphBuilder<'a> {
	pub(super) fn new(config: &Config, metadb: &'a MetaDB, package_manager: &'a dyn NativePackageManager, decisions: &'a Decisions) -> Self {
		Self {
			metadb,
			package_manager,
			decisions,
			prefer_installed_provider: config.prefer_installed_provider(),
			parallel_limit: config.parallel_fetch_limit(),
			graph: DependencyGraph::default(),
			problems: Vec::new(),
			reopened: HashSet::new(),
		}
	}

	/// Expands `requests` until every reachable requirement has a node, then marks cycles.
	///
	/// Unresolvable names don't stop the expansion of their siblings so every problem is reported.
	pub(super) async fn expand(mut self, requests: &[PackageRef]) -> (DependencyGraph, Vec<ResolveProblem>) {
		let meta = self.graph.meta_node;
		let mut level = requests.iter()
			.map(|r| Pending { request: r.clone(), parent: meta, kind: DependencyKind::Requested })
			.collect::<Vec<_>>();

		let mut depth = 0;
		while !level.is_empty() {
			log::debug!("Expanding level {} with {} requirements", depth, level.len());
			let groups = self.group_level(level);
			let outcomes = self.resolve_groups(&groups).await;

			level = Vec::new();
			for (group, outcome) in groups.into_iter().zip(outcomes) {
				level.extend(self.apply(group, outcome));
			}
			depth += 1;
		}

		for chain in self.graph.mark_cycles() {
			log::warn!("Dependency cycle: {}", chain.join(" -> "));
			self.problems.push(ResolveProblem::CycleDetected { chain });
		}

		(self.graph, self.problems)
	}

	/// Attaches requests for names already in the graph and groups the rest by name in request order.
	fn group_level(&mut self, level: Vec<Pending>) -> Vec<Group> {
		let mut groups = Vec::<Group>::new();
		let mut positions = HashMap::<String, usize>::new();

		for p in level {
			let mut reopen = None;
			if let Some(target) = self.graph.node_index(&p.request.name) {
				if !positions.contains_key(&p.request.name) && !self.rules_out_installed(target, &p) {
					self.attach(&p, target);
					continue;
				}
				reopen = Some(target);
			}
			match positions.get(&p.request.name) {
				Some(&i) => groups[i].pending.push(p),
				None => {
					positions.insert(p.request.name.clone(), groups.len());
					groups.push(Group { name: p.request.name.clone(), pending: vec![p], reopen });
				},
			}
		}
		groups
	}

	/// The node was kept as installed but `p` asks for a version the installed package doesn't have.
	fn rules_out_installed(&self, target: NodeIndex, p: &Pending) -> bool {
		if self.reopened.contains(&target) {
			return false;
		}
		match self.graph.package(target) {
			Some(node) if node.record.is_none() && node.name == p.request.name => node.installed.as_ref()
				.map_or(false, |inst| !inst.satisfies(&PackageRef::new(&node.name, p.request.constraint.clone()))),
			_ => false,
		}
	}

	fn requirements_of(i: NodeIndex, record: &PackageRecord) -> Vec<Pending> {
		/* Native packages get their dependencies from the native package manager */
		if !record.origin.is_source() {
			return Vec::new();
		}
		record.dependencies.runtime.iter().map(|d| (d, DependencyKind::Runtime))
			.chain(record.dependencies.build.iter().map(|d| (d, DependencyKind::Build)))
			.map(|(d, kind)| Pending { request: d.clone(), parent: i, kind })
			.collect()
	}

	fn attach(&mut self, p: &Pending, target: NodeIndex) {
		let via = match self.graph.name(target) {
			Some(name) if name != p.request.name => Some(p.request.name.clone()),
			_ => None,
		};
		self.graph.add_requirement(p.parent, target, EdgeData {
			constraint: p.request.constraint.clone(),
			via,
			kind: p.kind,
		});
	}

	fn required_by(&self, group: &Group) -> Option<String> {
		group.pending.first().and_then(|p| self.graph.name(p.parent)).map(str::to_string)
	}

	/// Adds the node for a resolved group and returns the requirements of the node to expand next.
	fn apply(&mut self, group: Group, outcome: Outcome) -> Vec<Pending> {
		match outcome {
			Outcome::Problem(problem) => {
				let i = match self.graph.node_index(&group.name) {
					Some(i) => i,
					None => {
						let i = self.graph.add_package_node(&group.name);
						self.graph.advance(i, NodeStatus::Resolving);
						self.graph.advance(i, NodeStatus::Unsatisfiable);
						i
					},
				};
				for p in &group.pending {
					self.attach(p, i);
				}
				self.problems.push(problem);
				Vec::new()
			},
			Outcome::Resolved { name, record, installed, install } => {
				let mut next = Vec::new();
				let i = match self.graph.node_index(&name) {
					Some(i) => {
						if group.reopen == Some(i) {
							self.reopened.insert(i);
							if let (true, Some(r)) = (install, &record) {
								log::debug!("{} is needed over the installed version", r);
								next = Self::requirements_of(i, r);
								if let Some(node) = self.graph.package_mut(i) {
									node.record = record;
									node.install = true;
								}
							}
						}
						i
					},
					None => {
						let i = self.graph.add_package_node(&name);
						self.graph.advance(i, NodeStatus::Resolving);

						if let (true, Some(r)) = (install, &record) {
							next = Self::requirements_of(i, r);
						}

						if let Some(node) = self.graph.package_mut(i) {
							node.record = record;
							node.installed = installed;
							node.install = install;
						}
						self.graph.advance(i, NodeStatus::Resolved);
						i
					},
				};
				self.graph.add_alias(&group.name, &name);
				for p in &group.pending {
					self.attach(p, i);
				}
				next
			},
		}
	}

	async fn resolve_groups(&self, groups: &[Group]) -> Vec<Outcome> {
		let meta = self.graph.meta_node;
		let mut outcomes = groups.iter().map(|_| None).collect::<Vec<Option<Outcome>>>();
		let mut installed = groups.iter().map(|_| None).collect::<Vec<Option<InstalledPackage>>>();

		/* Installed leaves, nothing to look up */
		for (i, g) in groups.iter().enumerate() {
			let inst = self.package_manager.installed_package(&g.name).await;
			if !g.is_requested(meta) {
				if let Some(p) = inst.as_ref().filter(|p| g.satisfied_by_installed(p)) {
					log::trace!("{} is satisfied by installed {}", g.name, p.version);
					outcomes[i] = Some(Outcome::Resolved { name: g.name.clone(), record: None, installed: inst.clone(), install: false });
					continue;
				}
				if self.prefer_installed_provider && inst.is_none() {
					let providers = self.package_manager.installed_providers(&g.name).await;
					if let Some(p) = providers.into_iter().find(|p| g.satisfied_by_installed(p)) {
						log::debug!("{} is provided by installed {}", g.name, p.name);
						outcomes[i] = Some(Outcome::Resolved { name: p.name.clone(), record: None, installed: Some(p), install: false });
						continue;
					}
				}
			}
			installed[i] = inst;
		}

		/* Direct lookups, native first */
		let mut records = groups.iter().map(|_| None).collect::<Vec<Option<PackageRecord>>>();
		for origin in [OriginKind::Native, OriginKind::Source] {
			let wanted = groups.iter().enumerate()
				.filter(|(i, _)| outcomes[*i].is_none() && records[*i].is_none())
				.filter(|(_, g)| match origin {
					OriginKind::Native => !matches!(g.hint(), Some(OriginHint::Source)),
					OriginKind::Source => g.allows_source(),
				})
				.map(|(i, _)| i)
				.collect::<Vec<_>>();
			if wanted.is_empty() {
				continue;
			}

			let names = wanted.iter().map(|i| groups[*i].name.clone()).collect::<Vec<_>>();
			match self.metadb.lookup_many(origin, &names).await {
				Ok(found) => {
					let mut found = found.into_iter().map(|r| (r.name.clone(), r)).collect::<HashMap<_, _>>();
					for i in wanted {
						let g = &groups[i];
						if let Some(r) = found.remove(&g.name) {
							if origin == OriginKind::Source || g.allows_native(&r) {
								records[i] = Some(r);
							}
						}
					}
				},
				Err(error) => {
					for i in wanted {
						outcomes[i] = Some(Outcome::Problem(ResolveProblem::TransientLookupFailure { name: groups[i].name.clone(), error: error.clone() }));
					}
				},
			}
		}

		let mut need_provider = Vec::new();
		for (i, g) in groups.iter().enumerate() {
			if outcomes[i].is_some() {
				continue;
			}
			outcomes[i] = match (records[i].take(), installed[i].take()) {
				(Some(record), inst) => Some(self.decide(g, record, inst)),
				/* Installed but no longer available, kept as is */
				(None, Some(inst)) => Some(Outcome::Resolved { name: g.name.clone(), record: None, installed: Some(inst), install: false }),
				(None, None) => {
					need_provider.push(i);
					None
				},
			};
		}

		let provided = stream::iter(need_provider)
			.map(|i| async move { (i, self.find_provider(&groups[i]).await) })
			.buffered(self.parallel_limit)
			.collect::<Vec<_>>()
			.await;
		for (i, outcome) in provided {
			outcomes[i] = Some(outcome);
		}

		outcomes.into_iter()
			.zip(groups)
			.map(|(o, g)| o.unwrap_or_else(|| Outcome::Problem(ResolveProblem::NotFound { name: g.name.clone(), required_by: self.required_by(g) })))
			.collect()
	}

	/// Chooses between keeping the installed package and installing `record`.
	fn decide(&self, group: &Group, record: PackageRecord, installed: Option<InstalledPackage>) -> Outcome {
		let requested = group.is_requested(self.graph.meta_node);
		if let Some(inst) = installed.as_ref().filter(|p| group.satisfied_by_installed(p)) {
			if requested && record.version > inst.version {
				log::info!("{} will be upgraded from {} to {}", record.name, inst.version, record.version);
			} else {
				if requested {
					log::info!("{} {} is already installed and up to date", inst.name, inst.version);
				}
				return Outcome::Resolved { name: record.name.clone(), record: Some(record), installed, install: false };
			}
		}
		Outcome::Resolved { name: record.name.clone(), record: Some(record), installed, install: true }
	}

	/// Picks a provider for a name that is not a package itself.
	///
	/// Preference: an installed provider, a single native provider, a decision, a single source provider.
	async fn find_provider(&self, group: &Group) -> Outcome {
		let lookup_failed = |error: LookupError| Outcome::Problem(ResolveProblem::TransientLookupFailure { name: group.name.clone(), error });

		if self.prefer_installed_provider {
			let providers = self.package_manager.installed_providers(&group.name).await;
			if let Some(p) = providers.into_iter().find(|p| group.satisfied_by_installed(p)) {
				log::debug!("{} is provided by installed {}", group.name, p.name);
				if !group.is_requested(self.graph.meta_node) {
					return Outcome::Resolved { name: p.name.clone(), record: None, installed: Some(p), install: false };
				}
				/* Requested, so it may be upgraded */
				for origin in [OriginKind::Native, OriginKind::Source] {
					match self.metadb.lookup(origin, &p.name).await {
						Ok(Some(record)) => return self.decide(group, record, Some(p)),
						Ok(None) => {},
						Err(e) => return lookup_failed(e),
					}
				}
				return Outcome::Resolved { name: p.name.clone(), record: None, installed: Some(p), install: false };
			}
		}

		let mut candidates = if matches!(group.hint(), Some(OriginHint::Source)) {
			Vec::new()
		} else {
			match self.metadb.providers(OriginKind::Native, &group.name).await {
				Ok(found) => found.into_iter().filter(|r| group.allows_native(r) && group.satisfied_by_record(r)).collect(),
				Err(e) => return lookup_failed(e),
			}
		};
		let native = !candidates.is_empty();

		if !native && group.allows_source() {
			candidates = match self.metadb.providers(OriginKind::Source, &group.name).await {
				Ok(found) => found.into_iter().filter(|r| group.satisfied_by_record(r)).collect(),
				Err(e) => return lookup_failed(e),
			};
		}

		let options = candidates.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
		let chosen = if native && candidates.len() == 1 {
			Some(0)
		} else {
			self.decisions.pick(&group.name, &options)
				.and_then(|c| options.iter().position(|o| o == c))
				.or(if candidates.len() == 1 { Some(0) } else { None })
		};

		match chosen {
			Some(idx) => {
				let record = candidates.swap_remove(idx);
				log::debug!("{} is provided by {}", group.name, record);
				let installed = self.package_manager.installed_package(&record.name).await;
				self.decide(group, record, installed)
			},
			None if candidates.is_empty() => Outcome::Problem(ResolveProblem::NotFound { name: group.name.clone(), required_by: self.required_by(group) }),
			None => Outcome::Problem(ResolveProblem::AmbiguousProvider { name: group.name.clone(), options, required_by: self.required_by(group) }),
		}
	}
}
