//! Module for only DependencyGraph functions not related to the overall resolving process.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::prelude::*;

use crate::metadb::package::*;
use crate::native::InstalledPackage;

/// Progress of a node through resolution. Only ever advances, see [`NodeStatus::can_advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
	Unresolved,
	Resolving,
	Resolved,
	Cyclic,
	Unsatisfiable,
}

impl NodeStatus {
	pub fn can_advance_to(self, next: NodeStatus) -> bool {
		use NodeStatus::*;
		matches!((self, next),
			(Unresolved, Resolving)
			| (Resolving, Resolved)
			| (Resolving, Cyclic)
			| (Resolving, Unsatisfiable)
			| (Resolved, Cyclic)
		)
	}
}

#[derive(Debug, Clone)]
pub struct PackageNode {
	pub name: String,
	pub status: NodeStatus,
	/// The record that was found available, if any lookup was made.
	pub record: Option<PackageRecord>,
	pub installed: Option<InstalledPackage>,
	/// The package will be installed or built, otherwise the installed package is kept.
	pub install: bool,
	/// Order of discovery, used to keep plans deterministic.
	pub discovered: usize,
}

impl PackageNode {
	/// Checks `requirement` against the package that will be on the system once the plan runs.
	pub fn satisfies(&self, requirement: &PackageRef) -> bool {
		if self.install {
			self.record.as_ref().map_or(false, |r| does_package_provide_ref(r, requirement))
		} else {
			self.installed.as_ref().map_or(false, |i| i.satisfies(requirement))
		}
	}
}

#[derive(Debug, Clone)]
pub enum NodeData {
	/// Control node for giving the users requests a presence in the graph.
	Meta,
	Package(PackageNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
	/// Edge from the meta node.
	Requested,
	Runtime,
	Build,
}

/// A requirement from the source node on the target node.
#[derive(Debug, Clone)]
pub struct EdgeData {
	pub constraint: VersionConstraint,
	/// The name that was asked for when the target was chosen as a provider.
	pub via: Option<String>,
	pub kind: DependencyKind,
}

impl EdgeData {
	/// The requirement as it was written, against the target named `target`.
	pub fn requirement(&self, target: &str) -> PackageRef {
		PackageRef::new(self.via.as_deref().unwrap_or(target), self.constraint.clone())
	}
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
	pub graph: StableDiGraph<NodeData, EdgeData>,
	pub meta_node: NodeIndex,
	index: HashMap<String, NodeIndex>,
	/// Names satisfied by a provider, to the provider's name.
	aliases: HashMap<String, String>,
	next_discovery: usize,
}

impl Default for DependencyGraph {
	fn default() -> Self {
		let mut graph = StableDiGraph::<NodeData, EdgeData>::default();
		let meta_node = graph.add_node(NodeData::Meta);
		Self {
			graph,
			meta_node,
			index: HashMap::new(),
			aliases: HashMap::new(),
			next_discovery: 0,
		}
	}
}

impl DependencyGraph {
	/// Finds the node for `name`, following provider aliases.
	pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
		self.index.get(name)
			.or_else(|| self.aliases.get(name).and_then(|real| self.index.get(real)))
			.copied()
	}

	/// Adds an `Unresolved` node.
	/// # Panics
	/// - In debug builds if a node with `name` already exists.
	pub fn add_package_node(&mut self, name: &str) -> NodeIndex {
		debug_assert!(!self.index.contains_key(name), "duplicate node {}", name);
		let i = self.graph.add_node(NodeData::Package(PackageNode {
			name: name.to_string(),
			status: NodeStatus::Unresolved,
			record: None,
			installed: None,
			install: false,
			discovered: self.next_discovery,
		}));
		self.next_discovery += 1;
		self.index.insert(name.to_string(), i);
		i
	}

	pub fn add_alias(&mut self, alias: &str, target: &str) {
		if alias != target {
			self.aliases.insert(alias.to_string(), target.to_string());
		}
	}

	pub fn add_requirement(&mut self, source: NodeIndex, target: NodeIndex, edge: EdgeData) {
		self.graph.add_edge(source, target, edge);
	}

	pub fn package(&self, i: NodeIndex) -> Option<&PackageNode> {
		match self.graph.node_weight(i)? {
			NodeData::Package(p) => Some(p),
			NodeData::Meta => None,
		}
	}

	pub fn package_mut(&mut self, i: NodeIndex) -> Option<&mut PackageNode> {
		match self.graph.node_weight_mut(i)? {
			NodeData::Package(p) => Some(p),
			NodeData::Meta => None,
		}
	}

	pub fn name(&self, i: NodeIndex) -> Option<&str> {
		self.package(i).map(|p| p.name.as_str())
	}

	/// Moves the node to `status`, refusing transitions that would regress it.
	pub fn advance(&mut self, i: NodeIndex, status: NodeStatus) -> bool {
		let Some(node) = self.package_mut(i) else { return false };
		if !node.status.can_advance_to(status) {
			log::error!("Refusing to move {} from {:?} to {:?}", node.name, node.status, status);
			return false
		}
		log::trace!("{}: {:?} -> {:?}", node.name, node.status, status);
		node.status = status;
		true
	}

	/// Package nodes in discovery order.
	pub fn packages(&self) -> Vec<(NodeIndex, &PackageNode)> {
		let mut v = self.graph.node_indices()
			.filter_map(|i| self.package(i).map(|p| (i, p)))
			.collect::<Vec<_>>();
		v.sort_by_key(|(_, p)| p.discovered);
		v
	}

	/// Distinct nodes `i` depends on, in discovery order. Self references are left out.
	pub fn dependencies(&self, i: NodeIndex) -> Vec<NodeIndex> {
		let mut deps = self.graph.neighbors_directed(i, Outgoing)
			.filter(|d| *d != i)
			.collect::<HashSet<_>>()
			.into_iter()
			.collect::<Vec<_>>();
		deps.sort_by_key(|d| self.package(*d).map(|p| p.discovered));
		deps
	}

	/// Requirements placed on `i` with the name of the node placing them, `None` for the meta node.
	pub fn requirements_on(&self, i: NodeIndex) -> Vec<(Option<&str>, &EdgeData)> {
		let mut v = self.graph.edges_directed(i, Incoming)
			.map(|e| (e.source(), e.weight()))
			.collect::<Vec<_>>();
		/* Keep edges in insertion order */
		v.reverse();
		v.into_iter().map(|(s, e)| (self.name(s), e)).collect()
	}

	pub fn is_requested(&self, i: NodeIndex) -> bool {
		self.graph.edges_directed(i, Incoming).any(|e| e.source() == self.meta_node)
	}

	/// Finds every cycle through strongly connected components.
	///
	/// Each chain starts and ends at the component's first discovered node and follows the shortest path back to it.
	pub fn find_cycles(&self) -> Vec<Vec<NodeIndex>> {
		let mut cycles = Vec::new();
		for component in petgraph::algo::tarjan_scc(&self.graph) {
			let is_cycle = component.len() > 1
				|| component.first().map_or(false, |n| self.graph.contains_edge(*n, *n));
			if !is_cycle {
				continue;
			}
			let members = component.iter().copied().collect::<HashSet<_>>();
			let Some(start) = component.iter().copied().min_by_key(|i| self.package(*i).map(|p| p.discovered)) else { continue };
			if let Some(chain) = self.shortest_cycle(start, &members) {
				cycles.push(chain);
			}
		}
		cycles.sort_by_key(|c| c.first().and_then(|i| self.package(*i)).map(|p| p.discovered));
		cycles
	}

	fn shortest_cycle(&self, start: NodeIndex, members: &HashSet<NodeIndex>) -> Option<Vec<NodeIndex>> {
		let mut parent = HashMap::<NodeIndex, NodeIndex>::new();
		let mut queue = VecDeque::from([start]);

		while let Some(u) = queue.pop_front() {
			let mut successors = self.graph.neighbors_directed(u, Outgoing)
				.filter(|v| members.contains(v))
				.collect::<Vec<_>>();
			successors.sort_by_key(|v| self.package(*v).map(|p| p.discovered));
			successors.dedup();

			for v in successors {
				if v == start {
					let mut chain = vec![u];
					let mut cur = u;
					while cur != start {
						cur = *parent.get(&cur)?;
						chain.push(cur);
					}
					chain.reverse();
					chain.push(start);
					return Some(chain);
				}
				if v != start && !parent.contains_key(&v) {
					parent.insert(v, u);
					queue.push_back(v);
				}
			}
		}
		None
	}

	/// Marks every node on a cycle as `Cyclic` and returns the chains by name.
	pub fn mark_cycles(&mut self) -> Vec<Vec<String>> {
		let cycles = self.find_cycles();
		let mut chains = Vec::with_capacity(cycles.len());
		for cycle in cycles {
			for i in cycle.iter().copied().collect::<HashSet<_>>() {
				self.advance(i, NodeStatus::Cyclic);
			}
			chains.push(cycle.iter().filter_map(|i| self.name(*i).map(str::to_string)).collect());
		}
		chains
	}
}
