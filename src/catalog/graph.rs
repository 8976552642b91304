//! Dependency graph over the installed package versions.

use std::collections::HashMap;

use super::Catalog;
use crate::package::{DependencyRange, PackageVersionId};

/// Position of a node inside an [`InstallGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum GraphNode {
    /// Synthetic node for "selected by the user"; points at every
    /// installed version.
    Root,
    Installed(PackageVersionId),
    /// A declared dependency that no installed version satisfies.
    Missing(DependencyRange),
}

/// Arena of nodes with adjacency lists. Edge `u -> v` means `u` depends on
/// `v`, resolved to the highest installed version matching the range.
#[derive(Debug)]
pub struct InstallGraph {
    generation: u64,
    nodes: Vec<GraphNode>,
    edges: Vec<Vec<NodeIndex>>,
    by_version: HashMap<PackageVersionId, NodeIndex>,
}

impl InstallGraph {
    pub(crate) fn build(catalog: &Catalog) -> Self {
        let mut graph = Self {
            generation: catalog.generation(),
            nodes: vec![GraphNode::Root],
            edges: vec![Vec::new()],
            by_version: HashMap::new(),
        };

        let installed = catalog.installed();
        for id in &installed {
            let node = graph.push(GraphNode::Installed(*id));
            graph.by_version.insert(*id, node);
            graph.edges[0].push(node);
        }

        for id in installed {
            let from = graph.by_version[&id];
            for dep in &catalog[id].dependencies {
                let target = catalog
                    .versions_of(dep.package())
                    .iter()
                    .copied()
                    .filter(|c| catalog[*c].installed() && dep.matches(&catalog[*c].version))
                    .max_by(|a, b| catalog[*a].version.cmp(&catalog[*b].version));

                let to = match target {
                    Some(target) => graph.by_version[&target],
                    None => graph.push(GraphNode::Missing(dep.clone())),
                };
                graph.edges[from.0].push(to);
            }
        }

        graph
    }

    fn push(&mut self, node: GraphNode) -> NodeIndex {
        self.nodes.push(node);
        self.edges.push(Vec::new());
        NodeIndex(self.nodes.len() - 1)
    }

    /// Catalog generation this graph was built from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> NodeIndex {
        NodeIndex(0)
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.nodes[index.0]
    }

    pub fn node_of(&self, id: PackageVersionId) -> Option<NodeIndex> {
        self.by_version.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct successors of `index`.
    pub fn edges(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.edges[index.0]
    }

    /// Installed versions that resolve one of their dependencies to `id`.
    pub fn dependents_of(&self, id: PackageVersionId) -> Vec<PackageVersionId> {
        let Some(target) = self.node_of(id) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| self.edges[*i].contains(&target))
            .filter_map(|(_, node)| match node {
                GraphNode::Installed(dependent) => Some(*dependent),
                _ => None,
            })
            .collect()
    }

    /// Declared dependencies of `id` that nothing installed satisfies.
    pub fn missing_dependencies(&self, id: PackageVersionId) -> Vec<&DependencyRange> {
        let Some(node) = self.node_of(id) else {
            return Vec::new();
        };
        self.edges[node.0]
            .iter()
            .filter_map(|to| match &self.nodes[to.0] {
                GraphNode::Missing(range) => Some(range),
                _ => None,
            })
            .collect()
    }
}
