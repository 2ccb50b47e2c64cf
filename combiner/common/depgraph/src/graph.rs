// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    path::Path,
    sync::Arc,
};

use repomd::Package;
use tracing::debug;

/// A directed dependency graph over the packages of one repository.
///
/// Vertices are package records unique by name; edges point from a package
/// to the chosen provider of one of its required symbols. The backward
/// graph is a sibling instance with the identical vertex set and every edge
/// reversed. The two sibling graphs refer to each other's vertices only by
/// index, never by pointer.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    vertices: Vec<Arc<Package>>,
    name_index: HashMap<String, usize>,
    edges: Vec<BTreeSet<usize>>,
    /// Chosen provider name per symbol, including every file path a package
    /// installs (files act as implicit provides).
    pub symbol_providers: HashMap<String, String>,
    /// Symbols that found a provider during edge construction.
    pub provided: BTreeSet<String>,
    /// Required symbols with no provider in this repository.
    pub unprovided: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex. The name must not be present yet.
    pub fn add_vertex(&mut self, package: Arc<Package>) -> usize {
        debug_assert!(!self.name_index.contains_key(&package.name));
        let id = self.vertices.len();
        self.name_index.insert(package.name.clone(), id);
        self.vertices.push(package);
        self.edges.push(BTreeSet::new());
        id
    }

    /// Replaces the record stored at `id`, keeping the vertex identity. Used
    /// when the preferring strategy picks a different record for a name.
    pub fn replace_vertex(&mut self, id: usize, package: Arc<Package>) {
        debug_assert_eq!(self.vertices[id].name, package.name);
        self.vertices[id] = package;
    }

    pub fn vertex_id(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    pub fn package(&self, name: &str) -> Option<&Arc<Package>> {
        self.vertex_id(name).map(|id| &self.vertices[id])
    }

    pub fn package_by_id(&self, id: usize) -> &Arc<Package> {
        &self.vertices[id]
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Arc<Package>> {
        self.vertices.iter()
    }

    /// All vertex names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vertices.iter().map(|package| package.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_index.contains_key(name)
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.edges[from].insert(to);
    }

    pub fn edges_from(&self, id: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges[id].iter().copied()
    }

    /// The full edge list, sorted. Self-edges are included.
    pub fn edge_list(&self) -> Vec<(usize, usize)> {
        let mut list: Vec<(usize, usize)> = self
            .edges
            .iter()
            .enumerate()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from, *to)))
            .collect();
        list.sort();
        list
    }

    /// Breadth-first set of names reachable from `name`, including `name`
    /// itself. A name absent from the graph contributes the empty set.
    pub fn reachable_from(&self, name: &str) -> BTreeSet<String> {
        let mut reached = BTreeSet::new();
        let Some(start) = self.vertex_id(name) else {
            debug!("Failed to find package {name} in dependency tree");
            return reached;
        };
        let mut visited = vec![false; self.vertices.len()];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;
        while let Some(id) = queue.pop_front() {
            reached.insert(self.vertices[id].name.clone());
            for next in self.edges_from(id) {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        reached
    }

    /// Renders the graph in DOT format, one node per package full name.
    /// Written out in debug runs for inspection with graphviz.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph dependencies {\n");
        for package in &self.vertices {
            dot.push_str(&format!("  \"{}\";\n", package.full_name()));
        }
        for (from, to) in self.edge_list() {
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                self.vertices[from].full_name(),
                self.vertices[to].full_name()
            ));
        }
        dot.push_str("}\n");
        dot
    }

    /// Names of packages providing the given symbol.
    ///
    /// An exact match in the provider index wins. Otherwise providers are
    /// matched by file base name, so that a tool can be looked up without
    /// knowing its directory: `gzip` matches `/bin/gzip` as well as
    /// versioned provides like `gzip(x86-64)`.
    pub fn provider_names(&self, symbol: &str) -> Vec<String> {
        if let Some(name) = self.symbol_providers.get(symbol) {
            return vec![name.clone()];
        }
        let symbol_base = base_name(symbol);
        let mut names = BTreeSet::new();
        for (key, provider) in &self.symbol_providers {
            let key_base = base_name(key);
            if key_base == symbol_base
                || (key_base.starts_with(symbol_base)
                    && key_base.as_bytes().get(symbol_base.len()) == Some(&b'('))
            {
                names.insert(provider.clone());
            }
        }
        names.into_iter().collect()
    }
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn record(name: &str) -> Arc<Package> {
        Arc::new(Package {
            name: name.to_string(),
            epoch: "0".to_string(),
            version: "1.0".to_string(),
            release: "1".to_string(),
            arch: "armv7l".to_string(),
            location: format!("/repo/{name}-1.0-1.armv7l.rpm").into(),
            provides: BTreeSet::from([name.to_string()]),
            requires: Vec::new(),
            files: BTreeSet::new(),
        })
    }

    fn chain_graph() -> DependencyGraph {
        // a -> b -> c, plus a self-edge on c.
        let mut graph = DependencyGraph::new();
        let a = graph.add_vertex(record("a"));
        let b = graph.add_vertex(record("b"));
        let c = graph.add_vertex(record("c"));
        graph.add_edge(a, b);
        graph.add_edge(b, c);
        graph.add_edge(c, c);
        graph
    }

    #[test]
    fn reachability_includes_start() {
        let graph = chain_graph();
        assert_eq!(
            graph.reachable_from("b"),
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
        assert_eq!(graph.reachable_from("c"), BTreeSet::from(["c".to_string()]));
    }

    #[test]
    fn missing_start_yields_empty_set() {
        let graph = chain_graph();
        assert!(graph.reachable_from("zzz").is_empty());
    }

    #[test]
    fn provider_lookup_matches_base_names() {
        let mut graph = DependencyGraph::new();
        graph.add_vertex(record("make"));
        graph
            .symbol_providers
            .insert("/usr/bin/make".to_string(), "make".to_string());
        graph
            .symbol_providers
            .insert("make(x86-64)".to_string(), "make".to_string());

        assert_eq!(graph.provider_names("/usr/bin/make"), vec!["make"]);
        assert_eq!(graph.provider_names("make"), vec!["make"]);
        assert!(graph.provider_names("cmake").is_empty());
    }

    #[test]
    fn edge_list_is_sorted_and_keeps_self_edges() {
        let graph = chain_graph();
        assert_eq!(graph.edge_list(), vec![(0, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn dot_rendering_lists_nodes_and_edges() {
        let dot = chain_graph().to_dot();
        assert!(dot.starts_with("digraph dependencies {"));
        assert!(dot.contains("\"a-1.0-1.armv7l\";"));
        assert!(dot.contains("\"a-1.0-1.armv7l\" -> \"b-1.0-1.armv7l\";"));
        assert!(dot.contains("\"c-1.0-1.armv7l\" -> \"c-1.0-1.armv7l\";"));
    }
}
