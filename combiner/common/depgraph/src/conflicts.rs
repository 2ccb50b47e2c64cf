// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, warn};

use crate::DependencyGraph;

/// A set of packages whose file lists overlap.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileConflict {
    /// The conflicting package names, sorted.
    pub packages: Vec<String>,
    /// The overlapping file paths.
    pub files: Vec<String>,
    /// Whether two or more of the packages are inside the installation
    /// scope. Critical conflicts would break the final image.
    pub critical: bool,
}

/// Audits the file lists of all graph vertices for overlaps.
///
/// Every file provided by more than one package is a conflict; conflicts are
/// grouped by the set of involved packages. The audit only reports; whether
/// critical conflicts abort the run is the orchestrator's decision.
pub fn audit_file_conflicts(
    graph: &DependencyGraph,
    scope: &BTreeSet<String>,
) -> Vec<FileConflict> {
    let mut providers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for package in graph.vertices() {
        for file in &package.files {
            providers
                .entry(file.as_str())
                .or_default()
                .insert(package.name.as_str());
        }
    }

    let mut grouped: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();
    for (file, names) in providers {
        if names.len() < 2 {
            continue;
        }
        let key: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        grouped.entry(key).or_default().push(file.to_string());
    }

    let mut conflicts = Vec::new();
    for (packages, files) in grouped {
        warn!(
            "Packages {} have {} conflicts:",
            packages.join(", "),
            files.len()
        );
        for file in &files {
            warn!(" * {}", file);
        }
        let degree = packages.iter().filter(|name| scope.contains(*name)).count();
        let critical = degree > 1;
        if critical {
            error!("Conflict between {} is critical.", packages.join(", "));
        }
        conflicts.push(FileConflict {
            packages,
            files,
            critical,
        });
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use repomd::Package;

    use super::*;

    fn record_with_files(name: &str, files: &[&str]) -> Arc<Package> {
        Arc::new(Package {
            name: name.to_string(),
            epoch: "0".to_string(),
            version: "1.0".to_string(),
            release: "1".to_string(),
            arch: "armv7l".to_string(),
            location: format!("/repo/{name}-1.0-1.armv7l.rpm").into(),
            provides: BTreeSet::from([name.to_string()]),
            requires: Vec::new(),
            files: files.iter().map(|f| f.to_string()).collect(),
        })
    }

    fn graph_of(packages: Vec<Arc<Package>>) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for package in packages {
            graph.add_vertex(package);
        }
        graph
    }

    #[test]
    fn overlapping_files_are_grouped() {
        let graph = graph_of(vec![
            record_with_files("a", &["/usr/bin/tool", "/etc/tool.conf"]),
            record_with_files("b", &["/usr/bin/tool", "/etc/tool.conf"]),
            record_with_files("c", &["/usr/bin/other"]),
        ]);

        let conflicts = audit_file_conflicts(&graph, &BTreeSet::new());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].packages, vec!["a", "b"]);
        assert_eq!(
            conflicts[0].files,
            vec!["/etc/tool.conf".to_string(), "/usr/bin/tool".to_string()]
        );
        assert!(!conflicts[0].critical);
    }

    #[test]
    fn conflicts_inside_scope_are_critical() {
        let graph = graph_of(vec![
            record_with_files("a", &["/usr/bin/tool"]),
            record_with_files("b", &["/usr/bin/tool"]),
        ]);

        let scope = BTreeSet::from(["a".to_string(), "b".to_string()]);
        let conflicts = audit_file_conflicts(&graph, &scope);
        assert!(conflicts[0].critical);

        // One of the two inside the scope is not critical.
        let scope = BTreeSet::from(["a".to_string()]);
        let conflicts = audit_file_conflicts(&graph, &scope);
        assert!(!conflicts[0].critical);
    }

    #[test]
    fn disjoint_file_lists_produce_nothing() {
        let graph = graph_of(vec![
            record_with_files("a", &["/usr/bin/a"]),
            record_with_files("b", &["/usr/bin/b"]),
        ]);
        assert!(audit_file_conflicts(&graph, &BTreeSet::new()).is_empty());
    }
}
