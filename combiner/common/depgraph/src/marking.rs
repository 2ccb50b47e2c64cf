// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::{similarity::is_close_match, DependencyGraph, Error};

/// The user's package selection directives.
#[derive(Clone, Debug, Default)]
pub struct Directives {
    /// Marked together with all their forward dependencies.
    pub forward: Vec<String>,
    /// Marked together with all their dependees.
    pub backward: Vec<String>,
    /// Marked exactly.
    pub single: Vec<String>,
    /// Removed from the marked set.
    pub excluded: Vec<String>,
    /// Marked exactly, and additionally installed into the image.
    pub service: Vec<String>,
    /// Take everything the marked repository has, ignoring the lists above
    /// (which must then be empty).
    pub greedy: bool,
}

impl Directives {
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
            && self.backward.is_empty()
            && self.single.is_empty()
            && self.excluded.is_empty()
            && self.service.is_empty()
    }

    /// The names that must exist in at least one repository graph.
    /// Service packages are exempt: they may come from supplementary repos.
    fn checked_names(&self) -> impl Iterator<Item = &String> {
        self.forward
            .iter()
            .chain(&self.backward)
            .chain(&self.single)
            .chain(&self.excluded)
    }
}

/// Computes the marked-package set for one repository pair.
///
/// Closures are taken in the original repository's graphs; greedy mode
/// instead takes every name of the marked repository.
pub fn mark(
    graph: &DependencyGraph,
    backward_graph: &DependencyGraph,
    marked_graph: &DependencyGraph,
    directives: &Directives,
) -> Result<BTreeSet<String>, Error> {
    if directives.greedy {
        if !directives.is_empty() {
            return Err(Error::GreedyModeConflict);
        }
        let marked: BTreeSet<String> = marked_graph.names().map(|n| n.to_string()).collect();
        for name in graph.names() {
            if !marked.contains(name) {
                debug!("Package {name} is NOT marked");
            }
        }
        return Ok(marked);
    }

    let mut marked = BTreeSet::new();
    for name in &directives.forward {
        marked.extend(graph.reachable_from(name));
    }
    for name in &directives.backward {
        marked.extend(backward_graph.reachable_from(name));
    }
    for name in directives.single.iter().chain(&directives.service) {
        if graph.contains(name) {
            marked.insert(name.clone());
        }
    }
    for name in &directives.excluded {
        if graph.contains(name) {
            marked.remove(name);
        }
    }

    for name in &marked {
        info!("Package {name} is marked");
    }
    Ok(marked)
}

/// Verifies that every directive name exists in at least one of the given
/// graphs, with fuzzy hints for names that do not.
pub fn check_known_names(
    directives: &Directives,
    graphs: &[&DependencyGraph],
) -> Result<(), Error> {
    for name in directives.checked_names() {
        if graphs.iter().any(|graph| graph.contains(name)) {
            continue;
        }
        let mut hints: BTreeSet<String> = BTreeSet::new();
        for graph in graphs {
            for candidate in graph.names() {
                if is_close_match(name, candidate) {
                    hints.insert(candidate.to_string());
                }
            }
        }
        return Err(Error::UnknownPackage {
            name: name.clone(),
            hints: hints.into_iter().collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use repomd::{Package, Requirement};

    use crate::GraphBuilder;

    use super::*;

    fn record(name: &str, requires: &[&str]) -> Arc<Package> {
        Arc::new(Package {
            name: name.to_string(),
            epoch: "0".to_string(),
            version: "1.0".to_string(),
            release: "1".to_string(),
            arch: "armv7l".to_string(),
            location: format!("/repo/{name}-1.0-1.armv7l.rpm").into(),
            provides: BTreeSet::from([name.to_string()]),
            requires: requires.iter().map(|s| Requirement::unversioned(s)).collect(),
            files: BTreeSet::new(),
        })
    }

    /// app -> lib -> base, tool -> lib
    fn graphs() -> (DependencyGraph, DependencyGraph) {
        GraphBuilder::new(Vec::new(), None, Vec::new())
            .build(vec![
                record("app", &["lib"]),
                record("lib", &["base"]),
                record("base", &[]),
                record("tool", &["lib"]),
            ])
            .unwrap()
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn forward_closure() {
        let (forward, backward) = graphs();
        let directives = Directives {
            forward: vec!["app".to_string()],
            ..Default::default()
        };
        let marked = mark(&forward, &backward, &forward, &directives).unwrap();
        assert_eq!(names(&marked), vec!["app", "base", "lib"]);
    }

    #[test]
    fn backward_closure() {
        let (forward, backward) = graphs();
        let directives = Directives {
            backward: vec!["lib".to_string()],
            ..Default::default()
        };
        let marked = mark(&forward, &backward, &forward, &directives).unwrap();
        assert_eq!(names(&marked), vec!["app", "lib", "tool"]);
    }

    #[test]
    fn single_and_exclusion() {
        let (forward, backward) = graphs();
        let directives = Directives {
            forward: vec!["app".to_string()],
            excluded: vec!["lib".to_string()],
            ..Default::default()
        };
        let marked = mark(&forward, &backward, &forward, &directives).unwrap();
        assert_eq!(names(&marked), vec!["app", "base"]);
    }

    #[test]
    fn marking_is_monotonic() {
        let (forward, backward) = graphs();
        let base_directives = Directives {
            forward: vec!["app".to_string()],
            ..Default::default()
        };
        let base = mark(&forward, &backward, &forward, &base_directives).unwrap();

        let more = Directives {
            single: vec!["tool".to_string()],
            ..base_directives.clone()
        };
        let with_single = mark(&forward, &backward, &forward, &more).unwrap();
        assert!(with_single.is_superset(&base));

        let less = Directives {
            excluded: vec!["base".to_string()],
            ..base_directives
        };
        let with_exclusion = mark(&forward, &backward, &forward, &less).unwrap();
        assert!(with_exclusion.is_subset(&base));
    }

    #[test]
    fn unknown_directive_names_yield_empty_closures() {
        let (forward, backward) = graphs();
        let directives = Directives {
            forward: vec!["no-such-package".to_string()],
            single: vec!["also-missing".to_string()],
            ..Default::default()
        };
        let marked = mark(&forward, &backward, &forward, &directives).unwrap();
        assert!(marked.is_empty());
    }

    #[test]
    fn greedy_takes_marked_repository_names() {
        let (forward, backward) = graphs();
        let (marked_graph, _) = GraphBuilder::new(Vec::new(), None, Vec::new())
            .build(vec![record("app", &[]), record("lib", &[])])
            .unwrap();
        let directives = Directives {
            greedy: true,
            ..Default::default()
        };
        let marked = mark(&forward, &backward, &marked_graph, &directives).unwrap();
        assert_eq!(names(&marked), vec!["app", "lib"]);
    }

    #[test]
    fn greedy_conflicts_with_directives() {
        let (forward, backward) = graphs();
        let directives = Directives {
            greedy: true,
            single: vec!["app".to_string()],
            ..Default::default()
        };
        let error = mark(&forward, &backward, &forward, &directives).unwrap_err();
        assert!(matches!(error, Error::GreedyModeConflict));
    }

    #[test]
    fn post_check_reports_unknown_names_with_hints() {
        let (forward, _) = graphs();
        let directives = Directives {
            single: vec!["ap".to_string()],
            ..Default::default()
        };
        // "ap" is unknown but close to "app".
        let error = check_known_names(&directives, &[&forward]).unwrap_err();
        match error {
            Error::UnknownPackage { name, hints } => {
                assert_eq!(name, "ap");
                assert!(hints.contains(&"app".to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let known = Directives {
            single: vec!["app".to_string()],
            ..Default::default()
        };
        assert!(check_known_names(&known, &[&forward]).is_ok());
    }
}
