// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use repomd::Package;
use strum_macros::{Display, EnumString};
use tracing::{debug, error};
use version::{TokenComparator, VersionComparator};

use crate::{
    choice::{extreme_package, resolve_have_choice},
    DependencyGraph, Error,
};

/// How to pick one of several same-named records or equal-named providers.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Strategy {
    /// Prefer the record whose version/release numbers are smallest.
    Small,
    /// Prefer the record whose version/release numbers are biggest.
    Big,
}

/// Builds the forward and backward dependency graphs of one repository.
pub struct GraphBuilder<'a> {
    preferables: Vec<String>,
    strategy: Option<Strategy>,
    /// Names whose dependencies must be resolved. Grows transitively during
    /// edge construction. An empty scope means the whole repository.
    scope: Vec<String>,
    comparator: &'a dyn VersionComparator,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        preferables: Vec<String>,
        strategy: Option<Strategy>,
        scope: Vec<String>,
    ) -> GraphBuilder<'static> {
        GraphBuilder {
            preferables,
            strategy,
            scope,
            comparator: &TokenComparator,
        }
    }

    /// Substitutes the version ordering used for duplicate records and
    /// strategy-resolved choices.
    pub fn with_comparator(self, comparator: &dyn VersionComparator) -> GraphBuilder<'_> {
        GraphBuilder {
            preferables: self.preferables,
            strategy: self.strategy,
            scope: self.scope,
            comparator,
        }
    }

    /// Builds both graphs. The returned graphs share vertex records and
    /// vertex ids; the backward graph's edge set is the exact reverse of the
    /// forward one's.
    pub fn build(
        &self,
        packages: Vec<Arc<Package>>,
    ) -> Result<(DependencyGraph, DependencyGraph), Error> {
        let mut forward = DependencyGraph::new();
        let mut backward = DependencyGraph::new();

        self.build_vertices(packages, &mut forward, &mut backward)?;
        self.build_edges(&mut forward, &mut backward)?;

        Ok((forward, backward))
    }

    fn build_vertices(
        &self,
        packages: Vec<Arc<Package>>,
        forward: &mut DependencyGraph,
        backward: &mut DependencyGraph,
    ) -> Result<(), Error> {
        for package in packages {
            match forward.vertex_id(&package.name) {
                None => {
                    let id = forward.add_vertex(Arc::clone(&package));
                    let back_id = backward.add_vertex(package);
                    debug_assert_eq!(id, back_id);
                }
                Some(id) => {
                    let existing = Arc::clone(forward.package_by_id(id));
                    let Some(strategy) = self.strategy else {
                        return Err(Error::DuplicatePackage {
                            names: vec![existing.full_name(), package.full_name()],
                        });
                    };
                    let chosen = extreme_package(&[&existing, &package], strategy, self.comparator)?;
                    if Arc::ptr_eq(chosen, &package) {
                        debug!("Replacing {} with {}", existing.full_name(), package.full_name());
                        forward.replace_vertex(id, Arc::clone(&package));
                        backward.replace_vertex(id, package);
                    } else {
                        debug!("Already in lists: {}", package.full_name());
                    }
                }
            }
        }
        Ok(())
    }

    fn build_edges(
        &self,
        forward: &mut DependencyGraph,
        backward: &mut DependencyGraph,
    ) -> Result<(), Error> {
        // Index every declared provide and every installed file to its
        // providing vertices.
        let mut provides_index: HashMap<String, Vec<usize>> = HashMap::new();
        for id in 0..forward.vertex_count() {
            let package = forward.package_by_id(id);
            for symbol in package.provides.iter().chain(package.files.iter()) {
                let providers = provides_index.entry(symbol.clone()).or_default();
                if !providers.contains(&id) {
                    providers.push(id);
                }
            }
        }

        let mut scope: BTreeSet<String> = self
            .scope
            .iter()
            .filter(|name| forward.contains(name))
            .cloned()
            .collect();
        if self.scope.is_empty() {
            error!("No package scope for the given repository has been specified!");
            scope = forward.names().map(|name| name.to_string()).collect();
        }

        let mut provider_cache: HashMap<String, String> = HashMap::new();
        let mut processed: BTreeSet<String> = BTreeSet::new();
        let mut provided: BTreeSet<String> = BTreeSet::new();
        let mut unprovided: BTreeSet<String> = BTreeSet::new();

        while processed.len() < scope.len() {
            debug!("Processed {} packages from {}", processed.len(), scope.len());
            for id in 0..forward.vertex_count() {
                let package = Arc::clone(forward.package_by_id(id));
                if processed.contains(&package.name) || !scope.contains(&package.name) {
                    continue;
                }

                let mut dependencies: BTreeSet<String> = BTreeSet::new();
                for requirement in &package.requires {
                    let symbol = &requirement.symbol;
                    if symbol.starts_with("rpmlib") {
                        continue;
                    }
                    let provider = match provider_cache.get(symbol) {
                        Some(provider) => provider.clone(),
                        None => {
                            let candidate_ids = provides_index
                                .get(symbol)
                                .map(|ids| ids.as_slice())
                                .unwrap_or(&[]);
                            if candidate_ids.is_empty() {
                                unprovided.insert(symbol.clone());
                                continue;
                            }
                            provided.insert(symbol.clone());
                            let provider = if candidate_ids.len() == 1 {
                                forward.package_by_id(candidate_ids[0]).name.clone()
                            } else {
                                let candidates: Vec<&Arc<Package>> = candidate_ids
                                    .iter()
                                    .map(|id| forward.package_by_id(*id))
                                    .collect();
                                resolve_have_choice(
                                    symbol,
                                    &candidates,
                                    &self.preferables,
                                    self.strategy,
                                    self.comparator,
                                )?
                            };
                            provider_cache.insert(symbol.clone(), provider.clone());
                            provider
                        }
                    };
                    dependencies.insert(provider);
                }

                for dependency in &dependencies {
                    let dependency_id = forward
                        .vertex_id(dependency)
                        .expect("providers are graph vertices");
                    forward.add_edge(id, dependency_id);
                    backward.add_edge(dependency_id, id);
                    scope.insert(dependency.clone());
                }
                processed.insert(package.name.clone());
            }
        }

        let mut symbol_providers: HashMap<String, String> = HashMap::new();
        for id in 0..forward.vertex_count() {
            let package = forward.package_by_id(id);
            for symbol in package.provides.iter().chain(package.files.iter()) {
                symbol_providers.insert(symbol.clone(), package.name.clone());
            }
        }
        // Symbols that went through resolution map to the chosen provider,
        // not to whichever vertex happened to declare them last.
        symbol_providers.extend(provider_cache);

        forward.symbol_providers = symbol_providers.clone();
        backward.symbol_providers = symbol_providers;
        forward.provided = provided.clone();
        backward.provided = provided;
        forward.unprovided = unprovided.clone();
        backward.unprovided = unprovided;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;
    use repomd::Requirement;

    use super::*;

    fn record(name: &str, version: &str, release: &str, requires: &[&str]) -> Arc<Package> {
        record_providing(name, version, release, requires, &[])
    }

    fn record_providing(
        name: &str,
        version: &str,
        release: &str,
        requires: &[&str],
        provides: &[&str],
    ) -> Arc<Package> {
        let mut all_provides: BTreeSet<String> = BTreeSet::from([name.to_string()]);
        all_provides.extend(provides.iter().map(|s| s.to_string()));
        Arc::new(Package {
            name: name.to_string(),
            epoch: "0".to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: "armv7l".to_string(),
            location: format!("/repo/{name}-{version}-{release}.armv7l.rpm").into(),
            provides: all_provides,
            requires: requires.iter().map(|s| Requirement::unversioned(s)).collect(),
            files: BTreeSet::new(),
        })
    }

    fn builder() -> GraphBuilder<'static> {
        GraphBuilder::new(Vec::new(), None, Vec::new())
    }

    #[test]
    fn chain_produces_mirrored_graphs() -> Result<(), Error> {
        let packages = vec![
            record("app", "1.0", "1", &["lib"]),
            record("lib", "1.0", "1", &["base"]),
            record("base", "1.0", "1", &[]),
        ];
        let (forward, backward) = builder().build(packages)?;

        assert_eq!(forward.edge_list(), vec![(0, 1), (1, 2)]);
        let mut mirrored: Vec<(usize, usize)> = backward
            .edge_list()
            .into_iter()
            .map(|(a, b)| (b, a))
            .collect();
        mirrored.sort();
        assert_eq!(mirrored, forward.edge_list());
        Ok(())
    }

    #[test]
    fn every_requirement_resolves_or_is_unprovided() -> Result<(), Error> {
        let packages = vec![
            record("app", "1.0", "1", &["lib", "nothing-provides-this"]),
            record("lib", "1.0", "1", &[]),
        ];
        let (forward, _) = builder().build(packages)?;

        assert!(forward.provided.contains("lib"));
        assert!(forward.unprovided.contains("nothing-provides-this"));
        assert_eq!(forward.edge_list(), vec![(0, 1)]);
        Ok(())
    }

    #[test]
    fn self_requirements_become_self_edges() -> Result<(), Error> {
        let packages = vec![record_providing("daemon", "1.0", "1", &["daemon-api"], &["daemon-api"])];
        let (forward, backward) = builder().build(packages)?;
        assert_eq!(forward.edge_list(), vec![(0, 0)]);
        assert_eq!(backward.edge_list(), vec![(0, 0)]);
        Ok(())
    }

    #[test]
    fn file_requirements_resolve_through_file_lists() -> Result<(), Error> {
        // Installed files act as implicit provides.
        let mut provider = (*record("bash", "4.3", "1", &[])).clone();
        provider.files = BTreeSet::from(["/bin/sh".to_string()]);
        let packages = vec![
            record("script-runner", "1.0", "1", &["/bin/sh"]),
            Arc::new(provider),
        ];
        let (forward, _) = builder().build(packages)?;

        let runner = forward.vertex_id("script-runner").unwrap();
        let chosen: Vec<usize> = forward.edges_from(runner).collect();
        assert_eq!(chosen, vec![forward.vertex_id("bash").unwrap()]);
        assert_eq!(
            forward.symbol_providers.get("/bin/sh"),
            Some(&"bash".to_string())
        );
        Ok(())
    }

    #[test]
    fn duplicate_names_without_strategy_fail() {
        let packages = vec![record("x", "1.0", "1", &[]), record("x", "2.0", "1", &[])];
        let error = builder().build(packages).unwrap_err();
        assert!(matches!(error, Error::DuplicatePackage { .. }), "{error}");
    }

    #[test]
    fn duplicate_names_resolved_by_strategy() -> Result<(), Error> {
        let packages = vec![record("x", "1.0", "1", &[]), record("x", "2.0", "1", &[])];

        let builder = GraphBuilder::new(Vec::new(), Some(Strategy::Big), Vec::new());
        let (forward, _) = builder.build(packages.clone())?;
        assert_eq!(forward.package("x").unwrap().version, "2.0");

        let builder = GraphBuilder::new(Vec::new(), Some(Strategy::Small), Vec::new());
        let (forward, _) = builder.build(packages)?;
        assert_eq!(forward.package("x").unwrap().version, "1.0");
        Ok(())
    }

    #[test]
    fn incomparable_duplicate_versions_fail() {
        let packages = vec![record("x", "1.0", "1", &[]), record("x", "1.0.1", "1", &[])];
        let builder = GraphBuilder::new(Vec::new(), Some(Strategy::Big), Vec::new());
        let error = builder.build(packages).unwrap_err();
        assert!(matches!(error, Error::IncomparableVersions(_)), "{error}");
    }

    #[test]
    fn scope_closes_transitively() -> Result<(), Error> {
        let packages = vec![
            record("app", "1.0", "1", &["lib"]),
            record("lib", "1.0", "1", &["base"]),
            record("base", "1.0", "1", &[]),
            record("unrelated", "1.0", "1", &["base"]),
        ];
        let builder = GraphBuilder::new(Vec::new(), None, vec!["app".to_string()]);
        let (forward, _) = builder.build(packages)?;

        // unrelated is a vertex but its requirements were never resolved.
        assert_eq!(forward.edge_list(), vec![(0, 1), (1, 2)]);
        assert_eq!(forward.vertex_count(), 4);
        Ok(())
    }

    #[test]
    fn preferred_full_name_resolves_choice() -> Result<(), Error> {
        let packages = vec![
            record("app", "1.0", "1", &["libssl.so.10"]),
            record_providing("openssl", "1.0.0", "1", &[], &["libssl.so.10"]),
            record_providing("openssl-compat", "1.0.2", "3", &[], &["libssl.so.10"]),
        ];
        let builder = GraphBuilder::new(
            vec!["openssl-compat-1.0.2-3.armv7l".to_string()],
            None,
            Vec::new(),
        );
        let (forward, _) = builder.build(packages)?;

        let app = forward.vertex_id("app").unwrap();
        let chosen: Vec<usize> = forward.edges_from(app).collect();
        assert_eq!(chosen, vec![forward.vertex_id("openssl-compat").unwrap()]);
        assert_eq!(
            forward.symbol_providers.get("libssl.so.10"),
            Some(&"openssl-compat".to_string())
        );
        Ok(())
    }

    #[test]
    fn graph_build_is_deterministic() -> Result<(), Error> {
        let packages = || {
            vec![
                record("app", "1.0", "1", &["lib", "tool"]),
                record_providing("lib", "1.0", "1", &[], &["tool"]),
                record_providing("toolbox", "1.0", "1", &[], &["tool"]),
            ]
        };
        let build = || {
            GraphBuilder::new(vec!["toolbox".to_string()], None, Vec::new()).build(packages())
        };
        let (first_forward, first_backward) = build()?;
        let (second_forward, second_backward) = build()?;

        assert_eq!(first_forward.edge_list(), second_forward.edge_list());
        assert_eq!(first_backward.edge_list(), second_backward.edge_list());
        assert_eq!(first_forward.symbol_providers, second_forward.symbol_providers);
        let first_names: Vec<&str> = first_forward.names().collect();
        let second_names: Vec<&str> = second_forward.names().collect();
        assert_eq!(first_names, second_names);
        Ok(())
    }
}
