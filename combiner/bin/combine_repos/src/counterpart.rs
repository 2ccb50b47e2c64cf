// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decides, per marked package, whether the marked file can enter the
//! combined repository as-is or its headers must be rewritten to match the
//! original counterpart.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use depgraph::DependencyGraph;
use repomd::Requirement;
use serde::Serialize;
use tracing::{debug, warn};

use crate::Error;

/// One header edit a patch task applies.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum RequirementUpdate {
    /// The original requires a symbol the marked package does not; insert
    /// the original's requirement.
    Add(Requirement),
    /// Both require the symbol but with different constraints; replace the
    /// marked package's line with the original's.
    Change {
        from: Requirement,
        to: Requirement,
    },
}

impl RequirementUpdate {
    pub fn symbol(&self) -> &str {
        match self {
            RequirementUpdate::Add(requirement) => &requirement.symbol,
            RequirementUpdate::Change { to, .. } => &to.symbol,
        }
    }

    /// Sort key making the update list canonical for fingerprinting.
    fn sort_key(&self) -> (String, u8) {
        match self {
            RequirementUpdate::Add(requirement) => (requirement.symbol.clone(), 0),
            RequirementUpdate::Change { to, .. } => (to.symbol.clone(), 1),
        }
    }
}

/// A header rewrite of one marked package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatchTask {
    pub package_name: String,
    /// The package version, needed to rewrite subpackage relations that
    /// embed `version-release`.
    pub version: String,
    /// The marked `.rpm` file to rewrite.
    pub source_path: PathBuf,
    /// Where the rewritten file must land, named after the original.
    pub destination_path: PathBuf,
    /// The original counterpart's release number.
    pub required_release: String,
    pub updates: Vec<RequirementUpdate>,
}

/// What the assembler does for one package of the combined repository.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AssembleAction {
    /// Symlink the marked file into the combined repository.
    LinkMarked {
        name: String,
        source: PathBuf,
        /// The destination base name; the original's whenever an original
        /// exists.
        file_name: String,
    },
    /// Copy the original file into the combined repository.
    CopyOriginal { name: String, source: PathBuf },
    /// The patcher materialises the destination file itself.
    Patch(PatchTask),
}

/// The counterpart decision for one repository pair.
#[derive(Debug, Default)]
pub struct PairPlan {
    pub actions: Vec<AssembleAction>,
}

impl PairPlan {
    pub fn patch_tasks(&self) -> impl Iterator<Item = &PatchTask> {
        self.actions.iter().filter_map(|action| match action {
            AssembleAction::Patch(task) => Some(task),
            _ => None,
        })
    }
}

/// Computes the per-symbol delta between the original's and the marked
/// package's requirement lists.
///
/// Requirements only the marked package carries survive unchanged; they are
/// logged and not propagated.
pub fn requirements_delta(
    original: &[Requirement],
    marked: &[Requirement],
) -> Vec<RequirementUpdate> {
    let original_by_symbol: BTreeMap<&str, &Requirement> = original
        .iter()
        .map(|requirement| (requirement.symbol.as_str(), requirement))
        .collect();
    let marked_by_symbol: BTreeMap<&str, &Requirement> = marked
        .iter()
        .map(|requirement| (requirement.symbol.as_str(), requirement))
        .collect();

    let mut updates = Vec::new();
    for (symbol, original_requirement) in &original_by_symbol {
        match marked_by_symbol.get(symbol) {
            None => updates.push(RequirementUpdate::Add((*original_requirement).clone())),
            Some(marked_requirement) => {
                if marked_requirement.constraint() != original_requirement.constraint() {
                    updates.push(RequirementUpdate::Change {
                        from: (*marked_requirement).clone(),
                        to: (*original_requirement).clone(),
                    });
                }
            }
        }
    }
    for symbol in marked_by_symbol.keys() {
        if !original_by_symbol.contains_key(symbol) {
            debug!("Requirement {symbol} exists only in the marked package; keeping it");
        }
    }
    updates.sort_by_key(|update| update.sort_key());
    updates
}

/// Options of the counterpart analysis.
#[derive(Clone, Copy, Debug)]
pub struct AnalyzeOptions {
    pub mirror_mode: bool,
    pub skip_version_mismatch: bool,
    /// When off, would-be patch tasks degrade to plain links of the marked
    /// file under the original's name.
    pub patching_enabled: bool,
}

/// Plans the combined repository of one pair.
///
/// `combined_dir` is where the assembler will materialise the repository;
/// patch task destinations point into it.
pub fn analyze_pair(
    graph: &DependencyGraph,
    marked_graph: &DependencyGraph,
    marked_packages: &BTreeSet<String>,
    combined_dir: &Path,
    options: AnalyzeOptions,
) -> Result<PairPlan, Error> {
    let mut plan = PairPlan::default();
    let mut not_found: Vec<String> = Vec::new();
    let mut dropped: BTreeSet<String> = BTreeSet::new();

    for name in marked_packages {
        let Some(marked) = marked_graph.package(name) else {
            not_found.push(name.clone());
            continue;
        };

        let Some(original) = graph.package(name) else {
            // No original counterpart: the marked file enters under its own
            // name.
            plan.actions.push(AssembleAction::LinkMarked {
                name: name.clone(),
                source: marked.location.clone(),
                file_name: marked.file_name(),
            });
            continue;
        };

        if original.version != marked.version {
            if options.skip_version_mismatch {
                warn!(
                    "Dropping {name} from the marked set: versions {} and {} differ",
                    original.version, marked.version
                );
                dropped.insert(name.clone());
                continue;
            }
            return Err(Error::VersionMismatch {
                name: name.clone(),
                original: original.version.clone(),
                marked: marked.version.clone(),
            });
        }

        let updates = requirements_delta(&original.requires, &marked.requires);
        let needs_patch = original.release != marked.release || !updates.is_empty();
        if needs_patch && options.patching_enabled {
            if original.release != marked.release {
                warn!(
                    "Release numbers of package {name} differ: {} and {}, so the marked \
                     package will be patched so that to match to original release number.",
                    original.release, marked.release
                );
            }
            plan.actions.push(AssembleAction::Patch(PatchTask {
                package_name: name.clone(),
                version: marked.version.clone(),
                source_path: marked.location.clone(),
                destination_path: combined_dir.join(original.file_name()),
                required_release: original.release.clone(),
                updates,
            }));
        } else {
            plan.actions.push(AssembleAction::LinkMarked {
                name: name.clone(),
                source: marked.location.clone(),
                file_name: original.file_name(),
            });
        }
    }

    if !not_found.is_empty() {
        for name in &not_found {
            warn!("Marked package {name} not found in marked repository");
        }
        if !options.mirror_mode {
            return Err(Error::MirrorRequired {
                names: not_found,
            });
        }
    }

    // Everything else comes from the original side: packages never marked,
    // marked packages missing on the marked side (mirror fallback), and
    // version-mismatched names dropped above.
    let missing: BTreeSet<&str> = not_found.iter().map(|name| name.as_str()).collect();
    for name in graph.names() {
        let take_original = !marked_packages.contains(name)
            || missing.contains(name)
            || dropped.contains(name);
        if take_original {
            let original = graph.package(name).expect("iterating graph names");
            plan.actions.push(AssembleAction::CopyOriginal {
                name: name.to_string(),
                source: original.location.clone(),
            });
        }
    }

    Ok(plan)
}
