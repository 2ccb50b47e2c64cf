// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The batch pipeline: load repositories, build graphs, mark packages,
//! analyze counterparts, patch headers once across all pairs, assemble the
//! combined repositories, and hand off to the image builder.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Result};
use depgraph::{audit_file_conflicts, check_known_names, mark, DependencyGraph, GraphBuilder};
use fileutil::SafeTempDir;
use processes::Runner;
use repomd::RepositoryData;
use tracing::{info, warn};

use crate::{
    assemble,
    config::RunConfig,
    counterpart::{analyze_pair, AnalyzeOptions, PairPlan, PatchTask},
    imagebuild::{self, IMAGE_BUILDER_COMMAND},
    kickstart::KickstartFile,
    patcher::RpmPatcher,
};

/// External commands the pipeline spawns. Verified up front so a missing
/// tool surfaces before hours of work, not during.
const PREFLIGHT_COMMANDS: &[&str] = &[
    IMAGE_BUILDER_COMMAND,
    repomd::repository::INDEXER_COMMAND,
    repomd::repository::INDEX_MODIFIER_COMMAND,
    "mount",
    "chroot",
    "cp",
    "rpm2cpio",
    "cpio",
];

struct PairOutcome {
    name: String,
    graph: DependencyGraph,
    plan: PairPlan,
    combined_dir: SafeTempDir,
    repository_data: RepositoryData,
}

/// Runs the whole pipeline for one configuration.
pub fn run(config: &RunConfig, runner: &dyn Runner) -> Result<()> {
    ensure!(!config.pairs.is_empty(), "No repository pairs given!");

    for command in PREFLIGHT_COMMANDS {
        if !runner.check_command(Path::new(command)) {
            warn!("\"{command}\" command is not available. Try to install it!");
        }
    }

    let kickstart = KickstartFile::new(&config.kickstart);
    check_repository_names(config, &kickstart)?;

    if config.regenerate_repodata {
        for pair in &config.pairs {
            let data = RepositoryData::discover(&pair.url)?;
            data.index_repository(&pair.url, runner)?;
            data.index_repository(&pair.url_marked, runner)?;
        }
    }

    let scope = kickstart.package_scope()?;
    let scope_set: BTreeSet<String> = scope.iter().cloned().collect();

    let mut outcomes: Vec<PairOutcome> = Vec::new();
    for pair in &config.pairs {
        info!("Processing repository \"{}\"", pair.name);
        ensure!(pair.url.is_dir(), "Directory {} does not exist!", pair.url.display());
        ensure!(
            pair.url_marked.is_dir(),
            "Directory {} does not exist!",
            pair.url_marked.display()
        );

        // Scope packages are implicitly preferable: a package the image
        // installs should win a choice against an alternative it drags in.
        let mut preferables = config.preferables.clone();
        preferables.extend(scope.iter().cloned());
        let builder = GraphBuilder::new(preferables, config.strategy, scope.clone());

        let packages = repomd::load_packages(&pair.url, &config.architecture)?;
        let (graph, backward_graph) = builder.build(packages)?;
        let marked_packages = repomd::load_packages(&pair.url_marked, &config.architecture)?;
        let (marked_graph, _) = builder.build(marked_packages)?;

        if config.debug {
            let dot_path = config
                .temporaries_dir()
                .join(format!("dependency-graph-{}.dot", pair.name));
            std::fs::create_dir_all(config.temporaries_dir())?;
            std::fs::write(&dot_path, graph.to_dot())?;
            info!("The graph was exported in DOT format to {}", dot_path.display());
        }

        report_unprovided(&graph, &marked_graph);

        let conflicts = audit_file_conflicts(&graph, &scope_set);
        if config.abort_on_scope_conflicts
            && conflicts.iter().any(|conflict| conflict.critical)
        {
            bail!(
                "Critical file conflicts found in repository \"{}\"",
                pair.name
            );
        }

        let marked = mark(&graph, &backward_graph, &marked_graph, &config.directives)?;

        let combined_dir = fileutil::scratch_dir(
            &config
                .temporaries_dir()
                .join(format!("combined-{}", pair.name)),
        )?;
        let plan = analyze_pair(
            &graph,
            &marked_graph,
            &marked,
            combined_dir.path(),
            AnalyzeOptions {
                mirror_mode: config.mirror_mode,
                skip_version_mismatch: config.skip_version_mismatch,
                patching_enabled: config.patching_enabled,
            },
        )?;
        let repository_data = RepositoryData::discover(&pair.url)?;
        assemble::materialize(&plan, combined_dir.path())?;

        outcomes.push(PairOutcome {
            name: pair.name.clone(),
            graph,
            plan,
            combined_dir,
            repository_data,
        });
    }

    let graphs: Vec<&DependencyGraph> = outcomes.iter().map(|outcome| &outcome.graph).collect();
    check_known_names(&config.directives, &graphs)?;

    // One patcher pass over every pair's tasks.
    let tasks: Vec<PatchTask> = outcomes
        .iter()
        .flat_map(|outcome| outcome.plan.patch_tasks().cloned())
        .collect();
    info!("{} packages need their headers rewritten", tasks.len());
    RpmPatcher::new(config, runner).run(tasks, &graphs)?;

    for outcome in &outcomes {
        assemble::finalize(outcome.combined_dir.path(), &outcome.repository_data, runner)?;
    }

    build_final_image(config, runner, &outcomes)?;

    // The combined repositories stay on disk after a successful run; the
    // next run rebuilds them from scratch. Failed runs clean them up on
    // unwind.
    for outcome in outcomes {
        let _ = if config.debug {
            outcome.combined_dir.keep()
        } else {
            outcome.combined_dir.into_path()
        };
    }
    Ok(())
}

/// Verifies the user-given repository names against the kickstart.
fn check_repository_names(config: &RunConfig, kickstart: &KickstartFile) -> Result<()> {
    let possible = kickstart.repository_names()?;
    let mut unknown = Vec::new();
    for pair in &config.pairs {
        if !possible.contains(&pair.name) {
            unknown.push(pair.name.clone());
        }
    }
    if !unknown.is_empty() {
        bail!(
            "Failed to find repository names {} in kickstart file {}. Possible names are: {}",
            unknown.join(", "),
            config.kickstart.display(),
            possible.join(", ")
        );
    }
    Ok(())
}

/// Warns about required symbols neither repository side provides.
fn report_unprovided(graph: &DependencyGraph, marked_graph: &DependencyGraph) {
    let lacking: BTreeSet<&String> = graph
        .unprovided
        .iter()
        .filter(|symbol| !marked_graph.provided.contains(*symbol))
        .collect();
    let marked_lacking: BTreeSet<&String> = marked_graph
        .unprovided
        .iter()
        .filter(|symbol| !graph.provided.contains(*symbol))
        .collect();

    for symbol in lacking.intersection(&marked_lacking) {
        warn!(
            "Some packages in both repositories require symbol {symbol}, but none of them provides it."
        );
    }
    for symbol in lacking.difference(&marked_lacking) {
        warn!(
            "Some packages in the original repository require symbol {symbol}, but none of them provides it."
        );
    }
    for symbol in marked_lacking.difference(&lacking) {
        warn!(
            "Some packages in the marked repository require symbol {symbol}, but none of them provides it."
        );
    }
}

/// Runs the external image builder over the combined repositories and
/// reports the produced images.
fn build_final_image(
    config: &RunConfig,
    runner: &dyn Runner,
    outcomes: &[PairOutcome],
) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)?;
    let working_copy = config.temporaries_dir().join("final.ks");
    let kickstart = KickstartFile::new(&config.kickstart).copy_to(&working_copy)?;

    let repositories: Vec<(String, PathBuf)> = outcomes
        .iter()
        .map(|outcome| (outcome.name.clone(), outcome.combined_dir.path().to_path_buf()))
        .collect();
    let mut options = vec!["--shrink".to_string()];
    options.extend(config.builder_options.iter().cloned());

    imagebuild::create_image(
        runner,
        &config.architecture,
        &repositories,
        &kickstart,
        &config.output_dir,
        &options,
        &config.directives.service,
    )?;

    let images = imagebuild::built_images(&config.output_dir)?;
    ensure!(
        !images.is_empty(),
        "The image builder produced no images under {}",
        config.output_dir.display()
    );
    Ok(())
}
