// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The RPM header patcher.
//!
//! Rewrites marked packages whose release number or requirement list
//! diverged from the original counterpart. Rewrites run inside clones of a
//! minimal chrootable image, driven by one make process per clone, with
//! results cached by task fingerprint.

pub mod bootstrap;
pub mod cache;
pub mod emulator;
pub mod image;
pub mod makefile;

use std::{
    cmp::Reverse,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use chrootenv::mount_pseudo_filesystems;
use depgraph::DependencyGraph;
use processes::Runner;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    config::RunConfig,
    counterpart::PatchTask,
    kickstart::KickstartFile,
    patcher::{
        cache::{task_fingerprint, PatchCache},
        image::PreliminaryImage,
        makefile::{render_makefile, render_sed_script, REWRITER_COMMAND},
    },
    Error,
};

/// One clone of the prepared chroot with its assigned tasks.
struct WorkerClone {
    root: PathBuf,
    /// (clone-local index, task, fingerprint)
    tasks: Vec<(usize, PatchTask, String)>,
}

/// The patcher of RPMs: prepares the chroot environment once per run and
/// executes all patch tasks of all repository pairs in a single pass.
pub struct RpmPatcher<'a> {
    config: &'a RunConfig,
    runner: &'a dyn Runner,
}

impl<'a> RpmPatcher<'a> {
    pub fn new(config: &'a RunConfig, runner: &'a dyn Runner) -> Self {
        Self { config, runner }
    }

    /// Executes every task: each `destination_path` holds a correctly
    /// patched package afterwards.
    ///
    /// `graphs` are the original repositories' graphs, used to resolve the
    /// minimal toolchain of the preliminary image.
    pub fn run(&self, tasks: Vec<PatchTask>, graphs: &[&DependencyGraph]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        if !self.config.patching_enabled {
            // Idle mode: tasks degrade to plain copies.
            for task in &tasks {
                std::fs::copy(&task.source_path, &task.destination_path).with_context(|| {
                    format!("Failed to copy {}", task.source_path.display())
                })?;
            }
            return Ok(());
        }

        let cache = PatchCache::open(&self.config.patching_cache_dir())?;
        if self.config.drop_patching_cache {
            cache.wipe()?;
        }

        let mut todo: Vec<(PatchTask, String)> = Vec::new();
        for task in tasks {
            let fingerprint = task_fingerprint(&task);
            match cache.lookup(&fingerprint)? {
                Some(cached) => {
                    debug!(
                        "Using cached rewrite of {} for {}",
                        task.package_name,
                        task.destination_path.display()
                    );
                    std::fs::copy(&cached, &task.destination_path)?;
                }
                None => todo.push((task, fingerprint)),
            }
        }
        if todo.is_empty() {
            info!("All patch tasks were satisfied from the cache");
            return Ok(());
        }

        self.rewrite(todo, graphs, &cache)
    }

    fn rewrite(
        &self,
        mut todo: Vec<(PatchTask, String)>,
        graphs: &[&DependencyGraph],
        cache: &PatchCache,
    ) -> Result<()> {
        let preliminary = PreliminaryImage::prepare(self.config, graphs, self.runner)?;
        let kickstart = KickstartFile::new(&self.config.kickstart);

        let temporaries = self.config.temporaries_dir();
        let prototype = fileutil::scratch_dir(&temporaries.join("patching-root"))?;
        let mounts = preliminary.mount(prototype.path(), &kickstart, self.runner)?;

        // The binary-format registration is host-global; acquire it once
        // before fanning out and hold it until every clone finished.
        let original_repositories: Vec<PathBuf> =
            self.config.pairs.iter().map(|pair| pair.url.clone()).collect();
        let _registration = emulator::deploy(
            prototype.path(),
            &self.config.architecture,
            &original_repositories,
            self.config.emulator_override.as_deref(),
            self.runner,
        )?;

        self.ensure_rewriter(prototype.path())?;

        // Heaviest sources first, dealt round-robin, give the clones
        // comparable cumulative workloads.
        todo.sort_by_key(|(task, _)| {
            Reverse(
                std::fs::metadata(&task.source_path)
                    .map(|metadata| metadata.len())
                    .unwrap_or(0),
            )
        });
        let clone_count = self.config.jobs.max(1).min(todo.len());
        let mut clones: Vec<WorkerClone> = Vec::with_capacity(clone_count);
        for i in 0..clone_count {
            let root = fileutil::scratch_dir(&temporaries.join(format!("clone{i}")))?;
            self.runner
                .execute_and_check(
                    Command::new("cp")
                        .arg("-a")
                        .arg(format!("{}/.", prototype.path().display()))
                        .arg(root.path()),
                )
                .context("Failed to clone the patching root")?;
            clones.push(WorkerClone {
                root: if self.config.debug {
                    root.keep()
                } else {
                    root.into_path()
                },
                tasks: Vec::new(),
            });
        }
        for (i, (task, fingerprint)) in todo.into_iter().enumerate() {
            let clone = &mut clones[i % clone_count];
            let index = clone.tasks.len();
            clone.tasks.push((index, task, fingerprint));
        }

        // The prototype mounts are only needed while cloning.
        drop(mounts);

        let results: Result<Vec<()>> = clones
            .par_iter()
            .map(|clone| self.run_clone(clone, cache))
            .collect();
        let outcome = results.map(|_| ());

        if self.config.debug {
            let _ = prototype.keep();
        } else {
            for clone in &clones {
                let _ = fileutil::remove_dir_all_with_chmod(&clone.root);
            }
        }
        outcome
    }

    /// Makes sure the chroot carries the header rewriter, installing it from
    /// the configured source tree when absent.
    fn ensure_rewriter(&self, root: &Path) -> Result<()> {
        if !fileutil::find_files_matching(root, &format!("^{REWRITER_COMMAND}$"))?.is_empty() {
            return Ok(());
        }
        let Some(source) = &self.config.rewriter_source else {
            warn!(
                "The preliminary image does not carry {REWRITER_COMMAND} and no \
                 rewriter source tree is configured"
            );
            return Ok(());
        };
        info!("Installing {REWRITER_COMMAND} into the patching root");
        self.runner.execute_and_check(
            Command::new("cp")
                .arg("-a")
                .arg(source)
                .arg(root.join("rpmrebuild")),
        )?;
        self.runner.execute_and_check(
            Command::new("chroot")
                .arg(root)
                .args(["sh", "-c", "cd /rpmrebuild/src && make && make install"]),
        )?;
        Ok(())
    }

    /// Executes one clone: stages the task inputs, runs the make driver
    /// chrooted with the pseudo-filesystems mounted, and distributes the
    /// rebuilt packages.
    fn run_clone(&self, clone: &WorkerClone, cache: &PatchCache) -> Result<()> {
        let tasks_dir = clone.root.join(makefile::TASKS_DIR);
        let results_dir = clone.root.join(makefile::RESULTS_DIR);
        std::fs::create_dir_all(&tasks_dir)?;
        std::fs::create_dir_all(&results_dir)?;

        let task_refs: Vec<(usize, &PatchTask)> = clone
            .tasks
            .iter()
            .map(|(index, task, _)| (*index, task))
            .collect();
        std::fs::write(tasks_dir.join("Makefile"), render_makefile(&task_refs)?)?;
        for (index, task, _) in &clone.tasks {
            std::fs::copy(&task.source_path, tasks_dir.join(format!("task{index}.rpm")))
                .with_context(|| format!("Failed to stage {}", task.source_path.display()))?;
            std::fs::write(
                tasks_dir.join(format!("task{index}.sed")),
                render_sed_script(task),
            )?;
        }

        let mounts = mount_pseudo_filesystems(&clone.root, self.runner)?;
        let execution = self.runner.execute(
            Command::new("chroot")
                .arg(&clone.root)
                .args(["make", "-f", "/tasks/Makefile", "all"]),
        )?;
        drop(mounts);

        if !execution.success() {
            return Err(Error::Patcher {
                message: format!("make driver exited with {}", execution.status),
                log: self.collect_logs(&tasks_dir),
            }
            .into());
        }

        for (index, task, fingerprint) in &clone.tasks {
            let log_path = tasks_dir.join(format!("task{index}.log"));
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            let result_line = log
                .lines()
                .find_map(|line| line.strip_prefix("result: "))
                .map(|line| line.trim().to_string());
            let Some(result) = result_line else {
                return Err(Error::Patcher {
                    message: format!("no rewritten package reported for {}", task.package_name),
                    log,
                }
                .into());
            };
            let rebuilt = clone.root.join(result.trim_start_matches('/'));
            if !rebuilt.is_file() {
                return Err(Error::Patcher {
                    message: format!("reported result {result} does not exist"),
                    log,
                }
                .into());
            }
            info!(
                "The package has been rebuilt to adjust its headers: {}",
                rebuilt.display()
            );
            std::fs::copy(&rebuilt, &task.destination_path).with_context(|| {
                format!("Failed to place {}", task.destination_path.display())
            })?;
            cache.store(fingerprint, &rebuilt)?;
        }

        self.report_results(&results_dir);
        Ok(())
    }

    /// Logs the clone's results directory, most recent first.
    fn report_results(&self, results_dir: &Path) {
        let Ok(entries) = std::fs::read_dir(results_dir) else {
            return;
        };
        let mut rebuilt: Vec<(std::time::SystemTime, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, entry.path()))
            })
            .collect();
        rebuilt.sort();
        for (_, path) in rebuilt {
            debug!("Rebuilt: {}", path.display());
        }
    }

    fn collect_logs(&self, tasks_dir: &Path) -> String {
        let mut logs = String::new();
        if let Ok(paths) = fileutil::find_files_matching(tasks_dir, r"^task[0-9]+\.log$") {
            for path in paths {
                if let Ok(contents) = std::fs::read_to_string(&path) {
                    logs.push_str(&format!("=== {} ===\n{contents}\n", path.display()));
                }
            }
        }
        logs
    }
}
