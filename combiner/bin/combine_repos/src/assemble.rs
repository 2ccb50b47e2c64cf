// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Materialisation of a combined repository from a pair plan.

use std::path::Path;

use anyhow::{Context, Result};
use processes::Runner;
use repomd::RepositoryData;
use tracing::debug;

use crate::counterpart::{AssembleAction, PairPlan};

/// Creates the combined repository directory and fills it with everything
/// except patched packages: marked files are symlinked, original files
/// copied. Patch destinations are materialised later by the patcher.
pub fn materialize(plan: &PairPlan, combined_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(combined_dir).with_context(|| {
        format!(
            "Failed to create combined repository {}",
            combined_dir.display()
        )
    })?;

    for action in &plan.actions {
        match action {
            AssembleAction::LinkMarked {
                name,
                source,
                file_name,
            } => {
                debug!("Linking marked package {name}");
                fileutil::symlink_into_as(source, combined_dir, Some(file_name.as_str()))?;
            }
            AssembleAction::CopyOriginal { name, source } => {
                debug!("Copying original package {name}");
                let file_name = source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("{} has no file name", source.display()))?;
                fileutil::copy_into_as(source, combined_dir, file_name)?;
            }
            AssembleAction::Patch(_) => {}
        }
    }
    Ok(())
}

/// Attaches the original repository's auxiliary metadata and generates the
/// combined repository's index. Runs after the patcher has landed its
/// outputs so the index covers them.
pub fn finalize(
    combined_dir: &Path,
    repository_data: &RepositoryData,
    runner: &dyn Runner,
) -> Result<()> {
    repository_data.index_repository(combined_dir, runner)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use depgraph::GraphBuilder;
    use processes::ScriptedRunner;
    use repomd::Package;
    use std::sync::Arc;

    use crate::counterpart::{analyze_pair, AnalyzeOptions};

    use super::*;

    fn record(dir: &Path, name: &str, version: &str, release: &str) -> Arc<Package> {
        let location = dir.join(format!("{name}-{version}-{release}.armv7l.rpm"));
        std::fs::write(&location, format!("rpm {name}-{version}-{release}")).unwrap();
        Arc::new(Package {
            name: name.to_string(),
            epoch: "0".to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: "armv7l".to_string(),
            location,
            provides: BTreeSet::from([name.to_string()]),
            requires: Vec::new(),
            files: BTreeSet::new(),
        })
    }

    #[test]
    fn links_and_copies_land_in_the_combined_directory() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let original_dir = temp_dir.path().join("original");
        let marked_dir = temp_dir.path().join("marked");
        std::fs::create_dir_all(&original_dir)?;
        std::fs::create_dir_all(&marked_dir)?;

        let build = |packages| {
            GraphBuilder::new(Vec::new(), None, Vec::new())
                .build(packages)
                .unwrap()
                .0
        };
        let original = build(vec![
            record(&original_dir, "libx", "1.0", "1"),
            record(&original_dir, "liby", "1.0", "1"),
        ]);
        let marked = build(vec![record(&marked_dir, "libx", "1.0", "1")]);

        let combined_dir = temp_dir.path().join("combined");
        let plan = analyze_pair(
            &original,
            &marked,
            &BTreeSet::from(["libx".to_string()]),
            &combined_dir,
            AnalyzeOptions {
                mirror_mode: false,
                skip_version_mismatch: false,
                patching_enabled: true,
            },
        )
        .unwrap();
        materialize(&plan, &combined_dir)?;

        let libx = combined_dir.join("libx-1.0-1.armv7l.rpm");
        assert!(libx.symlink_metadata()?.is_symlink());
        assert_eq!(std::fs::read_to_string(libx)?, "rpm libx-1.0-1");
        let liby = combined_dir.join("liby-1.0-1.armv7l.rpm");
        assert!(liby.symlink_metadata()?.is_file());
        Ok(())
    }

    #[test]
    fn finalize_indexes_with_aux_data() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let combined_dir = temp_dir.path().join("combined");
        std::fs::create_dir_all(&combined_dir)?;

        let data = RepositoryData {
            groups: Some(PathBuf::from("/orig/repodata/group.xml")),
            patterns: None,
        };
        let runner = ScriptedRunner::new();
        finalize(&combined_dir, &data, &runner)?;

        assert_eq!(runner.count_invocations_containing("createrepo"), 1);
        assert_eq!(runner.count_invocations_containing("group.xml"), 1);
        Ok(())
    }
}
