// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use processes::Runner;
use tracing::warn;

/// The external indexer and its companion that attaches auxiliary data.
pub const INDEXER_COMMAND: &str = "createrepo";
pub const INDEX_MODIFIER_COMMAND: &str = "modifyrepo";

/// Auxiliary metadata of a repository that the indexer does not derive from
/// the package files: package group and pattern definitions.
#[derive(Clone, Debug, Default)]
pub struct RepositoryData {
    pub groups: Option<PathBuf>,
    pub patterns: Option<PathBuf>,
}

impl RepositoryData {
    /// Discovers group/pattern data inside a repository. The indexer
    /// typically stores them under `repodata/` with a checksum prefix.
    pub fn discover(root: &Path) -> Result<Self> {
        let mut data = RepositoryData::default();
        let repodata = root.join("repodata");
        if !repodata.is_dir() {
            return Ok(data);
        }
        for path in fileutil::find_files_matching(&repodata, r".*group\.xml$")? {
            data.groups = Some(path);
        }
        for path in fileutil::find_files_matching(&repodata, r".*patterns\.xml$")? {
            data.patterns = Some(path);
        }
        if data.groups.is_none() {
            warn!("There is no groups data in {}", root.display());
        }
        if data.patterns.is_none() {
            warn!("There is no patterns data in {}", root.display());
        }
        Ok(data)
    }

    /// Generates the index of `root` and attaches this auxiliary data to it.
    pub fn index_repository(&self, root: &Path, runner: &dyn Runner) -> Result<()> {
        runner
            .execute_and_check(Command::new(INDEXER_COMMAND).arg(root))
            .with_context(|| format!("Failed to index repository {}", root.display()))?;

        for aux in [&self.groups, &self.patterns].into_iter().flatten() {
            runner
                .execute_and_check(
                    Command::new(INDEX_MODIFIER_COMMAND)
                        .arg(aux)
                        .arg(root.join("repodata")),
                )
                .with_context(|| {
                    format!(
                        "Failed to attach {} to repository {}",
                        aux.display(),
                        root.display()
                    )
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use processes::ScriptedRunner;

    use super::*;

    #[test]
    fn discovers_aux_data() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let repodata = temp_dir.path().join("repodata");
        std::fs::create_dir_all(&repodata)?;
        std::fs::write(repodata.join("1234abcd-group.xml"), "<comps/>")?;

        let data = RepositoryData::discover(temp_dir.path())?;
        assert!(data.groups.is_some());
        assert!(data.patterns.is_none());
        Ok(())
    }

    #[test]
    fn indexing_invokes_external_tools() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let data = RepositoryData {
            groups: Some(PathBuf::from("/aux/group.xml")),
            patterns: None,
        };

        let runner = ScriptedRunner::new();
        data.index_repository(temp_dir.path(), &runner)?;

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 2);
        assert!(invocations[0].starts_with(INDEXER_COMMAND));
        assert!(invocations[1].starts_with(INDEX_MODIFIER_COMMAND));
        assert!(invocations[1].contains("/aux/group.xml"));
        Ok(())
    }
}
