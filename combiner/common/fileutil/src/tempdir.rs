// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::remove_dir_all_with_chmod;

/// A temporary directory that cleans up after itself.
///
/// Differences to [`tempfile::TempDir`]:
/// - Directory names carry the current program name, so stray temporaries
///   can be attributed while debugging.
/// - Removal goes through [`remove_dir_all_with_chmod`], which copes with
///   the unreadable directories a chroot clone leaves behind.
/// - A failed removal is logged instead of panicking; cleanup runs on
///   teardown paths where a panic would mask the original error.
/// - The cleanup can be disarmed ([`SafeTempDir::keep`]), which is how
///   debug mode preserves temporaries for inspection.
pub struct SafeTempDir {
    path: PathBuf,
    /// Whether drop removes the directory.
    armed: bool,
}

impl SafeTempDir {
    /// Creates a fresh temporary directory under the system default
    /// location.
    pub fn new() -> Result<Self> {
        Self::new_in(&std::env::temp_dir())
    }

    /// Creates a fresh temporary directory under `base_dir`, creating the
    /// base first when it does not exist yet.
    pub fn new_in(base_dir: &Path) -> Result<Self> {
        if !base_dir.is_dir() {
            std::fs::create_dir_all(base_dir)?;
        }
        let dir = tempfile::Builder::new()
            .prefix(&program_prefix())
            .tempdir_in(base_dir)?;
        Ok(Self {
            path: dir.into_path(),
            armed: true,
        })
    }

    /// Adopts an existing directory; it is removed on drop like any other
    /// [`SafeTempDir`].
    pub fn take(dir: &Path) -> Self {
        Self {
            path: dir.to_path_buf(),
            armed: true,
        }
    }

    /// Returns the path to the temporary directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the directory: it stays on disk and removing it becomes the
    /// caller's responsibility.
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        self.path.clone()
    }

    /// Like [`SafeTempDir::into_path`], but announces the kept directory.
    /// Debug runs use this to leave temporaries behind for inspection.
    pub fn keep(self) -> PathBuf {
        info!("Keeping temporary directory {}", self.path.display());
        self.into_path()
    }
}

impl Drop for SafeTempDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(error) = remove_dir_all_with_chmod(&self.path) {
            warn!(
                "Failed to remove temporary directory {}: {error:#}",
                self.path.display()
            );
        }
    }
}

/// The `<program>.` file name prefix of temporary directories.
fn program_prefix() -> String {
    let current_exe = std::env::current_exe().unwrap_or_default();
    let program = current_exe
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());
    format!("combiner.{program}.")
}

/// An empty directory at a predictable path, replacing any leftovers of a
/// previous run. Owned like any [`SafeTempDir`].
pub fn scratch_dir(path: &Path) -> Result<SafeTempDir> {
    remove_dir_all_with_chmod(path)?;
    std::fs::create_dir_all(path)?;
    Ok(SafeTempDir::take(path))
}
