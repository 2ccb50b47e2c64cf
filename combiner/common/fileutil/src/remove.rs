// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{fs::Permissions, os::unix::prelude::PermissionsExt, path::Path};

use anyhow::{Context, Result};

/// Removes a directory tree, like [`std::fs::remove_dir_all`], but first
/// chmods directories that deny access to their owner.
///
/// Chroot clones contain directories created with restrictive modes (e.g.
/// 0o000 or read-only), which make a plain recursive removal fail with
/// EACCES. This function walks the tree and restores owner permissions
/// before unlinking.
pub fn remove_dir_all_with_chmod(dir: &Path) -> Result<()> {
    if dir.symlink_metadata().is_err() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(dir).contents_first(false) {
        let entry = match entry {
            Ok(entry) => entry,
            // Entries can fail to stat when their parent is unreadable.
            // Fixing the parent permissions below lets the final removal
            // succeed anyway.
            Err(_) => continue,
        };
        if entry.file_type().is_dir() {
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let mode = metadata.permissions().mode();
            if mode & 0o700 != 0o700 {
                let _ = std::fs::set_permissions(
                    entry.path(),
                    Permissions::from_mode(mode | 0o700),
                );
            }
        }
    }

    std::fs::remove_dir_all(dir)
        .with_context(|| format!("Failed to remove directory {}", dir.display()))
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir, set_permissions};

    use super::*;

    #[test]
    fn removes_inaccessible_subdirectory() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("root");
        create_dir(&root)?;
        let bad = root.join("bad");
        create_dir(&bad)?;
        std::fs::write(bad.join("file"), "x")?;
        set_permissions(&bad, Permissions::from_mode(0o000))?;

        remove_dir_all_with_chmod(&root)?;
        assert!(!root.try_exists()?);
        Ok(())
    }

    #[test]
    fn missing_directory_is_not_an_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        remove_dir_all_with_chmod(&temp_dir.path().join("nonexistent"))?;
        Ok(())
    }
}
