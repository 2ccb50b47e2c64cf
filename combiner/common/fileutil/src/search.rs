// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use regex::Regex;

/// Finds all files under `dir` whose *file name* matches `expression`.
///
/// The match is anchored at the start of the file name, mirroring how shell
/// tools match on basenames. Returned paths are absolute and sorted so that
/// results are deterministic across runs.
pub fn find_files_matching(dir: &Path, expression: &str) -> Result<Vec<PathBuf>> {
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    let matcher = Regex::new(expression)
        .with_context(|| format!("Invalid file name expression {:?}", expression))?;

    let mut found: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if matcher
            .find(&file_name)
            .is_some_and(|m| m.start() == 0)
        {
            found.push(
                entry
                    .path()
                    .canonicalize()
                    .unwrap_or_else(|_| entry.path().to_path_buf()),
            );
        }
    }
    found.sort();
    Ok(found)
}

/// Finds the platform images (`*.img`) under a directory.
pub fn find_images(dir: &Path) -> Result<Vec<PathBuf>> {
    find_files_matching(dir, r".*\.img$")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_by_basename_prefix() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path();
        std::fs::create_dir(dir.join("sub"))?;
        std::fs::write(dir.join("qemu-arm"), "")?;
        std::fs::write(dir.join("sub").join("qemu-arm-binfmt"), "")?;
        std::fs::write(dir.join("not-qemu-arm"), "")?;

        let found = find_files_matching(dir, "^qemu-arm$")?;
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("qemu-arm"));

        let found = find_files_matching(dir, "^qemu-arm")?;
        assert_eq!(found.len(), 2);
        Ok(())
    }

    #[test]
    fn finds_images() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path();
        std::fs::write(dir.join("rootfs.img"), "")?;
        std::fs::write(dir.join("rootfs.img.log"), "")?;

        let images = find_images(dir)?;
        assert_eq!(images.len(), 1);
        assert!(images[0].ends_with("rootfs.img"));
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(find_files_matching(Path::new("/nonexistent-fileutil"), ".*").is_err());
    }
}
