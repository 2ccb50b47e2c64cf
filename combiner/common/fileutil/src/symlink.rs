// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{ensure, Context, Result};

/// Creates a symbolic link in `dir` pointing at `source`, named after
/// `source`'s base name.
pub fn symlink_into(source: &Path, dir: &Path) -> Result<()> {
    symlink_into_as(source, dir, source.file_name().and_then(|n| n.to_str()))
}

/// Creates a symbolic link in `dir` pointing at `source` with an explicit
/// link name. Passing `None` uses `source`'s base name.
pub fn symlink_into_as(source: &Path, dir: &Path, name: Option<&str>) -> Result<()> {
    ensure!(
        source.is_file(),
        "Cannot link {}: not an existing file",
        source.display()
    );
    let name = match name {
        Some(name) => name,
        None => source
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("{} has no usable file name", source.display()))?,
    };
    let target = dir.join(name);
    std::os::unix::fs::symlink(source, &target).with_context(|| {
        format!(
            "Failed to link {} -> {}",
            target.display(),
            source.display()
        )
    })
}

/// Copies `source` into `dir` under an explicit name, preserving
/// permissions. Existing files are overwritten, which makes re-running a
/// partially finished assembly idempotent.
pub fn copy_into_as(source: &Path, dir: &Path, name: &str) -> Result<()> {
    let target = dir.join(name);
    std::fs::copy(source, &target).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            target.display()
        )
    })?;
    Ok(())
}
