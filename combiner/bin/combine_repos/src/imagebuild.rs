// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Invocation of the external image builder.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use processes::Runner;
use tracing::info;

use crate::kickstart::KickstartFile;

/// The external image builder executable.
pub const IMAGE_BUILDER_COMMAND: &str = "mic";

/// Creates an image from the given repositories and kickstart file.
///
/// The kickstart must already be a working copy: its repository lines are
/// rewritten to the given local paths and `extra_packages` are appended
/// before the builder runs.
pub fn create_image(
    runner: &dyn Runner,
    architecture: &str,
    repositories: &[(String, PathBuf)],
    kickstart: &KickstartFile,
    output_dir: &Path,
    extra_options: &[String],
    extra_packages: &[String],
) -> Result<()> {
    anyhow::ensure!(!repositories.is_empty(), "Repository names are not given!");

    kickstart.replace_repository_paths(repositories)?;
    if !extra_packages.is_empty() {
        kickstart.add_packages(extra_packages)?;
    }

    let mut cmd = Command::new(IMAGE_BUILDER_COMMAND);
    cmd.args(["create", "loop"])
        .arg(kickstart.path())
        .args(["-A", architecture])
        .arg("-o")
        .arg(output_dir)
        .args(["--tmpfs", "--pkgmgr=zypp"])
        .args(extra_options);
    runner
        .execute_and_check(&mut cmd)
        .context("The image builder failed")?;
    Ok(())
}

/// The images the builder produced under its output directory.
pub fn built_images(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let images = fileutil::find_images(output_dir)?;
    for image in &images {
        info!("Built image: {}", image.display());
    }
    Ok(images)
}
