// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Content-addressed caches of the patcher.
//!
//! Rewritten packages are cached under a name derived from the task
//! fingerprint, next to a `<name>.info.txt` whose first line is the
//! fingerprint. Prepared preliminary images are memoised the same way, one
//! directory per key.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::counterpart::PatchTask;

/// The canonical serialisation hashed into a patch task fingerprint. The
/// update list is sorted by the analyzer, making the serialisation stable.
#[derive(Serialize)]
struct TaskFingerprintInput<'a> {
    package_name: &'a str,
    source_path: &'a Path,
    required_release: &'a str,
    updates: &'a [crate::counterpart::RequirementUpdate],
}

/// The fingerprint of a patch task.
pub fn task_fingerprint(task: &PatchTask) -> String {
    let input = TaskFingerprintInput {
        package_name: &task.package_name,
        source_path: &task.source_path,
        required_release: &task.required_release,
        updates: &task.updates,
    };
    fingerprint_of(&input)
}

/// The key of a prepared preliminary image.
#[derive(Serialize)]
pub struct ImageKey {
    pub repository_names: Vec<String>,
    pub repository_urls: Vec<String>,
    pub architecture: String,
    pub kickstart_basename: String,
}

impl ImageKey {
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}

fn fingerprint_of<T: Serialize>(value: &T) -> String {
    let canonical = serde_json::to_vec(value).expect("fingerprint inputs serialize");
    hex::encode(Sha256::digest(&canonical))
}

/// The cache of rewritten packages.
pub struct PatchCache {
    dir: PathBuf,
}

impl PatchCache {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Removes every cached entry.
    pub fn wipe(&self) -> Result<()> {
        info!("Dropping the patching cache at {}", self.dir.display());
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Looks a fingerprint up; a hit returns the cached `.rpm` path.
    pub fn lookup(&self, fingerprint: &str) -> Result<Option<PathBuf>> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".info.txt") {
                continue;
            }
            let contents = std::fs::read_to_string(&path)?;
            if contents.lines().next() == Some(fingerprint) {
                let rpm = PathBuf::from(
                    path.to_string_lossy()
                        .trim_end_matches(".info.txt")
                        .to_string(),
                );
                if rpm.is_file() {
                    debug!("Cache hit for {fingerprint}");
                    return Ok(Some(rpm));
                }
            }
        }
        Ok(None)
    }

    /// Stores a rewritten package under its fingerprint.
    ///
    /// The file name is derived from the fingerprint, so concurrent stores
    /// of the same fingerprint write identical bytes to the same name.
    pub fn store(&self, fingerprint: &str, rpm: &Path) -> Result<PathBuf> {
        let stem = rpm
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("package");
        let cached = self.dir.join(format!("{stem}.{}.rpm", &fingerprint[..16]));
        std::fs::copy(rpm, &cached).with_context(|| {
            format!("Failed to store {} in the cache", rpm.display())
        })?;
        std::fs::write(
            PathBuf::from(format!("{}.info.txt", cached.display())),
            format!("{fingerprint}\n"),
        )?;
        Ok(cached)
    }
}

/// The cache of prepared preliminary images.
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// The directory where images for this key live, if already prepared.
    pub fn lookup(&self, key: &ImageKey) -> Result<Option<PathBuf>> {
        let dir = self.dir.join(key.fingerprint());
        if dir.is_dir() && !fileutil::find_images(&dir)?.is_empty() {
            debug!("Using cached preliminary image at {}", dir.display());
            return Ok(Some(dir));
        }
        Ok(None)
    }

    /// The directory a fresh build of this key must fill.
    pub fn prepare_slot(&self, key: &ImageKey) -> Result<PathBuf> {
        let dir = self.dir.join(key.fingerprint());
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("image.info.txt"),
            format!("{}\n", key.fingerprint()),
        )?;
        Ok(dir)
    }
}
