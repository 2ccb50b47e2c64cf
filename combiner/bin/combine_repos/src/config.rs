// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use depgraph::{Directives, Strategy};
use serde::Deserialize;

/// One repository pair to combine: the original repository and its
/// counterpart rebuilt with modified build options.
#[derive(Clone, Debug)]
pub struct RepositoryPair {
    /// The repository name as the kickstart file mentions it.
    pub name: String,
    /// The original repository root.
    pub url: PathBuf,
    /// The marked repository root.
    pub url_marked: PathBuf,
}

/// The immutable configuration of one run, threaded by reference through
/// every component.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub pairs: Vec<RepositoryPair>,
    pub architecture: String,
    pub kickstart: PathBuf,
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Patcher clone count.
    pub jobs: usize,
    pub strategy: Option<Strategy>,
    pub directives: Directives,
    pub preferables: Vec<String>,
    /// Fall back to the original package when the marked one is missing.
    pub mirror_mode: bool,
    /// Drop counterparts whose versions differ instead of failing.
    pub skip_version_mismatch: bool,
    /// When false, patch tasks degrade to plain copies.
    pub patching_enabled: bool,
    pub drop_patching_cache: bool,
    /// Critical file conflicts are reported either way; this makes them
    /// fatal.
    pub abort_on_scope_conflicts: bool,
    /// Keep temporaries and show subprocess output.
    pub debug: bool,
    /// Extra options passed to the external image builder.
    pub builder_options: Vec<String>,
    /// A pre-built preliminary image (file or directory) for the patcher.
    pub preliminary_image: Option<PathBuf>,
    /// Where to keep the built preliminary image.
    pub preliminary_image_outdir: Option<PathBuf>,
    /// An emulator binary or package overriding the repository search.
    pub emulator_override: Option<PathBuf>,
    /// Source tree of the header rewriter to install into the chroot when
    /// the preliminary image does not already carry it.
    pub rewriter_source: Option<PathBuf>,
    /// Re-index the input repositories before combining.
    pub regenerate_repodata: bool,
}

impl RunConfig {
    /// A minimal configuration for unit tests; fields are overridden with
    /// struct update syntax.
    #[cfg(test)]
    pub(crate) fn for_tests(base_dir: &Path) -> Self {
        Self {
            pairs: vec![RepositoryPair {
                name: "base".to_string(),
                url: base_dir.join("original"),
                url_marked: base_dir.join("marked"),
            }],
            architecture: "armv7l".to_string(),
            kickstart: base_dir.join("image.ks"),
            output_dir: base_dir.join("out"),
            cache_dir: base_dir.join("cache"),
            jobs: 1,
            strategy: None,
            directives: Directives::default(),
            preferables: Vec::new(),
            mirror_mode: false,
            skip_version_mismatch: false,
            patching_enabled: true,
            drop_patching_cache: false,
            abort_on_scope_conflicts: false,
            debug: false,
            builder_options: Vec::new(),
            preliminary_image: None,
            preliminary_image_outdir: None,
            emulator_override: None,
            rewriter_source: None,
            regenerate_repodata: false,
        }
    }

    /// The directory for temporaries of this run, inside the cache root.
    pub fn temporaries_dir(&self) -> PathBuf {
        self.cache_dir.join("temporaries")
    }

    /// The patching cache directory.
    pub fn patching_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("patching")
    }

    /// The prepared preliminary image cache directory.
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }
}

/// Splits user-given name lists: names may be joined with commas,
/// semicolons or whitespace inside one argument.
pub fn split_names(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.split([',', ';', ' ', '\n', '\t']))
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .collect()
}

/// An optional TOML profile supplying defaults the command line can
/// override.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub architecture: Option<String>,
    pub kickstart: Option<PathBuf>,
    pub outdir: Option<PathBuf>,
    pub cachedir: Option<PathBuf>,
    #[serde(default)]
    pub repository: Vec<ProfileRepository>,
    #[serde(default)]
    pub packages: ProfilePackages,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileRepository {
    pub name: String,
    pub url: PathBuf,
    pub url_marked: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePackages {
    #[serde(default)]
    pub forward: Vec<String>,
    #[serde(default)]
    pub backward: Vec<String>,
    #[serde(default)]
    pub single: Vec<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default)]
    pub service: Vec<String>,
    #[serde(default)]
    pub preferable: Vec<String>,
}

impl Profile {
    /// Loads a profile; a missing file yields the empty profile.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Profile::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
