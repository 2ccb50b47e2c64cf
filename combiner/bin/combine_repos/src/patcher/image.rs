// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Preparation and mounting of the preliminary image: the minimal chrootable
//! filesystem the header rewriter runs in.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrootenv::{mount_loop_image, MountStack};
use depgraph::DependencyGraph;
use processes::Runner;
use tracing::info;

use crate::{
    config::RunConfig,
    imagebuild,
    kickstart::KickstartFile,
    patcher::{
        bootstrap::minimal_packages,
        cache::{ImageCache, ImageKey},
    },
};

/// The directory holding the preliminary image(s) of a run.
#[derive(Debug)]
pub struct PreliminaryImage {
    pub images_dir: PathBuf,
}

impl PreliminaryImage {
    /// Finds or builds the preliminary image.
    ///
    /// Preference order: the user-supplied image, a cached image for this
    /// run's key, then a fresh build through the external image builder from
    /// a kickstart with all group selections commented out plus the minimal
    /// toolchain packages.
    pub fn prepare(
        config: &RunConfig,
        graphs: &[&DependencyGraph],
        runner: &dyn Runner,
    ) -> Result<Self> {
        if let Some(supplied) = &config.preliminary_image {
            let images_dir = if supplied.is_dir() {
                supplied.clone()
            } else if supplied.is_file() {
                supplied
                    .parent()
                    .context("Supplied image has no parent directory")?
                    .to_path_buf()
            } else {
                bail!(
                    "Given {} is not a file or a directory.",
                    supplied.display()
                );
            };
            return Ok(Self { images_dir });
        }

        let key = ImageKey {
            repository_names: config.pairs.iter().map(|p| p.name.clone()).collect(),
            repository_urls: config
                .pairs
                .iter()
                .map(|p| p.url.to_string_lossy().into_owned())
                .collect(),
            architecture: config.architecture.clone(),
            kickstart_basename: config
                .kickstart
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let cache = ImageCache::open(&config.image_cache_dir())?;
        if let Some(cached) = cache.lookup(&key)? {
            return Ok(Self { images_dir: cached });
        }

        let images_dir = match &config.preliminary_image_outdir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.clone()
            }
            None => cache.prepare_slot(&key)?,
        };

        // Strip the kickstart down: groups out, the minimal toolchain in.
        let stripped = images_dir.join("preliminary.ks");
        let kickstart = KickstartFile::new(&config.kickstart).copy_to(&stripped)?;
        kickstart.comment_all_groups()?;
        let packages = minimal_packages(graphs)?;
        info!("Building the preliminary image with packages: {packages:?}");

        let repositories: Vec<(String, PathBuf)> = config
            .pairs
            .iter()
            .map(|pair| (pair.name.clone(), pair.url.clone()))
            .collect();
        imagebuild::create_image(
            runner,
            &config.architecture,
            &repositories,
            &kickstart,
            &images_dir,
            &[],
            &packages,
        )?;

        if fileutil::find_images(&images_dir)?.is_empty() {
            bail!(
                "The image builder produced no images under {}",
                images_dir.display()
            );
        }
        Ok(Self { images_dir })
    }

    /// Mounts the image set onto `root`.
    ///
    /// A single image mounts at the chroot root. Several images follow the
    /// kickstart's image/mount-point declarations, mounted in depth order so
    /// parents come first.
    pub fn mount(
        &self,
        root: &Path,
        kickstart: &KickstartFile,
        runner: &dyn Runner,
    ) -> Result<MountStack> {
        let images = fileutil::find_images(&self.images_dir)?;
        let mut stack = MountStack::new();
        match images.as_slice() {
            [] => bail!("No images were found under {}", self.images_dir.display()),
            [image] => {
                stack.push(mount_loop_image(image, root, runner)?);
            }
            _ => {
                for mount in kickstart.image_mounts()? {
                    let image = images
                        .iter()
                        .find(|image| {
                            image.file_name().is_some_and(|name| {
                                name.to_string_lossy() == mount.name.as_str()
                            })
                        })
                        .with_context(|| {
                            format!(
                                "Image {} is declared in the kickstart but missing under {}",
                                mount.name,
                                self.images_dir.display()
                            )
                        })?;
                    let target = root.join(mount.mount_point.trim_start_matches('/'));
                    std::fs::create_dir_all(&target)?;
                    stack.push(mount_loop_image(image, &target, runner)?);
                }
            }
        }
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use processes::ScriptedRunner;

    use super::*;

    #[test]
    fn user_supplied_image_wins() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let image = temp_dir.path().join("rootfs.img");
        std::fs::write(&image, "image")?;

        let config = RunConfig {
            preliminary_image: Some(image),
            ..RunConfig::for_tests(temp_dir.path())
        };
        let runner = ScriptedRunner::new();
        let prepared = PreliminaryImage::prepare(&config, &[], &runner)?;
        assert_eq!(prepared.images_dir, temp_dir.path());
        assert!(runner.invocations().is_empty());
        Ok(())
    }

    #[test]
    fn mounts_single_image_at_root() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let images_dir = temp_dir.path().join("images");
        std::fs::create_dir(&images_dir)?;
        std::fs::write(images_dir.join("rootfs.img"), "image")?;
        let root = temp_dir.path().join("root");
        std::fs::create_dir(&root)?;
        let kickstart_path = temp_dir.path().join("image.ks");
        std::fs::write(&kickstart_path, "")?;

        let image = PreliminaryImage { images_dir };
        let runner = ScriptedRunner::new();
        let stack = image.mount(&root, &KickstartFile::new(&kickstart_path), &runner)?;
        stack.leak();

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].contains("rootfs.img"));
        Ok(())
    }

    #[test]
    fn mounts_image_set_by_kickstart_mapping() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let images_dir = temp_dir.path().join("images");
        std::fs::create_dir(&images_dir)?;
        for name in ["rootfs.img", "system-data.img", "user.img"] {
            std::fs::write(images_dir.join(name), "image")?;
        }
        let root = temp_dir.path().join("root");
        std::fs::create_dir(&root)?;
        let kickstart_path = temp_dir.path().join("image.ks");
        std::fs::write(
            &kickstart_path,
            "part /opt/usr --label=user\npart / --label=rootfs\npart /opt --label=system-data\n",
        )?;

        let image = PreliminaryImage { images_dir };
        let runner = ScriptedRunner::new();
        let stack = image.mount(&root, &KickstartFile::new(&kickstart_path), &runner)?;
        stack.leak();

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 3);
        // Depth order: rootfs, then /opt, then /opt/usr.
        assert!(invocations[0].contains("rootfs.img"));
        assert!(invocations[1].contains("system-data.img"));
        assert!(invocations[2].contains("user.img"));
        assert!(root.join("opt/usr").is_dir());
        Ok(())
    }
}
