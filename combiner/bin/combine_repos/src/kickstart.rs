// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Queries and edits of kickstart files.
//!
//! The pipeline reads repository names, the package scope and the
//! image/mount-point declarations from the kickstart, and rewrites a
//! working copy before handing it to the image builder.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"--name=(\S+)").unwrap();
    static ref BASEURL_RE: Regex = Regex::new(r"\s--baseurl=\S+").unwrap();
    static ref LABEL_RE: Regex = Regex::new(r"--label=(\S+)").unwrap();
    static ref PART_RE: Regex = Regex::new(r"^part\s+(/\S*)").unwrap();
}

/// An image produced by the builder and where it gets mounted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageMount {
    /// The image file name (`<label>.img`).
    pub name: String,
    /// The mount point, `/` for the root image.
    pub mount_point: String,
}

impl ImageMount {
    /// Nesting depth of the mount point; the root is 0. Mounting in depth
    /// order guarantees parents are mounted before children.
    pub fn depth(&self) -> usize {
        let path = self.mount_point.trim_matches('/');
        if path.is_empty() {
            0
        } else {
            path.split('/').count()
        }
    }
}

/// Simple set of functions for simple manipulations with kickstart files.
#[derive(Clone, Debug)]
pub struct KickstartFile {
    path: PathBuf,
}

impl KickstartFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copies the kickstart to `target` and returns a handle editing the
    /// copy. Queries never modify the file, edits always go through a copy.
    pub fn copy_to(&self, target: &Path) -> Result<Self> {
        std::fs::copy(&self.path, target).with_context(|| {
            format!(
                "Failed to copy kickstart {} to {}",
                self.path.display(),
                target.display()
            )
        })?;
        Ok(Self::new(target))
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read kickstart file {}", self.path.display()))
    }

    fn write(&self, contents: &str) -> Result<()> {
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write kickstart file {}", self.path.display()))
    }

    /// The names of repositories that are mentioned in the kickstart file.
    pub fn repository_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for line in self.read()?.lines() {
            if line.starts_with("repo ") {
                for capture in NAME_RE.captures_iter(line) {
                    names.push(capture[1].to_string());
                }
            }
        }
        Ok(names)
    }

    /// The image labels and mount points declared by `part` lines, ordered
    /// by mount point depth.
    pub fn image_mounts(&self) -> Result<Vec<ImageMount>> {
        let mut mounts = Vec::new();
        for line in self.read()?.lines() {
            if !line.starts_with("part /") {
                continue;
            }
            let mount_point = PART_RE.captures(line).map(|c| c[1].to_string());
            let label = LABEL_RE.captures(line).map(|c| c[1].to_string());
            match (label, mount_point) {
                (Some(label), Some(mount_point)) => mounts.push(ImageMount {
                    name: format!("{label}.img"),
                    mount_point,
                }),
                _ => warn!("Could not find image info in {line}"),
            }
        }
        mounts.sort_by_key(|mount| mount.depth());
        debug!("Found these images: {mounts:?}");
        Ok(mounts)
    }

    /// The plain package names of the `%packages` section. Group selections
    /// (`@group`) and excludes (`-name`) do not contribute.
    pub fn package_scope(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut in_packages = false;
        for line in self.read()?.lines() {
            let line = line.trim();
            if in_packages {
                if line.starts_with("%end") {
                    in_packages = false;
                } else if !line.is_empty()
                    && !line.starts_with('@')
                    && !line.starts_with('#')
                    && !line.starts_with('-')
                {
                    names.push(line.to_string());
                }
            } else if line.starts_with("%packages") {
                in_packages = true;
            }
        }
        Ok(names)
    }

    /// Replaces the `--baseurl=` of the named repositories with local
    /// `file://` paths.
    pub fn replace_repository_paths(&self, repositories: &[(String, PathBuf)]) -> Result<()> {
        let mut lines = Vec::new();
        for line in self.read()?.lines() {
            let mut line = line.to_string();
            if line.starts_with("repo ") {
                for (name, path) in repositories {
                    if line.contains(&format!(" --name={name} ")) {
                        line = BASEURL_RE
                            .replace(&line, format!(" --baseurl=file://{}", path.display()))
                            .into_owned();
                        debug!("Writing the following line to kickstart file: {line}");
                    }
                }
            }
            lines.push(line);
        }
        self.write(&(lines.join("\n") + "\n"))
    }

    /// Comments all lines in the `%packages` section that begin with `@`.
    pub fn comment_all_groups(&self) -> Result<()> {
        let mut lines = Vec::new();
        let mut in_packages = false;
        for line in self.read()?.lines() {
            if in_packages {
                if line.starts_with("%end") {
                    in_packages = false;
                    lines.push(line.to_string());
                } else if line.starts_with('@') {
                    lines.push(format!("#{line}"));
                    debug!("Added line #{line}");
                } else {
                    lines.push(line.to_string());
                }
            } else {
                if line.starts_with("%packages") {
                    in_packages = true;
                }
                lines.push(line.to_string());
            }
        }
        self.write(&(lines.join("\n") + "\n"))
    }

    /// Adds packages to the `%packages` section.
    pub fn add_packages(&self, packages: &[String]) -> Result<()> {
        let mut lines = Vec::new();
        for line in self.read()?.lines() {
            lines.push(line.to_string());
            if line.starts_with("%packages") {
                for package in packages {
                    lines.push(package.clone());
                    debug!("Added package {package}");
                }
            }
        }
        self.write(&(lines.join("\n") + "\n"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const KICKSTART: &str = "\
lang en_US.UTF-8
repo --name=base --baseurl=http://example.org/base/ --save
repo --name=extras --baseurl=http://example.org/extras/ --save
part / --size=2000 --ondisk mmcblk0p --fstype=ext4 --label=rootfs
part /opt --size=1000 --ondisk mmcblk0p --fstype=ext4 --label=system-data
part /opt/usr --size=3000 --ondisk mmcblk0p --fstype=ext4 --label=user
%packages
@Base Group
libx
tool
-unwanted
%end
";

    fn kickstart_file(dir: &Path) -> KickstartFile {
        let path = dir.join("image.ks");
        std::fs::write(&path, KICKSTART).unwrap();
        KickstartFile::new(&path)
    }

    #[test]
    fn reads_repository_names() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let kickstart = kickstart_file(temp_dir.path());
        assert_eq!(kickstart.repository_names()?, vec!["base", "extras"]);
        Ok(())
    }

    #[test]
    fn reads_image_mounts_in_depth_order() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let kickstart = kickstart_file(temp_dir.path());
        let mounts = kickstart.image_mounts()?;
        assert_eq!(
            mounts,
            vec![
                ImageMount {
                    name: "rootfs.img".to_string(),
                    mount_point: "/".to_string()
                },
                ImageMount {
                    name: "system-data.img".to_string(),
                    mount_point: "/opt".to_string()
                },
                ImageMount {
                    name: "user.img".to_string(),
                    mount_point: "/opt/usr".to_string()
                },
            ]
        );
        assert_eq!(mounts[0].depth(), 0);
        assert_eq!(mounts[2].depth(), 2);
        Ok(())
    }

    #[test]
    fn reads_package_scope_without_groups_and_excludes() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let kickstart = kickstart_file(temp_dir.path());
        assert_eq!(kickstart.package_scope()?, vec!["libx", "tool"]);
        Ok(())
    }

    #[test]
    fn replaces_repository_paths() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let kickstart = kickstart_file(temp_dir.path());
        let copy = kickstart.copy_to(&temp_dir.path().join("mod.ks"))?;
        copy.replace_repository_paths(&[("base".to_string(), PathBuf::from("/combined/base"))])?;

        let text = std::fs::read_to_string(copy.path())?;
        assert!(text.contains("repo --name=base --baseurl=file:///combined/base --save"));
        assert!(text.contains("--baseurl=http://example.org/extras/"));
        // The original is untouched.
        assert!(std::fs::read_to_string(kickstart.path())?
            .contains("--baseurl=http://example.org/base/"));
        Ok(())
    }

    #[test]
    fn comments_groups_and_adds_packages() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let kickstart = kickstart_file(temp_dir.path());
        let copy = kickstart.copy_to(&temp_dir.path().join("mod.ks"))?;
        copy.comment_all_groups()?;
        copy.add_packages(&["make".to_string(), "sed".to_string()])?;

        let text = std::fs::read_to_string(copy.path())?;
        assert!(text.contains("#@Base Group"));
        assert!(text.contains("\nmake\nsed\n"));
        assert_eq!(copy.package_scope()?, vec!["make", "sed", "libx", "tool"]);
        Ok(())
    }
}
