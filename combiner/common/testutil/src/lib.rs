// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Test fixtures: on-disk fake repositories with an index the metadata
//! loader can read, without involving the real indexer.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use flate2::{write::GzEncoder, Compression};

/// One requirement entry of a fake package.
#[derive(Clone, Debug, Default)]
pub struct FakeRequirement {
    pub symbol: String,
    pub flags: Option<String>,
    pub ver: Option<String>,
    pub rel: Option<String>,
}

impl FakeRequirement {
    pub fn unversioned(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    pub fn versioned(symbol: &str, flags: &str, ver: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            flags: Some(flags.to_string()),
            ver: Some(ver.to_string()),
            rel: None,
        }
    }
}

/// One package of a fake repository.
#[derive(Clone, Debug)]
pub struct FakePackage {
    pub name: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub provides: Vec<String>,
    pub requires: Vec<FakeRequirement>,
    pub files: Vec<String>,
    /// Whether to write the `.rpm` payload file on disk.
    pub payload: bool,
    /// Sentinel packages get `dontuse` embedded in their file name.
    pub sentinel: bool,
}

impl FakePackage {
    pub fn new(name: &str, version: &str, release: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
            provides: vec![name.to_string()],
            requires: Vec::new(),
            files: Vec::new(),
            payload: true,
            sentinel: false,
        }
    }

    fn file_name(&self) -> String {
        let marker = if self.sentinel { ".dontuse" } else { "" };
        format!(
            "{}-{}-{}.{}{}.rpm",
            self.name, self.version, self.release, self.arch, marker
        )
    }
}

/// Builds a repository directory: package payload files plus
/// `repodata/repomd.xml` and `repodata/primary.xml.gz`.
pub struct FakeRepoBuilder {
    arch: String,
    packages: Vec<FakePackage>,
}

impl FakeRepoBuilder {
    pub fn new(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            packages: Vec::new(),
        }
    }

    pub fn add(mut self, package: FakePackage) -> Self {
        self.packages.push(package);
        self
    }

    /// A package of the repository architecture requiring bare symbols.
    pub fn package(self, name: &str, version: &str, release: &str, requires: &[&str]) -> Self {
        let arch = self.arch.clone();
        self.package_with_arch(name, version, release, &arch, requires)
    }

    pub fn package_with_arch(
        mut self,
        name: &str,
        version: &str,
        release: &str,
        arch: &str,
        requires: &[&str],
    ) -> Self {
        let mut package = FakePackage::new(name, version, release, arch);
        package.requires = requires
            .iter()
            .map(|symbol| FakeRequirement::unversioned(symbol))
            .collect();
        self.packages.push(package);
        self
    }

    pub fn sentinel_package(mut self, name: &str, version: &str, release: &str) -> Self {
        let mut package = FakePackage::new(name, version, release, &self.arch.clone());
        package.sentinel = true;
        self.packages.push(package);
        self
    }

    pub fn package_without_payload(mut self, name: &str, version: &str, release: &str) -> Self {
        let mut package = FakePackage::new(name, version, release, &self.arch.clone());
        package.payload = false;
        self.packages.push(package);
        self
    }

    pub fn build(self) -> Result<FakeRepo> {
        let dir = tempfile::tempdir()?;
        self.build_at(dir.path())?;
        Ok(FakeRepo { dir })
    }

    /// Writes the repository into an existing directory.
    ///
    /// Mirrors the indexer's split: `primary.xml` carries only the
    /// "primary" files (`/etc` and `bin/` paths), `filelists.xml` carries
    /// every file.
    pub fn build_at(&self, root: &Path) -> Result<()> {
        let repodata = root.join("repodata");
        std::fs::create_dir_all(&repodata)?;

        let mut primary = String::new();
        primary.push_str(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <metadata xmlns=\"http://linux.duke.edu/metadata/common\" \
             xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\" packages=\"",
        );
        primary.push_str(&self.packages.len().to_string());
        primary.push_str("\">\n");
        for package in &self.packages {
            let href = format!("{}/{}", package.arch, package.file_name());
            primary.push_str(&format!(
                "  <package type=\"rpm\">\n    <name>{}</name>\n    <arch>{}</arch>\n    \
                 <version epoch=\"0\" ver=\"{}\" rel=\"{}\"/>\n    <location href=\"{}\"/>\n    <format>\n",
                escape(&package.name),
                package.arch,
                package.version,
                package.release,
                href,
            ));
            primary.push_str("      <rpm:provides>\n");
            for symbol in &package.provides {
                primary.push_str(&format!(
                    "        <rpm:entry name=\"{}\"/>\n",
                    escape(symbol)
                ));
            }
            primary.push_str("      </rpm:provides>\n      <rpm:requires>\n");
            for requirement in &package.requires {
                primary.push_str(&format!(
                    "        <rpm:entry name=\"{}\"",
                    escape(&requirement.symbol)
                ));
                if let Some(flags) = &requirement.flags {
                    primary.push_str(&format!(" flags=\"{flags}\""));
                }
                if let Some(ver) = &requirement.ver {
                    primary.push_str(&format!(" ver=\"{ver}\""));
                }
                if let Some(rel) = &requirement.rel {
                    primary.push_str(&format!(" rel=\"{rel}\""));
                }
                primary.push_str("/>\n");
            }
            primary.push_str("      </rpm:requires>\n");
            for file in &package.files {
                if file.starts_with("/etc") || file.contains("bin/") {
                    primary.push_str(&format!("      <file>{}</file>\n", escape(file)));
                }
            }
            primary.push_str("    </format>\n  </package>\n");

            if package.payload {
                let payload = root.join(&href);
                std::fs::create_dir_all(payload.parent().unwrap())?;
                std::fs::write(&payload, format!("fake rpm {}", package.file_name()))?;
            }
        }
        primary.push_str("</metadata>\n");

        let mut filelists = String::new();
        filelists.push_str(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <filelists xmlns=\"http://linux.duke.edu/metadata/filelists\" packages=\"",
        );
        filelists.push_str(&self.packages.len().to_string());
        filelists.push_str("\">\n");
        for package in &self.packages {
            filelists.push_str(&format!(
                "  <package pkgid=\"0\" name=\"{}\" arch=\"{}\">\n    \
                 <version epoch=\"0\" ver=\"{}\" rel=\"{}\"/>\n",
                escape(&package.name),
                package.arch,
                package.version,
                package.release,
            ));
            for file in &package.files {
                filelists.push_str(&format!("    <file>{}</file>\n", escape(file)));
            }
            filelists.push_str("  </package>\n");
        }
        filelists.push_str("</filelists>\n");

        for (name, contents) in [("primary.xml.gz", primary), ("filelists.xml.gz", filelists)] {
            let mut encoder = GzEncoder::new(
                std::fs::File::create(repodata.join(name))?,
                Compression::fast(),
            );
            encoder.write_all(contents.as_bytes())?;
            encoder.finish()?;
        }

        std::fs::write(
            repodata.join("repomd.xml"),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <repomd xmlns=\"http://linux.duke.edu/metadata/repo\">\n\
               <data type=\"primary\">\n\
                 <location href=\"repodata/primary.xml.gz\"/>\n\
               </data>\n\
               <data type=\"filelists\">\n\
                 <location href=\"repodata/filelists.xml.gz\"/>\n\
               </data>\n\
             </repomd>\n",
        )?;
        Ok(())
    }
}

/// A fake repository rooted in a temporary directory.
pub struct FakeRepo {
    dir: tempfile::TempDir,
}

impl FakeRepo {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The on-disk payload path of a package written by the builder.
    pub fn package_path(&self, arch: &str, file_name: &str) -> PathBuf {
        self.dir.path().join(arch).join(file_name)
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_repo_layout() -> Result<()> {
        let repo = FakeRepoBuilder::new("armv7l")
            .package("libx", "1.0", "5", &["libc"])
            .build()?;

        assert!(repo.path().join("repodata/repomd.xml").is_file());
        assert!(repo.path().join("repodata/primary.xml.gz").is_file());
        assert!(repo
            .package_path("armv7l", "libx-1.0-5.armv7l.rpm")
            .is_file());
        Ok(())
    }
}
