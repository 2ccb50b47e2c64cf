// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Serde shapes of `repomd.xml` and `primary.xml`.

use serde::Deserialize;

/// `repodata/repomd.xml`: the table of contents of the index.
#[derive(Debug, Deserialize)]
pub struct Repomd {
    #[serde(rename = "data", default)]
    pub data: Vec<RepomdData>,
}

#[derive(Debug, Deserialize)]
pub struct RepomdData {
    #[serde(rename = "@type")]
    pub kind: String,
    pub location: Location,
}

#[derive(Debug, Deserialize)]
pub struct Location {
    #[serde(rename = "@href")]
    pub href: String,
}

/// The root element of `primary.xml`.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    #[serde(rename = "package", default)]
    pub packages: Vec<PackageElement>,
}

#[derive(Debug, Deserialize)]
pub struct PackageElement {
    pub name: String,
    pub arch: String,
    pub version: VersionElement,
    pub location: Location,
    #[serde(default)]
    pub format: FormatElement,
}

#[derive(Debug, Deserialize)]
pub struct VersionElement {
    #[serde(rename = "@epoch", default)]
    pub epoch: String,
    #[serde(rename = "@ver")]
    pub ver: String,
    #[serde(rename = "@rel")]
    pub rel: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatElement {
    #[serde(rename = "rpm:provides", alias = "provides", default)]
    pub provides: EntryList,
    #[serde(rename = "rpm:requires", alias = "requires", default)]
    pub requires: EntryList,
    #[serde(rename = "file", default)]
    pub files: Vec<FileElement>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntryList {
    #[serde(rename = "rpm:entry", alias = "entry", default)]
    pub entries: Vec<EntryElement>,
}

#[derive(Debug, Deserialize)]
pub struct EntryElement {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@flags")]
    pub flags: Option<String>,
    #[serde(rename = "@epoch")]
    pub epoch: Option<String>,
    #[serde(rename = "@ver")]
    pub ver: Option<String>,
    #[serde(rename = "@rel")]
    pub rel: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FileElement {
    #[serde(rename = "@type")]
    pub kind: Option<String>,
    #[serde(rename = "$text", default)]
    pub path: String,
}

/// The root element of `filelists.xml`: the complete per-package file
/// lists, split out of `primary.xml` by the indexer.
#[derive(Debug, Deserialize)]
pub struct Filelists {
    #[serde(rename = "package", default)]
    pub packages: Vec<FilelistsPackage>,
}

#[derive(Debug, Deserialize)]
pub struct FilelistsPackage {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@arch")]
    pub arch: String,
    pub version: VersionElement,
    #[serde(rename = "file", default)]
    pub files: Vec<FileElement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
  <package type="rpm">
    <name>libx</name>
    <arch>armv7l</arch>
    <version epoch="0" ver="1.0" rel="5"/>
    <location href="armv7l/libx-1.0-5.armv7l.rpm"/>
    <format>
      <rpm:provides>
        <rpm:entry name="libx" flags="EQ" epoch="0" ver="1.0" rel="5"/>
        <rpm:entry name="libx.so.1"/>
      </rpm:provides>
      <rpm:requires>
        <rpm:entry name="libc" flags="GE" ver="2.17"/>
        <rpm:entry name="rpmlib(PayloadIsLzma)"/>
      </rpm:requires>
      <file>/usr/lib/libx.so.1</file>
      <file type="dir">/usr/share/libx</file>
    </format>
  </package>
</metadata>
"#;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <location href="repodata/primary.xml.gz"/>
  </data>
  <data type="filelists">
    <location href="repodata/filelists.xml.gz"/>
  </data>
</repomd>
"#;

    const FILELISTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<filelists xmlns="http://linux.duke.edu/metadata/filelists" packages="1">
  <package pkgid="abc" name="libx" arch="armv7l">
    <version epoch="0" ver="1.0" rel="5"/>
    <file>/usr/lib/libx.so.1</file>
    <file>/etc/libx.conf</file>
    <file type="dir">/usr/share/libx</file>
  </package>
</filelists>
"#;

    #[test]
    fn parses_filelists() {
        let filelists: Filelists = quick_xml::de::from_str(FILELISTS).unwrap();
        assert_eq!(filelists.packages.len(), 1);
        let package = &filelists.packages[0];
        assert_eq!(package.name, "libx");
        assert_eq!(package.version.rel, "5");
        assert_eq!(package.files.len(), 3);
        assert_eq!(package.files[1].path, "/etc/libx.conf");
    }

    #[test]
    fn parses_repomd() {
        let repomd: Repomd = quick_xml::de::from_str(REPOMD).unwrap();
        assert_eq!(repomd.data.len(), 2);
        assert_eq!(repomd.data[0].kind, "primary");
        assert_eq!(repomd.data[0].location.href, "repodata/primary.xml.gz");
    }

    #[test]
    fn parses_primary() {
        let metadata: Metadata = quick_xml::de::from_str(PRIMARY).unwrap();
        assert_eq!(metadata.packages.len(), 1);
        let package = &metadata.packages[0];
        assert_eq!(package.name, "libx");
        assert_eq!(package.version.ver, "1.0");
        assert_eq!(package.version.rel, "5");
        assert_eq!(package.format.provides.entries.len(), 2);
        assert_eq!(package.format.requires.entries.len(), 2);
        assert_eq!(package.format.requires.entries[0].flags.as_deref(), Some("GE"));
        assert_eq!(package.format.files.len(), 2);
        assert_eq!(package.format.files[0].path, "/usr/lib/libx.so.1");
        assert_eq!(package.format.files[1].kind.as_deref(), Some("dir"));
    }
}
