// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use flate2::read::GzDecoder;
use tracing::debug;

use std::collections::BTreeMap;

use crate::{
    xml::{Filelists, Metadata, PackageElement, Repomd},
    Error, Package, Relation, Requirement,
};

/// File names containing this substring are sentinels that must never enter
/// the package set.
const SENTINEL_MARKER: &str = "dontuse";

/// Loads the package records of the repository rooted at `root`.
///
/// Dropped records: sentinel file names, architectures other than the
/// requested one or `noarch`, and debug companion packages
/// (`*debuginfo*`/`*debugsource*`).
///
/// `primary.xml` only carries a subset of each package's files; the
/// complete lists live in `filelists.xml` and are merged in when the index
/// has one. File lists feed the conflict audit and act as implicit
/// provides, so completeness matters.
pub fn load_packages(root: &Path, arch: &str) -> Result<Vec<Arc<Package>>, Error> {
    let repomd_path = root.join("repodata/repomd.xml");
    let repomd: Repomd = parse_xml_file(&repomd_path)?;

    let primary_href = repomd
        .data
        .iter()
        .find(|data| data.kind == "primary")
        .map(|data| data.location.href.clone())
        .ok_or_else(|| Error::Metadata {
            path: repomd_path.clone(),
            reason: "no primary entry".to_string(),
        })?;

    let primary_path = root.join(&primary_href);
    let metadata: Metadata = parse_xml_file(&primary_path)?;
    debug!(
        "Index of {} lists {} packages",
        root.display(),
        metadata.packages.len()
    );

    let file_lists = load_file_lists(root, &repomd)?;

    let mut packages = Vec::new();
    for element in metadata.packages {
        if element.arch != arch && element.arch != "noarch" {
            debug!(
                "Dropping {}: architecture {} is neither {} nor noarch",
                element.name, element.arch, arch
            );
            continue;
        }
        if element.name.contains("debuginfo") || element.name.contains("debugsource") {
            continue;
        }
        if element.location.href.contains(SENTINEL_MARKER) {
            debug!("Dropping sentinel package file {}", element.location.href);
            continue;
        }
        let mut package = to_package(root, element)?;
        if let Some(files) = file_lists.get(&file_list_key(
            &package.name,
            &package.arch,
            &package.version,
            &package.release,
        )) {
            package.files.extend(files.iter().cloned());
        }
        packages.push(Arc::new(package));
    }
    Ok(packages)
}

fn file_list_key(name: &str, arch: &str, version: &str, release: &str) -> String {
    format!("{name}\0{arch}\0{version}\0{release}")
}

/// Reads the complete file lists, keyed by package identity. A repository
/// without a `filelists` entry yields the empty map.
fn load_file_lists(root: &Path, repomd: &Repomd) -> Result<BTreeMap<String, Vec<String>>, Error> {
    let Some(href) = repomd
        .data
        .iter()
        .find(|data| data.kind == "filelists")
        .map(|data| data.location.href.clone())
    else {
        return Ok(BTreeMap::new());
    };
    let filelists: Filelists = parse_xml_file(&root.join(href))?;

    let mut lists = BTreeMap::new();
    for package in filelists.packages {
        let files: Vec<String> = package
            .files
            .iter()
            .filter(|file| file.kind.as_deref() != Some("dir"))
            .map(|file| file.path.clone())
            .collect();
        lists.insert(
            file_list_key(
                &package.name,
                &package.arch,
                &package.version.ver,
                &package.version.rel,
            ),
            files,
        );
    }
    Ok(lists)
}

fn parse_xml_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let file = File::open(path).map_err(|error| Error::Metadata {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?;
    let reader = BufReader::new(file);
    let text = if path.extension().is_some_and(|e| e == "gz") {
        let mut decoder = GzDecoder::new(reader);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|error| Error::Metadata {
                path: path.to_path_buf(),
                reason: format!("gzip decode failed: {error}"),
            })?;
        text
    } else {
        std::fs::read_to_string(path).map_err(|error| Error::Metadata {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?
    };
    quick_xml::de::from_str(&text).map_err(|error| Error::Metadata {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

fn to_package(root: &Path, element: PackageElement) -> Result<Package, Error> {
    let provides: BTreeSet<String> = element
        .format
        .provides
        .entries
        .iter()
        .map(|entry| entry.name.clone())
        .collect();

    let requires: Vec<Requirement> = element
        .format
        .requires
        .entries
        .iter()
        .map(|entry| Requirement {
            symbol: entry.name.clone(),
            // Unknown flags degrade to an unversioned requirement rather
            // than failing the whole load.
            relation: entry
                .flags
                .as_deref()
                .and_then(|flags| Relation::from_str(flags).ok()),
            epoch: entry.epoch.clone(),
            version: entry.ver.clone(),
            release: entry.rel.clone(),
        })
        .collect();

    let files: BTreeSet<String> = element
        .format
        .files
        .iter()
        .filter(|file| file.kind.as_deref() != Some("dir"))
        .map(|file| file.path.clone())
        .collect();

    let mut package = Package {
        name: element.name,
        epoch: element.version.epoch,
        version: element.version.ver,
        release: element.version.rel,
        arch: element.arch,
        location: PathBuf::new(),
        provides,
        requires,
        files,
    };
    package.location = resolve_location(root, &element.location.href, &package)?;
    Ok(package)
}

/// Resolves the on-disk location of a package file.
///
/// The index's `href` is authoritative; when the file moved, the well-known
/// layouts (`<arch>/`, `noarch/`, the root) are probed by file name before
/// falling back to a full scan.
fn resolve_location(root: &Path, href: &str, package: &Package) -> Result<PathBuf, Error> {
    let location = root.join(href);
    if location.is_file() {
        return Ok(location);
    }

    let file_name = package.file_name();
    for candidate in [
        root.join(&package.arch).join(&file_name),
        root.join("noarch").join(&file_name),
        root.join(&file_name),
    ] {
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(|error| Error::Metadata {
            path: root.to_path_buf(),
            reason: error.to_string(),
        })?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().as_ref() == file_name
        {
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(Error::LocationNotFound {
        package: package.full_name(),
        root: root.to_path_buf(),
    })
}
