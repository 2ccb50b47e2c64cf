// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reading of repository metadata (`repodata/`) into package records.
//!
//! The index format is what the repository indexer produces: a
//! `repodata/repomd.xml` table of contents pointing at a gzip-compressed
//! `primary.xml` enumerating every package with its provides, requires and
//! file list.

mod error;
mod loader;
mod package;
pub mod repository;
mod xml;

pub use error::Error;
pub use loader::load_packages;
pub use package::{Package, Relation, Requirement};
pub use repository::RepositoryData;
