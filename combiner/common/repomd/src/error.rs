// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

/// Errors surfaced while reading repository metadata.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The repository index is absent or cannot be decoded.
    #[error("Repository index at {path} is unreadable: {reason}")]
    Metadata { path: PathBuf, reason: String },

    /// A package is listed in the index but its file is nowhere on disk.
    #[error("Package {package} has no file under {root}")]
    LocationNotFound { package: String, root: PathBuf },
}
