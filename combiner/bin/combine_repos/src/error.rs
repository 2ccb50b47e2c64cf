// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Errors of the combining pipeline itself. Metadata and graph errors come
/// from the `repomd` and `depgraph` crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Counterpart packages differ in version, which patching cannot fix.
    #[error(
        "Versions of package {name} differ: {original} and {marked}. \
         Please go and rebuild the marked package!"
    )]
    VersionMismatch {
        name: String,
        original: String,
        marked: String,
    },

    /// Marked packages are absent from the marked repository and mirror mode
    /// is off.
    #[error(
        "The following packages were not found in the marked repository: {}\n\
         HINT: use the mirror mode to use original packages instead of them.",
        names.join(", ")
    )]
    MirrorRequired { names: Vec<String> },

    /// A tool the patching chroot needs has no provider in the original
    /// repositories.
    #[error("No package provides {symbol} ({capability}) in any original repository")]
    MissingBootstrapCapability {
        capability: &'static str,
        symbol: String,
    },

    /// A header rewrite failed inside a patching chroot.
    #[error("Rebuilding RPM headers failed: {message}\n{log}")]
    Patcher { message: String, log: String },
}
