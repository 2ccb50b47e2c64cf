// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Errors surfaced while building graphs or computing the marked set.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two records share a name and no preferring strategy was given.
    #[error(
        "Several packages share one name and no preferring strategy is set: {}",
        names.join(", ")
    )]
    DuplicatePackage { names: Vec<String> },

    /// Version token lists cannot be ordered.
    #[error(transparent)]
    IncomparableVersions(#[from] version::Error),

    /// A required symbol has several providers and nothing disambiguates.
    #[error(
        "Have choice for symbol {symbol}: {}; specify one and only one {} name as preferable",
        candidates.join(", "),
        if *need_full_names { "FULL" } else { "SHORT" }
    )]
    HaveChoice {
        symbol: String,
        candidates: Vec<String>,
        /// Whether short names are ambiguous, so the user must pick a full
        /// name.
        need_full_names: bool,
    },

    /// Greedy mode was combined with explicit selection directives.
    #[error("Greedy mode cannot be combined with package selection directives")]
    GreedyModeConflict,

    /// A directive names a package that no repository's graph contains.
    #[error(
        "Package {name} is unknown to all repositories{}",
        if hints.is_empty() { String::new() } else { format!("; did you mean: {}", hints.join(", ")) }
    )]
    UnknownPackage { name: String, hints: Vec<String> },
}
