// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Version and release number comparison for package records.
//!
//! Versions are carried as dot-separated token lists. Two comparison
//! policies are provided behind the [`VersionComparator`] trait:
//! [`TokenComparator`], which compares tokens as plain strings and refuses
//! token lists of different arity, and [`EvrComparator`], which implements
//! rpm's segment-wise version ordering and is total.

use std::cmp::Ordering;

mod evr;

pub use evr::EvrComparator;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Token lists of different arity cannot be ordered token-wise.
    #[error("Versions {left:?} and {right:?} are incomparable: token counts differ")]
    Incomparable { left: String, right: String },
}

/// Splits a version or release string into its dot-separated tokens.
pub fn tokenize(s: &str) -> Vec<String> {
    s.split('.').map(|t| t.to_string()).collect()
}

/// Joins tokens back into the dotted form.
pub fn join(tokens: &[String]) -> String {
    tokens.join(".")
}

/// Orders version/release token lists.
///
/// Implementations must be deterministic; whether they are total is policy.
pub trait VersionComparator: Send + Sync {
    fn compare(&self, left: &[String], right: &[String]) -> Result<Ordering, Error>;

    /// Orders two packages by their concatenated version and release tokens.
    /// This is the ordering used for choosing the extreme of two same-named
    /// records.
    fn compare_version_release(
        &self,
        left: (&[String], &[String]),
        right: (&[String], &[String]),
    ) -> Result<Ordering, Error> {
        let combined_left: Vec<String> = left.0.iter().chain(left.1.iter()).cloned().collect();
        let combined_right: Vec<String> = right.0.iter().chain(right.1.iter()).cloned().collect();
        self.compare(&combined_left, &combined_right)
    }
}

/// Token-wise string comparison.
///
/// Tokens are compared as strings, not numbers, so "10" sorts before "9".
/// Lists of different length fail instead of being padded; the caller is
/// expected to surface that to the user as an incomparable-versions error.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenComparator;

impl VersionComparator for TokenComparator {
    fn compare(&self, left: &[String], right: &[String]) -> Result<Ordering, Error> {
        if left.len() != right.len() {
            return Err(Error::Incomparable {
                left: join(left),
                right: join(right),
            });
        }
        for (l, r) in left.iter().zip(right.iter()) {
            match l.cmp(r) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }
}
