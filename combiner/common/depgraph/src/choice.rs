// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{collections::BTreeSet, sync::Arc};

use repomd::Package;
use tracing::warn;
use version::VersionComparator;

use crate::{builder::Strategy, Error};

/// Picks the extreme record of a list per the preferring strategy.
///
/// All candidates must carry the same name; the ordering is over the
/// concatenated version and release tokens.
pub(crate) fn extreme_package<'a>(
    candidates: &[&'a Arc<Package>],
    strategy: Strategy,
    comparator: &dyn VersionComparator,
) -> Result<&'a Arc<Package>, Error> {
    debug_assert!(
        candidates.windows(2).all(|w| w[0].name == w[1].name),
        "extreme selection requires equal names"
    );

    let mut extreme = candidates[0];
    for &candidate in &candidates[1..] {
        let order = comparator.compare_version_release(
            (&candidate.version_tokens(), &candidate.release_tokens()),
            (&extreme.version_tokens(), &extreme.release_tokens()),
        )?;
        let wins = match strategy {
            Strategy::Small => order.is_lt(),
            Strategy::Big => order.is_gt(),
        };
        if wins {
            extreme = candidate;
        }
    }
    warn!(
        "Package {} was preferred, because its numbers are the {}",
        extreme.full_name(),
        match strategy {
            Strategy::Small => "smallest",
            Strategy::Big => "biggest",
        }
    );
    Ok(extreme)
}

/// Resolves a symbol with several providers to a single package name.
pub(crate) fn resolve_have_choice(
    symbol: &str,
    providers: &[&Arc<Package>],
    preferables: &[String],
    strategy: Option<Strategy>,
    comparator: &dyn VersionComparator,
) -> Result<String, Error> {
    warn!("Have choice for symbol {symbol}:");
    let mut preferred: Vec<&Arc<Package>> = Vec::new();
    let mut preferred_exact: Vec<&Arc<Package>> = Vec::new();
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut full_names: BTreeSet<String> = BTreeSet::new();
    for &alternative in providers {
        let full_name = alternative.full_name();
        warn!(
            " * {}, version {}, release {}",
            full_name, alternative.version, alternative.release
        );
        if preferables.iter().any(|p| *p == alternative.name) {
            preferred.push(alternative);
        }
        if preferables.iter().any(|p| *p == full_name) {
            preferred_exact.push(alternative);
        }
        names.insert(alternative.name.clone());
        full_names.insert(full_name);
    }

    if preferred_exact.len() == 1 {
        let chosen = preferred_exact[0];
        warn!(
            "Package full name {} is specified as preferable and will be used to resolve this choice.",
            chosen.full_name()
        );
        return Ok(chosen.name.clone());
    }
    if preferred.len() == 1 {
        let chosen = preferred[0];
        warn!(
            "Package name {} is specified as preferable and will be used to resolve this choice.",
            chosen.name
        );
        return Ok(chosen.name.clone());
    }

    // Several preferables matched: narrow the choice to them before trying
    // the strategy.
    let narrowed: Vec<&Arc<Package>> = if preferred_exact.len() > 1 {
        preferred_exact
    } else if preferred.len() > 1 {
        preferred
    } else {
        providers.to_vec()
    };

    // The strategy can only break ties among records of one name.
    if let Some(strategy) = strategy {
        let narrowed_names: BTreeSet<&str> =
            narrowed.iter().map(|p| p.name.as_str()).collect();
        if narrowed_names.len() == 1 {
            return Ok(extreme_package(&narrowed, strategy, comparator)?.name.clone());
        }
    }

    Err(Error::HaveChoice {
        symbol: symbol.to_string(),
        candidates: narrowed.iter().map(|p| p.full_name()).collect(),
        need_full_names: names.len() != full_names.len(),
    })
}
