// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The minimal toolchain the patching chroot needs, resolved to package
//! names through the original repositories' provider indexes.

use depgraph::DependencyGraph;
use tracing::debug;

use crate::Error;

/// The capabilities the header rewrite needs inside the chroot, as the
/// symbols their providers install.
pub const BOOTSTRAP_CAPABILITIES: &[(&str, &str)] = &[
    ("user management", "/usr/sbin/useradd"),
    ("directory creation", "/bin/mkdir"),
    ("pattern matching", "/bin/grep"),
    ("archive copy", "/bin/cpio"),
    ("make driver", "/usr/bin/make"),
    ("rpm build", "/usr/bin/rpmbuild"),
    ("stream editing", "/bin/sed"),
];

/// Provider names that belong to foreign or bootstrap toolchains and must
/// never enter the preliminary image of a target-architecture chroot.
const EXCLUDED_PROVIDER_TOKENS: &[&str] = &["mic-bootstrap", "x86", "x64"];

/// Computes the package list installing the minimal toolchain.
///
/// Each capability resolves through the graphs' symbol provider indexes;
/// the first eligible provider (in graph order) wins.
pub fn minimal_packages(graphs: &[&DependencyGraph]) -> Result<Vec<String>, Error> {
    let mut packages = Vec::new();
    for (capability, symbol) in BOOTSTRAP_CAPABILITIES {
        let mut chosen: Option<String> = None;
        for graph in graphs {
            for provider in graph.provider_names(symbol) {
                if EXCLUDED_PROVIDER_TOKENS
                    .iter()
                    .any(|token| provider.contains(token))
                {
                    debug!("Skipping bootstrap provider {provider} for {symbol}");
                    continue;
                }
                chosen = Some(provider);
                break;
            }
            if chosen.is_some() {
                break;
            }
        }
        let provider = chosen.ok_or_else(|| Error::MissingBootstrapCapability {
            capability,
            symbol: symbol.to_string(),
        })?;
        if !packages.contains(&provider) {
            packages.push(provider);
        }
    }
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_providers(providers: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (symbol, provider) in providers {
            graph
                .symbol_providers
                .insert(symbol.to_string(), provider.to_string());
        }
        graph
    }

    fn full_tool_set() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/usr/sbin/useradd", "shadow-utils"),
            ("/bin/mkdir", "coreutils"),
            ("/bin/grep", "grep"),
            ("/bin/cpio", "cpio"),
            ("/usr/bin/make", "make"),
            ("/usr/bin/rpmbuild", "rpm-build"),
            ("/bin/sed", "sed"),
        ]
    }

    #[test]
    fn resolves_all_capabilities() {
        let graph = graph_with_providers(&full_tool_set());
        let packages = minimal_packages(&[&graph]).unwrap();
        assert_eq!(
            packages,
            vec!["shadow-utils", "coreutils", "grep", "cpio", "make", "rpm-build", "sed"]
        );
    }

    #[test]
    fn bootstrap_providers_are_excluded() {
        let mut providers = full_tool_set();
        providers[4] = ("/usr/bin/make", "mic-bootstrap-make");
        let graph = graph_with_providers(&providers);
        let error = minimal_packages(&[&graph]).unwrap_err();
        assert!(
            matches!(&error, Error::MissingBootstrapCapability { symbol, .. }
                if symbol == "/usr/bin/make"),
            "{error}"
        );

        // A second repository can still provide the tool.
        let fallback = graph_with_providers(&[("/usr/bin/make", "make")]);
        let graph = graph_with_providers(&providers);
        let packages = minimal_packages(&[&graph, &fallback]).unwrap();
        assert!(packages.contains(&"make".to_string()));
    }

    #[test]
    fn missing_capability_fails() {
        let graph = graph_with_providers(&full_tool_set()[..6]);
        let error = minimal_packages(&[&graph]).unwrap_err();
        assert!(matches!(error, Error::MissingBootstrapCapability { .. }));
    }
}
