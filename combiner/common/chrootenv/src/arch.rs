// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Names that are synonyms of or compatible with the given architecture.
pub fn architecture_synonyms(architecture: &str) -> Vec<String> {
    let mut synonyms: Vec<String> = if architecture.contains("arm64") || architecture.contains("aarch64")
    {
        vec!["aarch64".to_string(), "arm64".to_string()]
    } else if architecture.contains("arm") {
        vec!["arm".to_string()]
    } else if architecture.contains("x86_64") || architecture.contains("86") {
        vec!["x86_64".to_string(), "x86".to_string()]
    } else {
        Vec::new()
    };
    if !synonyms.iter().any(|s| s == architecture) {
        synonyms.push(architecture.to_string());
    }
    synonyms
}

/// Whether binaries of `target` run natively on a `host` machine, i.e. no
/// emulator is needed.
pub fn is_architecture_compatible(host: &str, target: &str) -> bool {
    architecture_synonyms(target).iter().any(|s| s == host)
}
