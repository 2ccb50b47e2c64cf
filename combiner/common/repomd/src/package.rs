// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{collections::BTreeSet, path::PathBuf};

use serde::Serialize;
use strum_macros::{Display, EnumString};

/// The comparison operator of a versioned requirement.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize)]
pub enum Relation {
    #[strum(serialize = "EQ")]
    Equal,
    #[strum(serialize = "GE")]
    GreaterOrEqual,
    #[strum(serialize = "LE")]
    LessOrEqual,
    #[strum(serialize = "GT")]
    Greater,
    #[strum(serialize = "LT")]
    Less,
}

impl Relation {
    /// The operator as it is spelled in a spec file `Requires:` line.
    pub fn as_operator(&self) -> &'static str {
        match self {
            Relation::Equal => "=",
            Relation::GreaterOrEqual => ">=",
            Relation::LessOrEqual => "<=",
            Relation::Greater => ">",
            Relation::Less => "<",
        }
    }
}

/// One required symbol of a package with its optional version constraint.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct Requirement {
    pub symbol: String,
    pub relation: Option<Relation>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
}

impl Requirement {
    pub fn unversioned(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            relation: None,
            epoch: None,
            version: None,
            release: None,
        }
    }

    /// The constraint coordinates compared when diffing two requirement
    /// lists. The symbol itself is the key and is not part of the tuple.
    pub fn constraint(&self) -> (Option<Relation>, &Option<String>, &Option<String>, &Option<String>) {
        (self.relation, &self.epoch, &self.version, &self.release)
    }

    /// Renders the canonical `Requires:` expression: the bare symbol, or
    /// `symbol <op> version[-release]`.
    pub fn canonical_expression(&self) -> String {
        match (self.relation, self.version.as_deref()) {
            (Some(relation), Some(version)) => match self.release.as_deref() {
                Some(release) => format!(
                    "{} {} {}-{}",
                    self.symbol,
                    relation.as_operator(),
                    version,
                    release
                ),
                None => format!("{} {} {}", self.symbol, relation.as_operator(), version),
            },
            _ => self.symbol.clone(),
        }
    }
}

/// One package of a repository, as enumerated by the index.
///
/// Records are created by the metadata loader and immutable afterwards;
/// graphs share them behind `Arc`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Package {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    /// Absolute path of the `.rpm` file on disk.
    pub location: PathBuf,
    /// Declared provides. File paths act as additional implicit provides and
    /// are kept separately in `files`.
    pub provides: BTreeSet<String>,
    pub requires: Vec<Requirement>,
    pub files: BTreeSet<String>,
}

impl Package {
    /// `name-version-release.arch`, the conventional full name.
    pub fn full_name(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.name, self.version, self.release, self.arch
        )
    }

    /// The conventional file name of the package.
    pub fn file_name(&self) -> String {
        format!("{}.rpm", self.full_name())
    }

    pub fn version_tokens(&self) -> Vec<String> {
        version::tokenize(&self.version)
    }

    pub fn release_tokens(&self) -> Vec<String> {
        version::tokenize(&self.release)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn relation_round_trip() {
        assert_eq!(Relation::from_str("GE").unwrap(), Relation::GreaterOrEqual);
        assert_eq!(Relation::GreaterOrEqual.to_string(), "GE");
        assert_eq!(Relation::GreaterOrEqual.as_operator(), ">=");
        assert!(Relation::from_str("??").is_err());
    }

    #[test]
    fn canonical_expressions() {
        let bare = Requirement::unversioned("libc");
        assert_eq!(bare.canonical_expression(), "libc");

        let versioned = Requirement {
            symbol: "libc".to_string(),
            relation: Some(Relation::GreaterOrEqual),
            epoch: Some("0".to_string()),
            version: Some("2.17".to_string()),
            release: None,
        };
        assert_eq!(versioned.canonical_expression(), "libc >= 2.17");

        let with_release = Requirement {
            release: Some("3".to_string()),
            relation: Some(Relation::Equal),
            ..versioned
        };
        assert_eq!(with_release.canonical_expression(), "libc = 2.17-3");
    }

    #[test]
    fn full_name_formatting() {
        let package = Package {
            name: "libx".to_string(),
            epoch: "0".to_string(),
            version: "1.0".to_string(),
            release: "5".to_string(),
            arch: "armv7l".to_string(),
            location: PathBuf::from("/repo/armv7l/libx-1.0-5.armv7l.rpm"),
            provides: BTreeSet::new(),
            requires: Vec::new(),
            files: BTreeSet::new(),
        };
        assert_eq!(package.full_name(), "libx-1.0-5.armv7l");
        assert_eq!(package.file_name(), "libx-1.0-5.armv7l.rpm");
        assert_eq!(package.version_tokens(), vec!["1", "0"]);
    }
}
