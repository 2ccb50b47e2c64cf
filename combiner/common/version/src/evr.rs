// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::Ordering;

use crate::{join, Error, VersionComparator};

/// rpm's segment-wise version ordering (`rpmvercmp`), total over any pair of
/// token lists. Numeric segments compare as numbers, alphabetic segments as
/// strings, numbers sort above letters, and tilde segments sort below
/// everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct EvrComparator;

impl VersionComparator for EvrComparator {
    fn compare(&self, left: &[String], right: &[String]) -> Result<Ordering, Error> {
        Ok(rpmvercmp(&join(left), &join(right)))
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Tilde,
    Numeric(&'a str),
    Alpha(&'a str),
}

fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'~' {
            out.push(Segment::Tilde);
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            out.push(Segment::Numeric(&s[start..i]));
        } else if c.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            out.push(Segment::Alpha(&s[start..i]));
        } else {
            // Separators only delimit segments.
            i += 1;
        }
    }
    out
}

fn compare_numeric(left: &str, right: &str) -> Ordering {
    let left = left.trim_start_matches('0');
    let right = right.trim_start_matches('0');
    match left.len().cmp(&right.len()) {
        Ordering::Equal => left.cmp(right),
        other => other,
    }
}

/// Compares two version strings the way rpm does.
pub fn rpmvercmp(left: &str, right: &str) -> Ordering {
    if left == right {
        return Ordering::Equal;
    }
    let left_segments = segments(left);
    let right_segments = segments(right);

    let mut i = 0;
    loop {
        match (left_segments.get(i), right_segments.get(i)) {
            (None, None) => return Ordering::Equal,
            // A tilde segment sorts below the end of the string.
            (Some(Segment::Tilde), None) => return Ordering::Less,
            (None, Some(Segment::Tilde)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let order = match (l, r) {
                    (Segment::Tilde, Segment::Tilde) => Ordering::Equal,
                    (Segment::Tilde, _) => Ordering::Less,
                    (_, Segment::Tilde) => Ordering::Greater,
                    (Segment::Numeric(l), Segment::Numeric(r)) => compare_numeric(l, r),
                    // Numbers sort above letters.
                    (Segment::Numeric(_), Segment::Alpha(_)) => Ordering::Greater,
                    (Segment::Alpha(_), Segment::Numeric(_)) => Ordering::Less,
                    (Segment::Alpha(l), Segment::Alpha(r)) => l.cmp(r),
                };
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
        i += 1;
    }
}
