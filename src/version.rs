//! Version ordering for registry records.
//!
//! Versions are split on `.` and `-` into segments, and each segment into
//! runs of digits and runs of everything else (`1rc2` is `1`, `rc`, `2`).
//! Digit runs compare as integers of any length, other runs compare
//! lexically, and a digit run sorts before a non-digit run. Segments compare
//! run by run, a segment that is a prefix of another sorts first. The
//! shorter version is padded with `"0"` segments, so `1.0` and `1.0.0` are
//! equal.
//!
//! Every comparison is lexicographic over a totally ordered alphabet, so the
//! result is a total order and ranking does not depend on input order.

use std::cmp::Ordering;

/// Compare two optional version strings.
///
/// A present version always beats an absent one; two absent versions tie.
/// Callers that rank records must break those ties themselves.
pub fn compare(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_versions(a, b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Compare two version strings segment by segment.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<Vec<Run<'_>>> = segments(a).map(runs).collect();
    let right: Vec<Vec<Run<'_>>> = segments(b).map(runs).collect();
    let zero = runs("0");

    for i in 0..left.len().max(right.len()) {
        let l = left.get(i).unwrap_or(&zero);
        let r = right.get(i).unwrap_or(&zero);
        match l.cmp(r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn segments(version: &str) -> impl Iterator<Item = &str> {
    version.trim().split(['.', '-'])
}

/// A maximal run of digits (leading zeros stripped) or of non-digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run<'a> {
    Number(&'a str),
    Text(&'a str),
}

impl Ord for Run<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Without leading zeros a longer number is a bigger one.
            (Run::Number(a), Run::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Run::Text(a), Run::Text(b)) => a.cmp(b),
            (Run::Number(_), Run::Text(_)) => Ordering::Less,
            (Run::Text(_), Run::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Run<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn runs(segment: &str) -> Vec<Run<'_>> {
    let mut out = Vec::new();
    let mut rest = segment;
    while let Some(first) = rest.chars().next() {
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        out.push(if digits {
            Run::Number(run.trim_start_matches('0'))
        } else {
            Run::Text(run)
        });
        rest = tail;
    }
    out
}
