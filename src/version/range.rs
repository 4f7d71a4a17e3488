// src/version/range.rs

//! Version ranges in interval notation
//!
//! A range is one or two intervals over [`ComparableVersion`]:
//!
//! | Text | Kind |
//! |------|------|
//! | `1.2.0` or `[1.2.0]` | `UniqueVersion` |
//! | `[1.0,)` / `(1.0,)` | `VersionToUnbound` |
//! | `(,2.0]` / `(,2.0)` | `UnboundToVersion` |
//! | `[1.0,2.0)` | `VersionToVersion` |
//! | `(,1.0],[2.0,)` | `UnboundToVersionOrVersionToUnbound` |
//!
//! Two rays that face each other (`[1.0,),(,2.0)`) overlap and collapse to
//! the band between them; rays pointing away from each other stay a union.

use super::ComparableVersion;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One end of an interval
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    pub version: ComparableVersion,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(version: ComparableVersion) -> Self {
        Self {
            version,
            inclusive: true,
        }
    }

    pub fn exclusive(version: ComparableVersion) -> Self {
        Self {
            version,
            inclusive: false,
        }
    }

    fn admits_above(&self, v: &ComparableVersion) -> bool {
        match v.cmp(&self.version) {
            Ordering::Greater => true,
            Ordering::Equal => self.inclusive,
            Ordering::Less => false,
        }
    }

    fn admits_below(&self, v: &ComparableVersion) -> bool {
        match v.cmp(&self.version) {
            Ordering::Less => true,
            Ordering::Equal => self.inclusive,
            Ordering::Greater => false,
        }
    }
}

/// Classification of a [`VersionRange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    UniqueVersion,
    VersionToUnbound,
    UnboundToVersion,
    VersionToVersion,
    UnboundToVersionOrVersionToUnbound,
}

/// A constraint on acceptable versions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionRange {
    /// Exactly one version
    Unique(ComparableVersion),
    /// Everything at or above (or strictly above) a bound
    AtLeast(Bound),
    /// Everything at or below (or strictly below) a bound
    AtMost(Bound),
    /// A bounded band
    Between(Bound, Bound),
    /// Everything outside a band: `(,below] ∪ [above,)`
    Outside { below: Bound, above: Bound },
}

/// Result of narrowing a range against the versions a repository holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split {
    /// A range clamped to the repository's `[lowest, highest]`
    Range(VersionRange),
    /// The clamped range degenerated to a single version
    Pinned(ComparableVersion),
    /// No version in `[lowest, highest]` can satisfy the range
    Disjoint,
}

/// A single interval; `None` means unbounded on that side
#[derive(Debug, Clone, PartialEq, Eq)]
struct Interval {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Interval {
    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => match l.version.cmp(&u.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(l.inclusive && u.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            lower: tighter(&self.lower, &other.lower, Ordering::Greater),
            upper: tighter(&self.upper, &other.upper, Ordering::Less),
        }
    }

    fn into_range(self) -> VersionRange {
        match (self.lower, self.upper) {
            (None, None) => VersionRange::AtLeast(Bound::inclusive(ComparableVersion::null())),
            (Some(lower), None) => VersionRange::AtLeast(lower),
            (None, Some(upper)) => VersionRange::AtMost(upper),
            (Some(lower), Some(upper)) => {
                if lower.version == upper.version {
                    VersionRange::Unique(lower.version)
                } else {
                    VersionRange::Between(lower, upper)
                }
            }
        }
    }
}

/// Pick the more restrictive of two bounds; `prefer` is the ordering of the
/// version that restricts more (greater for lower bounds, less for upper)
fn tighter(a: &Option<Bound>, b: &Option<Bound>, prefer: Ordering) -> Option<Bound> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => {
            let ord = x.version.cmp(&y.version);
            if ord == prefer {
                Some(x.clone())
            } else if ord == Ordering::Equal {
                Some(Bound {
                    version: x.version.clone(),
                    inclusive: x.inclusive && y.inclusive,
                })
            } else {
                Some(y.clone())
            }
        }
    }
}

fn malformed(text: &str, reason: &str) -> Error {
    Error::FormatError(format!("Invalid version range '{}': {}", text, reason))
}

impl VersionRange {
    /// Range used when a tier is queried without a constraint: `[1.0,)`
    pub fn default_query() -> Self {
        VersionRange::AtLeast(Bound::inclusive(ComparableVersion::new(vec![1, 0])))
    }

    /// Parse interval notation
    pub fn parse(s: &str) -> Result<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(malformed(s, "empty range"));
        }

        if !text.starts_with(['[', '(']) {
            if text.contains([']', ')', ',', '[', '(']) {
                return Err(malformed(s, "unbalanced brackets"));
            }
            return Ok(VersionRange::Unique(ComparableVersion::parse(text)?));
        }

        let clauses = split_clauses(text)?;
        match clauses.as_slice() {
            [single] => Ok(parse_clause(single)?.into_range()),
            [first, second] => {
                let a = parse_clause(first)?;
                let b = parse_clause(second)?;
                match (a.lower, a.upper, b.lower, b.upper) {
                    (None, Some(down), Some(up), None) | (Some(up), None, None, Some(down)) => {
                        Ok(Self::from_rays(down, up))
                    }
                    _ => Err(malformed(
                        s,
                        "two clauses must be opposite unbounded rays",
                    )),
                }
            }
            _ => Err(malformed(s, "at most two intervals are allowed")),
        }
    }

    /// Combine `(,down]` and `[up,)`: overlapping rays collapse to their
    /// common band, disjoint rays stay a union
    fn from_rays(down: Bound, up: Bound) -> Self {
        let band = Interval {
            lower: Some(up.clone()),
            upper: Some(down.clone()),
        };
        if band.is_empty() {
            VersionRange::Outside {
                below: down,
                above: up,
            }
        } else {
            band.into_range()
        }
    }

    pub fn kind(&self) -> RangeKind {
        match self {
            VersionRange::Unique(_) => RangeKind::UniqueVersion,
            VersionRange::AtLeast(_) => RangeKind::VersionToUnbound,
            VersionRange::AtMost(_) => RangeKind::UnboundToVersion,
            VersionRange::Between(_, _) => RangeKind::VersionToVersion,
            VersionRange::Outside { .. } => RangeKind::UnboundToVersionOrVersionToUnbound,
        }
    }

    /// Check whether a version satisfies this range
    pub fn is_in_range(&self, v: &ComparableVersion) -> bool {
        if v.is_null() {
            return false;
        }
        match self {
            VersionRange::Unique(u) => v == u,
            VersionRange::AtLeast(lower) => lower.admits_above(v),
            VersionRange::AtMost(upper) => upper.admits_below(v),
            VersionRange::Between(lower, upper) => lower.admits_above(v) && upper.admits_below(v),
            VersionRange::Outside { below, above } => {
                below.admits_below(v) || above.admits_above(v)
            }
        }
    }

    /// Upper bound of the highest interval, `None` when unbounded above
    pub fn upper_limit(&self) -> Option<Bound> {
        match self {
            VersionRange::Unique(v) => Some(Bound::inclusive(v.clone())),
            VersionRange::AtMost(upper) | VersionRange::Between(_, upper) => Some(upper.clone()),
            VersionRange::AtLeast(_) | VersionRange::Outside { .. } => None,
        }
    }

    fn intervals(&self) -> Vec<Interval> {
        match self {
            VersionRange::Unique(v) => vec![Interval {
                lower: Some(Bound::inclusive(v.clone())),
                upper: Some(Bound::inclusive(v.clone())),
            }],
            VersionRange::AtLeast(lower) => vec![Interval {
                lower: Some(lower.clone()),
                upper: None,
            }],
            VersionRange::AtMost(upper) => vec![Interval {
                lower: None,
                upper: Some(upper.clone()),
            }],
            VersionRange::Between(lower, upper) => vec![Interval {
                lower: Some(lower.clone()),
                upper: Some(upper.clone()),
            }],
            VersionRange::Outside { below, above } => vec![
                Interval {
                    lower: None,
                    upper: Some(below.clone()),
                },
                Interval {
                    lower: Some(above.clone()),
                    upper: None,
                },
            ],
        }
    }

    /// Narrow this range to the versions between `lowest` and `highest`
    ///
    /// A bounded range already inside the window comes back unchanged. A
    /// union whose both rays reach into the window cannot be expressed as
    /// one band and is returned as-is.
    pub fn split(&self, lowest: &ComparableVersion, highest: &ComparableVersion) -> Split {
        let window = Interval {
            lower: Some(Bound::inclusive(lowest.clone())),
            upper: Some(Bound::inclusive(highest.clone())),
        };

        let mut pieces: Vec<Interval> = self
            .intervals()
            .iter()
            .map(|interval| interval.intersect(&window))
            .filter(|interval| !interval.is_empty())
            .collect();

        match pieces.len() {
            0 => Split::Disjoint,
            1 => match pieces.remove(0).into_range() {
                VersionRange::Unique(v) => Split::Pinned(v),
                range => Split::Range(range),
            },
            _ => Split::Range(self.clone()),
        }
    }

    /// Intersection of two ranges, `None` when nothing satisfies both
    ///
    /// When the intersection falls apart into pieces that no single range
    /// kind can express, the highest piece is kept.
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let mut pieces = Vec::new();
        for a in self.intervals() {
            for b in other.intervals() {
                let piece = a.intersect(&b);
                if !piece.is_empty() {
                    pieces.push(piece);
                }
            }
        }

        pieces.sort_by(|a, b| {
            let a_lower = a.lower.as_ref().map(|bound| &bound.version);
            let b_lower = b.lower.as_ref().map(|bound| &bound.version);
            a_lower.cmp(&b_lower)
        });

        if let [
            Interval {
                lower: None,
                upper: Some(below),
            },
            Interval {
                lower: Some(above),
                upper: None,
            },
        ] = pieces.as_slice()
        {
            return Some(VersionRange::Outside {
                below: below.clone(),
                above: above.clone(),
            });
        }

        pieces.pop().map(Interval::into_range)
    }

    /// Narrow this range to its intersection with `other`
    ///
    /// Returns false and leaves `self` untouched when the two ranges have
    /// no version in common.
    pub fn merge(&mut self, other: &VersionRange) -> bool {
        match self.intersect(other) {
            Some(merged) => {
                *self = merged;
                true
            }
            None => false,
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::default_query()
    }
}

/// Break `[a,b),(c,d]` into its bracketed clauses
fn split_clauses(text: &str) -> Result<Vec<&str>> {
    let mut clauses = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if !rest.starts_with(['[', '(']) {
            return Err(malformed(text, "expected '[' or '('"));
        }
        let close = rest[1..]
            .find([']', ')'])
            .map(|i| i + 1)
            .ok_or_else(|| malformed(text, "unclosed interval"))?;
        if rest[1..close].contains(['[', '(']) {
            return Err(malformed(text, "nested brackets"));
        }
        clauses.push(&rest[..=close]);

        rest = rest[close + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after.trim_start();
            if rest.is_empty() {
                return Err(malformed(text, "trailing comma"));
            }
        } else if !rest.is_empty() {
            return Err(malformed(text, "expected ',' between intervals"));
        }
    }

    Ok(clauses)
}

fn parse_clause(clause: &str) -> Result<Interval> {
    let lower_inclusive = clause.starts_with('[');
    let upper_inclusive = clause.ends_with(']');
    let body = &clause[1..clause.len() - 1];

    match body.split_once(',') {
        None => {
            if !(lower_inclusive && upper_inclusive) {
                return Err(malformed(clause, "a single version must be written as [v]"));
            }
            let v = ComparableVersion::parse(body)?;
            if v.is_null() {
                return Err(malformed(clause, "empty version"));
            }
            Ok(Interval {
                lower: Some(Bound::inclusive(v.clone())),
                upper: Some(Bound::inclusive(v)),
            })
        }
        Some((lo, hi)) => {
            if hi.contains(',') {
                return Err(malformed(clause, "too many bounds"));
            }
            let lo = ComparableVersion::parse(lo)?;
            let hi = ComparableVersion::parse(hi)?;
            let interval = Interval {
                lower: (!lo.is_null()).then(|| Bound {
                    version: lo,
                    inclusive: lower_inclusive,
                }),
                upper: (!hi.is_null()).then(|| Bound {
                    version: hi,
                    inclusive: upper_inclusive,
                }),
            };
            if interval.is_empty() {
                return Err(malformed(clause, "lower bound exceeds upper bound"));
            }
            Ok(interval)
        }
    }
}

fn write_lower(f: &mut fmt::Formatter<'_>, bound: &Bound) -> fmt::Result {
    if bound.version.is_null() {
        return write!(f, "(,)");
    }
    let open = if bound.inclusive { '[' } else { '(' };
    write!(f, "{}{},)", open, bound.version)
}

fn write_upper(f: &mut fmt::Formatter<'_>, bound: &Bound) -> fmt::Result {
    let close = if bound.inclusive { ']' } else { ')' };
    write!(f, "(,{}{}", bound.version, close)
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Unique(v) => write!(f, "{}", v),
            VersionRange::AtLeast(lower) => write_lower(f, lower),
            VersionRange::AtMost(upper) => write_upper(f, upper),
            VersionRange::Between(lower, upper) => {
                let open = if lower.inclusive { '[' } else { '(' };
                let close = if upper.inclusive { ']' } else { ')' };
                write!(f, "{}{},{}{}", open, lower.version, upper.version, close)
            }
            VersionRange::Outside { below, above } => {
                write_upper(f, below)?;
                write!(f, ",")?;
                write_lower(f, above)
            }
        }
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionRange {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VersionRange> for String {
    fn from(r: VersionRange) -> Self {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ComparableVersion {
        ComparableVersion::parse(s).unwrap()
    }

    fn r(s: &str) -> VersionRange {
        VersionRange::parse(s).unwrap()
    }

    #[test]
    fn test_containment_table() {
        let cases = [
            ("[1.0.0,2.0.0)", "1.5.0", true),
            ("[1.0.0,2.0.0)", "1.0.0", true),
            ("[1.0.0,2.0.0)", "2.0.0", false),
            ("[1.0.0,2.0.0)", "0.9.9", false),
            ("(1.0.0,)", "1.0.0", false),
            ("(1.0.0,)", "1.0.1", true),
            ("(,1.0.0],[2.0.0,)", "0.5.0", true),
            ("(,1.0.0],[2.0.0,)", "3.0.0", true),
            ("(,1.0.0],[2.0.0,)", "1.5.0", false),
            ("(,1.0.0],[2.0.0,)", "1.0.0", true),
            ("(,1.0.0),(2.0.0,)", "2.0.0", false),
            ("1.2.3", "1.2.3", true),
            ("1.2.3", "1.2.4", false),
            ("[1.2.3]", "1.2.3.0", true),
            ("(,2.0]", "2.0.0", true),
            ("(,2.0)", "2.0.0", false),
        ];
        for (range, version, expected) in cases {
            assert_eq!(
                r(range).is_in_range(&v(version)),
                expected,
                "{} contains {}",
                range,
                version
            );
        }
    }

    #[test]
    fn test_null_never_in_range() {
        assert!(!r("(,)").is_in_range(&ComparableVersion::null()));
        assert!(r("(,)").is_in_range(&v("0.0.1")));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(r("1.0").kind(), RangeKind::UniqueVersion);
        assert_eq!(r("[1.0]").kind(), RangeKind::UniqueVersion);
        assert_eq!(r("[1.0,)").kind(), RangeKind::VersionToUnbound);
        assert_eq!(r("(,1.0]").kind(), RangeKind::UnboundToVersion);
        assert_eq!(r("[1.0,2.0)").kind(), RangeKind::VersionToVersion);
        assert_eq!(
            r("(,1.0],[2.0,)").kind(),
            RangeKind::UnboundToVersionOrVersionToUnbound
        );
    }

    #[test]
    fn test_facing_rays_collapse() {
        let range = r("[1.0,),(,2.0)");
        assert_eq!(range.kind(), RangeKind::VersionToVersion);
        assert_eq!(range, r("[1.0,2.0)"));

        let touching = r("(,1.5],[1.5,)");
        assert_eq!(touching, VersionRange::Unique(v("1.5")));
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "[1.0",
            "[1.0,2.0",
            "[[1.0,2.0]",
            "[1.0,(2.0)]",
            "(1.0)",
            "[2.0,1.0]",
            "[1.0,2.0,3.0]",
            "[1.0,2.0],",
            "[1.0,2.0] [3.0,)",
            "[1.0,2.0],[3.0,4.0]",
            "[1.0,),[2.0,)",
            "(,1.0],[2.0,),[3.0,)",
            "1.0]",
            "[a,b]",
        ] {
            assert!(
                matches!(VersionRange::parse(bad), Err(Error::FormatError(_))),
                "expected format error for '{}'",
                bad
            );
        }
    }

    #[test]
    fn test_display_round_trip() {
        for text in [
            "1.2.3",
            "[1.0,)",
            "(1.0,)",
            "(,2.0]",
            "(,2.0)",
            "[1.0,2.0)",
            "(1.0,2.0]",
            "(,1.0],[2.0,)",
            "(,1.0),(2.0,)",
        ] {
            assert_eq!(r(text).to_string(), text);
            assert_eq!(r(&r(text).to_string()), r(text));
        }
    }

    #[test]
    fn test_split_bounded_is_idempotent() {
        let range = r("[1.0.0,1.5.0)");
        assert_eq!(
            range.split(&v("1.0.0"), &v("2.0.0")),
            Split::Range(range.clone())
        );
        assert_eq!(
            range.split(&v("0.5.0"), &v("3.0.0")),
            Split::Range(range.clone())
        );
    }

    #[test]
    fn test_split_clamps_unbounded() {
        assert_eq!(
            r("[1.2,)").split(&v("1.0"), &v("3.0")),
            Split::Range(r("[1.2,3.0]"))
        );
        assert_eq!(
            r("(,2.0)").split(&v("1.0"), &v("3.0")),
            Split::Range(r("[1.0,2.0)"))
        );
        assert_eq!(
            r("(1.0,2.0)").split(&v("1.0"), &v("3.0")),
            Split::Range(r("(1.0,2.0)"))
        );
    }

    #[test]
    fn test_split_pins_and_disjoint() {
        assert_eq!(
            r("[3.0,)").split(&v("1.0"), &v("3.0")),
            Split::Pinned(v("3.0"))
        );
        assert_eq!(r("[4.0,)").split(&v("1.0"), &v("3.0")), Split::Disjoint);
        assert_eq!(r("(3.0,)").split(&v("1.0"), &v("3.0")), Split::Disjoint);
        assert_eq!(r("2.0").split(&v("1.0"), &v("3.0")), Split::Pinned(v("2.0")));
    }

    #[test]
    fn test_split_union() {
        let union = r("(,1.0],[2.0,)");
        assert_eq!(
            union.split(&v("1.5"), &v("3.0")),
            Split::Range(r("[2.0,3.0]"))
        );
        assert_eq!(
            union.split(&v("0.5"), &v("1.8")),
            Split::Range(r("[0.5,1.0]"))
        );
        assert_eq!(union.split(&v("0.5"), &v("3.0")), Split::Range(union.clone()));
        assert_eq!(union.split(&v("1.2"), &v("1.8")), Split::Disjoint);
    }

    #[test]
    fn test_merge_rays() {
        let mut range = r("[1.0,)");
        assert!(range.merge(&r("(,2.0)")));
        assert_eq!(range, r("[1.0,2.0)"));

        let mut range = r("[1.0,)");
        assert!(range.merge(&r("[1.5,)")));
        assert_eq!(range, r("[1.5,)"));

        let mut range = r("(,3.0]");
        assert!(range.merge(&r("(,2.0)")));
        assert_eq!(range, r("(,2.0)"));
    }

    #[test]
    fn test_merge_disjoint_leaves_range_untouched() {
        let mut range = r("[1.0,2.0)");
        assert!(!range.merge(&r("[2.0,)")));
        assert_eq!(range, r("[1.0,2.0)"));

        let mut unique = r("1.5");
        assert!(!unique.merge(&r("[2.0,3.0]")));
        assert!(unique.merge(&r("[1.0,2.0]")));
        assert_eq!(unique, r("1.5"));
    }

    #[test]
    fn test_merge_union_keeps_highest_piece() {
        // [0.5,3.0] minus the (1.0,2.0) hole leaves two bands; the upper wins
        let mut range = r("(,1.0],[2.0,)");
        assert!(range.merge(&r("[0.5,3.0]")));
        assert_eq!(range, r("[2.0,3.0]"));

        let mut union = r("(,1.0],[2.0,)");
        assert!(union.merge(&r("(,0.5],[3.0,)")));
        assert_eq!(union, r("(,0.5],[3.0,)"));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&r("[1.0,2.0)")).unwrap();
        assert_eq!(json, "\"[1.0,2.0)\"");
        let back: VersionRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r("[1.0,2.0)"));
    }
}
