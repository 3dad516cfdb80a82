//! Predicate algebra and the selector compiler.
//!
//! A [`Predicate`] is a pure test of one candidate node inside a
//! [`Snapshot`]. Spatial and structural predicates close over data computed
//! from that same snapshot (anchor bounds, parent indices), never over
//! ambient state, so a compiled selector is only meaningful for the snapshot
//! it was compiled against.
//!
//! [`compile`] turns an [`ElementSelector`] into a [`CompiledPredicate`],
//! which evaluates as `compose([intersect(fields), rank, index])`:
//!
//! 1. every node passing all field predicates, in pre-order
//! 2. if the selector has spatial relations, stably re-ordered nearest-first
//! 3. if `index` is set, only the n-th remaining match
//!
//! # Spatial relations
//!
//! A candidate `C` relates to an anchor `A` (any node matching the nested
//! selector) when the edge test holds:
//!
//! | Relation  | Edge test                 | Aligned when         | Gap                  |
//! |-----------|---------------------------|----------------------|----------------------|
//! | `below`   | `C.top >= A.bottom`       | x-ranges overlap     | `C.top - A.bottom`   |
//! | `above`   | `C.bottom <= A.top`       | x-ranges overlap     | `A.top - C.bottom`   |
//! | `leftOf`  | `C.right <= A.left`       | y-ranges overlap     | `A.left - C.right`   |
//! | `rightOf` | `C.left >= A.right`       | y-ranges overlap     | `C.left - A.right`   |
//!
//! Alignment is not required to match. Among matches, aligned candidates
//! rank before unaligned ones, then smaller gap first, then pre-order. With
//! several anchors a candidate takes its best rank over all of them.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::{ErrorCode, OrchestraError, Result};
use crate::hierarchy::{
    Bounds, Snapshot, TreeNode, UiElement, ACCESSIBILITY_TEXT, CHECKED, ENABLED, FOCUSED,
    HINT_TEXT, RESOURCE_ID, SELECTED, TEXT,
};
use crate::selector::{ElementSelector, Trait};

/// Minimum length for the `LONG_TEXT` trait.
const LONG_TEXT_LENGTH: usize = 200;

/// Allowed width/height difference for the `SQUARE` trait, in percent.
const SQUARE_TOLERANCE_PERCENT: i32 = 3;

/// Regex matched against a whole attribute value, with a literal fallback.
#[derive(Debug, Clone)]
pub struct TextPattern {
    source: String,
    regex: Option<Regex>,
}

impl TextPattern {
    /// Case-insensitive, dot-matches-all, multiline; anchored to the full value.
    ///
    /// Patterns that do not compile as regex on their own are compared
    /// literally, so a group-closing pattern cannot escape the anchors.
    pub fn new(source: &str) -> Self {
        let regex = Regex::new(source).and_then(|_| {
            RegexBuilder::new(&format!(r"\A(?:{})\z", source))
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .multi_line(true)
                .build()
        });
        let regex = match regex {
            Ok(regex) => Some(regex),
            Err(e) => {
                debug!("Pattern {:?} is not valid regex, matching literally: {}", source, e);
                None
            }
        };
        Self {
            source: source.to_string(),
            regex,
        }
    }

    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        if value == self.source {
            return true;
        }
        let Some(regex) = &self.regex else {
            return false;
        };
        regex.is_match(value) || (value.contains('\n') && regex.is_match(&value.replace('\n', " ")))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Geometric relation between a candidate and an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Below,
    Above,
    LeftOf,
    RightOf,
}

impl Relation {
    #[must_use]
    pub fn holds(self, candidate: &Bounds, anchor: &Bounds) -> bool {
        match self {
            Relation::Below => candidate.y >= anchor.bottom(),
            Relation::Above => candidate.bottom() <= anchor.y,
            Relation::LeftOf => candidate.right() <= anchor.x,
            Relation::RightOf => candidate.x >= anchor.right(),
        }
    }

    fn aligned(self, candidate: &Bounds, anchor: &Bounds) -> bool {
        match self {
            Relation::Below | Relation::Above => candidate.overlaps_horizontally(anchor),
            Relation::LeftOf | Relation::RightOf => candidate.overlaps_vertically(anchor),
        }
    }

    fn gap(self, candidate: &Bounds, anchor: &Bounds) -> i64 {
        let (near, far) = match self {
            Relation::Below => (anchor.bottom(), candidate.y),
            Relation::Above => (candidate.bottom(), anchor.y),
            Relation::LeftOf => (candidate.right(), anchor.x),
            Relation::RightOf => (anchor.right(), candidate.x),
        };
        i64::from(far) - i64::from(near)
    }

    /// Best `(unaligned, gap)` over the anchors this candidate relates to.
    fn rank(self, candidate: &Bounds, anchors: &[Bounds]) -> Option<(bool, i64)> {
        anchors
            .iter()
            .filter(|anchor| self.holds(candidate, anchor))
            .map(|anchor| (!self.aligned(candidate, anchor), self.gap(candidate, anchor)))
            .min()
    }
}

/// A test of one candidate node within a snapshot.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// The node carries parseable bounds.
    HasGeometry,
    /// `text`, `hintText` or `accessibilityText` matches.
    TextMatches(TextPattern),
    /// `resource-id` matches.
    IdMatches(TextPattern),
    SizeMatches {
        width: Option<i32>,
        height: Option<i32>,
        tolerance: i32,
    },
    /// Some anchor satisfies the relation with the candidate.
    Relative {
        relation: Relation,
        anchors: Vec<Bounds>,
    },
    /// Candidate is a strict descendant of one of these snapshot indices.
    DescendantOf(Vec<usize>),
    /// Candidate has an immediate child equal to this resolved node.
    ContainsChild(TreeNode),
    /// For each set, some index in it is a strict descendant of the candidate.
    ContainsDescendants(Vec<Vec<usize>>),
    HasTraits(Vec<Trait>),
    /// Boolean attribute equals `expected`; `missing` is used when absent.
    Flag {
        key: &'static str,
        expected: bool,
        missing: bool,
    },
    /// Logical AND.
    Intersect(Vec<Predicate>),
}

impl Predicate {
    #[must_use]
    pub fn test(&self, snapshot: &Snapshot<'_>, index: usize) -> bool {
        let flat = snapshot.get(index);
        let node = flat.node;
        match self {
            Predicate::HasGeometry => flat.bounds.is_some(),
            Predicate::TextMatches(pattern) => [TEXT, HINT_TEXT, ACCESSIBILITY_TEXT]
                .iter()
                .filter_map(|key| node.attribute(key))
                .any(|value| pattern.matches(value)),
            Predicate::IdMatches(pattern) => node
                .attribute(RESOURCE_ID)
                .is_some_and(|value| pattern.matches(value)),
            Predicate::SizeMatches {
                width,
                height,
                tolerance,
            } => flat.bounds.is_some_and(|bounds| {
                let within = |expected: Option<i32>, actual: i32| {
                    expected.map_or(true, |expected| {
                        (i64::from(actual) - i64::from(expected)).abs() <= i64::from(*tolerance)
                    })
                };
                within(*width, bounds.width) && within(*height, bounds.height)
            }),
            Predicate::Relative { relation, anchors } => flat
                .bounds
                .is_some_and(|bounds| relation.rank(&bounds, anchors).is_some()),
            Predicate::DescendantOf(parents) => parents
                .iter()
                .any(|&parent| snapshot.is_descendant_of(index, parent)),
            Predicate::ContainsChild(child) => snapshot
                .children(index)
                .any(|c| snapshot.get(c).node == child),
            Predicate::ContainsDescendants(sets) => {
                let range = snapshot.descendants(index);
                sets.iter()
                    .all(|set| set.iter().any(|matched| range.contains(matched)))
            }
            Predicate::HasTraits(traits) => traits.iter().all(|t| has_trait(node, flat.bounds, *t)),
            Predicate::Flag {
                key,
                expected,
                missing,
            } => node.flag(key).unwrap_or(*missing) == *expected,
            Predicate::Intersect(predicates) => predicates.iter().all(|p| p.test(snapshot, index)),
        }
    }
}

fn has_trait(node: &TreeNode, bounds: Option<Bounds>, t: Trait) -> bool {
    let text = || {
        [TEXT, HINT_TEXT, ACCESSIBILITY_TEXT]
            .iter()
            .filter_map(|key| node.attribute(key))
            .find(|value| !value.trim().is_empty())
    };
    match t {
        Trait::Text => text().is_some(),
        Trait::LongText => text().is_some_and(|value| value.chars().count() >= LONG_TEXT_LENGTH),
        Trait::Square => bounds.is_some_and(|b| {
            let (w, h) = (i64::from(b.width), i64::from(b.height));
            (w - h).abs() * 100 <= w.max(h) * i64::from(SQUARE_TOLERANCE_PERCENT)
        }),
    }
}

pub fn text_matches(regex: &str) -> Predicate {
    Predicate::TextMatches(TextPattern::new(regex))
}

pub fn id_matches(regex: &str) -> Predicate {
    Predicate::IdMatches(TextPattern::new(regex))
}

pub fn size_matches(width: Option<i32>, height: Option<i32>, tolerance: i32) -> Predicate {
    Predicate::SizeMatches {
        width,
        height,
        tolerance,
    }
}

/// Spatial predicate against every node `anchor` selects in `snapshot`.
pub fn relative(relation: Relation, snapshot: &Snapshot<'_>, anchor: &CompiledPredicate) -> Predicate {
    let anchors = anchor
        .evaluate(snapshot)
        .into_iter()
        .filter_map(|i| snapshot.get(i).bounds)
        .collect();
    Predicate::Relative { relation, anchors }
}

pub fn below(snapshot: &Snapshot<'_>, anchor: &CompiledPredicate) -> Predicate {
    relative(Relation::Below, snapshot, anchor)
}

pub fn above(snapshot: &Snapshot<'_>, anchor: &CompiledPredicate) -> Predicate {
    relative(Relation::Above, snapshot, anchor)
}

pub fn left_of(snapshot: &Snapshot<'_>, anchor: &CompiledPredicate) -> Predicate {
    relative(Relation::LeftOf, snapshot, anchor)
}

pub fn right_of(snapshot: &Snapshot<'_>, anchor: &CompiledPredicate) -> Predicate {
    relative(Relation::RightOf, snapshot, anchor)
}

pub fn contains_child(element: &UiElement) -> Predicate {
    Predicate::ContainsChild(element.tree_node.clone())
}

pub fn intersect(predicates: Vec<Predicate>) -> Predicate {
    Predicate::Intersect(predicates)
}

/// Keep only the `n`-th match; out of range leaves nothing.
pub fn select_index(matches: Vec<usize>, n: usize) -> Vec<usize> {
    matches.get(n).copied().into_iter().collect()
}

/// A selector compiled against one snapshot.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    predicate: Predicate,
    index: Option<usize>,
    description: String,
}

impl CompiledPredicate {
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Matching snapshot indices, in selection order.
    pub fn evaluate(&self, snapshot: &Snapshot<'_>) -> Vec<usize> {
        let mut matches: Vec<usize> = snapshot
            .iter()
            .map(|(i, _)| i)
            .filter(|&i| self.predicate.test(snapshot, i))
            .collect();

        let relations = self.relations();
        if !relations.is_empty() {
            // Stable: equal ranks keep pre-order.
            matches.sort_by_key(|&i| {
                let bounds = snapshot.get(i).bounds;
                relations
                    .iter()
                    .map(|(relation, anchors)| bounds.and_then(|b| relation.rank(&b, anchors)))
                    .collect::<Vec<_>>()
            });
        }

        match self.index {
            Some(n) => select_index(matches, n),
            None => matches,
        }
    }

    /// First selected node, as an element.
    pub fn first_match(&self, snapshot: &Snapshot<'_>) -> Option<UiElement> {
        self.evaluate(snapshot)
            .first()
            .and_then(|&i| UiElement::from_node(snapshot.get(i).node))
    }

    fn relations(&self) -> Vec<(Relation, &[Bounds])> {
        let Predicate::Intersect(parts) = &self.predicate else {
            return Vec::new();
        };
        parts
            .iter()
            .filter_map(|p| match p {
                Predicate::Relative { relation, anchors } => Some((*relation, anchors.as_slice())),
                _ => None,
            })
            .collect()
    }
}

/// Resolves nested selectors that must name a concrete element.
pub trait ElementLookup {
    /// Resolve `selector` with the required (non-optional) deadline.
    fn resolve_required(&self, selector: &ElementSelector) -> Result<UiElement>;
}

/// Lookup that resolves against one fixed snapshot, without waiting.
pub struct SnapshotLookup<'s, 'a> {
    snapshot: &'s Snapshot<'a>,
}

impl<'s, 'a> SnapshotLookup<'s, 'a> {
    pub fn new(snapshot: &'s Snapshot<'a>) -> Self {
        Self { snapshot }
    }
}

impl ElementLookup for SnapshotLookup<'_, '_> {
    fn resolve_required(&self, selector: &ElementSelector) -> Result<UiElement> {
        compile(selector, self.snapshot, self)?
            .first_match(self.snapshot)
            .ok_or_else(|| OrchestraError::element_not_found(&selector.description(), None))
    }
}

/// Compile `selector` against `snapshot`.
///
/// `containsChild` and `containsDescendants` resolve concrete elements
/// through `lookup` first; if that resolution fails with not-found the
/// selector is reported as invalid rather than retried.
pub fn compile(
    selector: &ElementSelector,
    snapshot: &Snapshot<'_>,
    lookup: &dyn ElementLookup,
) -> Result<CompiledPredicate> {
    let mut predicates = vec![Predicate::HasGeometry];

    if let Some(text) = &selector.text_regex {
        predicates.push(text_matches(text));
    }
    if let Some(id) = &selector.id_regex {
        predicates.push(id_matches(id));
    }
    if let Some(size) = &selector.size {
        let tolerance = size.tolerance.unwrap_or(0);
        if tolerance < 0 {
            return Err(OrchestraError::invalid_selector(format!(
                "Size tolerance must not be negative, got {}",
                tolerance
            )));
        }
        predicates.push(size_matches(size.width, size.height, tolerance));
    }

    let spatial = [
        (Relation::Below, &selector.below),
        (Relation::Above, &selector.above),
        (Relation::LeftOf, &selector.left_of),
        (Relation::RightOf, &selector.right_of),
    ];
    for (relation, nested) in spatial {
        if let Some(nested) = nested {
            let anchor = compile(nested, snapshot, lookup)?;
            predicates.push(relative(relation, snapshot, &anchor));
        }
    }

    if let Some(parent) = &selector.child_of {
        let parents = compile(parent, snapshot, lookup)?.evaluate(snapshot);
        predicates.push(Predicate::DescendantOf(parents));
    }

    if let Some(child) = &selector.contains_child {
        let element = resolve_structural(lookup, child, "containsChild")?;
        predicates.push(contains_child(&element));
    }

    if let Some(descendants) = &selector.contains_descendants {
        let mut sets = Vec::with_capacity(descendants.len());
        for descendant in descendants {
            resolve_structural(lookup, descendant, "containsDescendants")?;
            sets.push(compile(descendant, snapshot, lookup)?.evaluate(snapshot));
        }
        predicates.push(Predicate::ContainsDescendants(sets));
    }

    if let Some(traits) = &selector.traits {
        predicates.push(Predicate::HasTraits(traits.clone()));
    }

    let flags = [
        (ENABLED, selector.enabled, true),
        (SELECTED, selector.selected, false),
        (CHECKED, selector.checked, false),
        (FOCUSED, selector.focused, false),
    ];
    for (key, expected, missing) in flags {
        if let Some(expected) = expected {
            predicates.push(Predicate::Flag {
                key,
                expected,
                missing,
            });
        }
    }

    let index = match &selector.index {
        Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
            OrchestraError::invalid_selector(format!(
                "Index {:?} is not a non-negative integer",
                raw
            ))
        })?),
        None => None,
    };

    Ok(CompiledPredicate {
        predicate: intersect(predicates),
        index,
        description: selector.description(),
    })
}

fn resolve_structural(
    lookup: &dyn ElementLookup,
    selector: &ElementSelector,
    field: &str,
) -> Result<UiElement> {
    lookup.resolve_required(selector).map_err(|e| {
        if e.code == ErrorCode::ElementNotFound {
            OrchestraError::invalid_selector(format!(
                "{} could not be resolved: {}",
                field,
                selector.description()
            ))
        } else {
            e
        }
    })
}

/// Compile and evaluate against a single snapshot, without retries.
pub fn find_in_snapshot(selector: &ElementSelector, root: &TreeNode) -> Result<Vec<UiElement>> {
    let snapshot = Snapshot::new(root);
    let compiled = compile(selector, &snapshot, &SnapshotLookup::new(&snapshot))?;
    Ok(compiled
        .evaluate(&snapshot)
        .into_iter()
        .filter_map(|i| UiElement::from_node(snapshot.get(i).node))
        .collect())
}
