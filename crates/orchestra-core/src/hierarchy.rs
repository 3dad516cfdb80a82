//! Accessibility tree snapshots and the geometry derived from them.
//!
//! A [`TreeNode`] is one fetch of the device's view hierarchy. It is produced
//! fresh by the driver on every call and never mutated afterwards. The
//! [`Snapshot`] view flattens a tree into pre-order so predicates can refer to
//! nodes by index, walk parents and test subtree membership cheaply.
//!
//! # Change Detection
//!
//! [`TreeNode::fingerprint`] hashes the canonical JSON form of a tree. Two
//! hierarchies with different fingerprints are never equal, so callers can
//! skip the structural comparison in the common "still animating" case:
//!
//! ```ignore
//! if previous.fingerprint() == latest.fingerprint() && previous == latest {
//!     // hierarchy unchanged
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const TEXT: &str = "text";
pub const HINT_TEXT: &str = "hintText";
pub const ACCESSIBILITY_TEXT: &str = "accessibilityText";
pub const RESOURCE_ID: &str = "resource-id";
pub const BOUNDS: &str = "bounds";
pub const ENABLED: &str = "enabled";
pub const SELECTED: &str = "selected";
pub const CHECKED: &str = "checked";
pub const FOCUSED: &str = "focused";
pub const IS_LOADING: &str = "is-loading";

/// A point on screen, in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Integer rectangle derived from a node's `bounds` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Parse the `[x1,y1][x2,y2]` encoding used by drivers.
    ///
    /// Returns `None` for malformed input, when `x2 < x1` / `y2 < y1`, or
    /// when the width or height does not fit in an `i32`.
    pub fn parse(raw: &str) -> Option<Self> {
        let inner = raw.trim().strip_prefix('[')?.strip_suffix(']')?;
        let (first, second) = inner.split_once("][")?;
        let (x1, y1) = parse_pair(first)?;
        let (x2, y2) = parse_pair(second)?;
        if x2 < x1 || y2 < y1 {
            return None;
        }
        Some(Self::new(x1, y1, x2.checked_sub(x1)?, y2.checked_sub(y1)?))
    }

    #[must_use]
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    #[must_use]
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            self.x.saturating_add(self.width / 2),
            self.y.saturating_add(self.height / 2),
        )
    }

    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Whether the x-ranges of the two rectangles share at least one pixel.
    #[must_use]
    pub fn overlaps_horizontally(&self, other: &Bounds) -> bool {
        self.x < other.right() && other.x < self.right()
    }

    /// Whether the y-ranges of the two rectangles share at least one pixel.
    #[must_use]
    pub fn overlaps_vertically(&self, other: &Bounds) -> bool {
        self.y < other.bottom() && other.y < self.bottom()
    }

    /// Encode back into the driver's `[x1,y1][x2,y2]` form.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("[{},{}][{},{}]", self.x, self.y, self.right(), self.bottom())
    }
}

fn parse_pair(raw: &str) -> Option<(i32, i32)> {
    let (a, b) = raw.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// One node of a fetched accessibility tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<TreeNode>,
    #[serde(default)]
    pub clickable: bool,
}

impl TreeNode {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Geometry of this node, or `None` when it has no on-screen bounds.
    pub fn bounds(&self) -> Option<Bounds> {
        self.attribute(BOUNDS).and_then(Bounds::parse)
    }

    /// Boolean attribute lookup; anything other than `"true"` is false.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.attribute(key)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    /// Whether the platform reports this (root) node as still loading.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.flag(IS_LOADING).unwrap_or(false)
    }

    /// All nodes of this tree in pre-order, starting with `self`.
    pub fn aggregate(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Hash of the canonical JSON encoding, for cheap change detection.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        // BTreeMap keeps attribute order stable, so equal trees encode equally.
        let encoded = serde_json::to_string(self).unwrap_or_default();
        compute_content_hash(&encoded)
    }

    /// Human-readable label built from the text-bearing attributes.
    pub fn label(&self) -> Option<&str> {
        [TEXT, HINT_TEXT, ACCESSIBILITY_TEXT, RESOURCE_ID]
            .iter()
            .filter_map(|key| self.attribute(key))
            .find(|value| !value.trim().is_empty())
    }
}

/// A resolved element: the matched node plus the geometry used to act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiElement {
    pub tree_node: TreeNode,
    pub bounds: Bounds,
}

impl UiElement {
    /// Convert a node into an element; nodes without geometry cannot be.
    pub fn from_node(node: &TreeNode) -> Option<Self> {
        node.bounds().map(|bounds| Self {
            tree_node: node.clone(),
            bounds,
        })
    }

    #[must_use]
    pub fn center(&self) -> Point {
        self.bounds.center()
    }
}

/// Screen dimensions reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub width_pixels: u32,
    pub height_pixels: u32,
}

/// A node inside a [`Snapshot`], addressed by pre-order index.
#[derive(Debug, Clone, Copy)]
pub struct FlatNode<'a> {
    pub node: &'a TreeNode,
    pub parent: Option<usize>,
    /// Exclusive end of this node's subtree in pre-order.
    pub subtree_end: usize,
    pub bounds: Option<Bounds>,
}

/// Pre-order view over one fetched tree.
#[derive(Debug, Clone)]
pub struct Snapshot<'a> {
    nodes: Vec<FlatNode<'a>>,
}

impl<'a> Snapshot<'a> {
    pub fn new(root: &'a TreeNode) -> Self {
        let mut nodes = Vec::new();
        flatten(root, None, &mut nodes);
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> &FlatNode<'a> {
        &self.nodes[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FlatNode<'a>)> {
        self.nodes.iter().enumerate()
    }

    /// Indices of the immediate children of `index`.
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let end = self.nodes[index].subtree_end;
        let mut next = index + 1;
        std::iter::from_fn(move || {
            if next >= end {
                return None;
            }
            let current = next;
            next = self.nodes[current].subtree_end;
            Some(current)
        })
    }

    /// Strict descendants of `index`, in pre-order.
    pub fn descendants(&self, index: usize) -> std::ops::Range<usize> {
        index + 1..self.nodes[index].subtree_end
    }

    #[must_use]
    pub fn is_descendant_of(&self, candidate: usize, ancestor: usize) -> bool {
        self.descendants(ancestor).contains(&candidate)
    }
}

fn flatten<'a>(node: &'a TreeNode, parent: Option<usize>, out: &mut Vec<FlatNode<'a>>) {
    let index = out.len();
    out.push(FlatNode {
        node,
        parent,
        subtree_end: index + 1,
        bounds: node.bounds(),
    });
    for child in &node.children {
        flatten(child, Some(index), out);
    }
    out[index].subtree_end = out.len();
}

/// Dump of the nodes a user could see, one line per node.
///
/// Only nodes with geometry and some label are listed.
pub fn describe_visible(root: &TreeNode) -> String {
    let mut lines = Vec::new();
    for node in root.aggregate() {
        let (Some(bounds), Some(label)) = (node.bounds(), node.label()) else {
            continue;
        };
        let mut line = format!("- {:?} {}", label, bounds.encode());
        if let Some(id) = node.attribute(RESOURCE_ID).filter(|id| *id != label) {
            line.push_str(&format!(" id={}", id));
        }
        if node.clickable {
            line.push_str(" clickable");
        }
        lines.push(line);
    }
    if lines.is_empty() {
        "(no visible elements)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Compute a content hash from text.
///
/// Uses FNV-1a, a fast non-cryptographic hash suitable for change detection.
#[must_use]
pub fn compute_content_hash(text: &str) -> u64 {
    // FNV-1a parameters for 64-bit
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;

    let mut hash = FNV_OFFSET;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
