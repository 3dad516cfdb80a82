//! Declarative element selectors.
//!
//! An [`ElementSelector`] is an immutable description of the element a
//! command wants to act on. Every populated field narrows the match; nested
//! selectors (`below`, `childOf`, `containsChild`, ...) are resolved against
//! the same snapshot by the compiler in [`crate::filters`].
//!
//! Selectors are normally produced by the flow reader and arrive already
//! parsed. The builder methods exist for hosts that construct flows in code.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic trait an element can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trait {
    /// Has non-blank text.
    Text,
    /// Width and height within 3% of each other.
    Square,
    /// Text of at least 200 characters.
    LongText,
}

impl fmt::Display for Trait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trait::Text => write!(f, "TEXT"),
            Trait::Square => write!(f, "SQUARE"),
            Trait::LongText => write!(f, "LONG_TEXT"),
        }
    }
}

/// Expected element size in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<i32>,
}

/// Declarative description of a target element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub below: Option<Box<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub above: Option<Box<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_of: Option<Box<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_of: Option<Box<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_of: Option<Box<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains_child: Option<Box<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains_descendants: Option<Vec<ElementSelector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traits: Option<Vec<Trait>>,
    /// 0-based position among the matches, kept as text as written in flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused: Option<bool>,
    #[serde(skip_serializing_if = "is_false")]
    pub optional: bool,
}

/// Helper for serde skip_serializing_if.
fn is_false(b: &bool) -> bool {
    !*b
}

impl ElementSelector {
    #[must_use]
    pub fn text(regex: impl Into<String>) -> Self {
        Self {
            text_regex: Some(regex.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(regex: impl Into<String>) -> Self {
        Self {
            id_regex: Some(regex.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index.to_string());
        self
    }

    #[must_use]
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    #[must_use]
    pub fn with_size(mut self, width: Option<i32>, height: Option<i32>, tolerance: Option<i32>) -> Self {
        self.size = Some(SizeSelector {
            width,
            height,
            tolerance,
        });
        self
    }

    #[must_use]
    pub fn below(mut self, anchor: ElementSelector) -> Self {
        self.below = Some(Box::new(anchor));
        self
    }

    #[must_use]
    pub fn above(mut self, anchor: ElementSelector) -> Self {
        self.above = Some(Box::new(anchor));
        self
    }

    #[must_use]
    pub fn left_of(mut self, anchor: ElementSelector) -> Self {
        self.left_of = Some(Box::new(anchor));
        self
    }

    #[must_use]
    pub fn right_of(mut self, anchor: ElementSelector) -> Self {
        self.right_of = Some(Box::new(anchor));
        self
    }

    #[must_use]
    pub fn child_of(mut self, parent: ElementSelector) -> Self {
        self.child_of = Some(Box::new(parent));
        self
    }

    #[must_use]
    pub fn contains_child(mut self, child: ElementSelector) -> Self {
        self.contains_child = Some(Box::new(child));
        self
    }

    #[must_use]
    pub fn contains_descendants(mut self, descendants: Vec<ElementSelector>) -> Self {
        self.contains_descendants = Some(descendants);
        self
    }

    #[must_use]
    pub fn with_traits(mut self, traits: Vec<Trait>) -> Self {
        self.traits = Some(traits);
        self
    }

    /// Human-readable description, fields joined with `", "` in declaration order.
    pub fn description(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(text) = &self.text_regex {
            parts.push(format!("Text matching {:?}", text));
        }
        if let Some(id) = &self.id_regex {
            parts.push(format!("Id matching {:?}", id));
        }
        if let Some(size) = &self.size {
            let dim = |v: Option<i32>| v.map_or_else(|| "*".to_string(), |v| v.to_string());
            let mut part = format!("Size: {}x{}", dim(size.width), dim(size.height));
            if let Some(tolerance) = size.tolerance {
                part.push_str(&format!(" (tolerance {})", tolerance));
            }
            parts.push(part);
        }
        let nested = [
            ("Below", &self.below),
            ("Above", &self.above),
            ("Left of", &self.left_of),
            ("Right of", &self.right_of),
            ("Child of", &self.child_of),
            ("Contains child", &self.contains_child),
        ];
        for (label, selector) in nested {
            if let Some(selector) = selector {
                parts.push(format!("{}: {{{}}}", label, selector.description()));
            }
        }
        if let Some(descendants) = &self.contains_descendants {
            let inner: Vec<String> = descendants.iter().map(|d| d.description()).collect();
            parts.push(format!("Contains descendants: [{}]", inner.join("; ")));
        }
        if let Some(traits) = &self.traits {
            let names: Vec<String> = traits.iter().map(Trait::to_string).collect();
            parts.push(format!("Has traits: {}", names.join(", ")));
        }
        let flags = [
            (self.enabled, "Enabled", "Disabled"),
            (self.selected, "Selected", "Not selected"),
            (self.checked, "Checked", "Not checked"),
            (self.focused, "Focused", "Not focused"),
        ];
        for (flag, yes, no) in flags {
            if let Some(flag) = flag {
                parts.push(if flag { yes } else { no }.to_string());
            }
        }
        if let Some(index) = &self.index {
            parts.push(format!("Index: {}", index));
        }

        if parts.is_empty() {
            "Any element".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl fmt::Display for ElementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
