//! Selection token resolution
//!
//! Token formats:
//! - Style tokens: `{layer}|{style}`
//! - Theme layer tokens: `{theme}|{layer}`
//! - Theme style tokens: `{theme}|{layer}|{style}`
//! - Relation field tokens: `{relation}_child_field_{field}` and
//!   `{relation}_parent_field_{field}`
//!
//! Older selections were built by plain string concatenation, without the
//! `|` separator. Those legacy tokens are resolved against the layer ids of
//! the document: the longest id found inside the token is the layer, the
//! text before it the theme and the text after it the style. A token that
//! names no known layer resolves to nothing and is ignored by callers.

use std::collections::BTreeSet;

use serde::Serialize;

use super::document::ProjectDocument;

pub const SEPARATOR: char = '|';

/// Characters stripped from the theme and style parts of a legacy token
const JOIN_CHARS: &[char] = &['_', '|'];

const CHILD_FIELD: &str = "_child_field_";
const PARENT_FIELD: &str = "_parent_field_";

/// Which components a token carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenShape {
    LayerStyle,
    ThemeLayer,
    ThemeStyle,
}

impl TokenShape {
    fn parts(self) -> usize {
        match self {
            TokenShape::LayerStyle | TokenShape::ThemeLayer => 2,
            TokenShape::ThemeStyle => 3,
        }
    }
}

/// A raw selection token, before resolution against a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionToken {
    Structured {
        theme: Option<String>,
        layer: String,
        style: Option<String>,
    },
    Legacy(String),
}

impl SelectionToken {
    /// Splits a token into its components.
    ///
    /// Splitting stops after the expected number of parts, so the last
    /// component (a style name) may itself contain the separator.
    pub fn parse(shape: TokenShape, raw: &str) -> Self {
        let parts: Vec<&str> = raw.splitn(shape.parts(), SEPARATOR).collect();
        if parts.len() < shape.parts() {
            return SelectionToken::Legacy(raw.to_string());
        }

        let non_empty = |s: &str| Some(s.to_string()).filter(|s| !s.is_empty());
        match shape {
            TokenShape::LayerStyle => SelectionToken::Structured {
                theme: None,
                layer: parts[0].to_string(),
                style: non_empty(parts[1]),
            },
            TokenShape::ThemeLayer => SelectionToken::Structured {
                theme: non_empty(parts[0]),
                layer: parts[1].to_string(),
                style: None,
            },
            TokenShape::ThemeStyle => SelectionToken::Structured {
                theme: non_empty(parts[0]),
                layer: parts[1].to_string(),
                style: non_empty(parts[2]),
            },
        }
    }
}

/// A token decomposed into its canonical parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedToken {
    pub theme: Option<String>,
    pub layer: String,
    pub style: Option<String>,
}

/// Resolves tokens against the layer ids known to a document
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    /// Longest first, then lexicographic
    known: Vec<String>,
}

impl IdentifierResolver {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| !id.is_empty())
            .collect();
        let mut known: Vec<String> = unique.into_iter().collect();
        known.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        Self { known }
    }

    pub fn for_document(document: &ProjectDocument) -> Self {
        Self::new(document.layer_ids())
    }

    /// Resolves a token of the given shape; `None` when it names no layer
    pub fn resolve(&self, shape: TokenShape, raw: &str) -> Option<ResolvedToken> {
        let resolved = match SelectionToken::parse(shape, raw) {
            SelectionToken::Structured { theme, layer, style } => {
                if layer.is_empty() {
                    return None;
                }
                ResolvedToken { theme, layer, style }
            }
            SelectionToken::Legacy(raw) => self.resolve_legacy(&raw)?,
        };

        Some(match shape {
            TokenShape::LayerStyle => ResolvedToken { theme: None, ..resolved },
            TokenShape::ThemeLayer => ResolvedToken { style: None, ..resolved },
            TokenShape::ThemeStyle => resolved,
        })
    }

    /// Resolves a token without separators by longest known-id match
    pub fn resolve_legacy(&self, raw: &str) -> Option<ResolvedToken> {
        let (pos, id) = self
            .known
            .iter()
            .find_map(|id| raw.find(id.as_str()).map(|pos| (pos, id)))?;

        let strip = |s: &str| Some(s.trim_matches(JOIN_CHARS).to_string()).filter(|s| !s.is_empty());
        Some(ResolvedToken {
            theme: strip(&raw[..pos]),
            layer: id.clone(),
            style: strip(&raw[pos + id.len()..]),
        })
    }
}

pub fn layer_style_token(layer: &str, style: &str) -> String {
    format!("{}{}{}", layer, SEPARATOR, style)
}

pub fn theme_layer_token(theme: &str, layer: &str) -> String {
    format!("{}{}{}", theme, SEPARATOR, layer)
}

pub fn theme_style_token(theme: &str, layer: &str, style: &str) -> String {
    format!("{}{sep}{}{sep}{}", theme, layer, style, sep = SEPARATOR)
}

pub fn child_field_token(relation: &str, field: &str) -> String {
    format!("{}{}{}", relation, CHILD_FIELD, field)
}

pub fn parent_field_token(relation: &str, field: &str) -> String {
    format!("{}{}{}", relation, PARENT_FIELD, field)
}
