use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SearchError};

/// FHIR SearchParameter type enumeration
/// See: https://hl7.org/fhir/R4/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

impl SearchParamType {
    /// Parse a search parameter type name. Unknown names are unsupported.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "number" => Ok(Self::Number),
            "date" => Ok(Self::Date),
            "string" => Ok(Self::String),
            "token" => Ok(Self::Token),
            "reference" => Ok(Self::Reference),
            "composite" => Ok(Self::Composite),
            "quantity" => Ok(Self::Quantity),
            "uri" => Ok(Self::Uri),
            "special" => Ok(Self::Special),
            other => Err(SearchError::unsupported(format!(
                "unknown search parameter type '{other}'"
            ))),
        }
    }

    /// Types whose value is a point or range on an ordered axis. Repeated
    /// AND occurrences of these narrow the same indexed value.
    pub fn is_range_valued(&self) -> bool {
        matches!(self, Self::Date | Self::Number | Self::Quantity)
    }

    pub fn accepts_prefix(&self) -> bool {
        self.is_range_valued()
    }
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Number => "number",
            Self::Date => "date",
            Self::String => "string",
            Self::Token => "token",
            Self::Reference => "reference",
            Self::Composite => "composite",
            Self::Quantity => "quantity",
            Self::Uri => "uri",
            Self::Special => "special",
        };
        f.write_str(s)
    }
}

/// Search modifiers, applied as a suffix to the parameter name: `name:modifier`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchModifier {
    Missing,
    Exact,
    Contains,
    Text,
    Not,
    In,
    NotIn,
    Below,
    Above,
    Identifier,
    /// Reference target restriction, e.g. `subject:Patient`
    Type(String),
}

impl SearchModifier {
    /// Parse a modifier. Capitalised names are resource type restrictions.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing" => Some(Self::Missing),
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "text" => Some(Self::Text),
            "not" => Some(Self::Not),
            "in" => Some(Self::In),
            "not-in" => Some(Self::NotIn),
            "below" => Some(Self::Below),
            "above" => Some(Self::Above),
            "identifier" => Some(Self::Identifier),
            other if other.chars().next().is_some_and(|c| c.is_ascii_uppercase()) => {
                Some(Self::Type(other.to_string()))
            }
            _ => None,
        }
    }

    /// Check if this modifier is applicable to the given parameter type.
    pub fn applicable_to(&self, param_type: SearchParamType) -> bool {
        match self {
            Self::Missing => param_type != SearchParamType::Composite,
            Self::Exact | Self::Contains => param_type == SearchParamType::String,
            Self::Not | Self::Text | Self::In | Self::NotIn => param_type == SearchParamType::Token,
            Self::Below | Self::Above => {
                matches!(param_type, SearchParamType::Token | SearchParamType::Uri)
            }
            Self::Type(_) | Self::Identifier => param_type == SearchParamType::Reference,
        }
    }
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Exact => f.write_str("exact"),
            Self::Contains => f.write_str("contains"),
            Self::Text => f.write_str("text"),
            Self::Not => f.write_str("not"),
            Self::In => f.write_str("in"),
            Self::NotIn => f.write_str("not-in"),
            Self::Below => f.write_str("below"),
            Self::Above => f.write_str("above"),
            Self::Identifier => f.write_str("identifier"),
            Self::Type(t) => f.write_str(t),
        }
    }
}

/// Prefixes for number/date/quantity search values
/// e.g., `ge2020-01-01`, `lt5.0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SearchPrefix {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa, // starts after
    Eb, // ends before
    Ap, // approximately
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SearchPrefix::Eq => "eq",
            SearchPrefix::Ne => "ne",
            SearchPrefix::Gt => "gt",
            SearchPrefix::Lt => "lt",
            SearchPrefix::Ge => "ge",
            SearchPrefix::Le => "le",
            SearchPrefix::Sa => "sa",
            SearchPrefix::Eb => "eb",
            SearchPrefix::Ap => "ap",
        };
        f.write_str(s)
    }
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "sa" => Some(Self::Sa),
            "eb" => Some(Self::Eb),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }

    /// Split a leading prefix off a value, defaulting to `eq`.
    ///
    /// A prefix is only recognised when the remainder starts like a number or date.
    pub fn split(value: &str) -> (SearchPrefix, &str) {
        if value.len() > 2 && value.is_char_boundary(2) {
            let (head, rest) = value.split_at(2);
            if let Some(prefix) = Self::parse(head)
                && rest
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.')
            {
                return (prefix, rest);
            }
        }
        (SearchPrefix::Eq, value)
    }
}

/// A registered search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParamDefinition {
    pub code: String,
    /// Resource types the parameter applies to; `Resource` for all.
    pub base: Vec<String>,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    /// Dotted element paths relative to the resource, e.g. `name.family`.
    pub paths: Vec<String>,
    /// Allowed reference targets (reference parameters).
    #[serde(default)]
    pub targets: Vec<String>,
    /// Component parameter codes (composite parameters).
    #[serde(default)]
    pub components: Vec<String>,
}

impl SearchParamDefinition {
    pub fn new(code: impl Into<String>, base: &str, param_type: SearchParamType) -> Self {
        Self {
            code: code.into(),
            base: vec![base.to_string()],
            param_type,
            paths: Vec::new(),
            targets: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_components(mut self, components: &[&str]) -> Self {
        self.components = components.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn is_common(&self) -> bool {
        self.base.iter().any(|b| b == "Resource" || b == "DomainResource")
    }

    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.is_common() || self.base.iter().any(|b| b == resource_type)
    }
}
