//! Query string parsing.
//!
//! Turns `name:exact=Smith&subject:Patient.name=Jo&_sort=-date&_count=10`
//! into a [`SearchRequest`]. Values stay raw (prefixes are split later by the
//! predicate builders, which know the parameter type).

use url::form_urlencoded;

use crate::error::{Result, SearchError};
use crate::parameters::SearchModifier;

/// Parameters that shape the response rather than filter resources.
const RESULT_PARAMETERS: &[&str] = &[
    "_format",
    "_pretty",
    "_summary",
    "_elements",
    "_total",
    "_include",
    "_revinclude",
    "_contained",
];

/// One `name=value` pair of a search. Values are OR-ed; separate pairs are AND-ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedParam {
    pub name: String,
    pub modifier: Option<SearchModifier>,
    /// Remainder of a chained parameter, e.g. `name` in `subject.name`
    pub chain: Option<String>,
    pub values: Vec<String>,
}

impl ParsedParam {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            modifier: None,
            chain: None,
            values,
        }
    }

    /// Parse a (possibly chained, possibly modified) key and raw value.
    pub fn from_pair(key: &str, value: &str) -> Result<Self> {
        let (name, modifier, chain) = split_param_key(key)?;
        Ok(Self {
            name,
            modifier,
            chain,
            values: split_unescaped(value, ','),
        })
    }

    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub param: String,
    pub descending: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub params: Vec<ParsedParam>,
    pub sort: Vec<SortSpec>,
    pub count: Option<usize>,
    pub offset: Option<usize>,
}

impl SearchRequest {
    /// Parse an application/x-www-form-urlencoded query string.
    pub fn parse(query: &str) -> Result<Self> {
        let query = query.trim_start_matches('?');
        let mut request = SearchRequest::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let key = key.trim();
            match key {
                "" => continue,
                "_sort" => request.sort.extend(parse_sort(&value)),
                "_count" => request.count = Some(parse_non_negative("_count", &value)?),
                "_offset" => request.offset = Some(parse_non_negative("_offset", &value)?),
                k if RESULT_PARAMETERS.contains(&k.split(':').next().unwrap_or(k)) => {
                    tracing::trace!(parameter = k, "Ignoring result parameter");
                }
                _ => {
                    let param = ParsedParam::from_pair(key, &value)?;
                    // Empty values are ignored
                    if !param.values.is_empty() {
                        request.params.push(param);
                    }
                }
            }
        }

        Ok(request)
    }

    pub fn with_param(mut self, param: ParsedParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Split `subject:Patient.name:exact` into (`subject`, `Patient` modifier, `name:exact`).
pub fn split_param_key(key: &str) -> Result<(String, Option<SearchModifier>, Option<String>)> {
    let (head, chain) = match key.split_once('.') {
        Some((head, chain)) if !chain.is_empty() => (head, Some(chain.to_string())),
        Some((head, _)) => (head, None),
        None => (key, None),
    };

    let (name, modifier) = match head.split_once(':') {
        Some((name, modifier)) => {
            let parsed = SearchModifier::parse(modifier).ok_or_else(|| {
                SearchError::unsupported(format!("unknown modifier ':{modifier}' on '{name}'"))
            })?;
            (name, Some(parsed))
        }
        None => (head, None),
    };

    if name.is_empty() {
        return Err(SearchError::invalid_value(format!("missing parameter name in '{key}'")));
    }

    Ok((name.to_string(), modifier, chain))
}

/// Split on `separator`, honouring backslash escapes (`\,` `\$` `\|` `\\`).
pub fn split_unescaped(value: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) if next == separator => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            c if c == separator => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_sort(value: &str) -> Vec<SortSpec> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('-') {
            Some(param) => SortSpec {
                param: param.to_string(),
                descending: true,
            },
            None => SortSpec {
                param: s.to_string(),
                descending: false,
            },
        })
        .collect()
}

fn parse_non_negative(name: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        SearchError::invalid_value(format!("{name} must be a non-negative integer, got '{value}'"))
    })
}
