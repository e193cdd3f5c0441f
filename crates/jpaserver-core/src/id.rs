//! Resource identity handling.
//!
//! An [`IdType`] is the lenient parse of whatever a client supplied as a
//! resource identity. It accepts the forms that appear in FHIR traffic:
//! - Bare: `123`
//! - Relative: `Subscription/123`
//! - Versioned: `Subscription/123/_history/2`
//! - Absolute URL: `http://example.org/fhir/Subscription/123`
//!
//! Parsing never fails; callers decide whether a missing or malformed id part
//! is an error in their context via [`IdType::has_id_part`] and
//! [`IdType::is_id_part_valid`].

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// FHIR ID regex: [A-Za-z0-9\-\.]{1,64}
static ID_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("Invalid id regex")
});

/// Generate a new server-assigned logical id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Returns true if `id` is a syntactically valid FHIR logical id.
pub fn is_valid_id(id: &str) -> bool {
    ID_REGEX.is_match(id)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdType {
    resource_type: Option<String>,
    id_part: Option<String>,
    version: Option<String>,
}

impl IdType {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            id_part: Some(id.into()),
            version: None,
        }
    }

    /// Parse a client supplied identity.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            return Self::default();
        }

        let path: Vec<String> = if value.contains("://") {
            match url::Url::parse(value) {
                Ok(url) => url
                    .path_segments()
                    .map(|segments| {
                        segments
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                Err(_) => return Self::default(),
            }
        } else {
            value
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let (path, version) = match path.iter().position(|s| s == "_history") {
            Some(idx) => (&path[..idx], path.get(idx + 1).cloned()),
            None => (&path[..], None),
        };

        match path {
            [] => Self::default(),
            [id] => Self {
                resource_type: None,
                id_part: Some(id.clone()),
                version,
            },
            [.., resource_type, id] => Self {
                resource_type: Some(resource_type.clone()),
                id_part: Some(id.clone()),
                version,
            },
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn id_part(&self) -> Option<&str> {
        self.id_part.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn has_id_part(&self) -> bool {
        self.id_part.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn has_resource_type(&self) -> bool {
        self.resource_type.is_some()
    }

    /// True when the id part matches the FHIR id grammar.
    pub fn is_id_part_valid(&self) -> bool {
        self.id_part.as_deref().is_some_and(is_valid_id)
    }

    /// Returns a copy carrying `resource_type`, keeping id and version.
    pub fn with_resource_type(&self, resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            id_part: self.id_part.clone(),
            version: self.version.clone(),
        }
    }

    pub fn to_versionless(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(resource_type) = &self.resource_type {
            write!(f, "{resource_type}/")?;
        }
        if let Some(id) = &self.id_part {
            write!(f, "{id}")?;
        }
        if let Some(version) = &self.version {
            write!(f, "/_history/{version}")?;
        }
        Ok(())
    }
}
