//! Text frame protocol spoken on a subscription socket.
//!
//! Client to server:
//! - `bind <id>` binds to an existing subscription (`123` or `Subscription/123`)
//! - `bind <Type>?<params>` creates a subscription for the criteria
//!
//! Server to client:
//! - `bound <id>` after a successful bind
//! - `ping <id>` when a static subscription has new matches
//! - `add <id>\n<resource>` per matching resource of a dynamic subscription

use jpaserver_core::{Encoding, IdType};

const BIND_PREFIX: &str = "bind ";

/// WebSocket close code for a protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    Static(IdType),
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Bind(BindTarget),
    Other(String),
}

impl ClientMessage {
    pub fn parse(payload: &str) -> Self {
        match payload.strip_prefix(BIND_PREFIX) {
            Some(rest) if rest.contains('?') => Self::Bind(BindTarget::Dynamic(rest.to_string())),
            Some(rest) => Self::Bind(BindTarget::Static(IdType::parse(rest))),
            None => Self::Other(payload.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_PROTOCOL_ERROR,
            reason: reason.into(),
        }
    }

    pub fn invalid_bind(detail: impl std::fmt::Display) -> Self {
        Self::protocol_error(format!("Invalid bind request - {detail}"))
    }
}

/// Encoding requested by the `_format` parameter of bind criteria. The last
/// recognized value wins; anything else leaves JSON.
pub fn encoding_for_criteria(criteria: &str) -> Encoding {
    let Some((_, query)) = criteria.split_once('?') else {
        return Encoding::Json;
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(name, _)| name == "_format")
        .filter_map(|(_, value)| Encoding::from_format_param(&value))
        .last()
        .unwrap_or_default()
}

pub fn bound_frame(id_part: &str) -> String {
    format!("bound {id_part}")
}

pub fn ping_frame(id_part: &str) -> String {
    format!("ping {id_part}")
}

pub fn add_frame(id_part: &str, encoded: &str) -> String {
    format!("add {id_part}\n{encoded}")
}

pub fn unexpected_frame(payload: &str) -> String {
    format!("Unexpected client message: {payload}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_forms() {
        assert_eq!(
            ClientMessage::parse("bind Subscription/123"),
            ClientMessage::Bind(BindTarget::Static(IdType::new("Subscription", "123")))
        );
        assert_eq!(
            ClientMessage::parse("bind Patient?name=Smith"),
            ClientMessage::Bind(BindTarget::Dynamic("Patient?name=Smith".into()))
        );
        assert_eq!(
            ClientMessage::parse("hello"),
            ClientMessage::Other("hello".into())
        );
        // Prefix is case sensitive and needs the separating space
        assert!(matches!(ClientMessage::parse("bind"), ClientMessage::Other(_)));
        assert!(matches!(ClientMessage::parse("BIND 1"), ClientMessage::Other(_)));
    }

    #[test]
    fn test_bind_without_id() {
        let ClientMessage::Bind(BindTarget::Static(id)) = ClientMessage::parse("bind ") else {
            panic!("expected static bind");
        };
        assert!(!id.has_id_part());
    }

    #[test]
    fn test_encoding_for_criteria() {
        assert_eq!(encoding_for_criteria("Patient?name=x"), Encoding::Json);
        assert_eq!(encoding_for_criteria("Patient?_format=xml"), Encoding::Xml);
        assert_eq!(
            encoding_for_criteria("Patient?_format=application%2Ffhir%2Bxml&name=x"),
            Encoding::Xml
        );
        assert_eq!(encoding_for_criteria("Patient?_format=yaml"), Encoding::Json);
        assert_eq!(
            encoding_for_criteria("Patient?_format=xml&_format=bogus"),
            Encoding::Xml
        );
    }

    #[test]
    fn test_frames() {
        assert_eq!(bound_frame("7"), "bound 7");
        assert_eq!(ping_frame("7"), "ping 7");
        assert_eq!(add_frame("7", "{}"), "add 7\n{}");
        assert_eq!(
            CloseStatus::invalid_bind("No ID included"),
            CloseStatus {
                code: 1002,
                reason: "Invalid bind request - No ID included".into()
            }
        );
    }
}
