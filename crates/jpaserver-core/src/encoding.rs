//! Resource wire encodings.
//!
//! JSON is the canonical form. XML follows the FHIR XML conventions:
//! the root element is named after `resourceType` in the FHIR namespace,
//! primitives are empty elements carrying a `value` attribute, and
//! repeating elements are written once per item.

use std::fmt;
use std::io::Cursor;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

const FHIR_NS: &str = "http://hl7.org/fhir";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Json,
    Xml,
}

impl Encoding {
    /// Resolve a `_format` value. Accepts the short names and the MIME types
    /// FHIR allows for each encoding.
    pub fn from_format_param(value: &str) -> Option<Self> {
        let value = value.trim();
        let mime = value.split(';').next().unwrap_or(value).trim();
        match mime.to_ascii_lowercase().as_str() {
            "json" | "application/json" | "application/fhir+json" | "application/json+fhir" => {
                Some(Self::Json)
            }
            "xml" | "text/xml" | "application/xml" | "application/fhir+xml"
            | "application/xml+fhir" => Some(Self::Xml),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/fhir+json",
            Self::Xml => "application/fhir+xml",
        }
    }

    /// Encode a resource in this encoding.
    pub fn encode(&self, resource: &Value) -> Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string(resource)?),
            Self::Xml => encode_xml(resource),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Xml => f.write_str("xml"),
        }
    }
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn encode_xml(resource: &Value) -> Result<String> {
    let obj = resource
        .as_object()
        .ok_or_else(|| CoreError::invalid_resource("resource must be a JSON object"))?;
    let resource_type = obj
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_resource("resource has no resourceType"))?;

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_resource(&mut writer, resource_type, obj)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| CoreError::xml_encoding(e.to_string()))
}

fn write_resource(writer: &mut XmlWriter, resource_type: &str, obj: &Map<String, Value>) -> Result<()> {
    let mut root = BytesStart::new(resource_type);
    root.push_attribute(("xmlns", FHIR_NS));
    write_event(writer, Event::Start(root))?;

    for (name, value) in obj {
        if name == "resourceType" || name.starts_with('_') {
            continue;
        }
        write_value(writer, name, value)?;
    }

    write_event(writer, Event::End(BytesEnd::new(resource_type)))
}

fn write_value(writer: &mut XmlWriter, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_value(writer, name, item)?;
            }
            Ok(())
        }
        Value::Object(obj) => {
            write_event(writer, Event::Start(BytesStart::new(name)))?;
            // contained and Bundle.entry.resource hold a nested resource
            if let Some(nested_type) = obj.get("resourceType").and_then(Value::as_str) {
                write_resource(writer, nested_type, obj)?;
            } else {
                for (child, child_value) in obj {
                    if child.starts_with('_') {
                        continue;
                    }
                    write_value(writer, child, child_value)?;
                }
            }
            write_event(writer, Event::End(BytesEnd::new(name)))
        }
        Value::Null => Ok(()),
        primitive => {
            let text = match primitive {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let mut element = BytesStart::new(name);
            element.push_attribute(("value", text.as_str()));
            write_event(writer, Event::Empty(element))
        }
    }
}

fn write_event(writer: &mut XmlWriter, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| CoreError::xml_encoding(e.to_string()))
}
