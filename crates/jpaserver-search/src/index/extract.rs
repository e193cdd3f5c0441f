//! Search index extraction.
//!
//! Walks the registered parameter paths of a resource and turns the values
//! found there into typed index rows.

use jpaserver_core::{DateRange, IdType};
use serde_json::Value;

use super::{
    DateIndex, IndexRow, NumberIndex, QuantityIndex, ResourceLink, StringIndex, TagRow, TagType,
    TokenIndex, UriIndex,
};
use crate::normalize::normalize_string;
use crate::parameters::{SearchParamDefinition, SearchParamType};
use crate::registry::SearchParamRegistry;

/// Parameters answered from `hfj_resource` columns or `hfj_res_tag` rather
/// than from per-parameter index rows.
const ROOT_PARAMETERS: &[&str] = &["_id", "_lastUpdated", "_tag", "_security", "_profile"];

/// Extract every index row of a resource for the parameters registered on its type.
pub fn extract_index_rows(
    registry: &SearchParamRegistry,
    resource_type: &str,
    resource: &Value,
) -> Vec<IndexRow> {
    let mut rows = extract_tags(resource);

    for definition in registry.get_all_for_type(resource_type) {
        if ROOT_PARAMETERS.contains(&definition.code.as_str()) {
            continue;
        }
        for path in &definition.paths {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            let mut values = Vec::new();
            navigate_json(resource, &segments, &mut values);
            for value in values {
                extract_value(&definition, value, &mut rows);
            }
        }
    }

    rows
}

fn extract_value(definition: &SearchParamDefinition, value: &Value, rows: &mut Vec<IndexRow>) {
    let code = definition.code.as_str();
    match definition.param_type {
        SearchParamType::String => extract_strings(code, value, rows),
        SearchParamType::Token => extract_tokens(code, value, rows),
        SearchParamType::Date => extract_dates(code, value, rows),
        SearchParamType::Number => extract_number(code, value, rows),
        SearchParamType::Quantity => extract_quantity(code, value, rows),
        SearchParamType::Uri => {
            if let Some(uri) = value.as_str() {
                rows.push(IndexRow::Uri(UriIndex {
                    param_name: code.to_string(),
                    uri: uri.to_string(),
                }));
            }
        }
        SearchParamType::Reference => extract_reference(code, value, rows),
        // Composite parameters are answered from their components' rows
        SearchParamType::Composite | SearchParamType::Special => {}
    }
}

fn string_row(code: &str, value: &str) -> Option<IndexRow> {
    if value.is_empty() {
        return None;
    }
    Some(IndexRow::String(StringIndex {
        param_name: code.to_string(),
        value_normalized: normalize_string(value),
        value_exact: value.to_string(),
    }))
}

fn extract_strings(code: &str, value: &Value, rows: &mut Vec<IndexRow>) {
    match value {
        Value::String(s) => rows.extend(string_row(code, s)),
        Value::Object(obj) => {
            // HumanName, Address and friends: every string part is searchable
            for field in [
                "text",
                "family",
                "given",
                "prefix",
                "suffix",
                "line",
                "city",
                "district",
                "state",
                "postalCode",
                "country",
            ] {
                match obj.get(field) {
                    Some(Value::String(s)) => rows.extend(string_row(code, s)),
                    Some(Value::Array(items)) => rows.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .filter_map(|s| string_row(code, s)),
                    ),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn token_row(code: &str, system: Option<&str>, value: &str) -> IndexRow {
    IndexRow::Token(TokenIndex {
        param_name: code.to_string(),
        system: system.filter(|s| !s.is_empty()).map(String::from),
        value: value.to_string(),
    })
}

fn extract_tokens(code: &str, value: &Value, rows: &mut Vec<IndexRow>) {
    match value {
        Value::String(s) => rows.push(token_row(code, None, s)),
        Value::Bool(b) => rows.push(token_row(code, None, &b.to_string())),
        Value::Object(obj) => {
            // CodeableConcept
            if let Some(codings) = obj.get("coding").and_then(Value::as_array) {
                for coding in codings {
                    extract_tokens(code, coding, rows);
                }
                return;
            }
            let system = obj.get("system").and_then(Value::as_str);
            // Coding, then Identifier / ContactPoint
            if let Some(c) = obj.get("code").and_then(Value::as_str) {
                rows.push(token_row(code, system, c));
            } else if let Some(v) = obj.get("value").and_then(Value::as_str) {
                rows.push(token_row(code, system, v));
            }
        }
        _ => {}
    }
}

fn extract_dates(code: &str, value: &Value, rows: &mut Vec<IndexRow>) {
    let range = match value {
        Value::String(s) => DateRange::parse(s).map(Some),
        Value::Object(obj) if obj.contains_key("start") || obj.contains_key("end") => {
            DateRange::from_period(
                obj.get("start").and_then(Value::as_str),
                obj.get("end").and_then(Value::as_str),
            )
        }
        _ => Ok(None),
    };
    match range {
        Ok(Some(range)) => rows.push(IndexRow::Date(DateIndex {
            param_name: code.to_string(),
            low: range.low,
            high: range.high,
        })),
        Ok(None) => {}
        Err(e) => tracing::debug!(param = code, error = %e, "Skipping unparseable date"),
    }
}

fn extract_number(code: &str, value: &Value, rows: &mut Vec<IndexRow>) {
    let number = value
        .as_f64()
        .or_else(|| value.get("value").and_then(Value::as_f64));
    if let Some(number) = number {
        rows.push(IndexRow::Number(NumberIndex {
            param_name: code.to_string(),
            value: number,
        }));
    }
}

fn extract_quantity(code: &str, value: &Value, rows: &mut Vec<IndexRow>) {
    let Some(number) = value.get("value").and_then(Value::as_f64) else {
        return;
    };
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
    rows.push(IndexRow::Quantity(QuantityIndex {
        param_name: code.to_string(),
        value: number,
        system: field("system"),
        code: field("code"),
        units: field("unit"),
    }));
}

fn extract_reference(code: &str, value: &Value, rows: &mut Vec<IndexRow>) {
    let Some(reference) = value.get("reference").and_then(Value::as_str) else {
        return;
    };
    // Contained references never leave the resource
    if reference.starts_with('#') {
        return;
    }
    let id = IdType::parse(reference);
    let (Some(target_type), Some(target_id)) = (id.resource_type(), id.id_part()) else {
        tracing::debug!(param = code, reference, "Skipping reference without type and id");
        return;
    };
    rows.push(IndexRow::Link(ResourceLink {
        src_path: code.to_string(),
        target_resource_type: target_type.to_string(),
        target_fhir_id: target_id.to_string(),
        target_pid: None,
    }));
}

fn extract_tags(resource: &Value) -> Vec<IndexRow> {
    let Some(meta) = resource.get("meta") else {
        return Vec::new();
    };
    let mut rows = Vec::new();

    for (field, tag_type) in [("tag", TagType::Tag), ("security", TagType::SecurityLabel)] {
        for coding in meta.get(field).and_then(Value::as_array).into_iter().flatten() {
            if let Some(code) = coding.get("code").and_then(Value::as_str) {
                rows.push(IndexRow::Tag(TagRow {
                    tag_type,
                    system: coding.get("system").and_then(Value::as_str).map(String::from),
                    code: code.to_string(),
                }));
            }
        }
    }
    for profile in meta.get("profile").and_then(Value::as_array).into_iter().flatten() {
        if let Some(url) = profile.as_str() {
            rows.push(IndexRow::Tag(TagRow {
                tag_type: TagType::Profile,
                system: None,
                code: url.to_string(),
            }));
        }
    }

    rows
}

/// Collect the values at a dotted path.
///
/// Arrays are walked transparently and a segment also matches its FHIR
/// choice-type spellings (`effective` finds `effectiveDateTime`).
fn navigate_json<'a>(value: &'a Value, segments: &[&str], results: &mut Vec<&'a Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        match value {
            Value::Array(items) => results.extend(items.iter().filter(|v| !v.is_null())),
            Value::Null => {}
            other => results.push(other),
        }
        return;
    };

    match value {
        Value::Object(obj) => {
            if let Some(child) = obj.get(*segment) {
                navigate_json(child, rest, results);
                return;
            }
            for (key, child) in obj {
                if key.len() > segment.len()
                    && key.starts_with(segment)
                    && key.as_bytes()[segment.len()].is_ascii_uppercase()
                {
                    navigate_json(child, rest, results);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                navigate_json(item, segments, results);
            }
        }
        _ => {}
    }
}
