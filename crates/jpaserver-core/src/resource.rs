use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::error::{CoreError, Result};
use crate::time::format_instant;

/// Read `resourceType` from a resource, rejecting anything that does not look
/// like a resource type name.
pub fn resource_type_of(resource: &Value) -> Result<&str> {
    let resource_type = resource
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_resource("missing resourceType"))?;
    if !resource_type
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
    {
        return Err(CoreError::invalid_resource_type(resource_type));
    }
    Ok(resource_type)
}

pub fn resource_id_of(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str)
}

/// Stamp id, version and lastUpdated onto a resource.
pub fn stamp_meta(
    resource: &mut Value,
    id: &str,
    version: i64,
    last_updated: OffsetDateTime,
) -> Result<()> {
    let obj = resource
        .as_object_mut()
        .ok_or_else(|| CoreError::invalid_resource("resource must be a JSON object"))?;
    obj.insert("id".to_string(), Value::String(id.to_string()));

    let meta = obj.entry("meta").or_insert_with(|| json!({}));
    let meta = meta
        .as_object_mut()
        .ok_or_else(|| CoreError::invalid_resource("meta must be an object"))?;
    meta.insert("versionId".to_string(), Value::String(version.to_string()));
    meta.insert(
        "lastUpdated".to_string(),
        Value::String(format_instant(last_updated)?),
    );
    Ok(())
}
