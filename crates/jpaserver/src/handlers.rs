use axum::{
    Json,
    extract::{Path, RawQuery, State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use jpaserver_core::{IdType, resource_type_of};
use jpaserver_search::{SearchOutcome, StoredResource};
use jpaserver_subscription::{SubscriptionDao, handle_subscription_socket};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

fn fhir_json(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/fhir+json")],
        Json(body),
    )
        .into_response()
}

fn stored_response(status: StatusCode, stored: StoredResource) -> Response {
    let location = format!(
        "/fhir/{}/{}/_history/{}",
        stored.resource_type, stored.id, stored.version
    );
    let mut response = fhir_json(status, stored.resource);
    if let Ok(value) = location.parse() {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// Let subscriptions see a write. A failure here never fails the write.
async fn notify_change(state: &AppState, resource: &Value) {
    if let Err(e) = state.subscriptions.resource_changed(resource).await {
        tracing::warn!(error = %e, "Failed to notify subscriptions of change");
    }
}

fn check_type(resource_type: &str, body: &Value) -> Result<(), ApiError> {
    let body_type = resource_type_of(body)?;
    if body_type != resource_type {
        return Err(ApiError::bad_request(format!(
            "resourceType '{body_type}' does not match endpoint '{resource_type}'"
        )));
    }
    Ok(())
}

pub async fn create_resource(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    check_type(&resource_type, &payload)?;

    let stored = if resource_type == "Subscription" {
        // Subscriptions go through persistence validation
        let id = state.subscriptions.create(payload).await?;
        let id_part = id.id_part().unwrap_or_default();
        state.resources.read(&resource_type, id_part)?
    } else {
        state.resources.create(payload)?
    };
    notify_change(&state, &stored.resource).await;
    Ok(stored_response(StatusCode::CREATED, stored))
}

pub async fn update_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Response, ApiError> {
    check_type(&resource_type, &payload)?;
    let stored = if resource_type == "Subscription" {
        let id = state
            .subscriptions
            .update(&IdType::new(resource_type.as_str(), id.as_str()), payload)
            .await?;
        state
            .resources
            .read(&resource_type, id.id_part().unwrap_or_default())?
    } else {
        state.resources.update(&resource_type, &id, payload)?
    };
    notify_change(&state, &stored.resource).await;
    let status = if stored.version == 1 {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(stored_response(status, stored))
}

pub async fn read_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let stored = state.resources.read(&resource_type, &id)?;
    Ok(fhir_json(StatusCode::OK, stored.resource))
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.resources.delete(&resource_type, &id)?;
    state.subscriptions.resource_deleted(&resource_type, &id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn search_resource(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let outcome = state
        .resources
        .search(&resource_type, query.as_deref().unwrap_or_default())?;
    Ok(fhir_json(
        StatusCode::OK,
        searchset_bundle(&resource_type, query.as_deref(), outcome),
    ))
}

fn searchset_bundle(resource_type: &str, query: Option<&str>, outcome: SearchOutcome) -> Value {
    let self_link = match query {
        Some(q) if !q.is_empty() => format!("/fhir/{resource_type}?{q}"),
        _ => format!("/fhir/{resource_type}"),
    };
    let entry: Vec<Value> = outcome
        .resources
        .into_iter()
        .map(|resource| {
            let full_url = resource
                .get("id")
                .and_then(Value::as_str)
                .map(|id| IdType::new(resource_type, id).to_string());
            json!({
                "fullUrl": full_url,
                "resource": resource,
                "search": {"mode": "match"},
            })
        })
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": outcome.total,
        "link": [{"relation": "self", "url": self_link}],
        "entry": entry,
    })
}

pub async fn subscription_websocket(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let dao: std::sync::Arc<dyn SubscriptionDao> = state.subscriptions.clone();
    let config = state.config.subscriptions.clone();
    ws.on_upgrade(move |socket| handle_subscription_socket(socket, dao, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchset_bundle() {
        let outcome = SearchOutcome {
            total: 3,
            resources: vec![json!({"resourceType": "Patient", "id": "p1"})],
        };
        let bundle = searchset_bundle("Patient", Some("name=smith&_count=1"), outcome);
        assert_eq!(bundle["type"], "searchset");
        assert_eq!(bundle["total"], 3);
        assert_eq!(bundle["entry"][0]["fullUrl"], "Patient/p1");
        assert_eq!(bundle["entry"][0]["search"]["mode"], "match");
        assert_eq!(bundle["link"][0]["url"], "/fhir/Patient?name=smith&_count=1");
    }

    #[test]
    fn test_check_type() {
        assert!(check_type("Patient", &json!({"resourceType": "Patient"})).is_ok());
        assert!(check_type("Patient", &json!({"resourceType": "Observation"})).is_err());
        assert!(check_type("Patient", &json!({})).is_err());
    }
}
