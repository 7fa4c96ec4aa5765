//! Inbound callbacks from third parties. Mounted on an allow-listed path:
//! no tenant header, no tenant binding, and no access to tenant data.

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use dog_axum::DogAxumError;
use dog_core::validate_tenant_identifier;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    pub event: String,
    /// The organization the event is about, as the provider reports it.
    pub org_id: Option<String>,
}

pub fn router() -> Router<()> {
    Router::new().route("/billing", post(billing))
}

async fn billing(Json(event): Json<BillingEvent>) -> Result<(StatusCode, Json<Value>), DogAxumError> {
    let org = validate_tenant_identifier(event.org_id.as_deref())?;

    tracing::info!(event = %event.event, org = %org, "billing event accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event": event.event, "org_id": org.to_string() })),
    ))
}
