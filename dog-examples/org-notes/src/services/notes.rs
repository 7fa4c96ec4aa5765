use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use dog_axum::{CurrentTenant, DogAxumError};
use dog_core::DogError;
use dog_postgres::TenantSession;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    pub id: Uuid,
    pub org_id: Uuid,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNote {
    pub body: String,
}

pub fn router(session: TenantSession) -> Router<()> {
    Router::new()
        .route("/", get(list).post(create))
        .with_state(session)
}

async fn list(
    State(session): State<TenantSession>,
    tenant: CurrentTenant,
) -> Result<Json<Vec<Note>>, DogAxumError> {
    let notes = session
        .run_for(&tenant.context(), |tx| {
            Box::pin(async move {
                let notes = sqlx::query_as::<_, Note>(
                    "SELECT id, org_id, body FROM notes ORDER BY created_at, id",
                )
                .fetch_all(&mut **tx)
                .await?;
                Ok(notes)
            })
        })
        .await?;

    Ok(Json(notes))
}

async fn create(
    State(session): State<TenantSession>,
    CurrentTenant(tenant): CurrentTenant,
    Json(input): Json<CreateNote>,
) -> Result<(StatusCode, Json<Note>), DogAxumError> {
    let body = input.body.trim().to_string();
    if body.is_empty() {
        return Err(DogError::bad_request("Note body must not be empty").into());
    }

    let org_id = *tenant.as_uuid();
    let note = session
        .run(&tenant, move |tx| {
            Box::pin(async move {
                let note = sqlx::query_as::<_, Note>(
                    "INSERT INTO notes (org_id, body) VALUES ($1, $2) RETURNING id, org_id, body",
                )
                .bind(org_id)
                .bind(body)
                .fetch_one(&mut **tx)
                .await?;
                Ok(note)
            })
        })
        .await?;

    tracing::info!(tenant = %tenant, note = %note.id, "note created");
    Ok((StatusCode::CREATED, Json(note)))
}
