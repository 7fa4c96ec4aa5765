use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::routing::{get, post};
use axum::Router;
use dog_axum::{axum, AxumApp, CurrentTenant};
use dog_core::{
    InMemoryTenantCatalog, ResolverFailurePolicy, TenancySettings, TenantExistence, TenantId,
    TenantResolver,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

const ORG_1: &str = "00000000-0000-4000-8000-000000000001";
const ORG_2: &str = "00000000-0000-4000-8000-000000000002";
const UNREGISTERED: &str = "00000000-0000-4000-8000-0000000000ff";
const SENTINEL: &str = "00000000-0000-4000-8000-000000000000";

struct DownResolver;

#[async_trait::async_trait]
impl TenantResolver for DownResolver {
    async fn resolve(&self, _tenant: &TenantId) -> anyhow::Result<TenantExistence> {
        Err(anyhow::anyhow!("catalog offline"))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("catalog offline"))
    }
}

fn routes() -> Router<()> {
    Router::new()
        .route(
            "/notes",
            get(|CurrentTenant(tenant): CurrentTenant| async move { tenant.to_string() }),
        )
        .route("/webhooks/billing", post(|| async { "accepted" }))
        .route(
            "/webhooks/misuse",
            get(|CurrentTenant(tenant): CurrentTenant| async move { tenant.to_string() }),
        )
}

fn build_with(resolver: Arc<dyn TenantResolver>, settings: TenancySettings) -> AxumApp {
    axum(resolver, &settings).merge(routes())
}

fn build() -> AxumApp {
    let catalog = InMemoryTenantCatalog::with_tenants([
        TenantId::parse(ORG_1).unwrap(),
        TenantId::parse(ORG_2).unwrap(),
    ]);
    build_with(Arc::new(catalog), TenancySettings::default())
}

fn get_notes(org: Option<&str>) -> Request<Body> {
    let mut req = Request::builder().method("GET").uri("/notes");
    if let Some(org) = org {
        req = req.header("x-org-id", org);
    }
    req.body(Body::empty()).unwrap()
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(res: axum::response::Response) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn missing_header_is_400_missing_tenant() {
    let res = build().into_router().oneshot(get_notes(None)).await.unwrap();

    assert_eq!(res.status().as_u16(), 400);
    let body = json_body(res).await;
    assert_eq!(body["name"], "BadRequest");
    assert_eq!(body["className"], "bad-request");
    assert_eq!(body["data"]["reason"], "MissingTenant");
}

#[tokio::test]
async fn malformed_header_is_400_malformed_identifier() {
    let res = build()
        .into_router()
        .oneshot(get_notes(Some("not-a-uuid")))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["data"]["reason"], "MalformedIdentifier");
}

#[tokio::test]
async fn empty_header_is_malformed_not_missing() {
    let res = build().into_router().oneshot(get_notes(Some(""))).await.unwrap();

    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["data"]["reason"], "MalformedIdentifier");
}

#[tokio::test]
async fn non_utf8_header_is_malformed() {
    let req = Request::builder()
        .method("GET")
        .uri("/notes")
        .header("x-org-id", HeaderValue::from_bytes(b"\xff\xfe").unwrap())
        .body(Body::empty())
        .unwrap();
    let res = build().into_router().oneshot(req).await.unwrap();

    assert_eq!(res.status().as_u16(), 400);
    assert_eq!(json_body(res).await["data"]["reason"], "MalformedIdentifier");
}

#[tokio::test]
async fn unregistered_tenant_is_403_unknown_tenant() {
    let res = build()
        .into_router()
        .oneshot(get_notes(Some(UNREGISTERED)))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 403);
    let body = json_body(res).await;
    assert_eq!(body["name"], "Forbidden");
    assert_eq!(body["data"]["reason"], "UnknownTenant");
}

#[tokio::test]
async fn admitted_tenant_reaches_the_handler() {
    let app = build().into_router();

    let res = app.clone().oneshot(get_notes(Some(ORG_1))).await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(text_body(res).await, ORG_1);

    let res = app.oneshot(get_notes(Some(ORG_2))).await.unwrap();
    assert_eq!(text_body(res).await, ORG_2);
}

#[tokio::test]
async fn upper_case_header_is_canonicalised_before_the_handler() {
    let res = build()
        .into_router()
        .oneshot(get_notes(Some("00000000-0000-4000-8000-00000000000A")))
        .await
        .unwrap();

    // Not registered, but proves the value was parsed rather than passed through.
    assert_eq!(res.status().as_u16(), 403);
}

#[tokio::test]
async fn sentinel_tenant_is_admitted_without_registration() {
    let res = build()
        .into_router()
        .oneshot(get_notes(Some(SENTINEL)))
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(text_body(res).await, SENTINEL);
}

#[tokio::test]
async fn health_and_webhooks_bypass_the_gate() {
    let app = build().into_router();

    let res = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(text_body(res).await, "ok");

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/billing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(text_body(res).await, "accepted");
}

#[tokio::test]
async fn tenant_extractor_on_an_allow_listed_path_is_a_server_error() {
    let res = build()
        .into_router()
        .oneshot(
            Request::builder()
                .uri("/webhooks/misuse")
                .header("x-org-id", ORG_1)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // The header is ignored on allow-listed paths; nothing is bound.
    assert_eq!(res.status().as_u16(), 500);
    assert_eq!(json_body(res).await["name"], "GeneralError");
}

#[tokio::test]
async fn rejections_carry_a_request_id() {
    let res = build().into_router().oneshot(get_notes(None)).await.unwrap();
    assert!(res.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn request_id_is_preserved_when_provided() {
    let provided = HeaderValue::from_static("req-test-123");
    let req = Request::builder()
        .uri("/notes")
        .header("x-org-id", ORG_1)
        .header("x-request-id", provided.clone())
        .body(Body::empty())
        .unwrap();
    let res = build().into_router().oneshot(req).await.unwrap();

    assert_eq!(res.headers().get("x-request-id").unwrap(), &provided);
}

#[tokio::test]
async fn resolver_outage_fail_open_admits() {
    let app = build_with(Arc::new(DownResolver), TenancySettings::default()).into_router();
    let res = app.oneshot(get_notes(Some(ORG_1))).await.unwrap();

    assert_eq!(res.status().as_u16(), 200);
}

#[tokio::test]
async fn resolver_outage_fail_closed_is_503() {
    let settings = TenancySettings {
        on_resolver_unavailable: ResolverFailurePolicy::FailClosed,
        ..TenancySettings::default()
    };
    let app = build_with(Arc::new(DownResolver), settings).into_router();
    let res = app.oneshot(get_notes(Some(ORG_1))).await.unwrap();

    assert_eq!(res.status().as_u16(), 503);
    assert_eq!(json_body(res).await["data"]["reason"], "ResolverUnavailable");
}

#[tokio::test]
async fn malformed_header_is_rejected_even_when_failing_open() {
    let app = build_with(Arc::new(DownResolver), TenancySettings::default()).into_router();
    let res = app.oneshot(get_notes(Some("not-a-uuid"))).await.unwrap();

    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn readiness_reflects_the_tenant_catalog() {
    let res = build()
        .into_router()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    let app = build_with(Arc::new(DownResolver), TenancySettings::default()).into_router();
    let res = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 503);
}
