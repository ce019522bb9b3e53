use crate::config::AppConfig;
use crate::database::sqlite::SqliteDatabase;
use crate::errors::{AppError, Result};
use crate::services::jwt::JwtManager;
use crate::services::kyc_service::KycService;
use crate::services::notification_service::NotificationService;
use crate::services::review_service::ReviewService;
use crate::services::stripe_gateway::StripeGateway;
use axum::http::StatusCode;
use axum::routing::options;
use axum::{response::IntoResponse, Extension, Json, Router};
use hyper::Method;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;
use utoipa::{Modify, OpenApi};
use utoipa_redoc::{Redoc, Servable};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

pub mod routes;
pub mod types;

pub use routes::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::onboarding_submit,
        routes::org_init_kyc,
        routes::org_submit_kyc,
        routes::org_kyc_link,
        routes::org_kyc_status,
        routes::admin_kyc_pending,
        routes::admin_kyc_stats,
        routes::admin_kyc_detail,
        routes::admin_approve,
        routes::admin_reject,
        routes::admin_request_info,
        routes::admin_approve_document,
        routes::admin_reject_document,
        routes::admin_request_documents,
        routes::admin_add_notes,
        routes::admin_pause_payouts,
        routes::admin_resume_payouts,
        routes::admin_onboarding_link,
        routes::processor_webhook,
    ),
    components(
        schemas(
            types::OnboardingSubmitRequest,
            types::DocumentRefs,
            types::BeneficialOwnerInput,
            types::OnboardingSubmitResponse,
            types::InitKycResponse,
            types::OnboardingLinkResponse,
            types::KycStatusResponse,
            types::PendingListResponse,
            types::PendingSummary,
            types::KycStatsResponse,
            types::KycDetailResponse,
            types::OwnerSummary,
            types::DocumentInfo,
            types::ProcessorInfo,
            types::ApproveRequest,
            types::RejectRequest,
            types::RequestInfoRequest,
            types::DocumentApproveRequest,
            types::DocumentRejectRequest,
            types::RequestDocumentsRequest,
            types::NotesRequest,
            types::ReviewActionResponse,
            types::WebhookEvent,
            types::WebhookData,
            types::WebhookResponse,
            crate::models::organization::Organization,
            crate::models::organization::Attestations,
            crate::models::organization::Requirements,
            crate::models::organization::DocumentReview,
            crate::models::organization::DocumentRequest,
            crate::models::organization::DocumentType,
            crate::models::organization::DocumentStatus,
            crate::models::organization::KycState,
            crate::models::organization::KycStatus,
            crate::models::organization::OrgStatus,
            crate::models::audit::AuditLogEntry,
            crate::models::audit::ActorType,
            crate::models::audit::AuditAction,
            crate::services::completeness::CompletenessReport,
        )
    ),
    tags(
        (name = "Onboarding", description = "Organization intake and compliance submission"),
        (name = "KYC", description = "Organization-facing KYC lifecycle endpoints"),
        (name = "Admin", description = "Compliance review endpoints. Require a JWT with the admin role; use the Authorize button and paste your token as 'Bearer <token>'."),
        (name = "Webhook", description = "Payment processor event intake")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub async fn request_id_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());
    let span = tracing::info_span!("request", request_id = %request_id, method = %req.method(), uri = %req.uri());
    // Entering the span with a guard would not cover the awaited future;
    // instrument attaches it across every poll.
    next.run(req).instrument(span).await
}

/// Builds the full application state from configuration.
pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let db = Arc::new(SqliteDatabase::new(&config.database_path).await?);
    let gateway = Arc::new(StripeGateway::new(config.stripe.clone())?);
    let notifier = Arc::new(match &config.smtp {
        Some(smtp) => NotificationService::new(smtp.clone()),
        None => NotificationService::disabled(),
    });
    let kyc = Arc::new(KycService::new(
        db.clone(),
        gateway,
        notifier.clone(),
        config.frontend_url.clone(),
    ));
    let review = Arc::new(ReviewService::new(db.clone(), notifier));
    let jwt = Arc::new(JwtManager::new(config.jwt_secret.clone()));
    Ok(AppState {
        db,
        kyc,
        review,
        jwt,
        webhook_secret: config.stripe.webhook_secret.clone(),
    })
}

/// Assembles the router. Split from serving so tests can drive it directly.
pub fn build_router(state: AppState) -> Router {
    let openapi = ApiDoc::openapi();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/*path", options(|| async { StatusCode::NO_CONTENT }))
        .nest("/api/onboarding", routes::onboarding_router())
        .nest("/api/orgs", routes::org_router())
        .nest("/api/admin/kyc", routes::admin_kyc_router())
        .nest("/api/webhooks", routes::webhook_router())
        .route("/health", axum::routing::get(health_check))
        .route("/docs/openapi.json", axum::routing::get(openapi_json))
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", openapi.clone()))
        .merge(Redoc::with_url("/api/redoc", openapi))
        .layer(Extension(state))
        .layer(cors)
        .layer(axum::middleware::from_fn(request_id_middleware))
}

/// Main entry point for the HTTP server.
pub async fn start_http_server(config: AppConfig) -> Result<()> {
    let state = build_state(&config).await?;
    let app = build_router(state);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid bind address {}: {}", config.bind_addr, e)))?;

    tracing::info!(action = "http_server_started", addr = %addr, "serving compliance API");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Config(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Export OpenAPI specification as JSON
async fn openapi_json() -> Json<Value> {
    let openapi = ApiDoc::openapi();
    Json(serde_json::to_value(openapi).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    /// Reports the name of the span the handler is running inside.
    async fn current_span_name() -> String {
        tracing::Span::current()
            .metadata()
            .map(|m| m.name().to_string())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn request_span_is_current_inside_the_handler() {
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry());

        let app = Router::new()
            .route("/ping", get(current_span_name))
            .layer(axum::middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&body), "request");
    }
}
