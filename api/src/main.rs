// ./api/src/main.rs
mod models;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::get,
};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use application::{
    AuthMechanism, ConnectionProvider, DocumentStoreConfig, Filter, Patch, Repository,
    RepositoryError, StoreError,
};
use domain::DomainError;
use infrastructure::{DocumentConnection, DocumentRepository, KvConnection, KvRepository};
use models::{DeleteResponse, Profile, ProfilePatch, User};

#[derive(Clone)]
struct AppState {
    users: Arc<KvRepository<User, KvConnection>>,
    profiles: Arc<DocumentRepository<Profile, DocumentConnection>>,
}

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DOCSTORE_HOST: &str = "localhost:27017";
const DEFAULT_DOCSTORE_DATABASE: &str = "app";

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let port = port_from_env();
    let document_config = document_store_config_from_env();
    info!(config = ?document_config, "Document store configuration assembled");

    // --- Connections ---
    let kv_connection = Arc::new(KvConnection::new());
    let document_connection = Arc::new(DocumentConnection::new(document_config));
    if let Err(e) = kv_connection.on_bootstrap().await {
        error!("Failed to open key-value store: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = document_connection.on_bootstrap().await {
        error!("Failed to open document store: {}", e);
        std::process::exit(1);
    }

    // --- Repositories ---
    let app_state = AppState {
        users: Arc::new(KvRepository::new(kv_connection.clone(), "users")),
        profiles: Arc::new(DocumentRepository::new(
            document_connection.clone(),
            "profiles",
        )),
    };
    info!("Repositories initialized.");

    // --- API Router Definition ---
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/kv/users",
            get(list_users_handler)
                .post(create_user_handler)
                .delete(delete_all_users_handler),
        )
        .route(
            "/kv/users/:id",
            get(get_user_handler)
                .put(update_user_handler)
                .delete(delete_user_handler),
        )
        .route("/kv/users/by-email/:email", get(user_by_email_handler))
        .route(
            "/documents/profiles",
            get(list_profiles_handler)
                .post(create_profile_handler)
                .delete(delete_all_profiles_handler),
        )
        .route(
            "/documents/profiles/:id",
            get(get_profile_handler)
                .patch(patch_profile_handler)
                .delete(delete_profile_handler),
        )
        .with_state(app_state);
    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // --- Teardown ---
    if let Err(e) = document_connection.on_close().await {
        warn!("Failed to close document store: {}", e);
    }
    if let Err(e) = kv_connection.on_close().await {
        warn!("Failed to close key-value store: {}", e);
    }
    info!("Shutdown complete.");
}

fn port_from_env() -> u16 {
    match env::var("PORT") {
        Ok(port_str) => match u16::from_str(&port_str) {
            Ok(port_num) => {
                info!("Using port {} from environment variable PORT.", port_num);
                port_num
            }
            Err(_) => {
                warn!(
                    "Invalid PORT value '{}' in environment variable. Using default port {}.",
                    port_str, DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        },
        Err(_) => {
            info!(
                "PORT environment variable not set. Using default port {}.",
                DEFAULT_PORT
            );
            DEFAULT_PORT
        }
    }
}

/// Builds the explicit document store settings from `DOCSTORE_*` variables.
fn document_store_config_from_env() -> DocumentStoreConfig {
    let host = env::var("DOCSTORE_HOST").unwrap_or_else(|_| {
        warn!("DOCSTORE_HOST not set. Using default host {}.", DEFAULT_DOCSTORE_HOST);
        DEFAULT_DOCSTORE_HOST.to_string()
    });
    let database = env::var("DOCSTORE_DATABASE").unwrap_or_else(|_| {
        warn!(
            "DOCSTORE_DATABASE not set. Using default database {}.",
            DEFAULT_DOCSTORE_DATABASE
        );
        DEFAULT_DOCSTORE_DATABASE.to_string()
    });
    let mut config = DocumentStoreConfig::new(host, database);
    config.username = env::var("DOCSTORE_USERNAME").ok();
    config.password = env::var("DOCSTORE_PASSWORD").ok();
    if let Ok(mechanism) = env::var("DOCSTORE_AUTH_MECHANISM") {
        match AuthMechanism::from_str(&mechanism) {
            Ok(mechanism) => config.auth_mechanism = Some(mechanism),
            Err(e) => warn!("Ignoring DOCSTORE_AUTH_MECHANISM: {}", e),
        }
    }
    config
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// --- User Handlers (key-value) ---

async fn list_users_handler(State(state): State<AppState>) -> Response {
    match state.users.get_all().await {
        Ok(users) => (StatusCode::OK, JsonResponse(users)).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn create_user_handler(State(state): State<AppState>, Json(user): Json<User>) -> Response {
    info!(id = %user.id, "Received request to create user");
    match state.users.create(user).await {
        Ok(user) => (StatusCode::CREATED, JsonResponse(user)).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn get_user_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.users.get_by_id(&id).await {
        Ok(Some(user)) => (StatusCode::OK, JsonResponse(user)).into_response(),
        Ok(None) => not_found("User", &id),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn user_by_email_handler(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Response {
    match state.users.find_by_index("email", email.to_lowercase()).await {
        Ok(Some(user)) => (StatusCode::OK, JsonResponse(user)).into_response(),
        Ok(None) => not_found("User with email", &email),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn update_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(user): Json<User>,
) -> Response {
    info!(id = %id, "Received request to update user");
    match state.users.update_one(&id, user).await {
        Ok(user) => (StatusCode::OK, JsonResponse(user)).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn delete_user_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    info!(id = %id, "Received request to delete user");
    match state.users.delete_one(&id).await {
        Ok(()) => (StatusCode::NO_CONTENT, "").into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn delete_all_users_handler(State(state): State<AppState>) -> Response {
    match state.users.delete_all().await {
        Ok(deleted) => (StatusCode::OK, JsonResponse(DeleteResponse { deleted })).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

// --- Profile Handlers (documents) ---

/// `GET /documents/profiles?city=London` filters on equality of every query parameter.
async fn list_profiles_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filter = filter_from_params(params);
    match state.profiles.find_all(&filter).await {
        Ok(profiles) => (StatusCode::OK, JsonResponse(profiles)).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

fn filter_from_params(params: HashMap<String, String>) -> Filter {
    params
        .into_iter()
        .fold(Filter::new(), |filter, (field, value)| filter.eq(field, value))
}

async fn create_profile_handler(
    State(state): State<AppState>,
    Json(profile): Json<Profile>,
) -> Response {
    match state.profiles.create(profile).await {
        Ok(profile) => {
            info!(id = %profile.id, "Profile created via handler");
            (StatusCode::CREATED, JsonResponse(profile)).into_response()
        }
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn get_profile_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.profiles.get_by_id(&id).await {
        Ok(Some(profile)) => (StatusCode::OK, JsonResponse(profile)).into_response(),
        Ok(None) => not_found("Profile", &id),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn patch_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ProfilePatch>,
) -> Response {
    let patch = match Patch::from_serializable(&body) {
        Ok(patch) => patch,
        Err(e) => return map_repository_error_to_response(e),
    };
    match state.profiles.update_one(&id, patch).await {
        Ok(outcome) if outcome.matched_count == 0 => not_found("Profile", &id),
        Ok(outcome) => (StatusCode::OK, JsonResponse(outcome)).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn delete_profile_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.profiles.delete_one(&id).await {
        Ok(0) => not_found("Profile", &id),
        Ok(deleted) => (StatusCode::OK, JsonResponse(DeleteResponse { deleted })).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

async fn delete_all_profiles_handler(State(state): State<AppState>) -> Response {
    match state.profiles.delete_all().await {
        Ok(deleted) => (StatusCode::OK, JsonResponse(DeleteResponse { deleted })).into_response(),
        Err(e) => map_repository_error_to_response(e),
    }
}

fn not_found(what: &str, id: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{} '{}' not found", what, id)).into_response()
}

/// Maps repository errors to HTTP status codes and response bodies.
fn map_repository_error_to_response(err: RepositoryError) -> Response {
    let (status, body) = match err {
        RepositoryError::InvalidIdentifier { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        RepositoryError::Domain(DomainError::InvalidKey(_))
        | RepositoryError::Domain(DomainError::IdMismatch { .. })
        | RepositoryError::NotAnObject(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        RepositoryError::CreateFailed { .. }
        | RepositoryError::UpdateFailed { .. }
        | RepositoryError::DeleteFailed { .. } => {
            warn!("Transaction did not commit: {}", err);
            (StatusCode::CONFLICT, err.to_string())
        }
        RepositoryError::Store(StoreError::DuplicateKey { .. }) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        RepositoryError::Store(_) | RepositoryError::Serialization(_) => {
            error!("Underlying store error: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    (status, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::ObjectId;

    #[test]
    fn query_parameters_become_equality_filters() {
        let params = HashMap::from([("city".to_string(), "London".to_string())]);
        let filter = filter_from_params(params);
        assert_eq!(filter, Filter::new().eq("city", "London"));
        assert!(filter_from_params(HashMap::new()).is_empty());
    }

    #[test]
    fn error_statuses() {
        let invalid = RepositoryError::InvalidIdentifier {
            id: "x".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(
            map_repository_error_to_response(invalid).status(),
            StatusCode::BAD_REQUEST
        );

        let conflict = RepositoryError::CreateFailed {
            collection: "users".to_string(),
            id: "u1".to_string(),
        };
        assert_eq!(
            map_repository_error_to_response(conflict).status(),
            StatusCode::CONFLICT
        );

        let duplicate = RepositoryError::Store(StoreError::DuplicateKey {
            collection: "profiles".to_string(),
            id: ObjectId::new().to_hex(),
        });
        assert_eq!(
            map_repository_error_to_response(duplicate).status(),
            StatusCode::CONFLICT
        );

        let closed = RepositoryError::Store(StoreError::Closed);
        assert_eq!(
            map_repository_error_to_response(closed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
