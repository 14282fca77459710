use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod config;
pub mod errors;
pub mod http;
pub mod logging;
pub mod rpc;
pub mod services;
pub mod tools;

use config::Config;
use rpc::engine::MethodTable;
use services::auth::AuthService;
use services::events::EventBroker;
use services::resource::ResourceStore;
use services::session::{MemorySessionStore, SessionStore};
use services::telemetry::Telemetry;
use tools::{builtin::register_builtin_tools, ToolRegistry};

#[derive(Clone)]
pub struct AppState {
    pub methods: Arc<MethodTable>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: Arc<dyn SessionStore>,
    pub resources: Arc<ResourceStore>,
    pub events: Arc<EventBroker>,
    pub auth: Arc<AuthService>,
    pub telemetry: Arc<Telemetry>,
    pub sse_keepalive: Duration,
}

impl AppState {
    /// Explicit init routine: builds every service, registers the built-in
    /// tools and methods, and returns the assembled state. Nothing here
    /// relies on global singletons or import-time side effects.
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools);

        let resources = Arc::new(ResourceStore::new(
            &config.resource_storage_path,
            config.max_resource_size_bytes,
        )?);

        Ok(Self {
            methods: Arc::new(rpc::engine::builtin_methods()),
            tools,
            sessions: Arc::new(MemorySessionStore::new(config.session_ttl_secs)),
            resources,
            events: Arc::new(EventBroker::new()),
            auth: Arc::new(AuthService::with_bootstrap_admin(
                config.admin_api_key.clone(),
            )),
            telemetry: Arc::new(Telemetry::new(config.operation_history_size)),
            sse_keepalive: Duration::from_secs(config.sse_keepalive_secs),
        })
    }
}

pub fn build_app(state: AppState) -> Router {
    let developer_routes = Router::new()
        .route("/telemetry/metrics", get(http::telemetry::metrics))
        .route("/telemetry/operations", get(http::telemetry::list_operations))
        .route(
            "/telemetry/operations/{operation_id}",
            get(http::telemetry::get_operation),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            services::auth::require_developer,
        ));

    let admin_routes = Router::new()
        .route("/auth/keys", post(http::auth::create_key))
        .route(
            "/auth/keys/{api_key}",
            axum::routing::delete(http::auth::revoke_key),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            services::auth::require_admin,
        ));

    let authenticated_routes = Router::new()
        .route("/auth/me", get(http::auth::me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            services::auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route("/mcp/jsonrpc", post(http::handlers::rpc_endpoint))
        .route("/mcp/connect", get(http::handlers::connect))
        .route("/mcp/events/{client_id}", get(http::handlers::events))
        .route(
            "/sessions",
            post(http::sessions::create_session).get(http::sessions::list_sessions),
        )
        .route(
            "/sessions/{session_id}",
            get(http::sessions::get_session)
                .put(http::sessions::update_session)
                .delete(http::sessions::delete_session),
        )
        .route(
            "/sessions/{session_id}/heartbeat",
            post(http::sessions::session_heartbeat),
        )
        .route(
            "/sessions/{session_id}/context/{key}",
            get(http::sessions::get_context_value).put(http::sessions::set_context_value),
        )
        .route(
            "/resources/upload/{resource_type}",
            post(http::resources::upload_resource),
        )
        .route(
            "/resources/{*uri}",
            get(http::resources::get_resource)
                .delete(http::resources::delete_resource)
                .patch(http::resources::update_resource_metadata),
        )
        .merge(developer_routes)
        .merge(admin_routes)
        .merge(authenticated_routes)
        .fallback(|| async {
            errors::UnifiedError::from_status(
                axum::http::StatusCode::NOT_FOUND,
                serde_json::json!("Not Found"),
            )
            .into_rest_response()
        })
        .layer(middleware::from_fn_with_state(
            state.clone(),
            services::telemetry::telemetry_middleware,
        ))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::OnceLock;

    use tempfile::TempDir;

    use super::AppState;
    use crate::config::Config;

    fn test_root() -> &'static TempDir {
        static ROOT: OnceLock<TempDir> = OnceLock::new();
        ROOT.get_or_init(|| tempfile::tempdir().expect("tempdir"))
    }

    pub fn test_config() -> Config {
        Config {
            admin_api_key: "test-admin-key".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            bind_port: 0,
            session_ttl_secs: 3600,
            session_cleanup_interval_secs: 300,
            resource_storage_path: test_root()
                .path()
                .join(uuid::Uuid::new_v4().to_string()),
            max_resource_size_bytes: 1024 * 1024,
            resource_cleanup_interval_secs: 300,
            sse_keepalive_secs: 15,
            operation_history_size: 100,
            telemetry_retention_secs: 3600,
            telemetry_prune_interval_secs: 300,
        }
    }

    pub fn test_state() -> AppState {
        AppState::from_config(&test_config()).expect("test state")
    }
}
