use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;
use tower_http::trace::TraceLayer;

use crate::engine::EntityState;
use crate::engine::IntegrationError;
use crate::entry::ConfigRecord;
use crate::flow::BASE;
use crate::flow::FlowResult;
use crate::flow::FormError;
use crate::flow::FormErrors;
use crate::flow::OptionsFlow;
use crate::flow::OptionsInput;
use crate::flow::SetupFlow;
use crate::flow::SetupInput;
use crate::runtime::ActivationError;
use crate::runtime::Runtime;
use crate::store::ConfigStore;
use crate::store::StoreError;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    active_entries: usize,
}

#[derive(Serialize)]
struct EntryResponse {
    #[serde(flatten)]
    record: ConfigRecord,
    active: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct FormErrorResponse {
    step_id: &'static str,
    errors: FormErrors,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn unknown_entry(entry_id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("No such entry: {}", entry_id))
}

fn form_response(step_id: &'static str, errors: FormErrors) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(FormErrorResponse { step_id, errors }),
    )
        .into_response()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    version: &'static str,
    runtime: Arc<Runtime>,
    store: Arc<Mutex<ConfigStore>>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, store: Arc<Mutex<ConfigStore>>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            runtime,
            store,
        }
    }

    /// Lock the store with edits from other handles (the CLI) applied.
    ///
    /// Stations whose record was removed elsewhere are unloaded here.
    async fn synced_store(&self) -> Result<MutexGuard<'_, ConfigStore>, Response> {
        let mut store = self.store.lock().await;
        store
            .reload()
            .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;
        self.runtime.unload_removed(&store).await;
        Ok(store)
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            active_entries: state.runtime.engine().integration_names().len(),
        }),
    )
}

/// Handler for GET /v1/entities
#[tracing::instrument(skip(state))]
async fn list_entities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.runtime.engine().state_snapshot();
    let entities: Vec<EntityState> = snapshot.entities.values().cloned().collect();
    (StatusCode::OK, Json(entities))
}

/// Handler for GET /v1/entities/:unique_id
#[tracing::instrument(skip(state))]
async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(unique_id): Path<String>,
) -> Response {
    let snapshot = state.runtime.engine().state_snapshot();
    match snapshot.entity(&unique_id) {
        Some(entity) => (StatusCode::OK, Json(entity.clone())).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("No such entity: {}", unique_id),
        ),
    }
}

/// Handler for GET /v1/entries
#[tracing::instrument(skip(state))]
async fn list_entries(State(state): State<Arc<AppState>>) -> Response {
    let store = match state.synced_store().await {
        Ok(store) => store,
        Err(response) => return response,
    };
    let entries: Vec<EntryResponse> = store
        .entries()
        .map(|record| EntryResponse {
            active: state.runtime.is_active(&record.entry_id),
            record: record.clone(),
        })
        .collect();
    (StatusCode::OK, Json(entries)).into_response()
}

/// Handler for POST /v1/entries
///
/// Runs the setup flow, stores the record and activates it. The store is
/// not locked while the provider is queried.
#[tracing::instrument(skip(state))]
async fn create_entry(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SetupInput>,
) -> Response {
    let configured = match state.synced_store().await {
        Ok(store) => store.configured_ids(),
        Err(response) => return response,
    };

    let mut flow = SetupFlow::new(state.runtime.client(), configured);
    let mut record = match flow.submit(input).await {
        FlowResult::CreateEntry(record) => record,
        FlowResult::ShowForm { step_id, errors } => return form_response(step_id, errors),
    };

    match state.store.lock().await.insert(record.clone()) {
        Ok(()) => {}
        // Someone else added the device while the provider was queried
        Err(StoreError::DuplicateEntry(_)) => {
            return form_response(
                SetupFlow::STEP_ID,
                FormErrors::from([(BASE, FormError::DeviceExists)]),
            );
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }

    let active = match state.runtime.activate(&record).await {
        Ok(resolved) => {
            if let Some(name) = resolved {
                match state.store.lock().await.rename(&record.entry_id, &name) {
                    Ok(true) => record.display_name = name,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("[{}] Failed to store new name: {}", record.entry_id, e)
                    }
                }
            }
            true
        }
        Err(e) => {
            tracing::error!("[{}] Setup failed, reload to retry: {}", record.entry_id, e);
            false
        }
    };

    (StatusCode::CREATED, Json(EntryResponse { record, active })).into_response()
}

/// Handler for DELETE /v1/entries/:entry_id
///
/// Removes the record and unloads the station.
#[tracing::instrument(skip(state))]
async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Response {
    let removed = match state.synced_store().await {
        Ok(mut store) => store.remove(&entry_id),
        Err(response) => return response,
    };
    let record = match removed {
        Ok(record) => record,
        Err(StoreError::UnknownEntry(_)) => return unknown_entry(&entry_id),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    if state.runtime.is_active(&entry_id) {
        if let Err(e) = state.runtime.unload(&entry_id).await {
            tracing::warn!("[{}] Unload failed: {}", entry_id, e);
        }
    }

    (
        StatusCode::OK,
        Json(EntryResponse {
            record,
            active: false,
        }),
    )
        .into_response()
}

/// Handler for PUT /v1/entries/:entry_id/options
///
/// Runs the options flow; a running station picks up the new interval
/// without being reloaded.
#[tracing::instrument(skip(state))]
async fn update_options(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
    Json(input): Json<OptionsInput>,
) -> Response {
    let mut store = match state.synced_store().await {
        Ok(store) => store,
        Err(response) => return response,
    };
    let Some(record) = store.get(&entry_id) else {
        return unknown_entry(&entry_id);
    };

    let options = match OptionsFlow::new(record.options).submit(input) {
        FlowResult::CreateEntry(options) => options,
        FlowResult::ShowForm { step_id, errors } => return form_response(step_id, errors),
    };

    let record = match store.update_options(&entry_id, options) {
        Ok(record) => record,
        Err(StoreError::UnknownEntry(_)) => return unknown_entry(&entry_id),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    drop(store);

    if state.runtime.is_active(&entry_id) {
        if let Err(e) = state.runtime.apply_options(&record) {
            tracing::warn!("[{}] Failed to apply options: {}", entry_id, e);
        }
    }

    (StatusCode::OK, Json(record)).into_response()
}

/// Handler for POST /v1/entries/:entry_id/refresh
#[tracing::instrument(skip(state))]
async fn refresh_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Response {
    match state.runtime.refresh(&entry_id) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(IntegrationError::NotRegistered(_)) => error_response(
            StatusCode::NOT_FOUND,
            format!("Entry is not active: {}", entry_id),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Handler for POST /v1/entries/:entry_id/reload
///
/// The store lock is released while the station is re-activated.
#[tracing::instrument(skip(state))]
async fn reload_entry(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
) -> Response {
    let record = match state.synced_store().await {
        Ok(store) => store.get(&entry_id).cloned(),
        Err(response) => return response,
    };
    let Some(record) = record else {
        return unknown_entry(&entry_id);
    };

    let resolved = match state.runtime.reload(&record).await {
        Ok(resolved) => resolved,
        Err(e @ ActivationError::Fetch { .. }) => {
            return error_response(StatusCode::BAD_GATEWAY, e);
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let mut store = state.store.lock().await;
    if let Some(name) = resolved {
        if let Err(e) = store.rename(&entry_id, &name) {
            tracing::warn!("[{}] Failed to store new name: {}", entry_id, e);
        }
    }
    let record = store.get(&entry_id).cloned().unwrap_or(record);
    (StatusCode::OK, Json(EntryResponse { record, active: true })).into_response()
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/entities", get(list_entities))
        .route("/v1/entities/:unique_id", get(get_entity))
        .route("/v1/entries", get(list_entries).post(create_entry))
        .route("/v1/entries/:entry_id", delete(delete_entry))
        .route("/v1/entries/:entry_id/options", put(update_options))
        .route("/v1/entries/:entry_id/refresh", post(refresh_entry))
        .route("/v1/entries/:entry_id/reload", post(reload_entry))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: String,
    port: u16,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header;
    use serde_json::Value;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::Engine;
    use crate::integrations::weatherxm::Language;
    use crate::provider::DeviceReference;
    use crate::provider::DeviceReport;
    use crate::provider::FetchError;
    use crate::provider::MockWeatherClient;
    use crate::provider::WeatherClient;
    use crate::provider::WeatherSnapshot;

    struct Fixture {
        _dir: tempfile::TempDir,
        client: Arc<MockWeatherClient>,
        state: Arc<AppState>,
    }

    fn report(temperature: f64) -> DeviceReport {
        let mut snapshot = WeatherSnapshot::default();
        snapshot
            .metrics
            .insert("temperature".to_string(), Some(temperature));
        DeviceReport {
            name: Some("Station A".to_string()),
            snapshot,
        }
    }

    /// One stored record, active with the given initial temperature
    async fn fixture(temperature: f64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("entries.toml")).unwrap();
        store
            .insert(ConfigRecord::new(
                DeviceReference::new("7", "abc123"),
                "WeatherXM abc123".to_string(),
            ))
            .unwrap();

        let client = Arc::new(MockWeatherClient::new());
        client.push_ok(report(temperature));
        let runtime = Arc::new(Runtime::new(
            Arc::new(Engine::new()),
            client.clone(),
            Language::En,
        ));
        assert_eq!(runtime.activate_all(&mut store).await, 1);
        runtime.engine().process_pending().await;

        Fixture {
            _dir: dir,
            client,
            state: Arc::new(AppState::new(runtime, Arc::new(Mutex::new(store)))),
        }
    }

    async fn call(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn put_json(uri: &str, body: Value) -> Request<Body> {
        with_json("PUT", uri, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        with_json("POST", uri, body)
    }

    fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_info() {
        let fixture = fixture(21.5).await;

        let (status, body) = call(&fixture.state, get("/v1/ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));

        let (status, body) = call(&fixture.state, get("/v1/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["active_entries"], 1);
    }

    #[tokio::test]
    async fn test_entities() {
        let fixture = fixture(21.5).await;

        let (status, body) = call(&fixture.state, get("/v1/entities")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 12);

        let (status, body) = call(&fixture.state, get("/v1/entities/7_abc123_temperature")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Station A_temperature");
        assert_eq!(body["state"]["value"], 21.5);
        assert_eq!(body["state"]["unit_of_measurement"], "°C");
        assert_eq!(body["device"]["manufacturer"], "WeatherXM");

        let (status, _) = call(&fixture.state, get("/v1/entities/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_entries_show_resolved_name() {
        let fixture = fixture(21.5).await;

        let (status, body) = call(&fixture.state, get("/v1/entries")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{
                "entry_id": "abc123",
                "device": { "cell_index": "7", "device_id": "abc123" },
                "display_name": "Station A",
                "options": { "polling_interval": { "value": 5, "unit": "minutes" } },
                "active": true,
            }])
        );
    }

    #[tokio::test]
    async fn test_update_options() {
        let fixture = fixture(21.5).await;

        let (status, body) = call(
            &fixture.state,
            put_json(
                "/v1/entries/abc123/options",
                json!({ "polling_interval_value": 0, "polling_interval_unit": "seconds" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["polling_interval_value"], "invalid_interval");

        let (status, body) = call(
            &fixture.state,
            put_json(
                "/v1/entries/abc123/options",
                json!({ "polling_interval_value": 90, "polling_interval_unit": "seconds" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["options"]["polling_interval"],
            json!({ "value": 90, "unit": "seconds" })
        );

        let store = fixture.state.store.lock().await;
        let reopened = ConfigStore::open(store.path()).unwrap();
        assert_eq!(
            reopened.get("abc123").unwrap().options.polling_interval.value,
            90
        );
        drop(store);

        let (status, _) = call(
            &fixture.state,
            put_json(
                "/v1/entries/nope/options",
                json!({ "polling_interval_value": 1, "polling_interval_unit": "hours" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_and_reload() {
        let fixture = fixture(21.5).await;

        let (status, _) = call(&fixture.state, post("/v1/entries/nope/refresh")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Reload fails: the station stays unloaded with no entities
        fixture
            .client
            .push_err(MockWeatherClient::network_error());
        let (status, body) = call(&fixture.state, post("/v1/entries/abc123/reload")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("abc123"));
        assert!(!fixture.state.runtime.is_active("abc123"));

        let (status, _) = call(&fixture.state, post("/v1/entries/abc123/refresh")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        fixture.client.push_ok(report(18.0));
        let (status, body) = call(&fixture.state, post("/v1/entries/abc123/reload")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], true);

        let engine = fixture.state.runtime.engine();
        engine.process_pending().await;
        let (_, body) = call(&fixture.state, get("/v1/entities/7_abc123_temperature")).await;
        assert_eq!(body["state"]["value"], 18.0);

        fixture.client.push_ok(report(17.0));
        let (status, _) = call(&fixture.state, post("/v1/entries/abc123/refresh")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_create_and_delete_entry() {
        let fixture = fixture(21.5).await;
        let station = json!({ "device_id": "def456", "cell_index": "3" });

        // Setup validation and the initial fetch each query the provider
        fixture.client.push_ok(report(15.0));
        fixture.client.push_ok(report(15.0));
        let (status, body) = call(&fixture.state, post_json("/v1/entries", station.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["entry_id"], "def456");
        assert_eq!(body["display_name"], "Station A");
        assert_eq!(body["active"], true);

        let store = fixture.state.store.lock().await;
        let reopened = ConfigStore::open(store.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        drop(store);

        let engine = fixture.state.runtime.engine();
        engine.process_pending().await;
        let (_, body) = call(&fixture.state, get("/v1/entities/3_def456_temperature")).await;
        assert_eq!(body["state"]["value"], 15.0);

        let (status, body) = call(&fixture.state, delete("/v1/entries/def456")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entry_id"], "def456");
        assert_eq!(body["active"], false);
        assert!(!fixture.state.runtime.is_active("def456"));

        engine.process_pending().await;
        let state = engine.state_snapshot();
        assert_eq!(state.entities_of("def456").count(), 0);
        assert_eq!(state.entities_of("abc123").count(), 12);

        let (status, _) = call(&fixture.state, delete("/v1/entries/def456")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // The removed device can be added again
        fixture.client.push_ok(report(16.0));
        fixture.client.push_ok(report(16.0));
        let (status, body) = call(&fixture.state, post_json("/v1/entries", station)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["active"], true);
        assert_eq!(fixture.client.calls(), 5);
    }

    #[tokio::test]
    async fn test_create_entry_rejections() {
        let fixture = fixture(21.5).await;

        let (status, body) = call(
            &fixture.state,
            post_json("/v1/entries", json!({ "device_id": "abc123", "cell_index": "7" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body,
            json!({ "step_id": "user", "errors": { "base": "device_exists" } })
        );

        let (status, body) = call(&fixture.state, post_json("/v1/entries", json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["device_id"], "required");
        assert_eq!(body["errors"]["cell_index"], "required");

        fixture
            .client
            .push_err(MockWeatherClient::network_error());
        let (status, body) = call(
            &fixture.state,
            post_json("/v1/entries", json!({ "device_id": "def456", "cell_index": "3" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["base"], "cannot_connect");

        // Only the failed lookup reached the provider
        assert_eq!(fixture.client.calls(), 2);
        let store = fixture.state.store.lock().await;
        assert_eq!(ConfigStore::open(store.path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edits_from_another_handle_are_picked_up() {
        let fixture = fixture(21.5).await;
        let path = fixture.state.store.lock().await.path().to_path_buf();

        // The CLI changes options, then removes the station
        let mut cli = ConfigStore::open(&path).unwrap();
        let mut options = cli.get("abc123").unwrap().options;
        options.polling_interval.value = 10;
        cli.update_options("abc123", options).unwrap();

        let (status, body) = call(&fixture.state, get("/v1/entries")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["options"]["polling_interval"]["value"], 10);
        assert_eq!(body[0]["display_name"], "Station A");

        cli.remove("abc123").unwrap();
        let (status, body) = call(&fixture.state, get("/v1/entries")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
        assert!(!fixture.state.runtime.is_active("abc123"));

        // The daemon's view of the file never brings the record back
        let (status, _) = call(&fixture.state, post("/v1/entries/abc123/reload")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(ConfigStore::open(&path).unwrap().is_empty());
    }

    /// Answers every fetch and notes whether the store was locked meanwhile
    struct StoreWatchingClient {
        store: Arc<Mutex<ConfigStore>>,
        locked_during_fetch: AtomicBool,
    }

    #[async_trait]
    impl WeatherClient for StoreWatchingClient {
        async fn fetch(&self, _device: &DeviceReference) -> Result<DeviceReport, FetchError> {
            if self.store.try_lock().is_err() {
                self.locked_during_fetch.store(true, Ordering::SeqCst);
            }
            Ok(report(19.0))
        }
    }

    #[tokio::test]
    async fn test_store_is_unlocked_during_provider_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("entries.toml")).unwrap();
        let store = Arc::new(Mutex::new(store));
        let client = Arc::new(StoreWatchingClient {
            store: store.clone(),
            locked_during_fetch: AtomicBool::new(false),
        });
        let runtime = Arc::new(Runtime::new(
            Arc::new(Engine::new()),
            client.clone(),
            Language::En,
        ));
        let state = Arc::new(AppState::new(runtime, store));

        let (status, _) = call(
            &state,
            post_json("/v1/entries", json!({ "device_id": "abc123", "cell_index": "7" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(&state, post("/v1/entries/abc123/reload")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["display_name"], "Station A");

        assert!(!client.locked_during_fetch.load(Ordering::SeqCst));
    }
}
