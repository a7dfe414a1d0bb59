#![deny(unsafe_code)]

pub mod event;
pub mod source;
pub mod worker;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use event::{ChangeType, EventFilter, JournalEvent};
use journalflow_adapters::{
    build_collaborators, FixtureRemotes, RemoteEndpoints, StaticToken,
};
use journalflow_core::{
    is_valid_entry_id, AlwaysCreateTasks, JournalOrchestrator, LedgerRow, LedgerStorageConfig,
    TaskCreationDisabled, TaskCreationPolicy, WorkflowError, DEFAULT_THEME,
};
use serde::{Deserialize, Serialize};
use source::{channel_sources, ChannelEventSource, EventPublisher, SourceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;
use worker::{PartitionWorker, WorkerStats};

/// Which implementations back the remote collaborators.
#[derive(Debug, Clone)]
pub enum RemoteConfig {
    /// In-process fixture, for local runs without any remote system.
    Fixture,
    Http {
        endpoints: RemoteEndpoints,
        access_token: String,
        request_timeout: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCreationMode {
    Enabled,
    Disabled,
}

impl TaskCreationMode {
    fn policy(self) -> Arc<dyn TaskCreationPolicy> {
        match self {
            Self::Enabled => Arc::new(AlwaysCreateTasks),
            Self::Disabled => Arc::new(TaskCreationDisabled),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub ledger_storage: LedgerStorageConfig,
    pub remotes: RemoteConfig,
    pub task_creation: TaskCreationMode,
    pub theme: String,
    pub partitions: usize,
    pub channel_capacity: usize,
    pub redelivery_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ledger_storage: LedgerStorageConfig::Memory,
            remotes: RemoteConfig::Fixture,
            task_creation: TaskCreationMode::Enabled,
            theme: DEFAULT_THEME.to_string(),
            partitions: 4,
            channel_capacity: 256,
            redelivery_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub orchestrator: Arc<JournalOrchestrator>,
    pub publisher: EventPublisher,
    pub filter: EventFilter,
    /// Present only when running against the in-process fixture.
    pub fixtures: Option<Arc<FixtureRemotes>>,
    ready: Arc<AtomicBool>,
}

impl ServiceState {
    /// Composition root: builds the ledger, every collaborator and the event
    /// channel once. Returns the partition sources for [`spawn_workers`].
    pub async fn bootstrap(
        config: ServiceConfig,
    ) -> Result<(Self, Vec<ChannelEventSource>), ServiceError> {
        let ServiceConfig {
            ledger_storage,
            remotes,
            task_creation,
            theme,
            partitions,
            channel_capacity,
            redelivery_delay,
        } = config;

        let ledger_label = ledger_storage.label();
        let ledger = ledger_storage.bootstrap().await?;

        let (collaborators, fixtures) = match remotes {
            RemoteConfig::Fixture => {
                let fixtures = FixtureRemotes::new();
                (fixtures.collaborators(), Some(fixtures))
            }
            RemoteConfig::Http {
                endpoints,
                access_token,
                request_timeout,
            } => (
                build_collaborators(
                    &endpoints,
                    Arc::new(StaticToken::new(access_token)),
                    request_timeout,
                )?,
                None,
            ),
        };

        let policy = task_creation.policy();
        info!(
            ledger = ledger_label,
            task_creation = policy.label(),
            fixtures = fixtures.is_some(),
            partitions,
            theme = %theme,
            "journalflow service bootstrapped"
        );

        let orchestrator = Arc::new(JournalOrchestrator::new(ledger, collaborators, policy));
        let (publisher, sources) = channel_sources(partitions, channel_capacity, redelivery_delay);

        Ok((
            Self {
                orchestrator,
                publisher,
                filter: EventFilter::new(theme),
                fixtures,
                ready: Arc::new(AtomicBool::new(false)),
            },
            sources,
        ))
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

/// Starts one worker per partition and marks the service ready.
pub fn spawn_workers(
    state: &ServiceState,
    sources: Vec<ChannelEventSource>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<WorkerStats>> {
    let handles = sources
        .into_iter()
        .map(|source| {
            let worker = PartitionWorker::new(
                source.partition(),
                source,
                state.orchestrator.clone(),
                state.filter.clone(),
                shutdown.clone(),
            );
            tokio::spawn(worker.run())
        })
        .collect();
    state.set_ready(true);
    handles
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/internal/isalive", get(is_alive))
        .route("/internal/isready", get(is_ready))
        .route("/internal/events", post(publish_event))
        .route("/internal/entries/:entry_id", get(get_entry))
        .route("/internal/entries/:entry_id/process", post(process_entry))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),
    #[error("event source error: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Http { status, .. } => *status,
            ApiError::Workflow(WorkflowError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Workflow(WorkflowError::Remote { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Workflow(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Source(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

async fn is_alive() -> &'static str {
    "ALIVE"
}

async fn is_ready(State(state): State<ServiceState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PublishResponse {
    entry_id: String,
    partition: usize,
}

async fn publish_event(
    State(state): State<ServiceState>,
    Json(event): Json<JournalEvent>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let entry_id = event.entry_id.clone();
    let partition = state.publisher.publish(event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            entry_id,
            partition,
        }),
    ))
}

#[derive(Debug, Clone, Serialize)]
struct EntryResponse {
    state: &'static str,
    complete: bool,
    row: LedgerRow,
}

async fn get_entry(
    Path(entry_id): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<EntryResponse>, ApiError> {
    let row = state
        .orchestrator
        .ledger()
        .load(&entry_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no progress recorded for entry '{entry_id}'")))?;

    Ok(Json(EntryResponse {
        state: row.state().name(),
        complete: row.is_complete(),
        row,
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProcessRequest {
    category_hint: Option<String>,
}

/// Replays one entry. The replay is queued on the entry's own partition so it
/// never runs concurrently with the worker that owns the entry.
async fn process_entry(
    Path(entry_id): Path<String>,
    State(state): State<ServiceState>,
    request: Option<Json<ProcessRequest>>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    if !is_valid_entry_id(&entry_id) {
        return Err(ApiError::bad_request(format!(
            "entry_id must be a decimal id, got '{entry_id}'"
        )));
    }
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let mut event = JournalEvent::new(entry_id.clone(), ChangeType::Received, state.filter.theme());
    if let Some(hint) = request.category_hint {
        event = event.with_category_hint(hint);
    }
    let partition = state.publisher.publish(event).await?;
    info!(entry_id = %entry_id, partition, "journal entry replay queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            entry_id,
            partition,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use journalflow_core::{EntryMetadata, SubjectRef, TaskType, COMPLAINT_CODE};
    use tower::ServiceExt;

    async fn bootstrap() -> (ServiceState, Vec<ChannelEventSource>) {
        ServiceState::bootstrap(ServiceConfig {
            partitions: 2,
            redelivery_delay: Duration::from_millis(10),
            ..ServiceConfig::default()
        })
        .await
        .unwrap()
    }

    fn seed_complaint(state: &ServiceState, entry_id: &str) {
        state
            .fixtures
            .as_ref()
            .unwrap()
            .insert_entry(EntryMetadata {
                entry_id: entry_id.to_string(),
                subject: SubjectRef::new("12345678910", "FNR"),
                archived: false,
                created_at: Some(Utc::now()),
                category_code: Some(COMPLAINT_CODE.to_string()),
                title: Some("Klage".to_string()),
            });
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn readiness_follows_worker_startup() {
        let (state, sources) = bootstrap().await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/internal/isready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _workers = spawn_workers(&state, sources, shutdown_rx);

        let alive = app
            .clone()
            .oneshot(Request::get("/internal/isalive").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(alive.status(), StatusCode::OK);
        let ready = app
            .oneshot(Request::get("/internal/isready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
    }

    async fn wait_until_complete(state: &ServiceState, entry_id: &str) -> bool {
        for _ in 0..200 {
            if let Some(row) = state.orchestrator.ledger().load(entry_id).await.unwrap() {
                if row.is_complete() {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn replay(entry_id: &str) -> Request<Body> {
        Request::post(format!("/internal/entries/{entry_id}/process"))
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap()
    }

    #[tokio::test]
    async fn replay_is_queued_and_entry_endpoint_reports_it() {
        let (state, sources) = bootstrap().await;
        seed_complaint(&state, "4567");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = spawn_workers(&state, sources, shutdown_rx);
        let app = build_router(state.clone());

        let response = app.clone().oneshot(replay("4567")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let queued = body_json(response).await;
        assert_eq!(queued["entry_id"], "4567");
        assert_eq!(
            queued["partition"],
            source::partition_for("4567", state.publisher.partitions()).unwrap()
        );
        assert!(wait_until_complete(&state, "4567").await);

        let response = app
            .oneshot(Request::get("/internal/entries/4567").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let entry = body_json(response).await;
        assert_eq!(entry["state"], "task_created");
        assert_eq!(entry["complete"], true);
        assert_eq!(entry["row"]["task_type"], "Filing");

        shutdown_tx.send(true).unwrap();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test]
    async fn replay_during_delivery_of_same_entry_creates_one_task() {
        let (state, sources) = bootstrap().await;
        seed_complaint(&state, "4567");
        let fixtures = state.fixtures.clone().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = spawn_workers(&state, sources, shutdown_rx);
        let app = build_router(state.clone());

        let event = JournalEvent::new("4567", ChangeType::Received, "IND");
        let published = app
            .clone()
            .oneshot(
                Request::post("/internal/events")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&event).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(published.status(), StatusCode::ACCEPTED);
        let replayed = app.oneshot(replay("4567")).await.unwrap();
        assert_eq!(replayed.status(), StatusCode::ACCEPTED);

        let mut fetched = 0;
        for _ in 0..200 {
            fetched = fixtures
                .calls()
                .iter()
                .filter(|call| **call == "archive.metadata")
                .count();
            if fetched == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fetched, 2);

        shutdown_tx.send(true).unwrap();
        let mut processed = 0;
        for worker in workers {
            processed += worker.await.unwrap().processed;
        }
        assert_eq!(processed, 2);
        assert_eq!(fixtures.tasks().len(), 1);
        assert_eq!(
            fixtures
                .calls()
                .iter()
                .filter(|call| **call == "task.create")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_entry_is_404_and_malformed_replay_is_400() {
        let (state, _sources) = bootstrap().await;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/internal/entries/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::post("/internal/entries/45x67/process")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn published_event_is_processed_by_worker_after_redelivery() {
        let (state, sources) = bootstrap().await;
        seed_complaint(&state, "4567");
        let fixtures = state.fixtures.clone().unwrap();
        fixtures.fail_next("task.create");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = spawn_workers(&state, sources, shutdown_rx);
        let app = build_router(state.clone());

        let event = JournalEvent::new("4567", ChangeType::Received, "IND");
        let response = app
            .oneshot(
                Request::post("/internal/events")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&event).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert!(wait_until_complete(&state, "4567").await);

        let tasks = fixtures.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TaskType::Filing);
        assert_eq!(
            fixtures
                .calls()
                .iter()
                .filter(|call| **call == "case.link")
                .count(),
            1
        );

        shutdown_tx.send(true).unwrap();
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
