//! Collaborator adapters for the journal entry workflow.
//!
//! HTTP clients for the document archive, person registry, case management
//! API and task service, plus an in-process fixture for local runs.

#![deny(unsafe_code)]

pub mod archive;
pub mod cases;
pub mod fixtures;
pub mod http;
pub mod identity;
pub mod tasks;

pub use archive::{ArchiveClient, ArchiveMetadataClient};
pub use cases::{CaseApiClient, HttpCaseLinker};
pub use fixtures::{FixtureRemotes, FixtureTask};
pub use http::{build_http_client, HttpEndpoint, RemoteClient, StaticToken, TokenSource};
pub use identity::PersonRegistryClient;
pub use tasks::TaskServiceClient;

use journalflow_core::{Collaborators, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Where the remote systems live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoints {
    /// Archive metadata (GraphQL).
    pub archive_query: HttpEndpoint,
    /// Archive journal entry API (case binding, finalization).
    pub archive: HttpEndpoint,
    pub person_registry: HttpEndpoint,
    pub case_api: HttpEndpoint,
    pub task_service: HttpEndpoint,
}

/// Builds the HTTP-backed collaborators sharing one connection pool.
pub fn build_collaborators(
    endpoints: &RemoteEndpoints,
    tokens: Arc<dyn TokenSource>,
    timeout: Duration,
) -> WorkflowResult<Collaborators> {
    let client = build_http_client(timeout)?;
    let remote = |endpoint: &HttpEndpoint| {
        RemoteClient::new(client.clone(), endpoint.clone(), tokens.clone())
    };

    let archive = ArchiveClient::new(remote(&endpoints.archive));
    let linker = HttpCaseLinker::new(
        CaseApiClient::new(remote(&endpoints.case_api)),
        archive.clone(),
    );

    Ok(Collaborators {
        metadata: Arc::new(ArchiveMetadataClient::new(remote(&endpoints.archive_query))),
        identity: Arc::new(PersonRegistryClient::new(
            remote(&endpoints.person_registry).with_headers(identity::registry_headers()),
        )),
        cases: Arc::new(linker),
        archive: Arc::new(archive),
        tasks: Arc::new(TaskServiceClient::new(remote(&endpoints.task_service))),
    })
}
