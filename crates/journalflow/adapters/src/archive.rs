//! Document archive: metadata lookup over GraphQL and the journal entry REST API.

use crate::http::{decode, ensure_success, GraphQlRequest, GraphQlResponse, RemoteClient};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use journalflow_core::{
    is_valid_entry_id, ArchiveFinalizer, CorrelationId, EntryMetadata, EntryMetadataSource,
    LinkRequest, SubjectRef, WorkflowError, WorkflowResult, AUTOMATED_UNIT,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

const FIND_ENTRY_QUERY: &str = "query($id: String!) { journalpost(journalpostId: $id) { \
    journalpostId journalstatus datoOpprettet tittel \
    bruker { id type } \
    dokumenter { tittel brevkode } } }";

const ENTRY_API: &str = "/rest/journalpostapi/v1/journalpost";
const CASE_SYSTEM: &str = "TILTAKSPENGER";
const CASE_KIND: &str = "FAGSAK";
const PERSON_ID_KIND: &str = "FNR";

/// Statuses for entries nobody has journaled yet.
const OPEN_STATUSES: [&str; 2] = ["MOTTATT", "FEILREGISTRERT"];

#[derive(Debug, Serialize)]
struct EntryVariables<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct FindEntryData {
    journalpost: Option<ArchivedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchivedEntry {
    journalstatus: Option<String>,
    dato_opprettet: Option<String>,
    tittel: Option<String>,
    bruker: Option<ArchivedSubject>,
    #[serde(default)]
    dokumenter: Vec<ArchivedDocument>,
}

#[derive(Debug, Deserialize)]
struct ArchivedSubject {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArchivedDocument {
    tittel: Option<String>,
    brevkode: Option<String>,
}

/// [`EntryMetadataSource`] backed by the archive's GraphQL API.
#[derive(Clone)]
pub struct ArchiveMetadataClient {
    remote: RemoteClient,
}

impl ArchiveMetadataClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl EntryMetadataSource for ArchiveMetadataClient {
    async fn fetch(
        &self,
        entry_id: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<EntryMetadata>> {
        let request = GraphQlRequest {
            query: FIND_ENTRY_QUERY,
            variables: EntryVariables { id: entry_id },
        };
        let response = self
            .remote
            .send_json(
                "archive.metadata",
                Method::POST,
                "/graphql",
                correlation_id,
                &request,
            )
            .await?;
        let response = ensure_success("archive.metadata", response).await?;
        let body: GraphQlResponse<FindEntryData> = decode("archive.metadata", response).await?;

        Ok(body
            .into_data("archive")
            .and_then(|data| data.journalpost)
            .and_then(|entry| to_metadata(entry_id, entry)))
    }
}

fn to_metadata(entry_id: &str, entry: ArchivedEntry) -> Option<EntryMetadata> {
    let Some(status) = entry.journalstatus else {
        error!(entry_id, "archive returned journal entry without status");
        return None;
    };
    let archived = !OPEN_STATUSES
        .iter()
        .any(|open| status.eq_ignore_ascii_case(open));
    let subject = entry
        .bruker
        .map(|subject| SubjectRef {
            id: subject.id,
            kind: subject.kind,
        })
        .unwrap_or_default();
    let first_document = entry.dokumenter.into_iter().next();
    let (document_title, category_code) = match first_document {
        Some(document) => (document.tittel, document.brevkode),
        None => (None, None),
    };

    Some(EntryMetadata {
        entry_id: entry_id.to_string(),
        subject,
        archived,
        created_at: entry
            .dato_opprettet
            .as_deref()
            .and_then(|raw| parse_created_at(entry_id, raw)),
        category_code,
        title: document_title.or(entry.tittel),
    })
}

/// The archive reports local timestamps without offset; they are read as UTC.
fn parse_created_at(entry_id: &str, raw: &str) -> Option<DateTime<Utc>> {
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            warn!(entry_id, raw, error = %e, "journal entry has unparseable creation date");
            None
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BindToCaseRequest<'a> {
    sak: CaseRef<'a>,
    bruker: PersonRef<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avsender_mottaker: Option<PersonRef<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaseRef<'a> {
    fagsak_id: &'a str,
    fagsaksystem: &'a str,
    sakstype: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersonRef<'a> {
    id: &'a str,
    id_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeRequest<'a> {
    journalfoerende_enhet: &'a str,
}

/// Journal entry write API: case binding and finalization.
#[derive(Clone)]
pub struct ArchiveClient {
    remote: RemoteClient,
}

impl ArchiveClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }

    /// Binds the entry to `case_number`. Rebinding to the same case is accepted remotely.
    pub async fn bind_to_case(
        &self,
        request: &LinkRequest,
        case_number: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<()> {
        let person = || PersonRef {
            id: &request.subject_id,
            id_type: PERSON_ID_KIND,
        };
        let body = BindToCaseRequest {
            sak: CaseRef {
                fagsak_id: case_number,
                fagsaksystem: CASE_SYSTEM,
                sakstype: CASE_KIND,
            },
            bruker: person(),
            avsender_mottaker: request.sender_is_subject.then(person),
        };
        let response = self
            .remote
            .send_json(
                "archive.bind",
                Method::PUT,
                &entry_path(&request.entry_id, "")?,
                correlation_id,
                &body,
            )
            .await?;
        ensure_success("archive.bind", response).await?;
        Ok(())
    }
}

/// The entry id becomes a path segment, so only decimal ids are accepted.
fn entry_path(entry_id: &str, action: &str) -> WorkflowResult<String> {
    if !is_valid_entry_id(entry_id) {
        return Err(WorkflowError::InvariantViolation(format!(
            "journal entry id '{entry_id}' is not numeric"
        )));
    }
    Ok(format!("{ENTRY_API}/{entry_id}{action}"))
}

#[async_trait]
impl ArchiveFinalizer for ArchiveClient {
    async fn finalize(&self, entry_id: &str, correlation_id: &CorrelationId) -> WorkflowResult<()> {
        let response = self
            .remote
            .send_json(
                "archive.finalize",
                Method::PATCH,
                &entry_path(entry_id, "/ferdigstill")?,
                correlation_id,
                &FinalizeRequest {
                    journalfoerende_enhet: AUTOMATED_UNIT,
                },
            )
            .await?;
        ensure_success("archive.finalize", response).await?;
        Ok(())
    }
}
