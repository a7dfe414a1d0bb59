use crate::http::{decode, expect_status, RemoteClient};
use async_trait::async_trait;
use chrono::NaiveDate;
use journalflow_core::{
    CorrelationId, TaskCreator, TaskPriority, TaskRequest, TaskType, WorkflowResult, DEFAULT_THEME,
};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

const TASK_API: &str = "/api/v1/oppgaver";
const OPEN_STATUS_CATEGORY: &str = "AAPEN";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskBody<'a> {
    personident: Option<&'a str>,
    opprettet_av_enhetsnr: &'a str,
    journalpost_id: &'a str,
    beskrivelse: Option<&'a str>,
    tema: &'a str,
    oppgavetype: &'a str,
    aktiv_dato: NaiveDate,
    frist_ferdigstillelse: NaiveDate,
    prioritet: TaskPriority,
}

impl<'a> From<&'a TaskRequest> for CreateTaskBody<'a> {
    fn from(request: &'a TaskRequest) -> Self {
        Self {
            personident: request.subject_id.as_deref(),
            opprettet_av_enhetsnr: &request.created_by_unit,
            journalpost_id: &request.entry_id,
            beskrivelse: request.description.as_deref(),
            tema: &request.theme,
            oppgavetype: request.task_type.code(),
            aktiv_dato: request.active_date,
            frist_ferdigstillelse: request.due_date,
            prioritet: request.priority,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskSearchResponse {
    antall_treff_totalt: i64,
    #[serde(default)]
    oppgaver: Vec<TaskRef>,
}

impl TaskSearchResponse {
    fn first_open(&self) -> Option<String> {
        if self.antall_treff_totalt <= 0 {
            return None;
        }
        self.oppgaver.first().map(|task| task.id.to_string())
    }
}

/// [`TaskCreator`] backed by the task service REST API.
#[derive(Clone)]
pub struct TaskServiceClient {
    remote: RemoteClient,
}

impl TaskServiceClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl TaskCreator for TaskServiceClient {
    async fn find_open_task(
        &self,
        entry_id: &str,
        task_type: TaskType,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>> {
        let query = [
            ("tema", DEFAULT_THEME),
            ("oppgavetype", task_type.code()),
            ("journalpostId", entry_id),
            ("statuskategori", OPEN_STATUS_CATEGORY),
        ];
        let response = self
            .remote
            .send_query("task.search", Method::GET, TASK_API, &query, correlation_id)
            .await?;
        let response = expect_status("task.search", response, StatusCode::OK).await?;
        let body: TaskSearchResponse = decode("task.search", response).await?;
        Ok(body.first_open())
    }

    async fn create(
        &self,
        request: &TaskRequest,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<String> {
        let response = self
            .remote
            .send_json(
                "task.create",
                Method::POST,
                TASK_API,
                correlation_id,
                &CreateTaskBody::from(request),
            )
            .await?;
        let response = expect_status("task.create", response, StatusCode::CREATED).await?;
        let created: TaskRef = decode("task.create", response).await?;
        info!(
            task_id = created.id,
            task_type = %request.task_type,
            "task created"
        );
        Ok(created.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{build_http_client, HttpEndpoint, StaticToken};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TaskServiceClient {
        TaskServiceClient::new(RemoteClient::new(
            build_http_client(Duration::from_secs(5)).unwrap(),
            HttpEndpoint::new(server.uri()),
            Arc::new(StaticToken::new("token")),
        ))
    }

    fn cid() -> CorrelationId {
        CorrelationId::from("corr-1")
    }

    #[tokio::test]
    async fn finds_open_task_of_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/oppgaver"))
            .and(query_param("tema", "IND"))
            .and(query_param("oppgavetype", "JFR"))
            .and(query_param("journalpostId", "4567"))
            .and(query_param("statuskategori", "AAPEN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "antallTreffTotalt": 1,
                "oppgaver": [{ "id": 5555 }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server)
            .find_open_task("4567", TaskType::Filing, &cid())
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("5555"));
    }

    #[tokio::test]
    async fn search_encodes_entry_id_as_one_query_value() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/oppgaver"))
            .and(query_param("journalpostId", "4567&statuskategori=FERDIG"))
            .and(query_param("statuskategori", "AAPEN"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "antallTreffTotalt": 0, "oppgaver": [] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server)
            .find_open_task("4567&statuskategori=FERDIG", TaskType::Filing, &cid())
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn no_hits_means_no_open_task() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "antallTreffTotalt": 0, "oppgaver": [] })),
            )
            .mount(&server)
            .await;

        let found = client(&server)
            .find_open_task("4567", TaskType::Routing, &cid())
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn creates_case_work_task() {
        let server = MockServer::start().await;
        let today = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        Mock::given(method("POST"))
            .and(path("/api/v1/oppgaver"))
            .and(body_json(json!({
                "personident": "12345678910",
                "opprettetAvEnhetsnr": "9999",
                "journalpostId": "4567",
                "beskrivelse": "Ny søknad om tiltakspenger mottatt på papir. Behandles i ny løsning.",
                "tema": "IND",
                "oppgavetype": "BEH_SAK",
                "aktivDato": "2024-03-07",
                "fristFerdigstillelse": "2024-03-11",
                "prioritet": "NORM"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 9876 })))
            .expect(1)
            .mount(&server)
            .await;

        let request = TaskRequest::new(
            "4567",
            Some("12345678910".to_string()),
            TaskType::CaseWork,
            None,
            today,
        );
        let task_id = client(&server).create(&request, &cid()).await.unwrap();
        assert_eq!(task_id, "9876");
    }

    #[tokio::test]
    async fn create_requires_created_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 9876 })))
            .mount(&server)
            .await;

        let request = TaskRequest::new(
            "4567",
            None,
            TaskType::Routing,
            None,
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
        );
        let err = client(&server).create(&request, &cid()).await.unwrap_err();
        assert!(err.to_string().contains("task.create"));
    }
}
