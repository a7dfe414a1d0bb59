use crate::archive::ArchiveClient;
use crate::http::{decode, expect_status, RemoteClient};
use async_trait::async_trait;
use journalflow_core::{CaseLinker, CorrelationId, LinkRequest, WorkflowResult};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct CaseLookupRequest<'a> {
    fnr: &'a str,
}

#[derive(Debug, Deserialize)]
struct CaseLookupResponse {
    saksnummer: String,
}

/// Case management API: returns the subject's case number, creating the case if needed.
#[derive(Clone)]
pub struct CaseApiClient {
    remote: RemoteClient,
}

impl CaseApiClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }

    pub async fn get_or_create_case(
        &self,
        subject_id: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<String> {
        let response = self
            .remote
            .send_json(
                "case.lookup",
                Method::POST,
                "/saksnummer",
                correlation_id,
                &CaseLookupRequest { fnr: subject_id },
            )
            .await?;
        let response = expect_status("case.lookup", response, StatusCode::OK).await?;
        let body: CaseLookupResponse = decode("case.lookup", response).await?;
        Ok(body.saksnummer)
    }
}

/// [`CaseLinker`] composed of the case API and the archive's binding call.
#[derive(Clone)]
pub struct HttpCaseLinker {
    cases: CaseApiClient,
    archive: ArchiveClient,
}

impl HttpCaseLinker {
    pub fn new(cases: CaseApiClient, archive: ArchiveClient) -> Self {
        Self { cases, archive }
    }
}

#[async_trait]
impl CaseLinker for HttpCaseLinker {
    async fn link(
        &self,
        request: &LinkRequest,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<String> {
        let case_number = self
            .cases
            .get_or_create_case(&request.subject_id, correlation_id)
            .await?;
        debug!(case_number = %case_number, "case number obtained, binding entry");
        self.archive
            .bind_to_case(request, &case_number, correlation_id)
            .await?;
        Ok(case_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{build_http_client, HttpEndpoint, StaticToken};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(server: &MockServer) -> RemoteClient {
        RemoteClient::new(
            build_http_client(Duration::from_secs(5)).unwrap(),
            HttpEndpoint::new(server.uri()),
            Arc::new(StaticToken::new("token")),
        )
    }

    fn request() -> LinkRequest {
        LinkRequest {
            entry_id: "4567".to_string(),
            subject_id: "12345678910".to_string(),
            sender_is_subject: false,
        }
    }

    #[tokio::test]
    async fn links_entry_to_subject_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/saksnummer"))
            .and(body_json(json!({ "fnr": "12345678910" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "saksnummer": "34567" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/rest/journalpostapi/v1/journalpost/4567"))
            .and(body_json(json!({
                "sak": {
                    "fagsakId": "34567",
                    "fagsaksystem": "TILTAKSPENGER",
                    "sakstype": "FAGSAK"
                },
                "bruker": { "id": "12345678910", "idType": "FNR" }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let linker = HttpCaseLinker::new(
            CaseApiClient::new(remote(&server)),
            ArchiveClient::new(remote(&server)),
        );
        let case_number = linker
            .link(&request(), &CorrelationId::from("corr-1"))
            .await
            .unwrap();
        assert_eq!(case_number, "34567");
    }

    #[tokio::test]
    async fn case_api_failure_skips_binding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/saksnummer"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let linker = HttpCaseLinker::new(
            CaseApiClient::new(remote(&server)),
            ArchiveClient::new(remote(&server)),
        );
        let err = linker
            .link(&request(), &CorrelationId::from("corr-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("case.lookup"));
    }
}
