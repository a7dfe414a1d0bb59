use crate::http::{decode, ensure_success, GraphQlRequest, GraphQlResponse, RemoteClient};
use async_trait::async_trait;
use journalflow_core::{CorrelationId, IdentityResolver, WorkflowResult, DEFAULT_THEME};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::warn;

const IDENTITIES_QUERY: &str =
    "query($ident: ID!) { hentIdenter(ident: $ident, historikk: false) { identer { ident gruppe } } }";

/// Processing basis registered with the person registry.
const PROCESSING_BASIS: &str = "B470";

#[derive(Debug, Serialize)]
struct IdentVariables<'a> {
    ident: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentitiesData {
    hent_identer: Option<IdentityList>,
}

#[derive(Debug, Deserialize)]
struct IdentityList {
    #[serde(default)]
    identer: Vec<Identity>,
}

#[derive(Debug, Deserialize)]
struct Identity {
    ident: String,
    gruppe: String,
}

/// Resolves the subject's current national id through the person registry.
#[derive(Clone)]
pub struct PersonRegistryClient {
    remote: RemoteClient,
}

impl PersonRegistryClient {
    pub fn new(remote: RemoteClient) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl IdentityResolver for PersonRegistryClient {
    async fn resolve(
        &self,
        raw_subject_ref: &str,
        correlation_id: &CorrelationId,
    ) -> WorkflowResult<Option<String>> {
        let request = GraphQlRequest {
            query: IDENTITIES_QUERY,
            variables: IdentVariables {
                ident: raw_subject_ref,
            },
        };
        let response = self
            .remote
            .send_json(
                "identity.resolve",
                Method::POST,
                "/graphql",
                correlation_id,
                &request,
            )
            .await?;
        let response = ensure_success("identity.resolve", response).await?;
        let body: GraphQlResponse<IdentitiesData> = decode("identity.resolve", response).await?;

        let identities = body
            .into_data("person_registry")
            .and_then(|data| data.hent_identer)
            .map(|list| list.identer)
            .unwrap_or_default();
        let current = current_identity(identities);
        if current.is_none() {
            warn!("person registry returned no usable identity");
        }
        Ok(current)
    }
}

/// Prefers the registry id, falling back to the provisional id.
fn current_identity(identities: Vec<Identity>) -> Option<String> {
    let pick = |group: &str| {
        identities
            .iter()
            .find(|identity| identity.gruppe == group)
            .map(|identity| identity.ident.clone())
    };
    pick("FOLKEREGISTERIDENT").or_else(|| pick("NPID"))
}

/// Headers the person registry requires besides auth and correlation.
pub(crate) fn registry_headers() -> [(&'static str, &'static str); 2] {
    [("Tema", DEFAULT_THEME), ("behandlingsnummer", PROCESSING_BASIS)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{build_http_client, HttpEndpoint, StaticToken};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PersonRegistryClient {
        PersonRegistryClient::new(
            RemoteClient::new(
                build_http_client(Duration::from_secs(5)).unwrap(),
                HttpEndpoint::new(server.uri()),
                Arc::new(StaticToken::new("token")),
            )
            .with_headers(registry_headers()),
        )
    }

    fn identity(ident: &str, gruppe: &str) -> Identity {
        Identity {
            ident: ident.to_string(),
            gruppe: gruppe.to_string(),
        }
    }

    #[test]
    fn prefers_registry_id_over_provisional_id() {
        let identities = vec![
            identity("2000000000000", "AKTORID"),
            identity("01010112345", "NPID"),
            identity("12345678910", "FOLKEREGISTERIDENT"),
        ];
        assert_eq!(current_identity(identities).as_deref(), Some("12345678910"));

        let identities = vec![identity("01010112345", "NPID")];
        assert_eq!(current_identity(identities).as_deref(), Some("01010112345"));

        assert_eq!(current_identity(vec![identity("2000000000000", "AKTORID")]), None);
    }

    #[tokio::test]
    async fn resolves_current_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(header("Tema", "IND"))
            .and(header("behandlingsnummer", "B470"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "hentIdenter": {
                        "identer": [
                            { "ident": "2000000000000", "gruppe": "AKTORID" },
                            { "ident": "12345678910", "gruppe": "FOLKEREGISTERIDENT" }
                        ]
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolved = client(&server)
            .resolve("10987654321", &CorrelationId::from("corr-1"))
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("12345678910"));
    }

    #[tokio::test]
    async fn unknown_person_resolves_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "hentIdenter": null },
                "errors": [{ "message": "Fant ikke person" }]
            })))
            .mount(&server)
            .await;

        let resolved = client(&server)
            .resolve("10987654321", &CorrelationId::from("corr-1"))
            .await
            .unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn unavailable_registry_is_remote_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        assert!(client(&server)
            .resolve("10987654321", &CorrelationId::from("corr-1"))
            .await
            .is_err());
    }
}
