//! Generic OData passthrough and dedicated POST.

use std::collections::BTreeMap;

use crate::builder::GenericRequest;
use crate::envelope::ResultEnvelope;
use crate::executor::SapClient;

/// Generic SAP API client.
#[derive(Clone)]
pub struct GenericClient {
    client: SapClient,
}

impl GenericClient {
    pub fn new(client: SapClient) -> Self {
        Self { client }
    }

    /// Forward a caller-shaped request to a relative service path.
    pub async fn call(&self, request: &GenericRequest) -> ResultEnvelope {
        match self.client.builder().generic(request) {
            Ok(composed) => self.client.execute(&composed).await,
            Err(e) => {
                tracing::debug!(error = %e, "Generic request rejected");
                ResultEnvelope::rejected(&e)
            }
        }
    }

    /// POST a raw payload to an endpoint under the OData service root.
    pub async fn post(
        &self,
        endpoint: &str,
        payload: &str,
        content_type: Option<&str>,
        additional_headers: &BTreeMap<String, String>,
    ) -> ResultEnvelope {
        let content_type = content_type
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("application/json");

        match self
            .client
            .builder()
            .post(endpoint, payload, content_type, additional_headers)
        {
            Ok(composed) => self.client.execute(&composed).await,
            Err(e) => {
                tracing::debug!(error = %e, "POST request rejected");
                ResultEnvelope::rejected(&e)
            }
        }
    }
}

impl std::fmt::Debug for GenericClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericClient").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GenericClient {
        let config = Arc::new(test_config("http://127.0.0.1", server.address().port()));
        GenericClient::new(SapClient::new(config).expect("client"))
    }

    #[tokio::test]
    async fn absolute_service_path_is_rejected_before_any_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let envelope = client_for(&server)
            .call(&GenericRequest {
                service_path: "http://evil.example/x".into(),
                ..Default::default()
            })
            .await;

        assert!(!envelope.success());
        assert_eq!(envelope.status_code(), None);
        assert_eq!(envelope.url(), None);
    }

    #[tokio::test]
    async fn forwards_method_params_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder('1')"))
            .and(query_param("sap-client", "100"))
            .and(query_param("$format", "json"))
            .and(header("x-csrf-token", "abc"))
            .and(body_string(r#"{"PurchaseOrderByCustomer":"PO-1"}"#))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let envelope = client_for(&server)
            .call(&GenericRequest {
                service_path: "/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder('1')".into(),
                method: Some("put".into()),
                headers: BTreeMap::from([("X-CSRF-Token".to_string(), "abc".to_string())]),
                params: BTreeMap::from([("$format".to_string(), "json".to_string())]),
                data: Some(json!({"PurchaseOrderByCustomer": "PO-1"})),
            })
            .await;

        assert!(envelope.success(), "{:?}", envelope);
        assert_eq!(envelope.status_code(), Some(204));
    }

    #[tokio::test]
    async fn post_sends_requested_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sap/opu/odata/sap/API_X/Set"))
            .and(header("Content-Type", "application/xml"))
            .and(header("X-Requested-With", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"d": {"Id": "1"}})))
            .expect(1)
            .mount(&server)
            .await;

        let envelope = client_for(&server)
            .post("/API_X/Set", "<x/>", Some("application/xml"), &BTreeMap::new())
            .await;

        assert!(envelope.success());
        assert_eq!(envelope.status_code(), Some(201));
        assert_eq!(envelope.data(), Some(&json!({"d": {"Id": "1"}})));
    }
}
