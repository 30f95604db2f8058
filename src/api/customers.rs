//! Customer search against the Business Partner API (OData v2).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::builder::{ComposedRequest, SearchRequest};
use crate::config::{ServiceRegistry, BUSINESS_PARTNER};
use crate::envelope::ResultEnvelope;
use crate::error::QueryBuildError;
use crate::executor::SapClient;

use super::{entities, pick};

const DEFAULT_SEARCH_FIELD: &str = "CustomerName";
const CUSTOMER_FIELDS: [&str; 3] = ["Customer", "CustomerName", "CustomerFullName"];

/// Parameters of a customer search.
#[derive(Debug, Clone, Default)]
pub struct CustomerSearch {
    pub description: String,
    pub search_field: Option<String>,
    pub exact_match: bool,
    pub max_results: Option<i64>,
}

/// Customers API client.
#[derive(Clone)]
pub struct CustomersClient {
    client: SapClient,
    registry: Arc<ServiceRegistry>,
}

impl CustomersClient {
    pub fn new(client: SapClient, registry: Arc<ServiceRegistry>) -> Self {
        Self { client, registry }
    }

    /// Search customers by description.
    pub async fn search(&self, params: &CustomerSearch) -> ResultEnvelope {
        let (request, composed) = match self.prepare(params) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!(error = %e, "Customer search rejected");
                return ResultEnvelope::rejected(&e);
            }
        };

        self.client
            .execute(&composed)
            .await
            .map_data(|body| summarize(&request, &body))
    }

    fn prepare(
        &self,
        params: &CustomerSearch,
    ) -> Result<(SearchRequest, ComposedRequest), QueryBuildError> {
        let service = self.registry.get(BUSINESS_PARTNER)?;
        let request = SearchRequest {
            description: params.description.clone(),
            search_field: params
                .search_field
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_SEARCH_FIELD)
                .to_string(),
            exact_match: params.exact_match,
            max_results: params.max_results,
            language: None,
            select: CUSTOMER_FIELDS.iter().map(|f| f.to_string()).collect(),
        };
        let composed = self.client.builder().search(service, &request)?;
        Ok((request, composed))
    }
}

fn summarize(request: &SearchRequest, body: &Value) -> Value {
    let customers: Vec<Value> = entities(body)
        .into_iter()
        .map(|c| pick(c, &CUSTOMER_FIELDS))
        .collect();

    json!({
        "search_query": request.description,
        "search_field": request.search_field,
        "exact_match": request.exact_match,
        "found_customers": customers.len(),
        "customers": customers,
    })
}

impl std::fmt::Debug for CustomersClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomersClient").finish()
    }
}
