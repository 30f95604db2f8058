//! Product description search and key lookup (OData v4).

use std::sync::Arc;

use serde_json::{json, Value};

use crate::builder::{ComposedRequest, KeyLookupPlan, SearchRequest};
use crate::config::{product_description_path, ServiceDescriptor, ServiceRegistry, PRODUCT_DESCRIPTION};
use crate::envelope::ResultEnvelope;
use crate::error::QueryBuildError;
use crate::executor::SapClient;
use crate::odata::{EntityKey, KeyMode, ODataVersion};

use super::{entities, pick};

const DEFAULT_SEARCH_FIELD: &str = "ProductDescription";
const DEFAULT_LANGUAGE: &str = "EN";
const PRODUCT_FIELDS: [&str; 3] = ["Product", "ProductDescription", "Language"];

/// Parameters of a product description query.
#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    /// Free-text search; ignored when `product` is set.
    pub description: Option<String>,
    pub search_field: Option<String>,
    pub language: Option<String>,
    pub exact_match: bool,
    pub max_results: Option<i64>,
    /// Direct key lookup.
    pub product: Option<String>,
    /// `segment`, `paren` or `auto`; unset means `auto`.
    pub key_mode: Option<String>,
    /// Four-digit service version, e.g. `0002`.
    pub service_version: Option<String>,
}

enum Prepared {
    Search(SearchRequest, ComposedRequest),
    Lookup {
        product: String,
        language: String,
        plan: KeyLookupPlan,
    },
}

/// Products API client.
#[derive(Clone)]
pub struct ProductsClient {
    client: SapClient,
    registry: Arc<ServiceRegistry>,
}

impl ProductsClient {
    pub fn new(client: SapClient, registry: Arc<ServiceRegistry>) -> Self {
        Self { client, registry }
    }

    /// Search product descriptions, or fetch one by key when `product` is set.
    pub async fn query(&self, params: &ProductQuery) -> ResultEnvelope {
        match self.prepare(params) {
            Err(e) => {
                tracing::debug!(error = %e, "Product query rejected");
                ResultEnvelope::rejected(&e)
            }
            Ok(Prepared::Search(request, composed)) => self
                .client
                .execute(&composed)
                .await
                .map_data(|body| summarize_search(&request, &body)),
            Ok(Prepared::Lookup {
                product,
                language,
                plan,
            }) => {
                let (style, envelope) = self.client.execute_lookup(&plan).await;
                envelope.map_data(|body| {
                    let products = products(&body);
                    let mut summary = json!({
                        "mode": style.label(),
                        "product_key": product,
                        "language": language,
                        "found_products": products.len(),
                        "products": products,
                    });
                    if products.is_empty() {
                        summary["message"] = json!(format!(
                            "No ProductDescription found for {}/{}",
                            product, language
                        ));
                    }
                    summary
                })
            }
        }
    }

    fn prepare(&self, params: &ProductQuery) -> Result<Prepared, QueryBuildError> {
        let service = self.service(params.service_version.as_deref())?;
        let key_mode = match non_empty(params.key_mode.as_deref()) {
            Some(mode) => mode.parse::<KeyMode>()?,
            None => KeyMode::default(),
        };
        let language = non_empty(params.language.as_deref())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();

        if let Some(product) = non_empty(params.product.as_deref()) {
            let key = EntityKey::Composite(vec![
                ("Product".to_string(), product.to_string()),
                ("Language".to_string(), language.clone()),
            ]);
            let plan = self
                .client
                .builder()
                .key_lookup(&service, &key, key_mode, &PRODUCT_FIELDS)?;
            return Ok(Prepared::Lookup {
                product: product.to_string(),
                language,
                plan,
            });
        }

        let description =
            non_empty(params.description.as_deref()).ok_or(QueryBuildError::MissingSearchInput)?;
        let request = SearchRequest {
            description: description.to_string(),
            search_field: non_empty(params.search_field.as_deref())
                .unwrap_or(DEFAULT_SEARCH_FIELD)
                .to_string(),
            exact_match: params.exact_match,
            max_results: params.max_results,
            language: Some(language),
            select: PRODUCT_FIELDS.iter().map(|f| f.to_string()).collect(),
        };
        let composed = self.client.builder().search(&service, &request)?;
        Ok(Prepared::Search(request, composed))
    }

    /// Registered descriptor, or a versioned variant of it.
    fn service(&self, version: Option<&str>) -> Result<ServiceDescriptor, QueryBuildError> {
        match non_empty(version) {
            None => self.registry.get(PRODUCT_DESCRIPTION).cloned(),
            Some(v) if v.len() == 4 && v.chars().all(|c| c.is_ascii_digit()) => Ok(
                ServiceDescriptor::new(PRODUCT_DESCRIPTION, &product_description_path(v), ODataVersion::V4),
            ),
            Some(v) => Err(QueryBuildError::InvalidServiceVersion(v.to_string())),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn products(body: &Value) -> Vec<Value> {
    entities(body)
        .into_iter()
        .map(|p| pick(p, &PRODUCT_FIELDS))
        .collect()
}

fn summarize_search(request: &SearchRequest, body: &Value) -> Value {
    let products = products(body);
    json!({
        "mode": "search",
        "search_query": request.description,
        "search_field": request.search_field,
        "language": request.language,
        "exact_match": request.exact_match,
        "found_products": products.len(),
        "products": products,
    })
}

impl std::fmt::Debug for ProductsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductsClient").finish()
    }
}
