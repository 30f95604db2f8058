//! MCP Server implementation with SAP OData tools.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, ErrorData as McpError, Implementation,
        ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars::{self, JsonSchema},
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::customers::CustomerSearch;
use crate::api::products::ProductQuery;
use crate::api::{CustomersClient, GenericClient, ProductsClient};
use crate::builder::GenericRequest;
use crate::config::ServiceRegistry;
use crate::debug::DebugLogger;
use crate::envelope::ResultEnvelope;

/// Container for the SAP API clients.
#[derive(Clone)]
pub struct ApiClients {
    pub customers: CustomersClient,
    pub products: ProductsClient,
    pub generic: GenericClient,
}

/// SAP OData MCP Server.
#[derive(Clone)]
pub struct SapOdataServer {
    clients: ApiClients,
    registry: Arc<ServiceRegistry>,
    debug: Arc<DebugLogger>,
    tool_router: ToolRouter<Self>,
}

impl SapOdataServer {
    pub fn new(clients: ApiClients, registry: Arc<ServiceRegistry>, debug: Arc<DebugLogger>) -> Self {
        Self {
            clients,
            registry,
            debug,
            tool_router: Self::tool_router(),
        }
    }

    /// Log the envelope and wrap it as pretty JSON text.
    fn respond(&self, tool_name: &str, envelope: &ResultEnvelope) -> Result<CallToolResult, McpError> {
        let value = serde_json::to_value(envelope).map_err(to_mcp_error)?;
        self.debug.log_tool_result(tool_name, &value);

        let text = serde_json::to_string_pretty(&value).map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert any error to McpError
fn to_mcp_error<E: std::fmt::Display>(e: E) -> McpError {
    McpError {
        code: ErrorCode::INTERNAL_ERROR,
        message: Cow::from(e.to_string()),
        data: None,
    }
}

// ============================================================================
// Tool Parameter Structs
// ============================================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchCustomerParams {
    /// Text to search for in the customer description
    pub description: String,
    /// Field to search in (default: CustomerName)
    pub search_field: Option<String>,
    /// Match the whole field exactly instead of a substring (default: false)
    pub exact_match: Option<bool>,
    /// Maximum number of results, 1-100 (default: 10)
    pub max_results: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchProductParams {
    /// Text to search for in the product description
    pub description: Option<String>,
    /// Field to search in (default: ProductDescription)
    pub search_field: Option<String>,
    /// Description language (default: EN)
    pub language: Option<String>,
    /// Match the whole field exactly instead of a substring (default: false)
    pub exact_match: Option<bool>,
    /// Maximum number of results, 1-100 (default: 10)
    pub max_results: Option<i64>,
    /// Product key for a direct lookup; takes precedence over description
    pub product: Option<String>,
    /// Key addressing for lookups: segment, paren or auto (default: auto)
    pub key_mode: Option<String>,
    /// Four-digit service version (default: 0002)
    pub service_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GenericSearchParams {
    /// Service path relative to the SAP host, e.g. /sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder
    pub service_path: String,
    /// HTTP method: GET, POST, PUT or DELETE (default: GET)
    pub method: Option<String>,
    /// Additional request headers
    pub headers: Option<BTreeMap<String, String>>,
    /// Additional query parameters, e.g. {"$top": "5"}
    pub params: Option<BTreeMap<String, String>>,
    /// JSON body for POST and PUT
    pub data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PostToSapParams {
    /// Endpoint below sap/opu/odata/sap, e.g. API_SALES_ORDER_SRV/A_SalesOrder
    pub endpoint: String,
    /// Raw request body
    pub payload: String,
    /// Content type of the payload (default: application/json)
    pub content_type: Option<String>,
    /// Additional request headers
    pub additional_headers: Option<BTreeMap<String, String>>,
}

// ============================================================================
// Tool Implementations
// ============================================================================

#[tool_router]
impl SapOdataServer {
    #[tool(description = "Search SAP customers (Business Partner API) by description. Partial match by default; set exact_match for equality.")]
    async fn search_customer_by_description(&self, Parameters(params): Parameters<SearchCustomerParams>) -> Result<CallToolResult, McpError> {
        self.debug.log_tool_call("search_customer_by_description", &json!(params));

        let search = CustomerSearch {
            description: params.description,
            search_field: params.search_field,
            exact_match: params.exact_match.unwrap_or(false),
            max_results: params.max_results,
        };
        let envelope = self.clients.customers.search(&search).await;

        self.respond("search_customer_by_description", &envelope)
    }

    #[tool(description = "Search SAP product descriptions (OData v4) by text, or fetch one directly by product key and language.")]
    async fn search_product_by_description(&self, Parameters(params): Parameters<SearchProductParams>) -> Result<CallToolResult, McpError> {
        self.debug.log_tool_call("search_product_by_description", &json!(params));

        let query = ProductQuery {
            description: params.description,
            search_field: params.search_field,
            language: params.language,
            exact_match: params.exact_match.unwrap_or(false),
            max_results: params.max_results,
            product: params.product,
            key_mode: params.key_mode,
            service_version: params.service_version,
        };
        let envelope = self.clients.products.query(&query).await;

        self.respond("search_product_by_description", &envelope)
    }

    #[tool(description = "Call any SAP OData service path relative to the configured host, with optional method, headers, query parameters and JSON body.")]
    async fn generic_sap_search(&self, Parameters(params): Parameters<GenericSearchParams>) -> Result<CallToolResult, McpError> {
        self.debug.log_tool_call("generic_sap_search", &json!({
            "service_path": params.service_path,
            "method": params.method,
            "params": params.params,
        }));

        let request = GenericRequest {
            service_path: params.service_path,
            method: params.method,
            headers: params.headers.unwrap_or_default(),
            params: params.params.unwrap_or_default(),
            data: params.data,
        };
        let envelope = self.clients.generic.call(&request).await;

        self.respond("generic_sap_search", &envelope)
    }

    #[tool(description = "[EXPERIMENTAL] POST a raw payload to an SAP OData endpoint. Requires user confirmation before execution.")]
    async fn post_to_sap(&self, Parameters(params): Parameters<PostToSapParams>) -> Result<CallToolResult, McpError> {
        self.debug.log_tool_call("post_to_sap", &json!({
            "endpoint": params.endpoint,
            "content_type": params.content_type,
        }));

        let headers = params.additional_headers.unwrap_or_default();
        let envelope = self
            .clients
            .generic
            .post(&params.endpoint, &params.payload, params.content_type.as_deref(), &headers)
            .await;

        self.respond("post_to_sap", &envelope)
    }

    #[tool(description = "List the SAP services known to this server with their base paths and OData versions.")]
    async fn list_sap_services(&self) -> Result<CallToolResult, McpError> {
        self.debug.log_tool_call("list_sap_services", &json!({}));

        let services: Vec<_> = self.registry.all().collect();
        let result = json!({ "services": services });

        self.debug.log_tool_result("list_sap_services", &result);

        let text = serde_json::to_string_pretty(&result).map_err(to_mcp_error)?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl ServerHandler for SapOdataServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "SAP OData MCP Server - Search customers and product descriptions, call any \
                OData v2/v4 service path, and POST payloads to an SAP system. Every tool returns \
                a JSON envelope with success, status_code, data or error, details and url."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::executor::SapClient;

    fn server() -> SapOdataServer {
        let config = Arc::new(test_config("http://127.0.0.1", 1));
        let registry = Arc::new(ServiceRegistry::from_config(&config));
        let client = SapClient::new(config).expect("client");
        let clients = ApiClients {
            customers: CustomersClient::new(client.clone(), registry.clone()),
            products: ProductsClient::new(client.clone(), registry.clone()),
            generic: GenericClient::new(client),
        };
        SapOdataServer::new(clients, registry, Arc::new(DebugLogger::new(false, Default::default())))
    }

    fn text_of(result: &CallToolResult) -> Value {
        let text = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .expect("text content");
        serde_json::from_str(&text).expect("json")
    }

    #[test]
    fn test_get_info_enables_tools() {
        let info = server().get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("SAP OData"));
    }

    #[tokio::test]
    async fn test_list_sap_services() {
        let result = server().list_sap_services().await.expect("result");
        let value = text_of(&result);
        let names: Vec<&str> = value["services"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["business_partner", "product_description", "sales_order"]);
        assert_eq!(value["services"][1]["version"], "v4");
    }

    #[tokio::test]
    async fn test_invalid_key_mode_is_rejected_envelope() {
        let result = server()
            .search_product_by_description(Parameters(SearchProductParams {
                description: None,
                search_field: None,
                language: None,
                exact_match: None,
                max_results: None,
                product: Some("HT-1000".into()),
                key_mode: Some("sideways".into()),
                service_version: None,
            }))
            .await
            .expect("result");
        let value = text_of(&result);
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("sideways"));
        assert!(value.get("url").is_none());
    }

    #[tokio::test]
    async fn test_rejected_request_is_returned_as_envelope() {
        let result = server()
            .generic_sap_search(Parameters(GenericSearchParams {
                service_path: "https://elsewhere.example/x".into(),
                method: None,
                headers: None,
                params: None,
                data: None,
            }))
            .await
            .expect("result");
        let value = text_of(&result);
        assert_eq!(value["success"], false);
        assert!(value.get("url").is_none());
        assert!(value.get("status_code").is_none());
    }
}
