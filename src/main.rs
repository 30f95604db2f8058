//! SAP OData MCP Server
//!
//! Bridges MCP tool calls to SAP OData v2/v4 services.

mod api;
mod auth;
mod builder;
mod config;
mod debug;
mod envelope;
mod error;
mod executor;
mod odata;
mod sanitize;
mod server;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing_subscriber::EnvFilter;

use crate::api::{CustomersClient, GenericClient, ProductsClient};
use crate::auth::BasicAuth;
use crate::config::{Config, ServiceRegistry};
use crate::debug::DebugLogger;
use crate::executor::SapClient;
use crate::server::{ApiClients, SapOdataServer};

#[derive(Parser, Debug)]
#[command(name = "sap-odata-mcp")]
#[command(author, version, about = "SAP OData MCP Server", long_about = None)]
struct Args {
    /// Path to a .env file with SAP_* and AUTH_* settings
    #[arg(short, long, default_value = ".env")]
    env_file: String,

    /// Enable debug mode (logs all MCP tool calls)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A missing .env file is not an error; the process environment may be complete.
    let _ = dotenvy::from_filename(&args.env_file);

    let config = Config::from_env().context("Failed to resolve SAP configuration")?;
    let debug_enabled = args.debug || config.debug;

    // stdout carries the MCP protocol
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug_enabled { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let redactor = BasicAuth::from_config(&config).redactor(&config);
    let debug = Arc::new(DebugLogger::new(debug_enabled, redactor));

    if debug_enabled {
        debug.log("SAP OData MCP Server starting...");
        debug.log(&format!("Env file: {}", args.env_file));
        debug.log(&format!("Base URL: {}", config.base_url()));
        debug.log(&format!("SAP client: {}", config.client));
        if let Some(path) = debug.trace_path() {
            eprintln!("[DEBUG] Trace file: {}", path.display());
        }
    }

    let config = Arc::new(config);
    let registry = Arc::new(ServiceRegistry::from_config(&config));

    let sap_client = SapClient::new(config.clone()).context("Failed to create SAP HTTP client")?;

    let clients = ApiClients {
        customers: CustomersClient::new(sap_client.clone(), registry.clone()),
        products: ProductsClient::new(sap_client.clone(), registry.clone()),
        generic: GenericClient::new(sap_client),
    };

    let server = SapOdataServer::new(clients, registry, debug.clone());

    if debug_enabled {
        debug.log("All API clients initialized");
        debug.log("Starting MCP server on stdio transport...");
    }

    // Run MCP server on stdio transport
    let service = server.serve(stdio()).await?;

    if debug_enabled {
        debug.log("MCP server started, waiting for messages...");
    }

    service.waiting().await?;

    if debug_enabled {
        debug.log("MCP server shutting down");
    }

    Ok(())
}
