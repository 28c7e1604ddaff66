use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use radix_gateway::cache::MemoryStorage;
use radix_gateway::config::{load_config, GatewayConfig};
use radix_gateway::lifecycle::{build_app, build_router};
use radix_gateway::routing::{MethodLookup, RouteRulesMatcher, RouterOptions};
use radix_gateway::Event;

#[derive(Parser)]
#[command(name = "routectl")]
#[command(about = "Inspect a radix-gateway configuration offline", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and summarize it
    Check,
    /// Show which route serves a path
    Match {
        path: String,
        #[arg(short, long, default_value = "GET")]
        method: String,
    },
    /// Show the merged route rules for a path
    Rules { path: String },
    /// Dispatch a request through the full pipeline in-process
    Request {
        path: String,
        #[arg(short, long, default_value = "GET")]
        method: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Check => {
            let app = build_app(&config, Arc::new(MemoryStorage::new()))?;
            print_json(&json!({
                "ok": true,
                "bind_address": config.server.bind_address,
                "routes": config.routes.len(),
                "route_rules": config.route_rules.keys().collect::<Vec<_>>(),
                "layers": app.layers().iter().map(|layer| layer.route()).collect::<Vec<_>>(),
            }))?;
        }
        Commands::Match { path, method } => {
            let method = parse_method(&method)?;
            let router = build_router(&config, Arc::new(MemoryStorage::new()), Some(&rules_matcher(&config)))?;
            let result = match router.match_handler(&path, &method) {
                MethodLookup::Matched(hit) => json!({
                    "matched": true,
                    "route": hit.route.path(),
                    "params": hit.params.unwrap_or_default(),
                }),
                MethodLookup::MethodNotAllowed { path, method } => json!({
                    "matched": false,
                    "status": 405,
                    "path": path,
                    "method": method.as_str(),
                }),
                MethodLookup::NotFound { path } => json!({
                    "matched": false,
                    "status": 404,
                    "path": path,
                }),
            };
            print_json(&result)?;
        }
        Commands::Rules { path } => {
            let rules = rules_matcher(&config).rules_for(&path);
            print_json(&serde_json::to_value(rules)?)?;
        }
        Commands::Request { path, method } => {
            let method = parse_method(&method)?;
            let app = build_app(&config, Arc::new(MemoryStorage::new()))?;
            let response = app.handle(Event::new(method, path)).await;
            let headers: serde_json::Map<String, Value> = response
                .headers
                .iter()
                .map(|(name, value)| (name.to_string(), Value::from(value.to_str().unwrap_or_default())))
                .collect();
            print_json(&json!({
                "status": response.status.as_u16(),
                "headers": headers,
                "body": response.text(),
            }))?;
        }
    }

    Ok(())
}

fn rules_matcher(config: &GatewayConfig) -> RouteRulesMatcher {
    let options = RouterOptions {
        strict_trailing_slash: config.router.strict_trailing_slash,
    };
    RouteRulesMatcher::new(&config.route_rules, options)
}

fn parse_method(method: &str) -> Result<Method, Box<dyn std::error::Error>> {
    Ok(Method::from_bytes(method.to_ascii_uppercase().as_bytes())?)
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
