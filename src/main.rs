//! toolhost-mcp: minimalist MCP server for host-defined tools.
//!
//! Loads the host configuration, wires the example tool registry, and runs
//! the configured transport (streamable HTTP or stdio).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing::{error, info, Level};
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use toolhost_mcp::config::{self, LoggingConfig, Transport};
use toolhost_mcp::mcp::{http, ProtocolEngine, SessionLifecycle, StdioServer};
use toolhost_mcp::registry::{ToolDescriptor, ToolHandler, ToolRegistry, ToolResult};
use toolhost_mcp::store::SessionStore;

/// Minimalist MCP server exposing host-registered tools.
///
/// Speaks JSON-RPC 2.0 over a streamable HTTP endpoint or stdin/stdout,
/// with durable session records shared across processes.
#[derive(Parser, Debug)]
#[command(name = "toolhost-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn open_log(path: &Path) -> Option<Arc<File>> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(Arc::new(file)),
        Err(e) => {
            eprintln!("Cannot open log file {}: {e}", path.display());
            None
        }
    }
}

/// Initialises the tracing subscriber.
///
/// The debug log receives everything at `level`, the error log receives
/// WARN and above, and the access log receives `access`-target events.
/// Without a debug log, full output goes to stderr. Standard output is
/// never written to; the stdio transport owns it.
fn init_tracing(level: Level, logging: &LoggingConfig) {
    let level_filter = || EnvFilter::from_default_env().add_directive(level.into());

    let debug_layer = logging.debug_log.as_deref().and_then(open_log).map(|f| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(f)
            .with_filter(level_filter())
    });

    let error_layer = logging.error_log.as_deref().and_then(open_log).map(|f| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(f)
            .with_filter(LevelFilter::WARN)
    });

    let access_layer = logging.access_log.as_deref().and_then(open_log).map(|f| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(f)
            .with_filter(filter_fn(|meta| meta.target() == "access"))
    });

    let stderr_layer = if logging.debug_log.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(level_filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(debug_layer)
        .with(error_layer)
        .with(access_layer)
        .with(stderr_layer)
        .init();
}

/// Example tool: adds two integers and reports the sum both as text and as
/// structured content. Real hosts register their own tools before running
/// a transport.
struct AddNumbers;

#[async_trait]
impl ToolHandler for AddNumbers {
    async fn call(&self, arguments: Value) -> ToolResult {
        let a = arguments.get("a").and_then(Value::as_i64);
        let b = arguments.get("b").and_then(Value::as_i64);
        match (a, b) {
            (Some(a), Some(b)) => ToolResult::text((a + b).to_string())
                .with_structured(json!({ "sum": a + b })),
            _ => ToolResult::error("add_numbers expects integer arguments 'a' and 'b'"),
        }
    }
}

fn example_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_tool(
        ToolDescriptor::new(
            "add_numbers",
            "Add two integers and return their sum.",
            json!({
                "type": "object",
                "properties": {
                    "a": { "type": "integer" },
                    "b": { "type": "integer" }
                },
                "required": ["a", "b"]
            }),
        )
        .with_title("Add numbers")
        .with_output_schema(json!({
            "type": "object",
            "properties": { "sum": { "type": "integer" } },
            "required": ["sum"]
        })),
        Arc::new(AddNumbers),
    );
    registry
}

/// Entry point for the toolhost-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                    eprintln!("Remember to set \"transport\" explicitly (HTTP or STDIO).");
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level, &cfg.logging);

    // GPL license notice (required by GPLv3 Section 5d).
    eprintln!(
        "toolhost-mcp {}  Copyright (C) 2026  The toolhost contributors",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting toolhost-mcp server"
    );

    let store = match SessionStore::open(cfg.session_dir()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "cannot open session store");
            return ExitCode::FAILURE;
        }
    };

    let engine = ProtocolEngine::new(
        Arc::new(example_registry()),
        cfg.server_name.clone(),
        cfg.server_version.clone(),
    );
    let lifecycle = SessionLifecycle::new(engine, store);

    let result = match cfg.transport {
        Transport::Stdio => {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to create Tokio runtime");
                    return ExitCode::FAILURE;
                }
            };
            let mut server =
                StdioServer::new(lifecycle, cfg.max_uptime_secs, cfg.init_timeout_secs);
            info!("MCP server ready on stdio");
            runtime.block_on(server.run())
        }
        Transport::Http => {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to create Tokio runtime");
                    return ExitCode::FAILURE;
                }
            };
            let state = http::HttpState::new(
                lifecycle,
                cfg.endpoint.clone(),
                cfg.max_uptime_secs,
                cfg.init_timeout_secs,
            );
            runtime.block_on(http::serve(cfg.listen, state))
        }
    };

    match result {
        Ok(()) => {
            info!("server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
