//! Force Engine - MCP server binary entry point.
//!
//! Thin binary: parse configuration, run the Engine's startup validation
//! gate (spec.md §4.11), then serve the MCP surface over the configured
//! transport until the client disconnects or the process is signalled.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use force_core::config::{EngineConfig, Mode, Transport};
use force_core::engine::{Engine, EngineError};
use force::mcp_server::{ForceServer, default_actions};
use rmcp::ServiceExt;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use tracing_subscriber::EnvFilter;

/// Force Engine MCP server (spec.md §6 "Configuration"): one flag per
/// process-wide config field, read once at startup and never mutated.
#[derive(Debug, Parser)]
#[command(name = "force", about = "Schema-validated component registry and execution runtime, exposed over MCP")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Component root directory (schemas/, tools/, patterns/, ...).
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Deployment mode: gates startup strictness.
    #[arg(long, value_enum, default_value = "development")]
    mode: ModeArg,

    /// Transport: stdio or http.
    #[arg(long, value_enum, default_value = "stdio")]
    transport: TransportArg,

    /// HTTP bind host (only used when --transport=http).
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// HTTP bind port (only used when --transport=http).
    #[arg(long, default_value_t = 8765)]
    port: u16,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,

    /// Run the Auto-Fixer against quarantined components at startup.
    #[arg(long)]
    auto_fix_on_start: bool,

    /// Bounded worker pool size for component loading/validation.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Learning log rotation threshold in bytes.
    #[arg(long)]
    log_rotation_bytes: Option<u64>,
}

/// `force serve` (default when no subcommand is given) starts the MCP
/// Surface; `force validate` runs the Loader/Validator pipeline once and
/// writes `validation_report.json` without serving anything, for CI use.
#[derive(Debug, Clone, Copy, clap::Subcommand)]
enum Command {
    Serve,
    Validate,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Development,
    Staging,
    Production,
}

impl From<ModeArg> for Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Development => Mode::Development,
            ModeArg::Staging => Mode::Staging,
            ModeArg::Production => Mode::Production,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum TransportArg {
    Stdio,
    Http,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            root: self.root.clone(),
            mode: self.mode.into(),
            transport: match self.transport {
                TransportArg::Stdio => Transport::Stdio,
                TransportArg::Http => Transport::Http {
                    host: self.host.clone(),
                    port: self.port,
                },
            },
            debug: self.debug,
            auto_fix_on_start: self.auto_fix_on_start,
            ..EngineConfig::default()
        };
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if let Some(bytes) = self.log_rotation_bytes {
            config.log_rotation_bytes = bytes;
        }
        config
    }
}

/// Process exit codes (spec.md §6).
const EXIT_OK: i32 = 0;
const EXIT_OTHER_FATAL: i32 = 1;
const EXIT_TRANSPORT_FAILURE: i32 = 4;

fn main() -> std::process::ExitCode {
    const MAIN_THREAD_STACK_BYTES: usize = 16 * 1024 * 1024;

    let handle = match std::thread::Builder::new()
        .name("force-main".to_string())
        .stack_size(MAIN_THREAD_STACK_BYTES)
        .spawn(|| -> i32 {
            match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                Ok(runtime) => runtime.block_on(run()),
                Err(err) => {
                    eprintln!("Error: failed to build Tokio runtime: {err}");
                    EXIT_OTHER_FATAL
                }
            }
        }) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Error: failed to spawn force main thread: {err}");
            return std::process::ExitCode::from(EXIT_OTHER_FATAL as u8);
        }
    };

    let code = match handle.join() {
        Ok(code) => code,
        Err(_) => {
            eprintln!("Error: force main thread panicked");
            EXIT_OTHER_FATAL
        }
    };
    std::process::ExitCode::from(code as u8)
}

async fn run() -> i32 {
    let args = Args::parse();
    initialize_tracing(args.debug);

    let config = args.engine_config();
    let transport = config.transport.clone();

    let engine = match Engine::bootstrap(config, default_actions()).await {
        Ok(engine) => Arc::new(engine),
        Err(EngineError::SchemaMissing(path)) => {
            tracing::error!(path = %path.display(), "no schema found under <root>/schemas; refusing to start");
            return force_core::engine::EngineError::SchemaMissing(path).exit_code();
        }
        Err(err @ EngineError::CriticalComponentsInvalid(_)) => {
            tracing::error!(%err, "startup blocked: critical component(s) invalid in production mode");
            return err.exit_code();
        }
        Err(err) => {
            tracing::error!(%err, "engine failed to start");
            return EXIT_OTHER_FATAL;
        }
    };

    tracing::info!(state = ?engine.state(), "Force Engine ready");

    if matches!(args.command, Some(Command::Validate)) {
        return match engine.write_validation_report().await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "validation report written");
                EXIT_OK
            }
            Err(err) => {
                tracing::error!(%err, "failed to write validation report");
                EXIT_OTHER_FATAL
            }
        };
    }

    let server = ForceServer::new(engine);

    let result = match transport {
        Transport::Stdio => serve_stdio(server).await,
        Transport::Http { host, port } => serve_http(server, &host, port).await,
    };

    match result {
        Ok(()) => EXIT_OK,
        Err(err) => {
            tracing::error!(%err, "MCP transport failed");
            EXIT_TRANSPORT_FAILURE
        }
    }
}

/// Serve over stdio until the client disconnects (grounded on the
/// teacher's MCP client transport conventions, adapted to server use).
async fn serve_stdio(server: ForceServer) -> Result<()> {
    let running = server
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
        .context("failed to start stdio MCP transport")?;
    running.waiting().await.context("stdio MCP transport ended with an error")?;
    Ok(())
}

/// Serve over the streamable-HTTP transport (spec.md §6 `transport: http`).
async fn serve_http(server: ForceServer, host: &str, port: u16) -> Result<()> {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP transport on {addr}"))?;
    tracing::info!(%addr, "Force Engine serving MCP over HTTP");
    axum::serve(listener, router)
        .await
        .context("HTTP MCP transport ended with an error")?;
    Ok(())
}

fn initialize_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // Logs go to stderr so they never interleave with the stdio MCP transport's stdout framing.
    let _ = tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).try_init();
}
