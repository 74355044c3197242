//! Demo server for ferrule-core
//!
//! ```text
//! ferrule-server --config server.toml --port 8080
//! FERRULE_API_KEY=secret ferrule-server --log-level debug
//! ```

use clap::Parser;
use ferrule_core::{
    get, group, post, standard_routes, ActivityLog, ActivitySelection, AllowedOrigin, BearerAuth,
    Cors, CorsConfig, Engine, KeyedRateLimit, LogLevel, Method, Response, Route, RouteList,
    Router, ServerConfig,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Environment variable holding the admin API key
const ADMIN_KEY_VAR: &str = "FERRULE_API_KEY";

#[derive(Parser, Debug)]
#[command(name = "ferrule-server")]
#[command(about = "HTTP/1.1 demo server built on ferrule-core", long_about = None)]
struct Args {
    /// TOML config file; without it the environment is read
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// debug, info, warn or error
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Log every request instead of failures only
    #[arg(long)]
    log_all: bool,
}

impl Args {
    fn resolve(&self) -> ferrule_core::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_toml_file(path)?,
            None => ServerConfig::from_env()?,
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.validate()?;
        Ok(config)
    }
}

fn routes() -> Router {
    let mut routes = vec![
        get("/", |_, _| async {
            Response::text(format!("ferrule {}", env!("CARGO_PKG_VERSION")))
        }),
        get("/ping", |_, _| async { Response::text("pong") }),
        standard_routes::list_routes(),
    ];

    routes.extend(group(
        "/test",
        vec![
            post("echo", |req, _| async move {
                Response::text(format!("echo: {}", req.body_text()))
            }),
            post("text/upper", |req, _| async move {
                Response::text(req.body_text().to_uppercase())
            }),
            post("text/length", |req, _| async move {
                Response::json(&json!({ "length": req.body_text().chars().count() }))
            }),
        ],
    ));

    routes.extend(
        group(
            "/admin/users",
            vec![
                get("", |_, _| async {
                    Response::json(&json!({ "users": ["alice", "bob"] }))
                }),
                Route::fallible(Method::Delete, "", |req, _| async move {
                    let user = req
                        .header("x-user-id")
                        .ok_or("missing X-User-ID header")?
                        .to_string();
                    Ok::<_, &'static str>(Response::json(&json!({ "deleted": user })))
                }),
            ],
        )
        .with_middleware(BearerAuth::from_env(ADMIN_KEY_VAR)),
    );

    routes.extend(
        group(
            "/api",
            vec![
                get("status", |_, _| async { Response::json(&json!({ "status": "ok" })) }),
                get("items", |req, _| async move {
                    Response::json(&json!({
                        "items": ["alpha", "beta", "gamma"],
                        "client": req.client_address(),
                    }))
                }),
            ],
        )
        .allow([Method::Options, Method::Head])
        .with_middleware(Cors::new(
            CorsConfig::new(AllowedOrigin::Any)
                .methods([Method::Get, Method::Head, Method::Options])
                .expose_header("X-RateLimit-Remaining"),
        ))
        .with_middleware(KeyedRateLimit::new(60, Duration::from_secs(60))),
    );

    Router::new(routes)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.resolve()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.service_name(),
        workers = config.workers,
        "ferrule-server starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    let selection = if args.log_all {
        ActivitySelection::All
    } else {
        ActivitySelection::FailuresOnly
    };
    let engine = Engine::new(config, routes())?.activity_sink(ActivityLog::tracing(selection));

    runtime.block_on(engine.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    }))?;

    tracing::info!("ferrule-server stopped");
    Ok(())
}
