mod api;
mod assets;
mod error;
mod proxy;
mod sse;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tooldock_core::{parse_download_limit, Engine, Settings};
use tracing::info;

#[derive(Parser)]
#[command(name = "tooldock-server", about = "Remote-tool manager with a web UI")]
struct Args {
    /// Catalog JSON path.
    #[arg(long, default_value = "catalog.json")]
    config: PathBuf,

    /// Writable root for downloaded tools.
    #[arg(long, default_value = "external_tools")]
    root: PathBuf,

    /// Read-only root searched before the writable root (repeatable).
    #[arg(long = "read-only-root")]
    read_only_roots: Vec<PathBuf>,

    /// Relocation root used when the writable root is mounted noexec.
    #[arg(long)]
    tmp_exec_root: Option<PathBuf>,

    /// Download rate limit in bytes/sec; accepts `_`/`,` separators,
    /// 0 disables. Overrides the DOWNLOAD_LIMIT_BPS env var.
    #[arg(long)]
    download_limit_bps: Option<String>,

    /// Listen port (0 picks a free port).
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();
    let engine = Engine::new(Settings {
        writable_root: args.root,
        read_only_roots: args.read_only_roots,
        tmp_exec_root: args.tmp_exec_root,
        download_limit_bps: args.download_limit_bps.as_deref().map(parse_download_limit),
    })?;
    engine.load_catalog_file(&args.config)?;
    engine.load_dev_overrides_from_env();

    let state = Arc::new(api::AppState::new(Arc::new(engine)));
    let router = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("tooldock-server listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}
