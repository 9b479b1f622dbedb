use std::path::{Path, PathBuf};

use clap::Parser;
use tilegen::TilegenResult;
use tilegen::config::{ConfigDocument, build_service};
use tilegen::logging::init_tracing;
use tilegen::plugin::Registry;
use tilegen::srv::run_server;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    about = "PostGIS vector tile server rendering MVT, GeoJSON and TopoJSON tiles through a disk cache",
    version,
    after_help = "Use the RUST_LOG environment variable to control logging, e.g. RUST_LOG=debug."
)]
struct Args {
    /// Path to the JSON configuration file
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Number of HTTP worker threads (defaults to the number of cores)
    #[arg(short, long)]
    workers: Option<usize>,
}

async fn start(args: Args) -> TilegenResult<()> {
    info!("Starting tilegen v{VERSION}");

    let document = ConfigDocument::from_path(&args.config)?;
    let base_dir = args
        .config
        .parent()
        .map_or_else(PathBuf::new, Path::to_path_buf);
    // plugins are for embedding hosts; the standalone binary runs with none
    let registry = Registry::new();
    let service = build_service(document, &registry, &base_dir)?;

    info!("Listening on {}", args.listen);
    run_server(service, &args.listen, args.workers).await
}

#[actix_web::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    if let Err(e) = start(args).await {
        error!("{e}");
        std::process::exit(1);
    }
}
