//! HTTP binding for the tile service.

use actix_web::web::{Data, Path as WebPath};
use actix_web::{App, HttpResponse, HttpServer, get};
use serde::Deserialize;
use tilegen_tile_utils::TileCoord;
use tracing::error;

use crate::error::{TilegenError, TilegenResult};
use crate::service::TileService;

#[derive(Debug, Deserialize)]
struct TileRequest {
    layer: String,
    z: u8,
    x: u32,
    y: u32,
    ext: String,
}

#[get("/{layer}/{z}/{x}/{y}.{ext}")]
async fn get_tile(path: WebPath<TileRequest>, service: Data<TileService>) -> HttpResponse {
    let Some(coord) = TileCoord::new_checked(path.z, path.x, path.y) else {
        return HttpResponse::NotFound().body("no such tile");
    };
    match service.get_tile(&path.layer, coord, &path.ext, false).await {
        Ok((content_type, body)) => HttpResponse::Ok().content_type(content_type).body(body),
        Err(TilegenError::UnknownLayer(name)) => {
            HttpResponse::NotFound().body(format!("Layer not found: {name}"))
        }
        Err(TilegenError::UnsupportedExtension(ext)) => {
            HttpResponse::BadRequest().body(format!("Unsupported tile extension: {ext}"))
        }
        Err(e) => {
            error!("Failed to produce tile {}/{:#}: {e}", path.layer, coord);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Layer names, in config order.
#[get("/")]
async fn catalog(service: Data<TileService>) -> HttpResponse {
    HttpResponse::Ok().json(service.layers().names())
}

/// Run the HTTP server until shutdown.
pub async fn run_server(
    service: TileService,
    listen: &str,
    workers: Option<usize>,
) -> TilegenResult<()> {
    let service = Data::new(service);
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .service(get_tile)
            .service(catalog)
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }
    server
        .bind(listen)
        .map_err(|e| TilegenError::Binding(e, listen.to_string()))?
        .run()
        .await?;
    Ok(())
}
