use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer, Result};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Mutex;
use target_size_compressor::config::AppConfig;
use target_size_compressor::converter::{compressed_file_name, DocumentConverter, ResultStore};
use target_size_compressor::search::CancellationToken;
use target_size_compressor::utils::format_file_size;
use target_size_compressor::*;

struct AppState {
    converter: DocumentConverter,
    store: Mutex<ResultStore>,
    max_upload_bytes: usize,
}

type SharedState = web::Data<AppState>;

fn error_response(error: &CompressionError) -> HttpResponse {
    let body = CompressResponse {
        success: false,
        file: None,
        error: Some(error.to_string()),
    };
    match error.kind() {
        ErrorKind::Input => HttpResponse::BadRequest().json(body),
        ErrorKind::Decode => HttpResponse::UnprocessableEntity().json(body),
        ErrorKind::Cancelled => HttpResponse::ServiceUnavailable().json(body),
        ErrorKind::Encode | ErrorKind::Internal => HttpResponse::InternalServerError().json(body),
    }
}

fn store_unavailable() -> HttpResponse {
    log::error!("Result store lock is poisoned");
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": "Service temporarily unavailable"
    }))
}

async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "capabilities": {
            "image_formats": ["JPEG", "PNG"],
            "document_formats": ["PDF"],
            "units": ["B", "KB", "MB"]
        }
    })))
}

async fn compress(req: web::Json<CompressRequest>, state: SharedState) -> Result<HttpResponse> {
    let req = req.into_inner();
    let original_name = req.file_name.unwrap_or_else(|| "document".to_string());
    log::info!(
        "Compression request for {} (target {} {})",
        original_name,
        req.target_size,
        req.unit
    );

    let content = match general_purpose::STANDARD.decode(req.content.as_bytes()) {
        Ok(content) => content,
        Err(e) => return Ok(error_response(&CompressionError::from(e))),
    };
    if content.len() > state.max_upload_bytes {
        let error = CompressionError::invalid_input(format!(
            "upload of {} exceeds the {} limit",
            format_file_size(content.len() as u64),
            format_file_size(state.max_upload_bytes as u64)
        ));
        return Ok(error_response(&error));
    }

    // Cancels the search if the client goes away and this future is dropped.
    let token = CancellationToken::new();
    let guard = token.drop_guard();
    let result = state
        .converter
        .compress_async(content, req.target_size, req.unit, token)
        .await;
    guard.disarm();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            log::error!("Compression of {} failed: {}", original_name, e);
            return Ok(error_response(&e));
        }
    };

    let compressed_name = compressed_file_name(&original_name, report.format);
    let file = CompressedFile {
        original_name,
        download_url: String::new(),
        compressed_name: compressed_name.clone(),
        format: report.format,
        original_size: report.original_size,
        target_size: report.target_size,
        size: report.result_size,
        size_label: format_file_size(report.result_size),
        attempts: report.attempt_count,
        within_tolerance: report.within_tolerance,
        compression_ratio: report.compression_ratio(),
        advisories: report.advisories,
    };

    let file_id = match state.store.lock() {
        Ok(mut store) => store.store(compressed_name, report.format, report.result_bytes),
        Err(_) => return Ok(store_unavailable()),
    };

    log::info!(
        "Compressed {} to {} in {} attempts",
        file.original_name,
        file.size_label,
        file.attempts
    );

    Ok(HttpResponse::Ok().json(CompressResponse {
        success: true,
        file: Some(CompressedFile {
            download_url: format!("/download/{}", file_id),
            ..file
        }),
        error: None,
    }))
}

async fn download_file(path: web::Path<String>, state: SharedState) -> Result<HttpResponse> {
    let file_id = path.into_inner();
    log::info!("Download requested for file ID: {}", file_id);

    let store = match state.store.lock() {
        Ok(store) => store,
        Err(_) => return Ok(store_unavailable()),
    };

    match store.get(&file_id) {
        Some(file) => {
            log::info!("Serving {} ({} bytes)", file.name, file.content.len());
            Ok(HttpResponse::Ok()
                .content_type(file.format.mime_type())
                .append_header((
                    "Content-Disposition",
                    format!("attachment; filename=\"{}\"", file.name),
                ))
                .append_header(("Cache-Control", "no-cache"))
                .body(file.content.clone()))
        }
        None => {
            log::warn!("File not found: {}", file_id);
            Ok(HttpResponse::NotFound().json(serde_json::json!({
                "error": "File not found",
                "file_id": file_id
            })))
        }
    }
}

async fn get_stats(state: SharedState) -> Result<HttpResponse> {
    let stats = match state.store.lock() {
        Ok(store) => store.stats(),
        Err(_) => return Ok(store_unavailable()),
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "temp_files_count": stats.file_count,
        "temp_storage_size": stats.total_size,
        "service_status": "running",
        "supported_formats": ["PDF", "JPEG", "PNG"],
        "max_upload_size": format_file_size(state.max_upload_bytes as u64)
    })))
}

async fn cleanup_temp_files(state: SharedState) -> Result<HttpResponse> {
    let removed = match state.store.lock() {
        Ok(mut store) => store.cleanup(),
        Err(_) => return Ok(store_unavailable()),
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!(
            "Cleaned up {} temporary files ({} bytes)",
            removed.file_count, removed.total_size
        ),
        "status": "success"
    })))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // .env has to be loaded before the logger reads RUST_LOG.
    let config = AppConfig::from_env();
    env_logger::init();

    let address = config.server_address();
    log::info!("Starting target size compression service on {}", address);
    log::info!(
        "Upload limit {}, attempt budget {}",
        format_file_size(config.compression.max_upload_bytes as u64),
        config.compression.max_attempts
    );
    log::info!(
        "Keeping at most {} results ({})",
        config.storage.max_files,
        format_file_size(config.storage.max_bytes)
    );

    let state = web::Data::new(AppState {
        converter: DocumentConverter::with_settings(config.compression_settings()),
        store: Mutex::new(config.result_store()),
        max_upload_bytes: config.compression.max_upload_bytes,
    });
    // Base64 inflates the payload by a third.
    let json_limit = config.compression.max_upload_bytes / 3 * 4 + 64 * 1024;

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(json_limit))
            .wrap(Logger::default())
            .wrap(cors)
            .route("/health", web::get().to(health))
            .route("/compress", web::post().to(compress))
            .route("/download/{file_id}", web::get().to(download_file))
            .route("/stats", web::get().to(get_stats))
            .route("/cleanup", web::post().to(cleanup_temp_files))
    })
    .bind(address)?
    .run()
    .await
}
