// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

mod config;
mod errors;
mod handlers;
mod models;
mod profiles;
mod services;

use crate::config::{BatchDefaults, Config};
use crate::handlers::{convert_image, get_run, list_runs, run_batch, submit_ratings};
use crate::models::OutputFormat;
use crate::services::{
    BatchOrchestrator, FsArtifactStore, GenerationService, GenerationSettings, HttpImageFetcher,
    PostProcessor, VisionService,
};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<BatchOrchestrator>,
    batch_defaults: Arc<BatchDefaults>,
    output_format: OutputFormat,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting coloring page service...");

    let config = Config::from_env().context("Invalid configuration")?;

    std::fs::create_dir_all(&config.artifact_dir)
        .with_context(|| format!("Cannot create artifact directory {}", config.artifact_dir))?;

    // Initialize services
    let client = reqwest::Client::new();
    let vision = Arc::new(VisionService::new(
        config.vision.provider,
        config.vision.api_key.clone(),
        client.clone(),
    ));
    let generator = Arc::new(GenerationService::new(
        config.generation.api_key.clone(),
        config.generation.base_url.clone(),
        client.clone(),
    ));
    let post_processor = Arc::new(PostProcessor::new(Arc::new(HttpImageFetcher::new(client))));
    let store = Arc::new(FsArtifactStore::new(&config.artifact_dir));

    let orchestrator = Arc::new(BatchOrchestrator::new(
        vision,
        generator,
        post_processor,
        store,
        GenerationSettings {
            image_size: config.generation.image_size.clone(),
            post_process: config.post_process.clone(),
        },
    ));

    let app_state = AppState {
        orchestrator,
        batch_defaults: Arc::new(config.batch.clone()),
        output_format: config.post_process.output_format,
    };

    let artifact_dir = config.artifact_dir.clone();
    let bind = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/batch", web::post().to(run_batch))
                    .route("/convert", web::post().to(convert_image))
                    .route("/runs", web::get().to(list_runs))
                    .route("/runs/{run_id}", web::get().to(get_run))
                    .route("/runs/{run_id}/ratings", web::post().to(submit_ratings)),
            )
            .service(actix_files::Files::new("/artifacts", &artifact_dir))
            .route("/health", web::get().to(health_check))
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "coloring-pages",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
