// src/services/mod.rs
pub mod analysis_normalizer;
pub mod artifact_store;
pub mod batch_orchestrator;
pub mod generation_service;
pub mod image_fetcher;
pub mod post_processor;
pub mod prompt_composer;
pub mod vision_service;

pub use artifact_store::FsArtifactStore;
pub use batch_orchestrator::{BatchOrchestrator, GenerationSettings};
pub use generation_service::GenerationService;
pub use image_fetcher::HttpImageFetcher;
pub use post_processor::PostProcessor;
pub use vision_service::VisionService;
