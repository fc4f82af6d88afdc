// src/services/batch_orchestrator.rs
use crate::errors::ColoringError;
use crate::models::*;
use crate::services::analysis_normalizer::AnalysisNormalizer;
use crate::services::artifact_store::{ArtifactStore, new_run_id, sanitize_file_name};
use crate::services::generation_service::{ImageGenerator, is_edit_model};
use crate::services::image_fetcher::encode_data_url;
use crate::services::post_processor::{ImageSource, PostProcessor};
use crate::services::prompt_composer::PromptComposer;
use crate::services::vision_service::VisionAnalyzer;
use chrono::Utc;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// `{complexity}--{variant}--{model slug}.png`, the join key between run
/// metadata and stored outputs.
pub fn build_output_file_name(complexity: &str, variant: &str, model: &str) -> String {
    format!("{}--{}--{}.png", complexity, variant, model_slug(model))
}

/// Drops the `/edit` suffix and registry namespace, then maps anything
/// outside `[a-z0-9-]` to `-`.
pub fn model_slug(model: &str) -> String {
    let model = model.strip_suffix("/edit").unwrap_or(model);
    let model = model.split_once('/').map(|(_, rest)| rest).unwrap_or(model);
    model
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Order-preserving dedup.
fn distinct<T: PartialEq + Clone>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Distinct models must not share an output file name.
fn check_slug_collisions(models: &[String]) -> Result<(), ColoringError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for model in models {
        if let Some(other) = seen.insert(model_slug(model), model.as_str()) {
            return Err(ColoringError::Validation(format!(
                "Models '{}' and '{}' both produce output slug '{}'",
                other,
                model,
                model_slug(model)
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Init,
    Analyzing,
    Generating,
    Done,
    Error,
}

struct StateTracker<'a> {
    run_id: &'a str,
    state: BatchState,
}

impl<'a> StateTracker<'a> {
    fn new(run_id: &'a str) -> Self {
        Self {
            run_id,
            state: BatchState::Init,
        }
    }

    fn advance(&mut self, next: BatchState) {
        info!("Batch {}: {:?} -> {:?}", self.run_id, self.state, next);
        self.state = next;
    }
}

/// One photo against the full model x complexity x variant matrix.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input_file_name: String,
    pub image: Vec<u8>,
    pub models: Vec<String>,
    pub complexities: Vec<ComplexityLevel>,
    pub variants: Vec<PromptVariant>,
}

/// Result of the single, non-batch conversion path.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub analysis: AnalysisResult,
    pub generation: GenerationRecord,
    pub timings: IterationTimings,
    pub image: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub image_size: String,
    pub post_process: PostProcessOptions,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            image_size: "square_hd".to_string(),
            post_process: PostProcessOptions::default(),
        }
    }
}

pub struct BatchOrchestrator {
    vision: Arc<dyn VisionAnalyzer>,
    generator: Arc<dyn ImageGenerator>,
    post_processor: Arc<PostProcessor>,
    store: Arc<dyn ArtifactStore>,
    normalizer: AnalysisNormalizer,
    composer: PromptComposer,
    settings: GenerationSettings,
}

impl BatchOrchestrator {
    pub fn new(
        vision: Arc<dyn VisionAnalyzer>,
        generator: Arc<dyn ImageGenerator>,
        post_processor: Arc<PostProcessor>,
        store: Arc<dyn ArtifactStore>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            vision,
            generator,
            post_processor,
            store,
            normalizer: AnalysisNormalizer::new(),
            composer: PromptComposer::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Run the whole matrix sequentially. Only a failure before generation
    /// starts (request validation, input storage or analysis) aborts the run;
    /// every iteration failure is recorded in its `BatchResult` instead.
    pub async fn run(&self, request: BatchRequest) -> Result<BatchRun, ColoringError> {
        let models = distinct(&request.models);
        let complexities = distinct(&request.complexities);
        let variants = distinct(&request.variants);
        let request = BatchRequest {
            models,
            complexities,
            variants,
            ..request
        };
        check_slug_collisions(&request.models)?;

        let timestamp = Utc::now();
        let run_id = new_run_id(timestamp);
        let input_file_name = sanitize_file_name(&request.input_file_name);
        let total =
            request.models.len() * request.complexities.len() * request.variants.len();
        let mut state = StateTracker::new(&run_id);

        info!(
            "Starting batch {} for {} ({} models x {} complexities x {} variants)",
            run_id,
            input_file_name,
            request.models.len(),
            request.complexities.len(),
            request.variants.len()
        );

        if let Err(e) = self
            .store
            .save_input(&run_id, &input_file_name, &request.image)
            .await
        {
            state.advance(BatchState::Error);
            return Err(e);
        }

        state.advance(BatchState::Analyzing);
        let analysis_start = Instant::now();
        let (rich, analysis) = match self.analyze(&request.image).await {
            Ok(pair) => pair,
            Err(e) => {
                state.advance(BatchState::Error);
                return Err(e);
            }
        };
        let record = AnalysisRecord {
            rich,
            normalized: analysis,
            analysis_ms: analysis_start.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.store.save_analysis(&run_id, &record).await {
            state.advance(BatchState::Error);
            return Err(e);
        }
        let analysis = record.normalized;

        state.advance(BatchState::Generating);
        let source_url = encode_data_url(&request.image);
        let mut run = BatchRun::new(run_id.clone(), timestamp, input_file_name, total);

        for model in &request.models {
            for &complexity in &request.complexities {
                for &variant in &request.variants {
                    let result = self
                        .run_iteration(&run.id, model, complexity, variant, &analysis, &source_url)
                        .await;
                    run.record(result);

                    if let Err(e) = self.store.save_run(&run).await {
                        warn!("Could not checkpoint batch {}: {}", run.id, e);
                    }
                }
            }
        }

        state.advance(BatchState::Done);
        info!(
            "Batch {} finished: {} completed, {} failed of {}",
            run.id, run.completed_iterations, run.failed_iterations, run.total_iterations
        );

        self.store.save_run(&run).await?;
        Ok(run)
    }

    /// Non-batch path: the first stage error propagates with its tag.
    pub async fn convert(
        &self,
        image: &[u8],
        model: &str,
        complexity: ComplexityLevel,
        variant: PromptVariant,
    ) -> Result<ConversionOutput, ColoringError> {
        let (_, analysis) = self.analyze(image).await?;
        let source_url = encode_data_url(image);
        let (generation, timings, image) = self
            .generate_and_process(
                model,
                complexity,
                variant,
                &analysis,
                &source_url,
                &self.settings.post_process,
            )
            .await?;

        Ok(ConversionOutput {
            analysis,
            generation,
            timings,
            image,
        })
    }

    async fn analyze(
        &self,
        image: &[u8],
    ) -> Result<(RichAnalysis, AnalysisResult), ColoringError> {
        let rich = self.vision.analyze(image).await?;
        let analysis = self.normalizer.normalize(&rich);
        info!(
            "Analysis: {} elements, {} faces, background {:?}",
            analysis.elements.len(),
            analysis.face_regions.len(),
            analysis.background_strategy
        );
        Ok((rich, analysis))
    }

    async fn run_iteration(
        &self,
        run_id: &str,
        model: &str,
        complexity: ComplexityLevel,
        variant: PromptVariant,
        analysis: &AnalysisResult,
        source_url: &str,
    ) -> BatchResult {
        let output_file_name =
            build_output_file_name(complexity.as_str(), variant.as_str(), model);
        let start = Instant::now();

        // Batch outputs are always PNG to match the file name.
        let options = PostProcessOptions {
            output_format: OutputFormat::Png,
            ..self.settings.post_process.clone()
        };

        let outcome = match self
            .generate_and_process(model, complexity, variant, analysis, source_url, &options)
            .await
        {
            Ok((generation, timings, image)) => self
                .store
                .save_output(run_id, &output_file_name, &image)
                .await
                .map(|_| (generation, timings)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((generation, timings)) => {
                info!("✓ {} ({} ms)", output_file_name, timings.total_ms);
                BatchResult {
                    model: model.to_string(),
                    complexity,
                    variant,
                    output_file_name,
                    generation,
                    timings,
                    ratings: Default::default(),
                    error: None,
                }
            }
            Err(e) => {
                warn!("✗ {}: {}", output_file_name, e.describe());
                BatchResult {
                    model: model.to_string(),
                    complexity,
                    variant,
                    output_file_name,
                    generation: GenerationRecord::default(),
                    timings: IterationTimings {
                        total_ms: start.elapsed().as_millis() as u64,
                        ..IterationTimings::default()
                    },
                    ratings: Default::default(),
                    error: Some(e.describe()),
                }
            }
        }
    }

    async fn generate_and_process(
        &self,
        model: &str,
        complexity: ComplexityLevel,
        variant: PromptVariant,
        analysis: &AnalysisResult,
        source_url: &str,
        options: &PostProcessOptions,
    ) -> Result<(GenerationRecord, IterationTimings, Vec<u8>), ColoringError> {
        let start = Instant::now();
        let inference = self.composer.inference_config(complexity);
        let edit = is_edit_model(model);

        let (prompt, negative_prompt) = if edit {
            let prompt = self
                .composer
                .compose_for_edit(variant, complexity, Some(analysis));
            (prompt, None)
        } else {
            let composed = self.composer.compose(variant, complexity, Some(analysis));
            (composed.prompt, Some(composed.negative_prompt))
        };

        let request = GenerationRequest {
            model: model.to_string(),
            prompt,
            negative_prompt,
            image_size: self.settings.image_size.clone(),
            inference,
            source_image_urls: if edit {
                vec![source_url.to_string()]
            } else {
                Vec::new()
            },
            output_format: options.output_format,
            seed: None,
        };

        let result = self.generator.generate(&request).await?;
        let generation_ms = start.elapsed().as_millis() as u64;
        let image_ref = result
            .images
            .first()
            .ok_or_else(|| ColoringError::generation("No images returned"))?;

        let post_start = Instant::now();
        let image = self
            .post_processor
            .process(ImageSource::Locator(image_ref.url.clone()), options)
            .await?;
        let post_process_ms = post_start.elapsed().as_millis() as u64;

        let generation = GenerationRecord {
            prompt: request.prompt,
            negative_prompt: request.negative_prompt,
            model: request.model,
            inference: Some(inference),
            image_url: Some(image_ref.url.clone()),
            seed: result.seed,
        };
        let timings = IterationTimings {
            generation_ms,
            post_process_ms,
            total_ms: start.elapsed().as_millis() as u64,
        };

        Ok((generation, timings, image))
    }
}
