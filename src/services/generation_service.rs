// src/services/generation_service.rs
use crate::errors::ColoringError;
use crate::models::*;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::{Value, json};

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationResult, ColoringError>;
}

/// Edit endpoints take source images and fold negatives into the prompt.
pub fn is_edit_model(model: &str) -> bool {
    model.ends_with("/edit")
}

/// Client for a hosted model registry that exposes each model at
/// `{base_url}/{model}`.
pub struct GenerationService {
    api_key: String,
    base_url: String,
    client: Client,
}

impl GenerationService {
    pub fn new(api_key: String, base_url: String, client: Client) -> Self {
        Self {
            api_key,
            base_url,
            client,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), model)
    }
}

/// Request body for either call shape.
pub fn request_body(request: &GenerationRequest) -> Value {
    if is_edit_model(&request.model) {
        return json!({
            "model": request.model,
            "prompt": request.prompt,
            "image_urls": request.source_image_urls,
            "output_format": request.output_format.as_str(),
        });
    }

    let mut body = json!({
        "prompt": request.prompt,
        "negative_prompt": request.negative_prompt.clone().unwrap_or_default(),
        "image_size": request.image_size,
        "num_inference_steps": request.inference.num_inference_steps,
        "guidance_scale": request.inference.guidance_scale,
    });
    if let Some(seed) = request.seed {
        body["seed"] = json!(seed);
    }
    body
}

/// Decode a response body; no images is an error.
pub fn parse_generation(value: Value) -> Result<GenerationResult, ColoringError> {
    let result: GenerationResult = serde_json::from_value(value).map_err(|e| {
        ColoringError::generation_caused("Generation response does not match schema", e)
    })?;
    if result.images.is_empty() {
        return Err(ColoringError::generation("No images returned"));
    }
    Ok(result)
}

#[async_trait]
impl ImageGenerator for GenerationService {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ColoringError> {
        let url = self.endpoint(&request.model);
        info!("Generating with {}", request.model);
        debug!("POST {} (prompt {} chars)", url, request.prompt.len());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| ColoringError::generation_caused("Image generation request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ColoringError::generation_status(
                format!("{} returned {}: {}", request.model, status, error_text),
                status.as_u16(),
            ));
        }

        let value: Value = response.json().await.map_err(|e| {
            ColoringError::generation_caused("Failed to parse generation response", e)
        })?;

        parse_generation(value)
    }
}
