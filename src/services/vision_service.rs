// src/services/vision_service.rs
use crate::errors::ColoringError;
use crate::models::*;
use crate::services::image_fetcher::mime_type;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use image::GenericImageView;
use log::{debug, info};
use reqwest::Client;
use serde_json::{Value, json};
use std::str::FromStr;

const OPENAI_MODEL: &str = "gpt-4o";
const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";

// Anthropic caps base64 images at 5MB; base64 adds about a third.
const MAX_UPLOAD_BYTES: usize = 3_750_000;

const ANALYSIS_INSTRUCTION: &str = r#"
You are preparing a photograph to be redrawn as a black-and-white coloring page.
Analyze the photo and respond with a single JSON object, no prose, matching:

{
  "photoType": "portrait" | "group" | "pet" | "landscape" | "landmark" | "other",
  "subjects": [
    {
      "description": "short description of the subject",
      "boundingBox": {"x": 0-1, "y": 0-1, "width": 0-1, "height": 0-1},
      "distinctiveFeatures": ["features that make this subject recognizable"]
    }
  ],
  "background": {
    "description": "what is behind the subjects",
    "complexity": 1-10,
    "keyElements": ["important background objects"]
  },
  "preservationPriorities": ["what must survive simplification, most important first"],
  "simplificationTargets": [
    {
      "element": "detail that can be simplified",
      "reason": "why",
      "applicableComplexity": ["toddler", "child", "tween", "adult"]
    }
  ]
}

Bounding boxes are normalized to the image size with the origin at the top-left.
List subjects from most to least important.
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisionProvider {
    OpenAi,
    Anthropic,
}

impl FromStr for VisionProvider {
    type Err = ColoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(VisionProvider::OpenAi),
            "anthropic" => Ok(VisionProvider::Anthropic),
            other => Err(ColoringError::Validation(format!(
                "Invalid vision provider: {}",
                other
            ))),
        }
    }
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image_data: &[u8]) -> Result<RichAnalysis, ColoringError>;
}

pub struct VisionService {
    provider: VisionProvider,
    api_key: String,
    client: Client,
}

impl VisionService {
    pub fn new(provider: VisionProvider, api_key: String, client: Client) -> Self {
        Self {
            provider,
            api_key,
            client,
        }
    }

    async fn request_openai(&self, image_data: &[u8]) -> Result<String, ColoringError> {
        let base64_image = general_purpose::STANDARD.encode(image_data);

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": OPENAI_MODEL,
                "messages": [{
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": ANALYSIS_INSTRUCTION
                        },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:{};base64,{}", mime_type(image_data), base64_image)
                            }
                        }
                    ]
                }],
                "max_tokens": 4096,
                "response_format": { "type": "json_object" }
            }))
            .send()
            .await
            .map_err(|e| ColoringError::analysis_caused("OpenAI request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ColoringError::analysis(format!(
                "OpenAI error ({}): {}",
                status, error_text
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| ColoringError::analysis_caused("Failed to parse OpenAI response", e))?;

        result["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ColoringError::analysis("No content in OpenAI response"))
    }

    async fn request_anthropic(&self, image_data: &[u8]) -> Result<String, ColoringError> {
        let image_data = shrink_for_upload(image_data)?;
        let base64_image = general_purpose::STANDARD.encode(&image_data);

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": ANTHROPIC_MODEL,
                "max_tokens": 4096,
                "messages": [{
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": ANALYSIS_INSTRUCTION
                        },
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": mime_type(&image_data),
                                "data": base64_image
                            }
                        }
                    ]
                }]
            }))
            .send()
            .await
            .map_err(|e| ColoringError::analysis_caused("Anthropic request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ColoringError::analysis(format!(
                "Anthropic error ({}): {}",
                status, error_text
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| ColoringError::analysis_caused("Failed to parse Anthropic response", e))?;

        result["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ColoringError::analysis("No content in Anthropic response"))
    }
}

#[async_trait]
impl VisionAnalyzer for VisionService {
    async fn analyze(&self, image_data: &[u8]) -> Result<RichAnalysis, ColoringError> {
        info!("Requesting photo analysis from {:?}", self.provider);

        let content = match self.provider {
            VisionProvider::OpenAi => self.request_openai(image_data).await?,
            VisionProvider::Anthropic => self.request_anthropic(image_data).await?,
        };
        debug!("Vision model returned {} bytes of analysis", content.len());

        parse_analysis(&content)
    }
}

/// Decode and validate the model's text output.
pub fn parse_analysis(content: &str) -> Result<RichAnalysis, ColoringError> {
    let json_text = strip_code_fence(content);

    let value: Value = serde_json::from_str(json_text)
        .map_err(|e| ColoringError::analysis_caused("Vision model output is not JSON", e))?;

    let analysis: RichAnalysis = serde_json::from_value(value).map_err(|e| {
        ColoringError::analysis_caused("Vision output does not match the analysis schema", e)
    })?;

    validate_analysis(&analysis)?;
    Ok(analysis)
}

/// Range checks serde cannot express. Errors name the offending path.
pub fn validate_analysis(analysis: &RichAnalysis) -> Result<(), ColoringError> {
    if !(1..=10).contains(&analysis.background.complexity) {
        return Err(ColoringError::analysis(format!(
            "background.complexity must be within 1-10, got {}",
            analysis.background.complexity
        )));
    }

    for (i, subject) in analysis.subjects.iter().enumerate() {
        let bbox = &subject.bounding_box;
        for (field, value) in [
            ("x", bbox.x),
            ("y", bbox.y),
            ("width", bbox.width),
            ("height", bbox.height),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ColoringError::analysis(format!(
                    "subjects[{}].boundingBox.{} must be within 0-1, got {}",
                    i, field, value
                )));
            }
        }
    }

    Ok(())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Downscale images that would exceed the upload limit once base64 encoded.
fn shrink_for_upload(data: &[u8]) -> Result<Vec<u8>, ColoringError> {
    if data.len() <= MAX_UPLOAD_BYTES {
        return Ok(data.to_vec());
    }

    let img = image::load_from_memory(data)
        .map_err(|e| ColoringError::analysis_caused("Failed to load input image", e))?;
    let (width, height) = img.dimensions();

    let scale_factor = ((MAX_UPLOAD_BYTES as f64 / data.len() as f64).sqrt() * 0.9) as f32;
    let new_width = ((width as f32 * scale_factor) as u32).max(256);
    let new_height = ((height as f32 * scale_factor) as u32).max(256);
    debug!(
        "Shrinking {}x{} input to {}x{} for upload",
        width, height, new_width, new_height
    );

    // JPEG has no alpha channel.
    let resized = image::DynamicImage::ImageRgb8(
        img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
            .to_rgb8(),
    );

    let mut output = Vec::new();
    resized
        .write_to(
            &mut std::io::Cursor::new(&mut output),
            image::ImageFormat::Jpeg,
        )
        .map_err(|e| ColoringError::analysis_caused("Failed to encode resized image", e))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Stage;

    const VALID: &str = r#"{
        "photoType": "portrait",
        "subjects": [{
            "description": "man with beard",
            "boundingBox": {"x": 0.25, "y": 0.1, "width": 0.5, "height": 0.8},
            "distinctiveFeatures": ["full beard", "round glasses"]
        }],
        "background": {"description": "brick wall", "complexity": 3, "keyElements": ["window"]},
        "preservationPriorities": ["beard"],
        "simplificationTargets": []
    }"#;

    #[test]
    fn parses_plain_and_fenced_output() {
        let plain = parse_analysis(VALID).unwrap();
        assert_eq!(plain.photo_type, PhotoType::Portrait);

        let fenced = parse_analysis(&format!("```json\n{}\n```", VALID)).unwrap();
        assert_eq!(fenced, plain);
    }

    #[test]
    fn non_json_output_is_analysis_error() {
        let err = parse_analysis("I'm sorry, I can't help with that.").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Analysis));
        assert!(err.to_string().contains("not JSON"));
    }

    #[test]
    fn schema_mismatch_is_not_coerced() {
        let err = parse_analysis(r#"{"photoType": "selfie", "subjects": []}"#).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Analysis));
        assert!(err.to_string().contains("schema"));
    }

    #[test]
    fn out_of_range_values_name_their_path() {
        let bad_box = VALID.replace("\"x\": 0.25", "\"x\": 1.5");
        let err = parse_analysis(&bad_box).unwrap_err();
        assert!(err.to_string().contains("subjects[0].boundingBox.x"));

        let bad_complexity = VALID.replace("\"complexity\": 3", "\"complexity\": 11");
        let err = parse_analysis(&bad_complexity).unwrap_err();
        assert!(err.to_string().contains("background.complexity"));
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!(
            "Anthropic".parse::<VisionProvider>().unwrap(),
            VisionProvider::Anthropic
        );
        assert!("gemini".parse::<VisionProvider>().is_err());
    }

    #[test]
    fn small_images_are_uploaded_unchanged() {
        let data = vec![1u8; 1024];
        assert_eq!(shrink_for_upload(&data).unwrap(), data);
    }
}
