// src/models.rs
use crate::errors::ColoringError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// Complexity and prompt variants

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Toddler,
    Child,
    Tween,
    Adult,
}

impl ComplexityLevel {
    pub const ALL: [ComplexityLevel; 4] = [
        ComplexityLevel::Toddler,
        ComplexityLevel::Child,
        ComplexityLevel::Tween,
        ComplexityLevel::Adult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Toddler => "toddler",
            ComplexityLevel::Child => "child",
            ComplexityLevel::Tween => "tween",
            ComplexityLevel::Adult => "adult",
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexityLevel {
    type Err = ColoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComplexityLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s.trim())
            .ok_or_else(|| ColoringError::Validation(format!("Unknown complexity level: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptVariant {
    DirectTransform,
    PreservationHeavy,
    SimplificationHeavy,
}

impl PromptVariant {
    pub const ALL: [PromptVariant; 3] = [
        PromptVariant::DirectTransform,
        PromptVariant::PreservationHeavy,
        PromptVariant::SimplificationHeavy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptVariant::DirectTransform => "direct-transform",
            PromptVariant::PreservationHeavy => "preservation-heavy",
            PromptVariant::SimplificationHeavy => "simplification-heavy",
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptVariant {
    type Err = ColoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PromptVariant::ALL
            .into_iter()
            .find(|variant| variant.as_str() == s.trim())
            .ok_or_else(|| ColoringError::Validation(format!("Unknown prompt variant: {}", s)))
    }
}

// Normalized analysis

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementCategory {
    Subject,
    Object,
    Background,
    Accessory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedElement {
    pub label: String,
    /// Rank, 1 = most important.
    pub importance: u32,
    pub category: ElementCategory,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FacePosition {
    Center,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl FacePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacePosition::Center => "center",
            FacePosition::Left => "left",
            FacePosition::Right => "right",
            FacePosition::TopLeft => "top-left",
            FacePosition::TopRight => "top-right",
            FacePosition::BottomLeft => "bottom-left",
            FacePosition::BottomRight => "bottom-right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRegion {
    pub description: String,
    pub position: FacePosition,
    pub distinguishing_features: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundStrategy {
    Remove,
    Simplify,
    PreserveStructure,
    PreserveDetail,
}

/// Canonical input to prompt composition. `elements` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub elements: Vec<DetectedElement>,
    pub face_regions: Vec<FaceRegion>,
    pub scene_description: String,
    pub spatial_layout: String,
    pub background_strategy: BackgroundStrategy,
}

// Vision-model native analysis

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoType {
    Portrait,
    Group,
    Pet,
    Landscape,
    Landmark,
    Other,
}

impl PhotoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoType::Portrait => "portrait",
            PhotoType::Group => "group",
            PhotoType::Pet => "pet",
            PhotoType::Landscape => "landscape",
            PhotoType::Landmark => "landmark",
            PhotoType::Other => "other",
        }
    }
}

/// Normalized rectangle, every field in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub description: String,
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub distinctive_features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Background {
    pub description: String,
    /// 1-10.
    pub complexity: u8,
    #[serde(default)]
    pub key_elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimplificationTarget {
    pub element: String,
    pub reason: String,
    #[serde(default)]
    pub applicable_complexity: Vec<ComplexityLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RichAnalysis {
    pub photo_type: PhotoType,
    pub subjects: Vec<Subject>,
    pub background: Background,
    #[serde(default)]
    pub preservation_priorities: Vec<String>,
    #[serde(default)]
    pub simplification_targets: Vec<SimplificationTarget>,
}

/// What gets written to `analysis.json` for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub rich: RichAnalysis,
    pub normalized: AnalysisResult,
    pub analysis_ms: u64,
}

// Generation

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedPrompt {
    pub prompt: String,
    pub negative_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    /// `None` for edit endpoints, which take negatives inline.
    pub negative_prompt: Option<String>,
    pub image_size: String,
    pub inference: InferenceConfig,
    pub source_image_urls: Vec<String>,
    pub output_format: OutputFormat,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub images: Vec<GeneratedImage>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Generation data recorded per batch iteration; empty when the iteration failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub inference: Option<InferenceConfig>,
    pub image_url: Option<String>,
    pub seed: Option<u64>,
}

// Post-processing

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ColoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            other => Err(ColoringError::Validation(format!(
                "Unsupported output format: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessOptions {
    /// Luminance below this becomes black.
    pub threshold: u8,
    pub denoise: bool,
    pub denoise_kernel: u32,
    pub output_format: OutputFormat,
    pub output_width: Option<u32>,
    pub output_height: Option<u32>,
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            threshold: 128,
            denoise: true,
            denoise_kernel: 3,
            output_format: OutputFormat::Png,
            output_width: None,
            output_height: None,
        }
    }
}

// Batch runs

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationTimings {
    pub generation_ms: u64,
    pub post_process_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub model: String,
    pub complexity: ComplexityLevel,
    pub variant: PromptVariant,
    pub output_file_name: String,
    pub generation: GenerationRecord,
    pub timings: IterationTimings,
    #[serde(default)]
    pub ratings: BTreeMap<String, u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRun {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub input_file_name: String,
    pub total_iterations: usize,
    pub completed_iterations: usize,
    pub failed_iterations: usize,
    pub results: Vec<BatchResult>,
}

/// Ratings submitted by a reviewer: output file name -> criterion -> score.
pub type RatingsUpdate = HashMap<String, BTreeMap<String, u8>>;

impl BatchRun {
    pub fn new(
        id: String,
        timestamp: DateTime<Utc>,
        input_file_name: String,
        total_iterations: usize,
    ) -> Self {
        Self {
            id,
            timestamp,
            input_file_name,
            total_iterations,
            completed_iterations: 0,
            failed_iterations: 0,
            results: Vec::with_capacity(total_iterations),
        }
    }

    /// Append one iteration's outcome and keep the counters in step.
    pub fn record(&mut self, result: BatchResult) {
        if result.error.is_some() {
            self.failed_iterations += 1;
        } else {
            self.completed_iterations += 1;
        }
        self.results.push(result);
    }

    /// Merge reviewer scores into matching results. Unknown file names are
    /// skipped; any score outside 1-5 rejects the whole update.
    pub fn apply_ratings(&mut self, updates: &RatingsUpdate) -> Result<usize, ColoringError> {
        for (file_name, scores) in updates {
            for (criterion, score) in scores {
                if !(1..=5).contains(score) {
                    return Err(ColoringError::Validation(format!(
                        "Rating {} for '{}' on {} is outside 1-5",
                        score, criterion, file_name
                    )));
                }
            }
        }

        let mut updated = 0;
        for result in &mut self.results {
            if let Some(scores) = updates.get(&result.output_file_name) {
                result
                    .ratings
                    .extend(scores.iter().map(|(k, v)| (k.clone(), *v)));
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Carry over ratings already persisted for this run so a rewrite of the
    /// metadata never drops them. Scores present on `self` win.
    pub fn keep_ratings_from(&mut self, stored: &BatchRun) {
        for result in &mut self.results {
            let Some(previous) = stored
                .results
                .iter()
                .find(|r| r.output_file_name == result.output_file_name)
            else {
                continue;
            };
            for (criterion, score) in &previous.ratings {
                result.ratings.entry(criterion.clone()).or_insert(*score);
            }
        }
    }
}

/// Listing entry for `GET /runs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub input_file_name: String,
    pub total_iterations: usize,
    pub completed_iterations: usize,
    pub failed_iterations: usize,
}

impl From<&BatchRun> for RunSummary {
    fn from(run: &BatchRun) -> Self {
        Self {
            id: run.id.clone(),
            timestamp: run.timestamp,
            input_file_name: run.input_file_name.clone(),
            total_iterations: run.total_iterations,
            completed_iterations: run.completed_iterations,
            failed_iterations: run.failed_iterations,
        }
    }
}
