// src/services/prompt_composer.rs
use crate::models::*;
use crate::profiles::{self, ComplexityProfile};

/// Machine-readable negative prompt shared by every variant.
pub const NEGATIVE_PROMPT: &str = "color, shading, gradient, gray, grey, shadow, photograph, \
photorealistic, 3d render, watermark, text, signature, blurry, low quality, filled areas, \
solid black regions, halftone, crosshatch, noise, grain";

/// Builds generation prompts. Pure and deterministic; never fails.
pub struct PromptComposer;

/// The five clauses every variant fills, in output order.
struct Clauses {
    task: String,
    preservation: String,
    style: String,
    negatives: String,
    complexity: String,
}

impl Clauses {
    fn join(self) -> String {
        [
            self.task,
            self.preservation,
            self.style,
            self.negatives,
            self.complexity,
        ]
        .into_iter()
        .map(|clause| clause.trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        variant: PromptVariant,
        level: ComplexityLevel,
        analysis: Option<&AnalysisResult>,
    ) -> ComposedPrompt {
        let profile = profiles::profile(level);
        let clauses = match variant {
            PromptVariant::DirectTransform => direct_transform(profile, analysis),
            PromptVariant::PreservationHeavy => preservation_heavy(profile, analysis),
            PromptVariant::SimplificationHeavy => simplification_heavy(profile, analysis),
        };

        ComposedPrompt {
            prompt: clauses.join(),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
        }
    }

    /// Single prompt for edit endpoints that have no negative-prompt channel.
    pub fn compose_for_edit(
        &self,
        variant: PromptVariant,
        level: ComplexityLevel,
        analysis: Option<&AnalysisResult>,
    ) -> String {
        let composed = self.compose(variant, level, analysis);
        format!(
            "{} MUST NOT include: {}.",
            composed.prompt, composed.negative_prompt
        )
    }

    pub fn inference_config(&self, level: ComplexityLevel) -> InferenceConfig {
        profiles::inference_config(level)
    }
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new()
    }
}

fn direct_transform(profile: &ComplexityProfile, analysis: Option<&AnalysisResult>) -> Clauses {
    let task = format!(
        "Transform {} into a black-and-white coloring page for {}.",
        photo_phrase(analysis),
        profile.age_description
    );

    let preservation = match analysis {
        Some(a) if !a.face_regions.is_empty() => format!(
            "Keep every person recognizable by preserving their facial features: {}.",
            face_list(a)
        ),
        Some(a) => format!(
            "Keep the main subjects recognizable: {}.",
            subject_list(a)
        ),
        None => "Keep the main subjects and any faces recognizable.".to_string(),
    };

    let background = analysis
        .map(|a| background_instruction(a.background_strategy))
        .unwrap_or("Keep the background simple with only its main outlines.");
    let style = format!(
        "Draw with {} in pure black on a plain white background. {}",
        profile.line_weight, background
    );

    Clauses {
        task,
        preservation,
        style,
        negatives: "Use no color, no shading, no gradients and no solid filled areas.".to_string(),
        complexity: complexity_target(profile),
    }
}

fn preservation_heavy(profile: &ComplexityProfile, analysis: Option<&AnalysisResult>) -> Clauses {
    let task = format!(
        "Create a black-and-white coloring page for {} from {}. The most important goal is that every person stays instantly recognizable as themselves.",
        profile.age_description,
        photo_phrase(analysis)
    );

    let who = match analysis {
        Some(a) if !a.face_regions.is_empty() => face_list(a),
        Some(a) => subject_list(a),
        None => "every face in the photo".to_string(),
    };
    let features = analysis
        .map(feature_list)
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| {
            "hairstyle, eye shape, facial hair, glasses and any distinguishing marks".to_string()
        });
    let preservation = format!(
        "1. Each face must remain recognizable to someone who knows them: {}. \
2. Preserve these features exactly: {}. \
3. Facial structure is top priority: keep the jaw line, nose shape, eye shape and spacing, eyebrows and lips faithful to the photo. \
4. Reproduce accessories such as glasses, jewelry, hats and clothing details faithfully.",
        who, features
    );

    let background = analysis
        .map(|a| background_instruction(a.background_strategy))
        .unwrap_or("Reduce the background to light outlines so attention stays on the people.");
    let style = format!(
        "Use {} for bodies, clothing and outer contours, and thinner, more delicate lines for facial features so expressions stay precise. {}",
        profile.line_weight, background
    );

    Clauses {
        task,
        preservation,
        style,
        negatives: "Do not add color, shading, gradients or filled black areas, even on hair or eyes."
            .to_string(),
        complexity: format!(
            "{} Exception: faces always keep full detail regardless of this complexity level.",
            complexity_target(profile)
        ),
    }
}

fn simplification_heavy(profile: &ComplexityProfile, analysis: Option<&AnalysisResult>) -> Clauses {
    let task = format!(
        "Turn {} into a clean black-and-white coloring page for {}, built from clean, unbroken outlines that enclose well-bounded regions ready to color.",
        photo_phrase(analysis),
        profile.age_description
    );

    let who = match analysis {
        Some(a) if !a.face_regions.is_empty() => face_list(a),
        Some(a) => subject_list(a),
        None => "the main subjects".to_string(),
    };
    let preservation = format!(
        "Keep {} recognizable, but render them with clean simplified strokes.",
        who
    );

    let background = analysis
        .map(|a| background_instruction(a.background_strategy))
        .unwrap_or("Simplify the background to a few large shapes or leave it white.");
    let style = format!(
        "Draw with {}. Every outline must be a single clean stroke with no gaps so each region is fully closed. Merge small details into larger regions instead of drawing many tiny shapes. {}",
        profile.line_weight, background
    );

    Clauses {
        task,
        preservation,
        style,
        negatives: "No color, no shading, no gradients, no sketchy double lines and no stray marks."
            .to_string(),
        complexity: format!(
            "{} When in doubt, prefer fewer well-defined regions over many ambiguous ones.",
            complexity_target(profile)
        ),
    }
}

fn complexity_target(profile: &ComplexityProfile) -> String {
    format!(
        "Aim for {}. {} {}",
        profile.detail_level, profile.region_size_guidance, profile.extra_instructions
    )
}

fn background_instruction(strategy: BackgroundStrategy) -> &'static str {
    match strategy {
        BackgroundStrategy::Remove => {
            "Remove the background entirely and leave it pure white with no elements."
        }
        BackgroundStrategy::Simplify => "Simplify the background to minimal structural lines only.",
        BackgroundStrategy::PreserveStructure => {
            "Keep background objects as recognizable outlined shapes."
        }
        BackgroundStrategy::PreserveDetail => {
            "Preserve the background with full structural line detail."
        }
    }
}

fn photo_phrase(analysis: Option<&AnalysisResult>) -> String {
    match analysis {
        Some(a) if !a.scene_description.trim().is_empty() => format!(
            "this {} photo ({})",
            a.spatial_layout, a.scene_description
        ),
        _ => "this photo".to_string(),
    }
}

/// Subject elements in importance order; ties keep encounter order.
fn subject_list(analysis: &AnalysisResult) -> String {
    let mut subjects: Vec<&DetectedElement> = analysis
        .elements
        .iter()
        .filter(|e| e.category == ElementCategory::Subject)
        .collect();
    if subjects.is_empty() {
        subjects = analysis.elements.iter().collect();
    }
    subjects.sort_by_key(|e| e.importance);
    subjects
        .iter()
        .map(|e| e.description.trim())
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn face_list(analysis: &AnalysisResult) -> String {
    analysis
        .face_regions
        .iter()
        .map(|face| {
            if face.distinguishing_features.is_empty() {
                format!("{} ({})", face.description, face.position.as_str())
            } else {
                format!(
                    "{} ({}; {})",
                    face.description,
                    face.position.as_str(),
                    face.distinguishing_features.join(", ")
                )
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn feature_list(analysis: &AnalysisResult) -> String {
    let mut features: Vec<&str> = Vec::new();
    for feature in analysis
        .face_regions
        .iter()
        .flat_map(|f| f.distinguishing_features.iter())
    {
        if !features.contains(&feature.as_str()) {
            features.push(feature);
        }
    }
    features.join(", ")
}
