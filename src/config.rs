// src/config.rs
use crate::errors::ColoringError;
use crate::models::{ComplexityLevel, OutputFormat, PostProcessOptions, PromptVariant};
use crate::services::post_processor::MAX_DENOISE_KERNEL;
use crate::services::vision_service::VisionProvider;
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_MODELS: [&str; 3] = [
    "fal-ai/flux/dev",
    "fal-ai/nano-banana/edit",
    "fal-ai/gemini-25-flash-image/edit",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub provider: VisionProvider,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: String,
    pub base_url: String,
    pub image_size: String,
}

/// Default matrix used when a batch request leaves a dimension out.
#[derive(Debug, Clone)]
pub struct BatchDefaults {
    pub models: Vec<String>,
    pub complexities: Vec<ComplexityLevel>,
    pub variants: Vec<PromptVariant>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub vision: VisionConfig,
    pub generation: GenerationConfig,
    pub artifact_dir: String,
    pub batch: BatchDefaults,
    pub post_process: PostProcessOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ColoringError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ColoringError> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = match get("VISION_PROVIDER") {
            Some(name) => VisionProvider::from_str(&name)?,
            None => VisionProvider::OpenAi,
        };
        let key_name = match provider {
            VisionProvider::OpenAi => "OPENAI_API_KEY",
            VisionProvider::Anthropic => "ANTHROPIC_API_KEY",
        };
        let vision_key = get(key_name).ok_or_else(|| {
            ColoringError::Validation(format!("{} must be set for {:?}", key_name, provider))
        })?;
        let generation_key = get("FAL_KEY")
            .ok_or_else(|| ColoringError::Validation("FAL_KEY must be set".to_string()))?;

        let defaults = PostProcessOptions::default();
        let denoise_kernel = parse_or(get("DENOISE_KERNEL"), defaults.denoise_kernel)?;
        if denoise_kernel % 2 == 0 || denoise_kernel > MAX_DENOISE_KERNEL {
            return Err(ColoringError::Validation(format!(
                "DENOISE_KERNEL must be odd and at most {}, got {}",
                MAX_DENOISE_KERNEL, denoise_kernel
            )));
        }
        let post_process = PostProcessOptions {
            threshold: parse_or(get("BINARIZE_THRESHOLD"), defaults.threshold)?,
            denoise: parse_or(get("DENOISE"), defaults.denoise)?,
            denoise_kernel,
            output_format: parse_or::<OutputFormat>(get("OUTPUT_FORMAT"), defaults.output_format)?,
            output_width: get("OUTPUT_WIDTH").map(|v| parse(&v)).transpose()?,
            output_height: get("OUTPUT_HEIGHT").map(|v| parse(&v)).transpose()?,
        };

        Ok(Self {
            server: ServerConfig {
                host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(get("SERVER_PORT"), 8080)?,
            },
            vision: VisionConfig {
                provider,
                api_key: vision_key,
            },
            generation: GenerationConfig {
                api_key: generation_key,
                base_url: get("GENERATION_BASE_URL")
                    .unwrap_or_else(|| "https://fal.run".to_string()),
                image_size: get("IMAGE_SIZE").unwrap_or_else(|| "square_hd".to_string()),
            },
            artifact_dir: get("ARTIFACT_DIR").unwrap_or_else(|| "batch-runs".to_string()),
            batch: BatchDefaults {
                models: match get("BATCH_MODELS") {
                    Some(list) => split_list(&list),
                    None => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
                },
                complexities: match get("BATCH_COMPLEXITIES") {
                    Some(list) => parse_list(&list)?,
                    None => ComplexityLevel::ALL.to_vec(),
                },
                variants: match get("BATCH_VARIANTS") {
                    Some(list) => parse_list(&list)?,
                    None => PromptVariant::ALL.to_vec(),
                },
            },
            post_process,
        })
    }
}

/// Comma-separated list with blanks dropped.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_list<T>(value: &str) -> Result<Vec<T>, ColoringError>
where
    T: FromStr<Err = ColoringError>,
{
    split_list(value).iter().map(|s| s.parse()).collect()
}

fn parse<T>(value: &str) -> Result<T, ColoringError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ColoringError::Validation(format!("Invalid value '{}': {}", value, e)))
}

fn parse_or<T>(value: Option<String>, default: T) -> Result<T, ColoringError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map(|v| parse(&v)).transpose().map(|v| v.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_cover_full_matrix() {
        let config =
            Config::from_vars(&vars(&[("OPENAI_API_KEY", "sk"), ("FAL_KEY", "fal")])).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.vision.provider, VisionProvider::OpenAi);
        assert_eq!(config.batch.models.len(), 3);
        assert_eq!(config.batch.complexities, ComplexityLevel::ALL.to_vec());
        assert_eq!(config.batch.variants, PromptVariant::ALL.to_vec());
        assert_eq!(config.post_process, PostProcessOptions::default());
        assert_eq!(config.artifact_dir, "batch-runs");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_vars(&vars(&[
            ("VISION_PROVIDER", "anthropic"),
            ("ANTHROPIC_API_KEY", "ak"),
            ("FAL_KEY", "fal"),
            ("BATCH_MODELS", "a/b, c/d/edit,"),
            ("BATCH_COMPLEXITIES", "toddler,adult"),
            ("BATCH_VARIANTS", "simplification-heavy"),
            ("BINARIZE_THRESHOLD", "100"),
            ("DENOISE", "false"),
            ("OUTPUT_FORMAT", "jpeg"),
            ("OUTPUT_WIDTH", "800"),
        ]))
        .unwrap();

        assert_eq!(config.vision.api_key, "ak");
        assert_eq!(config.batch.models, vec!["a/b", "c/d/edit"]);
        assert_eq!(
            config.batch.complexities,
            vec![ComplexityLevel::Toddler, ComplexityLevel::Adult]
        );
        assert_eq!(config.batch.variants, vec![PromptVariant::SimplificationHeavy]);
        assert_eq!(config.post_process.threshold, 100);
        assert!(!config.post_process.denoise);
        assert_eq!(config.post_process.output_format, OutputFormat::Jpeg);
        assert_eq!(config.post_process.output_width, Some(800));
        assert_eq!(config.post_process.output_height, None);
    }

    #[test]
    fn missing_credentials_are_reported() {
        assert!(Config::from_vars(&vars(&[("FAL_KEY", "fal")])).is_err());
        assert!(Config::from_vars(&vars(&[("OPENAI_API_KEY", "sk")])).is_err());
        assert!(Config::from_vars(&vars(&[
            ("VISION_PROVIDER", "anthropic"),
            ("OPENAI_API_KEY", "sk"),
            ("FAL_KEY", "fal"),
        ]))
        .is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let base = [("OPENAI_API_KEY", "sk"), ("FAL_KEY", "fal")];
        let mut bad_threshold = vars(&base);
        bad_threshold.insert("BINARIZE_THRESHOLD".into(), "300".into());
        assert!(Config::from_vars(&bad_threshold).is_err());

        for kernel in ["4", "17", "4294967295"] {
            let mut bad_kernel = vars(&base);
            bad_kernel.insert("DENOISE_KERNEL".into(), kernel.into());
            assert!(Config::from_vars(&bad_kernel).is_err(), "kernel {}", kernel);
        }

        let mut odd_kernel = vars(&base);
        odd_kernel.insert("DENOISE_KERNEL".into(), "5".into());
        assert_eq!(Config::from_vars(&odd_kernel).unwrap().post_process.denoise_kernel, 5);

        let mut bad_level = vars(&base);
        bad_level.insert("BATCH_COMPLEXITIES".into(), "baby".into());
        assert!(Config::from_vars(&bad_level).is_err());
    }
}
