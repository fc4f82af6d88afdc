// src/errors.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Analysis,
    Generation,
    PostProcessing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Analysis => write!(f, "analysis"),
            Stage::Generation => write!(f, "generation"),
            Stage::PostProcessing => write!(f, "post-processing"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ColoringError {
    #[error("analysis error: {message}")]
    Analysis {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("generation error: {message}")]
    Generation {
        message: String,
        status: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("post-processing error: {message}")]
    PostProcessing {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl ColoringError {
    pub fn analysis(message: impl Into<String>) -> Self {
        ColoringError::Analysis {
            message: message.into(),
            source: None,
        }
    }

    pub fn analysis_caused<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ColoringError::Analysis {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        ColoringError::Generation {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    pub fn generation_status(message: impl Into<String>, status: u16) -> Self {
        ColoringError::Generation {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    pub fn generation_caused<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ColoringError::Generation {
            message: message.into(),
            status: None,
            source: Some(Box::new(source)),
        }
    }

    pub fn post_processing(message: impl Into<String>) -> Self {
        ColoringError::PostProcessing {
            message: message.into(),
            source: None,
        }
    }

    pub fn post_processing_caused<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ColoringError::PostProcessing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Stage tag for pipeline errors, `None` for the outer-surface variants.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ColoringError::Analysis { .. } => Some(Stage::Analysis),
            ColoringError::Generation { .. } => Some(Stage::Generation),
            ColoringError::PostProcessing { .. } => Some(Stage::PostProcessing),
            _ => None,
        }
    }

    /// Message with the underlying cause appended, as stored in `BatchResult.error`.
    pub fn describe(&self) -> String {
        match std::error::Error::source(self) {
            Some(cause) => format!("{}: {}", self, cause),
            None => self.to_string(),
        }
    }
}

impl ResponseError for ColoringError {
    fn status_code(&self) -> StatusCode {
        match self {
            ColoringError::Analysis { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ColoringError::Generation { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ColoringError::PostProcessing { .. } => StatusCode::BAD_GATEWAY,
            ColoringError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ColoringError::NotFound(_) => StatusCode::NOT_FOUND,
            ColoringError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            ColoringError::Analysis { .. } => "Photo analysis failed",
            ColoringError::Generation { .. } => "Image generation service error",
            ColoringError::PostProcessing { .. } => "Post-processing failed",
            ColoringError::Storage(_) => "Storage error",
            ColoringError::NotFound(_) => "Not found",
            ColoringError::Validation(_) => "Validation error",
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": error,
            "stage": self.stage(),
            "message": self.describe()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_carry_their_stage() {
        assert_eq!(
            ColoringError::analysis("bad json").stage(),
            Some(Stage::Analysis)
        );
        assert_eq!(
            ColoringError::generation_status("down", 503).stage(),
            Some(Stage::Generation)
        );
        assert_eq!(
            ColoringError::post_processing("decode").stage(),
            Some(Stage::PostProcessing)
        );
        assert_eq!(ColoringError::Storage("disk".into()).stage(), None);
    }

    #[test]
    fn describe_appends_cause() {
        let cause = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = ColoringError::analysis_caused("malformed analysis JSON", cause);

        let text = err.describe();
        assert!(text.starts_with("analysis error: malformed analysis JSON: "));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn stage_displays_kebab_case() {
        assert_eq!(Stage::PostProcessing.to_string(), "post-processing");
        assert_eq!(
            serde_json::to_value(Stage::PostProcessing).unwrap(),
            serde_json::json!("post-processing")
        );
    }

    #[test]
    fn http_status_distinguishes_stages() {
        assert_eq!(
            ColoringError::analysis("x").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ColoringError::generation("x").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ColoringError::NotFound("run".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
