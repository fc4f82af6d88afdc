// src/handlers.rs
use crate::config::{parse_list, split_list};
use crate::services::batch_orchestrator::BatchRequest;
use crate::{AppState, errors::ColoringError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures_util::TryStreamExt;
use std::collections::HashMap;

/// Uploaded image plus any plain text fields of the form.
struct UploadForm {
    file_name: String,
    image: Vec<u8>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

async fn read_form(mut payload: Multipart) -> Result<UploadForm, Error> {
    let mut image: Option<(String, Vec<u8>)> = None;
    let mut fields = HashMap::new();

    while let Some(mut field) = payload.try_next().await? {
        let content_disposition = field.content_disposition();
        let name = content_disposition.get_name().unwrap_or_default().to_string();
        let file_name = content_disposition.get_filename().map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            data.extend_from_slice(&chunk);
        }

        match file_name {
            Some(file_name) if name == "image" => image = Some((file_name, data)),
            _ => {
                let value = String::from_utf8(data).map_err(|_| {
                    ColoringError::Validation(format!("Field '{}' is not UTF-8 text", name))
                })?;
                fields.insert(name, value);
            }
        }
    }

    let (file_name, image) = image
        .ok_or_else(|| ColoringError::Validation("No image file provided".to_string()))?;
    image::load_from_memory(&image)
        .map_err(|e| ColoringError::Validation(format!("Invalid image format: {}", e)))?;

    Ok(UploadForm {
        file_name,
        image,
        fields,
    })
}

pub async fn run_batch(payload: Multipart, data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let form = read_form(payload).await?;
    let defaults = &data.batch_defaults;

    let models = form
        .field("models")
        .map(split_list)
        .unwrap_or_else(|| defaults.models.clone());
    let complexities = match form.field("complexities") {
        Some(list) => parse_list(list)?,
        None => defaults.complexities.clone(),
    };
    let variants = match form.field("variants") {
        Some(list) => parse_list(list)?,
        None => defaults.variants.clone(),
    };
    if models.is_empty() || complexities.is_empty() || variants.is_empty() {
        return Err(ColoringError::Validation(
            "models, complexities and variants must each be non-empty".to_string(),
        )
        .into());
    }

    let run = data
        .orchestrator
        .run(BatchRequest {
            input_file_name: form.file_name,
            image: form.image,
            models,
            complexities,
            variants,
        })
        .await?;

    Ok(HttpResponse::Ok().json(&run))
}

pub async fn convert_image(
    payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let form = read_form(payload).await?;

    let model = match form.field("model") {
        Some(model) => model.to_string(),
        None => data
            .batch_defaults
            .models
            .first()
            .cloned()
            .ok_or_else(|| ColoringError::Validation("No model configured".to_string()))?,
    };
    let complexity = match form.field("complexity") {
        Some(level) => level.parse::<ComplexityLevel>()?,
        None => ComplexityLevel::Child,
    };
    let variant = match form.field("variant") {
        Some(variant) => variant.parse::<PromptVariant>()?,
        None => PromptVariant::DirectTransform,
    };

    let output = data
        .orchestrator
        .convert(&form.image, &model, complexity, variant)
        .await?;

    Ok(HttpResponse::Ok()
        .content_type(data.output_format.content_type())
        .body(output.image))
}

pub async fn list_runs(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let runs = data.orchestrator.store().list_runs().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "runs": runs,
        "count": runs.len()
    })))
}

pub async fn get_run(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let run_id = path.into_inner();
    let run = data.orchestrator.store().load_run(&run_id).await?;

    Ok(HttpResponse::Ok().json(&run))
}

pub async fn submit_ratings(
    path: web::Path<String>,
    data: web::Data<AppState>,
    body: web::Json<RatingsUpdate>,
) -> Result<HttpResponse, Error> {
    let run_id = path.into_inner();
    let run = data
        .orchestrator
        .store()
        .update_ratings(&run_id, &body)
        .await?;

    Ok(HttpResponse::Ok().json(&run))
}
