// src/services/image_fetcher.rs
use crate::errors::ColoringError;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use log::debug;
use reqwest::Client;

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Bytes, ColoringError>;
}

/// Resolves `data:` URLs in-process and everything else over HTTP.
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes, ColoringError> {
        if locator.starts_with("data:") {
            return decode_data_url(locator).map(Bytes::from);
        }

        debug!("Fetching generated image from {}", locator);
        let response = self.client.get(locator).send().await.map_err(|e| {
            ColoringError::post_processing_caused(format!("Failed to fetch {}", locator), e)
        })?;

        if !response.status().is_success() {
            return Err(ColoringError::post_processing(format!(
                "Fetching {} returned status {}",
                locator,
                response.status()
            )));
        }

        response.bytes().await.map_err(|e| {
            ColoringError::post_processing_caused(format!("Failed to read body of {}", locator), e)
        })
    }
}

/// `data:image/png;base64,...` into raw bytes.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, ColoringError> {
    let (header, payload) = url
        .split_once(',')
        .ok_or_else(|| ColoringError::post_processing("Malformed data URL"))?;
    if !header.ends_with(";base64") {
        return Err(ColoringError::post_processing(
            "Only base64 data URLs are supported",
        ));
    }
    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ColoringError::post_processing_caused("Invalid base64 in data URL", e))
}

/// Inline an image as a data URL, sniffing the MIME type from its bytes.
pub fn encode_data_url(data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type(data),
        general_purpose::STANDARD.encode(data)
    )
}

pub fn mime_type(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Stage;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn data_url_round_trips_through_fetch_helpers() {
        let url = encode_data_url(&PNG_MAGIC);
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), PNG_MAGIC.to_vec());
    }

    #[test]
    fn unknown_bytes_default_to_jpeg_mime() {
        assert_eq!(mime_type(b"????"), "image/jpeg");
    }

    #[test]
    fn non_base64_data_url_is_rejected() {
        let err = decode_data_url("data:text/plain,hello").unwrap_err();
        assert_eq!(err.stage(), Some(Stage::PostProcessing));
        assert!(decode_data_url("data:image/png;base64").is_err());
    }

    #[tokio::test]
    async fn http_fetcher_resolves_data_urls_offline() {
        let fetcher = HttpImageFetcher::new(Client::new());
        let bytes = fetcher.fetch(&encode_data_url(&PNG_MAGIC)).await.unwrap();
        assert_eq!(bytes.as_ref(), &PNG_MAGIC);
    }
}
