// src/services/post_processor.rs
use crate::errors::ColoringError;
use crate::models::{OutputFormat, PostProcessOptions};
use crate::services::image_fetcher::ImageFetcher;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{ColorType, GenericImageView, GrayImage, ImageEncoder, Luma};
use log::debug;
use std::sync::Arc;

const BLACK: Luma<u8> = Luma([0]);
const WHITE: Luma<u8> = Luma([255]);
const JPEG_QUALITY: u8 = 90;

/// Largest median window; cost grows with the square of the kernel.
pub const MAX_DENOISE_KERNEL: u32 = 15;

/// Where a generated image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Locator(String),
}

/// Turns a generated image into binarized, print-ready line art.
pub struct PostProcessor {
    fetcher: Arc<dyn ImageFetcher>,
}

impl PostProcessor {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn process(
        &self,
        source: ImageSource,
        options: &PostProcessOptions,
    ) -> Result<Vec<u8>, ColoringError> {
        let data = match source {
            ImageSource::Bytes(data) => data,
            ImageSource::Locator(locator) => self.fetcher.fetch(&locator).await?.to_vec(),
        };

        let options = options.clone();
        tokio::task::spawn_blocking(move || process_bytes(&data, &options))
            .await
            .map_err(|e| ColoringError::post_processing_caused("Post-processing task failed", e))?
    }
}

/// Decode, render and encode in one go.
pub fn process_bytes(data: &[u8], options: &PostProcessOptions) -> Result<Vec<u8>, ColoringError> {
    let line_art = render_line_art(data, options)?;
    encode(&line_art, options.output_format)
}

/// Grayscale, denoise, binarize and resize. The returned buffer holds only
/// pure black and pure white pixels.
pub fn render_line_art(
    data: &[u8],
    options: &PostProcessOptions,
) -> Result<GrayImage, ColoringError> {
    let img = image::load_from_memory(data)
        .map_err(|e| ColoringError::post_processing_caused("Failed to decode image", e))?;
    let (width, height) = img.dimensions();
    debug!("Post-processing {}x{} image with {:?}", width, height, options);

    let mut gray = img.to_luma8();

    // Denoise must run before thresholding or it smears hard edges.
    if options.denoise {
        gray = median_filter(&gray, options.denoise_kernel);
    }

    let binary = binarize(&gray, options.threshold);

    let (new_width, new_height) =
        fit_within(width, height, options.output_width, options.output_height);
    if (new_width, new_height) == (width, height) {
        return Ok(binary);
    }

    // Nearest-neighbour keeps the raster two-valued.
    Ok(imageops::resize(
        &binary,
        new_width,
        new_height,
        FilterType::Nearest,
    ))
}

/// Median filter with an odd square kernel; borders replicate edge pixels.
/// Even kernels round up, kernels of 0 or 1 return a copy and anything above
/// `MAX_DENOISE_KERNEL` is clamped to it.
pub fn median_filter(img: &GrayImage, kernel: u32) -> GrayImage {
    if kernel <= 1 {
        return img.clone();
    }
    let kernel = kernel.min(MAX_DENOISE_KERNEL);
    let kernel = if kernel % 2 == 0 { kernel + 1 } else { kernel };
    let radius = (kernel / 2) as i64;
    let (width, height) = img.dimensions();
    let (max_x, max_y) = (width as i64 - 1, height as i64 - 1);

    let mut window: Vec<u8> = Vec::with_capacity((kernel * kernel) as usize);
    GrayImage::from_fn(width, height, |x, y| {
        window.clear();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let sx = (x as i64 + dx).clamp(0, max_x) as u32;
                let sy = (y as i64 + dy).clamp(0, max_y) as u32;
                window.push(img.get_pixel(sx, sy)[0]);
            }
        }
        let mid = window.len() / 2;
        let (_, median, _) = window.select_nth_unstable(mid);
        Luma([*median])
    })
}

/// Below `threshold` becomes black, everything else white.
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if img.get_pixel(x, y)[0] < threshold {
            BLACK
        } else {
            WHITE
        }
    })
}

/// Largest size fitting inside the requested box with the source aspect
/// ratio. Never larger than the source.
pub fn fit_within(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let mut ratio: f64 = 1.0;
    if let Some(max_width) = max_width {
        ratio = ratio.min(max_width as f64 / width as f64);
    }
    if let Some(max_height) = max_height {
        ratio = ratio.min(max_height as f64 / height as f64);
    }
    if ratio >= 1.0 {
        return (width, height);
    }

    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);
    (new_width, new_height)
}

/// PNG is written as compressed 8-bit grayscale. JPEG may reintroduce
/// intermediate grays around edges; that is accepted for JPEG output.
fn encode(img: &GrayImage, format: OutputFormat) -> Result<Vec<u8>, ColoringError> {
    let (width, height) = img.dimensions();
    let mut output = Vec::new();

    let result = match format {
        OutputFormat::Png => {
            PngEncoder::new_with_quality(&mut output, CompressionType::Best, PngFilter::Adaptive)
                .write_image(img.as_raw(), width, height, ColorType::L8)
        }
        OutputFormat::Jpeg => JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY)
            .write_image(img.as_raw(), width, height, ColorType::L8),
    };

    result.map_err(|e| {
        ColoringError::post_processing_caused(
            format!("Failed to encode {} output", format.as_str()),
            e,
        )
    })?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Stage;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 255) / (width - 1)) as u8;
            Rgb([v, v / 2, 255 - (y as u8 % 255)])
        });
        png_bytes(DynamicImage::ImageRgb8(img))
    }

    fn no_denoise() -> PostProcessOptions {
        PostProcessOptions {
            denoise: false,
            ..PostProcessOptions::default()
        }
    }

    struct StaticFetcher(Vec<u8>);

    #[async_trait]
    impl ImageFetcher for StaticFetcher {
        async fn fetch(&self, _locator: &str) -> Result<Bytes, ColoringError> {
            Ok(Bytes::from(self.0.clone()))
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl ImageFetcher for FailingFetcher {
        async fn fetch(&self, locator: &str) -> Result<Bytes, ColoringError> {
            Err(ColoringError::post_processing(format!(
                "Failed to fetch {}",
                locator
            )))
        }
    }

    #[test]
    fn output_buffer_is_strictly_binary() {
        let art = render_line_art(&gradient(64, 48), &PostProcessOptions::default()).unwrap();
        assert!(art.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert!(art.pixels().any(|p| p[0] == 0));
        assert!(art.pixels().any(|p| p[0] == 255));
    }

    #[test]
    fn png_output_stays_binary_after_decode() {
        let png = process_bytes(&gradient(40, 40), &PostProcessOptions::default()).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (40, 40));
        assert!(decoded.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn threshold_is_exclusive_below() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([[127, 128, 129][x as usize]]));
        let binary = binarize(&img, 128);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(1, 0)[0], 255);
        assert_eq!(binary.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn median_removes_isolated_speckle() {
        let mut img = GrayImage::from_pixel(9, 9, WHITE);
        img.put_pixel(4, 4, BLACK);
        img.put_pixel(0, 0, BLACK);

        let cleaned = median_filter(&img, 3);
        assert!(cleaned.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn median_keeps_solid_edges() {
        let img = GrayImage::from_fn(8, 8, |x, _| if x < 4 { BLACK } else { WHITE });
        assert_eq!(median_filter(&img, 3), img);
    }

    #[test]
    fn even_kernel_rounds_up_and_tiny_kernel_is_identity() {
        let mut img = GrayImage::from_pixel(7, 7, WHITE);
        img.put_pixel(3, 3, BLACK);
        assert_eq!(median_filter(&img, 2), median_filter(&img, 3));
        assert_eq!(median_filter(&img, 1), img);
    }

    #[test]
    fn oversized_kernel_is_clamped() {
        let mut img = GrayImage::from_pixel(20, 20, WHITE);
        img.put_pixel(10, 10, BLACK);

        let huge = median_filter(&img, u32::MAX);
        assert_eq!(huge, median_filter(&img, MAX_DENOISE_KERNEL));
        assert_eq!(huge.dimensions(), (20, 20));
    }

    #[test]
    fn resize_fits_box_and_keeps_aspect() {
        assert_eq!(fit_within(400, 200, Some(100), None), (100, 50));
        assert_eq!(fit_within(400, 200, None, Some(50)), (100, 50));
        assert_eq!(fit_within(400, 200, Some(300), Some(50)), (100, 50));
        assert_eq!(fit_within(400, 200, None, None), (400, 200));
    }

    #[test]
    fn resize_never_enlarges() {
        assert_eq!(fit_within(120, 80, Some(1000), None), (120, 80));

        let options = PostProcessOptions {
            output_width: Some(500),
            ..no_denoise()
        };
        let art = render_line_art(&gradient(30, 20), &options).unwrap();
        assert_eq!(art.dimensions(), (30, 20));
    }

    #[test]
    fn downscaled_output_stays_binary() {
        let options = PostProcessOptions {
            output_width: Some(16),
            ..PostProcessOptions::default()
        };
        let art = render_line_art(&gradient(64, 32), &options).unwrap();
        assert_eq!(art.dimensions(), (16, 8));
        assert!(art.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn jpeg_output_decodes() {
        let options = PostProcessOptions {
            output_format: OutputFormat::Jpeg,
            ..PostProcessOptions::default()
        };
        let jpeg = process_bytes(&gradient(32, 32), &options).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn garbage_input_is_post_processing_error() {
        let err = process_bytes(b"not an image", &PostProcessOptions::default()).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::PostProcessing));
    }

    #[tokio::test]
    async fn locator_is_fetched_before_processing() {
        let processor = PostProcessor::new(Arc::new(StaticFetcher(gradient(20, 10))));
        let out = processor
            .process(
                ImageSource::Locator("https://cdn.example/out.png".into()),
                &no_denoise(),
            )
            .await
            .unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_with_stage() {
        let processor = PostProcessor::new(Arc::new(FailingFetcher));
        let err = processor
            .process(
                ImageSource::Locator("https://cdn.example/missing.png".into()),
                &PostProcessOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::PostProcessing));
    }
}
