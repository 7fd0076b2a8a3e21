//! Text-region detector sidecar client.

use super::TextDetector;
use crate::segment::DetectedBox;
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use serde::Deserialize;
use std::io::Cursor;
use tracing::debug;

/// Sidecar response (private deserialization types).
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    boxes: Vec<SidecarBox>,
}

#[derive(Debug, Deserialize)]
struct SidecarBox {
    points: [[f32; 2]; 4],
    #[serde(default)]
    confidence: f32,
}

impl From<SidecarBox> for DetectedBox {
    fn from(b: SidecarBox) -> Self {
        DetectedBox::new(b.points.map(|[x, y]| (x, y)), b.confidence)
    }
}

pub struct SidecarDetector {
    url: String,
    client: reqwest::Client,
}

impl SidecarDetector {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait::async_trait]
impl TextDetector for SidecarDetector {
    fn name(&self) -> &str {
        "sidecar"
    }

    async fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<DetectedBox>> {
        use reqwest::multipart::{Form, Part};

        let page = image.clone();
        let png = tokio::task::spawn_blocking(move || encode_png(page)).await??;
        let part = Part::bytes(png)
            .file_name("page.png")
            .mime_str("image/png")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/detect", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Detector sidecar error ({}): {}", status, error_text);
        }

        let detected: DetectResponse = response.json().await?;
        debug!("SidecarDetector: {} boxes", detected.boxes.len());
        Ok(parse_boxes(detected))
    }
}

fn encode_png(image: RgbImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(buf)
}

fn parse_boxes(response: DetectResponse) -> Vec<DetectedBox> {
    response.boxes.into_iter().map(DetectedBox::from).collect()
}
