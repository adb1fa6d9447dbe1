use crate::types::{CapturedImage, RecognitionResult};
use failure::Fail;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::cmp::Ordering;
use std::io;
use url::Url;

#[derive(Debug, Fail)]
pub enum RecognitionError {
    #[fail(display = "Could not read image: {}", _0)]
    Image(#[fail(cause)] io::Error),
    #[fail(display = "Recognition service unreachable: {}", _0)]
    Unreachable(#[fail(cause)] reqwest::Error),
    #[fail(display = "Recognition service returned {}: {}", status, body)]
    Status { status: u16, body: String },
    #[fail(display = "Malformed recognition response: {}", _0)]
    Malformed(String),
    #[fail(display = "No plate found in the image")]
    NoPlate,
}

/// One call per image; retrying is up to the user.
#[allow(async_fn_in_trait)]
pub trait PlateRecognizer {
    async fn recognize(&self, image: &CapturedImage) -> Result<RecognitionResult, RecognitionError>;
}

/// Client for a Plate Recognizer style snapshot endpoint.
#[derive(Debug, Clone)]
pub struct HttpPlateRecognizer {
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
    regions: Vec<String>,
}

impl HttpPlateRecognizer {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        HttpPlateRecognizer {
            client,
            url,
            token: None,
            regions: vec![],
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }
}

impl PlateRecognizer for HttpPlateRecognizer {
    async fn recognize(&self, image: &CapturedImage) -> Result<RecognitionResult, RecognitionError> {
        let mut form = Form::new();
        for region in &self.regions {
            form = form.text("regions", region.clone());
        }
        form = if image.is_remote() {
            form.text("upload_url", image.uri().to_string())
        } else {
            let bytes = image.load().await.map_err(RecognitionError::Image)?;
            form.part(
                "upload",
                Part::bytes(bytes.to_vec()).file_name(image.file_name()),
            )
        };

        let mut request = self.client.post(self.url.clone()).multipart(form);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token));
        }
        debug!("Sending {} to {}", image.uri(), self.url);
        let response = request
            .send()
            .await
            .map_err(RecognitionError::Unreachable)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(RecognitionError::Unreachable)?;
        if !status.is_success() {
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let result = parse_response(&body)?;
        info!(
            "Recognized plate {} ({:.2})",
            result.plate_text, result.confidence
        );
        Ok(result)
    }
}

fn score(result: &Value) -> f64 {
    result["score"].as_f64().unwrap_or(0.0)
}

/// Accepts `{"results": [{"plate", "score"}, ...]}` (best score wins) or a
/// flat `{"plate", "confidence"}`.
pub fn parse_response(body: &str) -> Result<RecognitionResult, RecognitionError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| RecognitionError::Malformed(format!("{}", e)))?;
    let (plate, confidence) = if let Some(results) = json["results"].as_array() {
        let best = results
            .iter()
            .max_by(|a, b| score(a).partial_cmp(&score(b)).unwrap_or(Ordering::Equal))
            .ok_or(RecognitionError::NoPlate)?;
        let plate = best["plate"]
            .as_str()
            .ok_or_else(|| RecognitionError::Malformed("Missing plate field".to_string()))?;
        (plate, score(best))
    } else if let Some(plate) = json["plate"].as_str() {
        (plate, json["confidence"].as_f64().unwrap_or(0.0))
    } else {
        return Err(RecognitionError::Malformed(
            "Missing plate field".to_string(),
        ));
    };
    if plate.trim().is_empty() {
        return Err(RecognitionError::NoPlate);
    }
    Ok(RecognitionResult::new(plate.trim(), confidence))
}
