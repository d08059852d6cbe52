//! REST client for the Gemini image endpoints.
//!
//! Generation goes through the Imagen `:predict` method, editing through
//! `:generateContent` with the source image attached as inline data.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{domain::Image, error::ImageDecodeError};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_GENERATE_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";
pub const DEFAULT_OUTPUT_MIME_TYPE: &str = "image/png";

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: Url,
    pub generate_model: String,
    pub edit_model: String,
    pub aspect_ratio: String,
    pub output_mime_type: String,
    pub request_timeout: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            generate_model: DEFAULT_GENERATE_MODEL.into(),
            edit_model: DEFAULT_EDIT_MODEL.into(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.into(),
            output_mime_type: DEFAULT_OUTPUT_MIME_TYPE.into(),
            request_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("API key is not configured")]
    MissingApiKey,
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to Gemini API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Gemini API returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("{0}")]
    NoImage(&'static str),
    #[error("Gemini API returned an undecodable image: {0}")]
    Decode(#[from] ImageDecodeError),
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GeminiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(GeminiError::Client)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Synthesizes a single image from `prompt`.
    pub async fn generate_image(&self, prompt: &str) -> Result<Image, GeminiError> {
        let body = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                sample_count: 1,
                aspect_ratio: &self.config.aspect_ratio,
                output_options: OutputOptions {
                    mime_type: &self.config.output_mime_type,
                },
            },
        };
        let response: PredictResponse = self
            .post(&self.config.generate_model, "predict", &body)
            .await?;

        let prediction = response
            .predictions
            .into_iter()
            .find(|prediction| prediction.bytes_base64_encoded.is_some())
            .ok_or(GeminiError::NoImage(
                "image generation failed, no images returned",
            ))?;
        let mime_type = prediction
            .mime_type
            .unwrap_or_else(|| self.config.output_mime_type.clone());
        let data = prediction.bytes_base64_encoded.unwrap_or_default();
        Ok(Image::from_base64(mime_type, &data)?)
    }

    /// Sends `source` plus `prompt` to the edit model and returns the first
    /// inline image of the first candidate.
    pub async fn edit_image(&self, prompt: &str, source: &Image) -> Result<Image, GeminiError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: source.mime_type().to_string(),
                            data: source.to_base64(),
                        },
                    },
                    Part::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE"],
            },
        };
        let response: GenerateContentResponse = self
            .post(&self.config.edit_model, "generateContent", &body)
            .await?;

        let inline = response
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| {
                content
                    .parts
                    .into_iter()
                    .find_map(|part| part.inline_data)
            })
            .ok_or(GeminiError::NoImage(
                "image editing failed, no image data returned",
            ))?;
        Ok(Image::from_base64(inline.mime_type, &inline.data)?)
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{model}:{method}",
            self.config.base_url.as_str().trim_end_matches('/')
        )
    }

    async fn post<B, R>(&self, model: &str, method: &str, body: &B) -> Result<R, GeminiError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(GeminiError::MissingApiKey)?;

        let url = self.endpoint(model, method);
        debug!(model, method, "gemini: sending request");
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read Gemini error body".to_string());
            warn!(model, method, %status, "gemini: request rejected");
            return Err(map_http_error(status, body_text));
        }

        Ok(response.json().await?)
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters<'a>,
}

#[derive(Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters<'a> {
    sample_count: u32,
    aspect_ratio: &'a str,
    output_options: OutputOptions<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputOptions<'a> {
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    #[serde(rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn map_http_error(status: StatusCode, body: String) -> GeminiError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.clone());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        })
        .unwrap_or_else(|_| body.clone());

    GeminiError::Status { status, message }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
