//! Generative "transmutation": a raw portrait restyled as an archetype,
//! plus a short royal decree.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kemet_capture::snapshot::artifact_name;
use kemet_core::catalog::Archetype;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const IMAGE_MODEL: &str = "gemini-2.5-flash-image";
const TEXT_MODEL: &str = "gemini-2.5-flash";

/// Decree used when the text model fails.
pub const ORACLE_FALLBACK: &str = "The hieroglyphs are faded and cannot be read.";
/// Decree used when the text model answers with nothing.
pub const ORACLE_SILENT: &str = "The sands of time are silent.";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("GEMINI_API_KEY is not set")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no candidates returned")]
    NoCandidates,
    #[error("the transformation was blocked by safety filters; try a different pose or expression")]
    Blocked,
    #[error("the service replied with text but no image: \"{0}\"")]
    TextOnly(String),
    #[error("no image data in the response")]
    NoImage,
    #[error("malformed image data: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// An image returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

pub trait GenerativeService: Send + Sync {
    /// Restyle a JPEG portrait according to `style`.
    fn transform_image(
        &self,
        jpeg: &[u8],
        style: &str,
    ) -> impl Future<Output = Result<GeneratedImage, ServiceError>> + Send;

    /// Short decree for the archetype called `label`.
    fn generate_text(&self, label: &str) -> impl Future<Output = Result<String, ServiceError>> + Send;
}

// --- Gemini generateContent wire types ---

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

fn image_prompt(style: &str) -> String {
    format!(
        "Edit this photo to show the person wearing this costume: {style}\n\n\
         Important:\n\
         - Maintain the person's facial identity and features.\n\
         - High quality, photorealistic, cinematic lighting.\n\
         - Do not distort the face."
    )
}

fn decree_prompt(label: &str) -> String {
    format!(
        "Write a short, mystical, ancient Egyptian-style royal decree (max 2 sentences) for a {label}. \
         Use archaic, grand language."
    )
}

/// Pull the first inline image out of a response, distinguishing the ways it can be missing.
fn extract_image(resp: GenerateResponse) -> Result<GeneratedImage, ServiceError> {
    let candidate = resp.candidates.into_iter().next().ok_or(ServiceError::NoCandidates)?;
    if let Some(reason) = candidate.finish_reason.as_deref() {
        if reason == "SAFETY" {
            return Err(ServiceError::Blocked);
        }
        if reason != "STOP" {
            tracing::warn!(reason, "image generation finished early");
        }
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    if let Some(inline) = parts.iter().find_map(|p| p.inline_data.as_ref()) {
        return Ok(GeneratedImage {
            data: BASE64.decode(&inline.data)?,
            mime_type: inline.mime_type.clone(),
        });
    }
    if let Some(text) = parts.iter().find_map(|p| p.text.as_deref()) {
        return Err(ServiceError::TextOnly(text.chars().take(100).collect()));
    }
    Err(ServiceError::NoImage)
}

fn extract_text(resp: GenerateResponse) -> String {
    resp.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join("")
}

/// HTTP client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Result<Self, ServiceError> {
        let api_key = api_key.ok_or(ServiceError::MissingApiKey)?;
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    async fn generate(&self, model: &str, request: &GenerateRequest<'_>) -> Result<GenerateResponse, ServiceError> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        tracing::debug!(model, "calling generative service");
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        Ok(resp.json().await?)
    }
}

impl GenerativeService for GeminiClient {
    fn transform_image(
        &self,
        jpeg: &[u8],
        style: &str,
    ) -> impl Future<Output = Result<GeneratedImage, ServiceError>> + Send {
        let data = BASE64.encode(jpeg);
        let prompt = image_prompt(style);
        async move {
            let request = GenerateRequest {
                contents: vec![Content {
                    parts: vec![
                        RequestPart::Inline {
                            inline_data: InlineData {
                                mime_type: "image/jpeg".to_string(),
                                data,
                            },
                        },
                        RequestPart::Text { text: &prompt },
                    ],
                }],
            };
            extract_image(self.generate(IMAGE_MODEL, &request).await?)
        }
    }

    fn generate_text(&self, label: &str) -> impl Future<Output = Result<String, ServiceError>> + Send {
        let prompt = decree_prompt(label);
        async move {
            let request = GenerateRequest {
                contents: vec![Content {
                    parts: vec![RequestPart::Text { text: &prompt }],
                }],
            };
            Ok(extract_text(self.generate(TEXT_MODEL, &request).await?))
        }
    }
}

/// Result of one transmutation.
#[derive(Debug, Clone)]
pub struct Transmutation {
    pub image: GeneratedImage,
    pub decree: String,
}

/// Restyle `jpeg` as `archetype`, then ask for a decree. Only the image step
/// can fail; a failed decree falls back to fixed text.
pub async fn transmute<S: GenerativeService>(
    service: &S,
    jpeg: &[u8],
    archetype: &Archetype,
) -> Result<Transmutation, ServiceError> {
    tracing::info!(archetype = %archetype.id, bytes = jpeg.len(), "transmuting");
    let image = service.transform_image(jpeg, &archetype.prompt_modifier).await?;

    let decree = match service.generate_text(&archetype.name).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => ORACLE_SILENT.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "oracle failed");
            ORACLE_FALLBACK.to_string()
        }
    };
    Ok(Transmutation { image, decree })
}

/// Write the image and its decree side by side. Returns the image path.
pub fn save_transmutation(t: &Transmutation, dir: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let image_path = dir.join(artifact_name("kemetic-transmute", t.image.extension()));
    std::fs::write(&image_path, &t.image.data)?;
    std::fs::write(image_path.with_extension("txt"), format!("{}\n", t.decree))?;
    Ok(image_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Scripted {
        image: fn() -> Result<GeneratedImage, ServiceError>,
        text: fn() -> Result<String, ServiceError>,
        styles: Mutex<Vec<String>>,
    }

    impl GenerativeService for Scripted {
        fn transform_image(
            &self,
            _jpeg: &[u8],
            style: &str,
        ) -> impl Future<Output = Result<GeneratedImage, ServiceError>> + Send {
            self.styles.lock().unwrap().push(style.to_string());
            let out = (self.image)();
            async move { out }
        }

        fn generate_text(&self, _label: &str) -> impl Future<Output = Result<String, ServiceError>> + Send {
            let out = (self.text)();
            async move { out }
        }
    }

    fn png() -> Result<GeneratedImage, ServiceError> {
        Ok(GeneratedImage {
            data: vec![0x89, b'P', b'N', b'G'],
            mime_type: "image/png".into(),
        })
    }

    fn pharaoh() -> &'static Archetype {
        kemet_core::catalog::lookup_archetype("pharaoh").unwrap()
    }

    #[tokio::test]
    async fn test_transmute_uses_prompt_modifier() {
        let service = Scripted {
            image: png,
            text: || Ok("  Let it be written.  ".into()),
            styles: Mutex::new(Vec::new()),
        };
        let t = transmute(&service, b"jpeg", pharaoh()).await.unwrap();
        assert_eq!(t.decree, "Let it be written.");
        assert_eq!(service.styles.lock().unwrap()[0], pharaoh().prompt_modifier);
    }

    #[tokio::test]
    async fn test_oracle_failure_falls_back() {
        let service = Scripted {
            image: png,
            text: || Err(ServiceError::MissingApiKey),
            styles: Mutex::new(Vec::new()),
        };
        let t = transmute(&service, b"jpeg", pharaoh()).await.unwrap();
        assert_eq!(t.decree, ORACLE_FALLBACK);
    }

    #[tokio::test]
    async fn test_image_failure_is_an_error() {
        let service = Scripted {
            image: || Err(ServiceError::Blocked),
            text: || Ok("unused".into()),
            styles: Mutex::new(Vec::new()),
        };
        assert!(matches!(
            transmute(&service, b"jpeg", pharaoh()).await,
            Err(ServiceError::Blocked)
        ));
    }

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extract_image_variants() {
        let ok = parse(r#"{"candidates":[{"finishReason":"STOP","content":{"parts":[
            {"text":"here you go"},{"inlineData":{"mimeType":"image/png","data":"AQID"}}]}}]}"#);
        let img = extract_image(ok).unwrap();
        assert_eq!(img.data, vec![1, 2, 3]);
        assert_eq!(img.extension(), "png");

        let blocked = parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        assert!(matches!(extract_image(blocked), Err(ServiceError::Blocked)));

        let text_only = parse(r#"{"candidates":[{"content":{"parts":[{"text":"I cannot edit this"}]}}]}"#);
        assert!(matches!(extract_image(text_only), Err(ServiceError::TextOnly(t)) if t == "I cannot edit this"));

        let empty = parse(r#"{"candidates":[{"finishReason":"STOP","content":{"parts":[]}}]}"#);
        assert!(matches!(extract_image(empty), Err(ServiceError::NoImage)));

        assert!(matches!(extract_image(parse("{}")), Err(ServiceError::NoCandidates)));
    }

    #[test]
    fn test_request_serialization() {
        let req = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Inline {
                        inline_data: InlineData {
                            mime_type: "image/jpeg".into(),
                            data: "AA==".into(),
                        },
                    },
                    RequestPart::Text { text: "hi" },
                ],
            }],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(json["contents"][0]["parts"][1]["text"], "hi");
    }

    #[test]
    fn test_save_writes_image_and_decree() {
        let dir = std::env::temp_dir().join(format!("kemet-transmute-{}", uuid::Uuid::new_v4()));
        let t = Transmutation {
            image: png().unwrap(),
            decree: "So it is decreed.".into(),
        };
        let path = save_transmutation(&t, &dir).unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(std::fs::read(&path).unwrap(), t.image.data);
        assert_eq!(
            std::fs::read_to_string(path.with_extension("txt")).unwrap(),
            "So it is decreed.\n"
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_key() {
        assert!(matches!(GeminiClient::new(None), Err(ServiceError::MissingApiKey)));
    }
}
