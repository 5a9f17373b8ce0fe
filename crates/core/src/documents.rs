//! Document generation collaborator.
//!
//! Printable and PDF renderings of a result are produced by an external document service. The
//! core only needs the bytes back; storing them and retrying is the gateway's concern (see
//! [`crate::release`]).

use crate::LabError;
use async_trait::async_trait;
use labflow_uuid::ShardableUuid;
use labflow_wire::{PanelDefinition, TestRequest};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

/// Requested rendering of a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Print,
    Pdf,
}

impl DocumentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentFormat::Print => "print",
            DocumentFormat::Pdf => "pdf",
        }
    }

    /// Media type assumed when the generator does not declare one.
    pub fn default_media_type(self) -> &'static str {
        match self {
            DocumentFormat::Print => "text/plain",
            DocumentFormat::Pdf => "application/pdf",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            DocumentFormat::Print => "txt",
            DocumentFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "print" => Ok(DocumentFormat::Print),
            "pdf" => Ok(DocumentFormat::Pdf),
            other => Err(LabError::InvalidInput(format!(
                "unknown document format '{other}' (expected print or pdf)"
            ))),
        }
    }
}

/// Bytes returned by a generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedDocument {
    pub bytes: Vec<u8>,
    pub media_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("document service unreachable: {0}")]
    Unreachable(String),
    #[error("document service returned {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("document service returned an empty body")]
    EmptyBody,
    #[error("{0} documents are not supported by this generator")]
    UnsupportedFormat(DocumentFormat),
}

impl GeneratorError {
    /// Transport failures and server-side errors are worth retrying; rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GeneratorError::Unreachable(_) | GeneratorError::EmptyBody => true,
            GeneratorError::Rejected { status, .. } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            GeneratorError::UnsupportedFormat(_) => false,
        }
    }
}

#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        format: DocumentFormat,
    ) -> Result<GeneratedDocument, GeneratorError>;
}

#[derive(Serialize)]
struct RenderRequest {
    request_id: ShardableUuid,
    format: DocumentFormat,
}

/// Generator backed by an HTTP document service.
///
/// Posts `{"request_id": "...", "format": "print" | "pdf"}` as JSON to the configured endpoint
/// and takes the response body as the document.
#[derive(Clone, Debug)]
pub struct HttpDocumentGenerator {
    client: Client,
    endpoint: String,
}

impl HttpDocumentGenerator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DocumentGenerator for HttpDocumentGenerator {
    async fn generate(
        &self,
        request: &TestRequest,
        _panel: &PanelDefinition,
        format: DocumentFormat,
    ) -> Result<GeneratedDocument, GeneratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RenderRequest {
                request_id: request.request_id,
                format,
            })
            .send()
            .await
            .map_err(|e| GeneratorError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GeneratorError::Unreachable(e.to_string()))?;
        if bytes.is_empty() {
            return Err(GeneratorError::EmptyBody);
        }
        Ok(GeneratedDocument {
            bytes: bytes.to_vec(),
            media_type,
        })
    }
}

/// Local fallback for deployments without a document service. Renders a plain-text report for
/// printing; PDF is reported as unsupported.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTextGenerator;

impl PlainTextGenerator {
    pub fn render(request: &TestRequest, panel: &PanelDefinition) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", panel.title);
        let _ = writeln!(out, "Request: {}", request.request_id);
        let _ = writeln!(out, "Patient: {}", request.patient_id);
        if let Some(encounter) = &request.encounter_id {
            let _ = writeln!(out, "Encounter: {encounter}");
        }
        let _ = writeln!(out, "Status: {}", request.status);
        out.push('\n');

        if let Some(result) = &request.result {
            for spec in &panel.parameters {
                let value = result
                    .values
                    .get(&spec.key)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string());
                let unit = spec.unit.as_deref().unwrap_or("");
                let flag = result
                    .flags
                    .iter()
                    .find(|f| f.key == spec.key)
                    .map(|f| f.tier.as_str())
                    .filter(|tier| *tier != "normal")
                    .map(|tier| format!(" [{}]", tier.to_ascii_uppercase()))
                    .unwrap_or_default();
                let _ = writeln!(out, "{:<28} {} {}{}", spec.label.as_str(), value, unit, flag);
            }
            if let Some(remarks) = &result.remarks {
                let _ = writeln!(out, "\nRemarks: {remarks}");
            }
        }

        if let Some(tech) = &request.actors.finalized_by {
            let license = tech
                .license_number
                .as_ref()
                .map(|l| format!(" ({l})"))
                .unwrap_or_default();
            let _ = writeln!(out, "\nMedical technologist: {}{}", tech.name, license);
        }
        out
    }
}

#[async_trait]
impl DocumentGenerator for PlainTextGenerator {
    async fn generate(
        &self,
        request: &TestRequest,
        panel: &PanelDefinition,
        format: DocumentFormat,
    ) -> Result<GeneratedDocument, GeneratorError> {
        match format {
            DocumentFormat::Print => Ok(GeneratedDocument {
                bytes: Self::render(request, panel).into_bytes(),
                media_type: Some(format.default_media_type().to_string()),
            }),
            DocumentFormat::Pdf => Err(GeneratorError::UnsupportedFormat(format)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cbc_panel, new_request};
    use labflow_wire::RequestStatus;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_formats() {
        assert_eq!("PDF".parse::<DocumentFormat>().unwrap(), DocumentFormat::Pdf);
        assert!("docx".parse::<DocumentFormat>().is_err());
    }

    #[tokio::test]
    async fn http_generator_posts_request_id_and_format() {
        let server = MockServer::start().await;
        let request = new_request(RequestStatus::Completed);
        Mock::given(method("POST"))
            .and(path("/render"))
            .and(body_json(serde_json::json!({
                "request_id": request.request_id.to_string(),
                "format": "pdf",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.7 report".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let generator = HttpDocumentGenerator::new(format!("{}/render", server.uri()));
        let doc = generator
            .generate(&request, &cbc_panel(), DocumentFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(doc.bytes, b"%PDF-1.7 report");
        assert_eq!(doc.media_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn http_generator_classifies_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let generator = HttpDocumentGenerator::new(server.uri());
        let err = generator
            .generate(&new_request(RequestStatus::Final), &cbc_panel(), DocumentFormat::Print)
            .await
            .expect_err("service unavailable");
        assert!(matches!(err, GeneratorError::Rejected { status: 503, .. }));
        assert!(err.is_retryable());

        let bad_request = GeneratorError::Rejected {
            status: 400,
            message: String::new(),
        };
        assert!(!bad_request.is_retryable());
    }

    #[tokio::test]
    async fn plain_text_generator_prints_values_and_flags() {
        let mut request = new_request(RequestStatus::Completed);
        if let Some(result) = request.result.as_mut() {
            result.flags.push(labflow_wire::InterpretationFlag {
                key: "hemoglobin".into(),
                value: labflow_wire::ResultValue::Number(13.0),
                tier: labflow_wire::FlagTier::High,
                severity: labflow_wire::Severity::Attention,
            });
        }
        let doc = PlainTextGenerator
            .generate(&request, &cbc_panel(), DocumentFormat::Print)
            .await
            .unwrap();
        let text = String::from_utf8(doc.bytes).unwrap();
        assert!(text.starts_with("Complete Blood Count"));
        assert!(text.contains("Hemoglobin"));
        assert!(text.contains("13 g/dL [HIGH]"));
        assert!(text.contains("Medical technologist: Jose Cruz (PRC-0012345)"));

        let err = PlainTextGenerator
            .generate(&request, &cbc_panel(), DocumentFormat::Pdf)
            .await
            .expect_err("no pdf");
        assert!(!err.is_retryable());
    }
}
