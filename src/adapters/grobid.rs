use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::debug;

use crate::config::ServiceSettings;
use crate::error::AdapterError;

use super::StructuringAdapter;

const SERVICE: &str = "grobid";
const TEI_NS: &str = "http://www.tei-c.org/ns/1.0";

/// Client for a running GROBID service: PDF in, TEI XML out, reduced here
/// to the plain body text the downstream LLM stages consume.
pub struct GrobidClient {
    client: Client,
    host: String,
}

impl GrobidClient {
    pub fn new(services: &ServiceSettings) -> Self {
        Self {
            client: Client::new(),
            host: services.grobid_url.trim_end_matches('/').to_string(),
        }
    }

    async fn process_fulltext(&self, pdf: &[u8]) -> Result<String, AdapterError> {
        let part = Part::bytes(pdf.to_vec())
            .file_name("document.pdf")
            .mime_str("application/pdf")
            .map_err(|e| AdapterError::Parse(format!("multipart: {e}")))?;
        let form = Form::new().part("input", part);

        let response = self
            .client
            .post(format!("{}/api/processFulltextDocument", self.host))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;

        match response.status().as_u16() {
            // GROBID answers 204 for documents it cannot process
            204 | 400 => {
                return Err(AdapterError::Parse(
                    "GROBID could not process the PDF".into(),
                ));
            }
            429 => return Err(AdapterError::rate_limited(SERVICE)),
            503 => {
                return Err(AdapterError::unavailable(
                    SERVICE,
                    "all GROBID threads busy",
                ));
            }
            s if !(200..300).contains(&s) => {
                return Err(AdapterError::unavailable(SERVICE, format!("HTTP {s}")));
            }
            _ => {}
        }

        response
            .text()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))
    }
}

#[async_trait]
impl StructuringAdapter for GrobidClient {
    async fn parse(&self, pdf: &[u8]) -> Result<String, AdapterError> {
        debug!("Sending {} byte PDF to GROBID", pdf.len());
        let tei = self.process_fulltext(pdf).await?;
        extract_tei_body_text(&tei)
    }

    async fn check_alive(&self) -> Result<(), AdapterError> {
        let response = self
            .client
            .get(format!("{}/api/isalive", self.host))
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;
        let ok = response.status().is_success();
        let body = response.text().await.unwrap_or_default();
        if ok && body.trim() == "true" {
            Ok(())
        } else {
            Err(AdapterError::unavailable(SERVICE, "isalive check failed"))
        }
    }
}

/// Concatenated, whitespace-collapsed text of the TEI `<body>`
pub fn extract_tei_body_text(tei: &str) -> Result<String, AdapterError> {
    let tree =
        roxmltree::Document::parse(tei).map_err(|e| AdapterError::Parse(format!("TEI XML: {e}")))?;

    let body = tree
        .descendants()
        .find(|n| n.tag_name().name() == "body" && n.tag_name().namespace() == Some(TEI_NS))
        .ok_or_else(|| AdapterError::Parse("TEI document has no body".into()))?;

    let text = body
        .descendants()
        .filter_map(|n| n.text())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() {
        return Err(AdapterError::Parse("TEI body is empty".into()));
    }
    Ok(text)
}
