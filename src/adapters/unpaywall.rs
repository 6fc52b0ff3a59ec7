use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ServiceSettings;
use crate::error::AdapterError;
use crate::models::DocumentMetadata;

use super::PdfAdapter;

const SERVICE: &str = "unpaywall";
const DEFAULT_API_BASE: &str = "https://api.unpaywall.org/v2";

/// Open-access PDF retrieval via the Unpaywall DOI lookup.
///
/// A document without a DOI, or without a known open-access location, is a
/// permanent `NotFound` - the accepted recovery path is manual PDF
/// placement through the `attach` command.
pub struct UnpaywallFetcher {
    client: Client,
    api_base: String,
    email: String,
}

impl UnpaywallFetcher {
    pub fn new(services: &ServiceSettings) -> Self {
        Self {
            client: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            email: services.unpaywall_email.clone(),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    async fn pdf_url_for_doi(&self, doi: &str) -> Result<String, AdapterError> {
        let url = format!("{}/{}?email={}", self.api_base, doi, self.email);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;

        match response.status().as_u16() {
            404 => return Err(AdapterError::NotFound(format!("DOI {doi} not indexed"))),
            429 => return Err(AdapterError::rate_limited(SERVICE)),
            s if !(200..300).contains(&s) => {
                return Err(AdapterError::unavailable(SERVICE, format!("HTTP {s}")));
            }
            _ => {}
        }

        let body: UnpaywallResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("unpaywall response: {e}")))?;

        body.best_oa_location
            .and_then(|loc| loc.url_for_pdf)
            .ok_or_else(|| AdapterError::NotFound(format!("no open-access PDF for DOI {doi}")))
    }

    async fn download(&self, pdf_url: &str) -> Result<Vec<u8>, AdapterError> {
        debug!("Downloading PDF from {}", pdf_url);
        let response = self
            .client
            .get(pdf_url)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;

        match response.status().as_u16() {
            404 | 410 => return Err(AdapterError::NotFound(format!("dead PDF link {pdf_url}"))),
            429 => return Err(AdapterError::rate_limited(SERVICE)),
            s if !(200..300).contains(&s) => {
                return Err(AdapterError::unavailable(SERVICE, format!("HTTP {s}")));
            }
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl PdfAdapter for UnpaywallFetcher {
    async fn fetch(&self, metadata: &DocumentMetadata) -> Result<Vec<u8>, AdapterError> {
        let doi = metadata
            .doi
            .as_deref()
            .ok_or_else(|| AdapterError::NotFound("document has no DOI".into()))?;
        let pdf_url = self.pdf_url_for_doi(doi).await?;
        self.download(&pdf_url).await
    }
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    best_oa_location: Option<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    url_for_pdf: Option<String>,
}
