use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{SearchSettings, ServiceSettings};
use crate::error::AdapterError;
use crate::models::{DocumentMetadata, RawRecord};

use super::SearchAdapter;

const SERVICE: &str = "pubmed";

/// PubMed E-utilities client: esearch for PMIDs, efetch for article XML
pub struct PubMedSearch {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_results: usize,
    min_date: Option<String>,
    max_date: Option<String>,
}

impl PubMedSearch {
    pub fn new(services: &ServiceSettings, search: &SearchSettings) -> Self {
        Self {
            client: Client::new(),
            base_url: services.pubmed_base_url.trim_end_matches('/').to_string(),
            api_key: services.pubmed_api_key.clone(),
            max_results: search.max_results,
            min_date: search.min_date.clone(),
            max_date: search.max_date.clone(),
        }
    }

    async fn fetch_pmids(&self, query: &str) -> Result<Vec<String>, AdapterError> {
        let mut params = vec![
            ("db".to_string(), "pubmed".to_string()),
            ("term".to_string(), query.to_string()),
            ("retmax".to_string(), self.max_results.to_string()),
            ("retmode".to_string(), "json".to_string()),
            ("sort".to_string(), "pub_date".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key".to_string(), key.clone()));
        }
        if let (Some(min), Some(max)) = (&self.min_date, &self.max_date) {
            params.push(("datetype".to_string(), "pdat".to_string()));
            params.push(("mindate".to_string(), min.clone()));
            params.push(("maxdate".to_string(), max.clone()));
        }

        let response = self
            .client
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;
        check_status(response.status())?;

        let body: EsearchResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("esearch response: {e}")))?;
        Ok(body.esearchresult.idlist)
    }

    async fn fetch_articles_xml(&self, pmids: &[String]) -> Result<String, AdapterError> {
        let mut form = vec![
            ("db".to_string(), "pubmed".to_string()),
            ("id".to_string(), pmids.join(",")),
            ("retmode".to_string(), "xml".to_string()),
        ];
        if let Some(key) = &self.api_key {
            form.push(("api_key".to_string(), key.clone()));
        }

        // POST keeps long PMID lists out of the URL
        let response = self
            .client
            .post(format!("{}/efetch.fcgi", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))?;
        check_status(response.status())?;

        response
            .text()
            .await
            .map_err(|e| AdapterError::unavailable(SERVICE, e))
    }
}

#[async_trait]
impl SearchAdapter for PubMedSearch {
    async fn search(&self, query: &str) -> Result<Vec<RawRecord>, AdapterError> {
        info!("Searching PubMed: {}", query);
        let pmids = self.fetch_pmids(query).await?;
        debug!("Found {} PMIDs", pmids.len());
        if pmids.is_empty() {
            return Ok(vec![]);
        }

        let xml = self.fetch_articles_xml(&pmids).await?;
        parse_pubmed_xml(&xml)
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), AdapterError> {
    if status.as_u16() == 429 {
        return Err(AdapterError::rate_limited(SERVICE));
    }
    if !status.is_success() {
        return Err(AdapterError::unavailable(SERVICE, format!("HTTP {status}")));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// Parse PubMed efetch XML into raw records, one per `PubmedArticle`
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<RawRecord>, AdapterError> {
    let tree = roxmltree::Document::parse(xml)
        .map_err(|e| AdapterError::Parse(format!("efetch XML: {e}")))?;

    let mut records = Vec::new();
    for article in tree
        .descendants()
        .filter(|n| n.has_tag_name("PubmedArticle"))
    {
        let pmid = find_text(&article, "PMID");
        let doi = article
            .descendants()
            .find(|n| n.has_tag_name("ArticleId") && n.attribute("IdType") == Some("doi"))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string());
        let title = article
            .descendants()
            .find(|n| n.has_tag_name("ArticleTitle"))
            .map(|n| collect_text(&n));
        let journal = article
            .descendants()
            .find(|n| n.has_tag_name("Journal"))
            .and_then(|j| j.descendants().find(|n| n.has_tag_name("Title")))
            .map(|n| collect_text(&n));
        let year = article
            .descendants()
            .find(|n| n.has_tag_name("PubDate"))
            .and_then(|d| d.descendants().find(|n| n.has_tag_name("Year")))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string());

        // Structured abstracts carry several AbstractText sections
        let abstract_text = {
            let joined = article
                .descendants()
                .filter(|n| n.has_tag_name("AbstractText"))
                .map(|n| collect_text(&n))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        };

        let authors = article
            .descendants()
            .filter(|n| n.has_tag_name("Author"))
            .filter_map(|a| {
                let last = a
                    .descendants()
                    .find(|n| n.has_tag_name("LastName"))
                    .and_then(|n| n.text())?;
                let initials = a
                    .descendants()
                    .find(|n| n.has_tag_name("Initials"))
                    .and_then(|n| n.text());
                Some(match initials {
                    Some(initials) => format!("{last} {initials}"),
                    None => last.to_string(),
                })
            })
            .collect();

        records.push(RawRecord {
            external_id: pmid,
            metadata: DocumentMetadata {
                title,
                abstract_text,
                authors,
                year,
                journal,
                doi,
                source: Some(SERVICE.to_string()),
            },
        });
    }

    Ok(records)
}

fn find_text(node: &roxmltree::Node, tag: &str) -> Option<String> {
    node.descendants()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

/// All text under a node, whitespace-collapsed (titles and abstracts may
/// contain inline markup)
fn collect_text(node: &roxmltree::Node) -> String {
    node.descendants()
        .filter_map(|n| n.text())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
