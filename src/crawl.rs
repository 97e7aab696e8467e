//! Documentation source crawler.
//!
//! Fetches a sitemap, keeps the page URLs under the source's configured
//! prefix, downloads each page and reduces it to plain article text.
//!
//! Network failures (sitemap or page fetch) surface as
//! [`CopilotError::SourceCrawl`] and abort the whole build — a partial
//! corpus silently degrades answer quality without signaling failure.
//! Pages whose HTML cannot be reduced to text are skipped with a warning;
//! that mirrors fetching a page the extractor has nothing useful for.

use std::io::Cursor;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::config::SourceConfig;
use crate::error::CopilotError;

/// A crawled page reduced to plain text.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub title: Option<String>,
    pub body: String,
}

/// Build the HTTP client used for crawling.
pub fn crawl_client() -> Result<reqwest::Client, CopilotError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent("Mozilla/5.0 (compatible; SupportCopilot/0.1)")
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| CopilotError::SourceCrawl {
            url: String::new(),
            message: format!("failed to build HTTP client: {}", e),
        })
}

/// Crawl one documentation source: sitemap → filtered URL list → pages.
pub async fn crawl_source(
    client: &reqwest::Client,
    source: &SourceConfig,
) -> Result<Vec<Page>, CopilotError> {
    let xml = fetch_bytes(client, &source.sitemap_url).await?;
    let urls = parse_sitemap_urls(&xml).map_err(|e| CopilotError::SourceCrawl {
        url: source.sitemap_url.clone(),
        message: format!("sitemap parse failed: {}", e),
    })?;
    let urls = filter_urls(urls, &source.url_prefix);

    let mut pages = Vec::with_capacity(urls.len());
    for url in urls {
        let html = fetch_bytes(client, &url).await?;
        match extract_page(&url, &html) {
            Ok(page) => pages.push(page),
            Err(e) => warn!(url = %url, "skipping page, extraction failed: {}", e),
        }
    }

    Ok(pages)
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, CopilotError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| CopilotError::SourceCrawl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(CopilotError::SourceCrawl {
            url: url.to_string(),
            message: format!("HTTP {}", status),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| CopilotError::SourceCrawl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    Ok(bytes.to_vec())
}

/// Pull every `<loc>` value out of a sitemap document.
pub fn parse_sitemap_urls(xml: &[u8]) -> anyhow::Result<Vec<String>> {
    let mut urls = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_loc = e.local_name().as_ref() == b"loc";
            }
            Ok(quick_xml::events::Event::Text(te)) => {
                if in_loc {
                    urls.push(te.unescape()?.trim().to_string());
                }
            }
            Ok(quick_xml::events::Event::End(_)) => {
                in_loc = false;
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => anyhow::bail!("XML error: {}", e),
            _ => {}
        }
        buf.clear();
    }

    Ok(urls)
}

/// Keep only URLs under the source's prefix, so off-domain links in the
/// sitemap are never followed.
pub fn filter_urls(urls: Vec<String>, prefix: &str) -> Vec<String> {
    urls.into_iter().filter(|u| u.starts_with(prefix)).collect()
}

/// Reduce a page's HTML to plain article text.
fn extract_page(url: &str, html: &[u8]) -> anyhow::Result<Page> {
    let parsed = Url::parse(url)?;
    let mut cursor = Cursor::new(html);
    let product = readability::extractor::extract(&mut cursor, &parsed)
        .map_err(|e| anyhow::anyhow!("readability extraction failed: {}", e))?;

    let title = if product.title.is_empty() {
        None
    } else {
        Some(product.title)
    };

    Ok(Page {
        url: url.to_string(),
        title,
        body: product.text,
    })
}
