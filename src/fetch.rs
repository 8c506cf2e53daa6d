use crate::config::{FetchMode, LoadedSource, PaginationStrategy, resolve_path};
use crate::extract::absolutize_url;
use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub source_url: String,
    pub body: Vec<u8>,
    pub page_index: usize,
}

#[derive(Debug, Clone)]
enum PageTarget {
    Url(String),
    File(PathBuf),
    Inline,
}

/// Lazy sequence of listing pages for one source.
///
/// Nothing is requested until the caller pulls the next item, so a consumer
/// that stops early never triggers further requests. The sequence ends after
/// the first error.
pub struct Pages<'a> {
    source: &'a LoadedSource,
    client: Option<Client>,
    next: Option<PageTarget>,
    index: usize,
}

pub fn fetch_pages(source: &LoadedSource) -> Result<Pages<'_>> {
    let fetch = &source.config.fetch;
    let (client, first) = match fetch.mode {
        FetchMode::Http => {
            let base_url = fetch.base_url.as_deref().context("fetch.base_url missing")?;
            (Some(build_client(source)?), PageTarget::Url(page_url(source, base_url, 0)?))
        }
        FetchMode::File => (None, PageTarget::File(page_file(source, 0)?)),
        FetchMode::Inline => (None, PageTarget::Inline),
    };

    Ok(Pages {
        source,
        client,
        next: Some(first),
        index: 0,
    })
}

impl Iterator for Pages<'_> {
    type Item = Result<FetchedDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        let target = self.next.take()?;
        let pagination = &self.source.config.pagination;

        if self.index > 0 && self.client.is_some() && pagination.delay_ms > 0 {
            debug!(delay_ms = pagination.delay_ms, "waiting before next page");
            std::thread::sleep(Duration::from_millis(pagination.delay_ms));
        }

        let doc = match self.load(&target) {
            Ok(Some(doc)) => doc,
            Ok(None) => return None,
            Err(err) => return Some(Err(err)),
        };

        self.index += 1;
        match self.following(&target, &doc) {
            Ok(next) => self.next = next,
            Err(err) => {
                warn!(source = %self.source.config.source.key, error = %err, "cannot determine next page");
            }
        }

        Some(Ok(doc))
    }
}

impl Pages<'_> {
    fn load(&self, target: &PageTarget) -> Result<Option<FetchedDocument>> {
        let key = &self.source.config.source.key;
        let fetch = &self.source.config.fetch;

        match target {
            PageTarget::Url(url) => {
                let client = self
                    .client
                    .as_ref()
                    .ok_or_else(|| anyhow!("http client missing for {key}"))?;
                let body =
                    fetch_with_retries(client, url, fetch.retry_attempts, fetch.retry_backoff_ms)?;
                info!(source = %key, page = self.index, bytes = body.len(), %url, "fetched page");
                Ok(Some(FetchedDocument {
                    source_url: url.clone(),
                    body,
                    page_index: self.index,
                }))
            }
            PageTarget::File(path) => {
                if self.index > 0 && !path.exists() {
                    debug!(source = %key, file = %path.display(), "no further page files");
                    return Ok(None);
                }
                let body = std::fs::read(path)
                    .with_context(|| format!("failed to read file source {}", path.display()))?;
                info!(source = %key, file = %path.display(), bytes = body.len(), "loaded file source");
                Ok(Some(FetchedDocument {
                    source_url: format!("file://{}", path.display()),
                    body,
                    page_index: self.index,
                }))
            }
            PageTarget::Inline => {
                let inline = fetch
                    .inline_data
                    .as_ref()
                    .context("fetch.inline_data missing for inline mode")?;
                debug!(source = %key, bytes = inline.len(), "loaded inline source");
                Ok(Some(FetchedDocument {
                    source_url: format!("inline://{key}"),
                    body: inline.as_bytes().to_vec(),
                    page_index: self.index,
                }))
            }
        }
    }

    fn following(&self, current: &PageTarget, doc: &FetchedDocument) -> Result<Option<PageTarget>> {
        let pagination = &self.source.config.pagination;
        if !pagination.enabled || self.index >= pagination.max_pages {
            return Ok(None);
        }

        match pagination.strategy {
            PaginationStrategy::QueryParam => match current {
                PageTarget::Url(_) => {
                    let base_url = self
                        .source
                        .config
                        .fetch
                        .base_url
                        .as_deref()
                        .context("fetch.base_url missing")?;
                    Ok(Some(PageTarget::Url(page_url(self.source, base_url, self.index)?)))
                }
                PageTarget::File(_) => Ok(Some(PageTarget::File(page_file(self.source, self.index)?))),
                PageTarget::Inline => Ok(None),
            },
            PaginationStrategy::NextLink => {
                let css = pagination
                    .next_selector
                    .as_deref()
                    .context("pagination.next_selector missing")?;
                let Some(href) = find_next_link(&doc.body, css)? else {
                    debug!(source = %self.source.config.source.key, "no next link; last page");
                    return Ok(None);
                };
                Ok(match current {
                    PageTarget::Url(url) => Some(PageTarget::Url(absolutize_url(Some(url), &href))),
                    PageTarget::File(path) => {
                        Some(PageTarget::File(resolve_path(path, &PathBuf::from(href))?))
                    }
                    PageTarget::Inline => None,
                })
            }
        }
    }
}

fn page_number(source: &LoadedSource, index: usize) -> Option<usize> {
    let pagination = &source.config.pagination;
    if !pagination.enabled || (index == 0 && pagination.first_page_bare) {
        return None;
    }
    Some(pagination.start_page + index)
}

fn page_url(source: &LoadedSource, base_url: &str, index: usize) -> Result<String> {
    match page_number(source, index) {
        Some(page) => build_paged_url(
            base_url,
            &source.config.pagination.page_param,
            &page.to_string(),
        ),
        None => Ok(base_url.to_string()),
    }
}

fn page_file(source: &LoadedSource, index: usize) -> Result<PathBuf> {
    let template = source
        .config
        .fetch
        .file_path
        .as_ref()
        .context("fetch.file_path missing for file mode")?;
    let page = page_number(source, index)
        .unwrap_or(source.config.pagination.start_page + index)
        .to_string();
    let rendered = template.to_string_lossy().replace("{page}", &page);
    resolve_path(&source.path, &PathBuf::from(rendered))
}

fn build_client(source: &LoadedSource) -> Result<Client> {
    let fetch = &source.config.fetch;
    let mut headers = HeaderMap::new();
    for (k, v) in &fetch.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name {k}"))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("invalid header value for {k}"))?;
        headers.insert(name, value);
    }

    if let Some(user_agent) = &fetch.user_agent {
        headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    }

    Client::builder()
        .timeout(Duration::from_secs(fetch.timeout_secs))
        .default_headers(headers)
        .build()
        .context("failed to build reqwest client")
}

fn fetch_with_retries(
    client: &Client,
    url: &str,
    retry_attempts: u8,
    retry_backoff_ms: u64,
) -> Result<Vec<u8>> {
    let attempts = retry_attempts.max(1);

    for attempt in 1..=attempts {
        match client.get(url).send() {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp.bytes()?.to_vec());
                }
                if attempt == attempts {
                    bail!("request to {url} failed with status {status}");
                }
                warn!(%url, %status, attempt, "request failed; retrying");
            }
            Err(err) => {
                if attempt == attempts {
                    return Err(err).with_context(|| format!("request to {url} failed"));
                }
                warn!(%url, attempt, error = %err, "request errored; retrying");
            }
        }

        std::thread::sleep(Duration::from_millis(retry_backoff_ms));
    }

    bail!("request to {url} failed after retries")
}

fn find_next_link(body: &[u8], css: &str) -> Result<Option<String>> {
    let selector =
        Selector::parse(css).map_err(|err| anyhow!("invalid next_selector {css}: {err:?}"))?;
    let html = Html::parse_document(&String::from_utf8_lossy(body));
    Ok(html
        .select(&selector)
        .find_map(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty()))
}

fn build_paged_url(base_url: &str, param: &str, page: &str) -> Result<String> {
    let mut url = Url::parse(base_url).with_context(|| format!("invalid base_url {base_url}"))?;

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    match pairs.iter_mut().find(|(k, _)| k == param) {
        Some((_, v)) => *v = page.to_string(),
        None => pairs.push((param.to_string(), page.to_string())),
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(url.to_string())
}
