use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{info, instrument};

use super::{selector, SourceConnector};
use crate::fetcher::{DetailFetcher, FetchError, FetchedDetail};
use crate::model::{Candidate, EnrichmentMode};
use crate::render::{Capture, RenderClient};

const SITE: &str = "https://x.com";
const ARTICLE: &str = r#"article[data-testid="tweet"]"#;

static CELL: Lazy<Selector> = Lazy::new(|| selector(r#"[data-testid="cellInnerDiv"]"#));
static STATUS_LINK: Lazy<Selector> =
    Lazy::new(|| selector(r#"[data-testid="User-Name"] a[href*="/status/"]"#));
static SOCIAL_CONTEXT: Lazy<Selector> = Lazy::new(|| selector(r#"[data-testid="socialContext"]"#));
static TWEET_TEXT: Lazy<Selector> =
    Lazy::new(|| selector(r#"article[data-testid="tweet"] [data-testid="tweetText"]"#));
static ARTICLE_SEL: Lazy<Selector> = Lazy::new(|| selector(ARTICLE));
static STATUS_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/([^/?#]+)/status/(\d+)").expect("status regex"));

pub fn status_url(handle: &str, id: &str) -> String {
    format!("{SITE}/{handle}/status/{id}")
}

/// Candidates from a rendered profile page, in page order.
///
/// Cells without a status link (promos, "who to follow") are skipped. A cell
/// whose social context says "reposted" is flagged as a repost. The reference
/// URL is the canonical status link of whoever authored the post.
pub fn parse_timeline(html: &str, handle: &str) -> Vec<Candidate> {
    let doc = Html::parse_document(html);
    let mut out = Vec::new();
    for cell in doc.select(&CELL) {
        let Some((author, id)) = cell
            .select(&STATUS_LINK)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| {
                STATUS_PATH
                    .captures(href)
                    .map(|c| (c[1].to_string(), c[2].to_string()))
            })
        else {
            continue;
        };
        let is_repost = cell
            .select(&SOCIAL_CONTEXT)
            .any(|ctx| ctx.text().collect::<String>().to_lowercase().contains("reposted"));

        // reposts link to the original author's status
        let mut candidate = Candidate::new(id.clone(), handle, status_url(&author, &id));
        candidate.is_repost = is_repost;
        out.push(candidate);
    }
    out
}

/// Text of the first post body on a rendered status page.
pub fn parse_status_text(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    if doc.select(&ARTICLE_SEL).next().is_none() {
        return None;
    }
    let text = doc
        .select(&TWEET_TEXT)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();
    Some(text.trim().to_string())
}

/// Anonymous sessions get bounced to the login flow.
pub fn is_login_wall(html: &str) -> bool {
    html.contains("/i/flow/login") || html.contains(r#"data-testid="loginButton""#)
}

pub struct TimelineSource {
    handle: String,
    render: RenderClient,
}

impl TimelineSource {
    pub fn new(handle: impl Into<String>, render: RenderClient) -> Self {
        Self {
            handle: handle.into(),
            render,
        }
    }

    pub fn profile_url(&self) -> String {
        format!("{SITE}/{}", self.handle)
    }
}

#[async_trait]
impl SourceConnector for TimelineSource {
    fn origin(&self) -> &str {
        &self.handle
    }

    fn mode(&self) -> EnrichmentMode {
        EnrichmentMode::Snapshot
    }

    #[instrument(skip_all, fields(handle = %self.handle))]
    async fn collect(&self) -> Result<Vec<Candidate>, FetchError> {
        let html = self
            .render
            .content(&self.profile_url(), Some(r#"[data-testid="cellInnerDiv"]"#))
            .await?;
        let candidates = parse_timeline(&html, &self.handle);
        if candidates.is_empty() && is_login_wall(&html) {
            return Err(FetchError::Session(format!(
                "profile {} rendered a login wall; refresh the cookie file",
                self.handle
            )));
        }
        info!(count = candidates.len(), "timeline candidates collected");
        Ok(candidates)
    }
}

#[async_trait]
impl DetailFetcher for TimelineSource {
    async fn fetch_detail(&self, candidate: &Candidate) -> Result<FetchedDetail, FetchError> {
        let url = &candidate.reference_url;
        let html = self.render.content(url, Some(ARTICLE)).await?;
        let Some(body_text) = parse_status_text(&html) else {
            if is_login_wall(&html) {
                return Err(FetchError::Session(format!("login wall on {url}")));
            }
            return Err(FetchError::Transient(format!("no post article on {url}")));
        };

        let snapshot = self
            .render
            .screenshot(
                url,
                Some(ARTICLE),
                Capture {
                    selector: Some(ARTICLE),
                    quality: 90,
                },
            )
            .await?;

        Ok(FetchedDetail {
            body_text,
            snapshot: Some(snapshot),
        })
    }
}
