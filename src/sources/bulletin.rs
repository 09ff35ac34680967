//! Ministry policy bulletin listing.
//!
//! The listing page is a shell: it carries a `queryData="..."` parameter blob
//! and a `url="..."` pointing at a JSON unit endpoint whose `data.html` holds
//! the actual `<li>` entries.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, instrument};

use super::{selector, SourceConnector, BROWSER_USER_AGENT};
use crate::fetcher::{DetailFetcher, FetchError, FetchedDetail};
use crate::model::{Candidate, EnrichmentMode};

const SITE_ROOT: &str = "https://www.mofcom.gov.cn";
const LINK_MARKER: &str = "/zwgk/zcfb/";

static QUERY_DATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"queryData="([^"]+)""#).expect("queryData regex"));
static UNIT_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"url="([^"]+)""#).expect("url regex"));
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date regex"));
static LI_RAW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<li[^>]*>([\s\S]*?)</li>").expect("li regex"));
static A_RAW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<a[^>]*href="([^"]+)"[^>]*>([\s\S]*?)</a>"#).expect("anchor regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

static PRIMARY_LIST: Lazy<Selector> = Lazy::new(|| selector("ul.txtList_01 li"));
static SECONDARY_LIST: Lazy<Selector> = Lazy::new(|| selector("section.iListCon li"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static SPAN: Lazy<Selector> = Lazy::new(|| selector("span"));
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| selector("p"));
static BODY_CANDIDATES: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"div[ergodic="article"]"#,
        ".art-con-bottonmLine",
        ".art-con",
        "#zoom",
        ".article",
        ".articleCon",
        ".con",
        ".content",
        ".mleft",
        ".TRS_Editor",
    ]
    .into_iter()
    .map(selector)
    .collect()
});

/// One row of the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub date: String,
    pub title: String,
    pub link: String,
}

impl ListingEntry {
    pub fn into_candidate(self, feed: &str) -> Candidate {
        let mut c = Candidate::new(self.link.clone(), feed, self.link);
        c.title = Some(self.title);
        c.published_on = Some(self.date);
        c
    }
}

/// Extract the unit endpoint and its query parameters from the shell page.
/// `pageNum`/`pageSize` are added when the blob does not carry them.
pub fn unit_request(
    shell_html: &str,
    list_url: &Url,
    page_size: u32,
) -> Result<(Url, Vec<(String, String)>), FetchError> {
    let qd = QUERY_DATA
        .captures(shell_html)
        .ok_or_else(|| FetchError::Transient("listing page lacks queryData".into()))?;
    let unit = UNIT_URL
        .captures(shell_html)
        .ok_or_else(|| FetchError::Transient("listing page lacks unit url".into()))?;

    let blob = qd[1].replace('\'', "\"");
    let Value::Object(map) = serde_json::from_str::<Value>(&blob)
        .map_err(|e| FetchError::Transient(format!("queryData is not JSON: {e}")))?
    else {
        return Err(FetchError::Transient("queryData is not an object".into()));
    };

    let mut params: Vec<(String, String)> = map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect();
    if !params.iter().any(|(k, _)| k == "pageNum") {
        params.push(("pageNum".into(), "1".into()));
    }
    if !params.iter().any(|(k, _)| k == "pageSize") {
        params.push(("pageSize".into(), page_size.to_string()));
    }

    let url = list_url
        .join(&unit[1])
        .map_err(|e| FetchError::Transient(format!("bad unit url {}: {e}", &unit[1])))?;
    Ok((url, params))
}

fn absolute_link(href: &str, list_url: &Url) -> String {
    let href = href.trim();
    if href.starts_with('/') {
        format!("{SITE_ROOT}{href}")
    } else if href.starts_with("http") {
        href.to_string()
    } else {
        list_url
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

fn clean_title(raw_html: &str) -> String {
    let stripped = TAG.replace_all(raw_html, "");
    Html::parse_fragment(stripped.trim())
        .root_element()
        .text()
        .collect::<String>()
        .trim()
        .to_string()
}

/// Listing entries in page order.
///
/// Only links under the policy-release column are kept, which drops sidebar
/// and navigation anchors. Falls back to a regex pass over raw `<li>` blocks
/// when neither list container is present.
pub fn parse_listing(html: &str, list_url: &Url) -> Vec<ListingEntry> {
    let doc = Html::parse_document(html);
    let mut nodes: Vec<ElementRef<'_>> = doc.select(&PRIMARY_LIST).collect();
    if nodes.is_empty() {
        nodes = doc.select(&SECONDARY_LIST).collect();
    }

    let mut entries = Vec::new();
    for li in nodes {
        let Some(a) = li.select(&ANCHOR).next() else {
            continue;
        };
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        if !href.contains(LINK_MARKER) {
            continue;
        }
        let date_source = match li.select(&SPAN).next() {
            Some(span) => span.text().collect::<String>(),
            None => li.text().collect::<Vec<_>>().join(" "),
        };
        let Some(date) = DATE.find(&date_source) else {
            continue;
        };
        entries.push(ListingEntry {
            date: date.as_str().to_string(),
            title: clean_title(&a.inner_html()),
            link: absolute_link(href, list_url),
        });
    }
    if !entries.is_empty() {
        return entries;
    }

    for li in LI_RAW.captures_iter(html) {
        let block = &li[1];
        let (Some(date), Some(a)) = (DATE.find(block), A_RAW.captures(block)) else {
            continue;
        };
        entries.push(ListingEntry {
            date: date.as_str().to_string(),
            title: clean_title(&a[2]),
            link: absolute_link(&a[1], list_url),
        });
    }
    entries
}

/// Keep entries published on `today`, or everything when `today` is None.
pub fn select_entries(entries: Vec<ListingEntry>, today: Option<NaiveDate>) -> Vec<ListingEntry> {
    match today {
        Some(day) => {
            let day = day.format("%Y-%m-%d").to_string();
            entries.into_iter().filter(|e| e.date == day).collect()
        }
        None => entries,
    }
}

fn push_line(out: &mut Vec<String>, text: &str) {
    let t = text.trim();
    if !t.is_empty() {
        out.push(t.to_string());
    }
}

/// Text lines under `el`, skipping script/style and writing anchors as
/// `text (absolute href)` so attachment links survive.
fn collect_lines(el: ElementRef<'_>, base: Option<&Url>, out: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => push_line(out, t),
            Node::Element(e) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                match e.name() {
                    "script" | "style" => {}
                    "a" => {
                        let text = child_el.text().collect::<String>();
                        let href = e.attr("href").map(|h| match base {
                            Some(b) => b.join(h).map(|u| u.to_string()).unwrap_or(h.to_string()),
                            None => h.to_string(),
                        });
                        match href {
                            Some(h) if !h.is_empty() => {
                                push_line(out, &format!("{} ({h})", text.trim()))
                            }
                            _ => push_line(out, &text),
                        }
                    }
                    _ => collect_lines(child_el, base, out),
                }
            }
            _ => {}
        }
    }
}

fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = Vec::new();
    collect_lines_plain(el, &mut out);
    out.join(" ")
}

fn collect_lines_plain(el: ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => push_line(out, t),
            Node::Element(e) if !matches!(e.name(), "script" | "style") => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_lines_plain(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Article body text, one line per text fragment.
///
/// Tries the known body containers in order and uses the first one with
/// visible text; otherwise joins the page's paragraphs; otherwise the whole
/// page text.
pub fn extract_article_text(html: &str, base_url: Option<&Url>) -> String {
    let doc = Html::parse_document(html);
    for sel in BODY_CANDIDATES.iter() {
        if let Some(node) = doc.select(sel).find(|n| !visible_text(*n).is_empty()) {
            let mut lines = Vec::new();
            collect_lines(node, base_url, &mut lines);
            return lines.join("\n");
        }
    }

    let paragraphs: Vec<String> = doc
        .select(&PARAGRAPH)
        .map(visible_text)
        .filter(|p| !p.is_empty())
        .collect();
    if !paragraphs.is_empty() {
        return paragraphs.join("\n");
    }

    let mut lines = Vec::new();
    collect_lines_plain(doc.root_element(), &mut lines);
    lines.join("\n")
}

pub struct BulletinSource {
    http: reqwest::Client,
    list_url: Url,
    feed: String,
    page_size: u32,
    today: Option<NaiveDate>,
}

impl BulletinSource {
    /// `today` restricts the listing to entries published that day.
    pub fn new(
        list_url: &str,
        feed: impl Into<String>,
        page_size: u32,
        today: Option<NaiveDate>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            list_url: Url::parse(list_url)?,
            feed: feed.into(),
            page_size,
            today,
        })
    }

    async fn get_text(&self, url: Url, query: &[(String, String)]) -> Result<String, FetchError> {
        let resp = self
            .http
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Transient(format!("GET {url}: HTTP {status}")));
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))
    }

    async fn listing_html(&self) -> Result<String, FetchError> {
        let shell = self.get_text(self.list_url.clone(), &[]).await?;
        let (unit_url, params) = unit_request(&shell, &self.list_url, self.page_size)?;
        let body = self.get_text(unit_url, &params).await?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::Transient(format!("unit response is not JSON: {e}")))?;
        Ok(json
            .pointer("/data/html")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl SourceConnector for BulletinSource {
    fn origin(&self) -> &str {
        &self.feed
    }

    fn mode(&self) -> EnrichmentMode {
        EnrichmentMode::Text
    }

    #[instrument(skip_all, fields(feed = %self.feed))]
    async fn collect(&self) -> Result<Vec<Candidate>, FetchError> {
        let html = self.listing_html().await?;
        let all = parse_listing(&html, &self.list_url);
        let total = all.len();
        let kept = select_entries(all, self.today);
        info!(total, kept = kept.len(), today = ?self.today, "bulletin listing parsed");
        Ok(kept
            .into_iter()
            .map(|e| e.into_candidate(&self.feed))
            .collect())
    }
}

#[async_trait]
impl DetailFetcher for BulletinSource {
    async fn fetch_detail(&self, candidate: &Candidate) -> Result<FetchedDetail, FetchError> {
        let url = Url::parse(&candidate.reference_url)
            .map_err(|e| FetchError::Transient(format!("bad link {}: {e}", candidate.reference_url)))?;
        let html = self.get_text(url.clone(), &[]).await?;
        let body_text = extract_article_text(&html, Some(&url));
        if body_text.trim().is_empty() {
            return Err(FetchError::Transient(format!("no content extracted from {url}")));
        }
        Ok(FetchedDetail {
            body_text,
            snapshot: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_url() -> Url {
        Url::parse("https://www.mofcom.gov.cn/zwgk/zcfb/index.html").unwrap()
    }

    #[test]
    fn unit_request_from_shell() {
        let shell = r#"<div class="list" queryData="{'columnId':'abc','pageSize':20}" url="/api-gateway/jpaas-publish-server/front/page/build/unit"></div>"#;
        let (url, params) = unit_request(shell, &list_url(), 15).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.mofcom.gov.cn/api-gateway/jpaas-publish-server/front/page/build/unit"
        );
        assert!(params.contains(&("columnId".into(), "abc".into())));
        assert!(params.contains(&("pageSize".into(), "20".into())));
        assert!(params.contains(&("pageNum".into(), "1".into())));

        assert!(unit_request("<html></html>", &list_url(), 15).is_err());
    }

    #[test]
    fn listing_keeps_policy_links_only() {
        let html = r#"
<ul class="txtList_01">
  <li><a href="/zwgk/zcfb/art/2025/art_1.html" title="t">Notice on <em>export</em> controls &amp; items</a><span>2025-03-04</span></li>
  <li><a href="/xwfb/other.html">Press</a><span>2025-03-04</span></li>
  <li><a href="https://www.mofcom.gov.cn/zwgk/zcfb/art/2025/art_2.html">Second</a><span>[2025-03-03]</span></li>
  <li><a href="/zwgk/zcfb/art/2025/art_3.html">Undated</a></li>
</ul>"#;
        let entries = parse_listing(html, &list_url());
        assert_eq!(
            entries,
            vec![
                ListingEntry {
                    date: "2025-03-04".into(),
                    title: "Notice on export controls & items".into(),
                    link: "https://www.mofcom.gov.cn/zwgk/zcfb/art/2025/art_1.html".into(),
                },
                ListingEntry {
                    date: "2025-03-03".into(),
                    title: "Second".into(),
                    link: "https://www.mofcom.gov.cn/zwgk/zcfb/art/2025/art_2.html".into(),
                },
            ]
        );
    }

    #[test]
    fn listing_regex_fallback() {
        let html = r#"<div><li class="x"><a href="art_9.html">Relative</a> 2025-01-02</li><li>no link 2025-01-02</li></div>"#;
        let entries = parse_listing(html, &list_url());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://www.mofcom.gov.cn/zwgk/zcfb/art_9.html");
        assert_eq!(entries[0].date, "2025-01-02");
    }

    #[test]
    fn today_filter() {
        let e = |d: &str| ListingEntry {
            date: d.into(),
            title: "t".into(),
            link: format!("https://a/{d}"),
        };
        let day = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let kept = select_entries(vec![e("2025-03-04"), e("2025-03-03")], Some(day));
        assert_eq!(kept.len(), 1);
        assert_eq!(select_entries(vec![e("2025-03-03")], None).len(), 1);

        let c = e("2025-03-04").into_candidate("mofcom");
        assert_eq!(c.identity, "https://a/2025-03-04");
        assert_eq!(c.published_on.as_deref(), Some("2025-03-04"));
        assert_eq!(c.origin_handle, "mofcom");
    }

    #[test]
    fn article_text_prefers_body_container() {
        let html = r#"<html><head><style>.x{}</style></head><body>
<div class="nav"><p>Home</p></div>
<div class="art-con"></div>
<div id="zoom"><script>var a=1;</script><p>Paragraph one.</p><p>See <a href="att/list.xlsx">annex</a></p></div>
</body></html>"#;
        let base = Url::parse("https://www.mofcom.gov.cn/zwgk/zcfb/art/2025/art_1.html").unwrap();
        let text = extract_article_text(html, Some(&base));
        assert_eq!(
            text,
            "Paragraph one.\nSee\nannex (https://www.mofcom.gov.cn/zwgk/zcfb/art/2025/att/list.xlsx)"
        );
    }

    #[test]
    fn article_text_paragraph_fallback() {
        let html = "<html><body><p>One</p><p> </p><p>Two <b>bold</b></p></body></html>";
        assert_eq!(extract_article_text(html, None), "One\nTwo bold");
        assert_eq!(extract_article_text("<html><body><div>Only</div></body></html>", None), "Only");
    }
}
