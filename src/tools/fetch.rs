//! 网页抓取工具（研究者与探索阶段的默认外部工具）
//!
//! GET 请求带超时与 User-Agent；可选域名白名单（为空表示不限制）；
//! HTML 响应用 html2text 提取可读文本，超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::config::FetchSection;
use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

pub const FETCH_URL: &str = "fetch_url";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Deserialize, JsonSchema)]
struct FetchArgs {
    /// 以 http:// 或 https:// 开头的完整 URL
    url: String,
}

/// 抓取 URL 内容
pub struct WebFetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// html2text 失败时的回退：简单去标签并压缩空白
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head") || head.contains("<body")
}

/// 从 URL 中提取 host（小写，不含端口）
pub(crate) fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?.split(':').next()?;
    (!host.is_empty()).then(|| host.to_lowercase())
}

fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() > max {
        text.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

impl WebFetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars: max_result_chars.max(1),
        }
    }

    pub fn from_config(cfg: &FetchSection) -> Self {
        Self::new(cfg.allowed_domains.clone(), cfg.timeout_secs, cfg.max_result_chars)
    }

    fn check_allowed(&self, url: &str) -> Result<(), String> {
        let domain = extract_domain(url).ok_or_else(|| format!("Invalid or missing URL: {url}"))?;
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain) {
            Ok(())
        } else {
            Err(format!("Domain not in allowlist: {domain}"))
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, String> {
        self.check_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');

        let text = if looks_like_html(body) {
            match from_read(body.as_bytes(), 120) {
                Ok(text) if !text.trim().is_empty() => text,
                _ => strip_html_tags(body),
            }
        } else {
            body.to_string()
        };

        Ok(format!("Source: {url}\n\n{}", truncate_chars(text, self.max_result_chars)))
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        FETCH_URL
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text (HTML is converted to plain text). Args: {\"url\": \"https://...\"}"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<FetchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: FetchArgs = parse_args(FETCH_URL, args)?;
        let url = args.url.trim();
        if url.is_empty() {
            return Err("Missing url".to_string());
        }
        tracing::info!(url = %url, "fetch_url");
        self.fetch(url).await
    }
}
