//! Web 检索工具：排查 terraform 报错时查阅官方文档
//!
//! 仅允许配置中的域名（Terraform Registry、HashiCorp 文档、AWS 文档等），重定向目标同样校验；GET 请求带超时；
//! HTML 响应用 html2text 提取可读文本，超过 max_result_chars 时截断并追加 ...[truncated]。

use std::collections::HashSet;
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use serde_json::Value;

use crate::tools::Tool;

pub struct WebSearchTool {
    client: Client,
    allowed_domains: Arc<HashSet<String>>,
    max_result_chars: usize,
}

const MAX_REDIRECTS: usize = 5;

/// 只放行 http(s) 且主机在白名单中的 URL
fn check_allowed(allowed: &HashSet<String>, url: &Url) -> Result<(), String> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("Unsupported scheme: {}", url.scheme()));
    }
    let host = url
        .host_str()
        .map(str::to_lowercase)
        .ok_or_else(|| format!("URL has no host: {url}"))?;
    if allowed.contains(&host) {
        Ok(())
    } else {
        Err(format!("Domain not in allowlist: {host}"))
    }
}

/// 每一跳重定向都重新校验白名单
fn redirect_policy(allowed: Arc<HashSet<String>>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (>{MAX_REDIRECTS})"));
        }
        match check_allowed(&allowed, attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(e) => attempt.error(format!("Redirect refused: {e}")),
        }
    })
}

/// reqwest 错误连同 source 链一起展示（重定向被拒的原因在 source 里）
fn error_chain(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.contains('<') && (s.contains("</") || s.contains("<head") || s.contains("<title")))
}

fn truncate_chars(body: String, max: usize) -> String {
    if body.chars().count() > max {
        body.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

impl WebSearchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains: Arc<HashSet<String>> = Arc::new(
            allowed_domains
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(redirect_policy(allowed_domains.clone()))
            .user_agent(concat!("infra-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
        }
    }

    fn check_url(&self, raw: &str) -> Result<Url, String> {
        let url = Url::parse(raw).map_err(|_| format!("Invalid URL: {raw}"))?;
        check_allowed(&self.allowed_domains, &url)?;
        Ok(url)
    }

    async fn fetch(&self, url: Url) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", error_chain(&e)))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');

        let text = if looks_like_html(body) {
            from_read(body.as_bytes(), 120).unwrap_or_else(|_| body.to_string())
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Fetch a documentation page to troubleshoot an error (Terraform Registry, HashiCorp docs, \
         AWS docs, GitHub, StackOverflow). Args: {\"url\": \"https://...\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Page URL on an allowlisted domain" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let raw = args
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if raw.is_empty() {
            return Err("Missing url".to_string());
        }
        let url = self.check_url(raw)?;
        tracing::info!(url = %url, "web search fetch");
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> WebSearchTool {
        WebSearchTool::new(vec!["Registry.Terraform.io".into()], 5, 10)
    }

    #[test]
    fn only_allowlisted_https_hosts_pass() {
        let t = tool();
        assert!(t
            .check_url("https://registry.terraform.io/providers/hashicorp/aws")
            .is_ok());
        assert!(t.check_url("https://evil.example.com/").is_err());
        assert!(t.check_url("file:///etc/passwd").is_err());
        assert!(t.check_url("not a url").is_err());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let out = truncate_chars("ㄱ".repeat(20), 10);
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(out.chars().filter(|c| *c == 'ㄱ').count(), 10);
        assert_eq!(truncate_chars("short".into(), 10), "short");
    }

    #[tokio::test]
    async fn missing_url_is_error() {
        assert!(tool().execute(serde_json::json!({})).await.is_err());
    }

    mod redirects {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        /// 只放行 127.0.0.1，localhost 视为白名单外的主机
        fn local_tool() -> WebSearchTool {
            WebSearchTool::new(vec!["127.0.0.1".into()], 5, 1000)
        }

        #[tokio::test]
        async fn redirect_to_unlisted_host_is_refused() {
            let server = MockServer::start().await;
            let port = server.address().port();
            Mock::given(method("GET"))
                .and(path("/docs"))
                .respond_with(
                    ResponseTemplate::new(302)
                        .insert_header("Location", format!("http://localhost:{port}/elsewhere")),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/elsewhere"))
                .respond_with(ResponseTemplate::new(200).set_body_string("leaked"))
                .expect(0)
                .mount(&server)
                .await;

            let err = local_tool()
                .execute(serde_json::json!({"url": format!("{}/docs", server.uri())}))
                .await
                .unwrap_err();
            assert!(err.contains("Domain not in allowlist: localhost"), "{err}");
        }

        #[tokio::test]
        async fn redirect_within_allowlist_is_followed() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/old"))
                .respond_with(
                    ResponseTemplate::new(301)
                        .insert_header("Location", format!("{}/new", server.uri())),
                )
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/new"))
                .respond_with(ResponseTemplate::new(200).set_body_string("aws_s3_bucket docs"))
                .mount(&server)
                .await;

            let out = local_tool()
                .execute(serde_json::json!({"url": format!("{}/old", server.uri())}))
                .await
                .unwrap();
            assert_eq!(out, "aws_s3_bucket docs");
        }
    }
}
