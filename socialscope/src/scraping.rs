use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::Client;
use scraper::{Html, Selector};
use std::io::Cursor;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::UpstreamError;

/// Turns an article URL into its main readable text.
#[async_trait::async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Fetch the page and extract its primary text. Pages with no extractable
    /// content give `Ok("")`; only fetch-level problems are errors.
    async fn extract(&self, url: &str) -> Result<String, UpstreamError>;
}

/// Fetches article pages over HTTP(S) and runs readability extraction on them.
pub struct ArticleScraper {
    client: Client,
    timeout: Duration,
    max_response_bytes: usize,
    allow_private_hosts: bool,
}

impl ArticleScraper {
    pub fn new(cfg: &common::ScrapingConfig) -> Result<Self, UpstreamError> {
        let allow_private_hosts = cfg.allow_private_hosts;
        let redirect = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= 5 {
                attempt.error(BlockedTarget("too many redirects".to_string()))
            } else if !allow_private_hosts && !is_allowed_redirect(attempt.url()) {
                let reason = format!("redirect to non-public target {}", attempt.url());
                attempt.error(BlockedTarget(reason))
            } else {
                attempt.follow()
            }
        });

        let mut builder = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(Duration::from_secs(cfg.timeout_seconds))
            .redirect(redirect);
        if !allow_private_hosts {
            // Hostnames are checked where they are resolved, for the first hop and every redirect
            builder = builder.dns_resolver(Arc::new(PublicOnlyResolver));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(cfg.timeout_seconds),
            max_response_bytes: cfg.max_response_bytes,
            allow_private_hosts,
        })
    }

    /// Download at most `max_response_bytes` of the page body.
    async fn fetch_capped(&self, url: &Url) -> Result<Vec<u8>, UpstreamError> {
        let mut response = self.client.get(url.clone()).send().await.map_err(classify_send_error)?;

        if !response.status().is_success() {
            return Err(UpstreamError::from_response(response).await);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let remaining = self.max_response_bytes - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                warn!("scraping: {} exceeds {} bytes, truncating", url, self.max_response_bytes);
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl ContentExtractor for ArticleScraper {
    async fn extract(&self, url: &str) -> Result<String, UpstreamError> {
        let parsed = Url::parse(url).map_err(|e| UpstreamError::Blocked(format!("invalid URL {}: {}", url, e)))?;
        ensure_fetchable(&parsed, self.allow_private_hosts)?;

        let body = tokio::time::timeout(self.timeout, self.fetch_capped(&parsed))
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let text = extract_main_text(&body, &parsed);
        if text.is_empty() {
            warn!("scraping: could not extract content for {}", url);
        } else {
            info!("scraping: extracted {} chars from {}", text.len(), url);
        }
        Ok(text)
    }
}

/// Extract the primary article text from raw HTML.
///
/// Readability runs first; when it finds nothing, a selector heuristic
/// (`<article>`, `<main>`, common content containers, then every `<p>`) is tried.
/// Returns an empty string when neither finds any text.
pub fn extract_main_text(html: &[u8], url: &Url) -> String {
    if html.is_empty() {
        return String::new();
    }

    let mut reader = Cursor::new(html);
    let from_readability = match readability::extractor::extract(&mut reader, url) {
        Ok(product) => html_to_text(&product.content).or_else(|| non_empty(product.text)),
        Err(e) => {
            debug!("scraping: readability failed for {}: {}", url, e);
            None
        }
    };

    from_readability
        .or_else(|| selector_fallback(&String::from_utf8_lossy(html)))
        .unwrap_or_default()
}

fn html_to_text(html: &str) -> Option<String> {
    match html2text::from_read(html.as_bytes(), 80) {
        Ok(text) => non_empty(text),
        Err(e) => {
            warn!("scraping: failed to convert extracted HTML to text: {}", e);
            None
        }
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn selector_fallback(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let selectors = ["article", "main", ".post-content", ".entry-content", "#content"];
    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            if let Some(text) = html_to_text(&element.html()) {
                debug!("scraping: found content using selector '{}'", selector_str);
                return Some(text);
            }
        }
    }

    let p_selector = Selector::parse("p").ok()?;
    let paragraphs: String = document
        .select(&p_selector)
        .map(|element| element.html())
        .collect::<Vec<_>>()
        .join("\n");
    if paragraphs.is_empty() {
        return None;
    }
    debug!("scraping: fallback to all <p> tags");
    html_to_text(&paragraphs)
}

/// Why a target was refused. Travels through reqwest's error chain so it can
/// be reported as `UpstreamError::Blocked`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BlockedTarget(String);

fn classify_send_error(err: reqwest::Error) -> UpstreamError {
    let mut cause = std::error::Error::source(&err);
    while let Some(inner) = cause {
        if let Some(blocked) = inner.downcast_ref::<BlockedTarget>() {
            return UpstreamError::Blocked(blocked.0.clone());
        }
        cause = inner.source();
    }
    UpstreamError::Transport(err)
}

/// DNS resolver that fails any lookup returning an internal address.
///
/// Runs at connect time inside the request timeout, so the checked
/// addresses are the ones actually dialled.
struct PublicOnlyResolver;

impl Resolve for PublicOnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = resolve_public(&host).await?;
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

async fn resolve_public(host: &str) -> Result<Vec<SocketAddr>, Box<dyn std::error::Error + Send + Sync>> {
    // Port is filled in by the connector
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0)).await?.collect();
    if let Some(internal) = addrs.iter().find(|addr| is_internal_ip(addr.ip())) {
        let reason = format!("{} resolves to internal address {}", host, internal.ip());
        return Err(Box::new(BlockedTarget(reason)));
    }
    Ok(addrs)
}

/// Refuse non-http(s) URLs, literal internal IPs and `localhost` up front.
/// Other hostnames are checked by `PublicOnlyResolver`.
fn ensure_fetchable(url: &Url, allow_private_hosts: bool) -> Result<(), UpstreamError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(UpstreamError::Blocked(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host().is_none() {
        return Err(UpstreamError::Blocked(format!("URL has no host: {}", url)));
    }
    if !allow_private_hosts && !is_public_target(url) {
        return Err(UpstreamError::Blocked(format!("{} is not a public address", url)));
    }
    Ok(())
}

/// Rejects literal internal IPs and `localhost`.
fn is_public_target(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain != "localhost" && !domain.ends_with(".localhost")
        }
        _ => is_allowed_redirect(url),
    }
}

/// Redirect check. Literal IPs never reach the resolver, so they are
/// checked here; hostnames are left to `PublicOnlyResolver`.
fn is_allowed_redirect(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(url::Host::Ipv4(ip)) => !is_internal_ip(IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => !is_internal_ip(IpAddr::V6(ip)),
        Some(url::Host::Domain(_)) => true,
        None => false,
    }
}

pub(crate) fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_multicast()
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (64..=127).contains(&b))
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal_ip(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 unique local, fe80::/10 link local
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://news.example.com/2024/ev-report").expect("url")
    }

    #[test]
    fn extracts_article_body() {
        let html = r#"<html><head><title>EV report</title></head><body>
            <nav><a href="/">Home</a> | <a href="/world">World</a></nav>
            <article>
              <h1>Electric vehicle sales reach a new record</h1>
              <p>Global sales of electric vehicles reached a new record in the last quarter, according to industry figures released on Monday morning.</p>
              <p>Analysts attribute the growth to falling battery prices, expanding charging networks and generous purchase incentives in several large markets.</p>
              <p>Manufacturers expect the trend to continue as more affordable models arrive in showrooms over the coming year, especially in Europe and Asia.</p>
            </article>
            <footer>Copyright Example News</footer>
            </body></html>"#;

        let text = extract_main_text(html.as_bytes(), &page_url());
        assert!(text.contains("falling battery prices"), "got: {}", text);
    }

    #[test]
    fn empty_or_malformed_html_gives_empty_text() {
        assert_eq!(extract_main_text(b"", &page_url()), "");
        assert_eq!(extract_main_text(b"<html><body></body></html>", &page_url()), "");
        assert_eq!(
            extract_main_text(b"<html><head><title></title></head><body><div><span></div></body>", &page_url()),
            ""
        );
    }

    #[test]
    fn selector_fallback_reads_paragraphs() {
        let html = "<div><p>First paragraph of text.</p><p>Second paragraph.</p></div>";
        let text = selector_fallback(html).expect("paragraph text");
        assert!(text.contains("First paragraph of text."));
        assert!(text.contains("Second paragraph."));
    }

    #[test]
    fn internal_addresses_are_detected() {
        for ip in ["127.0.0.1", "10.1.2.3", "192.168.0.10", "172.16.5.4", "169.254.169.254", "0.0.0.0", "100.64.1.1", "::1", "fd00::1", "fe80::1", "::ffff:127.0.0.1"] {
            assert!(is_internal_ip(ip.parse().expect("ip")), "{} should be internal", ip);
        }
        for ip in ["93.184.216.34", "8.8.8.8", "2606:4700:4700::1111"] {
            assert!(!is_internal_ip(ip.parse().expect("ip")), "{} should be public", ip);
        }
    }

    #[test]
    fn up_front_checks_reject_literal_internal_targets() {
        assert!(is_public_target(&Url::parse("https://example.com/a").expect("url")));
        assert!(!is_public_target(&Url::parse("http://localhost:8080/").expect("url")));
        assert!(!is_public_target(&Url::parse("http://127.0.0.1/").expect("url")));
        assert!(!is_public_target(&Url::parse("http://[::1]/").expect("url")));
        assert!(!is_public_target(&Url::parse("file:///etc/passwd").expect("url")));

        assert!(!is_allowed_redirect(&Url::parse("http://10.0.0.1/").expect("url")));
        assert!(!is_allowed_redirect(&Url::parse("ftp://example.com/").expect("url")));
        assert!(is_allowed_redirect(&Url::parse("https://93.184.216.34/").expect("url")));
    }

    #[test]
    fn blocks_internal_and_non_http_urls() {
        let url = Url::parse("http://127.0.0.1:9/admin").expect("url");
        assert!(matches!(ensure_fetchable(&url, false), Err(UpstreamError::Blocked(_))));
        assert!(ensure_fetchable(&url, true).is_ok());

        let url = Url::parse("ftp://example.com/file").expect("url");
        assert!(matches!(ensure_fetchable(&url, true), Err(UpstreamError::Blocked(_))));
    }

    #[tokio::test]
    async fn resolver_refuses_internal_hostnames() {
        let err = resolve_public("localhost").await.expect_err("localhost is internal");
        assert!(err.to_string().contains("internal address"), "got: {}", err);
        assert!(err.downcast_ref::<BlockedTarget>().is_some());
    }

    #[tokio::test]
    async fn redirect_to_internal_hostname_is_refused() {
        let mut server = mockito::Server::new_async().await;
        let port = server.socket_address().port();
        let admin = server
            .mock("GET", "/admin")
            .with_status(200)
            .with_body("secret")
            .expect(0)
            .create_async()
            .await;
        let _start = server
            .mock("GET", "/start")
            .with_status(302)
            .with_header("location", &format!("http://localhost:{}/admin", port))
            .create_async()
            .await;

        let scraper = ArticleScraper::new(&common::ScrapingConfig::default()).expect("scraper");
        // Literal-IP first hop, so only the redirect's hostname goes through the resolver
        let start = Url::parse(&format!("http://127.0.0.1:{}/start", port)).expect("url");
        let err = scraper.fetch_capped(&start).await.expect_err("redirect must be refused");

        assert!(matches!(err, UpstreamError::Blocked(_)), "got: {:?}", err);
        admin.assert_async().await;
    }
}
