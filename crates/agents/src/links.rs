//! Link context: pull URLs out of a message and fetch them as untrusted.

use std::time::Instant;

use {
    futures::future::join_all,
    parley_httpservice::{CallDeadline, UpstreamClient, UpstreamError},
    parley_metrics::{Metrics, outcome},
    tracing::{debug, warn},
    url::Url,
};

/// Characters of extracted text kept per link.
pub const MAX_LINK_CHARS: usize = 8_000;

/// Text of one fetched link, ready for the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkContext {
    pub url: String,
    pub content: String,
    pub truncated: bool,
}

/// Distinct http(s) URLs in `message`, in order of appearance, at most `max`.
#[must_use]
pub fn extract_links(message: &str, max: usize) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for token in message.split_whitespace() {
        if links.len() >= max {
            break;
        }
        // Markdown links: [label](https://...)
        let token = token
            .find("](")
            .map_or(token, |i| &token[i + 2..])
            .trim_start_matches(['<', '(', '"', '\''])
            .trim_end_matches(['>', ')', '"', '\'', '.', ',', ';', ':', '!', '?']);
        if !(token.starts_with("http://") || token.starts_with("https://")) {
            continue;
        }
        let Ok(url) = Url::parse(token) else {
            continue;
        };
        if url.host_str().is_none() {
            continue;
        }
        let url = url.to_string();
        if !links.contains(&url) {
            links.push(url);
        }
    }
    links
}

/// Fetch every link concurrently through the untrusted client. Failures are
/// logged and metered, never fatal to the run.
pub async fn fetch_links(
    client: &UpstreamClient,
    urls: &[String],
    deadline: &CallDeadline,
    metrics: &Metrics,
) -> Vec<LinkContext> {
    let fetches = urls.iter().map(|url| async move {
        let started = Instant::now();
        let result = client.fetch_resource(url, deadline).await;
        let label = match &result {
            Ok(_) => outcome::SUCCESS,
            Err(UpstreamError::Blocked(_)) => outcome::BLOCKED,
            Err(UpstreamError::Timeout { .. }) => outcome::TIMEOUT,
            Err(UpstreamError::Cancelled) => outcome::CANCELLED,
            Err(e) if e.is_transient() => outcome::TRANSIENT_ERROR,
            Err(_) => outcome::PERMANENT_ERROR,
        };
        metrics.record_untrusted_fetch(label, started.elapsed());

        match result {
            Ok(resource) => {
                let content = extract_content(&resource.body, &resource.content_type);
                let (content, cut) = truncate_chars(&content, MAX_LINK_CHARS);
                debug!(url = %resource.url, chars = content.len(), "fetched link");
                Some(LinkContext {
                    url: url.clone(),
                    content,
                    truncated: resource.truncated || cut,
                })
            },
            Err(e) => {
                warn!(%url, error = %e, "link fetch failed, continuing without it");
                None
            },
        }
    });
    join_all(fetches).await.into_iter().flatten().collect()
}

/// Readable text for a fetched body, by content type.
#[must_use]
pub fn extract_content(body: &str, content_type: &str) -> String {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("json") {
        return serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| body.to_string());
    }
    if ct.contains("html") {
        return html_to_text(body);
    }
    body.trim().to_string()
}

const BLOCK_TAGS: &[&str] = &[
    "<br", "<p", "</p", "<div", "</div", "<h", "</h", "<li", "<tr", "</tr",
];

/// Strip tags, drop script and style bodies, decode common entities and
/// collapse whitespace.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut skip_until: Option<&'static str> = None;
    let mut last_space = false;

    let mut i = 0;
    while i < html.len() {
        let rest = &html[i..];
        let rest_lower = &lower[i..];

        if let Some(close) = skip_until {
            match rest_lower.find(close) {
                Some(at) => {
                    i += at + close.len();
                    skip_until = None;
                },
                None => break,
            }
            continue;
        }

        if rest.starts_with('<') {
            if rest_lower.starts_with("<script") {
                skip_until = Some("</script>");
                continue;
            }
            if rest_lower.starts_with("<style") {
                skip_until = Some("</style>");
                continue;
            }
            if BLOCK_TAGS.iter().any(|t| rest_lower.starts_with(t)) && !out.ends_with('\n') {
                out.push('\n');
                last_space = true;
            }
            in_tag = true;
            i += 1;
            continue;
        }
        if in_tag {
            if rest.starts_with('>') {
                in_tag = false;
            }
            i += rest.chars().next().map_or(1, char::len_utf8);
            continue;
        }

        if rest.starts_with('&')
            && let Some((semi, _)) = rest.char_indices().take(10).find(|&(_, c)| c == ';')
            && let Some(decoded) = decode_entity(&rest[..=semi])
        {
            out.push_str(decoded);
            last_space = decoded == " ";
            i += semi + 1;
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
        i += ch.len_utf8();
    }

    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entity(entity: &str) -> Option<&'static str> {
    Some(match entity {
        "&amp;" => "&",
        "&lt;" => "<",
        "&gt;" => ">",
        "&quot;" => "\"",
        "&apos;" | "&#39;" => "'",
        "&nbsp;" | "&#160;" => " ",
        _ => return None,
    })
}

fn truncate_chars(s: &str, max: usize) -> (String, bool) {
    match s.char_indices().nth(max) {
        Some((at, _)) => (s[..at].to_string(), true),
        None => (s.to_string(), false),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{Router, http::header, routing::get},
        parley_config::HttpConfig,
        parley_httpservice::{DefaultHttpServiceFactory, HttpServiceFactory, TrustLevel},
        parley_metrics::InstanceInfo,
        rstest::rstest,
    };

    #[rstest]
    #[case("see https://example.com/a.", vec!["https://example.com/a"])]
    #[case("[docs](https://docs.rs/tokio) and <https://crates.io/>", vec!["https://docs.rs/tokio", "https://crates.io/"])]
    #[case("dup https://a.io/x https://a.io/x", vec!["https://a.io/x"])]
    #[case("ftp://files.example.com/x javascript:alert(1)", vec![])]
    #[case("no links here", vec![])]
    fn extracts_links(#[case] message: &str, #[case] expected: Vec<&str>) {
        assert_eq!(extract_links(message, 5), expected);
    }

    #[test]
    fn link_count_is_bounded() {
        let message = (0..10)
            .map(|i| format!("https://example.com/{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(extract_links(&message, 3).len(), 3);
        assert!(extract_links(&message, 0).is_empty());
    }

    #[test]
    fn html_is_flattened() {
        let html = "<html><head><style>p{color:red}</style><script>var x = '<p>';</script></head>\
                    <body><h1>Title</h1><p>Fish &amp; chips&nbsp;&lt;3</p><div>caf\u{e9}   bar</div></body></html>";
        assert_eq!(html_to_text(html), "Title\nFish & chips <3\ncaf\u{e9} bar");
    }

    #[test]
    fn unknown_entities_pass_through() {
        assert_eq!(html_to_text("a &copy; b & c"), "a &copy; b & c");
    }

    #[test]
    fn content_extraction_by_type() {
        assert_eq!(extract_content("{\"a\":1}", "application/json"), "{\n  \"a\": 1\n}");
        assert_eq!(extract_content("<b>hi</b>", "text/html; charset=utf-8"), "hi");
        assert_eq!(extract_content("  plain  ", "text/plain"), "plain");
    }

    #[tokio::test]
    async fn failed_fetches_are_skipped() {
        let app = Router::new()
            .route(
                "/ok",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<p>hello</p>") }),
            )
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = DefaultHttpServiceFactory::new(HttpConfig {
            allow_private_networks: true,
            ..Default::default()
        })
        .make_client(TrustLevel::Untrusted)
        .unwrap();
        let metrics = Metrics::new(InstanceInfo::new("test", "0.0.0")).unwrap();
        let urls = vec![format!("http://{addr}/ok"), format!("http://{addr}/missing")];

        let links = fetch_links(&client, &urls, &CallDeadline::unbounded(), &metrics).await;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].content, "hello");
        assert_eq!(metrics.snapshot().categories.fetch.total, 2);
        assert_eq!(metrics.snapshot().categories.fetch.errors, 1);
    }
}
