//! Ranked web search backends and the fallback chain that drives them.

use rand::seq::SliceRandom;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;

const DUCKDUCKGO_URL: &str = "https://html.duckduckgo.com/html/";
const BRAVE_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const TAVILY_URL: &str = "https://api.tavily.com/search";
const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";

const RESULTS_PER_QUERY: usize = 10;

pub(crate) const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/109.0",
];

pub(crate) fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("bot detection triggered: {0}")]
    BotDetected(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SearchError {
    /// Whether the next backend in the chain may be tried for the same query.
    pub fn permits_fallback(&self) -> bool {
        !matches!(self, SearchError::InvalidQuery(_))
    }

    /// Whether the backend should be skipped for the rest of the invocation.
    pub fn disables_backend(&self) -> bool {
        matches!(self, SearchError::QuotaExhausted(_) | SearchError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout(err.to_string())
        } else {
            SearchError::Network(err.to_string())
        }
    }
}

pub trait SearchBackend {
    fn name(&self) -> &str;
    fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

pub(crate) fn http_client(timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

// --- DuckDuckGo (HTML endpoint, no key) ---

pub struct DuckDuckGo {
    client: reqwest::blocking::Client,
}

impl DuckDuckGo {
    pub fn new(timeout: Duration) -> Self {
        Self { client: http_client(timeout) }
    }
}

impl SearchBackend for DuckDuckGo {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let response = self
            .client
            .post(DUCKDUCKGO_URL)
            .header("User-Agent", random_user_agent())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://html.duckduckgo.com/")
            .form(&[("q", query), ("b", "")])
            .send()?;

        match response.status().as_u16() {
            200 => {}
            202 => return Err(SearchError::BotDetected("DuckDuckGo returned HTTP 202".into())),
            429 => return Err(SearchError::BotDetected("DuckDuckGo rate limited (HTTP 429)".into())),
            code => return Err(SearchError::Network(format!("DuckDuckGo returned HTTP {}", code))),
        }

        let html = response.text()?;
        if html.to_lowercase().contains("anomaly") || html.contains("challenge-form") {
            return Err(SearchError::BotDetected("DuckDuckGo challenge page".into()));
        }
        Ok(parse_duckduckgo_html(&html))
    }
}

pub fn parse_duckduckgo_html(html: &str) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for block in document.select(&result_sel) {
        let Some(link) = block.select(&link_sel).next() else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default();
        let Some(url) = resolve_duckduckgo_href(href) else {
            continue;
        };
        let title = collapse_whitespace(&link.text().collect::<Vec<_>>().join(" "));
        let snippet = block
            .select(&snippet_sel)
            .next()
            .map(|s| collapse_whitespace(&s.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default();
        hits.push(SearchHit { title, url, snippet });
    }
    hits
}

/// DuckDuckGo wraps results in `//duckduckgo.com/l/?uddg=<encoded target>`.
fn resolve_duckduckgo_href(href: &str) -> Option<String> {
    if href.is_empty() {
        return None;
    }
    let base = Url::parse("https://duckduckgo.com/").ok()?;
    let parsed = base.join(href).ok()?;
    if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    if parsed.host_str().is_some_and(|h| h.ends_with("duckduckgo.com")) {
        return None;
    }
    Some(parsed.to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- Brave Search API ---

pub struct Brave {
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Default, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: BraveWeb,
}

#[derive(Debug, Default, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

impl Brave {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: http_client(timeout),
        }
    }
}

impl SearchBackend for Brave {
    fn name(&self) -> &str {
        "brave"
    }

    fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let count = RESULTS_PER_QUERY.to_string();
        let response = self
            .client
            .get(BRAVE_URL)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()?;

        match response.status().as_u16() {
            200 => {}
            402 | 429 => return Err(SearchError::QuotaExhausted("Brave usage limit exceeded".into())),
            401 => return Err(SearchError::Unauthorized("Brave API key rejected".into())),
            422 => return Err(SearchError::InvalidQuery("Brave rejected the query".into())),
            code => return Err(SearchError::Network(format!("Brave returned HTTP {}", code))),
        }
        parse_brave(&response.text()?)
    }
}

pub fn parse_brave(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let data: BraveResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;
    Ok(data
        .web
        .results
        .into_iter()
        .map(|r| SearchHit {
            title: r.title,
            url: r.url,
            snippet: r.description,
        })
        .collect())
}

// --- Tavily ---

pub struct Tavily {
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl Tavily {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: http_client(timeout),
        }
    }
}

impl SearchBackend for Tavily {
    fn name(&self) -> &str {
        "tavily"
    }

    fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "search_depth": "basic",
            "max_results": RESULTS_PER_QUERY,
        });
        let response = self.client.post(TAVILY_URL).json(&body).send()?;

        match response.status().as_u16() {
            200 => {}
            429 | 432 | 433 => return Err(SearchError::QuotaExhausted("Tavily plan limit reached".into())),
            401 => return Err(SearchError::Unauthorized("Tavily API key rejected".into())),
            400 => return Err(SearchError::InvalidQuery("Tavily rejected the query".into())),
            code => return Err(SearchError::Network(format!("Tavily returned HTTP {}", code))),
        }
        parse_tavily(&response.text()?)
    }
}

pub fn parse_tavily(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let data: TavilyResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;
    Ok(data
        .results
        .into_iter()
        .map(|r| SearchHit {
            title: r.title,
            url: r.url,
            snippet: r.content,
        })
        .collect())
}

// --- Google Custom Search ---

pub struct GoogleCse {
    api_key: String,
    cx: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleCseResponse {
    #[serde(default)]
    items: Vec<GoogleCseItem>,
}

#[derive(Debug, Deserialize)]
struct GoogleCseItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleCse {
    pub fn new(api_key: &str, cx: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            cx: cx.to_string(),
            client: http_client(timeout),
        }
    }
}

impl SearchBackend for GoogleCse {
    fn name(&self) -> &str {
        "google_cse"
    }

    fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let num = RESULTS_PER_QUERY.to_string();
        let response = self
            .client
            .get(GOOGLE_CSE_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()?;

        match response.status().as_u16() {
            200 => {}
            429 | 403 => return Err(SearchError::QuotaExhausted("Google CSE quota exceeded".into())),
            401 => return Err(SearchError::Unauthorized("Google CSE API key rejected".into())),
            400 => {
                let text = response.text().unwrap_or_default();
                return Err(SearchError::InvalidQuery(format!("Google CSE bad request: {}", text)));
            }
            code => return Err(SearchError::Network(format!("Google CSE returned HTTP {}", code))),
        }
        parse_google_cse(&response.text()?)
    }
}

pub fn parse_google_cse(body: &str) -> Result<Vec<SearchHit>, SearchError> {
    let data: GoogleCseResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Malformed(e.to_string()))?;
    Ok(data
        .items
        .into_iter()
        .map(|r| SearchHit {
            title: r.title,
            url: r.link,
            snippet: r.snippet,
        })
        .collect())
}

// --- Fallback chain ---

#[derive(Debug, Clone)]
pub struct BackendFailure {
    pub backend: String,
    pub error: SearchError,
}

#[derive(Debug, Default)]
pub struct ChainResult {
    pub answered_by: Option<String>,
    pub hits: Vec<SearchHit>,
    pub failures: Vec<BackendFailure>,
}

/// Ranked backends tried in order for each query.
///
/// Every query starts again from the top; a backend that reported quota exhaustion
/// or a rejected key stays skipped until the chain is dropped.
pub struct SearchChain {
    backends: Vec<Box<dyn SearchBackend>>,
    disabled: HashSet<String>,
}

impl SearchChain {
    pub fn new(backends: Vec<Box<dyn SearchBackend>>) -> Self {
        Self {
            backends,
            disabled: HashSet::new(),
        }
    }

    /// DuckDuckGo always; keyed backends only when their keys are configured.
    pub fn from_settings(settings: &Settings) -> Self {
        let timeout = settings.http_timeout;
        let mut backends: Vec<Box<dyn SearchBackend>> = vec![Box::new(DuckDuckGo::new(timeout))];
        if let Some(key) = &settings.brave_api_key {
            backends.push(Box::new(Brave::new(key, timeout)));
        }
        if let Some(key) = &settings.tavily_api_key {
            backends.push(Box::new(Tavily::new(key, timeout)));
        }
        if let (Some(key), Some(cx)) = (&settings.google_cse_api_key, &settings.google_cse_cx) {
            backends.push(Box::new(GoogleCse::new(key, cx, timeout)));
        }
        Self::new(backends)
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.backends.iter().all(|b| self.disabled.contains(b.name()))
    }

    pub fn run(&mut self, query: &str) -> ChainResult {
        let mut result = ChainResult::default();

        for backend in &self.backends {
            let name = backend.name().to_string();
            if self.disabled.contains(&name) {
                debug!(backend = %name, "skipping disabled backend");
                continue;
            }

            match backend.search(query) {
                Ok(hits) => {
                    info!(backend = %name, count = hits.len(), query, "search answered");
                    result.answered_by = Some(name);
                    result.hits = hits;
                    return result;
                }
                Err(error) => {
                    warn!(backend = %name, error = %error, query, "search backend failed");
                    if error.disables_backend() {
                        self.disabled.insert(name.clone());
                    }
                    let stop = !error.permits_fallback();
                    result.failures.push(BackendFailure { backend: name, error });
                    if stop {
                        break;
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Backend that replays scripted responses and records the queries it saw.
    pub struct ScriptedBackend {
        pub name: &'static str,
        pub responses: RefCell<VecDeque<Result<Vec<SearchHit>, SearchError>>>,
        pub calls: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedBackend {
        pub fn new(
            name: &'static str,
            responses: Vec<Result<Vec<SearchHit>, SearchError>>,
        ) -> (Self, Rc<RefCell<Vec<String>>>) {
            let calls = Rc::new(RefCell::new(Vec::new()));
            let backend = Self {
                name,
                responses: RefCell::new(responses.into()),
                calls: Rc::clone(&calls),
            };
            (backend, calls)
        }
    }

    impl SearchBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
            self.calls.borrow_mut().push(query.to_string());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub fn hit(title: &str, url: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            snippet: String::new(),
        }
    }

    #[test]
    fn test_falls_back_on_bot_detection() {
        let (ddg, ddg_calls) = ScriptedBackend::new(
            "duckduckgo",
            vec![Err(SearchError::BotDetected("202".into()))],
        );
        let (brave, _) = ScriptedBackend::new("brave", vec![Ok(vec![hit("a", "https://x")])]);
        let mut chain = SearchChain::new(vec![Box::new(ddg), Box::new(brave)]);

        let result = chain.run("q1");
        assert_eq!(result.answered_by.as_deref(), Some("brave"));
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(ddg_calls.borrow().len(), 1);
    }

    #[test]
    fn test_each_query_restarts_at_top() {
        let (ddg, ddg_calls) = ScriptedBackend::new(
            "duckduckgo",
            vec![Err(SearchError::Timeout("slow".into())), Ok(vec![hit("b", "https://y")])],
        );
        let (brave, _) = ScriptedBackend::new("brave", vec![Ok(vec![])]);
        let mut chain = SearchChain::new(vec![Box::new(ddg), Box::new(brave)]);

        assert_eq!(chain.run("q1").answered_by.as_deref(), Some("brave"));
        assert_eq!(chain.run("q2").answered_by.as_deref(), Some("duckduckgo"));
        assert_eq!(*ddg_calls.borrow(), vec!["q1", "q2"]);
    }

    #[test]
    fn test_quota_exhausted_backend_stays_disabled() {
        let (brave, brave_calls) = ScriptedBackend::new(
            "brave",
            vec![Err(SearchError::QuotaExhausted("402".into()))],
        );
        let (tavily, _) = ScriptedBackend::new("tavily", vec![Ok(vec![]), Ok(vec![])]);
        let mut chain = SearchChain::new(vec![Box::new(brave), Box::new(tavily)]);

        chain.run("q1");
        let second = chain.run("q2");
        assert_eq!(second.answered_by.as_deref(), Some("tavily"));
        assert!(second.failures.is_empty());
        assert_eq!(brave_calls.borrow().len(), 1);
    }

    #[test]
    fn test_invalid_query_stops_the_chain() {
        let (cse, _) = ScriptedBackend::new(
            "google_cse",
            vec![Err(SearchError::InvalidQuery("400".into()))],
        );
        let (other, other_calls) = ScriptedBackend::new("tavily", vec![Ok(vec![])]);
        let mut chain = SearchChain::new(vec![Box::new(cse), Box::new(other)]);

        let result = chain.run("q");
        assert!(result.answered_by.is_none());
        assert_eq!(result.failures.len(), 1);
        assert!(other_calls.borrow().is_empty());
    }

    #[test]
    fn test_all_backends_failing_reports_every_failure() {
        let (a, _) = ScriptedBackend::new("duckduckgo", vec![Err(SearchError::Network("down".into()))]);
        let (b, _) = ScriptedBackend::new("brave", vec![Err(SearchError::Unauthorized("401".into()))]);
        let mut chain = SearchChain::new(vec![Box::new(a), Box::new(b)]);

        let result = chain.run("q");
        assert!(result.answered_by.is_none());
        assert_eq!(result.failures.len(), 2);
        assert!(!chain.is_exhausted());
    }

    #[test]
    fn test_error_classification() {
        assert!(SearchError::BotDetected(String::new()).permits_fallback());
        assert!(SearchError::Malformed(String::new()).permits_fallback());
        assert!(!SearchError::InvalidQuery(String::new()).permits_fallback());
        assert!(SearchError::Unauthorized(String::new()).disables_backend());
        assert!(!SearchError::Timeout(String::new()).disables_backend());
    }

    #[test]
    fn test_parse_duckduckgo_results() {
        let html = r#"
            <div class="result results_links">
              <h2><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.linkedin.com%2Fin%2Fjane-doe&amp;rut=abc">Jane Doe - Technical Recruiter - Acme | LinkedIn</a></h2>
              <a class="result__snippet">Recruiting engineers at  Acme.</a>
            </div>
            <div class="result">
              <h2><a class="result__a" href="https://example.com/page">Example</a></h2>
            </div>
        "#;
        let hits = parse_duckduckgo_html(html);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.linkedin.com/in/jane-doe");
        assert_eq!(hits[0].title, "Jane Doe - Technical Recruiter - Acme | LinkedIn");
        assert_eq!(hits[0].snippet, "Recruiting engineers at Acme.");
        assert_eq!(hits[1].url, "https://example.com/page");
    }

    #[test]
    fn test_parse_api_payloads() {
        let brave = r#"{"web":{"results":[{"title":"T","url":"https://a","description":"d"}]}}"#;
        assert_eq!(parse_brave(brave).unwrap()[0].snippet, "d");
        assert!(parse_brave("{}").unwrap().is_empty());

        let tavily = r#"{"results":[{"title":"T","url":"https://b","content":"c"}]}"#;
        assert_eq!(parse_tavily(tavily).unwrap()[0].url, "https://b");

        let cse = r#"{"items":[{"title":"T","link":"https://c","snippet":"s"}]}"#;
        assert_eq!(parse_google_cse(cse).unwrap()[0].url, "https://c");
        assert!(parse_google_cse("{}").unwrap().is_empty());

        assert!(matches!(parse_tavily("not json"), Err(SearchError::Malformed(_))));
    }

    #[test]
    fn test_chain_from_settings_includes_only_configured_backends() {
        let mut settings = Settings::for_tests();
        settings.tavily_api_key = Some("tvly".into());
        settings.google_cse_api_key = Some("key".into());
        let chain = SearchChain::from_settings(&settings);
        assert_eq!(chain.backend_names(), vec!["duckduckgo", "tavily"]);
    }
}
