use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::models::Platform;
use crate::search::random_user_agent;

pub const MAX_TEXT_CHARS: usize = 8_000;

// Challenge and login interstitials are short; real postings are not.
const INTERSTITIAL_MAX_CHARS: usize = 2_000;

const NOISE_TAGS: [&str; 10] = [
    "script", "style", "noscript", "header", "nav", "footer", "aside", "form", "iframe", "svg",
];

const WORKDAY_READY_SELECTOR: &str =
    "[data-automation-id='jobPostingDescription'], .job-description, article, main";

static GREENHOUSE_JOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"greenhouse\.io/([^/?#]+)/jobs/(\d+)").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("page requires sign-in: {0}")]
    AuthWall(String),

    #[error("blocked by bot protection: {0}")]
    BotDetected(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("no text extracted from {0}")]
    EmptyContent(String),

    #[error("unsupported URL for {platform}: {url}")]
    UnsupportedPlatform { platform: Platform, url: String },
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScrapeError::Timeout(err.to_string())
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPage {
    pub url: String,
    pub platform: Platform,
    pub page_title: String,
    pub raw_text: String,
}

/// Page title and extracted text, before validation and truncation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPage {
    pub page_title: String,
    pub text: String,
}

pub trait ScrapeStrategy {
    fn name(&self) -> &str;
    fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError>;
}

/// Routes each platform to exactly one strategy. No cross-strategy retry.
pub struct Dispatcher {
    greenhouse: Box<dyn ScrapeStrategy>,
    lever: Box<dyn ScrapeStrategy>,
    workday: Box<dyn ScrapeStrategy>,
    generic: Box<dyn ScrapeStrategy>,
}

impl Dispatcher {
    pub fn new(settings: &Settings) -> Self {
        Self::with_strategies(
            Box::new(GreenhouseApi::new(settings.http_timeout)),
            Box::new(LeverPage::new(settings.http_timeout)),
            Box::new(BrowserPage::workday(&settings.webdriver_url)),
            Box::new(BrowserPage::generic(&settings.webdriver_url)),
        )
    }

    pub fn with_strategies(
        greenhouse: Box<dyn ScrapeStrategy>,
        lever: Box<dyn ScrapeStrategy>,
        workday: Box<dyn ScrapeStrategy>,
        generic: Box<dyn ScrapeStrategy>,
    ) -> Self {
        Self { greenhouse, lever, workday, generic }
    }

    fn strategy_for(&self, platform: Platform) -> &dyn ScrapeStrategy {
        match platform {
            Platform::Greenhouse => self.greenhouse.as_ref(),
            Platform::Lever => self.lever.as_ref(),
            Platform::Workday => self.workday.as_ref(),
            Platform::Generic => self.generic.as_ref(),
        }
    }

    pub fn scrape(&self, url: &str, platform: Platform) -> Result<ScrapedPage, ScrapeError> {
        let strategy = self.strategy_for(platform);
        info!(url, %platform, strategy = strategy.name(), "scraping job page");

        let fetched = strategy.fetch(url).inspect_err(|e| {
            warn!(url, %platform, error = %e, "scrape failed");
        })?;

        let text = fetched.text.trim();
        if text.is_empty() {
            return Err(ScrapeError::EmptyContent(url.to_string()));
        }
        check_interstitial(url, text)?;

        let raw_text = truncate_chars(text, MAX_TEXT_CHARS);
        debug!(url, chars = raw_text.chars().count(), "scrape complete");

        Ok(ScrapedPage {
            url: url.to_string(),
            platform,
            page_title: fetched.page_title.trim().to_string(),
            raw_text,
        })
    }
}

fn check_interstitial(url: &str, text: &str) -> Result<(), ScrapeError> {
    if text.chars().count() > INTERSTITIAL_MAX_CHARS {
        return Ok(());
    }
    let lower = text.to_lowercase();
    if ["captcha", "verify you are human", "are you a robot", "unusual traffic"]
        .iter()
        .any(|m| lower.contains(m))
    {
        return Err(ScrapeError::BotDetected(url.to_string()));
    }
    if ["sign in", "log in", "login"].iter().any(|m| lower.contains(m)) {
        return Err(ScrapeError::AuthWall(url.to_string()));
    }
    Ok(())
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn check_status(status: reqwest::StatusCode, url: &str) -> Result<(), ScrapeError> {
    match status.as_u16() {
        200..=299 => Ok(()),
        401 => Err(ScrapeError::AuthWall(format!("HTTP 401 from {}", url))),
        403 | 429 => Err(ScrapeError::BotDetected(format!("HTTP {} from {}", status.as_u16(), url))),
        code => Err(ScrapeError::Network(format!("HTTP {} from {}", code, url))),
    }
}

fn http_client(timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(random_user_agent())
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

/// Visible text of an HTML document, one text run per line, noise elements skipped.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_noise = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| NOISE_TAGS.contains(&e.name()))
        });
        if in_noise {
            continue;
        }
        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
    }

    BLANK_RUNS.replace_all(&lines.join("\n"), "\n\n").into_owned()
}

// --- Greenhouse: public boards API ---

pub struct GreenhouseApi {
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    #[serde(default)]
    title: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    offices: Vec<GreenhouseOffice>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct GreenhouseOffice {
    #[serde(default)]
    name: String,
}

impl GreenhouseApi {
    pub fn new(timeout: Duration) -> Self {
        Self { client: http_client(timeout) }
    }
}

pub fn greenhouse_ids(url: &str) -> Option<(String, String)> {
    GREENHOUSE_JOB
        .captures(url)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

impl ScrapeStrategy for GreenhouseApi {
    fn name(&self) -> &str {
        "greenhouse-api"
    }

    fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        let (board, job_id) = greenhouse_ids(url).ok_or_else(|| ScrapeError::UnsupportedPlatform {
            platform: Platform::Greenhouse,
            url: url.to_string(),
        })?;
        let api_url = format!(
            "https://boards-api.greenhouse.io/v1/boards/{}/jobs/{}",
            board, job_id
        );

        let response = self.client.get(&api_url).send()?;
        check_status(response.status(), &api_url)?;
        let body = response.text()?;
        parse_greenhouse_job(&board, &body)
    }
}

pub fn parse_greenhouse_job(board: &str, body: &str) -> Result<FetchedPage, ScrapeError> {
    let job: GreenhouseJob = serde_json::from_str(body)
        .map_err(|e| ScrapeError::Network(format!("unexpected Greenhouse payload: {}", e)))?;

    let company = job
        .company_name
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| board.to_string());
    let location = job
        .offices
        .iter()
        .map(|o| o.name.as_str())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    // `content` arrives entity-encoded; the first parse yields the real markup.
    let markup: String = Html::parse_fragment(&job.content)
        .root_element()
        .text()
        .collect();
    let description = clean_html(&markup);

    Ok(FetchedPage {
        page_title: format!("{} at {}", job.title, company),
        text: format!(
            "Job Title: {}\nCompany: {}\nLocation: {}\n\n{}",
            job.title, company, location, description
        ),
    })
}

// --- Lever: server-rendered HTML with JSON-LD metadata ---

pub struct LeverPage {
    client: reqwest::blocking::Client,
}

impl LeverPage {
    pub fn new(timeout: Duration) -> Self {
        Self { client: http_client(timeout) }
    }
}

impl ScrapeStrategy for LeverPage {
    fn name(&self) -> &str {
        "lever-html"
    }

    fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        let response = self.client.get(url).send()?;
        check_status(response.status(), url)?;
        let html = response.text()?;
        Ok(parse_lever_page(&html))
    }
}

pub fn parse_lever_page(html: &str) -> FetchedPage {
    let document = Html::parse_document(html);

    let mut title = String::new();
    let mut company = String::new();
    let mut location = String::new();
    if let Ok(sel) = Selector::parse("script[type='application/ld+json']") {
        if let Some(script) = document.select(&sel).next() {
            let raw: String = script.text().collect();
            if let Ok(ld) = serde_json::from_str::<serde_json::Value>(&raw) {
                title = ld["title"].as_str().unwrap_or_default().to_string();
                company = ld["hiringOrganization"]["name"].as_str().unwrap_or_default().to_string();
                location = ld["jobLocation"]["address"]["addressLocality"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
            }
        }
    }

    let page_title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("{} at {}", title, company));

    let sections: Vec<String> = Selector::parse("div.section.page-centered")
        .map(|sel| document.select(&sel).map(|s| clean_html(&s.html())).collect())
        .unwrap_or_default();

    // The last block is the privacy notice whenever there is more than one.
    let description = match sections.len() {
        0 => clean_html(html),
        1 => sections[0].clone(),
        n => sections[..n - 1].join("\n\n"),
    };
    if description.trim().is_empty() {
        return FetchedPage { page_title, text: String::new() };
    }

    if title.is_empty() {
        title = page_title.clone();
    }

    FetchedPage {
        page_title,
        text: format!(
            "Job Title: {}\nCompany: {}\nLocation: {}\n\n{}",
            title, company, location, description
        ),
    }
}

// --- WebDriver-rendered pages (Workday, everything else) ---

pub struct BrowserPage {
    webdriver_url: String,
    page_timeout: Duration,
    ready_selector: Option<&'static str>,
    ready_wait: Duration,
    settle: Duration,
    label: &'static str,
}

impl BrowserPage {
    pub fn workday(webdriver_url: &str) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
            page_timeout: Duration::from_secs(60),
            ready_selector: Some(WORKDAY_READY_SELECTOR),
            ready_wait: Duration::from_secs(15),
            settle: Duration::ZERO,
            label: "webdriver-workday",
        }
    }

    pub fn generic(webdriver_url: &str) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
            page_timeout: Duration::from_secs(30),
            ready_selector: None,
            ready_wait: Duration::ZERO,
            settle: Duration::from_secs(2),
            label: "webdriver",
        }
    }

    async fn render(&self, url: &str) -> Result<(String, String), thirtyfour::error::WebDriverError> {
        use thirtyfour::prelude::*;

        let mut caps = DesiredCapabilities::chrome();
        caps.set_headless()?;
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--blink-settings=imagesEnabled=false")?;
        caps.add_arg(&format!("--user-agent={}", random_user_agent()))?;

        let driver = WebDriver::new(self.webdriver_url.as_str(), caps).await?;
        let result = async {
            driver.set_page_load_timeout(self.page_timeout).await?;
            driver.goto(url).await?;

            if let Some(selector) = self.ready_selector {
                let ready = driver
                    .query(By::Css(selector))
                    .wait(self.ready_wait, Duration::from_millis(500))
                    .first()
                    .await;
                if ready.is_err() {
                    debug!(url, "posting element never appeared, using rendered page as-is");
                }
            }
            if !self.settle.is_zero() {
                tokio::time::sleep(self.settle).await;
            }

            let title = driver.title().await?;
            let source = driver.source().await?;
            Ok::<_, WebDriverError>((title, source))
        }
        .await;

        if let Err(e) = driver.quit().await {
            debug!(error = %e, "webdriver session did not close cleanly");
        }
        result
    }
}

impl ScrapeStrategy for BrowserPage {
    fn name(&self) -> &str {
        self.label
    }

    fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ScrapeError::Network(format!("failed to start runtime: {}", e)))?;

        // Page timeout plus selector wait, settle time and session setup.
        let budget = self.page_timeout + self.ready_wait + self.settle + Duration::from_secs(15);
        let rendered = runtime.block_on(async { tokio::time::timeout(budget, self.render(url)).await });

        let (page_title, source) = match rendered {
            Err(_) => return Err(ScrapeError::Timeout(format!("{} after {:?}", url, budget))),
            Ok(Err(e)) => {
                let message = e.to_string();
                return Err(if message.to_lowercase().contains("timeout") {
                    ScrapeError::Timeout(message)
                } else {
                    ScrapeError::Network(message)
                });
            }
            Ok(Ok(page)) => page,
        };

        Ok(FetchedPage {
            page_title,
            text: clean_html(&source),
        })
    }
}
