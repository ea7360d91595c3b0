use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Settings;
use crate::models::{EmailDraft, JobFamily, JobRecord};
use crate::scrape::{truncate_chars, ScrapedPage};

/// Below this similarity an unrecognized family label becomes `Other`.
const FAMILY_MATCH_THRESHOLD: f64 = 0.85;

const EXTRACT_TEXT_CHARS: usize = 8_000;
const DRAFT_DESCRIPTION_CHARS: usize = 3_000;
const DRAFT_RESUME_CHARS: usize = 4_000;

static CODE_FENCE_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^```(?:json)?\s*").unwrap());
static CODE_FENCE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*```$").unwrap());

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{0} is not set")]
    MissingKey(String),

    #[error("rate limited by {0}")]
    RateLimited(String),

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String, ProviderError>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
    Groq,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let spec = |provider, model_id: &str, short_name: &str| ModelSpec {
        provider,
        model_id: model_id.to_string(),
        short_name: short_name.to_string(),
    };
    match name {
        "groq" | "llama" | "llama-3.3-70b" => Ok(spec(ProviderKind::Groq, "llama-3.3-70b-versatile", "groq")),
        "groq-fast" | "llama-3.1-8b" => Ok(spec(ProviderKind::Groq, "llama-3.1-8b-instant", "groq-fast")),
        "api-sonnet" | "sonnet" => Ok(spec(ProviderKind::Anthropic, "claude-sonnet-4-5-20250929", "api-sonnet")),
        "api-haiku" | "haiku" => Ok(spec(ProviderKind::Anthropic, "claude-haiku-4-5-20251001", "api-haiku")),
        "gpt-4o" => Ok(spec(ProviderKind::OpenAI, "gpt-4o", "gpt-4o")),
        "gpt-4o-mini" => Ok(spec(ProviderKind::OpenAI, "gpt-4o-mini", "gpt-4o-mini")),
        _ => Err(anyhow!(
            "Unknown model '{}'. Available: groq (default), groq-fast, api-sonnet, api-haiku, gpt-4o, gpt-4o-mini",
            name
        )),
    }
}

pub fn create_provider(spec: &ModelSpec, settings: &Settings) -> Result<Box<dyn AIProvider>> {
    let timeout = settings.http_timeout.max(Duration::from_secs(60));
    let require = |key: &Option<String>, var: &str| -> Result<String> {
        key.clone()
            .ok_or_else(|| ProviderError::MissingKey(var.to_string()))
            .with_context(|| format!("Model '{}' needs an API key", spec.short_name))
    };
    match spec.provider {
        ProviderKind::Anthropic => {
            let api_key = require(&settings.anthropic_api_key, "ANTHROPIC_API_KEY")?;
            Ok(Box::new(AnthropicProvider::new(api_key, spec.model_id.clone(), timeout)))
        }
        ProviderKind::OpenAI => {
            let api_key = require(&settings.openai_api_key, "OPENAI_API_KEY")?;
            Ok(Box::new(OpenAICompatProvider::new(
                OPENAI_API_URL,
                "OpenAI",
                api_key,
                spec.model_id.clone(),
                timeout,
            )))
        }
        ProviderKind::Groq => {
            let api_key = require(&settings.groq_api_key, "GROQ_API_KEY")?;
            Ok(Box::new(OpenAICompatProvider::new(
                GROQ_API_URL,
                "Groq",
                api_key,
                spec.model_id.clone(),
                timeout,
            )))
        }
    }
}

fn http_error(provider: &str, response: reqwest::blocking::Response) -> ProviderError {
    let status = response.status().as_u16();
    if status == 429 {
        return ProviderError::RateLimited(provider.to_string());
    }
    let body = response.text().unwrap_or_default();
    ProviderError::Http {
        provider: provider.to_string(),
        status,
        body: truncate_chars(&body, 300),
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model_id: String, timeout: Duration) -> Self {
        Self {
            api_key,
            model_id,
            client: crate::search::http_client(timeout),
        }
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            system: system.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            return Err(http_error("Anthropic", response));
        }

        let api_response: AnthropicResponse = response
            .json()
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        api_response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| ProviderError::Malformed("no content in Anthropic response".into()))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI-compatible chat completions (OpenAI, Groq) ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug)]
pub struct OpenAICompatProvider {
    endpoint: &'static str,
    label: &'static str,
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAICompatProvider {
    pub fn new(
        endpoint: &'static str,
        label: &'static str,
        api_key: String,
        model_id: String,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            label,
            api_key,
            model_id,
            client: crate::search::http_client(timeout),
        }
    }
}

impl AIProvider for OpenAICompatProvider {
    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model_id.clone(),
            max_tokens,
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            return Err(http_error(self.label, response));
        }

        let api_response: ChatResponse = response
            .json()
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| ProviderError::Malformed(format!("no choices in {} response", self.label)))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Job field extraction ---

const EXTRACT_SYSTEM: &str = "You are a precise job posting parser. You extract structured \
information from job posting text. Always respond with valid JSON only: no prose, no markdown, \
no code fences.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_family: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

fn extraction_prompt(text: &str) -> String {
    let families: Vec<String> = JobFamily::ALL.iter().map(|f| format!("  - {}", f.label())).collect();
    format!(
        "Extract the following fields from this job posting text and return them as a JSON object:\n\n\
        {{\n  \"job_title\": \"<exact job title as listed in the posting>\",\n  \
        \"company\": \"<company name>\",\n  \
        \"job_family\": \"<one of the categories below>\",\n  \
        \"location\": \"<primary location, or null if fully remote / not specified>\"\n}}\n\n\
        Job family must be exactly one of:\n{}\n\n\
        Job posting text:\n---\n{}\n---\n\n\
        Return only the JSON object.",
        families.join("\n"),
        truncate_chars(text, EXTRACT_TEXT_CHARS)
    )
}

pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let opened = CODE_FENCE_OPEN.replace(trimmed, "");
    CODE_FENCE_CLOSE.replace(&opened, "").into_owned()
}

pub fn parse_extracted(raw: &str) -> Result<ExtractedFields> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned)
        .map_err(|e| ProviderError::Malformed(format!("{} in {:?}", e, truncate_chars(&cleaned, 200))))
        .context("Job extraction returned non-JSON output")
}

/// Map a free-form family label onto the fixed set, falling back to `Other`.
pub fn match_family(value: &str) -> JobFamily {
    if let Some(family) = JobFamily::from_label(value) {
        return family;
    }
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return JobFamily::Other;
    }

    let mut best = (JobFamily::Other, 0.0);
    for family in JobFamily::ALL.iter().copied().filter(|f| *f != JobFamily::Other) {
        let label = family.label().to_lowercase();
        let score = std::iter::once(label.as_str())
            .chain(label.split('/').map(str::trim))
            .map(|candidate| strsim::jaro_winkler(&value, candidate))
            .fold(0.0, f64::max);
        if score > best.1 {
            best = (family, score);
        }
    }
    if best.1 >= FAMILY_MATCH_THRESHOLD {
        best.0
    } else {
        JobFamily::Other
    }
}

/// Build a job record from scraped text. An empty title falls back to the page title.
pub fn extract_job(provider: &dyn AIProvider, page: &ScrapedPage) -> Result<JobRecord> {
    let raw = provider
        .complete(EXTRACT_SYSTEM, &extraction_prompt(&page.raw_text), 512)
        .context("Job extraction failed")?;
    debug!(model = provider.model_name(), response = %raw, "extraction response");

    let fields = parse_extracted(&raw)?;
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty() && s != "null");

    let title = clean(fields.job_title).unwrap_or_else(|| page.page_title.trim().to_string());
    let company = clean(fields.company).unwrap_or_default();
    let job_family = fields
        .job_family
        .as_deref()
        .map(match_family)
        .unwrap_or(JobFamily::Other);

    info!(title = %title, company = %company, family = %job_family, "extracted job fields");
    Ok(JobRecord {
        url: page.url.clone(),
        platform: page.platform,
        scraped_at: Utc::now(),
        title,
        company,
        job_family,
        location: clean(fields.location),
        page_title: page.page_title.clone(),
        description: page.raw_text.clone(),
        recruiters: Vec::new(),
        draft: None,
    })
}

// --- Outreach drafting ---

const DRAFT_SYSTEM: &str = "You are a professional job applicant writing a cold outreach email \
to a recruiter. Write a concise, genuine email body (3-4 short paragraphs, under 200 words). \
Do NOT include a subject line. Start with \"Hi there,\" on the very first line. End the email with \
\"Would love to connect.\" followed by a blank line and then \"Best,\". Do not put a name after \
\"Best,\". Return only the email body text with no commentary and no markdown.";

pub fn draft_subject(job: &JobRecord) -> String {
    format!("Interested in {}", job.title)
}

/// One generic body per job; the greeting is personalized at send time.
pub fn draft_outreach(provider: &dyn AIProvider, job: &JobRecord, resume: &str) -> Result<EmailDraft> {
    let prompt = format!(
        "Company: {}\nJob title: {}\n\n--- JOB DESCRIPTION ---\n{}\n\n--- MY RESUME ---\n{}\n\n\
        Write the email body now.",
        job.company,
        job.title,
        truncate_chars(&job.description, DRAFT_DESCRIPTION_CHARS),
        truncate_chars(resume, DRAFT_RESUME_CHARS)
    );
    let body = provider
        .complete(DRAFT_SYSTEM, &prompt, 512)
        .context("Drafting the outreach email failed")?;
    let body = body.trim().to_string();
    if body.is_empty() {
        return Err(anyhow!("Model returned an empty email body"));
    }
    Ok(EmailDraft {
        subject: draft_subject(job),
        body,
        drafted_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use std::cell::RefCell;

    struct CannedProvider {
        reply: Result<String, ProviderError>,
        prompts: RefCell<Vec<String>>,
    }

    impl CannedProvider {
        fn new(reply: Result<String, ProviderError>) -> Self {
            Self {
                reply,
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl AIProvider for CannedProvider {
        fn complete(&self, _system: &str, prompt: &str, _max_tokens: u32) -> Result<String, ProviderError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.reply.clone()
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn page() -> ScrapedPage {
        ScrapedPage {
            url: "https://jobs.lever.co/acme/1".to_string(),
            platform: Platform::Lever,
            page_title: "Acme - Senior Data Engineer".to_string(),
            raw_text: "Senior Data Engineer\nAcme\nChicago, IL".to_string(),
        }
    }

    #[test]
    fn test_resolve_model() {
        let spec = resolve_model("groq").unwrap();
        assert_eq!(spec.provider, ProviderKind::Groq);
        assert_eq!(spec.model_id, "llama-3.3-70b-versatile");

        let spec = resolve_model("sonnet").unwrap();
        assert_eq!(spec.provider, ProviderKind::Anthropic);
        assert_eq!(spec.short_name, "api-sonnet");

        assert!(resolve_model("gpt-3").is_err());
    }

    #[test]
    fn test_create_provider_requires_key() {
        let settings = Settings::for_tests();
        let spec = resolve_model("groq").unwrap();
        let err = create_provider(&spec, &settings).err().unwrap();
        assert!(format!("{:#}", err).contains("GROQ_API_KEY"));

        let settings = Settings {
            groq_api_key: Some("gsk-test".to_string()),
            ..Settings::for_tests()
        };
        let provider = create_provider(&spec, &settings).unwrap();
        assert_eq!(provider.model_name(), "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_match_family() {
        assert_eq!(match_family("Data Science / ML"), JobFamily::DataScienceMl);
        assert_eq!(match_family("software engineering"), JobFamily::SoftwareEngineering);
        assert_eq!(match_family("Software Engineer"), JobFamily::SoftwareEngineering);
        assert_eq!(match_family("Data Science"), JobFamily::DataScienceMl);
        assert_eq!(match_family("Underwater Welding"), JobFamily::Other);
        assert_eq!(match_family(""), JobFamily::Other);
    }

    #[test]
    fn test_extract_job_fields() {
        let provider = CannedProvider::new(Ok("```json\n{\"job_title\": \"Senior Data Engineer\", \
            \"company\": \"Acme\", \"job_family\": \"Data Analytics\", \"location\": \"Chicago, IL\"}\n```"
            .to_string()));
        let job = extract_job(&provider, &page()).unwrap();

        assert_eq!(job.title, "Senior Data Engineer");
        assert_eq!(job.company, "Acme");
        assert_eq!(job.job_family, JobFamily::DataAnalytics);
        assert_eq!(job.location.as_deref(), Some("Chicago, IL"));
        assert_eq!(job.platform, Platform::Lever);
        assert!(provider.prompts.borrow()[0].contains("Policy / Government Affairs"));
    }

    #[test]
    fn test_empty_title_falls_back_to_page_title() {
        let provider = CannedProvider::new(Ok(
            "{\"job_title\": \"\", \"company\": \"Acme\", \"job_family\": \"Astrology\", \"location\": null}"
                .to_string(),
        ));
        let job = extract_job(&provider, &page()).unwrap();
        assert_eq!(job.title, "Acme - Senior Data Engineer");
        assert_eq!(job.job_family, JobFamily::Other);
        assert!(job.location.is_none());
    }

    #[test]
    fn test_non_json_and_rate_limit_are_errors() {
        let provider = CannedProvider::new(Ok("Sure! Here is the JSON you asked for.".to_string()));
        assert!(extract_job(&provider, &page()).is_err());

        let provider = CannedProvider::new(Err(ProviderError::RateLimited("Groq".into())));
        let err = extract_job(&provider, &page()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProviderError>(),
            Some(&ProviderError::RateLimited("Groq".into()))
        );
    }

    #[test]
    fn test_draft_outreach() {
        let provider = CannedProvider::new(Ok("  Hi there,\n\nI build pipelines.\n\nBest,  ".to_string()));
        let job = extract_job(
            &CannedProvider::new(Ok(
                "{\"job_title\": \"Data Engineer\", \"company\": \"Acme\", \"job_family\": \"Other\"}".to_string(),
            )),
            &page(),
        )
        .unwrap();

        let draft = draft_outreach(&provider, &job, "Ten years of Rust.").unwrap();
        assert_eq!(draft.subject, "Interested in Data Engineer");
        assert_eq!(draft.body, "Hi there,\n\nI build pipelines.\n\nBest,");
        assert!(provider.prompts.borrow()[0].contains("Ten years of Rust."));
    }
}
