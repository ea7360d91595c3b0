//! Email discovery: resolve a company's mail domain and naming pattern, then
//! generate candidate addresses for every recruiter not yet contacted.

use anyhow::{anyhow, Result};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::Settings;
use crate::models::{JobRecord, SendState};
use crate::patterns::{self, Pattern, PATTERN_COUNT};
use crate::search::{http_client, SearchChain, SearchHit};

const HUNTER_DOMAIN_SEARCH: &str = "https://api.hunter.io/v2/domain-search";
const APOLLO_ORG_SEARCH: &str = "https://api.apollo.io/v1/organizations/search";

/// Only the top results take part in the domain vote.
const DOMAIN_VOTE_RESULTS: usize = 8;

/// Job boards and ATS vendors: never a company's own mail domain.
const ATS_DOMAINS: &[&str] = &[
    "greenhouse.io",
    "lever.co",
    "workday.com",
    "myworkday.com",
    "myworkdayjobs.com",
    "linkedin.com",
    "indeed.com",
    "glassdoor.com",
    "ziprecruiter.com",
    "smartrecruiters.com",
    "icims.com",
    "taleo.net",
    "ashbyhq.com",
];

const SECOND_LEVEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.nz", "co.jp",
    "co.in", "com.br", "com.mx", "com.sg", "co.za",
];

/// Role mailboxes say nothing about how people's addresses are built.
const GENERIC_MAILBOXES: &[&str] = &[
    "info", "contact", "hr", "jobs", "careers", "support", "sales", "admin", "hello", "press",
    "media", "privacy", "noreply", "no-reply", "recruiting", "talent", "team", "office",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("API key rejected: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("HTTP {status} from {service}")]
    Http { service: String, status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        LookupError::Network(err.to_string())
    }
}

/// A keyed service that can name a company's mail domain.
pub trait DomainLookup {
    fn name(&self) -> &str;
    fn domain_for(&self, company: &str) -> Result<Option<String>, LookupError>;
}

/// A keyed service that knows the naming pattern used at a domain.
pub trait PatternLookup {
    fn name(&self) -> &str;
    fn pattern_for(&self, domain: &str) -> Result<Option<Pattern>, LookupError>;
}

// --- Hunter.io ---

pub struct Hunter {
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Default, Deserialize)]
struct HunterResponse {
    #[serde(default)]
    data: HunterData,
}

#[derive(Debug, Default, Deserialize)]
struct HunterData {
    domain: Option<String>,
    pattern: Option<String>,
}

impl Hunter {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: http_client(timeout),
        }
    }

    fn domain_search(&self, param: (&str, &str)) -> Result<HunterData, LookupError> {
        let response = self
            .client
            .get(HUNTER_DOMAIN_SEARCH)
            .query(&[param, ("api_key", self.api_key.as_str())])
            .send()?;
        check_lookup_status("hunter", response.status().as_u16())?;
        let body: HunterResponse = response
            .json()
            .map_err(|e| LookupError::Malformed(e.to_string()))?;
        Ok(body.data)
    }
}

impl DomainLookup for Hunter {
    fn name(&self) -> &str {
        "hunter"
    }

    fn domain_for(&self, company: &str) -> Result<Option<String>, LookupError> {
        let data = self.domain_search(("company", company))?;
        Ok(data.domain.filter(|d| !d.trim().is_empty()))
    }
}

impl PatternLookup for Hunter {
    fn name(&self) -> &str {
        "hunter"
    }

    fn pattern_for(&self, domain: &str) -> Result<Option<Pattern>, LookupError> {
        let data = self.domain_search(("domain", domain))?;
        Ok(data.pattern.as_deref().and_then(Pattern::from_template))
    }
}

// --- Apollo.io (organization search, domain only) ---

pub struct Apollo {
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Default, Deserialize)]
struct ApolloResponse {
    #[serde(default)]
    organizations: Vec<ApolloOrganization>,
}

#[derive(Debug, Deserialize)]
struct ApolloOrganization {
    primary_domain: Option<String>,
}

impl Apollo {
    pub fn new(api_key: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: http_client(timeout),
        }
    }
}

impl DomainLookup for Apollo {
    fn name(&self) -> &str {
        "apollo"
    }

    fn domain_for(&self, company: &str) -> Result<Option<String>, LookupError> {
        let response = self
            .client
            .post(APOLLO_ORG_SEARCH)
            .header("Cache-Control", "no-cache")
            .header("X-Api-Key", &self.api_key)
            .json(&json!({
                "q_organization_name": company,
                "page": 1,
                "per_page": 1,
            }))
            .send()?;
        check_lookup_status("apollo", response.status().as_u16())?;
        let body: ApolloResponse = response
            .json()
            .map_err(|e| LookupError::Malformed(e.to_string()))?;
        Ok(body
            .organizations
            .into_iter()
            .next()
            .and_then(|o| o.primary_domain)
            .filter(|d| !d.trim().is_empty()))
    }
}

fn check_lookup_status(service: &str, status: u16) -> Result<(), LookupError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(LookupError::Unauthorized(service.to_string())),
        429 => Err(LookupError::RateLimited(service.to_string())),
        status => Err(LookupError::Http {
            service: service.to_string(),
            status,
        }),
    }
}

/// Keyed lookup tiers for the configured services, in pipeline order.
pub fn lookups_from_settings(
    settings: &Settings,
) -> (Vec<Box<dyn DomainLookup>>, Vec<Box<dyn PatternLookup>>) {
    let timeout = settings.http_timeout;
    let mut domains: Vec<Box<dyn DomainLookup>> = Vec::new();
    let mut patterns: Vec<Box<dyn PatternLookup>> = Vec::new();
    if let Some(key) = &settings.hunter_api_key {
        domains.push(Box::new(Hunter::new(key, timeout)));
        patterns.push(Box::new(Hunter::new(key, timeout)));
    }
    if let Some(key) = &settings.apollo_api_key {
        domains.push(Box::new(Apollo::new(key, timeout)));
    }
    (domains, patterns)
}

// --- Report ---

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub domain: Option<String>,
    pub domain_source: Option<String>,
    pub pattern: Option<Pattern>,
    pub pattern_source: Option<String>,
    pub generated: usize,
    pub skipped_no_name: usize,
    pub skipped_contacted: usize,
    pub trace: Vec<String>,
}

impl DiscoveryReport {
    fn note(&mut self, line: String) {
        info!("{}", line);
        self.trace.push(line);
    }

    fn warn(&mut self, line: String) {
        warn!("{}", line);
        self.trace.push(line);
    }
}

/// Resolve domain and pattern for the job's company and fill in candidate
/// addresses on every recruiter that has never been sent to.
///
/// Lookup failures only advance the pipeline. When no domain can be found the
/// report carries a warning and no addresses are generated.
pub fn discover_emails(
    job: &mut JobRecord,
    chain: &mut SearchChain,
    domain_lookups: &[Box<dyn DomainLookup>],
    pattern_lookups: &[Box<dyn PatternLookup>],
) -> Result<DiscoveryReport> {
    let company = job.company.trim().to_string();
    if company.is_empty() {
        return Err(anyhow!("Job {} has no company; cannot discover emails", job.key()));
    }

    let mut report = DiscoveryReport::default();
    let eligible = job.recruiters.iter().filter(|r| is_uncontacted(r)).count();
    report.skipped_contacted = job.recruiters.len() - eligible;
    if eligible == 0 {
        report.note(format!(
            "No uncontacted recruiters on {} ({} already contacted)",
            job.key(),
            report.skipped_contacted
        ));
        return Ok(report);
    }

    let Some((domain, source)) = discover_domain(&company, chain, domain_lookups, &mut report) else {
        report.warn(format!(
            "Could not determine a mail domain for '{}'; no addresses generated",
            company
        ));
        return Ok(report);
    };
    report.note(format!("Domain: {} (via {})", domain, source));
    report.domain = Some(domain.clone());
    report.domain_source = Some(source);

    match discover_pattern(&domain, chain, pattern_lookups, &mut report) {
        Some((pattern, source)) => {
            report.note(format!(
                "Pattern: {} (via {}), e.g. {}",
                pattern,
                source,
                pattern.apply("jane", "doe", &domain)
            ));
            report.pattern = Some(pattern);
            report.pattern_source = Some(source);
        }
        None => report.note(format!(
            "Pattern: unknown, generating all {} templates",
            PATTERN_COUNT
        )),
    }

    for recruiter in job.recruiters.iter_mut().filter(|r| is_uncontacted(r)) {
        let candidates = patterns::candidates(&recruiter.name, &domain, report.pattern);
        if candidates.is_empty() {
            report.note(format!("Skipping '{}': no usable first and last name", recruiter.name));
            report.skipped_no_name += 1;
            recruiter.email = None;
            recruiter.email_candidates.clear();
            recruiter.email_pattern = None;
            recruiter.pattern_index = 0;
            continue;
        }
        recruiter.email = candidates.first().cloned();
        recruiter.email_candidates = candidates;
        recruiter.email_pattern = report.pattern;
        recruiter.pattern_index = 0;
        report.generated += 1;
    }

    report.note(format!(
        "Addresses generated for {} recruiter(s); {} without usable name, {} already contacted",
        report.generated, report.skipped_no_name, report.skipped_contacted
    ));
    Ok(report)
}

fn is_uncontacted(recruiter: &crate::models::RecruiterRecord) -> bool {
    recruiter.send_state == SendState::Unsent && recruiter.attempts.is_empty()
}

fn discover_domain(
    company: &str,
    chain: &mut SearchChain,
    lookups: &[Box<dyn DomainLookup>],
    report: &mut DiscoveryReport,
) -> Option<(String, String)> {
    let query = format!("{} careers jobs email contact", company);
    let result = chain.run(&query);
    for failure in &result.failures {
        report.note(format!("Domain search via {} failed: {}", failure.backend, failure.error));
    }
    if let Some(backend) = &result.answered_by {
        match vote_domain(&result.hits) {
            Some(domain) => return Some((domain, format!("web search ({})", backend))),
            None => report.note(format!("Domain search via {} gave no usable domain", backend)),
        }
    }

    for lookup in lookups {
        match lookup.domain_for(company) {
            Ok(Some(domain)) => return Some((domain.trim().to_lowercase(), lookup.name().to_string())),
            Ok(None) => report.note(format!("{} has no domain for '{}'", lookup.name(), company)),
            Err(e) => report.note(format!("{} domain lookup failed: {}", lookup.name(), e)),
        }
    }
    None
}

fn discover_pattern(
    domain: &str,
    chain: &mut SearchChain,
    lookups: &[Box<dyn PatternLookup>],
    report: &mut DiscoveryReport,
) -> Option<(Pattern, String)> {
    let query = format!(r#""@{}" email contact"#, domain);
    let result = chain.run(&query);
    for failure in &result.failures {
        report.note(format!("Pattern search via {} failed: {}", failure.backend, failure.error));
    }
    if let Some(backend) = &result.answered_by {
        let locals = mine_local_parts(&result.hits, domain);
        match infer_pattern(&locals) {
            Some(pattern) => {
                return Some((
                    pattern,
                    format!("web search ({}, {} address(es))", backend, locals.len()),
                ));
            }
            None => report.note(format!(
                "Pattern search via {} found no personal addresses at {}",
                backend, domain
            )),
        }
    }

    for lookup in lookups {
        match lookup.pattern_for(domain) {
            Ok(Some(pattern)) => return Some((pattern, lookup.name().to_string())),
            Ok(None) => report.note(format!("{} has no pattern for {}", lookup.name(), domain)),
            Err(e) => report.note(format!("{} pattern lookup failed: {}", lookup.name(), e)),
        }
    }
    None
}

/// Registrable domain of a URL: `www.` dropped, last two labels kept (three for
/// suffixes like `co.uk`).
pub fn apex_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.domain()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }
    let tail = labels[labels.len() - 2..].join(".");
    let keep = if labels.len() >= 3 && SECOND_LEVEL_SUFFIXES.contains(&tail.as_str()) {
        3
    } else {
        2
    };
    Some(labels[labels.len() - keep..].join("."))
}

fn is_ats_domain(domain: &str) -> bool {
    ATS_DOMAINS
        .iter()
        .any(|ats| domain == *ats || domain.ends_with(&format!(".{}", ats)))
}

/// Plurality vote over the apex domains of the top results; ties go to the
/// domain seen first.
pub fn vote_domain(hits: &[SearchHit]) -> Option<String> {
    let mut tally: Vec<(String, usize)> = Vec::new();
    for hit in hits.iter().take(DOMAIN_VOTE_RESULTS) {
        let Some(domain) = apex_domain(&hit.url) else {
            continue;
        };
        if is_ats_domain(&domain) {
            continue;
        }
        match tally.iter_mut().find(|(d, _)| *d == domain) {
            Some((_, count)) => *count += 1,
            None => tally.push((domain, 1)),
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (domain, count) in tally {
        if best.as_ref().is_none_or(|(_, top)| count > *top) {
            best = Some((domain, count));
        }
    }
    best.map(|(domain, _)| domain)
}

/// Local parts of every `@domain` address in result titles, snippets and URLs.
pub fn mine_local_parts(hits: &[SearchHit], domain: &str) -> Vec<String> {
    let pattern = format!(
        r"\b([a-z][a-z0-9]*(?:[.\-][a-z][a-z0-9]*)*)@{}\b",
        regex::escape(domain)
    );
    let Ok(re) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        return Vec::new();
    };
    hits.iter()
        .flat_map(|h| [h.title.as_str(), h.snippet.as_str(), h.url.as_str()])
        .flat_map(|field| {
            re.captures_iter(field)
                .map(|c| c[1].to_lowercase())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Guess the naming pattern from address shapes alone.
///
/// `a.b` votes `{first}.{last}` (or `{f}.{last}` when `a` is one letter), `a-b`
/// counts as dotted, and an unseparated local part votes `{f}{last}` up to five
/// characters and `{first}{last}` beyond. Ties go to template precedence.
pub fn infer_pattern(locals: &[String]) -> Option<Pattern> {
    let mut votes = [0usize; PATTERN_COUNT];
    for local in locals {
        let local = local.to_lowercase();
        if GENERIC_MAILBOXES.contains(&local.as_str()) {
            continue;
        }
        let shape = if local.contains('.') {
            let parts: Vec<&str> = local.split('.').collect();
            if parts.len() != 2 {
                continue;
            }
            if parts[0].chars().count() == 1 {
                Pattern::InitialDotLast
            } else {
                Pattern::FirstDotLast
            }
        } else if local.contains('-') {
            Pattern::FirstDotLast
        } else if local.chars().count() <= 5 {
            Pattern::InitialLast
        } else {
            Pattern::FirstLast
        };
        if let Some(i) = Pattern::ALL.iter().position(|p| *p == shape) {
            votes[i] += 1;
        }
    }

    let mut best: Option<(Pattern, usize)> = None;
    for (pattern, count) in Pattern::ALL.iter().zip(votes) {
        if count > 0 && best.is_none_or(|(_, top)| count > top) {
            best = Some((*pattern, count));
        }
    }
    best.map(|(pattern, _)| pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobFamily, Platform, RecruiterRecord, SendAttempt, SendOutcome};
    use crate::search::tests::{hit, ScriptedBackend};
    use crate::search::SearchError;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FixedDomain {
        name: &'static str,
        answer: Result<Option<String>, LookupError>,
        calls: Rc<RefCell<usize>>,
    }

    impl DomainLookup for FixedDomain {
        fn name(&self) -> &str {
            self.name
        }

        fn domain_for(&self, _company: &str) -> Result<Option<String>, LookupError> {
            *self.calls.borrow_mut() += 1;
            self.answer.clone()
        }
    }

    struct FixedPattern(Option<Pattern>);

    impl PatternLookup for FixedPattern {
        fn name(&self) -> &str {
            "hunter"
        }

        fn pattern_for(&self, _domain: &str) -> Result<Option<Pattern>, LookupError> {
            Ok(self.0)
        }
    }

    fn job_with(names: &[&str]) -> JobRecord {
        JobRecord {
            url: "https://boards.greenhouse.io/acme/jobs/1".to_string(),
            platform: Platform::Greenhouse,
            scraped_at: Utc::now(),
            title: "Data Engineer".to_string(),
            company: "Acme".to_string(),
            job_family: JobFamily::DataAnalytics,
            location: None,
            page_title: String::new(),
            description: String::new(),
            recruiters: names
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    RecruiterRecord::new(
                        &format!("https://linkedin.com/in/r{}", i),
                        n,
                        None,
                        "duckduckgo [recruiter]".to_string(),
                    )
                })
                .collect(),
            draft: None,
        }
    }

    fn snippet_hit(snippet: &str) -> SearchHit {
        SearchHit {
            title: "Contact".to_string(),
            url: "https://example.org/contact".to_string(),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn test_apex_domain() {
        assert_eq!(apex_domain("https://www.homedepot.com/about").as_deref(), Some("homedepot.com"));
        assert_eq!(apex_domain("https://careers.anthropic.com/jobs/1").as_deref(), Some("anthropic.com"));
        assert_eq!(apex_domain("https://jobs.acme.co.uk/x").as_deref(), Some("acme.co.uk"));
        assert_eq!(apex_domain("https://github.com").as_deref(), Some("github.com"));
        assert_eq!(apex_domain("https://10.0.0.1/x"), None);
        assert_eq!(apex_domain("not a url"), None);
    }

    #[test]
    fn test_domain_vote_skips_ats_and_breaks_ties_by_first_seen() {
        let hits = vec![
            hit("a", "https://boards.greenhouse.io/acme"),
            hit("b", "https://acmebrand.com/"),
            hit("c", "https://www.acme.com/careers"),
            hit("d", "https://blog.acme.com/"),
            hit("e", "https://www.linkedin.com/company/acme"),
        ];
        assert_eq!(vote_domain(&hits).as_deref(), Some("acme.com"));

        let tied = vec![hit("a", "https://acmebrand.com/"), hit("b", "https://acme.com/")];
        assert_eq!(vote_domain(&tied).as_deref(), Some("acmebrand.com"));

        let only_boards = vec![hit("a", "https://jobs.lever.co/acme")];
        assert_eq!(vote_domain(&only_boards), None);
    }

    #[test]
    fn test_domain_vote_only_counts_top_results() {
        let mut hits: Vec<SearchHit> = (0..8).map(|i| hit("x", &format!("https://site{}.com/", i))).collect();
        hits.push(hit("late", "https://site7.com/other"));
        assert_eq!(vote_domain(&hits).as_deref(), Some("site0.com"));
    }

    #[test]
    fn test_mine_local_parts() {
        let hits = vec![
            snippet_hit("Reach jane.doe@acme.com or JSMITH@ACME.COM for details"),
            snippet_hit("Not ours: someone@acme.company.com, bob@other.com"),
        ];
        assert_eq!(mine_local_parts(&hits, "acme.com"), vec!["jane.doe", "jsmith"]);
    }

    #[test]
    fn test_infer_pattern_votes() {
        let locals: Vec<String> = ["jane.doe", "john.smith", "jdoe", "info", "careers"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(infer_pattern(&locals), Some(Pattern::FirstDotLast));

        let initials: Vec<String> = vec!["j.doe".into(), "m.white".into()];
        assert_eq!(infer_pattern(&initials), Some(Pattern::InitialDotLast));

        let long: Vec<String> = vec!["janedoe".into()];
        assert_eq!(infer_pattern(&long), Some(Pattern::FirstLast));

        let generic_only: Vec<String> = vec!["info".into(), "hr".into()];
        assert_eq!(infer_pattern(&generic_only), None);
    }

    #[test]
    fn test_infer_pattern_tie_goes_to_precedence() {
        let locals: Vec<String> = vec!["janedoe".into(), "jdoe".into()];
        assert_eq!(infer_pattern(&locals), Some(Pattern::InitialLast));
    }

    #[test]
    fn test_resolved_pattern_gives_single_candidate() {
        let mut job = job_with(&["Marcus P White", "Madonna"]);
        let (backend, calls) = ScriptedBackend::new(
            "duckduckgo",
            vec![
                Ok(vec![hit("Acme", "https://www.acme.com/"), hit("Acme", "https://acme.com/jobs")]),
                Ok(vec![snippet_hit("jane.doe@acme.com, info@acme.com")]),
            ],
        );
        let mut chain = SearchChain::new(vec![Box::new(backend)]);

        let report = discover_emails(&mut job, &mut chain, &[], &[]).unwrap();

        assert_eq!(report.domain.as_deref(), Some("acme.com"));
        assert_eq!(report.pattern, Some(Pattern::FirstDotLast));
        assert_eq!(report.generated, 1);
        assert_eq!(report.skipped_no_name, 1);
        assert_eq!(
            *calls.borrow(),
            vec![
                "Acme careers jobs email contact".to_string(),
                r#""@acme.com" email contact"#.to_string()
            ]
        );

        let marcus = &job.recruiters[0];
        assert_eq!(marcus.email.as_deref(), Some("marcus.white@acme.com"));
        assert_eq!(marcus.email_candidates.len(), 1);
        assert_eq!(marcus.email_pattern, Some(Pattern::FirstDotLast));
        assert_eq!(marcus.pattern_index, 0);
        assert!(job.recruiters[1].email.is_none());
    }

    #[test]
    fn test_unknown_pattern_generates_all_six() {
        let mut job = job_with(&["Héléne García"]);
        let (backend, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(vec![hit("Acme", "https://acme.com/")]), Ok(vec![])],
        );
        let mut chain = SearchChain::new(vec![Box::new(backend)]);
        let patterns: Vec<Box<dyn PatternLookup>> = vec![Box::new(FixedPattern(None))];

        let report = discover_emails(&mut job, &mut chain, &[], &patterns).unwrap();

        assert_eq!(report.pattern, None);
        let r = &job.recruiters[0];
        assert_eq!(r.email_candidates.len(), 6);
        assert_eq!(r.email.as_deref(), Some("helene.garcia@acme.com"));
        assert_eq!(r.email_candidates[5], "helenegarcia@acme.com");
        assert_eq!(r.email_pattern, None);
    }

    #[test]
    fn test_keyed_tiers_used_when_web_search_fails() {
        let mut job = job_with(&["Ada Lovelace"]);
        let (backend, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![
                Err(SearchError::BotDetected("202".into())),
                Err(SearchError::BotDetected("202".into())),
            ],
        );
        let mut chain = SearchChain::new(vec![Box::new(backend)]);
        let hunter_calls = Rc::new(RefCell::new(0));
        let apollo_calls = Rc::new(RefCell::new(0));
        let domains: Vec<Box<dyn DomainLookup>> = vec![
            Box::new(FixedDomain {
                name: "hunter",
                answer: Err(LookupError::RateLimited("hunter".into())),
                calls: Rc::clone(&hunter_calls),
            }),
            Box::new(FixedDomain {
                name: "apollo",
                answer: Ok(Some("Acme.io".to_string())),
                calls: Rc::clone(&apollo_calls),
            }),
        ];
        let patterns: Vec<Box<dyn PatternLookup>> =
            vec![Box::new(FixedPattern(Some(Pattern::InitialLast)))];

        let report = discover_emails(&mut job, &mut chain, &domains, &patterns).unwrap();

        assert_eq!(*hunter_calls.borrow(), 1);
        assert_eq!(*apollo_calls.borrow(), 1);
        assert_eq!(report.domain_source.as_deref(), Some("apollo"));
        assert_eq!(report.pattern_source.as_deref(), Some("hunter"));
        assert_eq!(job.recruiters[0].email.as_deref(), Some("alovelace@acme.io"));
    }

    #[test]
    fn test_no_domain_generates_nothing() {
        let mut job = job_with(&["Ada Lovelace"]);
        let (backend, _) = ScriptedBackend::new("duckduckgo", vec![Ok(vec![])]);
        let mut chain = SearchChain::new(vec![Box::new(backend)]);

        let report = discover_emails(&mut job, &mut chain, &[], &[]).unwrap();

        assert!(report.domain.is_none());
        assert_eq!(report.generated, 0);
        assert!(report.trace.iter().any(|l| l.contains("Could not determine")));
        assert!(job.recruiters[0].email.is_none());
    }

    #[test]
    fn test_contacted_recruiters_keep_their_addresses() {
        let mut job = job_with(&["Ada Lovelace", "Grace Hopper"]);
        {
            let sent = &mut job.recruiters[0];
            sent.email = Some("ada@acme.com".to_string());
            sent.send_state = SendState::Sent;
            sent.attempts.push(SendAttempt {
                at: Utc::now(),
                address: "ada@acme.com".to_string(),
                outcome: SendOutcome::Sent,
            });
        }
        let (backend, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(vec![hit("Acme", "https://acme.com/")]), Ok(vec![snippet_hit("g.h@acme.com")])],
        );
        let mut chain = SearchChain::new(vec![Box::new(backend)]);

        let report = discover_emails(&mut job, &mut chain, &[], &[]).unwrap();

        assert_eq!(report.skipped_contacted, 1);
        assert_eq!(job.recruiters[0].email.as_deref(), Some("ada@acme.com"));
        assert_eq!(job.recruiters[1].email.as_deref(), Some("g.hopper@acme.com"));
    }

    #[test]
    fn test_all_contacted_runs_no_searches() {
        let mut job = job_with(&["Ada Lovelace"]);
        job.recruiters[0].send_state = SendState::Bounced;
        let (backend, calls) = ScriptedBackend::new("duckduckgo", vec![]);
        let mut chain = SearchChain::new(vec![Box::new(backend)]);

        let report = discover_emails(&mut job, &mut chain, &[], &[]).unwrap();

        assert_eq!(report.skipped_contacted, 1);
        assert!(calls.borrow().is_empty());
    }
}
