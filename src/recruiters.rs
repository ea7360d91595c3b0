//! Recruiter discovery: LinkedIn profile search through the ranked backend chain.

use anyhow::{anyhow, Result};
use rand::Rng;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::models::{JobRecord, RecruiterRecord};
use crate::search::{SearchChain, SearchHit};

const FALLBACK_TERM: &str = "talent";

static LINKEDIN_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*[|–-]\s*LinkedIn\s*$").unwrap());
static HEADING_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*(?:\s-\s|[–|•])\s*(.+)$").unwrap());
static TRUNCATED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\p{Lu}[\p{L}'-]+)\s+(\p{Lu})\.$").unwrap());

const STATES_AND_COUNTRIES: &[&str] = &[
    "usa", "us", "united states", "uk", "united kingdom", "canada", "india", "china", "germany",
    "france", "japan", "australia", "singapore", "alabama", "alaska", "arizona", "arkansas",
    "california", "colorado", "connecticut", "delaware", "florida", "georgia", "hawaii", "idaho",
    "illinois", "indiana", "iowa", "kansas", "kentucky", "louisiana", "maine", "maryland",
    "massachusetts", "michigan", "minnesota", "mississippi", "missouri", "montana", "nebraska",
    "nevada", "new hampshire", "new jersey", "new mexico", "new york", "north carolina",
    "north dakota", "ohio", "oklahoma", "oregon", "pennsylvania", "rhode island",
    "south carolina", "south dakota", "tennessee", "texas", "utah", "vermont", "virginia",
    "washington", "west virginia", "wisconsin", "wyoming", "al", "ak", "az", "ar", "ca", "co",
    "ct", "de", "fl", "ga", "hi", "id", "il", "in", "ia", "ks", "ky", "la", "me", "md", "ma",
    "mi", "mn", "ms", "mo", "mt", "ne", "nv", "nh", "nj", "nm", "ny", "nc", "nd", "oh", "ok",
    "or", "pa", "ri", "sc", "sd", "tn", "tx", "ut", "vt", "va", "wa", "wv", "wi", "wy", "d.c.",
    "dc",
];

#[derive(Debug, Default)]
pub struct SearchReport {
    pub queries_run: usize,
    pub queries_answered: usize,
    pub hits_seen: usize,
    pub added: usize,
    pub duplicates: usize,
    pub unparseable: usize,
    pub trace: Vec<String>,
}

impl SearchReport {
    fn note(&mut self, line: String) {
        info!("{}", line);
        self.trace.push(line);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub term: String,
    pub query: String,
}

/// Primary query cascade: each family term with the city first, then without.
pub fn plan_queries(job: &JobRecord) -> Vec<PlannedQuery> {
    let company = job.company.trim();
    let city = job.location.as_deref().and_then(extract_city);
    let mut planned = Vec::new();
    for term in job.job_family.recruiter_terms() {
        if let Some(city) = &city {
            planned.push(PlannedQuery {
                term: term.to_string(),
                query: format!(r#"site:linkedin.com/in "{}" "{}" "{}""#, company, term, city),
            });
        }
        planned.push(PlannedQuery {
            term: term.to_string(),
            query: format!(r#"site:linkedin.com/in "{}" "{}""#, company, term),
        });
    }
    planned
}

fn fallback_query(job: &JobRecord) -> PlannedQuery {
    PlannedQuery {
        term: FALLBACK_TERM.to_string(),
        query: format!(r#"site:linkedin.com/in "{}" "{}""#, job.company.trim(), FALLBACK_TERM),
    }
}

/// Search for recruiters and append new ones to `job.recruiters` in discovery order.
///
/// `max_results` caps the total number of recruiters on the record. Backend and
/// query failures are recorded in the report and never abort the search.
pub fn find_recruiters(
    job: &mut JobRecord,
    chain: &mut SearchChain,
    max_results: usize,
    delay: (Duration, Duration),
) -> Result<SearchReport> {
    if job.company.trim().is_empty() {
        return Err(anyhow!("Job {} has no company; cannot search for recruiters", job.key()));
    }

    let mut report = SearchReport::default();
    if job.recruiters.len() >= max_results {
        report.note(format!(
            "Already have {} recruiter(s) (max {}), nothing to search",
            job.recruiters.len(),
            max_results
        ));
        return Ok(report);
    }

    let mut seen: HashSet<String> = job
        .recruiters
        .iter()
        .map(|r| dedup_key(&r.linkedin_url))
        .collect();

    let primary = plan_queries(job);
    run_queries(job, chain, &primary, max_results, delay, &mut seen, &mut report);

    if report.added == 0 && job.recruiters.len() < max_results && !chain.is_exhausted() {
        report.note("No new recruiters from primary queries, trying last-resort query".to_string());
        let fallback = [fallback_query(job)];
        run_queries(job, chain, &fallback, max_results, delay, &mut seen, &mut report);
    }

    report.note(format!(
        "Queries: {} run, {} answered. Hits: {} seen, {} added, {} duplicate, {} kept with raw heading",
        report.queries_run,
        report.queries_answered,
        report.hits_seen,
        report.added,
        report.duplicates,
        report.unparseable
    ));
    Ok(report)
}

fn run_queries(
    job: &mut JobRecord,
    chain: &mut SearchChain,
    queries: &[PlannedQuery],
    max_results: usize,
    delay: (Duration, Duration),
    seen: &mut HashSet<String>,
    report: &mut SearchReport,
) {
    for planned in queries {
        if job.recruiters.len() >= max_results {
            break;
        }
        if chain.is_exhausted() {
            report.note("All search backends disabled, stopping".to_string());
            break;
        }
        if report.queries_run > 0 {
            pause(delay);
        }

        report.queries_run += 1;
        report.note(format!("Query {}: {}", report.queries_run, planned.query));
        let result = chain.run(&planned.query);

        for failure in &result.failures {
            report.note(format!("  {} failed: {}", failure.backend, failure.error));
        }
        let Some(backend) = result.answered_by else {
            warn!(query = %planned.query, "no backend answered");
            report.note("  No backend answered this query".to_string());
            continue;
        };
        report.queries_answered += 1;

        let mut added_here = 0;
        for hit in &result.hits {
            if job.recruiters.len() >= max_results {
                break;
            }
            if !hit.url.to_lowercase().contains("linkedin.com/in/") {
                continue;
            }
            report.hits_seen += 1;

            let (recruiter, name_recovered) = recruiter_from_hit(hit, &backend, &planned.term);
            if !seen.insert(dedup_key(&recruiter.linkedin_url)) {
                report.duplicates += 1;
                continue;
            }
            if !name_recovered {
                report.unparseable += 1;
                warn!(url = %recruiter.linkedin_url, name = %recruiter.name, "kept raw heading as name");
            }
            job.recruiters.push(recruiter);
            added_here += 1;
        }
        report.added += added_here;
        report.note(format!(
            "  [{}] {} result(s), {} new recruiter(s)",
            backend,
            result.hits.len(),
            added_here
        ));
    }
}

fn pause(delay: (Duration, Duration)) {
    let (min, max) = delay;
    if max.is_zero() {
        return;
    }
    let secs = if max > min {
        rand::thread_rng().gen_range(min.as_secs_f64()..max.as_secs_f64())
    } else {
        min.as_secs_f64()
    };
    std::thread::sleep(Duration::from_secs_f64(secs));
}

/// Build a recruiter from a search hit. The flag is false when no plausible name
/// could be read from the heading or the slug; the raw heading is kept as the name.
pub fn recruiter_from_hit(hit: &SearchHit, backend: &str, term: &str) -> (RecruiterRecord, bool) {
    let (name, title) = parse_heading(&hit.title);
    let slug = profile_slug(&hit.url);

    let truncated = TRUNCATED_NAME
        .captures(&name)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()));

    let (name, recovered) = if let Some((given, initial)) = truncated {
        let name = slug
            .as_deref()
            .and_then(|s| name_from_slug(s, Some((&given, &initial))))
            .unwrap_or(name);
        (name, true)
    } else if is_plausible_name(&name) {
        (name, true)
    } else {
        match slug.as_deref().and_then(|s| name_from_slug(s, None)) {
            Some(from_slug) => (from_slug, true),
            None if name.is_empty() => (hit.title.trim().to_string(), false),
            None => (name, false),
        }
    };

    let recruiter = RecruiterRecord::new(&hit.url, &name, title, format!("{} [{}]", backend, term));
    (recruiter, recovered)
}

/// Split a result heading like `"Jane Doe - Technical Recruiter at Acme | LinkedIn"`.
pub fn parse_heading(heading: &str) -> (String, Option<String>) {
    let stripped = LINKEDIN_SUFFIX.replace(heading.trim(), "");
    let stripped = stripped.trim();
    match HEADING_SPLIT.captures(stripped) {
        Some(caps) => {
            let title = caps[2].trim().to_string();
            (caps[1].trim().to_string(), (!title.is_empty()).then_some(title))
        }
        None => (stripped.to_string(), None),
    }
}

fn is_plausible_name(name: &str) -> bool {
    let len = name.chars().count();
    (2..=60).contains(&len) && !name.chars().any(|c| c.is_ascii_digit())
}

fn profile_slug(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    let idx = lower.find("/in/")?;
    let slug = lower[idx + 4..].split(['/', '?', '#']).next()?.trim();
    (!slug.is_empty()).then(|| slug.to_string())
}

/// Rebuild a display name from a profile slug.
///
/// Hyphenated slugs give one word per token, with numeric tokens dropped. A
/// separator-less slug is split only when it starts with the known given name and
/// continues with the known initial. Anything else becomes a single capitalized
/// word, which loses the given/family split.
pub fn name_from_slug(slug: &str, truncated: Option<(&str, &str)>) -> Option<String> {
    let tokens: Vec<&str> = slug
        .split('-')
        .filter(|t| !t.is_empty())
        .filter(|t| !t.chars().any(|c| c.is_ascii_digit()))
        .collect();

    match tokens.as_slice() {
        [] => None,
        [single] => {
            if let Some((given, initial)) = truncated {
                let given_lower = given.to_lowercase();
                let initial_lower = initial.to_lowercase();
                if let Some(rest) = single.strip_prefix(given_lower.as_str()) {
                    if !rest.is_empty() && rest.starts_with(initial_lower.as_str()) {
                        return Some(format!("{} {}", capitalize(&given_lower), capitalize(rest)));
                    }
                }
            }
            Some(capitalize(single))
        }
        many => Some(many.iter().map(|t| capitalize(t)).collect::<Vec<_>>().join(" ")),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Identity of a LinkedIn profile URL across scheme, subdomain, query and trailing slash.
pub fn dedup_key(url: &str) -> String {
    let mut lower = url.trim().to_lowercase();
    if !lower.contains("://") {
        lower = format!("https://{}", lower.trim_start_matches('/'));
    }
    if let Ok(parsed) = Url::parse(&lower) {
        if let Some(host) = parsed.host_str() {
            let host = if host == "linkedin.com" || host.ends_with(".linkedin.com") {
                "linkedin.com"
            } else {
                host
            };
            return format!("{}{}", host, parsed.path().trim_end_matches('/'));
        }
    }
    let without_scheme = lower.split_once("://").map(|(_, rest)| rest).unwrap_or(&lower);
    let without_query = without_scheme.split(['?', '#']).next().unwrap_or_default();
    without_query.trim_end_matches('/').to_string()
}

/// Primary city from a location hint such as `"Orlando, FL, USA"`.
pub fn extract_city(location: &str) -> Option<String> {
    let parts: Vec<&str> = location
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    parts
        .iter()
        .find(|p| p.chars().count() > 1 && !STATES_AND_COUNTRIES.contains(&p.to_lowercase().as_str()))
        .or_else(|| parts.first())
        .map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobFamily, Platform};
    use crate::search::tests::{hit, ScriptedBackend};
    use crate::search::{SearchBackend, SearchError};
    use chrono::Utc;

    const NO_DELAY: (Duration, Duration) = (Duration::ZERO, Duration::ZERO);

    fn job(location: Option<&str>) -> JobRecord {
        JobRecord {
            url: "https://jobs.lever.co/acme/1".to_string(),
            platform: Platform::Lever,
            scraped_at: Utc::now(),
            title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            job_family: JobFamily::SoftwareEngineering,
            location: location.map(str::to_string),
            page_title: String::new(),
            description: String::new(),
            recruiters: Vec::new(),
            draft: None,
        }
    }

    fn chain_of(backends: Vec<Box<dyn SearchBackend>>) -> SearchChain {
        SearchChain::new(backends)
    }

    #[test]
    fn test_query_cascade_order() {
        let queries: Vec<String> = plan_queries(&job(Some("Chicago, IL, USA")))
            .into_iter()
            .map(|q| q.query)
            .collect();
        assert_eq!(
            queries,
            vec![
                r#"site:linkedin.com/in "Acme" "technical recruiter" "Chicago""#,
                r#"site:linkedin.com/in "Acme" "technical recruiter""#,
                r#"site:linkedin.com/in "Acme" "engineering recruiter" "Chicago""#,
                r#"site:linkedin.com/in "Acme" "engineering recruiter""#,
            ]
        );
        assert_eq!(plan_queries(&job(None)).len(), 2);
    }

    #[test]
    fn test_dedup_across_subdomains_and_trailing_slash() {
        let (ddg, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(vec![
                hit("Jane Doe - Technical Recruiter at Acme | LinkedIn", "https://www.linkedin.com/in/jane-doe/"),
                hit("Jane Doe - Recruiter | LinkedIn", "https://uk.linkedin.com/in/jane-doe?trk=x"),
                hit("Sam Lee - Talent Partner", "https://www.linkedin.com/in/sam-lee"),
            ])],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);
        let mut record = job(None);

        let report = find_recruiters(&mut record, &mut chain, 5, NO_DELAY).unwrap();
        assert_eq!(record.recruiters.len(), 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(record.recruiters[0].name, "Jane Doe");
        assert_eq!(record.recruiters[0].title.as_deref(), Some("Technical Recruiter at Acme"));
        assert_eq!(record.recruiters[0].provenance, "duckduckgo [technical recruiter]");
    }

    #[test]
    fn test_existing_recruiters_seed_dedup_and_cap() {
        let mut record = job(None);
        record.recruiters.push(RecruiterRecord::new(
            "https://linkedin.com/in/jane-doe",
            "Jane Doe",
            None,
            "brave [technical recruiter]".to_string(),
        ));
        let (ddg, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(vec![
                hit("Jane Doe - Recruiter", "https://www.linkedin.com/in/jane-doe"),
                hit("Ann Fox - Recruiter", "https://www.linkedin.com/in/ann-fox"),
                hit("Bo Kim - Recruiter", "https://www.linkedin.com/in/bo-kim"),
            ])],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);

        find_recruiters(&mut record, &mut chain, 2, NO_DELAY).unwrap();
        assert_eq!(record.recruiters.len(), 2);
        assert_eq!(record.recruiters[1].name, "Ann Fox");
    }

    #[test]
    fn test_cap_already_reached_runs_no_queries() {
        let mut record = job(None);
        record.recruiters.push(RecruiterRecord::new(
            "https://linkedin.com/in/a-b",
            "A B",
            None,
            "brave [recruiter]".to_string(),
        ));
        let (ddg, calls) = ScriptedBackend::new("duckduckgo", vec![]);
        let mut chain = chain_of(vec![Box::new(ddg)]);

        let report = find_recruiters(&mut record, &mut chain, 1, NO_DELAY).unwrap();
        assert_eq!(report.queries_run, 0);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_last_resort_query_only_when_nothing_added() {
        let (ddg, calls) = ScriptedBackend::new(
            "duckduckgo",
            vec![
                Ok(vec![]),
                Ok(vec![hit("Not a profile", "https://acme.com/team")]),
                Ok(vec![hit("Lee Park - Talent Acquisition", "https://www.linkedin.com/in/lee-park")]),
            ],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);
        let mut record = job(None);

        let report = find_recruiters(&mut record, &mut chain, 5, NO_DELAY).unwrap();
        let calls = calls.borrow();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], r#"site:linkedin.com/in "Acme" "talent""#);
        assert_eq!(report.added, 1);
        assert_eq!(record.recruiters[0].provenance, "duckduckgo [talent]");
    }

    #[test]
    fn test_no_last_resort_after_success() {
        let (ddg, calls) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(vec![hit("Lee Park - Recruiter", "https://www.linkedin.com/in/lee-park")])],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);
        let mut record = job(None);

        find_recruiters(&mut record, &mut chain, 5, NO_DELAY).unwrap();
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn test_failed_backend_falls_through_and_is_traced() {
        let (ddg, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![Err(SearchError::BotDetected("202".into()))],
        );
        let (brave, _) = ScriptedBackend::new(
            "brave",
            vec![Ok(vec![hit("Ana Ruiz - Recruiter", "https://www.linkedin.com/in/ana-ruiz")])],
        );
        let mut chain = chain_of(vec![Box::new(ddg), Box::new(brave)]);
        let mut record = job(None);

        let report = find_recruiters(&mut record, &mut chain, 1, NO_DELAY).unwrap();
        assert_eq!(record.recruiters[0].provenance, "brave [technical recruiter]");
        assert!(report.trace.iter().any(|l| l.contains("duckduckgo failed")));
    }

    #[test]
    fn test_missing_company_is_an_error() {
        let mut record = job(None);
        record.company = "  ".to_string();
        let mut chain = chain_of(vec![]);
        assert!(find_recruiters(&mut record, &mut chain, 5, NO_DELAY).is_err());
    }

    #[test]
    fn test_parse_heading_variants() {
        assert_eq!(
            parse_heading("Jane Doe – Talent Acquisition | LinkedIn"),
            ("Jane Doe".to_string(), Some("Talent Acquisition".to_string()))
        );
        assert_eq!(
            parse_heading("Alice Brown • Senior Recruiter at Company"),
            ("Alice Brown".to_string(), Some("Senior Recruiter at Company".to_string()))
        );
        assert_eq!(
            parse_heading("Mary-Jane Smith - Recruiter"),
            ("Mary-Jane Smith".to_string(), Some("Recruiter".to_string()))
        );
        assert_eq!(parse_heading("Chris Young | LinkedIn"), ("Chris Young".to_string(), None));
    }

    #[test]
    fn test_truncated_initial_recovered_from_slug() {
        let (r, recovered) = recruiter_from_hit(
            &hit("Jana H. - Recruiter at Acme", "https://www.linkedin.com/in/janahaegi"),
            "brave",
            "recruiter",
        );
        assert!(recovered);
        assert_eq!(r.name, "Jana Haegi");

        let (r, _) = recruiter_from_hit(
            &hit("Jana H. - Recruiter", "https://www.linkedin.com/in/jana-haegi-8a7b12"),
            "brave",
            "recruiter",
        );
        assert_eq!(r.name, "Jana Haegi");
    }

    #[test]
    fn test_implausible_name_recovered_or_kept_raw() {
        let (r, recovered) = recruiter_from_hit(
            &hit("2024 Hiring - Recruiter", "https://www.linkedin.com/in/tom-baker-99"),
            "tavily",
            "recruiter",
        );
        assert!(recovered);
        assert_eq!(r.name, "Tom Baker");

        let (r, recovered) =
            recruiter_from_hit(&hit("123 - Recruiter", "https://www.linkedin.com/in/12345"), "tavily", "r");
        assert!(!recovered);
        assert_eq!(r.name, "123");
        assert_eq!(r.title.as_deref(), Some("Recruiter"));
    }

    #[test]
    fn test_unparseable_hit_is_kept_and_counted() {
        let (ddg, _) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(vec![
                hit("123 - Recruiter", "https://www.linkedin.com/in/12345"),
                hit("Ana Ruiz - Recruiter", "https://www.linkedin.com/in/ana-ruiz"),
            ])],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);
        let mut record = job(None);

        let report = find_recruiters(&mut record, &mut chain, 5, NO_DELAY).unwrap();
        assert_eq!(record.recruiters.len(), 2);
        assert_eq!(report.added, 2);
        assert_eq!(report.unparseable, 1);
        assert_eq!(record.recruiters[0].name, "123");
    }

    #[test]
    fn test_rerun_with_full_record_is_idempotent() {
        let urls = ["ann-fox", "bo-kim", "cy-lo", "di-ng", "ed-oh"];
        let mut record = job(None);
        for slug in urls {
            record.recruiters.push(RecruiterRecord::new(
                &format!("https://www.linkedin.com/in/{}", slug),
                slug,
                None,
                "duckduckgo [technical recruiter]".to_string(),
            ));
        }
        let before: Vec<String> = record.recruiters.iter().map(|r| r.linkedin_url.clone()).collect();
        let (ddg, calls) = ScriptedBackend::new(
            "duckduckgo",
            vec![Ok(urls
                .iter()
                .map(|slug| hit("Someone - Recruiter", &format!("https://www.linkedin.com/in/{}", slug)))
                .collect())],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);

        let report = find_recruiters(&mut record, &mut chain, 5, NO_DELAY).unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.queries_run, 0);
        assert!(calls.borrow().is_empty());
        let after: Vec<String> = record.recruiters.iter().map(|r| r.linkedin_url.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_schemeless_and_regional_profiles_are_one_recruiter() {
        let (ddg, _) = ScriptedBackend::new(
            "tavily",
            vec![Ok(vec![
                hit("Jane Doe - Recruiter", "linkedin.com/in/jdoe"),
                hit("Jane Doe - Recruiter", "cn.linkedin.com/in/jdoe"),
                hit("Jane Doe - Recruiter", "https://www.linkedin.com/in/jdoe/"),
            ])],
        );
        let mut chain = chain_of(vec![Box::new(ddg)]);
        let mut record = job(None);

        let report = find_recruiters(&mut record, &mut chain, 5, NO_DELAY).unwrap();
        assert_eq!(record.recruiters.len(), 1);
        assert_eq!(report.duplicates, 2);
    }

    #[test]
    fn test_unsplittable_slug_is_single_word() {
        assert_eq!(name_from_slug("jhaegi", Some(("Jana", "H"))), Some("Jhaegi".to_string()));
        assert_eq!(name_from_slug("", None), None);
    }

    #[test]
    fn test_dedup_key_normalization() {
        assert_eq!(dedup_key("https://WWW.LinkedIn.com/in/Jane-Doe/?x=1#top"), "linkedin.com/in/jane-doe");
        assert_eq!(dedup_key("http://ca.linkedin.com/in/jane-doe"), "linkedin.com/in/jane-doe");
        assert_eq!(dedup_key("linkedin.com/in/jdoe"), dedup_key("cn.linkedin.com/in/jdoe"));
        assert_eq!(dedup_key("www.linkedin.com/in/jdoe?trk=a"), "linkedin.com/in/jdoe");
    }

    #[test]
    fn test_extract_city() {
        assert_eq!(extract_city("Orlando, FL, USA").as_deref(), Some("Orlando"));
        assert_eq!(extract_city("China, Shanghai").as_deref(), Some("Shanghai"));
        assert_eq!(extract_city("Washington, D.C.").as_deref(), Some("Washington"));
        assert_eq!(extract_city("Texas").as_deref(), Some("Texas"));
        assert_eq!(extract_city(""), None);
    }
}
