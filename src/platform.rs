//! Job posting URL normalization and ATS platform detection.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::models::Platform;

static WORKDAY_JOBS_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\.)wd[1-5]\.myworkdayjobs\.com$").unwrap());
static WORKDAY_HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\.)myworkday\.com$").unwrap());
static APPLY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/apply/?$").unwrap());

const BLOCKED_PARAMS: [&str; 6] = ["src", "ref", "domain", "start", "sort_by", "pid"];

/// Normalize a job posting URL and tag the ATS that hosts it.
///
/// Never fails: input that does not parse as an http(s) URL comes back trimmed
/// and tagged `generic`.
pub fn classify(raw: &str) -> (String, Platform) {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return (trimmed.to_string(), Platform::Generic);
    };
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return (trimmed.to_string(), Platform::Generic);
    }
    if url.set_scheme("https").is_err() {
        return (trimmed.to_string(), Platform::Generic);
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();
    let platform = detect(&host);

    strip_tracking_params(&mut url);

    if platform == Platform::Workday {
        let path = APPLY_SUFFIX.replace(url.path(), "").into_owned();
        url.set_path(if path.is_empty() { "/" } else { &path });
    }

    (url.to_string(), platform)
}

fn detect(host: &str) -> Platform {
    if on_domain(host, "greenhouse.io") {
        Platform::Greenhouse
    } else if on_domain(host, "lever.co") {
        Platform::Lever
    } else if WORKDAY_JOBS_HOST.is_match(host) || WORKDAY_HOST.is_match(host) {
        Platform::Workday
    } else {
        Platform::Generic
    }
}

fn on_domain(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|rest| rest.ends_with('.'))
}

fn is_tracking_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.starts_with("utm_") || BLOCKED_PARAMS.contains(&key.as_str())
}

// Works on the raw query so surviving pairs keep their original encoding and order.
fn strip_tracking_params(url: &mut Url) {
    let Some(query) = url.query() else {
        return;
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !is_tracking_key(key)
        })
        .collect();
    let rebuilt = kept.join("&");
    if rebuilt.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&rebuilt));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workday_apply_suffix_removed() {
        let (url, platform) = classify(
            "http://acme.wd3.myworkdayjobs.com/en-US/Careers/job/Chicago/Engineer_R123/apply",
        );
        assert_eq!(platform, Platform::Workday);
        assert_eq!(
            url,
            "https://acme.wd3.myworkdayjobs.com/en-US/Careers/job/Chicago/Engineer_R123"
        );
    }

    #[test]
    fn test_tracking_params_removed_in_order() {
        let (url, platform) =
            classify("https://jobs.lever.co/acme/abc-123?utm_source=x&id=5&ref=li&team=eng");
        assert_eq!(platform, Platform::Lever);
        assert_eq!(url, "https://jobs.lever.co/acme/abc-123?id=5&team=eng");
    }

    #[test]
    fn test_only_tracking_params_leaves_no_query() {
        let (url, _) = classify("https://example.com/careers/42?utm_source=x&utm_medium=y");
        assert_eq!(url, "https://example.com/careers/42");
    }

    #[test]
    fn test_greenhouse_and_lever_hosts() {
        let (_, p) = classify("https://boards.greenhouse.io/acme/jobs/4012345");
        assert_eq!(p, Platform::Greenhouse);
        let (_, p) = classify("https://job-boards.greenhouse.io/acme/jobs/4012345");
        assert_eq!(p, Platform::Greenhouse);
        let (_, p) = classify("https://jobs.lever.co/acme/1f2e");
        assert_eq!(p, Platform::Lever);
    }

    #[test]
    fn test_lookalike_hosts_are_generic() {
        let (_, p) = classify("https://greenhouse.io.attacker.example/acme/jobs/1");
        assert_eq!(p, Platform::Generic);
        let (_, p) = classify("https://notlever.co/acme/1");
        assert_eq!(p, Platform::Generic);
        let (_, p) = classify("https://greenhouse.io/acme/jobs/1");
        assert_eq!(p, Platform::Greenhouse);
    }

    #[test]
    fn test_workday_host_variants() {
        let (_, p) = classify("https://acme.wd5.myworkdayjobs.com/External/job/X");
        assert_eq!(p, Platform::Workday);
        let (_, p) = classify("https://wd1.myworkday.com/acme/d/inst/job.htmld");
        assert_eq!(p, Platform::Workday);
        let (_, p) = classify("https://acme.wd9.myworkdayjobs.com/External/job/X");
        assert_eq!(p, Platform::Generic);
    }

    #[test]
    fn test_apply_kept_on_non_workday() {
        let (url, p) = classify("https://careers.example.com/jobs/7/apply");
        assert_eq!(p, Platform::Generic);
        assert_eq!(url, "https://careers.example.com/jobs/7/apply");
    }

    #[test]
    fn test_unparseable_input_is_generic() {
        assert_eq!(
            classify("  not a url  "),
            ("not a url".to_string(), Platform::Generic)
        );
        assert_eq!(classify(""), (String::new(), Platform::Generic));
    }
}
