use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, resolved once at startup and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub brave_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub google_cse_api_key: Option<String>,
    pub google_cse_cx: Option<String>,
    pub hunter_api_key: Option<String>,
    pub apollo_api_key: Option<String>,

    pub llm_model: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub groq_api_key: Option<String>,

    pub webdriver_url: String,
    pub http_timeout: Duration,
    pub query_delay: (Duration, Duration),

    pub mail: MailSettings,
    pub outreach: OutreachLimits,
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub username: Option<String>,
    pub password_file: Option<PathBuf>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
    pub sender_name: String,
}

#[derive(Debug, Clone)]
pub struct OutreachLimits {
    pub max_send_per_run: usize,
    pub bounce_wait: Duration,
    pub bounce_lookback: Duration,
    pub max_attempts: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            brave_api_key: None,
            tavily_api_key: None,
            google_cse_api_key: None,
            google_cse_cx: None,
            hunter_api_key: None,
            apollo_api_key: None,
            llm_model: "groq".to_string(),
            anthropic_api_key: None,
            openai_api_key: None,
            groq_api_key: None,
            webdriver_url: "http://localhost:4444".to_string(),
            http_timeout: Duration::from_secs(15),
            query_delay: (Duration::from_secs(4), Duration::from_secs(8)),
            mail: MailSettings {
                username: None,
                password_file: None,
                smtp_host: "smtp.gmail.com".to_string(),
                smtp_port: 465,
                imap_host: "imap.gmail.com".to_string(),
                imap_port: 993,
                sender_name: String::new(),
            },
            outreach: OutreachLimits {
                max_send_per_run: 3,
                bounce_wait: Duration::from_secs(120),
                bounce_lookback: Duration::from_secs(60 * 60),
                max_attempts: 6,
            },
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup, so callers and tests never touch process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mut settings = Self {
            brave_api_key: get("BRAVE_API_KEY"),
            tavily_api_key: get("TAVILY_API_KEY"),
            google_cse_api_key: get("GOOGLE_CSE_API_KEY"),
            google_cse_cx: get("GOOGLE_CSE_CX"),
            hunter_api_key: get("HUNTER_API_KEY"),
            apollo_api_key: get("APOLLO_API_KEY"),
            llm_model: get("LLM_MODEL").unwrap_or(defaults.llm_model),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            groq_api_key: get("GROQ_API_KEY"),
            webdriver_url: get("WEBDRIVER_URL").unwrap_or(defaults.webdriver_url),
            http_timeout: defaults.http_timeout,
            query_delay: defaults.query_delay,
            mail: MailSettings {
                username: get("MAIL_USERNAME"),
                password_file: get("MAIL_PASSWORD_FILE").map(|p| expand_home(&p, &lookup)),
                smtp_host: get("SMTP_HOST").unwrap_or(defaults.mail.smtp_host),
                smtp_port: defaults.mail.smtp_port,
                imap_host: get("IMAP_HOST").unwrap_or(defaults.mail.imap_host),
                imap_port: defaults.mail.imap_port,
                sender_name: get("SENDER_NAME").unwrap_or_default(),
            },
            outreach: defaults.outreach,
        };

        if let Some(v) = get("HTTP_TIMEOUT_SECS") {
            settings.http_timeout = Duration::from_secs(parse_num("HTTP_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SMTP_PORT") {
            settings.mail.smtp_port = parse_num("SMTP_PORT", &v)?;
        }
        if let Some(v) = get("IMAP_PORT") {
            settings.mail.imap_port = parse_num("IMAP_PORT", &v)?;
        }
        if let Some(v) = get("MAX_SEND_PER_RUN") {
            settings.outreach.max_send_per_run = parse_num("MAX_SEND_PER_RUN", &v)?;
        }
        if let Some(v) = get("BOUNCE_WAIT_SECONDS") {
            settings.outreach.bounce_wait = Duration::from_secs(parse_num("BOUNCE_WAIT_SECONDS", &v)?);
        }
        if let Some(v) = get("BOUNCE_LOOKBACK_MINUTES") {
            let minutes: u64 = parse_num("BOUNCE_LOOKBACK_MINUTES", &v)?;
            settings.outreach.bounce_lookback = Duration::from_secs(minutes * 60);
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            settings.outreach.max_attempts = parse_num("MAX_ATTEMPTS", &v)?;
        }
        if let (Some(min), Some(max)) = (get("QUERY_DELAY_MIN_SECS"), get("QUERY_DELAY_MAX_SECS")) {
            let min: u64 = parse_num("QUERY_DELAY_MIN_SECS", &min)?;
            let max: u64 = parse_num("QUERY_DELAY_MAX_SECS", &max)?;
            if min > max {
                return Err(anyhow!("QUERY_DELAY_MIN_SECS ({}) exceeds QUERY_DELAY_MAX_SECS ({})", min, max));
            }
            settings.query_delay = (Duration::from_secs(min), Duration::from_secs(max));
        }

        Ok(settings)
    }

    /// Settings for tests: no keys, no inter-query delay.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            query_delay: (Duration::ZERO, Duration::ZERO),
            ..Self::default()
        }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("{} must be a number, got '{}'", key, value))
}

fn expand_home<F>(path: &str, lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = lookup("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let s = settings_from(&[]).unwrap();
        assert_eq!(s.outreach.max_send_per_run, 3);
        assert_eq!(s.outreach.max_attempts, 6);
        assert_eq!(s.outreach.bounce_wait, Duration::from_secs(120));
        assert_eq!(s.outreach.bounce_lookback, Duration::from_secs(3600));
        assert_eq!(s.mail.smtp_host, "smtp.gmail.com");
        assert!(s.brave_api_key.is_none());
    }

    #[test]
    fn test_blank_values_treated_as_unset() {
        let s = settings_from(&[("BRAVE_API_KEY", "  "), ("TAVILY_API_KEY", "tvly-1")]).unwrap();
        assert!(s.brave_api_key.is_none());
        assert_eq!(s.tavily_api_key.as_deref(), Some("tvly-1"));
    }

    #[test]
    fn test_numeric_overrides_and_home_expansion() {
        let s = settings_from(&[
            ("MAX_SEND_PER_RUN", "5"),
            ("BOUNCE_LOOKBACK_MINUTES", "30"),
            ("MAIL_PASSWORD_FILE", "~/.mail_password"),
            ("HOME", "/home/ada"),
        ])
        .unwrap();
        assert_eq!(s.outreach.max_send_per_run, 5);
        assert_eq!(s.outreach.bounce_lookback, Duration::from_secs(1800));
        assert_eq!(s.mail.password_file, Some(PathBuf::from("/home/ada/.mail_password")));
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let err = settings_from(&[("MAX_ATTEMPTS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("MAX_ATTEMPTS"));
    }

    #[test]
    fn test_inverted_delay_range_rejected() {
        let result = settings_from(&[("QUERY_DELAY_MIN_SECS", "9"), ("QUERY_DELAY_MAX_SECS", "2")]);
        assert!(result.is_err());
    }
}
