use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::patterns::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Greenhouse,
    Lever,
    Workday,
    Generic,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Greenhouse => "greenhouse",
            Platform::Lever => "lever",
            Platform::Workday => "workday",
            Platform::Generic => "generic",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "greenhouse" => Ok(Platform::Greenhouse),
            "lever" => Ok(Platform::Lever),
            "workday" => Ok(Platform::Workday),
            "generic" => Ok(Platform::Generic),
            other => Err(format!(
                "Unknown platform '{}'. Available: greenhouse, lever, workday, generic",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobFamily {
    #[serde(rename = "Software Engineering")]
    SoftwareEngineering,
    #[serde(rename = "Data Science / ML")]
    DataScienceMl,
    #[serde(rename = "Data Analytics")]
    DataAnalytics,
    #[serde(rename = "Business Analytics")]
    BusinessAnalytics,
    #[serde(rename = "Business Development / Sales")]
    BusinessDevelopment,
    #[serde(rename = "Product Management")]
    ProductManagement,
    #[serde(rename = "Design / UX")]
    DesignUx,
    #[serde(rename = "DevOps / Infrastructure")]
    DevopsInfra,
    #[serde(rename = "Cybersecurity")]
    Cybersecurity,
    #[serde(rename = "Marketing")]
    Marketing,
    #[serde(rename = "Finance / Accounting")]
    Finance,
    #[serde(rename = "Legal / Compliance")]
    Legal,
    #[serde(rename = "Research")]
    Research,
    #[serde(rename = "Operations")]
    Operations,
    #[serde(rename = "Policy / Government Affairs")]
    Policy,
    #[serde(rename = "Other")]
    Other,
}

impl JobFamily {
    pub const ALL: [JobFamily; 16] = [
        JobFamily::SoftwareEngineering,
        JobFamily::DataScienceMl,
        JobFamily::DataAnalytics,
        JobFamily::BusinessAnalytics,
        JobFamily::BusinessDevelopment,
        JobFamily::ProductManagement,
        JobFamily::DesignUx,
        JobFamily::DevopsInfra,
        JobFamily::Cybersecurity,
        JobFamily::Marketing,
        JobFamily::Finance,
        JobFamily::Legal,
        JobFamily::Research,
        JobFamily::Operations,
        JobFamily::Policy,
        JobFamily::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            JobFamily::SoftwareEngineering => "Software Engineering",
            JobFamily::DataScienceMl => "Data Science / ML",
            JobFamily::DataAnalytics => "Data Analytics",
            JobFamily::BusinessAnalytics => "Business Analytics",
            JobFamily::BusinessDevelopment => "Business Development / Sales",
            JobFamily::ProductManagement => "Product Management",
            JobFamily::DesignUx => "Design / UX",
            JobFamily::DevopsInfra => "DevOps / Infrastructure",
            JobFamily::Cybersecurity => "Cybersecurity",
            JobFamily::Marketing => "Marketing",
            JobFamily::Finance => "Finance / Accounting",
            JobFamily::Legal => "Legal / Compliance",
            JobFamily::Research => "Research",
            JobFamily::Operations => "Operations",
            JobFamily::Policy => "Policy / Government Affairs",
            JobFamily::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<JobFamily> {
        let label = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.label().eq_ignore_ascii_case(label))
    }

    /// Recruiter role terms searched for this family, most specific first.
    pub fn recruiter_terms(&self) -> [&'static str; 2] {
        match self {
            JobFamily::SoftwareEngineering => ["technical recruiter", "engineering recruiter"],
            JobFamily::DataScienceMl => ["technical recruiter", "machine learning recruiter"],
            JobFamily::DataAnalytics => ["technical recruiter", "data recruiter"],
            JobFamily::BusinessAnalytics => ["talent acquisition", "recruiter"],
            JobFamily::BusinessDevelopment => ["sales recruiter", "talent acquisition"],
            JobFamily::ProductManagement => ["technical recruiter", "product recruiter"],
            JobFamily::DesignUx => ["design recruiter", "creative recruiter"],
            JobFamily::DevopsInfra => ["technical recruiter", "infrastructure recruiter"],
            JobFamily::Cybersecurity => ["security recruiter", "technical recruiter"],
            JobFamily::Marketing => ["marketing recruiter", "talent acquisition"],
            JobFamily::Finance => ["finance recruiter", "talent acquisition"],
            JobFamily::Legal => ["legal recruiter", "talent acquisition"],
            JobFamily::Research => ["research recruiter", "technical recruiter"],
            JobFamily::Operations => ["operations recruiter", "talent acquisition"],
            JobFamily::Policy => ["recruiter", "talent acquisition"],
            JobFamily::Other => ["recruiter", "talent acquisition"],
        }
    }
}

impl fmt::Display for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub url: String,
    pub platform: Platform,
    pub scraped_at: DateTime<Utc>,
    pub title: String,
    pub company: String,
    pub job_family: JobFamily,
    pub location: Option<String>,
    pub page_title: String,
    pub description: String,
    #[serde(default)]
    pub recruiters: Vec<RecruiterRecord>,
    #[serde(default)]
    pub draft: Option<EmailDraft>,
}

impl JobRecord {
    /// Stable storage key: `{company}__{title}__{YYYYMMDD_HHMMSS}`.
    pub fn key(&self) -> String {
        format!(
            "{}__{}__{}",
            slug(&self.company),
            slug(&self.title),
            self.scraped_at.format("%Y%m%d_%H%M%S")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
    pub drafted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SendState {
    #[default]
    Unsent,
    Sent,
    Bounced,
    RetryPending,
    Exhausted,
}

impl SendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendState::Unsent => "unsent",
            SendState::Sent => "sent",
            SendState::Bounced => "bounced",
            SendState::RetryPending => "retry-pending",
            SendState::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SendOutcome {
    Sent,
    Bounced,
    UnknownPending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAttempt {
    pub at: DateTime<Utc>,
    pub address: String,
    pub outcome: SendOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecruiterRecord {
    pub linkedin_url: String,
    pub name: String,
    pub title: Option<String>,
    pub provenance: String, // "{backend} [{query term}]"
    pub found_at: DateTime<Utc>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_candidates: Vec<String>,
    #[serde(default)]
    pub email_pattern: Option<Pattern>,
    #[serde(default)]
    pub pattern_index: usize,
    #[serde(default)]
    pub send_state: SendState,
    #[serde(default)]
    pub attempts: Vec<SendAttempt>,
}

impl RecruiterRecord {
    pub fn new(linkedin_url: &str, name: &str, title: Option<String>, provenance: String) -> Self {
        Self {
            linkedin_url: linkedin_url.to_string(),
            name: name.to_string(),
            title,
            provenance,
            found_at: Utc::now(),
            email: None,
            email_candidates: Vec::new(),
            email_pattern: None,
            pattern_index: 0,
            send_state: SendState::Unsent,
            attempts: Vec::new(),
        }
    }

    pub fn last_sent(&self) -> Option<&SendAttempt> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.outcome == SendOutcome::Sent)
    }
}

/// Filename-safe segment: lowercase, punctuation dropped, separators collapsed to `_`.
pub fn slug(text: &str) -> String {
    let mut out = String::new();
    let mut pending_sep = false;
    for c in text.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else if c.is_whitespace() || c == '_' || c == '-' {
            pending_sep = true;
        }
    }
    out.chars().take(40).collect()
}
