//! Corporate email naming patterns and the name normalization they rely on.

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

/// Number of templates tried before a recruiter is exhausted.
pub const PATTERN_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    #[serde(rename = "{first}.{last}")]
    FirstDotLast,
    #[serde(rename = "{f}{last}")]
    InitialLast,
    #[serde(rename = "{first}{l}")]
    FirstInitial,
    #[serde(rename = "{first}")]
    First,
    #[serde(rename = "{f}.{last}")]
    InitialDotLast,
    #[serde(rename = "{first}{last}")]
    FirstLast,
}

impl Pattern {
    /// Fixed precedence used whenever more than one template has to be tried.
    pub const ALL: [Pattern; PATTERN_COUNT] = [
        Pattern::FirstDotLast,
        Pattern::InitialLast,
        Pattern::FirstInitial,
        Pattern::First,
        Pattern::InitialDotLast,
        Pattern::FirstLast,
    ];

    pub fn template(&self) -> &'static str {
        match self {
            Pattern::FirstDotLast => "{first}.{last}",
            Pattern::InitialLast => "{f}{last}",
            Pattern::FirstInitial => "{first}{l}",
            Pattern::First => "{first}",
            Pattern::InitialDotLast => "{f}.{last}",
            Pattern::FirstLast => "{first}{last}",
        }
    }

    /// Accepts the template syntax Hunter uses for its `pattern` field.
    pub fn from_template(s: &str) -> Option<Pattern> {
        let s = s.trim();
        Self::ALL.iter().copied().find(|p| p.template() == s)
    }

    pub fn apply(&self, first: &str, last: &str, domain: &str) -> String {
        let f: String = first.chars().take(1).collect();
        let l: String = last.chars().take(1).collect();
        let local = match self {
            Pattern::FirstDotLast => format!("{first}.{last}"),
            Pattern::InitialLast => format!("{f}{last}"),
            Pattern::FirstInitial => format!("{first}{l}"),
            Pattern::First => first.to_string(),
            Pattern::InitialDotLast => format!("{f}.{last}"),
            Pattern::FirstLast => format!("{first}{last}"),
        };
        format!("{}@{}", local, domain)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template())
    }
}

/// Try order for a recruiter: the resolved pattern first, the rest in precedence order.
pub fn try_order(resolved: Option<Pattern>) -> Vec<Pattern> {
    let mut order = Vec::with_capacity(PATTERN_COUNT);
    if let Some(p) = resolved {
        order.push(p);
    }
    order.extend(Pattern::ALL.iter().copied().filter(|p| Some(*p) != resolved));
    order
}

/// One address when the pattern is known, all six in precedence order otherwise.
pub fn candidates(full_name: &str, domain: &str, resolved: Option<Pattern>) -> Vec<String> {
    let Some((first, last)) = split_name(full_name) else {
        return Vec::new();
    };
    match resolved {
        Some(p) => vec![p.apply(&first, &last, domain)],
        None => Pattern::ALL
            .iter()
            .map(|p| p.apply(&first, &last, domain))
            .collect(),
    }
}

/// Full six-address list with the resolved pattern in front.
pub fn expanded_candidates(full_name: &str, domain: &str, resolved: Option<Pattern>) -> Vec<String> {
    let Some((first, last)) = split_name(full_name) else {
        return Vec::new();
    };
    try_order(resolved)
        .iter()
        .map(|p| p.apply(&first, &last, domain))
        .collect()
}

const GENERATIONAL_SUFFIXES: [&str; 5] = ["jr", "sr", "ii", "iii", "iv"];

/// Split a display name into normalized `(first, last)` for address generation.
///
/// Credentials after a comma are dropped ("Julius Harris, SHRM"), middle names and
/// initials are skipped, and accents are folded to ASCII. Returns `None` when fewer
/// than two usable name parts remain.
pub fn split_name(full_name: &str) -> Option<(String, String)> {
    let base = full_name.split(',').next().unwrap_or("").trim();

    let words: Vec<&str> = base
        .split_whitespace()
        .filter(|w| !(w.starts_with('(') && w.ends_with(')')))
        .filter(|w| {
            let bare = w.trim_end_matches('.').to_lowercase();
            !GENERATIONAL_SUFFIXES.contains(&bare.as_str())
        })
        .collect();

    if words.len() < 2 {
        return None;
    }

    let first = fold_ascii(words[0]);
    let last_word = words[1..]
        .iter()
        .rev()
        .find(|w| w.trim_end_matches('.').chars().count() > 1)
        .copied()
        .unwrap_or(words[words.len() - 1]);
    let last = fold_ascii(last_word);

    if first.is_empty() || last.is_empty() {
        return None;
    }
    Some((first, last))
}

/// Lowercase, strip diacritics, keep ASCII letters only ("O'Brien" -> "obrien").
pub fn fold_ascii(s: &str) -> String {
    s.nfkd()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
