//! Per-recruiter send state machine: send, bounce detection and address retry.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::JobStore;
use crate::mailer::{BounceScanner, FileAttachment, MailTransport, OutgoingMessage};
use crate::models::{JobRecord, RecruiterRecord, SendAttempt, SendOutcome, SendState};
use crate::patterns::{self, PATTERN_COUNT};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("cannot {action} '{name}': recruiter is {state}")]
    InvalidState {
        action: &'static str,
        name: String,
        state: SendState,
    },

    #[error("'{0}' has no email address")]
    NoAddress(String),
}

impl RecruiterRecord {
    fn require(&self, action: &'static str, allowed: &[SendState]) -> Result<(), TransitionError> {
        if allowed.contains(&self.send_state) {
            Ok(())
        } else {
            Err(TransitionError::InvalidState {
                action,
                name: self.name.clone(),
                state: self.send_state,
            })
        }
    }

    fn record_send(&mut self, at: DateTime<Utc>, outcome: SendOutcome) -> Result<String, TransitionError> {
        self.require("send to", &[SendState::Unsent, SendState::RetryPending])?;
        let address = self
            .email
            .clone()
            .ok_or_else(|| TransitionError::NoAddress(self.name.clone()))?;
        self.attempts.push(SendAttempt {
            at,
            address: address.clone(),
            outcome,
        });
        self.send_state = SendState::Sent;
        Ok(address)
    }

    /// `unsent | retry-pending -> sent` once the transport accepted the message.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) -> Result<String, TransitionError> {
        self.record_send(at, SendOutcome::Sent)
    }

    /// Same transition as a send, with the outcome left unknown.
    pub fn mark_dry_run(&mut self, at: DateTime<Utc>) -> Result<String, TransitionError> {
        self.record_send(at, SendOutcome::UnknownPending)
    }

    /// `sent -> bounced`.
    pub fn mark_bounced(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require("mark bounced", &[SendState::Sent])?;
        let address = self
            .last_sent()
            .map(|a| a.address.clone())
            .or_else(|| self.email.clone())
            .ok_or_else(|| TransitionError::NoAddress(self.name.clone()))?;
        self.attempts.push(SendAttempt {
            at,
            address,
            outcome: SendOutcome::Bounced,
        });
        self.send_state = SendState::Bounced;
        Ok(())
    }

    /// `bounced -> retry-pending` with the next candidate address, or
    /// `bounced -> exhausted` when no template or attempt budget is left.
    pub fn advance_after_bounce(&mut self, max_attempts: usize) -> Result<SendState, TransitionError> {
        self.require("retry", &[SendState::Bounced])?;

        // A resolved pattern only produced one address; open up the rest.
        if self.email_candidates.len() <= 1 {
            if let Some(domain) = self.email.as_deref().and_then(|e| e.split_once('@')).map(|(_, d)| d.to_string()) {
                let expanded = patterns::expanded_candidates(&self.name, &domain, self.email_pattern);
                if !expanded.is_empty() {
                    self.email_candidates = expanded;
                }
            }
        }

        self.pattern_index += 1;
        let sends = self
            .attempts
            .iter()
            .filter(|a| a.outcome == SendOutcome::Sent)
            .count();

        let next = self.email_candidates.get(self.pattern_index).cloned();
        match next {
            Some(address) if self.pattern_index < PATTERN_COUNT && sends < max_attempts => {
                self.email = Some(address);
                self.send_state = SendState::RetryPending;
            }
            _ => self.send_state = SendState::Exhausted,
        }
        Ok(self.send_state)
    }
}

/// `Hi there,` becomes `Hi {First},`; the sender's name goes under `Best,`.
pub fn personalize(body: &str, recruiter_name: &str, sender_name: &str) -> String {
    let greeting = match patterns::split_name(recruiter_name) {
        Some((first, _)) => format!("Hi {},", capitalize(&first)),
        None => "Hi there,".to_string(),
    };
    let mut out = body.replacen("Hi there,", &greeting, 1);
    let sender_name = sender_name.trim();
    if !sender_name.is_empty() {
        out = out.replacen("Best,", &format!("Best,\n{}", sender_name), 1);
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub max_per_run: usize,
    pub max_attempts: usize,
    pub dry_run: bool,
    pub retry_bounced: bool,
    pub from_name: String,
    pub from_address: String,
    pub attachment: Option<FileAttachment>,
}

#[derive(Debug, Default)]
pub struct SendReport {
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
    pub dry_run: usize,
    pub retried: usize,
    pub exhausted: usize,
    pub trace: Vec<String>,
}

impl SendReport {
    fn note(&mut self, line: String) {
        info!("{}", line);
        self.trace.push(line);
    }
}

fn is_sendable(recruiter: &RecruiterRecord) -> bool {
    matches!(recruiter.send_state, SendState::Unsent | SendState::RetryPending) && recruiter.email.is_some()
}

/// Send the job's draft to up to `max_per_run` eligible recruiters in discovery order.
///
/// Every accepted send is saved before the next recruiter is processed. A dry
/// run makes the same transitions in memory only and never touches the
/// transport or the store.
pub fn send_outreach(
    job: &mut JobRecord,
    transport: Option<&dyn MailTransport>,
    store: &dyn JobStore,
    opts: &SendOptions,
) -> Result<SendReport> {
    let draft = job.draft.clone().ok_or_else(|| {
        anyhow!(
            "Job {} has no email draft. Run 'reachout draft {} --resume <file>' first.",
            job.key(),
            job.key()
        )
    })?;
    if !opts.dry_run && transport.is_none() {
        return Err(anyhow!("No mail transport configured"));
    }

    let mut report = SendReport::default();

    if opts.retry_bounced {
        let mut changed = false;
        for recruiter in job.recruiters.iter_mut().filter(|r| r.send_state == SendState::Bounced) {
            match recruiter.advance_after_bounce(opts.max_attempts)? {
                SendState::RetryPending => {
                    report.retried += 1;
                    report.note(format!(
                        "Retry queued for {} <{}> (pattern {}/{})",
                        recruiter.name,
                        recruiter.email.as_deref().unwrap_or(""),
                        recruiter.pattern_index + 1,
                        recruiter.email_candidates.len()
                    ));
                }
                _ => {
                    report.exhausted += 1;
                    report.note(format!("{}: all address patterns exhausted", recruiter.name));
                }
            }
            changed = true;
        }
        if changed && !opts.dry_run {
            store.save(job).context("Failed to save retry state")?;
        }
    }

    let selected: Vec<usize> = job
        .recruiters
        .iter()
        .enumerate()
        .filter(|(_, r)| is_sendable(r))
        .map(|(i, _)| i)
        .collect();
    report.eligible = selected.len();
    let total = selected.len().min(opts.max_per_run);
    if selected.is_empty() {
        report.note("No recruiters eligible to send".to_string());
        return Ok(report);
    }

    for (n, index) in selected.into_iter().take(opts.max_per_run).enumerate() {
        let recruiter = &mut job.recruiters[index];
        let Some(address) = recruiter.email.clone() else {
            continue;
        };
        let label = if recruiter.attempts.is_empty() {
            String::new()
        } else {
            format!(" [retry {}/{}]", recruiter.pattern_index + 1, recruiter.email_candidates.len())
        };

        if opts.dry_run {
            recruiter.mark_dry_run(Utc::now())?;
            report.dry_run += 1;
            report.note(format!(
                "[DRY RUN {}/{}] {} <{}>{}",
                n + 1,
                total,
                recruiter.name,
                address,
                label
            ));
            continue;
        }

        let message = OutgoingMessage {
            to: address.clone(),
            from_name: opts.from_name.clone(),
            from_address: opts.from_address.clone(),
            subject: draft.subject.clone(),
            body: personalize(&draft.body, &recruiter.name, &opts.from_name),
            attachment: opts.attachment.clone(),
        };
        let Some(transport) = transport else {
            continue;
        };
        match transport.deliver(&message) {
            Ok(()) => {
                recruiter.mark_sent(Utc::now())?;
                let name = recruiter.name.clone();
                store.save(job).context("Failed to save send state")?;
                report.sent += 1;
                report.note(format!("Sent [{}/{}] {} <{}>{}", n + 1, total, name, address, label));
            }
            Err(e) => {
                report.failed += 1;
                warn!(to = %address, error = %e, "send failed");
                report.trace.push(format!("Failed [{}/{}] {} <{}>: {}", n + 1, total, recruiter.name, address, e));
            }
        }
    }

    report.note(format!(
        "{} eligible, {} sent, {} failed, {} dry run",
        report.eligible, report.sent, report.failed, report.dry_run
    ));
    Ok(report)
}

#[derive(Debug, Default)]
pub struct BounceReport {
    pub awaiting: usize,
    pub too_recent: usize,
    pub bounced: usize,
    pub trace: Vec<String>,
}

impl BounceReport {
    fn note(&mut self, line: String) {
        info!("{}", line);
        self.trace.push(line);
    }
}

/// Mark sent recruiters whose last address shows up in a bounce notice.
///
/// Sends younger than `wait` are left alone so a late notice is not missed;
/// sends older than `lookback` are outside the scanned window.
pub fn check_bounces(
    job: &mut JobRecord,
    scanner: &dyn BounceScanner,
    store: &dyn JobStore,
    now: DateTime<Utc>,
    wait: Duration,
    lookback: Duration,
) -> Result<BounceReport> {
    let mut report = BounceReport::default();
    let wait = ChronoDuration::from_std(wait).context("bounce wait out of range")?;
    let lookback = ChronoDuration::from_std(lookback).context("bounce lookback out of range")?;
    let since = now - lookback;
    let settled = now - wait;

    let mut candidates = Vec::new();
    for (i, recruiter) in job.recruiters.iter().enumerate() {
        if recruiter.send_state != SendState::Sent {
            continue;
        }
        let Some(last) = recruiter.last_sent() else {
            continue;
        };
        report.awaiting += 1;
        if last.at > settled {
            report.too_recent += 1;
        } else if last.at >= since {
            candidates.push((i, last.address.to_lowercase()));
        }
    }

    if candidates.is_empty() {
        report.note(format!(
            "{} awaiting bounce check, {} too recent, none to scan",
            report.awaiting, report.too_recent
        ));
        return Ok(report);
    }

    let bounced = scanner.bounced_since(since)?;
    for (i, address) in candidates {
        if bounced.contains(&address) {
            let recruiter = &mut job.recruiters[i];
            recruiter.mark_bounced(now)?;
            report.bounced += 1;
            report.note(format!("Bounced: {} <{}>", recruiter.name, address));
        }
    }

    if report.bounced > 0 {
        store.save(job).context("Failed to save bounce state")?;
    }
    report.note(format!(
        "{} awaiting, {} too recent, {} bounced",
        report.awaiting, report.too_recent, report.bounced
    ));
    Ok(report)
}

/// When to look for bounce notices: sends must be `wait` old and at most `lookback` old.
#[derive(Debug, Clone, Copy)]
pub struct BounceWindow {
    pub now: DateTime<Utc>,
    pub wait: Duration,
    pub lookback: Duration,
}

/// Scan the mailbox first, then send with `retry_bounced`, so notices that
/// arrived since the last send are picked up without a separate `bounces` run.
pub fn retry_outreach(
    job: &mut JobRecord,
    scanner: &dyn BounceScanner,
    transport: Option<&dyn MailTransport>,
    store: &dyn JobStore,
    opts: &SendOptions,
    window: BounceWindow,
) -> Result<(BounceReport, SendReport)> {
    let bounces = check_bounces(job, scanner, store, window.now, window.wait, window.lookback)?;
    let opts = SendOptions {
        retry_bounced: true,
        ..opts.clone()
    };
    let sends = send_outreach(job, transport, store, &opts)?;
    Ok((bounces, sends))
}
