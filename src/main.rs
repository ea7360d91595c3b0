mod ai;
mod config;
mod db;
mod discovery;
mod mailer;
mod models;
mod outreach;
mod patterns;
mod platform;
mod recruiters;
mod scrape;
mod search;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Settings;
use db::{Database, JobStore};
use mailer::{FileAttachment, ImapBounceScanner, MailConfig, MailTransport, SmtpMailer};
use models::{JobRecord, Platform};
use outreach::{BounceWindow, SendOptions};
use scrape::Dispatcher;
use search::SearchChain;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reachout")]
#[command(about = "Recruiter outreach - scrape a posting, find its recruiters, guess their addresses, send")]
struct Cli {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// LLM model alias (overrides LLM_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Scrape a job posting and store the extracted record
    Scrape {
        /// Job posting URL
        url: String,

        /// Force a platform instead of detecting it from the URL
        #[arg(short, long)]
        platform: Option<Platform>,
    },

    /// List stored jobs
    List,

    /// Show a job, its recruiters and its draft
    Show {
        /// Job key, unique key prefix, or ID
        job: String,
    },

    /// Search for recruiters at the job's company
    Recruiters {
        /// Job key, unique key prefix, or ID
        job: String,

        /// Maximum recruiters kept on the job
        #[arg(short, long, default_value = "10")]
        max_results: usize,
    },

    /// Discover the mail domain and pattern, then generate candidate addresses
    Emails {
        /// Job key, unique key prefix, or ID
        job: String,
    },

    /// Draft the outreach email from a resume
    Draft {
        /// Job key, unique key prefix, or ID
        job: String,

        /// Resume file (.txt or .md)
        #[arg(short, long)]
        resume: PathBuf,
    },

    /// Send the drafted email to eligible recruiters
    Send {
        /// Job key, unique key prefix, or ID
        job: String,

        /// Maximum sends this run (defaults to MAX_SEND_PER_RUN)
        #[arg(short, long)]
        max_send: Option<usize>,

        /// Show what would be sent without sending or saving
        #[arg(long)]
        dry_run: bool,

        /// Move bounced recruiters to their next address before sending
        #[arg(long)]
        retry_bounced: bool,

        /// File to attach (e.g. resume.pdf)
        #[arg(short, long)]
        attach: Option<PathBuf>,

        /// Sender name for the From header and signature (defaults to SENDER_NAME)
        #[arg(long)]
        from_name: Option<String>,

        /// Skip the wait-then-scan for bounces after sending
        #[arg(long)]
        no_wait: bool,
    },

    /// Scan the mailbox for bounces of earlier sends
    Bounces {
        /// Job key, unique key prefix, or ID
        job: String,
    },

    /// Scrape, find recruiters, generate addresses and (with --resume) draft
    Run {
        /// Job posting URL
        url: String,

        /// Force a platform instead of detecting it from the URL
        #[arg(short, long)]
        platform: Option<Platform>,

        /// Maximum recruiters kept on the job
        #[arg(short, long, default_value = "10")]
        max_results: usize,

        /// Resume file (.txt or .md) used to draft the email
        #[arg(short, long)]
        resume: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "reachout=debug" } else { "reachout=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::from_env()?;
    let db = Database::open(cli.db.clone())?;
    let model = cli.model.clone().unwrap_or_else(|| settings.llm_model.clone());

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Scrape { url, platform } => {
            db.ensure_initialized()?;
            let job = scrape_stage(&settings, &model, &url, platform)?;
            let id = db.insert(&job)?;
            println!("\nStored job #{} as {}", id, job.key());
        }

        Commands::List => {
            db.ensure_initialized()?;
            let jobs = db.list()?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<5} {:<11} {:<20} {:<30} {:>5} {:>6} {:>5} {:<5}  {}",
                    "ID", "PLATFORM", "COMPANY", "TITLE", "RECR", "EMAIL", "SENT", "DRAFT", "KEY"
                );
                println!("{}", "-".repeat(140));
                for job in jobs {
                    println!(
                        "{:<5} {:<11} {:<20} {:<30} {:>5} {:>6} {:>5} {:<5}  {}",
                        job.id,
                        job.platform,
                        truncate(&job.company, 18),
                        truncate(&job.title, 28),
                        job.recruiters,
                        job.with_email,
                        job.sent,
                        if job.has_draft { "yes" } else { "-" },
                        job.key
                    );
                }
            }
        }

        Commands::Show { job } => {
            db.ensure_initialized()?;
            let job = db.load_resolved(&job)?;
            show_job(&job);
        }

        Commands::Recruiters { job, max_results } => {
            db.ensure_initialized()?;
            let mut job = db.load_resolved(&job)?;
            let mut chain = SearchChain::from_settings(&settings);
            recruiters_stage(&mut job, &mut chain, &settings, max_results)?;
            db.save(&job)?;
        }

        Commands::Emails { job } => {
            db.ensure_initialized()?;
            let mut job = db.load_resolved(&job)?;
            let mut chain = SearchChain::from_settings(&settings);
            emails_stage(&mut job, &mut chain, &settings)?;
            db.save(&job)?;
        }

        Commands::Draft { job, resume } => {
            db.ensure_initialized()?;
            let mut job = db.load_resolved(&job)?;
            draft_stage(&mut job, &settings, &model, &resume)?;
            db.save(&job)?;
        }

        Commands::Send {
            job,
            max_send,
            dry_run,
            retry_bounced,
            attach,
            from_name,
            no_wait,
        } => {
            db.ensure_initialized()?;
            let mut job = db.load_resolved(&job)?;
            let limits = &settings.outreach;

            let attachment = attach.as_deref().map(FileAttachment::read).transpose()?;
            let from_name = from_name.unwrap_or_else(|| settings.mail.sender_name.clone());
            let mail_config = if dry_run {
                None
            } else {
                Some(MailConfig::from_password_file(&settings.mail)?)
            };
            let mailer = mail_config.as_ref().map(SmtpMailer::new).transpose()?;
            let from_address = mail_config
                .as_ref()
                .map(|c| c.username.clone())
                .or_else(|| settings.mail.username.clone())
                .unwrap_or_default();

            let opts = SendOptions {
                max_per_run: max_send.unwrap_or(limits.max_send_per_run),
                max_attempts: limits.max_attempts,
                dry_run,
                retry_bounced,
                from_name,
                from_address,
                attachment,
            };
            let transport = mailer.as_ref().map(|m| m as &dyn MailTransport);
            let report = match (&mail_config, retry_bounced) {
                (Some(config), true) => {
                    let scanner = ImapBounceScanner::new(config.clone());
                    let window = BounceWindow {
                        now: Utc::now(),
                        wait: limits.bounce_wait,
                        lookback: limits.bounce_lookback,
                    };
                    let (bounces, sends) =
                        outreach::retry_outreach(&mut job, &scanner, transport, &db, &opts, window)?;
                    print_trace("Bounces", &bounces.trace);
                    sends
                }
                _ => outreach::send_outreach(&mut job, transport, &db, &opts)?,
            };
            print_trace("Send", &report.trace);
            if dry_run {
                println!("\n(Dry run - nothing was sent or saved)");
            }

            if let (Some(config), false) = (mail_config, no_wait) {
                if report.sent > 0 {
                    wait_with_countdown(limits.bounce_wait);
                    bounces_stage(&mut job, config, &db, &settings)?;
                }
            }
        }

        Commands::Bounces { job } => {
            db.ensure_initialized()?;
            let mut job = db.load_resolved(&job)?;
            let config = MailConfig::from_password_file(&settings.mail)?;
            bounces_stage(&mut job, config, &db, &settings)?;
        }

        Commands::Run {
            url,
            platform,
            max_results,
            resume,
        } => {
            db.ensure_initialized()?;
            // Fail on an unreadable resume before spending any lookups.
            if let Some(path) = &resume {
                read_resume(path)?;
            }

            let mut job = scrape_stage(&settings, &model, &url, platform)?;
            let id = db.insert(&job)?;
            println!("\nStored job #{} as {}", id, job.key());

            let mut chain = SearchChain::from_settings(&settings);
            recruiters_stage(&mut job, &mut chain, &settings, max_results)?;
            db.save(&job)?;

            emails_stage(&mut job, &mut chain, &settings)?;
            db.save(&job)?;

            if let Some(path) = &resume {
                draft_stage(&mut job, &settings, &model, path)?;
                db.save(&job)?;
                println!("\nNext: reachout send {} --dry-run", job.key());
            } else {
                println!("\nNext: reachout draft {} --resume <file>", job.key());
            }
        }
    }

    Ok(())
}

fn scrape_stage(
    settings: &Settings,
    model: &str,
    url: &str,
    platform_override: Option<Platform>,
) -> Result<JobRecord> {
    let (url, detected) = platform::classify(url);
    if !url.starts_with("https://") {
        return Err(anyhow!("'{}' is not an http(s) URL", url));
    }
    let platform = platform_override.unwrap_or(detected);

    println!("== Scrape ==");
    println!("  URL:      {}", url);
    println!("  Platform: {}{}", platform, if platform_override.is_some() { " (forced)" } else { "" });

    let page = Dispatcher::new(settings)
        .scrape(&url, platform)
        .with_context(|| format!("Scrape failed for {}", url))?;
    println!("  Text:     {} chars", page.raw_text.chars().count());

    let provider = ai::create_provider(&ai::resolve_model(model)?, settings)?;
    let job = ai::extract_job(provider.as_ref(), &page)?;
    println!("  Title:    {}", job.title);
    println!("  Company:  {}", job.company);
    println!("  Family:   {}", job.job_family);
    println!("  Location: {}", job.location.as_deref().unwrap_or("-"));
    Ok(job)
}

fn recruiters_stage(
    job: &mut JobRecord,
    chain: &mut SearchChain,
    settings: &Settings,
    max_results: usize,
) -> Result<()> {
    info!(backends = ?chain.backend_names(), "recruiter search");
    let report = recruiters::find_recruiters(job, chain, max_results, settings.query_delay)?;
    print_trace("Recruiters", &report.trace);
    Ok(())
}

fn emails_stage(job: &mut JobRecord, chain: &mut SearchChain, settings: &Settings) -> Result<()> {
    let (domains, patterns) = discovery::lookups_from_settings(settings);
    let report = discovery::discover_emails(job, chain, &domains, &patterns)?;
    print_trace("Emails", &report.trace);
    for r in job.recruiters.iter().filter(|r| !r.email_candidates.is_empty()) {
        println!("  {:<28} {}", truncate(&r.name, 26), r.email_candidates.join(", "));
    }
    Ok(())
}

fn draft_stage(job: &mut JobRecord, settings: &Settings, model: &str, resume: &Path) -> Result<()> {
    let resume_text = read_resume(resume)?;
    let provider = ai::create_provider(&ai::resolve_model(model)?, settings)?;
    let draft = ai::draft_outreach(provider.as_ref(), job, &resume_text)?;
    println!("== Draft ({}) ==", provider.model_name());
    println!("Subject: {}\n", draft.subject);
    println!("{}", draft.body);
    job.draft = Some(draft);
    Ok(())
}

fn bounces_stage(job: &mut JobRecord, config: MailConfig, store: &dyn JobStore, settings: &Settings) -> Result<()> {
    let scanner = ImapBounceScanner::new(config);
    let report = outreach::check_bounces(
        job,
        &scanner,
        store,
        Utc::now(),
        settings.outreach.bounce_wait,
        settings.outreach.bounce_lookback,
    )?;
    print_trace("Bounces", &report.trace);
    if report.bounced > 0 {
        println!("\nRetry with: reachout send {} --retry-bounced", job.key());
    }
    Ok(())
}

fn show_job(job: &JobRecord) {
    println!("Job {}", job.key());
    println!("Title:    {}", job.title);
    println!("Company:  {}", job.company);
    println!("Family:   {}", job.job_family);
    println!("Location: {}", job.location.as_deref().unwrap_or("-"));
    println!("Platform: {}", job.platform);
    println!("URL:      {}", job.url);
    println!("Scraped:  {}", job.scraped_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if job.recruiters.is_empty() {
        println!("\nNo recruiters yet.");
    } else {
        println!("\nRecruiters ({}):", job.recruiters.len());
        println!("{:<3} {:<24} {:<14} {:<32} {:<24}", "#", "NAME", "STATE", "EMAIL", "TITLE");
        println!("{}", "-".repeat(100));
        for (i, r) in job.recruiters.iter().enumerate() {
            let email = match (&r.email, r.email_candidates.len()) {
                (Some(e), n) if n > 1 => format!("{} ({}/{})", e, r.pattern_index + 1, n),
                (Some(e), _) => e.clone(),
                (None, _) => "-".to_string(),
            };
            println!(
                "{:<3} {:<24} {:<14} {:<32} {:<24}",
                i + 1,
                truncate(&r.name, 22),
                r.send_state,
                truncate(&email, 30),
                truncate(r.title.as_deref().unwrap_or("-"), 22)
            );
        }
    }

    if let Some(draft) = &job.draft {
        println!("\n--- Draft ---");
        println!("Subject: {}\n", draft.subject);
        println!("{}", draft.body);
    }

    if !job.description.is_empty() {
        println!("\n--- Description ---");
        println!("{}", textwrap::fill(&job.description, 100));
    }
}

fn print_trace(stage: &str, lines: &[String]) {
    println!("\n== {} ==", stage);
    for line in lines {
        println!("  {}", line);
    }
}

fn wait_with_countdown(wait: Duration) {
    let total = wait.as_secs();
    println!("\nWaiting {}s for delivery status reports...", total);
    let mut remaining = total;
    while remaining > 0 {
        eprint!("\r  {:>4}s remaining...  ", remaining);
        std::io::stderr().flush().ok();
        let step = remaining.min(5);
        std::thread::sleep(Duration::from_secs(step));
        remaining -= step;
    }
    eprintln!("\r  Done waiting.          ");
}

/// Plain-text resumes only.
fn read_resume(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext != "txt" && ext != "md" {
        return Err(anyhow!(
            "Unsupported resume format '{}'. Use a .txt or .md file.",
            path.display()
        ));
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resume file: {}", path.display()))?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(anyhow!("Resume file {} is empty", path.display()));
    }
    Ok(text)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Héléne García-Márquez", 10), "Héléne ...");
    }

    #[test]
    fn test_read_resume_rejects_other_formats() {
        let err = read_resume(Path::new("/tmp/resume.pdf")).unwrap_err();
        assert!(err.to_string().contains(".txt or .md"));
    }

    #[test]
    fn test_read_resume_text_file() {
        let path = std::env::temp_dir().join(format!("reachout-resume-{}.md", std::process::id()));
        std::fs::write(&path, "  # Sam Seeker\nRust engineer\n").unwrap();
        let text = read_resume(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(text, "# Sam Seeker\nRust engineer");
    }

    #[test]
    fn test_cli_parses_send_flags() {
        let cli = Cli::try_parse_from([
            "reachout", "send", "acme", "--dry-run", "--retry-bounced", "--max-send", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Send { job, max_send, dry_run, retry_bounced, .. } => {
                assert_eq!(job, "acme");
                assert_eq!(max_send, Some(2));
                assert!(dry_run && retry_bounced);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_cli_parses_platform_override() {
        let cli = Cli::try_parse_from(["reachout", "scrape", "https://x.example/jobs/1", "-p", "workday"]).unwrap();
        match cli.command {
            Commands::Scrape { platform, .. } => assert_eq!(platform, Some(Platform::Workday)),
            _ => panic!("expected scrape"),
        }
    }
}
