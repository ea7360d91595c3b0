use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

use crate::models::JobRecord;

/// Persistence seam for stages that must save as they go.
pub trait JobStore {
    fn save(&self, job: &JobRecord) -> Result<()>;
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: i64,
    pub key: String,
    pub platform: String,
    pub company: String,
    pub title: String,
    pub recruiters: usize,
    pub with_email: usize,
    pub sent: usize,
    pub has_draft: bool,
}

impl Database {
    pub fn open(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "reachout") {
            Ok(proj_dirs.data_dir().join("reachout.db"))
        } else {
            Ok(PathBuf::from("reachout.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                platform TEXT NOT NULL CHECK (platform IN ('greenhouse', 'lever', 'workday', 'generic')),
                company TEXT NOT NULL,
                title TEXT NOT NULL,
                scraped_at TEXT NOT NULL,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_job_records_company ON job_records(company);
            CREATE INDEX IF NOT EXISTS idx_job_records_url ON job_records(url);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_records'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'reachout init' first."));
        }
        Ok(())
    }

    /// Store a freshly scraped record. Fails if the key is already taken.
    pub fn insert(&self, job: &JobRecord) -> Result<i64> {
        let document = serde_json::to_string(job)?;
        self.conn
            .execute(
                "INSERT INTO job_records (key, url, platform, company, title, scraped_at, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    job.key(),
                    job.url,
                    job.platform.as_str(),
                    job.company,
                    job.title,
                    job.scraped_at.to_rfc3339(),
                    document
                ],
            )
            .with_context(|| format!("Failed to store job {}", job.key()))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn load(&self, key: &str) -> Result<Option<JobRecord>> {
        let document: Option<String> = self
            .conn
            .query_row(
                "SELECT document FROM job_records WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        document
            .map(|d| {
                serde_json::from_str(&d).with_context(|| format!("Corrupt record for job {}", key))
            })
            .transpose()
    }

    /// Accepts a full key, a unique key prefix, or a numeric id.
    pub fn resolve_key(&self, reference: &str) -> Result<String> {
        let reference = reference.trim();
        if let Ok(id) = reference.parse::<i64>() {
            let key: Option<String> = self
                .conn
                .query_row("SELECT key FROM job_records WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            if let Some(key) = key {
                return Ok(key);
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT key FROM job_records WHERE key = ?1 OR key LIKE ?2 ESCAPE '\\' ORDER BY key")?;
        let like = format!("{}%", reference.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
        let keys = stmt
            .query_map(params![reference, like], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if keys.iter().any(|k| k == reference) {
            return Ok(reference.to_string());
        }
        match keys.len() {
            0 => Err(anyhow!("No job matches '{}'", reference)),
            1 => Ok(keys[0].clone()),
            n => Err(anyhow!("'{}' matches {} jobs; use a longer key", reference, n)),
        }
    }

    pub fn load_resolved(&self, reference: &str) -> Result<JobRecord> {
        let key = self.resolve_key(reference)?;
        self.load(&key)?
            .ok_or_else(|| anyhow!("Job {} not found", key))
    }

    pub fn list(&self) -> Result<Vec<JobSummary>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, document FROM job_records ORDER BY scraped_at DESC, id DESC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")?;

        rows.into_iter()
            .map(|(id, document)| {
                let job: JobRecord = serde_json::from_str(&document)
                    .with_context(|| format!("Corrupt record with id {}", id))?;
                Ok(Self::summarize(id, &job))
            })
            .collect()
    }

    fn summarize(id: i64, job: &JobRecord) -> JobSummary {
        JobSummary {
            id,
            key: job.key(),
            platform: job.platform.as_str().to_string(),
            company: job.company.clone(),
            title: job.title.clone(),
            recruiters: job.recruiters.len(),
            with_email: job.recruiters.iter().filter(|r| r.email.is_some()).count(),
            sent: job.recruiters.iter().filter(|r| r.last_sent().is_some()).count(),
            has_draft: job.draft.is_some(),
        }
    }
}

impl JobStore for Database {
    /// Replaces the stored document; the record must already exist.
    fn save(&self, job: &JobRecord) -> Result<()> {
        let document = serde_json::to_string(job)?;
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE job_records
             SET company = ?2, title = ?3, document = ?4, updated_at = datetime('now')
             WHERE key = ?1",
            params![job.key(), job.company, job.title, document],
        )?;
        if updated == 0 {
            return Err(anyhow!("Job {} is not in the database", job.key()));
        }
        tx.commit()?;
        Ok(())
    }
}
