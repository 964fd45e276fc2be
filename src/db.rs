use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::models::{
    Application, ApplicationStatus, FormPage, ListingSearch, PendingApplication, Question,
    QuestionKind, ScrapeJob,
};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scrape_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS listing_searches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scrape_job_id INTEGER NOT NULL REFERENCES scrape_jobs(id),
                search_keywords TEXT,
                search_location TEXT,
                easy_apply INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scrape_job_id INTEGER NOT NULL REFERENCES scrape_jobs(id),
                company_name TEXT,
                job_title TEXT,
                application_date TEXT,
                status TEXT NOT NULL DEFAULT 'Scraped' CHECK (status IN ('Scraped', 'Applied')),
                job_url TEXT NOT NULL UNIQUE,
                job_details TEXT
            );

            CREATE TABLE IF NOT EXISTS application_form_pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL REFERENCES job_applications(id),
                page_number INTEGER NOT NULL,
                title TEXT,
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (application_id, page_number)
            );

            CREATE TABLE IF NOT EXISTS question_answers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                answer_text TEXT NOT NULL,
                answer_type TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS form_questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                form_page_id INTEGER NOT NULL REFERENCES application_form_pages(id),
                question_text TEXT NOT NULL,
                question_type TEXT NOT NULL,
                answer_id INTEGER REFERENCES question_answers(id),
                timestamp TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (form_page_id, question_text)
            );

            CREATE INDEX IF NOT EXISTS idx_applications_status ON job_applications(status);
            CREATE INDEX IF NOT EXISTS idx_searches_scrape ON listing_searches(scrape_job_id);
            CREATE INDEX IF NOT EXISTS idx_answers_text ON question_answers(answer_text, answer_type);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobpilot init' first."
            ));
        }
        Ok(())
    }

    // --- Scrape operations ---

    pub fn create_scrape_job(&self, platform: &str) -> Result<ScrapeJob> {
        self.conn
            .query_row(
                "INSERT INTO scrape_jobs (platform) VALUES (?1)
                 RETURNING id, platform, timestamp",
                [platform],
                |row| {
                    Ok(ScrapeJob {
                        id: row.get(0)?,
                        platform: row.get(1)?,
                        timestamp: row.get(2)?,
                    })
                },
            )
            .context("Failed to create scrape job")
    }

    pub fn create_listing_search(
        &self,
        scrape_job_id: i64,
        keywords: &str,
        location: &str,
        easy_apply: bool,
    ) -> Result<ListingSearch> {
        self.conn.execute(
            "INSERT INTO listing_searches (scrape_job_id, search_keywords, search_location, easy_apply)
             VALUES (?1, ?2, ?3, ?4)",
            params![scrape_job_id, keywords, location, easy_apply],
        )?;
        Ok(ListingSearch {
            id: self.conn.last_insert_rowid(),
            scrape_job_id,
            search_keywords: Some(keywords.to_string()),
            search_location: Some(location.to_string()),
            easy_apply,
        })
    }

    // --- Application operations ---

    /// Records a listing as pending. A url seen before is re-pointed at the
    /// new scrape and reset to `Scraped` instead of duplicated.
    pub fn upsert_application(&self, scrape_job_id: i64, job_url: &str) -> Result<i64> {
        self.conn
            .query_row(
                "INSERT INTO job_applications (scrape_job_id, job_url, status)
                 VALUES (?1, ?2, 'Scraped')
                 ON CONFLICT(job_url) DO UPDATE SET
                     scrape_job_id = excluded.scrape_job_id,
                     status = 'Scraped',
                     company_name = NULL,
                     job_title = NULL,
                     application_date = NULL,
                     job_details = NULL
                 RETURNING id",
                params![scrape_job_id, job_url],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to record application for {}", job_url))
    }

    pub fn get_application(&self, id: i64) -> Result<Option<Application>> {
        self.conn
            .query_row(
                "SELECT id, scrape_job_id, company_name, job_title, application_date,
                        status, job_url, job_details
                 FROM job_applications WHERE id = ?1",
                [id],
                Self::row_to_application,
            )
            .optional()
            .context("Failed to load application")
    }

    pub fn get_application_by_url(&self, job_url: &str) -> Result<Option<Application>> {
        self.conn
            .query_row(
                "SELECT id, scrape_job_id, company_name, job_title, application_date,
                        status, job_url, job_details
                 FROM job_applications WHERE job_url = ?1",
                [job_url],
                Self::row_to_application,
            )
            .optional()
            .context("Failed to load application")
    }

    pub fn list_applications(&self, status: Option<ApplicationStatus>) -> Result<Vec<Application>> {
        let mut sql = String::from(
            "SELECT id, scrape_job_id, company_name, job_title, application_date,
                    status, job_url, job_details
             FROM job_applications",
        );
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s.as_str()], Self::row_to_application)?
        } else {
            stmt.query_map([], Self::row_to_application)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list applications")
    }

    /// Scraped applications with the platform of their scrape and the
    /// easy-apply flag of that scrape's first search.
    pub fn list_pending_applications(&self) -> Result<Vec<PendingApplication>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.scrape_job_id, a.company_name, a.job_title, a.application_date,
                    a.status, a.job_url, a.job_details, s.platform,
                    COALESCE((SELECT ls.easy_apply FROM listing_searches ls
                              WHERE ls.scrape_job_id = a.scrape_job_id
                              ORDER BY ls.id LIMIT 1), 0)
             FROM job_applications a
             JOIN scrape_jobs s ON a.scrape_job_id = s.id
             WHERE a.status = 'Scraped'
             ORDER BY a.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingApplication {
                application: Self::row_to_application(row)?,
                platform: row.get(8)?,
                easy_apply: row.get(9)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list pending applications")
    }

    pub fn set_job_details(&self, id: i64, details: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE job_applications SET job_details = ?1 WHERE id = ?2",
            params![details, id],
        )?;
        Ok(())
    }

    /// Keeps whatever was already stored when a value is missing.
    pub fn set_listing_details(
        &self,
        id: i64,
        job_title: Option<&str>,
        company_name: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE job_applications
             SET job_title = COALESCE(?1, job_title),
                 company_name = COALESCE(?2, company_name)
             WHERE id = ?3",
            params![job_title, company_name, id],
        )?;
        Ok(())
    }

    pub fn mark_applied(&self, id: i64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE job_applications
             SET status = 'Applied', application_date = datetime('now')
             WHERE id = ?1",
            [id],
        )?;
        if updated == 0 {
            return Err(anyhow!("Application #{} not found", id));
        }
        Ok(())
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        Ok(Application {
            id: row.get(0)?,
            scrape_job_id: row.get(1)?,
            company_name: row.get(2)?,
            job_title: row.get(3)?,
            application_date: row.get(4)?,
            status: row.get(5)?,
            job_url: row.get(6)?,
            job_details: row.get(7)?,
        })
    }

    // --- Form bookkeeping ---

    pub fn upsert_form_page(&self, application_id: i64, page_number: i64, title: &str) -> Result<i64> {
        self.conn
            .query_row(
                "INSERT INTO application_form_pages (application_id, page_number, title)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(application_id, page_number) DO UPDATE SET
                     title = excluded.title,
                     timestamp = datetime('now')
                 RETURNING id",
                params![application_id, page_number, title],
                |row| row.get(0),
            )
            .context("Failed to record form page")
    }

    pub fn list_form_pages(&self, application_id: i64) -> Result<Vec<FormPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, application_id, page_number, title, timestamp
             FROM application_form_pages WHERE application_id = ?1
             ORDER BY page_number",
        )?;
        let rows = stmt.query_map([application_id], |row| {
            Ok(FormPage {
                id: row.get(0)?,
                application_id: row.get(1)?,
                page_number: row.get(2)?,
                title: row.get(3)?,
                timestamp: row.get(4)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list form pages")
    }

    pub fn find_or_create_answer(&self, text: &str, kind: QuestionKind) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM question_answers WHERE answer_text = ?1 AND answer_type = ?2",
                params![text, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO question_answers (answer_text, answer_type) VALUES (?1, ?2)",
            params![text, kind.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn upsert_question(
        &self,
        form_page_id: i64,
        text: &str,
        kind: QuestionKind,
        answer_id: Option<i64>,
    ) -> Result<i64> {
        self.conn
            .query_row(
                "INSERT INTO form_questions (form_page_id, question_text, question_type, answer_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(form_page_id, question_text) DO UPDATE SET
                     question_type = excluded.question_type,
                     answer_id = excluded.answer_id,
                     timestamp = datetime('now')
                 RETURNING id",
                params![form_page_id, text, kind.as_str(), answer_id],
                |row| row.get(0),
            )
            .context("Failed to record form question")
    }

    pub fn list_questions(&self, form_page_id: i64) -> Result<Vec<Question>> {
        let mut stmt = self.conn.prepare(
            "SELECT q.id, q.form_page_id, q.question_text, q.question_type, q.answer_id, a.answer_text
             FROM form_questions q
             LEFT JOIN question_answers a ON q.answer_id = a.id
             WHERE q.form_page_id = ?1
             ORDER BY q.id",
        )?;
        let rows = stmt.query_map([form_page_id], |row| {
            Ok(Question {
                id: row.get(0)?,
                form_page_id: row.get(1)?,
                text: row.get(2)?,
                kind: row.get(3)?,
                answer_id: row.get(4)?,
                answer_text: row.get(5)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list questions")
    }

    #[cfg(test)]
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}
