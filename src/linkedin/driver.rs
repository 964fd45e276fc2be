use anyhow::{bail, Result};

use crate::ai::AIProvider;
use crate::browser::{Locator, Page};
use crate::cache::AnswerCache;
use crate::config::Tuning;
use crate::db::Database;
use crate::linkedin::form::FormWalker;
use crate::models::PendingApplication;

pub const APPLIED_MARKER: Locator = Locator::XPath(
    "//*[contains(@class, 'artdeco-inline-feedback__message') and contains(., 'Applied')]",
);
pub const JOB_DETAILS: Locator = Locator::Css("#job-details");
pub const APPLY_BUTTON: Locator = Locator::Css("#jobs-apply-button-id");
pub const JOB_TITLE: Locator = Locator::Css(".job-details-jobs-unified-top-card__job-title");
pub const COMPANY_NAME: Locator = Locator::Css(".job-details-jobs-unified-top-card__company-name");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Submitted { pages: i64 },
    AlreadyApplied,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub already_applied: usize,
    pub failed: usize,
}

pub struct ApplicationDriver<'a> {
    db: &'a Database,
    cache: &'a mut AnswerCache,
    provider: &'a dyn AIProvider,
    tuning: &'a Tuning,
    applicant_profile: &'a str,
}

impl<'a> ApplicationDriver<'a> {
    pub fn new(
        db: &'a Database,
        cache: &'a mut AnswerCache,
        provider: &'a dyn AIProvider,
        tuning: &'a Tuning,
        applicant_profile: &'a str,
    ) -> Self {
        Self {
            db,
            cache,
            provider,
            tuning,
            applicant_profile,
        }
    }

    /// Applies to each application in turn. A failure abandons only that
    /// application; it stays `Scraped` for a later run.
    pub fn apply_all(&mut self, page: &mut dyn Page, pending: &[PendingApplication]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for item in pending {
            let app = &item.application;
            tracing::info!(
                application = app.id,
                title = app.job_title.as_deref().unwrap_or("?"),
                company = app.company_name.as_deref().unwrap_or("?"),
                "Applying to job"
            );
            match self.apply(page, item) {
                Ok(ApplyOutcome::Submitted { pages }) => {
                    tracing::info!(application = app.id, pages, "Application submitted");
                    report.applied += 1;
                }
                Ok(ApplyOutcome::AlreadyApplied) => report.already_applied += 1,
                Err(e) => {
                    tracing::error!(application = app.id, url = %app.job_url, "Application failed: {:#}", e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub fn apply(&mut self, page: &mut dyn Page, pending: &PendingApplication) -> Result<ApplyOutcome> {
        let app = &pending.application;
        if !pending.easy_apply {
            bail!("Application #{}: non-Easy Apply flow is not implemented", app.id);
        }

        page.goto(&app.job_url)?;
        page.pause(self.tuning.action_delay());

        if let Err(e) = self.capture_listing_details(page, app.id) {
            tracing::warn!(application = app.id, "Could not read title/company: {:#}", e);
        }

        if page.is_present(APPLIED_MARKER)? {
            tracing::info!(application = app.id, "Already applied, marking as Applied");
            self.db.mark_applied(app.id)?;
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        page.wait_for(JOB_DETAILS, self.tuning.wait_timeout())?;
        let job_description = page.text_at(JOB_DETAILS, 0)?;
        self.db.set_job_details(app.id, &job_description)?;

        page.click_at(APPLY_BUTTON, 0)?;
        page.pause(self.tuning.action_delay());

        let mut walker = FormWalker {
            db: self.db,
            cache: &mut *self.cache,
            provider: self.provider,
            tuning: self.tuning,
            application_id: app.id,
            job_description: &job_description,
            applicant_profile: self.applicant_profile,
        };
        let outcome = walker.walk(page)?;
        tracing::debug!(application = app.id, completion = ?outcome.completion, "Form completed");

        self.db.mark_applied(app.id)?;
        Ok(ApplyOutcome::Submitted {
            pages: outcome.pages,
        })
    }

    fn capture_listing_details(&self, page: &mut dyn Page, application_id: i64) -> Result<()> {
        let title = first_text(page, JOB_TITLE)?;
        let company = first_text(page, COMPANY_NAME)?;
        if title.is_some() || company.is_some() {
            self.db
                .set_listing_details(application_id, title.as_deref(), company.as_deref())?;
        }
        Ok(())
    }
}

fn first_text(page: &mut dyn Page, locator: Locator) -> Result<Option<String>> {
    if page.count(locator)? == 0 {
        return Ok(None);
    }
    let text = page.text_at(locator, 0)?.trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkedin::form::{FormError, FIELDSET_LEGEND, FIELD_LABELS, MODAL_TITLE, SUBMIT_BUTTON};
    use crate::testing::{Element, Screen, ScriptedPage, ScriptedProvider};

    const URL: &str = "https://www.linkedin.com/jobs/search/?currentJobId=9&f_AL=true&f_WT=2";

    struct Fixture {
        db: Database,
        cache: AnswerCache,
        _dir: tempfile::TempDir,
    }

    fn fixture(easy_apply: bool) -> (Fixture, PendingApplication) {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_scrape_job("LinkedIn").unwrap();
        db.create_listing_search(job.id, "Data engineer", "Remote", easy_apply)
            .unwrap();
        db.upsert_application(job.id, URL).unwrap();
        let pending = db.list_pending_applications().unwrap().remove(0);
        let dir = tempfile::tempdir().unwrap();
        let cache = AnswerCache::load(&dir.path().join("question_cache.json")).unwrap();
        (Fixture { db, cache, _dir: dir }, pending)
    }

    fn listing(extra: Screen) -> Screen {
        extra
            .with(JOB_TITLE, &["Senior Data Engineer"])
            .with(COMPANY_NAME, &["Acme Analytics"])
    }

    fn run(
        fx: &mut Fixture,
        page: &mut ScriptedPage,
        provider: &ScriptedProvider,
        pending: &PendingApplication,
    ) -> Result<ApplyOutcome> {
        let tuning = Tuning::default();
        let mut driver =
            ApplicationDriver::new(&fx.db, &mut fx.cache, provider, &tuning, "Python, SQL");
        driver.apply(page, pending)
    }

    #[test]
    fn test_applied_marker_skips_form() {
        let (mut fx, pending) = fixture(true);
        let mut page = ScriptedPage::new(vec![
            Screen::new(),
            listing(Screen::new().with(APPLIED_MARKER, &["Applied 3 days ago"])),
        ])
        .route(URL, 1);

        let outcome = run(&mut fx, &mut page, &ScriptedProvider::default(), &pending).unwrap();

        assert_eq!(outcome, ApplyOutcome::AlreadyApplied);
        assert!(!page.clicked(APPLY_BUTTON));
        let app = fx.db.get_application(pending.application.id).unwrap().unwrap();
        assert_eq!(app.status, "Applied");
        assert_eq!(app.job_title.as_deref(), Some("Senior Data Engineer"));
        assert!(fx.db.list_form_pages(app.id).unwrap().is_empty());
    }

    #[test]
    fn test_non_easy_apply_is_an_error() {
        let (mut fx, pending) = fixture(false);
        let mut page = ScriptedPage::new(vec![Screen::new()]);

        let err = run(&mut fx, &mut page, &ScriptedProvider::default(), &pending).unwrap_err();
        assert!(err.to_string().contains("non-Easy Apply"));
        assert!(page.actions.is_empty());
        let app = fx.db.get_application(pending.application.id).unwrap().unwrap();
        assert_eq!(app.status, "Scraped");
    }

    #[test]
    fn test_successful_application_is_marked_applied() {
        let (mut fx, pending) = fixture(true);
        let job_page = listing(Screen::new())
            .with(JOB_DETAILS, &["We move data around."])
            .with(APPLY_BUTTON, &["Easy Apply"]);
        let modal = Screen::new()
            .with(MODAL_TITLE, &["Contact info"])
            .with(SUBMIT_BUTTON, &["Submit application"]);
        let mut page = ScriptedPage::new(vec![Screen::new(), job_page, modal])
            .route(URL, 1)
            .on_click(1, APPLY_BUTTON, 2);

        let outcome = run(&mut fx, &mut page, &ScriptedProvider::default(), &pending).unwrap();

        assert_eq!(outcome, ApplyOutcome::Submitted { pages: 1 });
        let app = fx.db.get_application(pending.application.id).unwrap().unwrap();
        assert_eq!(app.status, "Applied");
        assert_eq!(app.job_details.as_deref(), Some("We move data around."));
        assert_eq!(app.company_name.as_deref(), Some("Acme Analytics"));
        assert!(app.application_date.is_some());
    }

    #[test]
    fn test_invalid_binary_answer_leaves_status_scraped() {
        let (mut fx, pending) = fixture(true);
        let job_page = Screen::new()
            .with(JOB_DETAILS, &["Remote role."])
            .with(APPLY_BUTTON, &["Easy Apply"]);
        let modal = Screen::new()
            .with(MODAL_TITLE, &["Work authorization"])
            .with_element(
                FIELD_LABELS,
                Element::text("Yes").within(FIELDSET_LEGEND, "Do you require sponsorship?"),
            )
            .with(FIELD_LABELS, &["No"])
            .with(SUBMIT_BUTTON, &["Submit application"]);
        let mut page = ScriptedPage::new(vec![Screen::new(), job_page, modal])
            .route(URL, 1)
            .on_click(1, APPLY_BUTTON, 2);
        let provider = ScriptedProvider::new(&[("Do you require sponsorship?", "It depends")]);

        let err = run(&mut fx, &mut page, &provider, &pending).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<FormError>(),
            Some(FormError::InvalidBinaryAnswer { .. })
        ));
        assert!(!page.clicked(SUBMIT_BUTTON));
        let app = fx.db.get_application(pending.application.id).unwrap().unwrap();
        assert_eq!(app.status, "Scraped");
        // Progress made before the failure is kept.
        assert_eq!(app.job_details.as_deref(), Some("Remote role."));
        assert_eq!(fx.db.list_form_pages(app.id).unwrap().len(), 1);
    }

    #[test]
    fn test_apply_all_continues_after_failure() {
        let (mut fx, pending) = fixture(true);
        let job = fx.db.create_scrape_job("LinkedIn").unwrap();
        fx.db
            .create_listing_search(job.id, "Data engineer", "Remote", true)
            .unwrap();
        let other_url = "https://www.linkedin.com/jobs/search/?currentJobId=10&f_AL=true&f_WT=2";
        fx.db.upsert_application(job.id, other_url).unwrap();
        let all = fx.db.list_pending_applications().unwrap();
        assert_eq!(all.len(), 2);

        // First listing never shows its description; the second is already applied.
        let mut page = ScriptedPage::new(vec![
            Screen::new(),
            Screen::new(),
            Screen::new().with(APPLIED_MARKER, &["Applied"]),
        ])
        .route(URL, 1)
        .route(other_url, 2);

        let tuning = Tuning::default();
        let provider = ScriptedProvider::default();
        let mut driver = ApplicationDriver::new(&fx.db, &mut fx.cache, &provider, &tuning, "");
        let report = driver.apply_all(&mut page, &all);

        assert_eq!(
            report,
            ApplyReport {
                applied: 0,
                already_applied: 1,
                failed: 1
            }
        );
        let first = fx.db.get_application(pending.application.id).unwrap().unwrap();
        assert_eq!(first.status, "Scraped");
    }
}
