use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::browser::{Locator, Page};
use crate::config::Tuning;
use crate::db::Database;
use crate::models::Platform;

const SEARCH_URL: &str = "https://www.linkedin.com/jobs/search/";

static LISTING_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://[^/]+)?/jobs/view/([^/?#]+)").unwrap());

pub const LOCATION_INPUT: Locator =
    Locator::Css(r#"input[aria-label="City, state, or zip code"]"#);
pub const SEARCH_BUTTON: Locator = Locator::XPath("//button[normalize-space()='Search']");
pub const JOB_CARDS: Locator = Locator::Css("li.scaffold-layout__list-item");
pub const JOB_CARD_LINKS: Locator = Locator::Css("li.scaffold-layout__list-item a[data-control-id]");

/// Rotation pool for `drown-location-scrape`.
pub const LOCATIONS: [&str; 10] = [
    "Brazil",
    "USA",
    "Spain",
    "Portugal",
    "United Kingdom",
    "Netherlands",
    "Amsterdam",
    "Canada",
    "Australia",
    "Remote",
];

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keywords: String,
    pub location: String,
    pub easy_apply: bool,
}

#[derive(Debug)]
pub struct ScrapeReport {
    pub scrape_job_id: i64,
    /// Listing id -> canonical listing url.
    pub listings: BTreeMap<String, String>,
    pub application_ids: Vec<i64>,
}

pub fn pick_location() -> &'static str {
    LOCATIONS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("Remote")
}

/// Remote-only search url; `f_AL` restricts results to Easy Apply.
pub fn search_url(keywords: &str, easy_apply: bool) -> Result<String> {
    let mut params = vec![("keywords", keywords), ("f_WT", "2")];
    if easy_apply {
        params.push(("f_AL", "true"));
    }
    let url = reqwest::Url::parse_with_params(SEARCH_URL, &params)
        .context("Failed to build search url")?;
    Ok(url.to_string())
}

pub fn canonical_listing_url(job_id: &str) -> String {
    format!(
        "https://www.linkedin.com/jobs/search/?currentJobId={}&f_AL=true&f_WT=2",
        job_id
    )
}

/// Listing id from a card link such as `/jobs/view/4012345678/?refId=...`.
pub fn parse_listing_href(href: &str) -> Option<String> {
    LISTING_HREF
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Runs one search and records every listing found as a pending application.
pub fn scrape(
    db: &Database,
    page: &mut dyn Page,
    query: &SearchQuery,
    tuning: &Tuning,
) -> Result<ScrapeReport> {
    let scrape_job = db.create_scrape_job(Platform::LinkedIn.as_str())?;
    db.create_listing_search(scrape_job.id, &query.keywords, &query.location, query.easy_apply)?;

    let url = search_url(&query.keywords, query.easy_apply)?;
    tracing::info!(
        scrape_job = scrape_job.id,
        keywords = %query.keywords,
        location = %query.location,
        easy_apply = query.easy_apply,
        "Starting job search"
    );

    let listings = search_listings(page, &url, &query.location, tuning)?;
    tracing::info!(count = listings.len(), "Found job links");

    let mut application_ids = Vec::with_capacity(listings.len());
    for (job_id, link) in &listings {
        tracing::debug!(job_id = %job_id, link = %link, "Recording listing");
        application_ids.push(db.upsert_application(scrape_job.id, link)?);
    }

    Ok(ScrapeReport {
        scrape_job_id: scrape_job.id,
        listings,
        application_ids,
    })
}

fn search_listings(
    page: &mut dyn Page,
    url: &str,
    location: &str,
    tuning: &Tuning,
) -> Result<BTreeMap<String, String>> {
    page.goto(url)?;
    page.wait_for(LOCATION_INPUT, tuning.wait_timeout())?;
    page.fill_at(LOCATION_INPUT, 0, location)?;
    page.click_at(SEARCH_BUTTON, 0)?;

    // Results load lazily; the scroll budget is fixed, so very long result
    // lists can be undercounted.
    for _ in 0..tuning.scroll_count {
        page.scroll_by(tuning.scroll_step)?;
        page.pause(tuning.action_delay());
    }

    collect_listing_links(page, tuning)
}

fn collect_listing_links(page: &mut dyn Page, tuning: &Tuning) -> Result<BTreeMap<String, String>> {
    page.wait_for(JOB_CARDS, tuning.wait_timeout())?;

    let mut links = BTreeMap::new();
    let count = page.count(JOB_CARD_LINKS)?;
    for i in 0..count {
        page.scroll_into_view(JOB_CARD_LINKS, i)?;
        page.pause(tuning.action_delay());

        let Some(href) = page.attribute_at(JOB_CARD_LINKS, i, "href")? else {
            continue;
        };
        match parse_listing_href(&href) {
            Some(job_id) => {
                let link = canonical_listing_url(&job_id);
                links.insert(job_id, link);
            }
            None => tracing::debug!(href = %href, "Skipping non-listing link"),
        }
    }

    Ok(links)
}
