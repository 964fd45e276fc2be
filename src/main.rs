mod ai;
mod browser;
mod cache;
mod config;
mod db;
mod linkedin;
mod models;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cache::AnswerCache;
use config::Config;
use db::Database;
use linkedin::driver::ApplicationDriver;
use linkedin::scraper::{self, SearchQuery};
use models::{Application, ApplicationStatus, Platform};

#[derive(Parser)]
#[command(name = "jobpilot")]
#[command(about = "Job application automation - scrape listings and fill Easy Apply forms")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Search a job board and record every listing found
    Scrape {
        /// Job board to search
        #[arg(short, long, default_value = "LinkedIn")]
        platform: String,

        /// Search keywords
        #[arg(short, long, default_value = "Data engineer")]
        keywords: String,

        /// Location typed into the search form
        #[arg(short, long, default_value = "Remote")]
        location: String,

        /// Include listings without Easy Apply
        #[arg(long)]
        no_easy_apply: bool,
    },

    /// Scrape with a location picked at random from a fixed pool
    DrownLocationScrape {
        /// Job board to search
        #[arg(short, long, default_value = "LinkedIn")]
        platform: String,

        /// Search keywords
        #[arg(short, long, default_value = "Data engineer")]
        keywords: String,

        /// Include listings without Easy Apply
        #[arg(long)]
        no_easy_apply: bool,
    },

    /// Apply to every scraped job that has not been applied to yet
    ApplyScrapedJobs,

    /// List applications
    List {
        /// Filter by status (scraped, applied)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show an application with its form pages and answers
    Show {
        /// Application ID or listing URL
        id: String,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jobpilot={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_scrape(db: &Database, config: &Config, platform: &str, query: SearchQuery) -> Result<()> {
    let platform: Platform = platform.parse()?;
    match platform {
        Platform::LinkedIn => {
            println!(
                "Searching {} for '{}' in {}{}...",
                platform,
                query.keywords,
                query.location,
                if query.easy_apply { " (Easy Apply only)" } else { "" }
            );
            let report = browser::with_session(&config.browser, |page| {
                scraper::scrape(db, page, &query, &config.tuning)
            })?;
            println!(
                "Scrape job #{}: recorded {} listing(s).",
                report.scrape_job_id,
                report.application_ids.len()
            );
        }
    }
    Ok(())
}

fn run_apply(db: &Database, config: &Config) -> Result<()> {
    let mut linkedin = Vec::new();
    for pending in db.list_pending_applications()? {
        match pending.platform.parse::<Platform>() {
            Ok(Platform::LinkedIn) => linkedin.push(pending),
            Err(e) => tracing::warn!(application = pending.application.id, "Skipping: {}", e),
        }
    }

    if linkedin.is_empty() {
        println!("No scraped jobs waiting for an application.");
        return Ok(());
    }

    let spec = ai::resolve_model(&config.model)?;
    let provider = ai::create_provider(&spec)?;
    tracing::info!(model = provider.model_name(), "Using answer generator");

    let mut cache = AnswerCache::load(&config.cache_path)?;
    if cache.is_empty() {
        tracing::info!("Answer cache is empty, every question will be generated");
    } else {
        tracing::info!(entries = cache.len(), "Loaded answer cache");
    }
    let profile = config.applicant_profile()?;

    println!("Applying to {} job(s)...", linkedin.len());
    let report = browser::with_session(&config.browser, |page| {
        let mut driver =
            ApplicationDriver::new(db, &mut cache, provider.as_ref(), &config.tuning, &profile);
        Ok(driver.apply_all(page, &linkedin))
    })?;
    cache.save()?;

    println!("\nResults:");
    println!("  Applied:         {}", report.applied);
    println!("  Already applied: {}", report.already_applied);
    if report.failed > 0 {
        println!("  Failed:          {}", report.failed);
    }
    Ok(())
}

fn print_applications(apps: &[Application]) {
    println!(
        "{:<6} {:<8} {:<30} {:<20} {:<16}",
        "ID", "STATUS", "TITLE", "COMPANY", "APPLIED"
    );
    println!("{}", "-".repeat(84));
    for app in apps {
        println!(
            "{:<6} {:<8} {:<30} {:<20} {:<16}",
            app.id,
            app.status,
            truncate(app.job_title.as_deref().unwrap_or("-"), 28),
            truncate(app.company_name.as_deref().unwrap_or("-"), 18),
            app.application_date.as_deref().map(local_time).unwrap_or_default()
        );
    }
}

fn show_application(db: &Database, id: &str) -> Result<()> {
    let app = if let Ok(id) = id.parse::<i64>() {
        db.get_application(id)?
    } else {
        db.get_application_by_url(id)?
    };
    let Some(app) = app else {
        println!("Application '{}' not found.", id);
        return Ok(());
    };

    println!("Application #{}", app.id);
    if let Some(title) = &app.job_title {
        println!("Title: {}", title);
    }
    if let Some(company) = &app.company_name {
        println!("Company: {}", company);
    }
    println!("Status: {}", app.status);
    println!("URL: {}", app.job_url);
    if let Some(date) = &app.application_date {
        println!("Applied: {}", local_time(date));
    }

    let pages = db.list_form_pages(app.id)?;
    if !pages.is_empty() {
        println!("\n--- Form Pages ---");
        for page in pages {
            println!(
                "[{}] {} ({})",
                page.page_number,
                page.title.as_deref().unwrap_or("Unknown"),
                local_time(&page.timestamp)
            );
            for question in db.list_questions(page.id)? {
                println!(
                    "  {} [{}] -> {}",
                    question.text,
                    question.kind,
                    question.answer_text.as_deref().unwrap_or("(unanswered)")
                );
            }
        }
    }

    if let Some(details) = &app.job_details {
        println!("\n--- Job Details ---\n{}", details);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let db = Database::open(&config.db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Scrape {
            platform,
            keywords,
            location,
            no_easy_apply,
        } => {
            db.ensure_initialized()?;
            let query = SearchQuery {
                keywords,
                location,
                easy_apply: !no_easy_apply,
            };
            run_scrape(&db, &config, &platform, query)?;
        }

        Commands::DrownLocationScrape {
            platform,
            keywords,
            no_easy_apply,
        } => {
            db.ensure_initialized()?;
            let location = scraper::pick_location();
            tracing::info!(location, "Picked search location");
            let query = SearchQuery {
                keywords,
                location: location.to_string(),
                easy_apply: !no_easy_apply,
            };
            run_scrape(&db, &config, &platform, query)?;
        }

        Commands::ApplyScrapedJobs => {
            db.ensure_initialized()?;
            run_apply(&db, &config)?;
        }

        Commands::List { status } => {
            db.ensure_initialized()?;
            let status = status
                .as_deref()
                .map(str::parse::<ApplicationStatus>)
                .transpose()?;
            let apps = db.list_applications(status)?;
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                print_applications(&apps);
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            show_application(&db, &id)?;
        }
    }

    Ok(())
}

/// SQLite `datetime('now')` values are UTC; shown in local time.
fn local_time(utc: &str) -> String {
    chrono::NaiveDateTime::parse_from_str(utc, "%Y-%m-%d %H:%M:%S")
        .map(|t| {
            t.and_utc()
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|_| utc.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
