use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    LinkedIn,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinkedIn => "LinkedIn",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linkedin" => Ok(Platform::LinkedIn),
            _ => Err(anyhow!("Unsupported platform '{}'. Available: LinkedIn", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Scraped,
    Applied,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Scraped => "Scraped",
            ApplicationStatus::Applied => "Applied",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "scraped" => Ok(ApplicationStatus::Scraped),
            "applied" => Ok(ApplicationStatus::Applied),
            _ => Err(anyhow!("Unknown status '{}' (expected Scraped or Applied)", s)),
        }
    }
}

/// Shape of a form question, stored alongside questions and answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuestionKind {
    Binary,
    Select,
    Text,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Binary => "binary",
            QuestionKind::Select => "select",
            QuestionKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: i64,
    pub platform: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingSearch {
    pub id: i64,
    pub scrape_job_id: i64,
    pub search_keywords: Option<String>,
    pub search_location: Option<String>,
    pub easy_apply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub scrape_job_id: i64,
    pub company_name: Option<String>,
    pub job_title: Option<String>,
    pub application_date: Option<String>,
    pub status: String, // "Scraped", "Applied"
    pub job_url: String,
    pub job_details: Option<String>,
}

/// A `Scraped` application joined with the scrape that found it.
#[derive(Debug, Clone)]
pub struct PendingApplication {
    pub application: Application,
    pub platform: String,
    pub easy_apply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormPage {
    pub id: i64,
    pub application_id: i64,
    pub page_number: i64,
    pub title: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub form_page_id: i64,
    pub text: String,
    pub kind: String,
    pub answer_id: Option<i64>,
    pub answer_text: Option<String>, // denormalized for display
}
