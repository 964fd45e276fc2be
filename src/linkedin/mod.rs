//! LinkedIn search scraping and Easy Apply automation.

pub mod driver;
pub mod form;
pub mod scraper;
