use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::thread;
use std::time::Duration;
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tokio::runtime::Runtime;

use crate::config::BrowserConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A static element query, either CSS or XPath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(&'static str),
    XPath(&'static str),
}

impl Locator {
    fn by(&self) -> By {
        match self {
            Locator::Css(s) => By::Css(*s),
            Locator::XPath(s) => By::XPath(*s),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css={}", s),
            Locator::XPath(s) => write!(f, "xpath={}", s),
        }
    }
}

/// The page operations the scraper and form walker need. Elements are
/// addressed as the `index`-th match of a locator on the current page.
pub trait Page {
    fn goto(&mut self, url: &str) -> Result<()>;
    fn count(&mut self, locator: Locator) -> Result<usize>;
    fn text_at(&mut self, locator: Locator, index: usize) -> Result<String>;
    fn attribute_at(&mut self, locator: Locator, index: usize, name: &str) -> Result<Option<String>>;
    /// Text of the first `relative` match searched from the `index`-th
    /// match of `locator`.
    fn text_within_at(
        &mut self,
        locator: Locator,
        index: usize,
        relative: Locator,
    ) -> Result<Option<String>>;
    fn click_at(&mut self, locator: Locator, index: usize) -> Result<()>;
    /// Types into the element, or into the control a `<label>` points at.
    fn fill_at(&mut self, locator: Locator, index: usize, value: &str) -> Result<()>;
    fn press_enter_at(&mut self, locator: Locator, index: usize) -> Result<()>;
    /// Option texts of a `<select>` (or the one a `<label>` points at).
    fn options_at(&mut self, locator: Locator, index: usize) -> Result<Vec<String>>;
    fn select_at(&mut self, locator: Locator, index: usize, option: &str) -> Result<()>;
    fn scroll_by(&mut self, dy: i64) -> Result<()>;
    fn scroll_into_view(&mut self, locator: Locator, index: usize) -> Result<()>;
    /// Polls until the locator matches or `timeout` elapses.
    fn wait_for(&mut self, locator: Locator, timeout: Duration) -> Result<()>;
    fn pause(&mut self, duration: Duration);

    fn texts(&mut self, locator: Locator) -> Result<Vec<String>> {
        let n = self.count(locator)?;
        (0..n).map(|i| self.text_at(locator, i)).collect()
    }

    fn is_present(&mut self, locator: Locator) -> Result<bool> {
        Ok(self.count(locator)? > 0)
    }
}

/// A WebDriver session. Calls block on a private current-thread runtime, so
/// callers stay synchronous. The browser is quit on `close` or on drop.
pub struct BrowserSession {
    runtime: Runtime,
    driver: Option<WebDriver>,
}

impl BrowserSession {
    pub fn open(config: &BrowserConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime for WebDriver")?;

        let mut caps = DesiredCapabilities::chrome();
        if let Some(dir) = &config.user_data_dir {
            caps.add_arg(&format!("--user-data-dir={}", dir.display()))?;
        }
        if config.headless {
            caps.set_headless()?;
        }

        tracing::info!(url = %config.webdriver_url, headless = config.headless, "Starting browser session");
        let driver = runtime
            .block_on(WebDriver::new(config.webdriver_url.as_str(), caps))
            .with_context(|| {
                format!(
                    "Failed to connect to WebDriver at {}. Is chromedriver running?",
                    config.webdriver_url
                )
            })?;

        Ok(Self {
            runtime,
            driver: Some(driver),
        })
    }

    pub fn close(mut self) -> Result<()> {
        self.quit()
    }

    fn quit(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            tracing::info!("Closing browser");
            self.runtime
                .block_on(driver.quit())
                .context("Failed to quit browser session")?;
        }
        Ok(())
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| anyhow!("Browser session already closed"))
    }

    fn element(&self, locator: Locator, index: usize) -> Result<WebElement> {
        let driver = self.driver()?;
        let mut found = self.runtime.block_on(driver.find_all(locator.by()))?;
        if index >= found.len() {
            return Err(anyhow!(
                "No element #{} for {} ({} found)",
                index,
                locator,
                found.len()
            ));
        }
        Ok(found.swap_remove(index))
    }

    /// Labels forward to their control through the `for` attribute.
    fn control(&self, locator: Locator, index: usize) -> Result<WebElement> {
        let element = self.element(locator, index)?;
        self.runtime.block_on(async {
            if element.tag_name().await?.eq_ignore_ascii_case("label") {
                if let Some(target) = element.attr("for").await? {
                    let driver = self.driver()?;
                    return Ok(driver.find(By::Id(target)).await?);
                }
            }
            Ok::<_, anyhow::Error>(element)
        })
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Err(e) = self.quit() {
            tracing::warn!("{:#}", e);
        }
    }
}

impl Page for BrowserSession {
    fn goto(&mut self, url: &str) -> Result<()> {
        tracing::debug!(url, "Navigating");
        let driver = self.driver()?;
        self.runtime
            .block_on(driver.goto(url))
            .with_context(|| format!("Failed to navigate to {}", url))
    }

    fn count(&mut self, locator: Locator) -> Result<usize> {
        let driver = self.driver()?;
        Ok(self.runtime.block_on(driver.find_all(locator.by()))?.len())
    }

    fn text_at(&mut self, locator: Locator, index: usize) -> Result<String> {
        let element = self.element(locator, index)?;
        Ok(self.runtime.block_on(element.text())?)
    }

    fn attribute_at(&mut self, locator: Locator, index: usize, name: &str) -> Result<Option<String>> {
        let element = self.element(locator, index)?;
        Ok(self.runtime.block_on(element.attr(name))?)
    }

    fn text_within_at(
        &mut self,
        locator: Locator,
        index: usize,
        relative: Locator,
    ) -> Result<Option<String>> {
        let element = self.element(locator, index)?;
        let text = self.runtime.block_on(async {
            match element.find_all(relative.by()).await?.first() {
                Some(found) => found.text().await.map(Some),
                None => Ok(None),
            }
        })?;
        Ok(text)
    }

    fn click_at(&mut self, locator: Locator, index: usize) -> Result<()> {
        let element = self.element(locator, index)?;
        self.runtime
            .block_on(element.click())
            .with_context(|| format!("Failed to click {}", locator))
    }

    fn fill_at(&mut self, locator: Locator, index: usize, value: &str) -> Result<()> {
        let control = self.control(locator, index)?;
        self.runtime.block_on(async {
            control.clear().await?;
            control.send_keys(value).await
        })?;
        Ok(())
    }

    fn press_enter_at(&mut self, locator: Locator, index: usize) -> Result<()> {
        let control = self.control(locator, index)?;
        self.runtime.block_on(control.send_keys(Key::Enter + ""))?;
        Ok(())
    }

    fn options_at(&mut self, locator: Locator, index: usize) -> Result<Vec<String>> {
        let control = self.control(locator, index)?;
        let texts = self.runtime.block_on(async {
            let mut texts = Vec::new();
            for option in control.find_all(By::Tag("option")).await? {
                texts.push(option.text().await?.trim().to_string());
            }
            Ok::<_, WebDriverError>(texts)
        })?;
        Ok(texts)
    }

    fn select_at(&mut self, locator: Locator, index: usize, option: &str) -> Result<()> {
        let control = self.control(locator, index)?;
        self.runtime
            .block_on(async {
                let select = SelectElement::new(&control).await?;
                select.select_by_visible_text(option).await
            })
            .with_context(|| format!("Failed to select '{}' in {}", option, locator))
    }

    fn scroll_by(&mut self, dy: i64) -> Result<()> {
        let driver = self.driver()?;
        let script = format!("window.scrollBy(0, {});", dy);
        self.runtime.block_on(driver.execute(&script, Vec::new()))?;
        Ok(())
    }

    fn scroll_into_view(&mut self, locator: Locator, index: usize) -> Result<()> {
        let element = self.element(locator, index)?;
        self.runtime.block_on(element.scroll_into_view())?;
        Ok(())
    }

    fn wait_for(&mut self, locator: Locator, timeout: Duration) -> Result<()> {
        let driver = self.driver()?;
        let found = self
            .runtime
            .block_on(driver.query(locator.by()).wait(timeout, POLL_INTERVAL).exists())
            .with_context(|| format!("Failed while waiting for {}", locator))?;
        if !found {
            return Err(anyhow!("Timed out after {:?} waiting for {}", timeout, locator));
        }
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Opens a session, hands it to `f`, and closes it whatever `f` returns.
pub fn with_session<T>(
    config: &BrowserConfig,
    f: impl FnOnce(&mut dyn Page) -> Result<T>,
) -> Result<T> {
    let mut session = BrowserSession::open(config)?;
    let result = f(&mut session);
    let closed = session.close();
    let value = result?;
    closed?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display_names_kind() {
        assert_eq!(Locator::Css("#job-details").to_string(), "css=#job-details");
        assert_eq!(
            Locator::XPath("//button").to_string(),
            "xpath=//button"
        );
    }

    #[test]
    #[ignore] // Requires chromedriver on localhost:9515
    fn test_open_and_close_session() {
        let config = BrowserConfig {
            headless: true,
            ..BrowserConfig::default()
        };
        let title = with_session(&config, |page| {
            page.goto("https://example.com")?;
            page.text_at(Locator::Css("h1"), 0)
        })
        .unwrap();
        assert!(!title.is_empty());
    }

    #[test]
    #[ignore] // Requires chromedriver on localhost:9515
    fn test_wait_for_times_out_on_missing_element() {
        let config = BrowserConfig {
            headless: true,
            ..BrowserConfig::default()
        };
        let err = with_session(&config, |page| {
            page.goto("https://example.com")?;
            page.wait_for(Locator::Css("h1"), Duration::from_secs(2))?;
            page.wait_for(Locator::Css("#no-such-element"), Duration::from_millis(500))
        })
        .unwrap_err();
        assert!(err.to_string().contains("Timed out"));
    }
}
