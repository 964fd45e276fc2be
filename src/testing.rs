//! In-process stand-ins for the browser and the answer generator.

use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use crate::ai::AIProvider;
use crate::browser::{Locator, Page};

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub options: Vec<String>,
    /// Text found by searching from this element with another locator.
    pub within: HashMap<Locator, String>,
}

impl Element {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn within(mut self, relative: Locator, text: &str) -> Self {
        self.within.insert(relative, text.to_string());
        self
    }
}

/// What the page shows between two navigations.
#[derive(Debug, Clone, Default)]
pub struct Screen {
    elements: HashMap<Locator, Vec<Element>>,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, locator: Locator, texts: &[&str]) -> Self {
        let list = self.elements.entry(locator).or_default();
        list.extend(texts.iter().map(|t| Element::text(t)));
        self
    }

    pub fn with_element(mut self, locator: Locator, element: Element) -> Self {
        self.elements.entry(locator).or_default().push(element);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Goto(String),
    Click(Locator, usize),
    Fill(Locator, usize, String),
    Enter(Locator, usize),
    Select(Locator, usize, String),
    ScrollBy(i64),
    ScrollIntoView(Locator, usize),
}

/// A page that moves between canned screens on navigation or on clicks.
pub struct ScriptedPage {
    screens: Vec<Screen>,
    current: usize,
    routes: HashMap<String, usize>,
    transitions: HashMap<(usize, Locator), usize>,
    pub actions: Vec<Action>,
}

impl ScriptedPage {
    pub fn new(screens: Vec<Screen>) -> Self {
        Self {
            screens,
            current: 0,
            routes: HashMap::new(),
            transitions: HashMap::new(),
            actions: Vec::new(),
        }
    }

    pub fn route(mut self, url: &str, screen: usize) -> Self {
        self.routes.insert(url.to_string(), screen);
        self
    }

    pub fn on_click(mut self, from: usize, locator: Locator, to: usize) -> Self {
        self.transitions.insert((from, locator), to);
        self
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn clicked(&self, locator: Locator) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, Action::Click(l, _) if *l == locator))
    }

    fn elements(&self, locator: Locator) -> &[Element] {
        self.screens
            .get(self.current)
            .and_then(|s| s.elements.get(&locator))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn element(&self, locator: Locator, index: usize) -> Result<&Element> {
        self.elements(locator)
            .get(index)
            .ok_or_else(|| anyhow!("No element #{} for {} on screen {}", index, locator, self.current))
    }
}

impl Page for ScriptedPage {
    fn goto(&mut self, url: &str) -> Result<()> {
        self.actions.push(Action::Goto(url.to_string()));
        if let Some(screen) = self.routes.get(url) {
            self.current = *screen;
        }
        Ok(())
    }

    fn count(&mut self, locator: Locator) -> Result<usize> {
        Ok(self.elements(locator).len())
    }

    fn text_at(&mut self, locator: Locator, index: usize) -> Result<String> {
        Ok(self.element(locator, index)?.text.clone())
    }

    fn attribute_at(&mut self, locator: Locator, index: usize, name: &str) -> Result<Option<String>> {
        Ok(self.element(locator, index)?.attrs.get(name).cloned())
    }

    fn text_within_at(
        &mut self,
        locator: Locator,
        index: usize,
        relative: Locator,
    ) -> Result<Option<String>> {
        Ok(self.element(locator, index)?.within.get(&relative).cloned())
    }

    fn click_at(&mut self, locator: Locator, index: usize) -> Result<()> {
        self.element(locator, index)?;
        self.actions.push(Action::Click(locator, index));
        if let Some(next) = self.transitions.get(&(self.current, locator)) {
            self.current = *next;
        }
        Ok(())
    }

    fn fill_at(&mut self, locator: Locator, index: usize, value: &str) -> Result<()> {
        self.element(locator, index)?;
        self.actions.push(Action::Fill(locator, index, value.to_string()));
        Ok(())
    }

    fn press_enter_at(&mut self, locator: Locator, index: usize) -> Result<()> {
        self.element(locator, index)?;
        self.actions.push(Action::Enter(locator, index));
        Ok(())
    }

    fn options_at(&mut self, locator: Locator, index: usize) -> Result<Vec<String>> {
        Ok(self.element(locator, index)?.options.clone())
    }

    fn select_at(&mut self, locator: Locator, index: usize, option: &str) -> Result<()> {
        let element = self.element(locator, index)?;
        if !element.options.iter().any(|o| o == option) {
            return Err(anyhow!("Option '{}' not offered by {}", option, locator));
        }
        self.actions.push(Action::Select(locator, index, option.to_string()));
        Ok(())
    }

    fn scroll_by(&mut self, dy: i64) -> Result<()> {
        self.actions.push(Action::ScrollBy(dy));
        Ok(())
    }

    fn scroll_into_view(&mut self, locator: Locator, index: usize) -> Result<()> {
        self.element(locator, index)?;
        self.actions.push(Action::ScrollIntoView(locator, index));
        Ok(())
    }

    fn wait_for(&mut self, locator: Locator, timeout: Duration) -> Result<()> {
        if self.elements(locator).is_empty() {
            return Err(anyhow!("Timed out after {:?} waiting for {}", timeout, locator));
        }
        Ok(())
    }

    fn pause(&mut self, _duration: Duration) {}
}

/// Replies to screening questions from a fixed table.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: HashMap<String, String>,
    pub asked: RefCell<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(q, a)| (q.to_string(), a.to_string()))
                .collect(),
            asked: RefCell::new(Vec::new()),
        }
    }
}

impl AIProvider for ScriptedProvider {
    fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        let question = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Question: "))
            .ok_or_else(|| anyhow!("Prompt has no question line"))?;
        self.asked.borrow_mut().push(question.to_string());
        self.replies
            .get(question)
            .cloned()
            .ok_or_else(|| anyhow!("No scripted reply for '{}'", question))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
