//! Walks the Easy Apply modal page by page until it can be submitted.
//!
//! Each page is recorded, then handled according to its title. The privacy
//! page is accepted, a few informational pages are passed through untouched,
//! and every other page is treated as a set of screening questions. Questions
//! are classified once into [`FieldSlot`]s, answered from the [`AnswerCache`]
//! or the generator, and filled as typed [`Field`]s.

use anyhow::Result;
use thiserror::Error;

use crate::ai::{self, AIProvider, AnswerHint};
use crate::browser::{Locator, Page};
use crate::cache::AnswerCache;
use crate::config::Tuning;
use crate::db::Database;
use crate::models::QuestionKind;

pub const MODAL_TITLE: Locator = Locator::Css("div[data-test-modal-container] h3.t-16.t-bold");
pub const PRIVACY_AGREE: Locator =
    Locator::XPath("//*[contains(text(), 'I Agree Terms & Conditions')]");
pub const FIELD_LABELS: Locator = Locator::Css(".jobs-easy-apply-modal__content label");
pub const DROPDOWN_LABELS: Locator =
    Locator::Css(r#"label[data-test-text-entity-list-form-title] span[aria-hidden="true"]"#);
/// Searched from a label: the legend of its own radio group.
pub const FIELDSET_LEGEND: Locator =
    Locator::XPath(r#"ancestor::fieldset[1]/legend//span[@aria-hidden="true"]"#);
pub const SUBMIT_BUTTON: Locator = Locator::XPath("//button[contains(., 'Submit application')]");
pub const REVIEW_BUTTON: Locator = Locator::XPath("//button[contains(., 'Review')]");
pub const FINAL_SUBMIT: Locator = Locator::Css(r#"button[aria-label="Submit application"]"#);
pub const CONTINUE_BUTTON: Locator = Locator::XPath("//*[@aria-label='Continue to next step']");

const PRIVACY_POLICY: &str = "Privacy policy";
const STATIC_TITLES: [&str; 3] = ["Contact info", "Resume", "Screening questions"];
const SELECT_PLACEHOLDER: &str = "Select an option";

#[derive(Debug, Error)]
pub enum FormError {
    #[error("invalid answer '{answer}' for yes/no question '{question}'")]
    InvalidBinaryAnswer { question: String, answer: String },

    #[error("'Yes' option at label #{index} has no 'No' partner")]
    UnpairedBinaryField { index: usize },

    #[error("no fieldset legend for the yes/no pair at label #{index}")]
    MissingQuestionText { index: usize },

    #[error("dropdown '{question}' offers no options")]
    NoSelectOptions { question: String },

    #[error("form page {depth} ('{title}') has no submit, review or continue control")]
    MissingControl { depth: i64, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Privacy,
    Static,
    Questions,
}

pub fn classify_page(title: &str) -> PageKind {
    if title == PRIVACY_POLICY {
        PageKind::Privacy
    } else if STATIC_TITLES.contains(&title) {
        PageKind::Static
    } else {
        PageKind::Questions
    }
}

/// A question found on the page, before it is answered. Indices point into
/// the [`FIELD_LABELS`] matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSlot {
    /// A `Yes` label at `yes_index` with its `No` partner right after it.
    Binary { question: String, yes_index: usize },
    Select { question: String, index: usize },
    Text { question: String, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    Yes,
    No,
}

impl YesNo {
    pub fn parse(question: &str, answer: &str) -> Result<Self, FormError> {
        match answer.trim() {
            "Yes" => Ok(YesNo::Yes),
            "No" => Ok(YesNo::No),
            other => Err(FormError::InvalidBinaryAnswer {
                question: question.to_string(),
                answer: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        }
    }
}

/// A question with its resolved answer, ready to be applied to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Binary { question: String, yes_index: usize, answer: YesNo },
    Select { question: String, index: usize, option: String },
    Text { question: String, index: usize, value: String },
}

impl Field {
    pub fn question(&self) -> &str {
        match self {
            Field::Binary { question, .. }
            | Field::Select { question, .. }
            | Field::Text { question, .. } => question,
        }
    }

    pub fn kind(&self) -> QuestionKind {
        match self {
            Field::Binary { .. } => QuestionKind::Binary,
            Field::Select { .. } => QuestionKind::Select,
            Field::Text { .. } => QuestionKind::Text,
        }
    }

    pub fn answer(&self) -> &str {
        match self {
            Field::Binary { answer, .. } => answer.as_str(),
            Field::Select { option, .. } => option,
            Field::Text { value, .. } => value,
        }
    }
}

fn is_upload(label: &str) -> bool {
    label.split_whitespace().next() == Some("Upload")
}

/// Splits the modal's labels into question slots.
///
/// `labels` are the first lines of every label in the modal, in document
/// order, and `legends[i]` is the legend of the fieldset enclosing label `i`.
/// Upload labels are skipped. A `Yes` label starts a radio pair whose
/// question text is its own fieldset's legend.
pub fn classify_fields(
    labels: &[String],
    dropdown_questions: &[String],
    legends: &[Option<String>],
) -> Result<Vec<FieldSlot>, FormError> {
    let mut slots = Vec::new();
    let mut i = 0;

    while i < labels.len() {
        let label = labels[i].as_str();

        if is_upload(label) {
            i += 1;
            continue;
        }

        if label == "Yes" {
            if labels.get(i + 1).map(String::as_str) != Some("No") {
                return Err(FormError::UnpairedBinaryField { index: i });
            }
            let question = legends
                .get(i)
                .cloned()
                .flatten()
                .ok_or(FormError::MissingQuestionText { index: i })?;
            slots.push(FieldSlot::Binary {
                question,
                yes_index: i,
            });
            i += 2;
        } else if dropdown_questions.iter().any(|q| q == label) {
            slots.push(FieldSlot::Select {
                question: label.to_string(),
                index: i,
            });
            i += 1;
        } else {
            slots.push(FieldSlot::Text {
                question: label.to_string(),
                index: i,
            });
            i += 1;
        }
    }

    Ok(slots)
}

/// Exact (case-insensitive) match first, otherwise the most similar option.
pub fn choose_option(options: &[String], answer: &str) -> Option<String> {
    let wanted = answer.trim();
    if let Some(exact) = options.iter().find(|o| o.eq_ignore_ascii_case(wanted)) {
        return Some(exact.clone());
    }

    let wanted = wanted.to_lowercase();
    options
        .iter()
        .map(|o| (o, strsim::normalized_levenshtein(&o.to_lowercase(), &wanted)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(o, _)| o.clone())
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").trim().to_string()
}

fn normalize_title(raw: &str) -> String {
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        "Unknown".to_string()
    } else {
        title
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Submitted,
    SubmittedAfterReview,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOutcome {
    pub pages: i64,
    pub completion: Completion,
}

pub struct FormWalker<'a> {
    pub db: &'a Database,
    pub cache: &'a mut AnswerCache,
    pub provider: &'a dyn AIProvider,
    pub tuning: &'a Tuning,
    pub application_id: i64,
    pub job_description: &'a str,
    pub applicant_profile: &'a str,
}

impl FormWalker<'_> {
    /// Fills pages until a submit or review control ends the form. There is
    /// no page limit: a form that always offers "Continue" never ends.
    pub fn walk(&mut self, page: &mut dyn Page) -> Result<WalkOutcome> {
        let mut depth: i64 = 0;
        loop {
            let title = self.read_title(page)?;
            tracing::info!(application = self.application_id, depth, title = %title, "Form page");
            let form_page_id = self.db.upsert_form_page(self.application_id, depth, &title)?;

            match classify_page(&title) {
                PageKind::Privacy => page.click_at(PRIVACY_AGREE, 0)?,
                PageKind::Static => {}
                PageKind::Questions => self.answer_questions(page, form_page_id)?,
            }

            if page.is_present(SUBMIT_BUTTON)? {
                tracing::info!("Submit button found, clicking it");
                page.click_at(SUBMIT_BUTTON, 0)?;
                return Ok(WalkOutcome {
                    pages: depth + 1,
                    completion: Completion::Submitted,
                });
            }

            if page.is_present(REVIEW_BUTTON)? {
                tracing::info!("Review button found, clicking it");
                page.click_at(REVIEW_BUTTON, 0)?;
                page.wait_for(FINAL_SUBMIT, self.tuning.wait_timeout())?;
                page.click_at(FINAL_SUBMIT, 0)?;
                return Ok(WalkOutcome {
                    pages: depth + 1,
                    completion: Completion::SubmittedAfterReview,
                });
            }

            if !page.is_present(CONTINUE_BUTTON)? {
                return Err(FormError::MissingControl { depth, title }.into());
            }
            page.click_at(CONTINUE_BUTTON, 0)?;
            page.pause(self.tuning.action_delay());
            depth += 1;
        }
    }

    fn read_title(&self, page: &mut dyn Page) -> Result<String> {
        if page.count(MODAL_TITLE)? == 0 {
            return Ok(normalize_title(""));
        }
        Ok(normalize_title(&page.text_at(MODAL_TITLE, 0)?))
    }

    fn answer_questions(&mut self, page: &mut dyn Page, form_page_id: i64) -> Result<()> {
        let labels: Vec<String> = page.texts(FIELD_LABELS)?.iter().map(|t| first_line(t)).collect();
        let dropdowns: Vec<String> = page.texts(DROPDOWN_LABELS)?.iter().map(|t| first_line(t)).collect();
        let mut legends = Vec::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            let legend = if label == "Yes" {
                page.text_within_at(FIELD_LABELS, i, FIELDSET_LEGEND)?
                    .map(|t| first_line(&t))
                    .filter(|t| !t.is_empty())
            } else {
                None
            };
            legends.push(legend);
        }

        let slots = classify_fields(&labels, &dropdowns, &legends)?;
        tracing::debug!(fields = slots.len(), "Classified form fields");

        let mut fields = Vec::with_capacity(slots.len());
        for slot in slots {
            let field = self.resolve(page, form_page_id, slot)?;
            let answer_id = self.db.find_or_create_answer(field.answer(), field.kind())?;
            self.db
                .upsert_question(form_page_id, field.question(), field.kind(), Some(answer_id))?;
            fields.push(field);
        }

        for field in &fields {
            self.fill(page, field)?;
        }

        self.cache.save()
    }

    /// Turns a slot into a field carrying its answer. Generated answers are
    /// cached only once they fit the field.
    fn resolve(&mut self, page: &mut dyn Page, form_page_id: i64, slot: FieldSlot) -> Result<Field> {
        match slot {
            FieldSlot::Binary { question, yes_index } => {
                let (answer, cached) = self.lookup(&question, AnswerHint::YesNo)?;
                let choice = match YesNo::parse(&question, &answer) {
                    Ok(choice) => choice,
                    Err(e) => {
                        self.db
                            .upsert_question(form_page_id, &question, QuestionKind::Binary, None)?;
                        return Err(e.into());
                    }
                };
                if !cached {
                    self.cache.put(&question, choice.as_str());
                }
                Ok(Field::Binary {
                    question,
                    yes_index,
                    answer: choice,
                })
            }
            FieldSlot::Select { question, index } => {
                let options: Vec<String> = page
                    .options_at(FIELD_LABELS, index)?
                    .into_iter()
                    .filter(|o| !o.is_empty() && o != SELECT_PLACEHOLDER)
                    .collect();
                if options.is_empty() {
                    return Err(FormError::NoSelectOptions { question }.into());
                }
                let (answer, cached) = self.lookup(&question, AnswerHint::OneOf(&options))?;
                let option = choose_option(&options, &answer)
                    .ok_or(FormError::NoSelectOptions { question: question.clone() })?;
                if !cached {
                    self.cache.put(&question, &option);
                }
                Ok(Field::Select {
                    question,
                    index,
                    option,
                })
            }
            FieldSlot::Text { question, index } => {
                let (value, cached) = self.lookup(&question, AnswerHint::FreeText)?;
                if !cached {
                    self.cache.put(&question, &value);
                }
                Ok(Field::Text {
                    question,
                    index,
                    value,
                })
            }
        }
    }

    fn lookup(&self, question: &str, hint: AnswerHint<'_>) -> Result<(String, bool)> {
        if let Some(answer) = self.cache.get(question) {
            tracing::debug!(question, answer, "Answer from cache");
            return Ok((answer.to_string(), true));
        }
        let answer = ai::answer_question(
            self.provider,
            question,
            hint,
            self.job_description,
            self.applicant_profile,
        )?;
        tracing::debug!(question, answer = %answer, "Generated answer");
        Ok((answer, false))
    }

    fn fill(&self, page: &mut dyn Page, field: &Field) -> Result<()> {
        match field {
            Field::Binary { yes_index, answer, .. } => {
                let index = match answer {
                    YesNo::Yes => *yes_index,
                    YesNo::No => yes_index + 1,
                };
                page.click_at(FIELD_LABELS, index)
            }
            Field::Select { index, option, .. } => page.select_at(FIELD_LABELS, *index, option),
            Field::Text { index, value, .. } => {
                page.fill_at(FIELD_LABELS, *index, value)?;
                page.pause(self.tuning.action_delay());
                page.press_enter_at(FIELD_LABELS, *index)
            }
        }
    }
}
