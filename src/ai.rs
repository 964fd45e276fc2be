use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    Anthropic,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
}

/// Accepts `provider:model` (`ollama:`, `anthropic:`, `openai:`) or a few
/// bare shorthands. Bare names that look like local models go to Ollama.
pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    let spec = |provider: ProviderKind, model_id: &str| -> Result<ModelSpec> {
        Ok(ModelSpec {
            provider,
            model_id: model_id.to_string(),
        })
    };

    if let Some((prefix, model)) = name.split_once(':') {
        if model.is_empty() {
            return Err(anyhow!("Missing model after '{}:'", prefix));
        }
        return match prefix {
            "ollama" => spec(ProviderKind::Ollama, model),
            "anthropic" => spec(ProviderKind::Anthropic, model),
            "openai" => spec(ProviderKind::OpenAI, model),
            _ => Err(anyhow!(
                "Unknown provider '{}'. Use ollama:<model>, anthropic:<model> or openai:<model>",
                prefix
            )),
        };
    }

    match name {
        "api-sonnet" => spec(ProviderKind::Anthropic, "claude-sonnet-4-5-20250929"),
        "api-haiku" => spec(ProviderKind::Anthropic, "claude-haiku-4-5-20251001"),
        "gpt-4o" | "gpt-4o-mini" | "o3" => spec(ProviderKind::OpenAI, name),
        _ if name.starts_with("gpt-") => spec(ProviderKind::OpenAI, name),
        _ if name.starts_with("llama")
            || name.starts_with("mistral")
            || name.starts_with("qwen")
            || name.starts_with("gemma") =>
        {
            spec(ProviderKind::Ollama, name)
        }
        _ => Err(anyhow!(
            "Unknown model '{}'. Available: llama3 (default), ollama:<model>, \
             api-sonnet, api-haiku, anthropic:<model>, gpt-4o, openai:<model>",
            name
        )),
    }
}

pub fn create_provider(spec: &ModelSpec) -> Result<Box<dyn AIProvider>> {
    match spec.provider {
        ProviderKind::Ollama => Ok(Box::new(OllamaProvider::new(spec.model_id.clone()))),
        ProviderKind::Anthropic => Ok(Box::new(AnthropicProvider::new(spec.model_id.clone())?)),
        ProviderKind::OpenAI => Ok(Box::new(OpenAIProvider::new(spec.model_id.clone())?)),
    }
}

// --- Ollama provider ---

const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug)]
pub struct OllamaProvider {
    base_url: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OllamaProvider {
    pub fn new(model_id: String) -> Self {
        let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| OLLAMA_DEFAULT_HOST.to_string());
        Self {
            base_url: normalize_host(&host),
            model_id,
            client: reqwest::blocking::Client::new(),
        }
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

impl AIProvider for OllamaProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model_id,
            prompt,
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Ollama request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let body: OllamaResponse = response
            .json()
            .context("Failed to parse Ollama response")?;
        Ok(body.response)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

impl ChatRequest {
    fn user(model: &str, prompt: &str, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set. Set it with: export ANTHROPIC_API_KEY=your-key-here")?;
        let client = reqwest::blocking::Client::new();
        Ok(Self { api_key, model_id, client })
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&ChatRequest::user(&self.model_id, prompt, max_tokens))
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;

        api_response
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug)]
pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set. Set it with: export OPENAI_API_KEY=your-key-here")?;
        let client = reqwest::blocking::Client::new();
        Ok(Self { api_key, model_id, client })
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest::user(&self.model_id, prompt, max_tokens))
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAIResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Screening questions ---

/// What shape of answer the form field accepts.
#[derive(Debug, Clone, Copy)]
pub enum AnswerHint<'a> {
    YesNo,
    OneOf(&'a [String]),
    FreeText,
}

pub fn answer_question(
    provider: &dyn AIProvider,
    question: &str,
    hint: AnswerHint<'_>,
    job_description: &str,
    applicant_profile: &str,
) -> Result<String> {
    let format_instruction = match hint {
        AnswerHint::YesNo => "Answer with exactly one word: Yes or No.".to_string(),
        AnswerHint::OneOf(options) => format!(
            "Answer with exactly one of these options, copied verbatim: {}",
            options.join(" | ")
        ),
        AnswerHint::FreeText => "Answer as briefly as possible. If the question asks for a number \
             (years, salary, notice period), reply with the number only."
            .to_string(),
    };

    let prompt = format!(
        "You are filling in a job application form on behalf of the applicant below.\n\
        Answer the screening question truthfully from the applicant profile; when the profile \
        does not say, give the answer most favourable to the application.\n\
        {format_instruction}\n\
        Reply with the answer only, no explanation.\n\n\
        Question: {question}\n\n\
        Job description:\n{job_description}\n\n\
        Applicant profile:\n{applicant_profile}",
    );

    tracing::debug!(model = provider.model_name(), question, "Generating answer");
    let response = provider.complete(&prompt, 256)?;
    let answer = clean_answer(&response);
    if answer.is_empty() {
        return Err(anyhow!("Empty answer generated for question '{}'", question));
    }
    Ok(answer)
}

fn clean_answer(raw: &str) -> String {
    let first_line = raw.trim().lines().next().unwrap_or("").trim();
    first_line
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Canned {
        reply: String,
        prompts: RefCell<Vec<String>>,
    }

    impl AIProvider for Canned {
        fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn canned(reply: &str) -> Canned {
        Canned {
            reply: reply.to_string(),
            prompts: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_resolve_model_default_is_ollama() {
        let spec = resolve_model("llama3").unwrap();
        assert_eq!(spec.provider, ProviderKind::Ollama);
        assert_eq!(spec.model_id, "llama3");
    }

    #[test]
    fn test_resolve_model_prefixed() {
        let spec = resolve_model("ollama:phi3").unwrap();
        assert_eq!(spec.provider, ProviderKind::Ollama);
        assert_eq!(spec.model_id, "phi3");

        let spec = resolve_model("anthropic:claude-haiku-4-5-20251001").unwrap();
        assert_eq!(spec.provider, ProviderKind::Anthropic);

        let spec = resolve_model("openai:gpt-4.1").unwrap();
        assert_eq!(spec.provider, ProviderKind::OpenAI);
        assert_eq!(spec.model_id, "gpt-4.1");
    }

    #[test]
    fn test_resolve_model_aliases() {
        let spec = resolve_model("api-sonnet").unwrap();
        assert_eq!(spec.model_id, "claude-sonnet-4-5-20250929");
        assert_eq!(spec.provider, ProviderKind::Anthropic);

        let spec = resolve_model("gpt-4o").unwrap();
        assert_eq!(spec.provider, ProviderKind::OpenAI);
    }

    #[test]
    fn test_resolve_model_unknown() {
        assert!(resolve_model("bard").is_err());
        assert!(resolve_model("cohere:command").is_err());
        assert!(resolve_model("ollama:").is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("0.0.0.0:11434"), "http://0.0.0.0:11434");
        assert_eq!(normalize_host("https://gpu.local/"), "https://gpu.local");
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe { env::remove_var("OPENAI_API_KEY"); }

        let result = OpenAIProvider::new("gpt-4o".to_string());

        if let Some(val) = original {
            unsafe { env::set_var("OPENAI_API_KEY", val); }
        }

        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_answer_question_cleans_reply() {
        let provider = canned("  \"Yes\"\nBecause the profile says so.");
        let answer = answer_question(
            &provider,
            "Are you legally authorized to work in the EU?",
            AnswerHint::YesNo,
            "Remote data role",
            "EU citizen",
        )
        .unwrap();
        assert_eq!(answer, "Yes");

        let prompts = provider.prompts.borrow();
        assert!(prompts[0].contains("Yes or No"));
        assert!(prompts[0].contains("EU citizen"));
    }

    #[test]
    fn test_answer_question_lists_options() {
        let provider = canned("Professional");
        let options = vec!["Native".to_string(), "Professional".to_string()];
        answer_question(&provider, "English level", AnswerHint::OneOf(&options), "", "")
            .unwrap();
        assert!(provider.prompts.borrow()[0].contains("Native | Professional"));
    }

    #[test]
    fn test_answer_question_rejects_empty_reply() {
        let provider = canned("   ");
        let result = answer_question(&provider, "Salary?", AnswerHint::FreeText, "", "");
        assert!(result.is_err());
    }
}
