use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use stagehand_core::parameter::ParameterProvider;

/// Stdin shared between parameter prompts and the operator console
pub type InputLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_lines() -> InputLines {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

/// Write `prompt` to stderr and read one trimmed line. `None` on EOF.
pub async fn ask(input: &InputLines, prompt: &str) -> Option<String> {
    let mut stderr = std::io::stderr();
    let _ = write!(stderr, "{}", prompt);
    let _ = stderr.flush();
    let mut lines = input.lock().await;
    lines
        .next_line()
        .await
        .ok()
        .flatten()
        .map(|line| line.trim().to_string())
}

/// Last provider in the chain: asks the operator on the terminal
pub struct PromptProvider {
    input: InputLines,
    descriptions: BTreeMap<String, String>,
}

impl PromptProvider {
    pub fn new(input: InputLines, descriptions: BTreeMap<String, String>) -> Self {
        Self {
            input,
            descriptions,
        }
    }
}

#[async_trait]
impl ParameterProvider for PromptProvider {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn provide(&self, name: &str, secret: bool) -> Option<String> {
        let hint = match (self.descriptions.get(name), secret) {
            (Some(d), true) => format!(" ({}, secret)", d),
            (Some(d), false) => format!(" ({})", d),
            (None, true) => " (secret)".to_string(),
            (None, false) => String::new(),
        };
        ask(&self.input, &format!("Value for parameter '{}'{}: ", name, hint))
            .await
            .filter(|v| !v.is_empty())
    }
}
