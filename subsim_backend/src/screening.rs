//! Last check on generated text before anything is posted.

const REMOVED_MARKERS: [&str; 2] = ["[removed]", "[deleted]"];
const TAG_FRAGMENTS: [&str; 2] = ["<|", "|>"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreeningVerdict {
    Allow,
    /// Rejected with reason
    Reject(String),
}

impl ScreeningVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ScreeningVerdict::Allow)
    }
}

/// The model learned from threads where content was removed and sometimes
/// reproduces the placeholder instead of text.
pub fn screen_generated_text(generated_text: &str) -> ScreeningVerdict {
    for marker in REMOVED_MARKERS {
        if generated_text.contains(marker) {
            return ScreeningVerdict::Reject(format!("generated text contains {}", marker));
        }
    }
    ScreeningVerdict::Allow
}

/// The part of `generated_text` the model wrote after echoing `prompt`.
pub fn continuation<'a>(prompt: &str, generated_text: &'a str) -> &'a str {
    generated_text
        .strip_prefix(prompt)
        .or_else(|| generated_text.get(prompt.len()..))
        .unwrap_or(generated_text)
}

#[derive(Debug, Clone)]
pub struct Screening {
    negative_keywords: Vec<String>,
}

impl Screening {
    pub fn new<I, K>(negative_keywords: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let negative_keywords = negative_keywords
            .into_iter()
            .map(|keyword| keyword.as_ref().trim().to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        Self { negative_keywords }
    }

    /// Check an extracted reply or submission body.
    pub fn screen_body(&self, body: &str) -> ScreeningVerdict {
        if body.trim().is_empty() {
            return ScreeningVerdict::Reject("body is empty".to_string());
        }

        if let Some(fragment) = TAG_FRAGMENTS.iter().find(|fragment| body.contains(*fragment)) {
            return ScreeningVerdict::Reject(format!("body still contains tag fragment {}", fragment));
        }

        let lowered = body.to_lowercase();
        if let Some(keyword) = self
            .negative_keywords
            .iter()
            .find(|keyword| lowered.contains(keyword.as_str()))
        {
            return ScreeningVerdict::Reject(format!("body has negative keyword {}", keyword));
        }

        ScreeningVerdict::Allow
    }

    /// Run both checks. Only the continuation after `prompt` is searched for
    /// placeholders, since threads with deleted authors carry them in the prompt.
    /// Returns the trimmed body, or the rejection reason.
    pub fn check(
        &self,
        bot_name: &str,
        prompt: &str,
        generated_text: &str,
        body: &str,
    ) -> Result<String, String> {
        let verdict = match screen_generated_text(continuation(prompt, generated_text)) {
            ScreeningVerdict::Allow => self.screen_body(body),
            rejected => rejected,
        };

        match verdict {
            ScreeningVerdict::Allow => Ok(body.trim().to_string()),
            ScreeningVerdict::Reject(reason) => {
                tracing::info!("Rejected text generated by {}: {}", bot_name, reason);
                Err(reason)
            }
        }
    }
}
