//! Provider subsystem for model inference backends.
//!
//! Each provider implements the [`Provider`] trait defined in [`traits`] and is
//! constructed by [`create_provider`] from the resolved [`ModelSpec`]. Both
//! supported backends speak the OpenAI chat-completions dialect, so they share
//! [`compatible::OpenAiCompatibleProvider`].

pub mod compatible;
pub mod traits;

#[allow(unused_imports)]
pub use traits::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall};

use crate::config::ModelSpec;
use compatible::OpenAiCompatibleProvider;

const MAX_API_ERROR_CHARS: usize = 200;
const REDACTED: &str = "[REDACTED]";

/// Token prefixes that identify credentials in upstream error bodies.
/// `AIza` is the Google API key prefix, `ya29.` a Google OAuth access token.
const SECRET_PREFIXES: [&str; 4] = ["sk-", "AIza", "ya29.", "sess-"];

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn looks_like_secret(token: &str) -> bool {
    SECRET_PREFIXES
        .iter()
        .any(|prefix| token.len() > prefix.len() && token.starts_with(prefix))
}

fn flush_token(out: &mut String, token: &mut String) {
    if looks_like_secret(token) {
        out.push_str(REDACTED);
    } else {
        out.push_str(token);
    }
    token.clear();
}

/// Replace credential-looking tokens (see [`SECRET_PREFIXES`]) with `[REDACTED]`.
pub fn scrub_secret_patterns(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut token = String::new();

    for c in input.chars() {
        if is_secret_char(c) {
            token.push(c);
        } else {
            flush_token(&mut out, &mut token);
            out.push(c);
        }
    }
    flush_token(&mut out, &mut token);

    out
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    match scrubbed.char_indices().nth(MAX_API_ERROR_CHARS) {
        Some((cut, _)) => format!("{}...", &scrubbed[..cut]),
        None => scrubbed,
    }
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{provider} API error ({status}): {sanitized}")
}

/// Factory: build the provider for the active deployment profile.
pub fn create_provider(spec: &ModelSpec) -> anyhow::Result<Box<dyn Provider>> {
    let key = Some(spec.api_key.trim()).filter(|k| !k.is_empty());

    match spec.provider {
        "gemini" => Ok(Box::new(OpenAiCompatibleProvider::new(
            "Gemini",
            &spec.api_url,
            key,
        ))),
        "openai" => Ok(Box::new(OpenAiCompatibleProvider::new(
            "OpenAI",
            &spec.api_url,
            key,
        ))),
        other => anyhow::bail!(
            "Unknown provider: {other}. Supported providers: \"gemini\", \"openai\"."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GEMINI_OPENAI_BASE_URL, OPENAI_BASE_URL};

    fn spec(provider: &'static str, url: &str) -> ModelSpec {
        ModelSpec {
            provider,
            model: "m".into(),
            api_key: "provider-test-credential".into(),
            api_url: url.into(),
        }
    }

    #[test]
    fn factory_gemini_and_openai() {
        let gemini = create_provider(&spec("gemini", GEMINI_OPENAI_BASE_URL)).unwrap();
        assert_eq!(gemini.name(), "Gemini");
        let openai = create_provider(&spec("openai", OPENAI_BASE_URL)).unwrap();
        assert_eq!(openai.name(), "OpenAI");
    }

    #[test]
    fn factory_unknown_provider_errors() {
        let msg = create_provider(&spec("nonexistent", OPENAI_BASE_URL))
            .err()
            .unwrap()
            .to_string();
        assert!(msg.contains("Unknown provider"));
    }

    // ── API error sanitization ───────────────────────────────

    #[test]
    fn sanitize_scrubs_sk_prefix() {
        let input = "request failed: sk-1234567890abcdef";
        let out = sanitize_api_error(input);
        assert!(!out.contains("sk-1234567890abcdef"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn scrub_google_api_key() {
        let input = "API key not valid: AIzaSyD-abc_123. Please pass a valid key.";
        assert_eq!(
            scrub_secret_patterns(input),
            "API key not valid: [REDACTED] Please pass a valid key."
        );
    }

    #[test]
    fn scrub_leaves_bare_prefix_alone() {
        assert_eq!(scrub_secret_patterns("prefix sk- only"), "prefix sk- only");
    }

    #[test]
    fn sanitize_truncates_long_error() {
        let long = "a".repeat(400);
        let result = sanitize_api_error(&long);
        assert_eq!(result.len(), MAX_API_ERROR_CHARS + 3);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let result = sanitize_api_error(&long);
        assert_eq!(result.chars().count(), MAX_API_ERROR_CHARS + 3);
    }

    #[test]
    fn sanitize_no_secret_no_change() {
        let input = "simple upstream timeout";
        assert_eq!(sanitize_api_error(input), input);
    }
}
