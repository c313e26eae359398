//! Comment generator backed by an OpenAI-compatible chat endpoint.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::CommentGenerator;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_POST_CHARS: usize = 1000;

/// Prompt template. `{text_of_the_post}`, `{topics}` and `{comments}`
/// are substituted before the call.
const DEFAULT_PROMPT: &str = "Write a short, natural comment for the following post.

Post text: {text_of_the_post}
Topics: {topics}
Existing comments: {comments}

Requirements:
- At most 2-3 sentences
- Conversational style, positive or neutral tone
- On topic, no emoji, no links, no advertising

Write the comment:";

pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    prompt: String,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, model: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    /// Replace the default prompt template. Placeholders that are
    /// missing from the custom template are appended.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        let mut prompt = prompt.into();
        if !prompt.contains("{text_of_the_post}") {
            prompt.push_str("\n\nPost text: {text_of_the_post}");
        }
        self.prompt = prompt;
        self
    }

    fn build_prompt(&self, post_text: &str, topics: &[String], context: Option<&str>) -> String {
        let text: String = post_text.chars().take(MAX_POST_CHARS).collect();
        let topics = if topics.is_empty() {
            "general".to_string()
        } else {
            topics.join(", ")
        };
        self.prompt
            .replace("{text_of_the_post}", &text)
            .replace("{topics}", &topics)
            .replace("{comments}", context.unwrap_or("No comments yet"))
    }

    /// The model sometimes wraps the comment in quotes; strip them.
    fn clean(reply: &str) -> String {
        let reply = reply.trim();
        let reply = reply
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .unwrap_or(reply);
        let reply = reply
            .strip_prefix('\'')
            .and_then(|r| r.strip_suffix('\''))
            .unwrap_or(reply);
        reply.to_string()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl CommentGenerator for HttpGenerator {
    async fn generate(
        &self,
        post_text: &str,
        topics: &[String],
        discussion_context: Option<&str>,
    ) -> Result<String> {
        let prompt = self.build_prompt(post_text, topics, discussion_context);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("generator request failed")?;
        if !response.status().is_success() {
            bail!("generator returned status {}", response.status());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("malformed generator response")?;
        let reply = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();
        if reply.trim().is_empty() {
            bail!("generator produced no content");
        }
        Ok(Self::clean(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_substitutes_placeholders() {
        let generator = HttpGenerator::new("http://localhost", None, None);
        let prompt = generator.build_prompt("hello world", &["tech".to_string()], None);
        assert!(prompt.contains("hello world"));
        assert!(prompt.contains("tech"));
        assert!(prompt.contains("No comments yet"));
        assert!(!prompt.contains("{text_of_the_post}"));
    }

    #[test]
    fn prompt_truncates_long_posts() {
        let generator = HttpGenerator::new("http://localhost", None, None);
        let long = "x".repeat(5000);
        let prompt = generator.build_prompt(&long, &[], None);
        assert!(prompt.len() < 2000);
    }

    #[test]
    fn custom_prompt_gets_post_placeholder() {
        let generator =
            HttpGenerator::new("http://localhost", None, None).with_prompt("Be friendly.");
        let prompt = generator.build_prompt("the post", &[], None);
        assert!(prompt.contains("the post"));
    }

    #[test]
    fn clean_strips_wrapping_quotes() {
        assert_eq!(HttpGenerator::clean("\"nice post\""), "nice post");
        assert_eq!(HttpGenerator::clean("'nice post'"), "nice post");
        assert_eq!(HttpGenerator::clean("plain"), "plain");
    }
}
