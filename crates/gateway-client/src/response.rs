//! Response types for synchronous completion calls.

use serde::{Deserialize, Serialize};

/// Response from a chat completion request.
///
/// Decoding is lenient: backends omit or null out fields for filtered and
/// tool-call answers, and those still count as successful responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Unique identifier for this completion.
    #[serde(default)]
    pub id: String,
    /// Object type (usually "chat.completion").
    #[serde(default)]
    pub object: String,
    /// Unix timestamp of when the completion was created.
    #[serde(default)]
    pub created: i64,
    /// Model used for the completion.
    #[serde(default)]
    pub model: String,
    /// List of completion choices.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Get the content of the first choice, or `""` if there is none.
    pub fn content(&self) -> &str {
        self.choices.first().map_or("", |c| c.message.content())
    }

    /// Get the first choice.
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }

    /// Get the finish reason of the first choice.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
    }

    /// Get the total number of tokens used.
    pub fn total_tokens(&self) -> Option<u32> {
        self.usage.as_ref().map(|u| u.total_tokens)
    }
}

/// A single completion choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    /// Index of this choice.
    #[serde(default)]
    pub index: u32,
    /// The generated message.
    #[serde(default)]
    pub message: ResponseMessage,
    /// Reason for completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A message generated by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Role of the message sender.
    #[serde(default)]
    pub role: String,
    /// Content of the message; `null` for filtered or tool-call answers.
    #[serde(default)]
    pub content: Option<String>,
}

impl ResponseMessage {
    /// Get the content, or `""` if absent.
    pub fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Number of tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total number of tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-3.5-turbo",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "你好，世界！"
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 9,
                "completion_tokens": 12,
                "total_tokens": 21
            }
        }"#;

        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, "chatcmpl-123");
        assert_eq!(response.content(), "你好，世界！");
        assert_eq!(response.finish_reason(), Some("stop"));
        assert_eq!(
            response.usage,
            Some(Usage {
                prompt_tokens: 9,
                completion_tokens: 12,
                total_tokens: 21,
            })
        );
    }

    #[test]
    fn test_empty_choices() {
        let json = r#"{"id": "x", "model": "m", "choices": []}"#;
        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.content(), "");
        assert!(response.first_choice().is_none());
        assert!(response.total_tokens().is_none());
    }

    #[test]
    fn test_null_content_is_a_valid_answer() {
        let json = r#"{
            "id": "chatcmpl-456",
            "model": "gpt-3.5-turbo",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null},
                "finish_reason": "content_filter"
            }]
        }"#;

        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.content(), "");
        assert!(response.choices[0].message.content.is_none());
        assert_eq!(response.finish_reason(), Some("content_filter"));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let json = r#"{
            "choices": [{"message": {"content": "partial"}}],
            "usage": {"total_tokens": 3}
        }"#;

        let response: CompletionResponse = serde_json::from_str(json).unwrap();
        assert!(response.id.is_empty());
        assert!(response.model.is_empty());
        assert_eq!(response.choices[0].index, 0);
        assert!(response.choices[0].message.role.is_empty());
        assert_eq!(response.content(), "partial");
        assert_eq!(response.total_tokens(), Some(3));
        assert_eq!(response.usage.as_ref().unwrap().prompt_tokens, 0);
    }
}
