//! Retrieval assistant backend wire format
//!
//! Conversation context lives server-side in a session, so only the new
//! question and the session to continue are sent.

use serde::{Deserialize, Serialize};

use crate::{error::Result, messages::Exchange};

use super::HttpRequest;

/// Build the completion request for an exchange addressed to `assistant_id`
///
/// # Errors
///
/// Returns an error if the request body cannot be serialized
pub fn build_request(
    base_url: &str,
    assistant_id: &str,
    exchange: &Exchange,
    bearer_token: Option<String>,
) -> Result<HttpRequest> {
    let request = RetrievalRequest {
        question: exchange.input.clone(),
        stream: exchange.stream,
        session_id: exchange.session_id.clone(),
    };

    Ok(HttpRequest {
        url: format!("{base_url}/api/v1/chats/{assistant_id}/completions"),
        body: serde_json::to_value(&request)?,
        bearer_token,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetrievalRequest {
    question: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use serde_json::json;

    #[test]
    fn test_build_request() {
        let exchange = Exchange::new(BackendKind::Retrieval, "What is in the handbook?");
        let request = build_request("http://kb.local", "asst-1", &exchange, None).unwrap();

        assert_eq!(request.url, "http://kb.local/api/v1/chats/asst-1/completions");
        assert_eq!(
            request.body,
            json!({"question": "What is in the handbook?", "stream": true})
        );
        assert!(request.bearer_token.is_none());
    }

    #[test]
    fn test_build_request_with_session() {
        let exchange = Exchange::new(BackendKind::Retrieval, "And then?")
            .with_session("sess-42")
            .with_stream(false);
        let request = build_request("http://kb.local", "a", &exchange, Some("t".into())).unwrap();

        assert_eq!(
            request.body,
            json!({"question": "And then?", "stream": false, "session_id": "sess-42"})
        );
    }
}
