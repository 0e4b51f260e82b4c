//! Retrieval assistant stream decoder
//!
//! The retrieval backend always sends the full answer so far, never an
//! increment, so every content fragment produced here is cumulative. Its
//! payloads are inconsistent in shape, so each one runs through an ordered list
//! of tiers and the first tier that recognizes it wins:
//!
//! 1. `structured`: `{"code", "data": {"answer" | "content", "status", ...}}`
//! 2. `flat`: `{"answer": "..."}` with no envelope
//! 3. `finished_sentinel`: anything carrying `"data": true`, valid JSON or not
//! 4. `answer_pattern`: an `"answer":"..."` string pulled out of broken JSON
//!
//! When a whole stream produced nothing, [`RetrievalStreamDecoder::finish`]
//! scans the (capped) lines it received once more and, failing that, answers with
//! [`FALLBACK_ANSWER`] so the caller never ends up with an empty reply.

use std::{collections::VecDeque, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{config::BackendKind, error::ChatError, messages::DocumentReference};

use super::{Fragment, StreamDecoder, TerminalMetadata};

/// Answer used when nothing readable arrived at all
pub const FALLBACK_ANSWER: &str =
    "Sorry, I could not read the assistant's answer. Please try again.";

static ANSWER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""answer"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex"));

static FINISHED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""status"\s*:\s*"finished""#).expect("valid regex"));

/// Upper bound on transcript bytes kept for the recovery pass
const TRANSCRIPT_LIMIT: usize = 256 * 1024;

/// A tier's reading of one payload
#[derive(Debug, Clone, PartialEq)]
pub struct TierMatch {
    pub fragment: Fragment,
    pub session_id: Option<String>,
}

impl From<Fragment> for TierMatch {
    fn from(fragment: Fragment) -> Self {
        Self {
            fragment,
            session_id: None,
        }
    }
}

/// One fallback strategy
pub type PayloadTier = fn(&str) -> Option<TierMatch>;

/// Fallback strategies in the order they are tried
pub const PAYLOAD_TIERS: [(&str, PayloadTier); 4] = [
    ("structured", structured_tier),
    ("flat", flat_tier),
    ("finished_sentinel", finished_sentinel_tier),
    ("answer_pattern", answer_pattern_tier),
];

/// Run the tiers in order, returning the first match and the tier's name
#[must_use]
pub fn decode_payload(payload: &str) -> Option<(&'static str, TierMatch)> {
    PAYLOAD_TIERS
        .iter()
        .find_map(|(name, tier)| tier(payload).map(|found| (*name, found)))
}

/// `data` object of the structured envelope
#[derive(Debug, Clone, Default, Deserialize)]
struct AnswerData {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    quoted_documents: Option<Vec<Value>>,
}

/// Citation as sent by the retrieval backend
#[derive(Debug, Clone, Deserialize)]
struct QuotedDocument {
    #[serde(default, deserialize_with = "string_or_number")]
    id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    file_name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    file_type: String,
    #[serde(default, deserialize_with = "string_or_number")]
    content: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    page_num: Option<u32>,
    #[serde(default, deserialize_with = "lenient_number")]
    score: Option<f64>,
}

impl From<QuotedDocument> for DocumentReference {
    fn from(doc: QuotedDocument) -> Self {
        Self {
            id: doc.id,
            name: doc.file_name,
            doc_type: doc.file_type,
            page: doc.page_num,
            score: doc.score,
            content: doc.content,
            path: doc.file_path,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Number sent either as a JSON number or as a string; anything else is `None`
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: FromStr,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Citations that parse; a malformed one is dropped on its own
fn citations(raw: Option<Vec<Value>>) -> Vec<DocumentReference> {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|doc| match serde_json::from_value::<QuotedDocument>(doc) {
            Ok(doc) => Some(doc.into()),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable citation");
                None
            }
        })
        .collect()
}

fn structured(payload: &str, force_finished: bool) -> Option<TierMatch> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let envelope = value.as_object()?;
    let code = envelope.get("code")?;

    let data = match envelope.get("data") {
        Some(data @ Value::Object(_)) => data,
        Some(Value::Bool(true)) => return None,
        _ => {
            if code.as_i64() == Some(0) {
                return None;
            }
            let message = envelope
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| format!("backend returned code {code}"), String::from);
            return Some(Fragment::ProtocolError { message }.into());
        }
    };

    let data: AnswerData = serde_json::from_value(data.clone()).ok()?;
    let finished = force_finished || data.status.as_deref() == Some("finished");
    let text = data.answer.or(data.content);

    let fragment = if finished {
        Fragment::Terminal {
            final_text: text.unwrap_or_default(),
            metadata: TerminalMetadata {
                documents: citations(data.quoted_documents),
                session_id: data.session_id.clone(),
            },
        }
    } else {
        Fragment::cumulative(text?)
    };

    Some(TierMatch {
        fragment,
        session_id: data.session_id,
    })
}

/// `{"code": .., "data": {"answer": .., "status": ..}}`
fn structured_tier(payload: &str) -> Option<TierMatch> {
    structured(payload, false)
}

/// `{"answer": ".."}` without the envelope
fn flat_tier(payload: &str) -> Option<TierMatch> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let answer = value.as_object()?.get("answer")?.as_str()?;
    Some(Fragment::cumulative(answer).into())
}

/// `{"code":0,"data":true}` in any of its spellings
fn finished_sentinel_tier(payload: &str) -> Option<TierMatch> {
    let parsed_true = serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|value| value.get("data").and_then(Value::as_bool))
        == Some(true);

    if parsed_true || payload.contains(r#""data":true"#) || payload.contains(r#""data": true"#) {
        Some(Fragment::finished().into())
    } else {
        None
    }
}

/// Pull an answer string out of a payload that is not valid JSON
fn answer_pattern_tier(payload: &str) -> Option<TierMatch> {
    let text = last_answer_match(payload)?;
    let fragment = if FINISHED_PATTERN.is_match(payload) {
        Fragment::Terminal {
            final_text: text,
            metadata: TerminalMetadata::default(),
        }
    } else {
        Fragment::cumulative(text)
    };
    Some(fragment.into())
}

fn last_answer_match(text: &str) -> Option<String> {
    let raw = ANSWER_PATTERN
        .captures_iter(text)
        .last()?
        .get(1)?
        .as_str()
        .to_string();
    // the capture is still JSON-escaped
    Some(serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or(raw))
}

/// Answer carried by a JSON value, flat or enveloped
fn answer_in(value: &Value) -> Option<&str> {
    value
        .get("answer")
        .or_else(|| value.get("data").and_then(|data| data.get("answer")))
        .and_then(Value::as_str)
        .filter(|answer| !answer.is_empty())
}

/// Last-resort scan of everything received
///
/// Tries every `{` as the start of a JSON value, so objects spread over several
/// lines are found too; then falls back to the bare answer pattern.
#[must_use]
pub fn recover_answer(transcript: &str) -> Option<String> {
    let from_json = transcript
        .match_indices('{')
        .filter_map(|(start, _)| {
            serde_json::Deserializer::from_str(&transcript[start..])
                .into_iter::<Value>()
                .next()?
                .ok()
        })
        .filter_map(|value| answer_in(&value).map(String::from))
        .last();

    from_json.or_else(|| last_answer_match(transcript).filter(|answer| !answer.is_empty()))
}

/// Decoder for retrieval assistant streams
#[derive(Debug, Default)]
pub struct RetrievalStreamDecoder {
    /// Latest non-blank lines received while nothing was produced, for the
    /// recovery pass; at most `TRANSCRIPT_LIMIT` bytes
    transcript: VecDeque<String>,
    transcript_bytes: usize,

    /// Fragments handed out so far
    produced: usize,

    /// Payloads no tier recognized
    skipped: usize,

    /// Latest session seen in any frame
    session_id: Option<String>,
}

impl RetrievalStreamDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn accept(&mut self, found: TierMatch) -> Option<Fragment> {
        if found.session_id.is_some() {
            self.session_id = found.session_id;
        }

        let fragment = match found.fragment {
            Fragment::ContentDelta { text, .. } if text.is_empty() => return None,
            Fragment::Terminal {
                final_text,
                mut metadata,
            } => {
                if metadata.session_id.is_none() {
                    metadata.session_id = self.session_id.clone();
                }
                Fragment::Terminal {
                    final_text,
                    metadata,
                }
            }
            other => other,
        };

        if self.produced == 0 {
            self.transcript = VecDeque::new();
            self.transcript_bytes = 0;
        }
        self.produced += 1;
        Some(fragment)
    }

    fn recovered_terminal(&self, transcript: &str) -> Fragment {
        let final_text = recover_answer(transcript).unwrap_or_else(|| {
            tracing::warn!("no answer could be recovered, using fallback text");
            FALLBACK_ANSWER.to_string()
        });
        Fragment::Terminal {
            final_text,
            metadata: TerminalMetadata {
                documents: Vec::new(),
                session_id: self.session_id.clone(),
            },
        }
    }
}

impl StreamDecoder for RetrievalStreamDecoder {
    fn backend(&self) -> BackendKind {
        BackendKind::Retrieval
    }

    fn record_line(&mut self, line: &str) {
        let line = line.trim();
        if self.produced > 0 || line.is_empty() {
            return;
        }
        self.transcript_bytes += line.len();
        self.transcript.push_back(line.to_string());
        while self.transcript_bytes > TRANSCRIPT_LIMIT {
            let Some(oldest) = self.transcript.pop_front() else {
                break;
            };
            self.transcript_bytes -= oldest.len();
        }
    }

    fn decode(&mut self, payload: &str) -> Option<Fragment> {
        match decode_payload(payload) {
            Some((tier, found)) => {
                if tier != "structured" {
                    tracing::debug!(tier, "payload decoded by fallback tier");
                }
                self.accept(found)
            }
            None => {
                self.skipped += 1;
                let error = ChatError::MalformedFrame(format!("no decoder tier matched: {payload}"));
                tracing::warn!(%error, skipped = self.skipped, "skipping payload");
                None
            }
        }
    }

    fn finish(&mut self) -> Option<Fragment> {
        if self.produced > 0 {
            return None;
        }
        tracing::warn!(
            lines = self.transcript.len(),
            "stream produced no answer, scanning the whole response"
        );
        let transcript = Vec::from(std::mem::take(&mut self.transcript)).join("\n");
        self.transcript_bytes = 0;
        let fragment = self.recovered_terminal(&transcript);
        self.produced += 1;
        Some(fragment)
    }

    fn decode_body(&mut self, body: &str) -> Fragment {
        let body = body.trim();
        let found = structured(body, true).or_else(|| decode_payload(body).map(|(_, found)| found));

        match found.and_then(|found| self.accept(found)) {
            Some(Fragment::ContentDelta { text, .. }) => Fragment::Terminal {
                final_text: text,
                metadata: TerminalMetadata {
                    documents: Vec::new(),
                    session_id: self.session_id.clone(),
                },
            },
            Some(Fragment::Terminal {
                final_text,
                metadata,
            }) if final_text.is_empty() => Fragment::Terminal {
                final_text: recover_answer(body).unwrap_or_else(|| FALLBACK_ANSWER.to_string()),
                metadata,
            },
            Some(fragment) => fragment,
            None => self.recovered_terminal(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(decoder: &mut RetrievalStreamDecoder, payloads: &[&str]) -> Vec<Fragment> {
        payloads
            .iter()
            .filter_map(|payload| {
                decoder.record_line(payload);
                decoder.decode(payload)
            })
            .collect()
    }

    #[test]
    fn test_tier_order_is_stable() {
        let names: Vec<_> = PAYLOAD_TIERS.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec!["structured", "flat", "finished_sentinel", "answer_pattern"]
        );
    }

    #[test]
    fn test_structured_running_frames_are_cumulative() {
        let mut decoder = RetrievalStreamDecoder::new();
        let fragments = decode_all(
            &mut decoder,
            &[
                r#"{"code":0,"data":{"answer":"Par","status":"running","session_id":"s-1"}}"#,
                r#"{"code":0,"data":{"answer":"Partial answer","status":"running"}}"#,
            ],
        );
        assert_eq!(
            fragments,
            vec![
                Fragment::cumulative("Par"),
                Fragment::cumulative("Partial answer")
            ]
        );
        assert_eq!(decoder.session_id(), Some("s-1"));
    }

    #[test]
    fn test_structured_content_field() {
        let found = structured_tier(r#"{"code":0,"data":{"content":"via content"}}"#).unwrap();
        assert_eq!(found.fragment, Fragment::cumulative("via content"));
    }

    #[test]
    fn test_structured_finished_carries_documents() {
        let payload = r#"{"code":0,"message":"","data":{"answer":"Done.","status":"finished","session_id":"s-9","quoted_documents":[{"id":7,"file_name":"guide.pdf","file_type":"pdf","content":"excerpt","file_path":"/kb/guide.pdf","page_num":3,"score":0.82},{"id":"d2","file_name":"faq.md","file_type":"md","content":"more"}]}}"#;
        let mut decoder = RetrievalStreamDecoder::new();

        let Some(Fragment::Terminal {
            final_text,
            metadata,
        }) = decoder.decode(payload)
        else {
            panic!("expected terminal fragment");
        };

        assert_eq!(final_text, "Done.");
        assert_eq!(metadata.session_id.as_deref(), Some("s-9"));
        assert_eq!(metadata.documents.len(), 2);
        assert_eq!(
            metadata.documents[0],
            DocumentReference {
                id: "7".into(),
                name: "guide.pdf".into(),
                doc_type: "pdf".into(),
                page: Some(3),
                score: Some(0.82),
                content: "excerpt".into(),
                path: Some("/kb/guide.pdf".into()),
            }
        );
        assert_eq!(metadata.documents[1].page, None);
    }

    #[test]
    fn test_loosely_typed_citations() {
        let payload = r#"{"code":0,"data":{"answer":"Done","status":"finished","session_id":"s-1","quoted_documents":[{"id":"a","file_name":"a.pdf","file_type":"pdf","content":null,"page_num":"3","score":"0.5"},{"id":"b","page_num":{"nested":true}},"not an object"]}}"#;
        let (tier, found) = decode_payload(payload).unwrap();
        assert_eq!(tier, "structured");

        let Fragment::Terminal {
            final_text,
            metadata,
        } = found.fragment
        else {
            panic!("expected terminal fragment");
        };
        assert_eq!(final_text, "Done");
        assert_eq!(metadata.session_id.as_deref(), Some("s-1"));
        assert_eq!(metadata.documents.len(), 2);
        assert_eq!(metadata.documents[0].page, Some(3));
        assert_eq!(metadata.documents[0].score, Some(0.5));
        assert_eq!(metadata.documents[0].content, "");
        assert_eq!(metadata.documents[1].id, "b");
        assert_eq!(metadata.documents[1].page, None);
    }

    #[test]
    fn test_null_citations_keep_structured_tier() {
        let payload =
            r#"{"code":0,"data":{"answer":"Par","status":"running","session_id":"s-2","quoted_documents":null}}"#;
        let (tier, found) = decode_payload(payload).unwrap();
        assert_eq!(tier, "structured");
        assert_eq!(found.fragment, Fragment::cumulative("Par"));
        assert_eq!(found.session_id.as_deref(), Some("s-2"));
    }

    #[test]
    fn test_flat_answer() {
        let mut decoder = RetrievalStreamDecoder::new();
        assert_eq!(
            decoder.decode(r#"{"answer":"flat one"}"#),
            Some(Fragment::cumulative("flat one"))
        );
    }

    #[test]
    fn test_finished_sentinel_variants() {
        for payload in [
            r#"{"code":0,"data":true}"#,
            r#"{"code": 0, "data": true}"#,
            r#"{"retcode":0,"data":true,"#,
            r#"garbage "data":true garbage"#,
        ] {
            let found = decode_payload(payload).map(|(name, found)| (name, found.fragment));
            assert_eq!(
                found,
                Some(("finished_sentinel", Fragment::finished())),
                "payload: {payload}"
            );
        }
    }

    #[test]
    fn test_sentinel_terminal_inherits_session() {
        let mut decoder = RetrievalStreamDecoder::new();
        decoder.decode(r#"{"code":0,"data":{"answer":"x","session_id":"abc"}}"#);
        let Some(Fragment::Terminal { metadata, .. }) = decoder.decode(r#"{"code":0,"data":true}"#)
        else {
            panic!("expected terminal fragment");
        };
        assert_eq!(metadata.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_answer_pattern_recovers_broken_json() {
        let payload = r#"{"code":0,"data":{"answer":"He said \"hi\"\nthen left","reference":{"#;
        let (tier, found) = decode_payload(payload).unwrap();
        assert_eq!(tier, "answer_pattern");
        assert_eq!(found.fragment, Fragment::cumulative("He said \"hi\"\nthen left"));
    }

    #[test]
    fn test_answer_pattern_with_finished_status() {
        let payload = r#"{"code":0,"data":{"answer":"all","status":"finished", oops}"#;
        let (_, found) = decode_payload(payload).unwrap();
        assert_eq!(
            found.fragment,
            Fragment::Terminal {
                final_text: "all".into(),
                metadata: TerminalMetadata::default()
            }
        );
    }

    #[test]
    fn test_error_envelope() {
        let mut decoder = RetrievalStreamDecoder::new();
        assert_eq!(
            decoder.decode(r#"{"code":102,"message":"Please input your question."}"#),
            Some(Fragment::ProtocolError {
                message: "Please input your question.".into()
            })
        );
        assert_eq!(
            decoder.decode(r#"{"code":500,"data":null}"#),
            Some(Fragment::ProtocolError {
                message: "backend returned code 500".into()
            })
        );
    }

    #[test]
    fn test_empty_running_answer_is_not_a_fragment() {
        let mut decoder = RetrievalStreamDecoder::new();
        assert_eq!(
            decoder.decode(r#"{"code":0,"data":{"answer":"","status":"running"}}"#),
            None
        );
    }

    #[test]
    fn test_unrecognized_payload_is_skipped() {
        let mut decoder = RetrievalStreamDecoder::new();
        assert_eq!(decoder.decode("not json at all"), None);
        assert_eq!(decoder.decode(r#"{"code":0}"#), None);
        assert_eq!(decoder.skipped(), 2);
    }

    #[test]
    fn test_transcript_released_once_answer_arrives() {
        let mut decoder = RetrievalStreamDecoder::new();
        decode_all(&mut decoder, &["not json", r#"{"answer":"a"}"#]);
        assert!(decoder.transcript.is_empty());

        let mut answer = String::new();
        for _ in 0..500 {
            answer.push_str("0123456789");
            let line = format!(r#"data: {{"code":0,"data":{{"answer":"{answer}"}}}}"#);
            decoder.record_line(&line);
            decoder.decode(&line["data: ".len()..]);
        }
        assert!(decoder.transcript.is_empty());
        assert_eq!(decoder.transcript_bytes, 0);
    }

    #[test]
    fn test_transcript_is_capped() {
        let mut decoder = RetrievalStreamDecoder::new();
        let line = "x".repeat(1024);
        for _ in 0..1000 {
            decoder.record_line(&line);
        }
        decoder.record_line(r#"{"answer":"kept"}"#);

        assert!(decoder.transcript_bytes <= TRANSCRIPT_LIMIT);
        let Some(Fragment::Terminal { final_text, .. }) = decoder.finish() else {
            panic!("expected terminal fragment");
        };
        assert_eq!(final_text, "kept");
    }

    #[test]
    fn test_finish_is_silent_after_progress() {
        let mut decoder = RetrievalStreamDecoder::new();
        decode_all(&mut decoder, &[r#"{"answer":"a"}"#]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_finish_recovers_multiline_json() {
        let mut decoder = RetrievalStreamDecoder::new();
        let lines = [
            "{",
            r#"  "code": 0,"#,
            r#"  "data": {"answer": "spread over lines", "status": "running"}"#,
            "}",
        ];
        // only the first two unprefixed lines reach the decoder
        for line in lines {
            decoder.record_line(line);
        }
        assert!(decoder.decode(lines[0]).is_none());
        assert!(decoder.decode(lines[1]).is_none());

        let Some(Fragment::Terminal { final_text, .. }) = decoder.finish() else {
            panic!("expected terminal fragment");
        };
        assert_eq!(final_text, "spread over lines");
    }

    #[test]
    fn test_finish_falls_back_to_apology() {
        let mut decoder = RetrievalStreamDecoder::new();
        decode_all(&mut decoder, &["not json at all"]);
        assert_eq!(
            decoder.finish(),
            Some(Fragment::Terminal {
                final_text: FALLBACK_ANSWER.into(),
                metadata: TerminalMetadata::default()
            })
        );
    }

    #[test]
    fn test_recover_answer_prefers_latest() {
        let transcript = "{\"answer\":\"one\"}\n{\"data\":{\"answer\":\"one two\"}}";
        assert_eq!(recover_answer(transcript).as_deref(), Some("one two"));
        assert_eq!(recover_answer("nothing here"), None);
        assert_eq!(
            recover_answer(r#"prefix "answer": "bare" suffix"#).as_deref(),
            Some("bare")
        );
    }

    #[test]
    fn test_decode_body_envelope_without_status() {
        let mut decoder = RetrievalStreamDecoder::new();
        let body = r#"{"code":0,"data":{"answer":"whole answer","session_id":"s","quoted_documents":[{"id":"1","file_name":"a.txt","file_type":"txt","content":"c"}]}}"#;
        let Fragment::Terminal {
            final_text,
            metadata,
        } = decoder.decode_body(body)
        else {
            panic!("expected terminal fragment");
        };
        assert_eq!(final_text, "whole answer");
        assert_eq!(metadata.documents.len(), 1);
        assert_eq!(metadata.session_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_decode_body_flat_and_garbage() {
        let mut decoder = RetrievalStreamDecoder::new();
        assert_eq!(
            decoder.decode_body(r#"{"answer":"flat"}"#),
            Fragment::Terminal {
                final_text: "flat".into(),
                metadata: TerminalMetadata::default()
            }
        );
        assert_eq!(
            RetrievalStreamDecoder::new().decode_body("<html></html>"),
            Fragment::Terminal {
                final_text: FALLBACK_ANSWER.into(),
                metadata: TerminalMetadata::default()
            }
        );
    }
}
