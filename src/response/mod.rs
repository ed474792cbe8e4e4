//! Response wrappers: [`GenerationResponse`] for unary calls and single stream chunks,
//! [`StreamingResponse`] for server-streaming calls.

mod aggregate;
mod stream;

pub(crate) use aggregate::accumulate;
pub use stream::StreamingResponse;

use crate::types::{
    Candidate, Content, FunctionCall, GenerateContentResponse, Part, PromptFeedback,
    UsageMetadata,
};
use crate::{Error, Result};

/// A complete `generateContent` response with quick accessors.
///
/// A blocked prompt is recorded rather than raised: [`candidates`](Self::candidates) still
/// returns the (empty) list while [`text`](Self::text) and [`parts`](Self::parts) fail with
/// [`Error::BlockedPrompt`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    raw: GenerateContentResponse,
}

impl GenerationResponse {
    pub fn from_raw(raw: GenerateContentResponse) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &GenerateContentResponse {
        &self.raw
    }

    pub fn into_raw(self) -> GenerateContentResponse {
        self.raw
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.raw.candidates
    }

    pub fn prompt_feedback(&self) -> Option<&PromptFeedback> {
        self.raw.prompt_feedback.as_ref()
    }

    pub fn usage_metadata(&self) -> Option<&UsageMetadata> {
        self.raw.usage_metadata.as_ref()
    }

    /// The failure recorded on this response, if any.
    pub fn error(&self) -> Option<Error> {
        match &self.raw.prompt_feedback {
            Some(feedback) if feedback.is_blocked() => Some(Error::BlockedPrompt {
                feedback: feedback.clone(),
            }),
            _ => None,
        }
    }

    fn sole_candidate(&self) -> Result<&Candidate> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        match self.raw.candidates.as_slice() {
            [one] => Ok(one),
            [] => Err(Error::invalid_input(
                "the response contains no candidates; check `prompt_feedback`",
            )),
            many => Err(Error::invalid_input(format!(
                "the quick accessors need a single candidate, this response has {}; \
                 use `candidates()` instead",
                many.len()
            ))),
        }
    }

    /// Parts of the single candidate.
    pub fn parts(&self) -> Result<&[Part]> {
        let candidate = self.sole_candidate()?;
        let parts = candidate.parts();
        if parts.is_empty() && !candidate.finished_cleanly() {
            return Err(Error::StopCandidate {
                candidate: Box::new(candidate.clone()),
            });
        }
        Ok(parts)
    }

    /// Text of the single candidate. Executable code and its results are rendered as fenced
    /// blocks; any other non-text part is an error.
    pub fn text(&self) -> Result<String> {
        let parts = self.parts()?;
        if parts.is_empty() {
            return Err(Error::invalid_input(
                "the candidate has no parts; check `candidates()[0].finish_reason`",
            ));
        }
        let mut out = String::new();
        for part in parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::ExecutableCode(code) => {
                    let lang = code.language.to_ascii_lowercase();
                    let lang = lang.strip_prefix("language_").unwrap_or(&lang);
                    out.push_str(&format!("\n```{}\n{}\n```\n", lang, code.code));
                }
                Part::CodeExecutionResult(result) => {
                    let output = result.output.as_deref().unwrap_or_default();
                    out.push_str(&format!("\n```\n{}\n```\n", output));
                }
                other => {
                    return Err(Error::invalid_input(format!(
                        "`text()` only supports text parts, found a `{}` part; use `parts()`",
                        other.kind()
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Function calls requested by the single candidate.
    pub fn function_calls(&self) -> Result<Vec<&FunctionCall>> {
        Ok(self
            .parts()?
            .iter()
            .filter_map(Part::as_function_call)
            .collect())
    }

    /// The single candidate's content, as it would be recorded in chat history.
    pub(crate) fn model_content(&self) -> Result<Content> {
        let candidate = self.sole_candidate()?;
        if !candidate.finished_cleanly() {
            return Err(Error::StopCandidate {
                candidate: Box::new(candidate.clone()),
            });
        }
        let mut content = match &candidate.content {
            Some(content) if !content.parts.is_empty() => content.clone(),
            _ => {
                return Err(Error::protocol(format!(
                    "candidate {} finished ({:?}) without any content parts",
                    candidate.index(),
                    candidate.finish_reason
                )))
            }
        };
        content.role = Some(crate::types::Role::Model);
        Ok(content)
    }
}

impl From<GenerateContentResponse> for GenerationResponse {
    fn from(raw: GenerateContentResponse) -> Self {
        Self::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(v: serde_json::Value) -> GenerationResponse {
        GenerationResponse::from_raw(serde_json::from_value(v).unwrap())
    }

    #[test]
    fn test_text_of_single_candidate() {
        let r = response(json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}, "finishReason": "STOP"}]}));
        assert_eq!(r.text().unwrap(), "hi");
    }

    #[test]
    fn test_blocked_prompt_is_recorded() {
        let r = response(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        assert!(r.candidates().is_empty());
        assert!(matches!(r.text().unwrap_err(), Error::BlockedPrompt { .. }));
        assert!(matches!(r.error(), Some(Error::BlockedPrompt { .. })));
    }

    #[test]
    fn test_safety_stop_without_text() {
        let r = response(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        assert!(matches!(r.text().unwrap_err(), Error::StopCandidate { .. }));
    }

    #[test]
    fn test_empty_clean_candidate_has_no_model_content() {
        let r = response(json!({"candidates": [{"index": 0, "finishReason": "STOP"}]}));
        assert!(matches!(
            r.model_content().unwrap_err(),
            Error::Transport(crate::transport::TransportError::Protocol(_))
        ));
        let r = response(json!({"candidates": [{"content": {"role": "model", "parts": []}, "finishReason": "STOP"}]}));
        assert!(r.model_content().is_err());
    }

    #[test]
    fn test_multiple_candidates_need_explicit_access() {
        let r = response(json!({"candidates": [
            {"index": 0, "content": {"parts": [{"text": "a"}]}},
            {"index": 1, "content": {"parts": [{"text": "b"}]}}
        ]}));
        assert!(matches!(r.text().unwrap_err(), Error::InvalidInput { .. }));
        assert_eq!(r.candidates().len(), 2);
    }

    #[test]
    fn test_function_call_part_is_not_text() {
        let r = response(json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": "f", "args": {"x": 1}}}
        ]}}]}));
        assert!(r.text().is_err());
        assert_eq!(r.function_calls().unwrap()[0].name, "f");
    }

    #[test]
    fn test_code_execution_renders_as_fences() {
        let r = response(json!({"candidates": [{"content": {"parts": [
            {"text": "Result:"},
            {"executableCode": {"language": "PYTHON", "code": "print(1)"}},
            {"codeExecutionResult": {"outcome": "OUTCOME_OK", "output": "1"}}
        ]}}]}));
        let text = r.text().unwrap();
        assert!(text.contains("```python\nprint(1)\n```"));
        assert!(text.contains("```\n1\n```"));
    }
}
