//! Folding stream chunks into one response.

use crate::types::{Candidate, Content, GenerateContentResponse, Part, Role, SafetyRating};

fn merge_parts(into: &mut Vec<Part>, incoming: &[Part]) {
    for part in incoming {
        match (into.last_mut(), part) {
            (Some(Part::Text(acc)), Part::Text(t)) => acc.push_str(t),
            _ => into.push(part.clone()),
        }
    }
}

fn merge_ratings(into: &mut Vec<SafetyRating>, incoming: &[SafetyRating]) {
    for rating in incoming {
        match into.iter_mut().find(|r| r.category == rating.category) {
            Some(existing) => {
                existing.probability = rating.probability;
                existing.blocked = match (existing.blocked, rating.blocked) {
                    (None, None) => None,
                    (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
                };
            }
            None => into.push(rating.clone()),
        }
    }
}

fn merge_candidate(acc: &mut Candidate, chunk: &Candidate) {
    if let Some(content) = &chunk.content {
        let target = acc.content.get_or_insert_with(|| Content {
            role: content.role.or(Some(Role::Model)),
            parts: Vec::new(),
        });
        if target.role.is_none() {
            target.role = content.role;
        }
        merge_parts(&mut target.parts, &content.parts);
    }
    if chunk.finish_reason.is_some() {
        acc.finish_reason = chunk.finish_reason;
    }
    if chunk.token_count.is_some() {
        acc.token_count = chunk.token_count;
    }
    merge_ratings(&mut acc.safety_ratings, &chunk.safety_ratings);
    if let Some(citations) = &chunk.citation_metadata {
        if !citations.citation_sources.is_empty() {
            acc.citation_metadata = Some(citations.clone());
        }
    }
}

/// Fold `chunk` into `acc`.
///
/// Candidates are matched by index. Text concatenates into the trailing text part and other
/// parts append. Finish reason, token count and citations keep the last non-empty value;
/// safety ratings merge by category with `blocked` ORed. Prompt feedback keeps the first
/// non-empty value, usage the last.
pub(crate) fn accumulate(acc: &mut GenerateContentResponse, chunk: &GenerateContentResponse) {
    for candidate in &chunk.candidates {
        let index = candidate.index();
        match acc.candidates.iter_mut().find(|c| c.index() == index) {
            Some(existing) => merge_candidate(existing, candidate),
            None => {
                let mut fresh = Candidate {
                    index: Some(index),
                    ..Default::default()
                };
                merge_candidate(&mut fresh, candidate);
                acc.candidates.push(fresh);
            }
        }
    }
    let acc_feedback_empty = acc.prompt_feedback.as_ref().map_or(true, |f| f.is_empty());
    if acc_feedback_empty {
        if let Some(feedback) = chunk.prompt_feedback.as_ref().filter(|f| !f.is_empty()) {
            acc.prompt_feedback = Some(feedback.clone());
        }
    }
    if chunk.usage_metadata.is_some() {
        acc.usage_metadata = chunk.usage_metadata.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, HarmCategory, HarmProbability};
    use serde_json::json;

    fn chunk(v: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_text_concatenates() {
        let mut acc = GenerateContentResponse::default();
        accumulate(&mut acc, &chunk(json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [{"text": "Hello "}]}}]})));
        accumulate(&mut acc, &chunk(json!({"candidates": [{"index": 0, "content": {"parts": [{"text": "world!"}]}, "finishReason": "STOP"}]})));
        assert_eq!(acc.candidates.len(), 1);
        assert_eq!(acc.candidates[0].parts(), &[Part::text("Hello world!")]);
        assert_eq!(acc.candidates[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(acc.candidates[0].content.as_ref().unwrap().role, Some(Role::Model));
    }

    #[test]
    fn test_non_text_parts_append() {
        let mut acc = GenerateContentResponse::default();
        accumulate(&mut acc, &chunk(json!({"candidates": [{"content": {"parts": [{"text": "a"}]}}]})));
        accumulate(&mut acc, &chunk(json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "f", "args": {}}}]}}]})));
        accumulate(&mut acc, &chunk(json!({"candidates": [{"content": {"parts": [{"text": "b"}]}}]})));
        assert_eq!(acc.candidates[0].parts().len(), 3);
    }

    #[test]
    fn test_candidates_matched_by_index() {
        let mut acc = GenerateContentResponse::default();
        accumulate(&mut acc, &chunk(json!({"candidates": [
            {"index": 0, "content": {"parts": [{"text": "x"}]}},
            {"index": 1, "content": {"parts": [{"text": "y"}]}}
        ]})));
        accumulate(&mut acc, &chunk(json!({"candidates": [
            {"index": 1, "content": {"parts": [{"text": "y"}]}}
        ]})));
        assert_eq!(acc.candidates.len(), 2);
        assert_eq!(acc.candidates[1].parts(), &[Part::text("yy")]);
    }

    #[test]
    fn test_ratings_merge_and_blocked_ors() {
        let mut acc = GenerateContentResponse::default();
        accumulate(&mut acc, &chunk(json!({"candidates": [{"safetyRatings": [
            {"category": "HARM_CATEGORY_HARASSMENT", "probability": "LOW", "blocked": true}
        ]}]})));
        accumulate(&mut acc, &chunk(json!({"candidates": [{"safetyRatings": [
            {"category": "HARM_CATEGORY_HARASSMENT", "probability": "NEGLIGIBLE", "blocked": false},
            {"category": "HARM_CATEGORY_HATE_SPEECH", "probability": "NEGLIGIBLE"}
        ]}]})));
        let ratings = &acc.candidates[0].safety_ratings;
        assert_eq!(ratings.len(), 2);
        assert_eq!(ratings[0].category, HarmCategory::Harassment);
        assert_eq!(ratings[0].probability, HarmProbability::Negligible);
        assert_eq!(ratings[0].blocked, Some(true));
    }

    #[test]
    fn test_feedback_first_usage_last() {
        let mut acc = GenerateContentResponse::default();
        accumulate(&mut acc, &chunk(json!({"promptFeedback": {"safetyRatings": [
            {"category": "HARM_CATEGORY_HARASSMENT", "probability": "LOW"}
        ]}, "usageMetadata": {"totalTokenCount": 3}})));
        accumulate(&mut acc, &chunk(json!({"promptFeedback": {"blockReason": "OTHER"},
            "usageMetadata": {"totalTokenCount": 9}})));
        assert!(acc.prompt_feedback.as_ref().unwrap().block_reason.is_none());
        assert_eq!(acc.usage_metadata.unwrap().total_token_count, 9);
    }
}
