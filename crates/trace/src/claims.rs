//! Sentence-level claim generation (specification §4.4 step 7).
//!
//! Splitting rule (Open Question, decided in `DESIGN.md`): split on `.`,
//! `!`, or `?` followed by whitespace or end-of-string, drop empty trimmed
//! segments, fall back to the whole outcome as one claim when no boundary
//! is found. The specification only requires "any non-empty sequence of
//! splits", so this heuristic is deliberately simple rather than a real
//! sentence tokenizer.

use akashi_core::{DecisionId, Result};
use akashi_embedding::EmbeddingProvider;
use akashi_core::DecisionClaim;

/// Split `text` into trimmed, non-empty sentence-ish segments. Never
/// returns an empty vector for non-empty input — a boundary-free string
/// becomes its own single claim.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let chars: Vec<char> = text.chars().collect();

    for i in 0..chars.len() {
        let is_boundary = matches!(chars[i], '.' | '!' | '?')
            && chars.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(true);
        if is_boundary {
            let segment: String = chars[start..=i].iter().collect();
            push_if_non_empty(&mut sentences, &segment);
            start = i + 1;
        }
    }
    let tail: String = chars[start..].iter().collect();
    push_if_non_empty(&mut sentences, &tail);

    if sentences.is_empty() {
        push_if_non_empty(&mut sentences, text);
    }
    sentences
}

fn push_if_non_empty(sentences: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

/// Build and embed the claim rows for one decision's outcome, in one batch
/// embedding call.
pub fn build_claims(
    decision_id: DecisionId,
    outcome: &str,
    embedder: &dyn EmbeddingProvider,
) -> Result<Vec<DecisionClaim>> {
    let sentences = split_sentences(outcome);
    if sentences.is_empty() {
        return Ok(Vec::new());
    }
    let refs: Vec<&str> = sentences.iter().map(String::as_str).collect();
    let embeddings = embedder.embed_batch(&refs)?;

    Ok(sentences
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(idx, (claim_text, embedding))| DecisionClaim {
            decision_id,
            claim_idx: idx as i32,
            claim_text,
            embedding,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_boundaries() {
        let sentences = split_sentences("Chose Redis. It was faster! Why though?");
        assert_eq!(sentences, vec!["Chose Redis.", "It was faster!", "Why though?"]);
    }

    #[test]
    fn falls_back_to_whole_text_when_no_boundary() {
        let sentences = split_sentences("no punctuation here");
        assert_eq!(sentences, vec!["no punctuation here"]);
    }

    #[test]
    fn drops_empty_segments_from_repeated_punctuation() {
        let sentences = split_sentences("Done.. Next.");
        assert_eq!(sentences, vec!["Done..", "Next."]);
    }

    #[test]
    fn empty_input_produces_no_claims() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
    }

    struct FixedProvider;
    impl EmbeddingProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 2.0])
        }
    }

    #[test]
    fn build_claims_assigns_sequential_indices() {
        let claims = build_claims(DecisionId::new(), "First. Second.", &FixedProvider).unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].claim_idx, 0);
        assert_eq!(claims[1].claim_idx, 1);
        assert_eq!(claims[0].embedding, vec![1.0, 2.0]);
    }
}
