/// Hedging phrases that penalize the confidence score when present in the
/// visible output (spec §4.10 "Confidence score": "presence of hedging
/// phrases... (penalty)").
const HEDGE_PHRASES: &[&str] = &[
    "i'm not sure",
    "i am not sure",
    "i think",
    "might be",
    "could be wrong",
    "not certain",
    "i believe",
    "possibly",
    "perhaps",
    "it's unclear",
];

/// Words in a CHECK verdict's `reason` that read as negative/uncertain vs.
/// positive/confident, feeding the "minor term" of the confidence formula.
const NEGATIVE_SENTIMENT_WORDS: &[&str] = &["drift", "hallucinat", "wrong", "confus", "off topic", "uncertain"];
const POSITIVE_SENTIMENT_WORDS: &[&str] = &["complete", "accurate", "on topic", "correct", "confident"];

/// Average token logprob of the visible output, normalized into `[0, 1]`
/// under the assumption that logprobs rarely fall below `-5.0` in practice;
/// values outside that range are clamped, not rejected.
pub fn normalize_logprob(mean_logprob: f32) -> f32 {
    const FLOOR: f32 = -5.0;
    ((mean_logprob - FLOOR) / -FLOOR).clamp(0.0, 1.0)
}

/// Fraction of [`HEDGE_PHRASES`] present in `visible_text`, capped at 1.0 —
/// a coarse proxy for "the model is hedging" with no NLP dependency.
pub fn hedge_penalty(visible_text: &str) -> f32 {
    let lower = visible_text.to_lowercase();
    let hits = HEDGE_PHRASES.iter().filter(|p| lower.contains(*p)).count();
    (hits as f32 / 3.0).clamp(0.0, 1.0)
}

/// `+1.0` if the last CHECK verdict's `reason` reads positive, `-1.0` if
/// negative, `0.0` if neutral/absent — the "minor term" in the confidence
/// formula (spec §4.10, Open Question 1 resolved in `DESIGN.md`).
pub fn verdict_sentiment(reason: &str) -> f32 {
    let lower = reason.to_lowercase();
    let negative = NEGATIVE_SENTIMENT_WORDS.iter().any(|w| lower.contains(w));
    let positive = POSITIVE_SENTIMENT_WORDS.iter().any(|w| lower.contains(w));
    match (positive, negative) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}

/// Post-DONE confidence score (spec §4.10, Open Question 1): `0.6 *
/// normalized_logprob + 0.3 * (1 - hedge_penalty) + 0.1 * verdict_sentiment`,
/// clamped to `[0, 1]`. `verdict_sentiment` is mapped from `[-1, 1]` into
/// `[0, 1]` before weighting so a negative sentiment can only pull the score
/// down, never below the other two terms' floor.
pub fn confidence_score(mean_logprob: f32, visible_text: &str, last_verdict_reason: &str) -> f32 {
    let logprob_term = normalize_logprob(mean_logprob);
    let hedge_term = 1.0 - hedge_penalty(visible_text);
    let sentiment_term = (verdict_sentiment(last_verdict_reason) + 1.0) / 2.0;

    (0.6 * logprob_term + 0.3 * hedge_term + 0.1 * sentiment_term).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::types::ConfidenceLevel;

    #[test]
    fn high_logprob_and_no_hedging_yields_high_confidence() {
        let score = confidence_score(-0.2, "The answer is 42.", "answer complete");
        assert_eq!(ConfidenceLevel::from_score(score), ConfidenceLevel::High);
    }

    #[test]
    fn hedging_language_pulls_score_down() {
        let score = confidence_score(-0.2, "I'm not sure, but perhaps it's 42, I think.", "drifted off topic");
        assert!(ConfidenceLevel::from_score(score) != ConfidenceLevel::High);
    }

    #[test]
    fn low_logprob_dominates_the_score() {
        let score = confidence_score(-8.0, "The answer is 42.", "");
        assert_eq!(ConfidenceLevel::from_score(score), ConfidenceLevel::Low);
    }

    #[test]
    fn score_is_always_within_bounds() {
        for logprob in [-20.0, -5.0, -1.0, 0.0] {
            let score = confidence_score(logprob, "maybe, possibly, i think, not certain", "hallucinated a fact");
            assert!((0.0..=1.0).contains(&score));
        }
    }
}
