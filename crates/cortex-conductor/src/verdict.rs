use std::sync::OnceLock;

use regex::Regex;

use cortex_core::types::{Verdict, VerdictAction};

/// Parses a small-model CHECK response into a [`Verdict`]. Tries strict JSON
/// first, then a regex fallback that extracts `action`/`reason` from
/// free-form text; any byte string that matches neither degrades to
/// `{action: Continue, reason: "unparseable"}` rather than erroring (spec
/// §4.10 "Verdict protocol", §8 testable property 6 "verdict robustness").
pub fn parse_verdict(raw: &str) -> Verdict {
    if let Some(v) = parse_strict_json(raw) {
        return v;
    }
    if let Some(v) = parse_regex_fallback(raw) {
        return v;
    }
    Verdict::default()
}

fn parse_strict_json(raw: &str) -> Option<Verdict> {
    // The small model often wraps its JSON in prose or a code fence; pull
    // out the first top-level `{...}` span before attempting to parse it.
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &raw[start..=end];
    let value: serde_json::Value = serde_json::from_str(candidate).ok()?;

    let action = value
        .get("action")
        .and_then(|v| v.as_str())
        .and_then(parse_action)?;
    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let steering_note = value
        .get("steering_note")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Some(Verdict {
        action,
        reason,
        steering_note,
    })
}

fn action_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"?action"?\s*[:=]\s*"?(continue|steer|stop|regenerate)"?"#).unwrap()
    })
}

fn reason_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)"?reason"?\s*[:=]\s*"([^"]*)""#).unwrap())
}

fn steering_note_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)"?steering_note"?\s*[:=]\s*"([^"]*)""#).unwrap())
}

fn parse_regex_fallback(raw: &str) -> Option<Verdict> {
    let action = action_regex()
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_action(m.as_str()))?;
    let reason = reason_regex()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    let steering_note = steering_note_regex()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Some(Verdict {
        action,
        reason,
        steering_note,
    })
}

fn parse_action(s: &str) -> Option<VerdictAction> {
    match s.to_ascii_lowercase().as_str() {
        "continue" => Some(VerdictAction::Continue),
        "steer" => Some(VerdictAction::Steer),
        "stop" => Some(VerdictAction::Stop),
        "regenerate" => Some(VerdictAction::Regenerate),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json() {
        let v = parse_verdict(r#"{"action": "steer", "reason": "drifting off topic", "steering_note": "stay on X"}"#);
        assert_eq!(v.action, VerdictAction::Steer);
        assert_eq!(v.reason, "drifting off topic");
        assert_eq!(v.steering_note.as_deref(), Some("stay on X"));
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let v = parse_verdict("Here is my verdict:\n```json\n{\"action\": \"stop\", \"reason\": \"answer complete\"}\n```");
        assert_eq!(v.action, VerdictAction::Stop);
    }

    #[test]
    fn falls_back_to_regex_on_malformed_json() {
        let v = parse_verdict("action: regenerate, reason: \"hallucinated a fact\"");
        assert_eq!(v.action, VerdictAction::Regenerate);
        assert_eq!(v.reason, "hallucinated a fact");
    }

    #[test]
    fn unparseable_input_defaults_to_continue() {
        let v = parse_verdict("the model said something incoherent entirely");
        assert_eq!(v.action, VerdictAction::Continue);
        assert_eq!(v.reason, "unparseable");
    }

    #[test]
    fn empty_input_defaults_to_continue() {
        let v = parse_verdict("");
        assert_eq!(v.action, VerdictAction::Continue);
    }
}
