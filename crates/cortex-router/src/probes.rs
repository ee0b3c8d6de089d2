use cortex_core::types::IntentCategory;

/// Representative utterances per intent category, embedded once at startup
/// to form the "intent probe" vectors the router compares each query
/// against (spec §4.4). Kept small and hand-picked rather than learned —
/// good enough to separate the five categories without a training step.
pub fn default_probe_phrases() -> Vec<(IntentCategory, Vec<&'static str>)> {
    vec![
        (
            IntentCategory::Quick,
            vec![
                "hi",
                "hello there",
                "thanks",
                "what time is it",
                "good morning",
            ],
        ),
        (
            IntentCategory::Reasoning,
            vec![
                "explain why this happens",
                "walk me through the logic step by step",
                "what are the tradeoffs between these two approaches",
                "help me reason through this problem",
            ],
        ),
        (
            IntentCategory::Code,
            vec![
                "write a function that sorts a list",
                "fix this bug in my rust code",
                "refactor this module",
                "what does this stack trace mean",
            ],
        ),
        (
            IntentCategory::Creative,
            vec![
                "write a short story about the sea",
                "compose a poem about autumn",
                "brainstorm some names for my new project",
            ],
        ),
        (
            IntentCategory::Vision,
            vec![
                "describe this image",
                "what is in this picture",
                "read the text in this screenshot",
            ],
        ),
    ]
}

/// Keyword fallback used when the Embedding Service is unavailable
/// (spec §4.4: "if embedding fails, keyword rules produce a RouteDecision
/// with confidence=0.4").
pub fn keyword_category(query: &str) -> IntentCategory {
    let q = query.to_lowercase();
    let code_kw = ["code", "function", "bug", "error", "rust", "python", "compile"];
    let reasoning_kw = ["why", "explain", "because", "reason", "tradeoff"];
    let creative_kw = ["poem", "story", "write a", "brainstorm", "imagine"];

    if code_kw.iter().any(|k| q.contains(k)) {
        IntentCategory::Code
    } else if reasoning_kw.iter().any(|k| q.contains(k)) {
        IntentCategory::Reasoning
    } else if creative_kw.iter().any(|k| q.contains(k)) {
        IntentCategory::Creative
    } else {
        IntentCategory::Quick
    }
}
