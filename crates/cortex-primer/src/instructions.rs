use cortex_core::types::IntentCategory;

/// Domain-specific instruction fragment per intent category (spec §4.5
/// "domain-specific instruction fragment (loaded lazily from per-category
/// instruction files)"). Compiled in rather than read from disk at startup —
/// there is no per-deployment customization requirement in scope, and a
/// `const` table keeps priming free of filesystem I/O on the hot path.
pub fn instructions_fragment(category: IntentCategory) -> String {
    let s = match category {
        IntentCategory::Quick => {
            "Answer directly and briefly. Skip preamble and skip restating the question."
        }
        IntentCategory::Reasoning => {
            "Work through the problem step by step before giving a final answer. \
             State assumptions explicitly."
        }
        IntentCategory::Code => {
            "Prefer a minimal working example over an exhaustive explanation. \
             Call out any part of the request that is ambiguous before writing code."
        }
        IntentCategory::Creative => {
            "Favor a distinctive voice over a safe, generic one. Match the length and \
             register the user asked for."
        }
        IntentCategory::Vision => {
            "Describe only what is visibly present in the image; do not guess at content \
             outside the frame."
        }
    };
    s.to_string()
}

/// Tool-hint set per category — the subset of available tools worth
/// surfacing to the model for this kind of request (spec §4.5).
pub fn tool_hints(category: IntentCategory) -> Vec<String> {
    let hints: &[&str] = match category {
        IntentCategory::Quick => &[],
        IntentCategory::Reasoning => &["calculator"],
        IntentCategory::Code => &["code_interpreter", "file_search"],
        IntentCategory::Creative => &[],
        IntentCategory::Vision => &["image_describe"],
    };
    hints.iter().map(|s| s.to_string()).collect()
}
