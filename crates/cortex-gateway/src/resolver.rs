use cortex_core::types::ModelRole;

/// Name patterns used to recognize a role in the live loaded-model set
/// (spec §4.3). Patterns are matched case-insensitively as substrings.
#[derive(Debug, Clone)]
pub struct ResolverPatterns {
    pub small: Vec<String>,
    pub embedding: Vec<String>,
}

impl Default for ResolverPatterns {
    fn default() -> Self {
        Self {
            small: vec!["1.5b".to_string(), "1b".to_string(), "mini".to_string()],
            embedding: vec!["embed".to_string(), "bge".to_string(), "nomic".to_string()],
        }
    }
}

/// Documented fallback identifiers returned when no model of a role is
/// loaded (spec §4.3: "the resolver returns a documented default name and
/// signals `NoModelAvailable`").
pub const DEFAULT_SMALL_MODEL: &str = "qwen2.5:1.5b";
pub const DEFAULT_LARGE_MODEL: &str = "qwen2.5:14b";

/// Outcome of resolving an abstract role to a concrete backend identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub model: String,
    /// `false` when no loaded model actually matched and the documented
    /// default was returned instead — callers must treat this as
    /// `NoModelAvailable`.
    pub available: bool,
}

/// Pure function mapping `role` + the live loaded-model list to a concrete
/// model identifier (spec §4.3). Deterministic: identical inputs always
/// yield identical outputs, and resolving roles in any order from the same
/// loaded-model snapshot gives the same per-role results (commutative over
/// role order).
pub fn resolve(role: ModelRole, loaded_models: &[String], patterns: &ResolverPatterns) -> Resolved {
    match role {
        ModelRole::Embedding => {
            let found = loaded_models
                .iter()
                .find(|m| matches_any(m, &patterns.embedding));
            match found {
                Some(m) => Resolved {
                    model: m.clone(),
                    available: true,
                },
                None => Resolved {
                    model: "nomic-embed-text".to_string(),
                    available: false,
                },
            }
        }
        ModelRole::Small => {
            let llms = non_embedding_models(loaded_models, patterns);
            let found = llms
                .iter()
                .find(|m| matches_any(m, &patterns.small))
                .cloned();
            match found {
                Some(model) => Resolved {
                    model,
                    available: true,
                },
                None => Resolved {
                    model: DEFAULT_SMALL_MODEL.to_string(),
                    available: false,
                },
            }
        }
        ModelRole::Large | ModelRole::Vision => {
            let llms = non_embedding_models(loaded_models, patterns);
            // "the smallest-named LLM... wins small; the first remaining
            // LLM wins large" — so large/vision picks the first LLM that
            // is not claimed by the small pattern set.
            let found = llms
                .iter()
                .find(|m| !matches_any(m, &patterns.small))
                .cloned()
                .or_else(|| llms.first().cloned());
            match found {
                Some(model) => Resolved {
                    model,
                    available: true,
                },
                None => Resolved {
                    model: DEFAULT_LARGE_MODEL.to_string(),
                    available: false,
                },
            }
        }
    }
}

fn non_embedding_models(loaded_models: &[String], patterns: &ResolverPatterns) -> Vec<String> {
    loaded_models
        .iter()
        .filter(|m| !matches_any(m, &patterns.embedding))
        .cloned()
        .collect()
}

fn matches_any(name: &str, patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_small_and_large_from_mixed_set() {
        let patterns = ResolverPatterns::default();
        let loaded = models(&["qwen2.5:1.5b", "qwen2.5:14b", "nomic-embed-text"]);

        let small = resolve(ModelRole::Small, &loaded, &patterns);
        assert_eq!(small.model, "qwen2.5:1.5b");
        assert!(small.available);

        let large = resolve(ModelRole::Large, &loaded, &patterns);
        assert_eq!(large.model, "qwen2.5:14b");
        assert!(large.available);

        let embed = resolve(ModelRole::Embedding, &loaded, &patterns);
        assert_eq!(embed.model, "nomic-embed-text");
        assert!(embed.available);
    }

    #[test]
    fn falls_back_to_documented_default_when_empty() {
        let patterns = ResolverPatterns::default();
        let resolved = resolve(ModelRole::Small, &[], &patterns);
        assert!(!resolved.available);
        assert_eq!(resolved.model, DEFAULT_SMALL_MODEL);
    }

    #[test]
    fn is_deterministic_and_order_independent() {
        let patterns = ResolverPatterns::default();
        let loaded = models(&["qwen2.5:14b", "qwen2.5:1.5b"]);
        let a = resolve(ModelRole::Large, &loaded, &patterns);
        let b = resolve(ModelRole::Large, &loaded, &patterns);
        assert_eq!(a, b);

        let small_first = resolve(ModelRole::Small, &loaded, &patterns);
        let large_first = resolve(ModelRole::Large, &loaded, &patterns);
        assert_eq!(small_first.model, "qwen2.5:1.5b");
        assert_eq!(large_first.model, "qwen2.5:14b");
    }
}
