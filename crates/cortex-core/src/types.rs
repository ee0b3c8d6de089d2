use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, time-sortable external identifier (UUIDv7), used for entities that
/// are referenced across process boundaries but never joined on in SQL the
/// way a message or fact row is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub String);

impl ExternalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for ExternalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `role` of a stored message (spec §3, Message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// A single immutable turn in a conversation (spec §3, Message).
/// Deleted only via `delete_conversation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
    pub model_used: Option<String>,
    pub token_count: Option<u32>,
}

/// A conversation thread (spec §3, Conversation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub created_at: String,
    pub title: String,
    pub message_count: u32,
}

/// Privacy/visibility scope of a stored [`Fact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    General,
    Project,
    Style,
    /// Requires the Privacy Lock to be unlocked to read or write.
    Shadow,
    /// Requires the Privacy Lock to be unlocked to read or write.
    Vault,
}

impl FactCategory {
    /// Categories gated by the Privacy Lock (spec §3 invariant, §4.7).
    pub fn is_protected(&self) -> bool {
        matches!(self, FactCategory::Shadow | FactCategory::Vault)
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactCategory::General => "general",
            FactCategory::Project => "project",
            FactCategory::Style => "style",
            FactCategory::Shadow => "shadow",
            FactCategory::Vault => "vault",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FactCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "project" => Ok(Self::Project),
            "style" => Ok(Self::Style),
            "shadow" => Ok(Self::Shadow),
            "vault" => Ok(Self::Vault),
            other => Err(format!("unknown fact category: {other}")),
        }
    }
}

/// A durable fact extracted from conversation or set by the user (spec §3, Fact).
///
/// Embedding dimensionality always equals the Embedding Service's configured
/// `dim`; this is enforced at the Memory Store boundary, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub content: String,
    pub category: FactCategory,
    pub embedding: Vec<f32>,
    pub confidence: f32,
    pub created_at: String,
    pub last_used: Option<String>,
    pub usage_count: u32,
    pub positive_outcomes: u32,
    pub negative_outcomes: u32,
}

/// A compacted prefix of a conversation's message history (spec §3, ConversationSummary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    pub summary_text: String,
    pub messages_covered_from: i64,
    pub messages_covered_to: i64,
    pub created_at: String,
}

/// Category of a user correction, used to steer [`CorrectionEntry`] lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionCategory {
    Misunderstanding,
    Content,
    Style,
    Other,
}

impl fmt::Display for CorrectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CorrectionCategory::Misunderstanding => "misunderstanding",
            CorrectionCategory::Content => "content",
            CorrectionCategory::Style => "style",
            CorrectionCategory::Other => "other",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CorrectionCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "misunderstanding" => Ok(Self::Misunderstanding),
            "content" => Ok(Self::Content),
            "style" => Ok(Self::Style),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown correction category: {other}")),
        }
    }
}

/// A logged correction — Error Memory's unit of record (spec §3, CorrectionEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub id: i64,
    pub original_message_id: i64,
    pub correction_message_id: i64,
    pub original_response: String,
    pub user_correction: String,
    pub category: CorrectionCategory,
    pub embedding: Vec<f32>,
    pub occurrences: u32,
    pub created_at: String,
    pub last_used: Option<String>,
}

/// Intent classification produced by the Semantic Router (spec §3, RouteDecision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentCategory {
    Quick,
    Reasoning,
    Code,
    Creative,
    Vision,
}

impl IntentCategory {
    /// All categories in lexicographic order by name — used for the router's
    /// documented tie-break rule.
    pub const ALL: [IntentCategory; 5] = [
        IntentCategory::Code,
        IntentCategory::Creative,
        IntentCategory::Quick,
        IntentCategory::Reasoning,
        IntentCategory::Vision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Quick => "QUICK",
            IntentCategory::Reasoning => "REASONING",
            IntentCategory::Code => "CODE",
            IntentCategory::Creative => "CREATIVE",
            IntentCategory::Vision => "VISION",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntentCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUICK" => Ok(Self::Quick),
            "REASONING" => Ok(Self::Reasoning),
            "CODE" => Ok(Self::Code),
            "CREATIVE" => Ok(Self::Creative),
            "VISION" => Ok(Self::Vision),
            other => Err(format!("unknown intent category: {other}")),
        }
    }
}

/// Which concrete model role a request should be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Small,
    Large,
    Vision,
    /// Not a generation role — used only by the Embedding Service / Resolver.
    Embedding,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelRole::Small => "small",
            ModelRole::Large => "large",
            ModelRole::Vision => "vision",
            ModelRole::Embedding => "embedding",
        };
        f.write_str(s)
    }
}

/// Coarse quality/latency dial selected per request (spec GLOSSARY, "Thinking mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    Fast,
    Standard,
    Deep,
}

impl fmt::Display for ThinkingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThinkingMode::Fast => "fast",
            ThinkingMode::Standard => "standard",
            ThinkingMode::Deep => "deep",
        };
        f.write_str(s)
    }
}

/// Output of the Semantic Router — forwarded unchanged to the Context Primer
/// (spec §3, RouteDecision: "produced once per request... no second routing").
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub category: IntentCategory,
    pub model_role: ModelRole,
    pub thinking_mode: ThinkingMode,
    pub system_prompt_fragment: Option<String>,
    pub confidence: f32,
}

/// A single primed memory handed to the Conductor as a system note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimedMemory {
    pub content: String,
    pub category: FactCategory,
    pub confidence: f32,
}

/// Result of Context Primer's `prime()` call (spec §3, PrimedContext).
#[derive(Debug, Clone)]
pub struct PrimedContext {
    pub category: IntentCategory,
    pub memories: Vec<PrimedMemory>,
    pub success_patterns: Vec<String>,
    pub tool_hints: Vec<String>,
    pub instructions_fragment: String,
    pub prime_time_ms: u64,
    pub from_cache: bool,
}

/// Post-request record used to compute aggregate IQ/Empathy metrics
/// (spec §3, InteractionOutcome).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionOutcome {
    pub message_id: i64,
    pub category: IntentCategory,
    pub was_correction: bool,
    pub implicit_positive: bool,
    pub implicit_negative: bool,
    pub facts_in_context: u32,
    pub style_prompt_length: u32,
    pub confidence_score: f32,
    pub latency_ms: u64,
    pub tokens_generated: u32,
}

/// Request admission priority (spec §3, Slot / §4.11 Slot Manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPriority {
    User,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Normal,
    Brief,
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verbosity::Normal => "normal",
            Verbosity::Brief => "brief",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Verbosity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "brief" => Ok(Self::Brief),
            other => Err(format!("unknown verbosity: {other}")),
        }
    }
}

/// Verbosity preference read by the Semantic Router (spec §4.4).
///
/// Multi-tenant user management is a non-goal; this is the single row of
/// preference the one local user can set, not an accounts system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: String,
    pub verbosity: Verbosity,
    pub created_at: String,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            display_name: "user".to_string(),
            verbosity: Verbosity::Normal,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A working pattern distilled from past successful interactions, prefetched
/// by the Context Primer and read by the Self-Reflection Builder (spec §4.5,
/// §4.8; persisted table `success_patterns`, SPEC_FULL §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessPattern {
    pub id: i64,
    pub category: IntentCategory,
    pub pattern_text: String,
    pub effectiveness_score: f32,
    pub usage_count: u32,
    pub created_at: String,
}

/// Qualitative bucketing of the Conductor's post-generation confidence score
/// (spec §4.10 "Confidence score").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: f32) -> Self {
        if score > 0.75 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        };
        f.write_str(s)
    }
}

/// Action a CHECK-stage verdict from the small model can request (spec
/// §4.10 "Verdict protocol").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictAction {
    Continue,
    Steer,
    Stop,
    Regenerate,
}

impl fmt::Display for VerdictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictAction::Continue => "continue",
            VerdictAction::Steer => "steer",
            VerdictAction::Stop => "stop",
            VerdictAction::Regenerate => "regenerate",
        };
        f.write_str(s)
    }
}

/// Parsed (or defaulted) output of a small-model CHECK call (spec §4.10).
/// Parsing never fails outward: an unparseable verdict degrades to
/// `{action: Continue, reason: "unparseable", steering_note: None}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub action: VerdictAction,
    pub reason: String,
    pub steering_note: Option<String>,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            action: VerdictAction::Continue,
            reason: "unparseable".to_string(),
            steering_note: None,
        }
    }
}

/// One named sub-score of an aggregate metric (spec §4.12 IQ/Empathy
/// weightings), reported verbatim by `get_metrics()` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBreakdown {
    pub name: String,
    pub weight: f32,
    pub value: f32,
}

/// A single daily aggregate metric (IQ or Empathy) with its weighted
/// sub-scores (spec §4.12, persisted table `daily_metrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricScore {
    pub score: f32,
    pub breakdown: Vec<MetricBreakdown>,
}

/// `get_metrics()` facade response (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub iq: MetricScore,
    pub empathy: MetricScore,
}
