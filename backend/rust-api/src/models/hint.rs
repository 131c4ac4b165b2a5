use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestHintRequest {
    pub question_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HintReveal {
    pub question_id: String,
    pub hint_text: String,
    pub hints_used: u32,
    pub hints_remaining: u32,
    /// Points this hint will cost at finalize time
    pub penalty_points: u32,
}

/// Hints revealed for one question; `revealed` is always a prefix of the authored list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HintUsage {
    pub question_id: String,
    pub used: u32,
    pub revealed: Vec<String>,
}
