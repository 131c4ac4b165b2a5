use serde::{Deserialize, Serialize};

/// Authored scenario metadata used when budgeting a new attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_order: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Step {
    /// A step runs per-question countdowns when any question declares its own limit.
    pub fn is_time_critical(&self) -> bool {
        self.questions
            .iter()
            .any(|q| q.time_limit_seconds.is_some_and(|limit| limit > 0))
    }

    /// Copy of the step restricted to what `role` may see, or `None` if the step is hidden.
    pub fn visible_for(&self, role: &str) -> Option<Step> {
        if !is_visible_for_role(&self.roles, role) {
            return None;
        }
        let questions = self
            .questions
            .iter()
            .filter(|q| is_visible_for_role(&q.roles, role))
            .cloned()
            .collect();
        Some(Step {
            questions,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: u32,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub time_limit_seconds: Option<u32>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub is_critical: bool,
}

impl Question {
    pub fn is_correct(&self, option: u32) -> bool {
        self.correct_option == option
    }
}

/// Question as shown to the learner: no correct option, no hint texts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub hints_available: usize,
    pub time_limit_seconds: Option<u32>,
    pub is_critical: bool,
    pub answered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepView {
    pub index: usize,
    pub step_id: String,
    pub description: String,
    pub time_critical: bool,
    pub questions: Vec<QuestionView>,
    pub question_timers: Vec<super::timer::QuestionTimerState>,
}

/// Maps free-text role names onto the three clinical roles.
pub fn normalize_role(raw: &str) -> String {
    let key: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            other => other,
        })
        .collect();
    if key.contains("medic") {
        "medico".to_string()
    } else if key.contains("enfer") {
        "enfermeria".to_string()
    } else if key.contains("farm") {
        "farmacia".to_string()
    } else {
        String::new()
    }
}

/// Empty role lists are visible to everyone.
pub fn is_visible_for_role(roles: &[String], role: &str) -> bool {
    if roles.is_empty() {
        return true;
    }
    let role = role.to_lowercase();
    roles.iter().any(|r| r.to_lowercase() == role)
}
