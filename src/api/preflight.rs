//! Rule-based clarification questions for an idea before it is submitted
//!
//! Questions and answers are i18n keys; the client renders the text.

use serde::{Deserialize, Serialize};

const DETAIL_MIN_CHARS: usize = 50;
const USER_KEYWORDS: &[&str] = &["user", "customer", "client", "audience", "people", "for"];
const PROBLEM_KEYWORDS: &[&str] = &["problem", "issue", "challenge", "pain", "solve", "fix"];
const VAGUE_KEYWORDS: &[&str] = &["platform", "system", "ecosystem", "framework", "infrastructure"];

#[derive(Debug, Deserialize)]
pub struct PreflightRequest {
    pub idea_text: String,
    #[serde(default = "default_preset")]
    pub preset_id: String,
}

fn default_preset() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreflightQuestion {
    pub id: &'static str,
    pub question: &'static str,
    pub required: bool,
    pub default_answers: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct PreflightResponse {
    pub preflight_id: String,
    pub ready: bool,
    pub questions: Vec<PreflightQuestion>,
}

impl PreflightResponse {
    pub fn new(preflight_id: String, questions: Vec<PreflightQuestion>) -> Self {
        Self {
            preflight_id,
            ready: questions.is_empty(),
            questions,
        }
    }
}

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Questions to ask before running `idea_text`, in a fixed order
pub fn clarification_questions(idea_text: &str) -> Vec<PreflightQuestion> {
    let lower = idea_text.to_lowercase();
    let mut questions = Vec::new();

    if idea_text.chars().count() < DETAIL_MIN_CHARS {
        questions.push(PreflightQuestion {
            id: "q_detail",
            question: "questions.detail.question",
            required: true,
            default_answers: vec![
                "questions.detail.answers.addContext",
                "questions.detail.answers.provideExamples",
            ],
        });
    }

    if !mentions_any(&lower, USER_KEYWORDS) {
        questions.push(PreflightQuestion {
            id: "q_target_user",
            question: "questions.targetUser.question",
            required: true,
            default_answers: vec![
                "questions.targetUser.answers.productManager",
                "questions.targetUser.answers.soloFounder",
                "questions.targetUser.answers.techLead",
            ],
        });
    }

    if !mentions_any(&lower, PROBLEM_KEYWORDS) {
        questions.push(PreflightQuestion {
            id: "q_problem",
            question: "questions.problem.question",
            required: false,
            default_answers: vec![
                "questions.problem.answers.efficiency",
                "questions.problem.answers.cost",
                "questions.problem.answers.userExperience",
            ],
        });
    }

    if mentions_any(&lower, VAGUE_KEYWORDS) {
        questions.push(PreflightQuestion {
            id: "q_scope",
            question: "questions.scope.question",
            required: true,
            default_answers: vec![
                "questions.scope.answers.mvp",
                "questions.scope.answers.fullProduct",
                "questions.scope.answers.prototype",
            ],
        });
    }

    questions
}
