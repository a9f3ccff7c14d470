//! Question Types
//!
//! `Question` is the authored form including answer keys; `QuestionView` is
//! what participants receive. Correctness flags are not merely hidden but
//! absent from the view type.

use serde::{Deserialize, Serialize};

use super::QuestionId;

/// Kind of answer a question accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    MultipleChoice,
    MultiSelect,
    FreeText,
    Numeric,
}

/// One selectable option, as authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    pub option_id: String,
    pub text: String,
    pub is_correct: bool,
}

/// A question as stored inside a quiz document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question_id: QuestionId,
    #[serde(default)]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Seconds participants have to answer.
    pub time_limit_secs: u32,
    /// Base points for a correct answer.
    pub points: u32,
}

/// One selectable option, stripped for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOptionView {
    pub option_id: String,
    pub text: String,
}

/// A question as broadcast to participants. Carries no answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub question_id: QuestionId,
    #[serde(default)]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOptionView>,
    pub time_limit_secs: u32,
    pub points: u32,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            question_id: q.question_id.clone(),
            kind: q.kind,
            prompt: q.prompt.clone(),
            options: q
                .options
                .iter()
                .map(|o| QuestionOptionView {
                    option_id: o.option_id.clone(),
                    text: o.text.clone(),
                })
                .collect(),
            time_limit_secs: q.time_limit_secs,
            points: q.points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_question() -> Question {
        Question {
            question_id: QuestionId::new("q1"),
            kind: QuestionKind::MultipleChoice,
            prompt: "Largest planet?".into(),
            options: vec![
                QuestionOption {
                    option_id: "a".into(),
                    text: "Jupiter".into(),
                    is_correct: true,
                },
                QuestionOption {
                    option_id: "b".into(),
                    text: "Mars".into(),
                    is_correct: false,
                },
            ],
            time_limit_secs: 20,
            points: 100,
        }
    }

    #[test]
    fn view_drops_correctness_entirely() {
        let view = QuestionView::from(&sample_question());
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("isCorrect"));
        assert!(!json.contains("is_correct"));
        assert_eq!(view.options.len(), 2);
        assert_eq!(view.options[0].text, "Jupiter");
    }

    #[test]
    fn authored_question_round_trips() {
        let q = sample_question();
        let json = serde_json::to_string(&q).unwrap();
        let back: Question = serde_json::from_str(&json).unwrap();
        assert_eq!(back.question_id, q.question_id);
        assert!(back.options[0].is_correct);
    }
}
