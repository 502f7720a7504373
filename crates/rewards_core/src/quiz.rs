//! crates/rewards_core/src/quiz.rs
//!
//! Stateless quiz scoring and personality trait selection.

use std::collections::HashMap;

use crate::domain::Question;
use crate::error::{LedgerError, LedgerResult};

/// The result of grading a scored quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizScore {
    pub correct: usize,
    pub total: usize,
    /// Percentage in `0..=100`, rounded down.
    pub score: u32,
}

impl QuizScore {
    pub fn passed(&self, threshold: u32) -> bool {
        self.score >= threshold
    }
}

/// Grades `selections` (question index to chosen option string) against the
/// correct answers. Unanswered questions, and questions without a designated
/// answer, count as incorrect.
pub fn score_answers(
    questions: &[Question],
    selections: &HashMap<usize, String>,
) -> LedgerResult<QuizScore> {
    if questions.is_empty() {
        return Err(LedgerError::EmptyQuiz);
    }

    let correct = questions
        .iter()
        .enumerate()
        .filter(|(index, q)| match (selections.get(index), &q.answer) {
            (Some(selected), Some(answer)) => selected == answer,
            _ => false,
        })
        .count();
    let total = questions.len();
    let score = u32::try_from(correct * 100 / total).unwrap_or(100);

    Ok(QuizScore {
        correct,
        total,
        score,
    })
}

/// Resolves selected option strings to their option index, in question order.
/// Selections that are not among a question's options are skipped.
pub fn option_indices(questions: &[Question], selections: &HashMap<usize, String>) -> Vec<usize> {
    questions
        .iter()
        .enumerate()
        .filter_map(|(index, q)| {
            let selected = selections.get(&index)?;
            q.options.iter().position(|option| option == selected)
        })
        .collect()
}

/// Picks the option index chosen most often across a personality quiz.
///
/// Ties go to the lowest index. An empty selection or a winner outside the
/// trait list falls back to trait 0.
pub fn selected_trait(option_indices: &[usize], trait_count: usize) -> usize {
    let mut tally: HashMap<usize, usize> = HashMap::new();
    for &index in option_indices {
        *tally.entry(index).or_default() += 1;
    }

    let winner = tally
        .into_iter()
        .max_by(|(a_index, a_count), (b_index, b_count)| {
            a_count.cmp(b_count).then_with(|| b_index.cmp(a_index))
        })
        .map(|(index, _)| index)
        .unwrap_or(0);

    if winner < trait_count {
        winner
    } else {
        0
    }
}
