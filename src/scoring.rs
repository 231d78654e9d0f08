/// Choice index a client submits when its timer ran out or nothing was picked.
pub const NO_ANSWER: i64 = -1;

/// Points awarded for a correct answer and deducted otherwise.
pub const POINTS: i64 = 10;

/// Outcome of scoring one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub delta: i64,
    pub correct: bool,
}

/// Score a submitted choice against the correct option index.
///
/// `NO_ANSWER` and any wrong option both cost `POINTS`. Range checking is
/// the caller's job (see [`is_valid_choice`]).
pub fn score(submitted: i64, correct_index: usize) -> Score {
    if submitted == NO_ANSWER {
        return Score {
            delta: -POINTS,
            correct: false,
        };
    }

    let correct = usize::try_from(submitted).is_ok_and(|s| s == correct_index);
    Score {
        delta: if correct { POINTS } else { -POINTS },
        correct,
    }
}

/// True when `choice` is `NO_ANSWER` or a valid option index.
pub fn is_valid_choice(choice: i64, option_count: usize) -> bool {
    choice >= NO_ANSWER && choice < option_count as i64
}
