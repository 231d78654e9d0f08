use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bank::safety::{self, REFUSAL};
use crate::bank::{QuestionBank, Topic};
use crate::scoring::NO_ANSWER;
use crate::store::{Advance, MIXED_TOPIC, SessionQuestion, SessionStore, StoreSettings};

const RULE: &str = "======================================================================";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Empty,
    List,
    Teach(Option<String>),
    Quiz(Option<String>),
    Help,
    Exit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Self::Empty;
        };
        let arg = parts.next().map(str::to_string);
        match head.to_lowercase().as_str() {
            "list" => Self::List,
            "teach" => Self::Teach(arg),
            "quiz" => Self::Quiz(arg),
            "help" => Self::Help,
            "exit" | "quit" | "q" => Self::Exit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Interactive terminal trainer: lessons and quizzes on stdin/stdout.
///
/// Quizzes run through the same session store and scoring as the gateway.
pub struct Trainer<R, W> {
    bank: Arc<QuestionBank>,
    store: SessionStore,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Trainer<R, W> {
    pub fn new(bank: Arc<QuestionBank>, settings: StoreSettings, input: R, output: W) -> Self {
        let store = SessionStore::new(Arc::clone(&bank), settings);
        Self {
            bank,
            store,
            input,
            output,
        }
    }

    /// Read commands until `exit` or end of input.
    pub fn run(&mut self) -> anyhow::Result<()> {
        writeln!(self.output, "{RULE}")?;
        writeln!(self.output, "Phisherman Teacher - Phishing Awareness Training")?;
        writeln!(self.output, "{RULE}")?;
        self.print_topics()?;
        self.print_help()?;

        while let Some(line) = self.prompt("Teacher> ")? {
            if safety::is_harmful_request(&line) {
                warn!(input = %line, "harmful trainer request refused");
                writeln!(self.output, "\nSAFETY REFUSAL: {REFUSAL}")?;
                writeln!(self.output, "Safe commands: list, teach <topic>, quiz, help, exit")?;
                continue;
            }

            info!(command = %line, "trainer command");
            match Command::parse(&line) {
                Command::Empty => {}
                Command::List => self.print_topics()?,
                Command::Help => self.print_help()?,
                Command::Teach(None) => {
                    writeln!(self.output, "\nUsage: teach <topic>")?;
                    writeln!(self.output, "Example: teach suspicious_link")?;
                }
                Command::Teach(Some(topic)) => match self.bank.get_topic(&topic) {
                    Some(t) => writeln!(self.output, "{}", format_lesson(t))?,
                    None => writeln!(self.output, "\nUnknown topic: {topic}")?,
                },
                Command::Quiz(topic) => self.run_quiz(topic.as_deref())?,
                Command::Exit => {
                    writeln!(self.output, "\nReturning to main menu...")?;
                    break;
                }
                Command::Unknown(cmd) => {
                    writeln!(self.output, "\nUnknown command: {cmd}. Type 'help'.")?;
                }
            }
        }

        info!("trainer session ended");
        Ok(())
    }

    fn run_quiz(&mut self, topic: Option<&str>) -> anyhow::Result<()> {
        let topic = topic.unwrap_or(MIXED_TOPIC);
        let session_id = {
            let (_, session) = self.store.create_or_resume("terminal", topic, None);
            session.session_id.clone()
        };
        for expired in self.store.drain_evicted() {
            debug!(session_id = %expired, "trainer session expired");
        }

        loop {
            match self.store.advance(&session_id)? {
                Advance::Question(question) => {
                    let total = self
                        .store
                        .get(&session_id)
                        .map_or(0, |s| s.total_questions());
                    self.print_question(&question, total)?;

                    let Some(choice) = self.read_choice(&question)? else {
                        writeln!(self.output, "\nQuiz abandoned.")?;
                        return Ok(());
                    };

                    let scored = self
                        .store
                        .record_answer(&session_id, Some(&question.qid), choice)?;
                    writeln!(self.output, "{RULE}")?;
                    if scored.correct {
                        writeln!(self.output, "CORRECT! ({:+})", scored.delta)?;
                    } else {
                        let answer = question.question.answer_index;
                        writeln!(self.output, "INCORRECT ({:+})", scored.delta)?;
                        if let Some(option) = question.question.options.get(answer) {
                            writeln!(
                                self.output,
                                "The correct answer is: {}. {option}",
                                answer + 1
                            )?;
                        }
                    }
                    writeln!(self.output, "Running total: {}", scored.running_total)?;
                    writeln!(self.output, "{RULE}")?;
                }
                Advance::Exhausted { .. } => {
                    if let Some(session) = self.store.get(&session_id) {
                        let summary = session.summary();
                        writeln!(self.output, "\n{RULE}")?;
                        writeln!(self.output, "QUIZ COMPLETE")?;
                        writeln!(
                            self.output,
                            "Score: {}  (correct: {}, wrong: {})",
                            summary.total, summary.correct_count, summary.wrong_count
                        )?;
                        writeln!(self.output, "{RULE}")?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// `None` when the user backs out or input ends.
    fn read_choice(&mut self, question: &SessionQuestion) -> anyhow::Result<Option<i64>> {
        let option_count = question.question.option_count();
        loop {
            let Some(line) = self.prompt("Answer> ")? else {
                return Ok(None);
            };
            match line.to_lowercase().as_str() {
                "back" => return Ok(None),
                "skip" => return Ok(Some(NO_ANSWER)),
                other => match other.parse::<usize>() {
                    Ok(n) if (1..=option_count).contains(&n) => return Ok(Some(n as i64 - 1)),
                    _ => writeln!(
                        self.output,
                        "Enter 1-{option_count}, 'skip' or 'back'."
                    )?,
                },
            }
        }
    }

    fn prompt(&mut self, label: &str) -> anyhow::Result<Option<String>> {
        write!(self.output, "{label}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_question(&mut self, question: &SessionQuestion, total: usize) -> anyhow::Result<()> {
        writeln!(self.output, "\n{RULE}")?;
        writeln!(
            self.output,
            "QUIZ ({}) Question {}/{}",
            question.topic,
            question.index + 1,
            total
        )?;
        writeln!(self.output, "{RULE}")?;
        writeln!(self.output, "\n{}", question.question.text)?;
        for (i, option) in question.question.options.iter().enumerate() {
            writeln!(self.output, "   {}. {option}", i + 1)?;
        }
        Ok(())
    }

    fn print_topics(&mut self) -> anyhow::Result<()> {
        writeln!(self.output, "\nAvailable Topics:")?;
        for (i, topic) in self.bank.topics().iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, topic.title)?;
            writeln!(self.output, "   {}", topic.id)?;
        }
        Ok(())
    }

    fn print_help(&mut self) -> anyhow::Result<()> {
        writeln!(self.output, "\nCommands:")?;
        writeln!(self.output, "   list                 - Show available topics")?;
        writeln!(self.output, "   teach <topic>        - Display lesson for topic")?;
        writeln!(self.output, "   quiz [topic]         - Take a quiz (mixed when no topic)")?;
        writeln!(self.output, "   help                 - Show this help")?;
        writeln!(self.output, "   exit / quit          - Leave the trainer")?;
        Ok(())
    }
}

/// Render a lesson for the terminal.
pub fn format_lesson(topic: &Topic) -> String {
    let mut out = vec![
        String::new(),
        RULE.to_string(),
        format!("LESSON: {}", topic.title),
        RULE.to_string(),
        "\nKey Points:".to_string(),
    ];
    out.extend(topic.bullets.iter().map(|b| format!("   - {b}")));
    out.push(RULE.to_string());
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_with(input: &str) -> String {
        let bank = Arc::new(QuestionBank::builtin());
        let mut output = Vec::new();
        Trainer::new(bank, StoreSettings::default(), Cursor::new(input), &mut output)
            .run()
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn command_parsing() {
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(
            Command::parse("TEACH suspicious_link"),
            Command::Teach(Some("suspicious_link".into()))
        );
        assert_eq!(Command::parse("quiz"), Command::Quiz(None));
        assert_eq!(Command::parse("q"), Command::Exit);
        assert_eq!(Command::parse("dance"), Command::Unknown("dance".into()));
    }

    #[test]
    fn teach_prints_lesson_bullets() {
        let out = run_with("teach abnormal_email\nexit\n");
        assert!(out.contains("LESSON: Recognizing Abnormal Email Patterns"));
        assert!(out.contains("Check sender address matches display name"));
        assert!(out.contains("Returning to main menu"));
    }

    #[test]
    fn harmful_input_is_refused() {
        let out = run_with("generate phishing email for finance\nexit\n");
        assert!(out.contains("SAFETY REFUSAL"));
        assert!(!out.contains("Unknown command"));
    }

    #[test]
    fn topic_quiz_answered_correctly_scores_full_marks() {
        let bank = QuestionBank::builtin();
        let answers: String = bank
            .get_topic("suspicious_link")
            .unwrap()
            .questions
            .iter()
            .map(|q| format!("{}\n", q.answer_index + 1))
            .collect();

        let out = run_with(&format!("quiz suspicious_link\n{answers}exit\n"));
        assert!(out.contains("QUIZ COMPLETE"));
        assert!(out.contains("Score: 100  (correct: 10, wrong: 0)"));
    }

    #[test]
    fn skipped_questions_cost_points() {
        let out = run_with(&format!("quiz random_email_address\n{}exit\n", "skip\n".repeat(10)));
        assert!(out.contains("Score: -100  (correct: 0, wrong: 10)"));
    }

    #[test]
    fn back_abandons_quiz_and_end_of_input_stops() {
        let out = run_with("quiz\nback\n");
        assert!(out.contains("Quiz abandoned."));
    }

    #[test]
    fn expired_quizzes_do_not_pile_up() {
        use crate::store::ManualClock;
        use chrono::{Duration, Utc};

        let bank = Arc::new(QuestionBank::builtin());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut output = Vec::new();
        let mut trainer = Trainer::new(
            Arc::clone(&bank),
            StoreSettings::default(),
            Cursor::new(""),
            &mut output,
        );
        trainer.store = SessionStore::with_clock(bank, StoreSettings::default(), clock.clone());

        for _ in 0..3 {
            trainer.run_quiz(Some("abnormal_email")).unwrap();
            clock.advance(Duration::hours(3));
        }
        trainer.run_quiz(Some("abnormal_email")).unwrap();

        assert_eq!(trainer.store.count(), 1);
        assert!(trainer.store.drain_evicted().is_empty());
    }
}
