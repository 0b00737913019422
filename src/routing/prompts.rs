//! Prompt builders for the generator.

use regex::Regex;
use std::fmt::Write;
use std::sync::LazyLock;

use crate::conversation::{ContextMessage, Role};

/// Trailing messages of context rendered into a tutor prompt.
pub const PROMPT_CONTEXT_WINDOW: usize = 5;

const TUTOR_INSTRUCTIONS: &str = "\
You are a patient, adaptive tutor. Teach in short cycles:
1. Explain the idea plainly, with an example.
2. Check whether the student followed.
3. If they say they understood, confirm it with a question of your own.
4. If they are confused, explain the same idea a different way: a new analogy, \
a smaller step, or a link to something they already know.
5. Only move on once understanding is shown.

Where a visual or a computation would help, mark it inline:
[IMAGE: description], [VIDEO: search query], [WOLFRAM: query].
Place these markers after the text that introduces them.";

const TUTOR_CLOSING: &str = "\
Reply to the student now. Address their message, keep it focused, \
and finish with a question that checks their understanding.";

/// How the tutor should approach its next reply, judged from the student's
/// most recent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeachingMode {
    /// Student says they understand; verify it
    VerifyUnderstanding,
    /// Student is confused; re-teach differently
    Reteach,
    /// Student asked something
    AnswerQuestion,
    /// Student answered a check question
    EvaluateAnswer,
}

impl TeachingMode {
    pub fn hint(&self) -> &'static str {
        match self {
            Self::VerifyUnderstanding => {
                "The student says they understand. Verify it with a question before moving on."
            }
            Self::Reteach => {
                "The student is confused. Teach the same idea again using a different approach."
            }
            Self::AnswerQuestion => {
                "The student asked a question. Answer it, then check their understanding."
            }
            Self::EvaluateAnswer => {
                "Evaluate the student's answer and give specific feedback."
            }
        }
    }
}

static CONFUSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(no|confused|unclear|lost|don'?t understand|do not understand|not sure)\b")
        .expect("invalid regex")
});

static UNDERSTOOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(yes|understand|understood|got it|makes sense|clear)\b")
        .expect("invalid regex")
});

/// Mode for the reply after `context`. `None` when the student has not spoken.
pub fn teaching_mode(context: &[ContextMessage]) -> Option<TeachingMode> {
    let last = context.iter().rev().find(|m| m.role == Role::User)?;
    let text = last.content.trim();

    Some(if CONFUSED.is_match(text) {
        TeachingMode::Reteach
    } else if UNDERSTOOD.is_match(text) {
        TeachingMode::VerifyUnderstanding
    } else if text.ends_with('?') {
        TeachingMode::AnswerQuestion
    } else {
        TeachingMode::EvaluateAnswer
    })
}

/// Full tutor prompt: instructions, topic, recent context, mode and message.
pub fn tutor_prompt(message: &str, context: &[ContextMessage], topic: Option<&str>) -> String {
    let mut prompt = String::from(TUTOR_INSTRUCTIONS);

    if let Some(topic) = topic.filter(|t| !t.trim().is_empty()) {
        let _ = write!(prompt, "\n\nCurrent topic: {}", topic);
    }

    if !context.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        let start = context.len().saturating_sub(PROMPT_CONTEXT_WINDOW);
        for msg in &context[start..] {
            let _ = writeln!(prompt, "{}: {}", msg.role.speaker(), msg.content);
        }
    }

    if let Some(mode) = teaching_mode(context) {
        let _ = write!(prompt, "\n\nApproach: {}", mode.hint());
    }

    let _ = write!(prompt, "\n\nStudent: {}\n\n{}", message, TUTOR_CLOSING);
    prompt
}

/// The student's message with a computed answer and worked steps attached.
///
/// Steps are numbered in the order given and otherwise left as is.
pub fn augmented_message(message: &str, answer: Option<&str>, steps: &[String]) -> String {
    let mut out = String::from(message);

    if let Some(answer) = answer.filter(|a| !a.trim().is_empty()) {
        let _ = write!(out, "\n\n[Computational Result: {}]", answer);
    }

    if !steps.is_empty() {
        out.push_str("\n\n[Step-by-Step Solution:");
        for (i, step) in steps.iter().enumerate() {
            let _ = write!(out, "\nStep {}: {}", i + 1, step);
        }
        out.push(']');
    }

    out.push_str("\n\nPlease give a clear explanation that helps the student understand this solution.");
    out
}

/// Concept text with the computed data attached, for explanations.
pub fn augmented_concept(concept: &str, answer: Option<&str>) -> String {
    format!(
        "{}\n\n[Computational data: {}]",
        concept,
        answer.unwrap_or("none")
    )
}

/// How an explanation should be pitched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExplanationStyle {
    #[default]
    Comprehensive,
    Analogy,
    Example,
    Steps,
    Simple,
}

impl ExplanationStyle {
    /// Unknown names fall back to comprehensive.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "analogy" => Self::Analogy,
            "example" => Self::Example,
            "steps" => Self::Steps,
            "simple" => Self::Simple,
            _ => Self::Comprehensive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comprehensive => "comprehensive",
            Self::Analogy => "analogy",
            Self::Example => "example",
            Self::Steps => "steps",
            Self::Simple => "simple",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            Self::Comprehensive => {
                "Give a thorough explanation: define it, say why it matters, show how it \
                 works with a real-world example, and point out a common misconception."
            }
            Self::Analogy => {
                "Explain it through an analogy drawn from everyday life, and say where the \
                 analogy stops holding."
            }
            Self::Example => {
                "Explain it through concrete examples, starting simple and building up, \
                 walking through each one."
            }
            Self::Steps => "Break it down into numbered steps, each building on the last.",
            Self::Simple => {
                "Explain it simply for a beginner, in short sentences and without jargon."
            }
        }
    }
}

pub fn explanation_prompt(concept: &str, style: ExplanationStyle, topic: Option<&str>) -> String {
    let mut prompt = format!("Explain the following concept to a student.\n\nConcept: {}", concept);
    if let Some(topic) = topic.filter(|t| !t.trim().is_empty()) {
        let _ = write!(prompt, "\nThey are studying: {}", topic);
    }
    let _ = write!(prompt, "\n\n{}", style.instructions());
    prompt
}

/// Prompt summarizing a finished session.
pub fn summary_prompt(topic: &str, messages: &[ContextMessage], duration_minutes: i64) -> String {
    let mut prompt = format!(
        "Summarize this learning session for the student.\n\n\
         Topic: {}\nDuration: {} minutes\nExchanges: {}\n\nConversation:\n",
        topic,
        duration_minutes,
        messages.len() / 2
    );
    for msg in messages {
        let _ = writeln!(prompt, "{}: {}", msg.role.speaker(), msg.content);
    }
    prompt.push_str(
        "\nCover the key concepts, the questions explored, anything that clicked, \
         what could use more practice, and what to study next. Keep it encouraging.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teaching_mode_from_last_student_message() {
        assert_eq!(teaching_mode(&[]), None);
        assert_eq!(
            teaching_mode(&[ContextMessage::assistant("Welcome!")]),
            None
        );

        let ctx = |text: &str| vec![ContextMessage::user(text), ContextMessage::assistant("...")];
        assert_eq!(teaching_mode(&ctx("I don't understand")), Some(TeachingMode::Reteach));
        assert_eq!(teaching_mode(&ctx("yes, got it")), Some(TeachingMode::VerifyUnderstanding));
        assert_eq!(teaching_mode(&ctx("why is that?")), Some(TeachingMode::AnswerQuestion));
        assert_eq!(teaching_mode(&ctx("x = 4")), Some(TeachingMode::EvaluateAnswer));
        // "unclear" is confusion, not "clear".
        assert_eq!(teaching_mode(&ctx("that's unclear")), Some(TeachingMode::Reteach));
    }

    #[test]
    fn test_tutor_prompt_keeps_last_five_messages() {
        let context: Vec<_> = (1..=7)
            .map(|i| ContextMessage::user(format!("message {}", i)))
            .collect();
        let prompt = tutor_prompt("next", &context, Some("Limits"));

        assert!(prompt.contains("Current topic: Limits"));
        assert!(!prompt.contains("message 2\n"));
        assert!(prompt.contains("Student: message 3\n"));
        assert!(prompt.contains("Student: message 7\n"));
        assert!(prompt.contains("Student: next"));
    }

    #[test]
    fn test_augmented_message_layout() {
        let steps = vec!["Factor".to_string(), "Solve each factor".to_string()];
        let out = augmented_message("solve x^2+5x+6=0", Some("x = -2, -3"), &steps);

        assert!(out.starts_with("solve x^2+5x+6=0\n\n[Computational Result: x = -2, -3]"));
        assert!(out.contains("[Step-by-Step Solution:\nStep 1: Factor\nStep 2: Solve each factor]"));
        assert!(out.ends_with("understand this solution."));
    }

    #[test]
    fn test_augmented_message_without_steps() {
        let out = augmented_message("plot sin x", None, &[]);
        assert!(!out.contains("[Computational Result"));
        assert!(!out.contains("[Step-by-Step"));
    }

    #[test]
    fn test_style_parsing_falls_back() {
        assert_eq!(ExplanationStyle::parse("Analogy"), ExplanationStyle::Analogy);
        assert_eq!(ExplanationStyle::parse("interpretive dance"), ExplanationStyle::Comprehensive);
    }

    #[test]
    fn test_explanation_prompt_mentions_topic() {
        let prompt = explanation_prompt("limits", ExplanationStyle::Steps, Some("Calculus"));
        assert!(prompt.contains("Concept: limits\nThey are studying: Calculus"));
        assert!(prompt.contains("numbered steps"));

        let prompt = explanation_prompt("limits", ExplanationStyle::Simple, None);
        assert!(!prompt.contains("studying"));
    }

    #[test]
    fn test_summary_prompt_counts_exchanges() {
        let messages = vec![
            ContextMessage::user("hi"),
            ContextMessage::assistant("hello"),
            ContextMessage::user("what is pi"),
        ];
        let prompt = summary_prompt("Geometry", &messages, 12);
        assert!(prompt.contains("Exchanges: 1"));
        assert!(prompt.contains("Tutor: hello"));
    }
}
