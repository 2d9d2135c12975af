//! User-message templates for the research and critic turns.
//!
//! System instructions belong to the agents themselves; these helpers only
//! shape what the loop says to them.

use std::fmt::Write as _;

use crate::collaborator::{AgentTurn, ChatMessage};
use crate::plan::ResearchPlan;
use crate::report::REQUIRED_SECTIONS;

/// Planner turn: the question and the JSON shape expected back.
pub fn plan_turn(question: &str, max_search_queries: usize, step_limit: u32) -> AgentTurn {
    let message = format!(
        "Question:\n{}\n\nBreak the question into focused sub-questions and propose up to {max_search_queries} web search queries. Reply with JSON only:\n{{\"sub_questions\": [\"...\"], \"search_queries\": [\"...\"]}}",
        question.trim()
    );
    AgentTurn::new(vec![ChatMessage::user(message)], step_limit)
}

/// First research turn: the question, followed by the plan when one exists.
pub fn research_turn(question: &str, plan: Option<&ResearchPlan>, step_limit: u32) -> AgentTurn {
    let message = match plan {
        Some(plan) => format!(
            "{}\n\nResearch plan (use it as a starting point):\n{}",
            question.trim(),
            plan.render()
        ),
        None => question.trim().to_string(),
    };
    AgentTurn::new(vec![ChatMessage::user(message)], step_limit)
}

/// Revision turn: the original question with the critic's fixes appended as feedback.
pub fn revision_turn(question: &str, fixes: &[String], step_limit: u32) -> AgentTurn {
    AgentTurn::new(
        vec![ChatMessage::user(revision_message(question, fixes))],
        step_limit,
    )
}

pub fn revision_message(question: &str, fixes: &[String]) -> String {
    let mut message = String::new();
    let _ = writeln!(message, "{}", question.trim());
    let _ = writeln!(message);
    let _ = writeln!(
        message,
        "Feedback from the reviewer on your previous answer. Address every item and return the complete revised answer:"
    );
    for fix in fixes {
        let _ = writeln!(message, "- {}", fix.trim());
    }
    message
}

/// Critic turn: the question and the answer under review.
pub fn critic_turn(question: &str, answer: &str, step_limit: u32) -> AgentTurn {
    let mut message = String::new();
    let _ = writeln!(message, "Question:\n{}\n", question.trim());
    let _ = writeln!(message, "Answer under review:\n{}\n", answer.trim());
    let _ = write!(
        message,
        "Required sections, in order: {}\nReply with ENOUGH, or with REVISE: followed by one bullet per fix.",
        REQUIRED_SECTIONS.join(" ")
    );
    AgentTurn::new(vec![ChatMessage::user(message)], step_limit)
}
