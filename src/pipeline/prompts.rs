//! Prompt text for each stage

use super::stages::StageId;
use crate::run::{truncate_message, Turn};

const RESPONSE_CONTRACT: &str = "Respond with a single JSON object. Besides the fields listed \
above, include a \"message\" field: a plain-language summary in the first person, at most 700 \
characters, with no JSON or bullet formatting inside it.";

/// System prompt for a stage
pub fn system_prompt(stage: StageId) -> String {
    let role = match stage {
        StageId::Refiner => {
            "You are the Refiner on an idea review panel. Restate the raw idea as a crisp \
problem and a concrete proposed solution, and list the assumptions it silently depends on.\n\
Fields: problem_statement (string), assumptions (array of 2-5 strings), \
proposed_solution (string)."
        }
        StageId::RealityChecker => {
            "You are the Reality Checker on an idea review panel. Using the Refiner's framing, \
challenge each assumption, name claims that could be tested cheaply, and list the concrete \
ways the idea could fail.\n\
Fields: assumptions (array of strings), testable_claims (array of 2-4 strings), \
failure_points (array of 2-4 strings)."
        }
        StageId::Assassin => {
            "You are the Assassin on an idea review panel. Your only job is to find a single \
fatal flaw that makes further analysis pointless. Veto only when the flaw is decisive, not \
merely a risk.\n\
Fields: veto (boolean), kill_reason (string, required when veto is true), failure_mode \
(one of no_real_user, technical_impossibility, simpler_solution_exists, \
unjustified_complexity, unsound_assumptions, economic_nonviability)."
        }
        StageId::Cost => {
            "You are the Cost Analyst on an idea review panel. Rate what it would take to build \
and keep running the idea as refined so far. Each rating is 'Low', 'Medium' or 'High' followed \
by a colon and a one-sentence reason.\n\
Fields: implementation_cost, maintenance_cost, operational_risk, cognitive_load (strings)."
        }
        StageId::Synthesizer => {
            "You are the Synthesizer on an idea review panel and you speak last. Weigh the \
whole discussion, propose the smallest version of the idea worth trying, and give a verdict.\n\
Fields: constrained_version (string), open_risks (array of strings), recommendation \
(one of RESEARCH_FIRST, PROCEED, STOP, PIVOT)."
        }
    };

    format!("{role}\n\n{RESPONSE_CONTRACT}")
}

/// User prompt: the idea plus every prior turn, each cut to the message limit
pub fn build_user_prompt(idea_text: &str, conversation: &[Turn]) -> String {
    let mut prompt = format!("Idea to evaluate:\n{idea_text}\n\n");

    if !conversation.is_empty() {
        prompt.push_str("Previous panel analysis:\n");
        for turn in conversation {
            prompt.push_str(&format!(
                "\n{}: {}\n",
                turn.stage.display_name(),
                truncate_message(&turn.message)
            ));
        }
    }

    prompt.push_str("\nNow give your own analysis as a JSON object with the required fields.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::{RefinerOutput, StageOutput};
    use chrono::Utc;

    #[test]
    fn test_system_prompts_mention_their_fields() {
        assert!(system_prompt(StageId::Refiner).contains("problem_statement"));
        assert!(system_prompt(StageId::Assassin).contains("kill_reason"));
        assert!(system_prompt(StageId::Synthesizer).contains("RESEARCH_FIRST"));
        for stage in StageId::ALL {
            assert!(system_prompt(stage).contains("\"message\""));
        }
    }

    #[test]
    fn test_first_stage_prompt_has_no_history() {
        let prompt = build_user_prompt("A bike-sharing app for kids", &[]);
        assert!(prompt.starts_with("Idea to evaluate:\nA bike-sharing app for kids"));
        assert!(!prompt.contains("Previous panel analysis"));
    }

    #[test]
    fn test_prior_turns_are_truncated() {
        let turn = Turn {
            turn_number: 1,
            stage: StageId::Refiner,
            message: "x".repeat(900),
            output: StageOutput::Refiner(RefinerOutput {
                problem_statement: "p".to_string(),
                assumptions: vec![],
                proposed_solution: "s".to_string(),
            }),
            model_id: "m".to_string(),
            usage_tokens: 0,
            created_at: Utc::now(),
        };

        let prompt = build_user_prompt("idea", &[turn]);
        let line = prompt
            .lines()
            .find(|l| l.starts_with("Refiner: "))
            .unwrap();
        assert_eq!(line.trim_start_matches("Refiner: ").chars().count(), 700);
        assert!(line.ends_with("..."));
    }
}
