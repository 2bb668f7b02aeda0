//! Prompt rendering for the three phases, plus the narration blocks
//! emitted on the reasoning channel.

use std::fmt::Write;

use planact_core::plan::{ActionRecord, Plan, PlanStep};
use planact_core::tool::ExecutionMode;
use planact_tools::ToolCatalog;

/// System prompt for the planner.
pub fn plan_system(catalog: &ToolCatalog, max_steps: usize, caller: Option<&str>) -> String {
    let mut prompt = String::new();
    push_caller_instructions(&mut prompt, caller);

    let _ = write!(
        prompt,
        "You are the planning stage of an assistant. Break the user's latest request into an \
         ordered list of concrete steps, at most {max_steps}. Each step needs a short title, \
         instructions for carrying it out, and the context from the conversation it relies on. \
         If a step should use a tool, name it in toolStrategy. If the request needs no \
         decomposition, return an empty list of steps.\n\n"
    );

    if catalog.is_empty() {
        prompt.push_str("No tools are available for this request.\n");
    } else {
        prompt.push_str("Tools that later steps may call (you cannot call them now):\n");
        for entry in &catalog.entries {
            let _ = write!(prompt, "- {}: {}", entry.name, entry.description);
            if entry.execution_mode == ExecutionMode::External {
                prompt.push_str(" [fulfilled by the caller]");
            }
            if let Some(origin) = &entry.origin {
                let _ = write!(prompt, " (via {origin})");
            }
            prompt.push('\n');
        }
    }

    prompt.push_str("\nRespond only with JSON of the form {\"steps\": [...]}.");
    prompt
}

/// System prompt shared by every act step.
pub fn act_system(caller: Option<&str>) -> String {
    let mut prompt = String::new();
    push_caller_instructions(&mut prompt, caller);
    prompt.push_str(
        "You are the execution stage of an assistant. Carry out exactly one plan step, using \
         tools where they help. When the step is done, respond with JSON containing \"action\" \
         (what you did) and \"observation\" (what you found). If the step revealed more work, \
         add \"addedSteps\" (same shape as plan steps) and explain why in \"addedStepsReason\".",
    );
    prompt
}

/// The user turn for one act step: the step plus everything done so far.
pub fn act_step(step: &PlanStep, history: &[ActionRecord]) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("Completed so far:\n");
        push_history(&mut prompt, history);
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "Current step: {}\nInstructions: {}\nContext: {}",
        step.title, step.instructions, step.relevant_context
    );
    if let Some(strategy) = &step.tool_strategy
        && let Some(tool) = &strategy.tool_name
    {
        let _ = write!(prompt, "\nSuggested tool: {tool}");
        if let Some(reason) = &strategy.reason {
            let _ = write!(prompt, " ({reason})");
        }
        if strategy.fallback_to_internal == Some(true) {
            prompt.push_str("\nIf the tool is unavailable or fails, continue without it.");
        }
    }
    prompt
}

pub fn response_system(caller: Option<&str>) -> String {
    let mut prompt = String::new();
    push_caller_instructions(&mut prompt, caller);
    prompt.push_str("You are a helpful assistant. Answer clearly and concisely.");
    prompt
}

/// The single user turn of the response phase.
pub fn response_user(user_message: &str, plan: &Plan, history: &[ActionRecord]) -> String {
    let mut prompt = String::new();

    if !plan.is_empty() {
        prompt.push_str("Plan that was followed:\n");
        for (i, step) in plan.steps.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}: {}", i + 1, step.title, step.instructions);
        }
        prompt.push('\n');
    }

    if !history.is_empty() {
        prompt.push_str("Work carried out:\n");
        push_history(&mut prompt, history);
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "User request: {user_message}\n\n\
         Answer the user directly using the information above. Do not mention the plan, the \
         steps, or any internal process."
    );
    prompt
}

/// Reasoning-channel block for a plan step.
pub fn narrate_step(index: usize, step: &PlanStep) -> String {
    format!("Step {}: {}\n{}\n", index + 1, step.title, step.instructions)
}

/// Reasoning-channel block for an action record.
pub fn narrate_action(index: usize, record: &ActionRecord) -> String {
    let mut block = format!(
        "Action {}: {}\nObservation: {}\n",
        index + 1,
        record.action,
        record.observation
    );
    if let Some(added) = &record.added_steps
        && !added.is_empty()
    {
        let titles: Vec<&str> = added.iter().map(|s| s.title.as_str()).collect();
        let _ = writeln!(block, "Added steps: {}", titles.join(", "));
    }
    block
}

fn push_caller_instructions(prompt: &mut String, caller: Option<&str>) {
    if let Some(caller) = caller.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str(caller);
        prompt.push_str("\n\n");
    }
}

fn push_history(prompt: &mut String, history: &[ActionRecord]) {
    for (i, record) in history.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. {} -> {}",
            i + 1,
            record.action,
            record.observation
        );
    }
}
