//! Iteration prompt construction for the controller.

use minijinja::{Environment, context};
use serde::Serialize;

use crate::trajectory::TrajectoryStep;

/// Fixed system prompt for the root model.
pub const SYSTEM_PROMPT: &str = r#"You are operating a persistent Python REPL that holds a large context you cannot read directly. Work by writing code.

Environment:
- `context` (str): the full input, too large for your prompt.
- `llm_query(prompt, model=None) -> str`: ask a sub-model a question.
- `llm_query_batched(prompts, model=None) -> list[str]`: concurrent sub-model calls.
- `rlm_query(prompt, model=None) -> str`: delegate to a recursive sub-engine over the same context.
- `rlm_query_batched(prompts, model=None) -> list[str]`
- `strip_fences(text) -> str`: remove one surrounding ``` fence.
- `SHOW_VARS() -> dict`: your variables.
- `FINAL(answer)` / `FINAL_VAR(name)` / `SUBMIT(answer)`: finish with a final answer.

Respond with reasoning followed by exactly one code block (```repl or ```python). State persists between iterations. Explore the context with code before answering; when confident, call FINAL(...) with the answer as a plain string."#;

const ITERATION_TEMPLATE: &str = r#"<query>
{{ query }}
</query>

<context_info>
Context length: {{ context_len }} characters.
First 500 characters:
{{ context_preview }}
</context_info>
{% if first_iteration %}
This is your first iteration. Explore the context with code (length, structure, samples) before attempting an answer.
{% endif %}
{% if steps %}
<trajectory>
{% for step in steps %}
--- iteration {{ step.iteration }} ---
{% if step.reasoning %}reasoning: {{ step.reasoning }}
{% endif %}code:
{{ step.code }}
output:
{{ step.output }}
{% endfor %}
</trajectory>
{% endif %}
Continue. Emit reasoning and one code block; call FINAL(...) when done."#;

const FALLBACK_TEMPLATE: &str = r#"The iteration budget for this query is exhausted. Based on the trajectory below, give the best final answer you can. Respond with the answer only.

<query>
{{ query }}
</query>

<trajectory>
{% for step in steps %}
--- iteration {{ step.iteration }} ---
code:
{{ step.code }}
output:
{{ step.output }}
{% endfor %}
</trajectory>"#;

#[derive(Debug, Serialize)]
struct StepContext<'a> {
    iteration: u32,
    reasoning: &'a str,
    code: &'a str,
    output: &'a str,
}

fn step_contexts(trajectory: &[TrajectoryStep]) -> Vec<StepContext<'_>> {
    trajectory
        .iter()
        .map(|step| StepContext {
            iteration: step.iteration,
            reasoning: &step.reasoning,
            code: &step.code,
            output: &step.output,
        })
        .collect()
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_template("iteration", ITERATION_TEMPLATE)
        .expect("iteration template should be valid");
    env.add_template("fallback", FALLBACK_TEMPLATE)
        .expect("fallback template should be valid");
    env
}

/// Render the per-iteration prompt: query, context stats, full prior
/// trajectory, and a first-iteration exploration note.
pub fn build_iteration_prompt(
    query: &str,
    context_text: &str,
    trajectory: &[TrajectoryStep],
    iteration: u32,
) -> String {
    let env = environment();
    let template = env.get_template("iteration").expect("registered template");
    let preview: String = context_text.chars().take(500).collect();
    template
        .render(context! {
            query => query,
            context_len => context_text.chars().count(),
            context_preview => preview,
            first_iteration => iteration == 1,
            steps => step_contexts(trajectory),
        })
        .expect("iteration template rendering should not fail")
}

/// Render the single fallback summarization prompt.
pub fn build_fallback_prompt(query: &str, trajectory: &[TrajectoryStep]) -> String {
    let env = environment();
    let template = env.get_template("fallback").expect("registered template");
    template
        .render(context! {
            query => query,
            steps => step_contexts(trajectory),
        })
        .expect("fallback template rendering should not fail")
}
