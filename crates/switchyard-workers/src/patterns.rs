//! Ready-made worker trees
//!
//! Each builder assembles a common agent pattern from the engine's
//! combinators and an [`LlmClient`]. The returned tree is ready to hand to
//! an [`Orchestrator`](switchyard_engine::Orchestrator).

use std::sync::Arc;

use serde_json::json;
use switchyard_engine::{
    with_output_key, Branch, Condition, ConstructionError, Delegate, DelegateMode, FnWorker, Loop,
    Parallel, Sequence, WorkerRef,
};

use crate::builtin::Passthrough;
use crate::llm::{LlmClient, LlmWorker, OutputFormat};

pub const EXTRACT_INSTRUCTION: &str =
    "Extract the technical specifications from the following text.";
pub const TRANSFORM_INSTRUCTION: &str = "Transform the following specifications into a JSON \
     object with 'cpu', 'memory', and 'storage' as keys.";

/// Extract specifications from text, then restructure them as JSON.
///
/// The extraction is kept in `specifications`; the final payload is the
/// parsed JSON object.
pub fn prompt_chain(client: Arc<dyn LlmClient>) -> Result<WorkerRef, ConstructionError> {
    let extract = LlmWorker::new("extract", Arc::clone(&client), EXTRACT_INSTRUCTION)
        .with_output_key("specifications")
        .into_ref();
    let transform = LlmWorker::new("transform", client, TRANSFORM_INSTRUCTION)
        .with_format(OutputFormat::Json)
        .into_ref();
    Ok(Sequence::new("prompt_chain", vec![extract, transform])?.into_ref())
}

pub const ROUTER_INSTRUCTION: &str = "Analyze the user's request and determine which \
     specialist handler should process it.\n\
     - If the request is related to booking flights or hotels, output 'booker'.\n\
     - For all other general information questions, output 'info'.\n\
     - If the request is unclear or doesn't fit either category, output 'unclear'.\n\
     ONLY output one word: 'booker', 'info', or 'unclear'.";

fn handler(name: &'static str, reply: fn(&str) -> String) -> WorkerRef {
    FnWorker::sync(name, move |_, input| {
        let request = match &input {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        log::debug!("{} handling request", name);
        Ok(json!(reply(&request)))
    })
    .into_ref()
}

/// An LLM classifier routing requests to booking, info or fallback handlers
pub fn coordinator_router(client: Arc<dyn LlmClient>) -> Result<WorkerRef, ConstructionError> {
    let coordinator = LlmWorker::new("coordinator", client, ROUTER_INSTRUCTION).into_ref();
    let booking = handler("booking_handler", |request| {
        format!(
            "Booking Handler processed request: '{}'. Results: Simulated booking action.",
            request
        )
    });
    let info = handler("info_handler", |request| {
        format!(
            "Info Handler processed request: '{}'. Results: Simulated information retrieval.",
            request
        )
    });
    let unclear = handler("unclear_handler", |request| {
        format!(
            "Coordinator could not delegate request: '{}'. Please clarify.",
            request
        )
    });

    Ok(Branch::builder("coordinator_router", coordinator)
        .route("booker", booking)
        .route("info", info)
        .default_label("unclear")
        .default(unclear)
        .build()?
        .into_ref())
}

pub const SYNTHESIS_INSTRUCTION: &str = "Based on the following information:\n\
     Summary: {summary}\n\
     Related Questions: {questions}\n\
     Key Terms: {key_terms}\n\
     Synthesize a comprehensive answer.";

/// Summarize, ask questions and list key terms concurrently, then synthesize
pub fn parallel_synthesis(client: Arc<dyn LlmClient>) -> Result<WorkerRef, ConstructionError> {
    let summarize = LlmWorker::new(
        "summarize",
        Arc::clone(&client),
        "Summarize the following topic concisely.",
    )
    .with_output_key("summary")
    .into_ref();
    let questions = LlmWorker::new(
        "questions",
        Arc::clone(&client),
        "Generate three interesting questions about the following topic.",
    )
    .with_output_key("questions")
    .into_ref();
    let key_terms = LlmWorker::new(
        "key_terms",
        Arc::clone(&client),
        "Identify 5-10 key terms from the following topic, separated by commas.",
    )
    .with_output_key("key_terms")
    .into_ref();
    let topic = with_output_key(Passthrough::new("topic").into_ref(), "topic");

    let fan = Parallel::new("research", vec![summarize, questions, key_terms, topic])?.into_ref();
    let synthesis = LlmWorker::new("synthesis", client, SYNTHESIS_INSTRUCTION)
        .with_prompt("Original topic: {topic}")
        .into_ref();
    Ok(Sequence::new("parallel_synthesis", vec![fan, synthesis])?.into_ref())
}

pub const PROCESSING_INSTRUCTION: &str = "You are a step in a longer process. Perform your \
     task. Reply with the single word 'completed' if you are the final step, otherwise \
     'pending'.";

/// Repeat a processing step until state `status` is `completed` (at most 10 times)
pub fn status_poller(client: Arc<dyn LlmClient>) -> Result<WorkerRef, ConstructionError> {
    let step = LlmWorker::new("processing_step", client, PROCESSING_INSTRUCTION)
        .with_output_key("status")
        .into_ref();
    let checker = Condition::key_equals("condition_checker", "status", "completed").into_ref();
    Ok(Loop::builder("status_poller")
        .body(step)
        .terminator(checker)
        .max_iterations(10)
        .build()?
        .into_ref())
}

pub const REVIEW_INSTRUCTION: &str = "You are a meticulous fact-checker.\n\
     1. Read the text below.\n\
     2. Carefully verify the factual accuracy of all claims.\n\
     3. Reply with a JSON object with two keys: \"status\" (either \"ACCURATE\" or \
     \"INACCURATE\") and \"reasoning\" (a clear explanation citing specific issues).\n\n\
     Text: {draft_text}";

/// Draft a paragraph, then fact-check it into `review_output`
pub fn write_and_review(client: Arc<dyn LlmClient>) -> Result<WorkerRef, ConstructionError> {
    let writer = LlmWorker::new(
        "draft_writer",
        Arc::clone(&client),
        "Write a short, informative paragraph about the user's subject.",
    )
    .with_description("Generates initial draft content on a given subject.")
    .with_output_key("draft_text")
    .into_ref();
    let reviewer = LlmWorker::new("fact_checker", client, REVIEW_INSTRUCTION)
        .with_description("Reviews a given text for factual accuracy.")
        .with_format(OutputFormat::Json)
        .with_output_key("review_output")
        .into_ref();
    Ok(Sequence::new("write_and_review", vec![writer, reviewer])?.into_ref())
}

pub const DELEGATION_INSTRUCTION: &str = "When asked to greet, reply 'greeter'. When asked to \
     perform a task, reply 'task_executor'. Reply with the name only.";

/// A coordinator delegating to a greeter or a fixed task executor
pub fn coordinator_hierarchy(client: Arc<dyn LlmClient>) -> Result<WorkerRef, ConstructionError> {
    let coordinator = LlmWorker::new("coordinator", Arc::clone(&client), DELEGATION_INSTRUCTION)
        .with_description("A coordinator that can greet users and execute tasks.")
        .into_ref();
    let greeter = LlmWorker::new("greeter", client, "You are a friendly greeter.").into_ref();
    let executor = FnWorker::sync("task_executor", |_, _| Ok(json!("Task finished successfully.")))
        .into_ref();
    Ok(Delegate::new("hierarchy", coordinator, vec![greeter, executor], DelegateMode::Single)?
        .into_ref())
}
