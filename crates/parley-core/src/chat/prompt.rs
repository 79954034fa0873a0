//! Prompt assembly from a session's recorded history.

use parley_types::chat::ChatExchange;

/// Turns a session's history plus a new request into the prompt text sent to
/// the generation backend.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, history: &[ChatExchange], request: &str) -> String;
}

/// Plain-text concatenation: each exchange as `request\n\nresponse\n\n`, in
/// the order given, followed by the new request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatenatingPromptBuilder;

impl PromptBuilder for ConcatenatingPromptBuilder {
    fn build(&self, history: &[ChatExchange], request: &str) -> String {
        let capacity = history
            .iter()
            .map(|e| e.request.len() + e.response.len() + 4)
            .sum::<usize>()
            + request.len();
        let mut prompt = String::with_capacity(capacity);
        for exchange in history {
            prompt.push_str(&exchange.request);
            prompt.push_str("\n\n");
            prompt.push_str(&exchange.response);
            prompt.push_str("\n\n");
        }
        prompt.push_str(request);
        prompt
    }
}
