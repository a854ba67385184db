use crate::openai::ChatMessage;
use crate::similarity::RankedResult;

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

pub const DEFAULT_FRAMING: &str = concat!(
  "You are a sports analyst handling questions about the Olympics. \n",
  " A user asks you about: {query}\n",
  " provide an analytical response based on the following article content: \n",
);

/// Build the grounded prompt: framing with the query substituted, then the
/// ranked context as a 1-indexed list.
pub fn compose_prompt(framing: &str, query_text: &str, results: &[RankedResult<'_>]) -> String {
  let mut prompt = framing.replace("{query}", query_text);

  for (index, result) in results.iter().enumerate() {
    prompt.push_str(&format!("{}. {} \n", index + 1, result.record.text));
  }

  prompt
}

pub fn compose_messages(system: &str, prompt: &str) -> Vec<ChatMessage> {
  vec![ChatMessage::system(system), ChatMessage::user(prompt)]
}
