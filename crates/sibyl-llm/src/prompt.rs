//! Prompt templates and composition.
//!
//! Every pipeline builds the same shape: a system instruction, the session's
//! conversation history, and one mode-specific human turn.

use serde::Serialize;

use sibyl_core::types::{ConversationMessage, Role};

/// System instruction for plain chat mode.
pub const CHAT_SYSTEM_TEMPLATE: &str = "You are a helpful, knowledgeable assistant. \
Answer the user's questions clearly and concisely, using the conversation so far \
for context.";

/// System instruction for RAG answer generation. `{context}` is replaced with
/// the formatted retrieved chunks.
pub const RAG_ANSWER_SYSTEM_TEMPLATE: &str = "You are an experienced researcher, \
expert at interpreting and answering questions based on provided sources. \
Using the below provided context and chat history, answer the user's question \
to the best of your ability using only the resources provided.\n\n<context>\n{context}\n</context>";

/// System instruction for web-search-grounded answer generation.
pub const WEB_SEARCH_ANSWER_SYSTEM_TEMPLATE: &str = "You are a helpful assistant \
that provides accurate, up-to-date information based on web search results.\n\n\
Guidelines:\n\
- Use the provided search results to answer the user's question comprehensively\n\
- Always cite your sources when possible (mention websites, dates, etc.)\n\
- If search results don't contain relevant information, clearly state that\n\
- Don't make up information that isn't found in the search results\n\
- Structure your answer clearly and concisely";

/// System instruction for rewriting a follow-up into a standalone question.
pub const REPHRASE_SYSTEM_TEMPLATE: &str = "Given the following conversation and a \
follow up question, rephrase the follow up question to be a standalone question.";

/// System instruction for synthesizing a compact web-search query.
pub const SEARCH_QUERY_SYSTEM_TEMPLATE: &str = "You are an expert at creating \
effective web search queries.\n\n\
Given a user's question and chat history, create an optimized search query that \
will find the most relevant and current information.\n\n\
Rules for creating search queries:\n\
- Keep it concise (3-8 words typically work best)\n\
- Use specific keywords rather than full sentences\n\
- Include relevant time indicators if the question asks for recent information\n\
- Remove unnecessary words like \"what\", \"how\", \"tell me about\"\n\n\
Examples:\n\
- \"What's the latest news about Tesla?\" -> \"Tesla latest news 2024\"\n\
- \"How is the weather in New York today?\" -> \"New York weather today\"\n\
- \"Tell me about recent AI developments\" -> \"AI developments recent 2024\"\n\n\
Return only the search query, nothing else.";

/// Wire-format role for a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One message in a composed prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// A composed prompt: system instruction, history, human turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    messages: Vec<PromptMessage>,
}

impl ChatPrompt {
    /// Start a prompt from a system instruction.
    pub fn system(instruction: impl Into<String>) -> Self {
        Self {
            messages: vec![PromptMessage {
                role: PromptRole::System,
                content: instruction.into(),
            }],
        }
    }

    /// Append the session's conversation history in order.
    pub fn with_history(mut self, history: &[ConversationMessage]) -> Self {
        for msg in history {
            self.messages.push(PromptMessage {
                role: match msg.role {
                    Role::Human => PromptRole::User,
                    Role::Assistant => PromptRole::Assistant,
                },
                content: msg.content.clone(),
            });
        }
        self
    }

    /// Append the final human turn.
    pub fn with_human(mut self, content: impl Into<String>) -> Self {
        self.messages.push(PromptMessage {
            role: PromptRole::User,
            content: content.into(),
        });
        self
    }

    /// The composed message sequence.
    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }
}

/// Render the RAG answer system instruction with retrieved context.
pub fn rag_answer_system(context: &str) -> String {
    RAG_ANSWER_SYSTEM_TEMPLATE.replace("{context}", context)
}

/// Human turn for RAG answer generation.
pub fn rag_answer_human(standalone_question: &str) -> String {
    format!(
        "Now, answer this question using the previous context and chat history:\n\n{}",
        standalone_question
    )
}

/// Human turn asking for a rephrased standalone question.
pub fn rephrase_human(question: &str) -> String {
    format!(
        "Rephrase the following question as a standalone question:\n{}",
        question
    )
}

/// Human turn for web-search answer generation.
pub fn web_answer_human(question: &str, query_used: &str, results: &str) -> String {
    format!(
        "Based on the search results below, please answer this question: {}\n\n\
         Search Query Used: {}\n\
         Search Results: {}\n\n\
         Please provide a comprehensive answer based on these search results.",
        question, query_used, results
    )
}
