// Library interface for mailscope modules
// This allows tests and the auxiliary binaries to import modules

pub mod capability;
pub mod chunker;
pub mod cleaner;
pub mod evaluation;
pub mod fallback;
pub mod language;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod registry;
pub mod reply;
pub mod sentiment;
pub mod server;
pub mod storage;
pub mod summarizer;
pub mod tokenizer;
