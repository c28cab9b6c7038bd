// Library interface for socialscope modules
// This allows tests and the binaries to import modules

pub mod discovery;
pub mod error;
pub mod image;
pub mod llm;
pub mod pipeline;
pub mod scraping;
pub mod server;
pub mod synthesis;
