//! Threadline is a terminal chat client for OpenAI-compatible completion
//! servers that keeps every conversation thread in a local database.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the message model, the streaming transport, the
//!   self-repairing thread store and the conversation runtime that ties
//!   them together.
//! - [`api`] defines the chat and model payloads exchanged with the server.
//! - [`cli`] parses arguments and runs the interactive chat loop.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
