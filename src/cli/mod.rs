//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod model_list;
pub mod repl;
pub mod thread_list;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::model_list::list_models;
use crate::cli::repl::run_chat;
use crate::cli::thread_list::list_threads;
use crate::core::chat_stream::{ChatClient, ChatError, CompletionBackend};
use crate::core::config::{AppSettings, Config};
use crate::core::message::Message;

#[derive(Parser)]
#[command(name = "threadline", version)]
#[command(about = "A terminal chat client that keeps every conversation thread on disk")]
#[command(
    long_about = "Threadline talks to an OpenAI-compatible chat completion server, streams \
answers as they are generated and stores every thread in a local SQLite database.\n\n\
Environment Variables:\n\
  THREADLINE_SERVER_URL   Base URL of the completion server\n\
  THREADLINE_MODEL        Model identifier sent with each request\n\
  RUST_LOG                Log filter (overrides -v)\n\n\
Chat commands:\n\
  /new              Start a new thread\n\
  /threads          List threads\n\
  /switch N         Switch to thread N\n\
  /delete N         Delete thread N\n\
  /clear            Remove every message from the current thread\n\
  /retry            Ask again for the last answer\n\
  /cancel           Stop the answer being streamed\n\
  /help             Show this list\n\
  /quit             Leave"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to request (overrides config and environment)
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Base URL of the completion server
    #[arg(short = 's', long, global = true, value_name = "URL")]
    pub server_url: Option<String>,

    /// Path of the thread database
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat,
    /// List stored threads
    Threads,
    /// List models offered by the server
    Models,
    /// Ask a single question without streaming or storing it
    Ask {
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Show the current configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("threadline={level}")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .ok();
}

/// Resolve settings from the config file, environment and flags, in that
/// order of increasing precedence.
fn resolve_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::load()?.with_env_overrides();
    if let Some(url) = args.server_url.clone() {
        config.server_url = Some(url);
    }
    if let Some(model) = args.model.clone() {
        config.model = Some(model);
    }
    if let Some(db) = args.db.clone() {
        config.database_path = Some(db);
    }
    Ok(config)
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Some(Commands::Set { ref key, ref value }) => {
            let mut config = Config::load()?;
            config.set_value(key, &value.join(" "))?;
            config.save()?;
            println!("✅ Set {key}");
            Ok(())
        }
        Some(Commands::Unset { ref key }) => {
            let mut config = Config::load()?;
            config.unset_value(key)?;
            config.save()?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Some(Commands::Config) => {
            let config = resolve_config(&args)?;
            config.print_all();
            println!();
            println!(
                "Config file: {}",
                crate::core::config::path_display(Config::get_config_path()?)
            );
            Ok(())
        }
        Some(Commands::Models) => {
            let settings = resolve_config(&args)?.to_settings();
            list_models(&settings).await
        }
        Some(Commands::Threads) => {
            let config = resolve_config(&args)?;
            list_threads(config.database_path()?)
        }
        Some(Commands::Ask { ref prompt }) => {
            let settings = resolve_config(&args)?.to_settings();
            let backend: Arc<dyn CompletionBackend> = Arc::new(ChatClient::new()?);
            let answer = ask(backend, &settings, &prompt.join(" ")).await?;
            println!("{answer}");
            Ok(())
        }
        Some(Commands::Chat) | None => {
            let config = resolve_config(&args)?;
            run_chat(config.to_settings(), config.database_path()?).await
        }
    }
}

/// One non-streamed answer to `prompt`, outside any thread.
pub async fn ask(
    backend: Arc<dyn CompletionBackend>,
    settings: &AppSettings,
    prompt: &str,
) -> Result<String, ChatError> {
    backend.complete(vec![Message::user(prompt)], settings).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::utils::test_utils::ScriptedBackend;

    #[tokio::test]
    async fn ask_sends_the_prompt_as_one_user_message() {
        let backend = ScriptedBackend::new();
        backend.expect_answer(Ok("A monad is a monoid.".to_string()));

        let answer = ask(backend.clone(), &AppSettings::default(), "What is a monad?")
            .await
            .expect("answer");
        assert_eq!(answer, "A monad is a monoid.");

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].len(), 1);
        assert_eq!(requests[0][0].role, Role::User);
        assert_eq!(requests[0][0].content, "What is a monad?");
    }

    #[tokio::test]
    async fn ask_surfaces_backend_errors() {
        let backend = ScriptedBackend::new();
        backend.expect_answer(Err(ChatError::Server {
            status: 503,
            body: "busy".to_string(),
        }));

        let error = ask(backend, &AppSettings::default(), "Hello")
            .await
            .expect_err("server error");
        assert!(matches!(error, ChatError::Server { status: 503, .. }));
    }
}
