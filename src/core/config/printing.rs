use crate::core::config::data::{path_display, Config};
use crate::core::config::defaults::{DEFAULT_HISTORY_LIMIT, DEFAULT_MODEL, DEFAULT_SERVER_URL};

fn or_unset<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(unset)".to_string())
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.server_url {
            Some(url) => println!("  server-url: {url}"),
            None => println!("  server-url: (unset, using {DEFAULT_SERVER_URL})"),
        }
        match &self.model {
            Some(model) => println!("  model: {model}"),
            None => println!("  model: (unset, using {DEFAULT_MODEL})"),
        }
        println!("  temperature: {}", or_unset(self.temperature));
        println!("  max-tokens: {}", or_unset(self.max_tokens));
        match self.system_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => println!("  system-prompt: {prompt}"),
            _ => println!("  system-prompt: (unset)"),
        }
        match self.history_limit {
            Some(0) => println!("  history-limit: 0 (no limit)"),
            Some(limit) => println!("  history-limit: {limit}"),
            None => println!("  history-limit: (unset, using {DEFAULT_HISTORY_LIMIT})"),
        }
        println!("  request-timeout: {}", or_unset(self.request_timeout_secs));
        println!(
            "  database-path: {}",
            or_unset(self.database_path.as_ref().map(path_display))
        );
    }
}
