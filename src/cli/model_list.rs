//! Model listing functionality

use crate::api::models::{fetch_models, sort_models};
use crate::core::chat_stream::ChatClient;
use crate::core::config::AppSettings;
use chrono::{DateTime, Utc};
use std::error::Error;

pub async fn list_models(settings: &AppSettings) -> Result<(), Box<dyn Error>> {
    println!("🤖 Available Models at {}", settings.server_url);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("🎯 Configured model: {}", settings.model);
    println!();

    let client = ChatClient::new()?;
    let models_response = fetch_models(client.http(), &settings.server_url).await?;

    if models_response.data.is_empty() {
        println!("No models found on this server.");
        return Ok(());
    }

    println!(
        "Found {} models (sorted newest first):",
        models_response.data.len()
    );
    println!();

    let mut models = models_response.data;
    sort_models(&mut models);

    for model in models {
        println!("  • {}", model.id);
        if let Some(owned_by) = &model.owned_by {
            if !owned_by.is_empty() && owned_by != "system" {
                println!("    Owner: {owned_by}");
            }
        }
        if let Some(created) = model.created.filter(|created| *created > 0) {
            // Some servers report milliseconds
            let timestamp_secs = if created > 10_000_000_000 {
                created / 1000
            } else {
                created
            };
            if let Some(dt) = DateTime::<Utc>::from_timestamp(timestamp_secs as i64, 0) {
                println!("    Created: {}", dt.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        println!();
    }

    Ok(())
}
