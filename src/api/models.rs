use crate::api::{ModelInfo, ModelsResponse};
use crate::core::chat_stream::ChatError;
use crate::utils::url::parse_api_url;

/// List the models a server exposes. Doubles as a reachability check.
pub async fn fetch_models(
    client: &reqwest::Client,
    server_url: &str,
) -> Result<ModelsResponse, ChatError> {
    let models_url = parse_api_url(server_url, "models")?;
    let response = client
        .get(models_url)
        .header("Content-Type", "application/json")
        .send()
        .await
        .map_err(ChatError::from_transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(ChatError::Server {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await.map_err(ChatError::from_transport)?;
    serde_json::from_str(&body).map_err(ChatError::from_decode)
}

pub fn sort_models(models: &mut [ModelInfo]) {
    // Newest first when the server reports creation times, then by id
    models.sort_by(|a, b| match (a.created, b.created) {
        (Some(a_created), Some(b_created)) => {
            b_created.cmp(&a_created).then_with(|| a.id.cmp(&b.id))
        }
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
}
