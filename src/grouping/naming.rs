//! Group naming
//!
//! Names come from an optional [`NamingDelegate`]. Whatever it returns is
//! normalized into a single filesystem-safe path component; blank or
//! failed suggestions fall back to `Group_<index>`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Suggests a human-readable label for a set of folder names
#[async_trait]
pub trait NamingDelegate: Send + Sync {
    async fn suggest(&self, folder_names: &[String]) -> Option<String>;
}

/// Names groups through a llama.cpp-compatible `/completion` endpoint
pub struct LlmNamer {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: String,
    n_predict: u32,
    temperature: f32,
    stop: [&'a str; 1],
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

impl LlmNamer {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn prompt(folder_names: &[String]) -> String {
        format!(
            "Folders: {}\nGive one short category name (1-3 words) for all of these folders.\nCategory:",
            folder_names.join(", ")
        )
    }

    async fn complete(&self, folder_names: &[String]) -> Result<String, String> {
        let url = format!("{}/completion", self.endpoint.trim_end_matches('/'));
        let request = CompletionRequest {
            prompt: Self::prompt(folder_names),
            n_predict: 20,
            temperature: 0.2,
            stop: ["\n"],
        };

        let resp = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("API error ({}): {}", status, text));
        }

        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e))?;
        Ok(body.content.lines().next().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl NamingDelegate for LlmNamer {
    async fn suggest(&self, folder_names: &[String]) -> Option<String> {
        match self.complete(folder_names).await {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!("[Grouping] Naming request failed: {}", e);
                None
            }
        }
    }
}

/// Turn a suggestion into a single path component; blank gives `None`
///
/// Every space, hyphen and path separator becomes one `_`. Surrounding
/// quotes and trailing punctuation that models like to add are dropped.
pub fn normalize_group_name(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_end_matches(['.', ':', ';', ','])
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(['.', ':', ';', ','])
        .trim();

    let name: String = trimmed
        .chars()
        .filter(|c| c.is_whitespace() || !c.is_control())
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '-' | '/' | '\\' => '_',
            c => c,
        })
        .collect();

    if name.is_empty() || name.chars().all(|c| c == '_' || c == '.') {
        None
    } else {
        Some(name)
    }
}

/// Name for the group at `index`
pub fn fallback_name(index: usize) -> String {
    format!("Group_{}", index)
}
