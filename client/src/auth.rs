//! One-shot authentication and the on-disk credential store.
//!
//! The token is exchanged with the relay exactly once via `tunlink auth`;
//! sessions only ever read the stored copy. There is no refresh.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::info;

const TOKEN_DIR: &str = ".tunlink";
const TOKEN_FILE: &str = "token";

/// Validate the token against the relay and persist it on success.
///
/// Anything other than HTTP 200 leaves the store untouched.
pub async fn authorize(api_url: &str, token: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/auth", api_url))
        .json(&json!({ "token": token }))
        .send()
        .await
        .context("Failed to reach the authentication endpoint")?;

    if response.status().is_success() {
        let path = store_token(token)?;
        info!("Authenticated, token saved to {}", path.display());
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        bail!("Authentication failed, server response: {}", body);
    }
}

/// Load the stored token.
pub fn load_token() -> Result<String> {
    let path = token_path()?;
    let token = fs::read_to_string(&path).with_context(|| {
        format!(
            "No token at {}; run `tunlink auth <token>` first",
            path.display()
        )
    })?;
    Ok(token.trim().to_string())
}

fn store_token(token: &str) -> Result<PathBuf> {
    let path = token_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(&path, token).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn token_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(TOKEN_DIR).join(TOKEN_FILE))
}
