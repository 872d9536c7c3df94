//! Interactive GitHub device authorization flow.
//!
//! Prints a user code, opens the verification page, polls the token
//! endpoint, then builds and persists a profile with both the long-lived
//! GitHub token and a freshly minted Copilot token.

use crate::github;
use relay_store::ProfileStore;
use relay_types::{Profile, RelayError, Result};
use std::time::Duration;

/// Runs the device flow and persists the resulting profile as active.
///
/// # Errors
///
/// Returns an error when the device code expires, GitHub reports a terminal
/// flow error, or any network/parse step fails.
pub async fn login(store: &ProfileStore, http: &rquest::Client) -> Result<Profile> {
    let github_token = device_authorization(http).await?;

    let user = github::fetch_user(http, &github_token).await?;
    let minted = github::mint_copilot_token(http, github::COPILOT_TOKEN_URL, &github_token).await?;

    let profile =
        Profile::new("github", user, minted.token).with_refresh(github_token);
    store.save_profile(&profile)?;
    store.set_active(&profile.id)?;
    // Re-save so the legacy mirror reflects the now-active profile.
    store.save_profile(&profile)?;

    eprintln!("logged in as {}", profile.user.login);
    Ok(profile)
}

/// Obtains a GitHub OAuth token through the device authorization grant.
async fn device_authorization(http: &rquest::Client) -> Result<String> {
    let scope = github::SCOPES.join(" ");
    let init_params = [("client_id", github::CLIENT_ID), ("scope", scope.as_str())];

    let resp = http
        .post(github::DEVICE_CODE_URL)
        .header("Accept", "application/json")
        .form(&init_params)
        .send()
        .await?;

    let json: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| RelayError::Auth(format!("failed to parse device code response: {e}")))?;
    let dc = github::parse_device_code_response(&json)?;

    eprintln!("Visit: {}", dc.verification_uri);
    eprintln!("Enter verification code: {}", dc.user_code);
    let _ = open::that(&dc.verification_uri);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(dc.expires_in);
    let mut interval = dc.interval;

    loop {
        tokio::time::sleep(Duration::from_secs(interval)).await;

        if tokio::time::Instant::now() >= deadline {
            return Err(RelayError::Auth("device code expired".into()));
        }

        let token_params = [
            ("client_id", github::CLIENT_ID),
            ("device_code", dc.device_code.as_str()),
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
        ];

        let resp = http
            .post(github::ACCESS_TOKEN_URL)
            .header("Accept", "application/json")
            .form(&token_params)
            .send()
            .await?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Auth(format!("failed to parse token response: {e}")))?;

        match json.get("error").and_then(|v| v.as_str()) {
            Some("authorization_pending") => continue,
            Some("slow_down") => {
                interval += 5;
                continue;
            }
            Some(e) => return Err(RelayError::Auth(format!("device flow error: {e}"))),
            None => {}
        }

        return github::parse_access_token_response(&json);
    }
}
