//! GitHub endpoints and response parsing for the Copilot credential
//! lifecycle.
//!
//! Two token kinds are involved: the long-lived GitHub OAuth token obtained
//! through the device authorization grant, and the short-lived Copilot token
//! minted from it via the internal token exchange. Only the latter is sent
//! to the Copilot API.

use relay_types::{RelayError, Result, UserInfo};
use serde_json::Value;

/// GitHub device code request endpoint.
pub const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";

/// GitHub OAuth token endpoint.
pub const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

/// Exchange endpoint minting the short-lived Copilot token.
pub const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

/// Authenticated user descriptor endpoint.
pub const USER_URL: &str = "https://api.github.com/user";

/// Public OAuth client ID for GitHub Copilot.
pub const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

/// OAuth scopes requested during authorization.
pub const SCOPES: &[&str] = &["read:user"];

/// Parsed response from the device code request.
#[derive(Debug)]
pub struct DeviceCodeResponse {
    /// Unique device verification code.
    pub device_code: String,
    /// Short code the user enters at the verification URI.
    pub user_code: String,
    /// URL where the user authorizes the device.
    pub verification_uri: String,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Minimum polling interval in seconds.
    pub interval: u64,
}

/// Parse the device code endpoint JSON response.
///
/// # Errors
///
/// Returns an error if `device_code` or `user_code` is missing.
pub fn parse_device_code_response(json: &Value) -> Result<DeviceCodeResponse> {
    Ok(DeviceCodeResponse {
        device_code: json
            .get("device_code")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Auth("missing device_code".into()))?
            .to_string(),
        user_code: json
            .get("user_code")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Auth("missing user_code".into()))?
            .to_string(),
        verification_uri: json
            .get("verification_uri")
            .and_then(Value::as_str)
            .unwrap_or("https://github.com/login/device")
            .to_string(),
        expires_in: json
            .get("expires_in")
            .and_then(Value::as_u64)
            .unwrap_or(900),
        interval: json.get("interval").and_then(Value::as_u64).unwrap_or(5),
    })
}

/// Parse the OAuth token endpoint JSON response into the GitHub token.
///
/// # Errors
///
/// Returns an error if the response is missing the `access_token` field.
pub fn parse_access_token_response(json: &Value) -> Result<String> {
    json.get("access_token")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| RelayError::Auth("missing access_token".into()))
}

/// A freshly minted Copilot token.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    /// Seconds since epoch, when the exchange reported one.
    pub expires_at: Option<u64>,
}

/// Mints a short-lived Copilot token from the long-lived GitHub token.
/// `endpoint` is normally [`COPILOT_TOKEN_URL`]; tests and GitHub
/// Enterprise deployments point it elsewhere.
///
/// # Errors
///
/// Returns [`RelayError::Auth`] when the exchange fails or the response
/// carries no token.
pub async fn mint_copilot_token(
    http: &rquest::Client,
    endpoint: &str,
    github_token: &str,
) -> Result<MintedToken> {
    let resp = http
        .get(endpoint)
        .header("Authorization", format!("token {github_token}"))
        .header("Accept", "application/json")
        .header("User-Agent", "copilot-cli/1.0")
        .send()
        .await?;

    let status = resp.status();
    let json: Value = resp
        .json()
        .await
        .map_err(|e| RelayError::Auth(format!("failed to parse token exchange response: {e}")))?;

    if !status.is_success() {
        let msg = json
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(RelayError::Auth(format!(
            "token exchange failed ({status}): {msg}"
        )));
    }

    let token = json
        .get("token")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Auth("token exchange response missing token".into()))?
        .to_string();

    Ok(MintedToken {
        token,
        expires_at: json.get("expires_at").and_then(Value::as_u64),
    })
}

/// Fetches the authenticated user's descriptor.
///
/// # Errors
///
/// Returns [`RelayError::Auth`] when the request fails or carries no login.
pub async fn fetch_user(http: &rquest::Client, github_token: &str) -> Result<UserInfo> {
    let resp = http
        .get(USER_URL)
        .header("Authorization", format!("token {github_token}"))
        .header("Accept", "application/json")
        .header("User-Agent", "copilot-cli/1.0")
        .send()
        .await?;

    let json: Value = resp
        .json()
        .await
        .map_err(|e| RelayError::Auth(format!("failed to parse user response: {e}")))?;

    let login = json
        .get("login")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Auth("user response missing login".into()))?;

    Ok(UserInfo {
        login: login.to_string(),
        name: json
            .get("name")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        email: json
            .get("email")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    })
}
