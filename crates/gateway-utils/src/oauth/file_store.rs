use crate::error::UtilsError;
use crate::oauth::credentials::OAuthCredentials;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Which on-disk JSON shape a provider's credential file uses (spec.md §6
/// "OAuth credential file layout"). Grounded in the teacher's
/// `querymt-utils::oauth` provider split (`AnthropicProvider`/`CodexProvider`
/// each owning their own token-file shape), but here the store reads/writes
/// plain files instead of going through a keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileShape {
    /// `~/.claude/.credentials.json`, wrapped under a `claudeAiOauth` key.
    Claude,
    /// `~/.qwen/oauth_creds.json`, flat at the document root.
    Qwen,
}

impl FileShape {
    pub fn default_path(&self, home: &Path) -> PathBuf {
        match self {
            FileShape::Claude => home.join(".claude").join(".credentials.json"),
            FileShape::Qwen => home.join(".qwen").join("oauth_creds.json"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: ClaudeOauthBlock,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeOauthBlock {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(rename = "expiresAt")]
    expires_at: i64,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(rename = "subscriptionType", skip_serializing_if = "Option::is_none")]
    subscription_type: Option<String>,
    #[serde(rename = "rateLimitTier", skip_serializing_if = "Option::is_none")]
    rate_limit_tier: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QwenFile {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    expiry_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
    /// Treated as opaque metadata (spec.md §9 Open Question): carried through
    /// unmodified, never interpreted as a refresh-endpoint hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_url: Option<String>,
}

/// Parses a provider's on-disk JSON into the runtime's shared
/// [`OAuthCredentials`] shape. Any fields the runtime doesn't model (e.g.
/// Claude's `subscriptionType`) round-trip via `misc` so refresh can write
/// them back unmodified, per spec.md §4.D "preserving unrelated fields".
pub fn parse(shape: FileShape, bytes: &[u8]) -> Result<OAuthCredentials, UtilsError> {
    match shape {
        FileShape::Claude => {
            let doc: ClaudeFile = serde_json::from_slice(bytes)?;
            let block = doc.claude_ai_oauth;
            let mut misc = HashMap::new();
            if let Some(sub) = &block.subscription_type {
                misc.insert("subscriptionType".to_string(), serde_json::Value::String(sub.clone()));
            }
            if let Some(tier) = &block.rate_limit_tier {
                misc.insert("rateLimitTier".to_string(), serde_json::Value::String(tier.clone()));
            }
            Ok(OAuthCredentials {
                access_token: block.access_token,
                refresh_token: block.refresh_token,
                id_token: None,
                expires_at: block.expires_at,
                scopes: block.scopes,
                misc,
            })
        }
        FileShape::Qwen => {
            let doc: QwenFile = serde_json::from_slice(bytes)?;
            let mut misc = HashMap::new();
            if let Some(url) = doc.resource_url {
                misc.insert("resource_url".to_string(), serde_json::Value::String(url));
            }
            if let Some(tt) = doc.token_type {
                misc.insert("token_type".to_string(), serde_json::Value::String(tt));
            }
            Ok(OAuthCredentials {
                access_token: doc.access_token,
                refresh_token: doc.refresh_token,
                id_token: doc.id_token,
                expires_at: doc.expiry_date,
                scopes: Vec::new(),
                misc,
            })
        }
    }
}

/// Serializes credentials back into a provider's native file shape,
/// preserving the `misc` passthrough fields captured at parse time.
pub fn serialize(shape: FileShape, creds: &OAuthCredentials) -> Result<Vec<u8>, UtilsError> {
    match shape {
        FileShape::Claude => {
            let subscription_type = creds
                .misc
                .get("subscriptionType")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let rate_limit_tier = creds
                .misc
                .get("rateLimitTier")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let doc = ClaudeFile {
                claude_ai_oauth: ClaudeOauthBlock {
                    access_token: creds.access_token.clone(),
                    refresh_token: creds.refresh_token.clone(),
                    expires_at: creds.expires_at,
                    scopes: creds.scopes.clone(),
                    subscription_type,
                    rate_limit_tier,
                },
            };
            Ok(serde_json::to_vec_pretty(&doc)?)
        }
        FileShape::Qwen => {
            let resource_url = creds
                .misc
                .get("resource_url")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let token_type = creds
                .misc
                .get("token_type")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let doc = QwenFile {
                access_token: creds.access_token.clone(),
                refresh_token: creds.refresh_token.clone(),
                id_token: creds.id_token.clone(),
                expiry_date: creds.expires_at,
                token_type,
                resource_url,
            };
            Ok(serde_json::to_vec_pretty(&doc)?)
        }
    }
}

/// Reads and parses a provider's credential file.
pub async fn read(shape: FileShape, path: &Path) -> Result<OAuthCredentials, UtilsError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| UtilsError::Io(format!("reading {}: {e}", path.display())))?;
    parse(shape, &bytes)
}

/// Atomically rewrites a provider's credential file: write to a sibling temp
/// file, `fsync`, then rename over the target (spec.md §4.D "atomically
/// rewrite"), with mode 0600 per spec.md §6.
pub async fn write_atomic(shape: FileShape, path: &Path, creds: &OAuthCredentials) -> Result<(), UtilsError> {
    let bytes = serialize(shape, creds)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| UtilsError::Io(format!("creating {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| UtilsError::Io(format!("writing {}: {e}", tmp_path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| UtilsError::Io(format!("chmod {}: {e}", tmp_path.display())))?;
    }
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| UtilsError::Io(format!("renaming into {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_round_trips_unrelated_fields() {
        let bytes = br#"{"claudeAiOauth":{"accessToken":"a","refreshToken":"r","expiresAt":1000,"scopes":["x"],"subscriptionType":"pro","rateLimitTier":"tier1"}}"#;
        let creds = parse(FileShape::Claude, bytes).unwrap();
        assert_eq!(creds.access_token, "a");
        assert_eq!(creds.misc.get("subscriptionType").unwrap(), "pro");

        let out = serialize(FileShape::Claude, &creds).unwrap();
        let reparsed = parse(FileShape::Claude, &out).unwrap();
        assert_eq!(reparsed.misc.get("subscriptionType").unwrap(), "pro");
        assert_eq!(reparsed.misc.get("rateLimitTier").unwrap(), "tier1");
    }

    #[test]
    fn qwen_resource_url_is_opaque_passthrough() {
        let bytes = br#"{"access_token":"a","refresh_token":"r","expiry_date":2000,"token_type":"Bearer","resource_url":"https://example.test"}"#;
        let creds = parse(FileShape::Qwen, bytes).unwrap();
        assert_eq!(creds.misc.get("resource_url").unwrap(), "https://example.test");

        let out = serialize(FileShape::Qwen, &creds).unwrap();
        let reparsed = parse(FileShape::Qwen, &out).unwrap();
        assert_eq!(reparsed.misc.get("resource_url").unwrap(), "https://example.test");
    }
}
