use crate::error::UtilsError;
use crate::oauth::credentials::OAuthCredentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Locates the CLI binary used to drive a refresh when HTTP refresh fails
/// (spec.md §4.D "CLI fallback refresh (used by Qwen)"): configured path,
/// else `PATH` lookup via the `which` crate (grounded in the teacher's use of
/// `which` for its own external-tool discovery in `querymt-utils`), else a
/// fixed list of common install locations including `node-*` dirs under
/// `~/Applications`.
pub fn discover_cli(configured_path: Option<&Path>, binary_name: &str, home: &Path) -> Option<PathBuf> {
    if let Some(path) = configured_path {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }
    if let Ok(found) = which::which(binary_name) {
        return Some(found);
    }
    for candidate in fixed_search_paths(binary_name, home) {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn fixed_search_paths(binary_name: &str, home: &Path) -> Vec<PathBuf> {
    let mut paths = vec![
        home.join(".local/bin").join(binary_name),
        PathBuf::from("/usr/local/bin").join(binary_name),
        PathBuf::from("/opt/homebrew/bin").join(binary_name),
    ];
    let applications = home.join("Applications");
    if let Ok(entries) = std::fs::read_dir(&applications) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("node-") {
                paths.push(entry.path().join("bin").join(binary_name));
            }
        }
    }
    paths
}

#[derive(Debug, Deserialize)]
struct NdjsonMessage {
    #[serde(rename = "type")]
    kind: String,
    subtype: Option<String>,
    #[serde(rename = "is_error")]
    is_error: Option<bool>,
}

/// True iff any line of `output` is a JSON object with
/// `{"type":"result","subtype":"success","is_error":false}`
/// (spec.md §4.D and §8 scenario 4).
fn ndjson_reports_success(output: &str) -> bool {
    output.lines().any(|line| {
        let Ok(msg) = serde_json::from_str::<NdjsonMessage>(line) else {
            return false;
        };
        msg.kind == "result" && msg.subtype.as_deref() == Some("success") && msg.is_error == Some(false)
    })
}

/// Invokes the discovered CLI with a minimal prompt, expecting NDJSON on
/// stdout, then re-reads the credentials file to confirm a non-expired
/// access token before declaring success (spec.md §4.D validation (a)/(b)).
pub async fn invoke_and_validate(
    cli_path: &Path,
    reread: impl std::future::Future<Output = Result<OAuthCredentials, UtilsError>>,
    now_ms: i64,
) -> Result<OAuthCredentials, UtilsError> {
    let output = Command::new(cli_path)
        .arg("--print")
        .arg("refresh oauth credentials")
        .output()
        .await
        .map_err(|e| UtilsError::CliFallback(format!("spawning {}: {e}", cli_path.display())))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !ndjson_reports_success(&stdout) {
        return Err(UtilsError::CliFallback(
            "CLI output did not contain a successful result message".to_string(),
        ));
    }

    let creds = reread.await?;
    if creds.is_expired(now_ms) {
        return Err(UtilsError::CliFallback(
            "credentials file still expired after CLI refresh".to_string(),
        ));
    }
    Ok(creds)
}

/// Retries `invoke_and_validate`-style work with exponential backoff up to
/// `max_retries` (spec.md §4.D "retries with exponential delay up to
/// MaxRetries").
pub async fn with_retries<F, Fut, T>(max_retries: u32, base_delay: Duration, mut attempt: F) -> Result<T, UtilsError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, UtilsError>>,
{
    let mut last_err = None;
    for i in 0..=max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                if i < max_retries {
                    tokio::time::sleep(base_delay * 2u32.pow(i)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| UtilsError::other("retry loop exited with no attempts")))
}
