//! Ambient Google credentials: whatever the environment already provides.

use gcp_auth::TokenProvider;
use reqwest::blocking::Client;
use reqwest::header;
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::bigquery::QueryError;

pub const TOKEN_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const KEY_FILE_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Clone)]
pub struct Credentials {
    access_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// The two kinds of application default credentials file gcloud and the
/// console hand out.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KeyFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    ServiceAccount {
        client_email: String,
    },
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl Credentials {
    /// Look for an access token in the environment variable, then the
    /// application default credentials file, then the gcloud login, then
    /// the GCE metadata server.
    pub fn from_environment() -> Result<Self, QueryError> {
        Self::resolve(env_var, application_default_token, gcloud_token, metadata_token)
    }

    fn resolve<E, K, G, M>(env: E, key_file: K, gcloud: G, metadata: M) -> Result<Self, QueryError>
    where
        E: Fn(&str) -> Option<String>,
        K: FnOnce() -> Option<String>,
        G: FnOnce() -> Option<String>,
        M: FnOnce() -> Option<String>,
    {
        let access_token = usable(env(TOKEN_VAR), TOKEN_VAR)
            .or_else(|| usable(key_file(), "credentials file"))
            .or_else(|| usable(gcloud(), "gcloud"))
            .or_else(|| usable(metadata(), "metadata server"))
            .ok_or(QueryError::Credentials)?;
        Ok(Self::from_token(access_token))
    }

    pub fn from_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

fn usable(token: Option<String>, source: &str) -> Option<String> {
    match token.map(|t| t.trim().to_string()) {
        Some(t) if !t.is_empty() => {
            debug!("using access token from {source}");
            Some(t)
        }
        _ => {
            debug!("no access token from {source}");
            None
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// `GOOGLE_APPLICATION_CREDENTIALS` if set, otherwise gcloud's well-known
/// file when it exists.
fn key_file_path<E>(env: &E, home: Option<PathBuf>) -> Option<PathBuf>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(path) = env(KEY_FILE_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let config = if cfg!(windows) {
        PathBuf::from(env("APPDATA")?)
    } else {
        home?.join(".config")
    };
    let path = config
        .join("gcloud")
        .join("application_default_credentials.json");
    path.is_file().then_some(path)
}

fn application_default_token() -> Option<String> {
    let path = key_file_path(&env_var, dirs::home_dir())?;
    match key_file_token(&path) {
        Ok(token) => Some(token),
        Err(err) => {
            warn!("can't use credentials in {}: {err}", path.display());
            None
        }
    }
}

fn key_file_token(path: &Path) -> Result<String, Box<dyn Error + Send + Sync>> {
    let contents = fs::read_to_string(path)?;
    match serde_json::from_str::<KeyFile>(&contents)? {
        KeyFile::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
            token_uri,
        } => {
            let resp = Client::new()
                .post(token_uri)
                .json(&json!({
                    "client_id": client_id,
                    "client_secret": client_secret,
                    "refresh_token": refresh_token,
                    "grant_type": "refresh_token",
                }))
                .send()?
                .error_for_status()?
                .json::<TokenResponse>()?;
            Ok(resp.access_token)
        }
        KeyFile::ServiceAccount { client_email } => {
            debug!("signing in as {client_email}");
            let account = gcp_auth::CustomServiceAccount::from_json(&contents)?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let token = runtime.block_on(account.token(&[BIGQUERY_SCOPE]))?;
            Ok(token.as_str().to_string())
        }
    }
}

fn gcloud_token() -> Option<String> {
    let output = Command::new("gcloud")
        .args(["auth", "application-default", "print-access-token"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

fn metadata_token() -> Option<String> {
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .ok()?;
    client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .header(header::ACCEPT, "application/json")
        .send()
        .ok()?
        .error_for_status()
        .ok()?
        .json::<TokenResponse>()
        .ok()
        .map(|t| t.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_variable_comes_first() {
        let creds = Credentials::resolve(
            |name| (name == TOKEN_VAR).then(|| "from-env\n".to_string()),
            || panic!("credentials file should not be read"),
            || panic!("gcloud should not be asked"),
            || panic!("metadata server should not be asked"),
        )
        .unwrap();
        assert_eq!(creds.bearer(), "Bearer from-env");
    }

    #[test]
    fn credentials_file_comes_before_gcloud_and_metadata_server() {
        let creds = Credentials::resolve(
            |_| None,
            || Some("ya29.from-file".to_string()),
            || panic!("gcloud should not be asked"),
            || panic!("metadata server should not be asked"),
        )
        .unwrap();
        assert_eq!(creds.bearer(), "Bearer ya29.from-file");
    }

    #[test]
    fn blank_sources_are_skipped() {
        let creds = Credentials::resolve(
            |_| Some("  ".to_string()),
            || None,
            || None,
            || Some("ya29.meta".to_string()),
        )
        .unwrap();
        assert_eq!(creds.bearer(), "Bearer ya29.meta");
    }

    #[test]
    fn no_source_is_an_error() {
        let result = Credentials::resolve(|_| None, || None, || None, || None);
        assert!(matches!(result, Err(QueryError::Credentials)));
    }

    #[test]
    fn explicit_key_file_wins_over_well_known_file() {
        let home = tempfile::tempdir().unwrap();
        let path = key_file_path(
            &|name: &str| (name == KEY_FILE_VAR).then(|| "/etc/gcp/key.json".to_string()),
            Some(home.path().to_path_buf()),
        );
        assert_eq!(path, Some(PathBuf::from("/etc/gcp/key.json")));
    }

    #[cfg(not(windows))]
    #[test]
    fn well_known_file_is_used_when_present() {
        let home = tempfile::tempdir().unwrap();
        let no_env = |_: &str| None;
        assert_eq!(key_file_path(&no_env, Some(home.path().to_path_buf())), None);

        let gcloud = home.path().join(".config").join("gcloud");
        fs::create_dir_all(&gcloud).unwrap();
        let file = gcloud.join("application_default_credentials.json");
        fs::write(&file, "{}").unwrap();
        assert_eq!(
            key_file_path(&no_env, Some(home.path().to_path_buf())),
            Some(file)
        );
    }

    #[test]
    fn parses_both_kinds_of_key_file() {
        let user = serde_json::from_str::<KeyFile>(
            r#"{"type": "authorized_user", "client_id": "id", "client_secret": "secret",
                "refresh_token": "1//refresh", "quota_project_id": "my-project"}"#,
        )
        .unwrap();
        assert_eq!(
            user,
            KeyFile::AuthorizedUser {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                refresh_token: "1//refresh".to_string(),
                token_uri: default_token_uri(),
            }
        );

        let account = serde_json::from_str::<KeyFile>(
            r#"{"type": "service_account", "project_id": "my-project",
                "private_key_id": "abc", "client_email": "bot@my-project.iam.gserviceaccount.com",
                "token_uri": "https://oauth2.googleapis.com/token"}"#,
        )
        .unwrap();
        assert_eq!(
            account,
            KeyFile::ServiceAccount {
                client_email: "bot@my-project.iam.gserviceaccount.com".to_string(),
            }
        );
    }

    #[test]
    fn unreadable_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(key_file_token(&dir.path().join("missing.json")).is_err());

        let bogus = dir.path().join("bogus.json");
        fs::write(&bogus, r#"{"type": "external_account"}"#).unwrap();
        assert!(key_file_token(&bogus).is_err());
    }

    #[test]
    fn debug_hides_the_token() {
        let creds = Credentials::from_token("secret");
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
