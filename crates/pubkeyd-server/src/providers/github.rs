//! GitHub public key source.
//!
//! Keys are served at `https://github.com/{login}.keys` as one OpenSSH public
//! key per line. The body is not parsed beyond dropping blank lines.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use pubkeyd_core::{KeyFetcher, ProviderError};
use regex::Regex;
use url::Url;

use crate::config::KeysConfig;

use super::{classify, http_client};

/// Longest GitHub login.
const MAX_LOGIN_LEN: usize = 39;

// Alphanumerics separated by single hyphens, no leading hyphen. Legacy
// logins may end in one hyphen.
static GITHUB_LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z\d](?:-?[a-z\d])*-?$").expect("Invalid GitHub login regex")
});

/// Whether `alias` is a syntactically valid GitHub login.
pub fn is_valid_login(alias: &str) -> bool {
    !alias.is_empty()
        && alias.len() <= MAX_LOGIN_LEN
        && GITHUB_LOGIN.is_match(&alias.to_ascii_lowercase())
}

/// Normalize a `.keys` body: blank lines dropped, every line newline-terminated.
pub fn normalize_keys(body: &str) -> String {
    let mut keys = String::with_capacity(body.len() + 1);
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        keys.push_str(line);
        keys.push('\n');
    }
    keys
}

/// Fetches `authorized_keys` text for a GitHub login.
pub struct GitHubKeys {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl GitHubKeys {
    pub fn new(config: &KeysConfig) -> Result<Self, ProviderError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| ProviderError::Configuration(format!("invalid keys base url: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: http_client(config.timeout())?,
            base_url,
            timeout: config.timeout(),
        })
    }

    fn keys_url(&self, alias: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(&format!("{alias}.keys"))
            .map_err(|e| ProviderError::InvalidAlias(format!("{alias}: {e}")))
    }
}

#[async_trait]
impl KeyFetcher for GitHubKeys {
    async fn fetch_keys(&self, alias: &str) -> Result<String, ProviderError> {
        if !is_valid_login(alias) {
            return Err(ProviderError::InvalidAlias(alias.to_string()));
        }
        let url = self.keys_url(alias)?;
        tracing::debug!(alias, url = %url, "Fetching public keys");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(alias, status = status.as_u16(), "Public key source returned an error");
            return Err(ProviderError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify(e, self.timeout))?;
        Ok(normalize_keys(&body))
    }
}
