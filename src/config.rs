use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::transport::Provider;

/// A credential or private URL. Prints as `***`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// On-disk configuration (`config.toml`). Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub provider: Option<Provider>,
    pub model: Option<String>,

    /// Base URL of the HTTP/SSE backend, e.g. `http://localhost:3001`.
    pub base_url: Option<String>,

    /// WebSocket stream URL; the WebSocket tier is skipped when unset.
    pub ws_url: Option<String>,

    /// Use the GET (EventSource-style) SSE adapter; `false` selects POST.
    pub event_source: Option<bool>,

    /// Abort a tier that stays silent this long and fall back.
    pub idle_timeout_secs: Option<u64>,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenAiConfig {
    pub api_key: Option<Secret>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OllamaConfig {
    pub base_url: Option<String>,
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

/// Provider base URLs forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseUrlOverrides {
    pub openai: Option<Secret>,
    pub ollama: Option<Secret>,
}

/// Resolved, read-only provider settings for requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider: Provider,
    pub model: String,
    pub base_url_overrides: BaseUrlOverrides,
    pub api_key: Option<Secret>,
}

impl Default for Settings {
    fn default() -> Self {
        let provider = Provider::default();
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url_overrides: BaseUrlOverrides::default(),
            api_key: None,
        }
    }
}

impl Settings {
    /// Headers understood by the backend, for the selected provider only.
    pub fn auth_headers(&self) -> Vec<(&'static str, Secret)> {
        let mut headers = Vec::new();
        match self.provider {
            Provider::Openai => {
                if let Some(key) = self.api_key.as_ref().filter(|k| !k.expose().is_empty()) {
                    headers.push(("X-OpenAI-Key", key.clone()));
                }
                if let Some(url) = &self.base_url_overrides.openai {
                    headers.push(("X-OpenAI-Base-URL", url.clone()));
                }
            }
            Provider::Ollama => {
                if let Some(url) = &self.base_url_overrides.ollama {
                    headers.push(("X-Ollama-Base", url.clone()));
                }
            }
        }
        headers
    }
}
