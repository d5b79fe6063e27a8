use anyhow::Context;
use clap::ValueEnum;
use reqwest::Url;
use std::time::Duration;

use crate::cli::Args;
use sitegen::config::{BaseUrlOverrides, Config, Secret, Settings};
use sitegen::{Orchestrator, Provider, TransportPlan};

/// Pause between locally generated sections, so the progress output reads
/// like a stream.
const LOCAL_PACING: Duration = Duration::from_millis(40);

/// Everything the binary needs, resolved as CLI > env > file > default.
#[derive(Debug)]
pub struct Resolved {
    pub settings: Settings,
    pub plan: TransportPlan,
}

pub fn resolve(
    args: &Args,
    cfg: Option<&Config>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Resolved> {
    let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    let provider = match args.provider {
        Some(p) => p,
        None => match env("SITEGEN_PROVIDER") {
            Some(name) => Provider::from_str(&name, true)
                .map_err(|_| anyhow::anyhow!("unknown provider in SITEGEN_PROVIDER: {name}"))?,
            None => cfg.and_then(|c| c.provider).unwrap_or_default(),
        },
    };

    let model = args
        .model
        .clone()
        .or_else(|| env("SITEGEN_MODEL"))
        .or_else(|| cfg.and_then(|c| c.model.clone()))
        .unwrap_or_else(|| provider.default_model().to_string());

    let api_key = env("OPENAI_API_KEY")
        .map(Secret::new)
        .or_else(|| cfg.and_then(|c| c.openai.api_key.clone()));

    let base_url_overrides = BaseUrlOverrides {
        openai: env("OPENAI_BASE_URL")
            .or_else(|| cfg.and_then(|c| c.openai.base_url.clone()))
            .map(Secret::new),
        ollama: env("OLLAMA_BASE_URL")
            .or_else(|| cfg.and_then(|c| c.ollama.base_url.clone()))
            .map(Secret::new),
    };

    let (base_url, ws_url) = if args.offline {
        (None, None)
    } else {
        let base = args
            .base_url
            .clone()
            .or_else(|| env("SITEGEN_BASE_URL"))
            .or_else(|| cfg.and_then(|c| c.base_url.clone()));
        let ws = args
            .ws_url
            .clone()
            .or_else(|| env("SITEGEN_WS_URL"))
            .or_else(|| cfg.and_then(|c| c.ws_url.clone()));
        (
            base.as_deref().map(|u| parse_url(u, &["http", "https"])).transpose()?,
            ws.as_deref().map(|u| parse_url(u, &["ws", "wss"])).transpose()?,
        )
    };

    let event_source = !args.no_event_source && cfg.and_then(|c| c.event_source).unwrap_or(true);

    let idle_timeout = args
        .idle_timeout
        .or_else(|| cfg.and_then(|c| c.idle_timeout_secs))
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(Resolved {
        settings: Settings {
            provider,
            model,
            base_url_overrides,
            api_key,
        },
        plan: TransportPlan {
            base_url,
            ws_url,
            event_source,
            idle_timeout,
            local_pacing: LOCAL_PACING,
        },
    })
}

fn parse_url(raw: &str, schemes: &[&str]) -> anyhow::Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid URL: {raw}"))?;
    if !schemes.contains(&url.scheme()) {
        anyhow::bail!("unsupported scheme in {raw}, expected one of: {}", schemes.join(", "));
    }
    Ok(url)
}

pub fn build_orchestrator(http: &reqwest::Client, resolved: Resolved) -> Orchestrator {
    let orch = Orchestrator::new(http.clone(), resolved.settings, &resolved.plan);
    tracing::debug!(tiers = ?orch.tiers(), "transport chain");
    orch
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["sitegen"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_anything() {
        let r = resolve(&args(&["hi"]), None, env_of(&[])).unwrap();
        assert_eq!(r.settings, Settings::default());
        assert!(r.plan.base_url.is_none());
        assert!(r.plan.ws_url.is_none());
        assert!(r.plan.event_source);
        assert!(r.plan.idle_timeout.is_none());
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let cfg = Config {
            provider: Some(Provider::Ollama),
            model: Some("file-model".into()),
            base_url: Some("http://file:1".into()),
            idle_timeout_secs: Some(9),
            event_source: Some(true),
            ..Config::default()
        };
        let env = env_of(&[
            ("SITEGEN_PROVIDER", "openai"),
            ("SITEGEN_MODEL", "env-model"),
            ("SITEGEN_BASE_URL", "http://env:2"),
            ("OPENAI_API_KEY", "sk-env"),
        ]);

        let r = resolve(&args(&["hi"]), Some(&cfg), &env).unwrap();
        assert_eq!(r.settings.provider, Provider::Openai);
        assert_eq!(r.settings.model, "env-model");
        assert_eq!(r.plan.base_url.unwrap().as_str(), "http://env:2/");
        assert_eq!(r.settings.api_key.as_ref().map(Secret::expose), Some("sk-env"));
        assert_eq!(r.plan.idle_timeout, Some(Duration::from_secs(9)));

        let r = resolve(
            &args(&["-m", "cli-model", "--base-url", "http://cli:3", "--no-event-source", "hi"]),
            Some(&cfg),
            &env,
        )
        .unwrap();
        assert_eq!(r.settings.model, "cli-model");
        assert_eq!(r.plan.base_url.unwrap().as_str(), "http://cli:3/");
        assert!(!r.plan.event_source);
    }

    #[test]
    fn model_defaults_follow_provider() {
        let r = resolve(&args(&["--provider", "openai", "hi"]), None, env_of(&[])).unwrap();
        assert_eq!(r.settings.model, "gpt-4o-mini");
    }

    #[test]
    fn offline_drops_backends() {
        let env = env_of(&[("SITEGEN_BASE_URL", "http://env:2"), ("SITEGEN_WS_URL", "ws://env:2/ws")]);
        let r = resolve(&args(&["--offline", "hi"]), None, env).unwrap();
        assert!(r.plan.base_url.is_none());
        assert!(r.plan.ws_url.is_none());
    }

    #[test]
    fn rejects_bad_urls_and_providers() {
        assert!(resolve(&args(&["--base-url", "ws://x", "hi"]), None, env_of(&[])).is_err());
        assert!(resolve(&args(&["--ws-url", "not a url", "hi"]), None, env_of(&[])).is_err());
        assert!(resolve(&args(&["hi"]), None, env_of(&[("SITEGEN_PROVIDER", "gemini")])).is_err());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let cfg = Config {
            model: Some("file-model".into()),
            ..Config::default()
        };
        let r = resolve(&args(&["hi"]), Some(&cfg), env_of(&[("SITEGEN_MODEL", "  ")])).unwrap();
        assert_eq!(r.settings.model, "file-model");
    }
}
