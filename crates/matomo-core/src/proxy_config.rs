//! Build-time configuration of the same-origin collector proxy.
//!
//! [`with_matomo_proxy`] resolves an opaque proxy path for an upstream
//! collector URL. [`MatomoProxy::wrap`] then merges the rewrite rule and the
//! env values into a host config, leaving everything else as it was.

use crate::config::{
    ConfigError, JS_TRACKER_FILE_ENV, PHP_TRACKER_FILE_ENV, PROXY_PATH_ENV, PROXY_SITE_ID_ENV,
    PROXY_TARGET_ENV,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const PROXY_PATH_PREFIX: &str = "/mtm-";
pub const DEFAULT_HANDLER_ROUTE: &str = "/api/__mp";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyPathStrategy {
    /// Same upstream URL, same path.
    #[default]
    Hashed,
    /// New path on every build.
    Random,
}

impl FromStr for ProxyPathStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashed" | "hash" | "deterministic" => Ok(Self::Hashed),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown proxy path strategy '{other}'")),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sha256_hex(input: &str) -> String {
    hex(&Sha256::digest(input.as_bytes()))
}

/// `/mtm-` followed by 8 hex chars of the SHA-256 of `url`.
pub fn generate_proxy_path(url: &str) -> String {
    let digest = sha256_hex(url.trim_end_matches('/'));
    format!("{PROXY_PATH_PREFIX}{}", &digest[..8])
}

/// `/mtm-` followed by 8 random hex chars.
pub fn random_proxy_path() -> String {
    let bytes: [u8; 4] = rand::random();
    format!("{PROXY_PATH_PREFIX}{}", hex(&bytes))
}

/// Opaque root-level names standing in for the JS loader and the tracking
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueAssets {
    pub js_tracker_file: String,
    pub php_tracker_file: String,
}

/// Derives the opaque asset names from `seed` (the proxy path).
pub fn opaque_asset_names(seed: &str) -> OpaqueAssets {
    let digest = sha256_hex(&format!("{seed}#assets"));
    OpaqueAssets {
        js_tracker_file: format!("s{}.js", &digest[..10]),
        php_tracker_file: format!("t{}", &digest[10..20]),
    }
}

/// One rewrite rule. Conditions such as `has`, `missing`, `basePath` or
/// `locale` ride along in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewrite {
    pub source: String,
    pub destination: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhasedRewrites {
    #[serde(default)]
    pub before_files: Vec<Rewrite>,
    #[serde(default)]
    pub after_files: Vec<Rewrite>,
    #[serde(default)]
    pub fallback: Vec<Rewrite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rewrites {
    List(Vec<Rewrite>),
    Phased(PhasedRewrites),
}

/// The host application's build config. Only the keys the proxy touches are
/// typed; the rest round-trips through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub server_runtime_config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrites: Option<Rewrites>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HostConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatomoProxyOptions {
    pub matomo_url: String,
    pub proxy_path: Option<String>,
    pub site_id: Option<String>,
    pub strategy: ProxyPathStrategy,
    pub handler_route: String,
    pub js_tracker_file: Option<String>,
    pub php_tracker_file: Option<String>,
}

impl MatomoProxyOptions {
    pub fn new(matomo_url: impl Into<String>) -> Self {
        Self {
            matomo_url: matomo_url.into(),
            proxy_path: None,
            site_id: None,
            strategy: ProxyPathStrategy::default(),
            handler_route: DEFAULT_HANDLER_ROUTE.to_string(),
            js_tracker_file: None,
            php_tracker_file: None,
        }
    }
}

/// A resolved proxy: one path, one upstream, one pair of asset names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatomoProxy {
    target: String,
    proxy_path: String,
    site_id: Option<String>,
    handler_route: String,
    assets: OpaqueAssets,
}

fn normalize_path(path: &str) -> Result<String, ConfigError> {
    let trimmed = path.trim().trim_end_matches('/');
    let normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    if normalized.len() < 2 || normalized.contains(['?', '#', ' ']) {
        return Err(ConfigError::InvalidProxyPath(path.to_string()));
    }
    Ok(normalized)
}

pub fn with_matomo_proxy(options: MatomoProxyOptions) -> Result<MatomoProxy, ConfigError> {
    let target = options.matomo_url.trim().trim_end_matches('/').to_string();
    if target.is_empty() {
        return Err(ConfigError::MissingUrl);
    }

    let proxy_path = match &options.proxy_path {
        Some(path) => normalize_path(path)?,
        None => match options.strategy {
            ProxyPathStrategy::Hashed => generate_proxy_path(&target),
            ProxyPathStrategy::Random => random_proxy_path(),
        },
    };

    let derived = opaque_asset_names(&proxy_path);
    let assets = OpaqueAssets {
        js_tracker_file: options.js_tracker_file.unwrap_or(derived.js_tracker_file),
        php_tracker_file: options.php_tracker_file.unwrap_or(derived.php_tracker_file),
    };

    Ok(MatomoProxy {
        target,
        proxy_path,
        site_id: options.site_id.filter(|id| !id.trim().is_empty()),
        handler_route: normalize_path(&options.handler_route)?,
        assets,
    })
}

impl MatomoProxy {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn proxy_path(&self) -> &str {
        &self.proxy_path
    }

    pub fn site_id(&self) -> Option<&str> {
        self.site_id.as_deref()
    }

    pub fn assets(&self) -> &OpaqueAssets {
        &self.assets
    }

    pub fn rewrite(&self) -> Rewrite {
        Rewrite {
            source: format!("{}/:path*", self.proxy_path),
            destination: format!("{}/:path*", self.handler_route),
            extra: Map::new(),
        }
    }

    /// Client-visible values.
    pub fn public_env(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![(PROXY_PATH_ENV, self.proxy_path.clone())];
        if let Some(site_id) = &self.site_id {
            vars.push((PROXY_SITE_ID_ENV, site_id.clone()));
        }
        vars.push((JS_TRACKER_FILE_ENV, self.assets.js_tracker_file.clone()));
        vars.push((PHP_TRACKER_FILE_ENV, self.assets.php_tracker_file.clone()));
        vars
    }

    /// Adds the proxy rewrite ahead of existing rules and injects the env
    /// values. The upstream target goes to the server-only runtime config.
    pub fn wrap(&self, mut config: HostConfig) -> HostConfig {
        for (key, value) in self.public_env() {
            config.env.insert(key.to_string(), value);
        }
        config.server_runtime_config.insert(
            PROXY_TARGET_ENV.to_string(),
            Value::String(self.target.clone()),
        );

        let ours = self.rewrite();
        let prepend = |existing: Vec<Rewrite>| {
            let mut merged = vec![ours.clone()];
            merged.extend(existing.into_iter().filter(|r| *r != ours));
            merged
        };
        config.rewrites = Some(match config.rewrites.take() {
            None => Rewrites::List(vec![ours.clone()]),
            Some(Rewrites::List(existing)) => Rewrites::List(prepend(existing)),
            Some(Rewrites::Phased(mut phased)) => {
                phased.before_files = prepend(std::mem::take(&mut phased.before_files));
                Rewrites::Phased(phased)
            }
        });
        config
    }
}
