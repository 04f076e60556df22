use std::collections::BTreeMap;
use thiserror::Error;

pub const PROXY_PATH_ENV: &str = "NEXT_PUBLIC_MATOMO_PROXY_PATH";
pub const PROXY_SITE_ID_ENV: &str = "NEXT_PUBLIC_MATOMO_PROXY_SITE_ID";
pub const JS_TRACKER_FILE_ENV: &str = "NEXT_PUBLIC_MATOMO_PROXY_JS_TRACKER_FILE";
pub const PHP_TRACKER_FILE_ENV: &str = "NEXT_PUBLIC_MATOMO_PROXY_PHP_TRACKER_FILE";
pub const PROXY_TARGET_ENV: &str = "MATOMO_PROXY_TARGET";

const KNOWN_KEYS: [&str; 5] = [
    PROXY_PATH_ENV,
    PROXY_SITE_ID_ENV,
    JS_TRACKER_FILE_ENV,
    PHP_TRACKER_FILE_ENV,
    PROXY_TARGET_ENV,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("matomo url is empty")]
    MissingUrl,
    #[error("invalid proxy path {0:?}")]
    InvalidProxyPath(String),
    #[error("invalid host config: {0}")]
    HostConfig(#[from] serde_json::Error),
}

/// Snapshot of the proxy-related environment variables.
///
/// Empty or whitespace-only values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    vars: BTreeMap<String, String>,
}

impl ProxyEnv {
    pub fn from_process() -> Self {
        Self::from_pairs(
            std::env::vars().filter(|(key, _)| KNOWN_KEYS.contains(&key.as_str())),
        )
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut env = Self::default();
        for (key, value) in pairs {
            env.set(key, value);
        }
        env
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        self.vars.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn proxy_path(&self) -> Option<&str> {
        self.get(PROXY_PATH_ENV)
    }

    pub fn site_id(&self) -> Option<&str> {
        self.get(PROXY_SITE_ID_ENV)
    }

    pub fn js_tracker_file(&self) -> Option<&str> {
        self.get(JS_TRACKER_FILE_ENV)
    }

    pub fn php_tracker_file(&self) -> Option<&str> {
        self.get(PHP_TRACKER_FILE_ENV)
    }

    pub fn target(&self) -> Option<&str> {
        self.get(PROXY_TARGET_ENV)
    }

    /// `origin` joined with the proxy path.
    pub fn proxy_url(&self, origin: &str) -> Option<String> {
        let path = self.proxy_path()?;
        let path = path.trim_end_matches('/');
        let origin = origin.trim_end_matches('/');
        if path.starts_with('/') {
            Some(format!("{origin}{path}"))
        } else {
            Some(format!("{origin}/{path}"))
        }
    }
}
