use axum::Router;
use clap::{ArgAction, Parser, Subcommand};
use matomo_core::proxy_config::{DEFAULT_HANDLER_ROUTE, random_proxy_path};
use matomo_core::{
    HostConfig, MatomoProxyOptions, ProxyEnv, ProxyPathStrategy, generate_proxy_path,
    with_matomo_proxy,
};
use matomo_web::{AxumProxyAdapter, DEFAULT_TIMEOUT_MS, ProxyHandler, ProxySettings, UreqUpstream};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_CONFIG_FILE: &str = "matomo.json";
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Parser)]
#[command(name = "matomo", version, about = "Same-origin Matomo proxy tooling")]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum CliCommand {
    /// Run the forwarding proxy.
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        route: Option<String>,
    },
    /// Print a host config with the proxy rewrite and env values merged in.
    ProxyConfig {
        #[arg(long)]
        matomo_url: String,
        #[arg(long)]
        proxy_path: Option<String>,
        #[arg(long)]
        site_id: Option<String>,
        #[arg(long, default_value = "hashed")]
        strategy: ProxyPathStrategy,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the proxy path for a collector URL.
    ProxyPath {
        url: String,
        #[arg(long, default_value = "hashed")]
        strategy: ProxyPathStrategy,
    },
}

/// Contents of `matomo.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServeConfig {
    pub target: Option<String>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub route: Option<String>,
    pub js_tracker_file: Option<String>,
    pub php_tracker_file: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Flags given on the command line; they win over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServeOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub route: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeSettings {
    pub bind: String,
    pub port: u16,
    pub route: String,
    pub timeout_ms: u64,
    pub proxy: ProxySettings,
}

pub async fn run_from_env() -> Result<(), String> {
    run(Cli::parse()).await
}

pub async fn run_from_args(args: Vec<String>) -> Result<(), String> {
    let cli = Cli::try_parse_from(std::iter::once("matomo".to_string()).chain(args))
        .map_err(|e| e.to_string())?;
    run(cli).await
}

async fn run(cli: Cli) -> Result<(), String> {
    init_tracing(cli.verbose);

    match cli.command {
        CliCommand::Serve {
            config,
            bind,
            port,
            route,
        } => {
            let file = load_serve_config(config.as_deref())?;
            let settings = resolve_serve_settings(
                file,
                ServeOverrides { bind, port, route },
                &ProxyEnv::from_process(),
            );
            run_server(settings).await
        }
        CliCommand::ProxyConfig {
            matomo_url,
            proxy_path,
            site_id,
            strategy,
            config,
        } => {
            let host = match config {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
                    HostConfig::from_json(&raw)
                        .map_err(|e| format!("failed to parse {}: {e}", path.display()))?
                }
                None => HostConfig::default(),
            };
            let mut options = MatomoProxyOptions::new(matomo_url);
            options.proxy_path = proxy_path;
            options.site_id = site_id;
            options.strategy = strategy;
            println!("{}", render_proxy_config(options, host)?);
            Ok(())
        }
        CliCommand::ProxyPath { url, strategy } => {
            println!("{}", proxy_path_for(&url, strategy));
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Reads the serve config. Without an explicit path `matomo.json` in the
/// working directory is used when present.
pub fn load_serve_config(path: Option<&Path>) -> Result<ServeConfig, String> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !fallback.is_file() {
                return Ok(ServeConfig::default());
            }
            fallback
        }
    };

    let content =
        fs::read_to_string(&path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str::<ServeConfig>(&content)
        .map_err(|e| format!("failed to parse {} as ServeConfig: {e}", path.display()))
}

/// Flags, then file, then env, then defaults.
pub fn resolve_serve_settings(
    file: ServeConfig,
    overrides: ServeOverrides,
    env: &ProxyEnv,
) -> ServeSettings {
    let from_env = ProxySettings::from_env(env);
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

    ServeSettings {
        bind: non_blank(overrides.bind)
            .or(non_blank(file.bind))
            .unwrap_or_else(|| DEFAULT_BIND.to_string()),
        port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
        route: non_blank(overrides.route)
            .or(non_blank(file.route))
            .unwrap_or_else(|| DEFAULT_HANDLER_ROUTE.to_string()),
        timeout_ms: file
            .timeout_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
        proxy: ProxySettings {
            target: non_blank(file.target).or(from_env.target),
            js_tracker_file: non_blank(file.js_tracker_file).or(from_env.js_tracker_file),
            php_tracker_file: non_blank(file.php_tracker_file).or(from_env.php_tracker_file),
        },
    }
}

pub fn render_proxy_config(options: MatomoProxyOptions, host: HostConfig) -> Result<String, String> {
    let proxy = with_matomo_proxy(options).map_err(|e| e.to_string())?;
    proxy
        .wrap(host)
        .to_json_pretty()
        .map_err(|e| format!("failed to serialize host config: {e}"))
}

pub fn proxy_path_for(url: &str, strategy: ProxyPathStrategy) -> String {
    match strategy {
        ProxyPathStrategy::Hashed => generate_proxy_path(url),
        ProxyPathStrategy::Random => random_proxy_path(),
    }
}

async fn run_server(settings: ServeSettings) -> Result<(), String> {
    if settings.proxy.target.is_none() {
        warn!("no upstream target configured, proxied requests will answer 500");
    }

    let handler = ProxyHandler::new(settings.proxy.clone())
        .with_upstream(UreqUpstream::new(settings.timeout_ms));
    let app: Router = AxumProxyAdapter::new(handler)
        .with_route(settings.route.clone())
        .router();

    let host = format!("{}:{}", settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(&host)
        .await
        .map_err(|e| format!("failed to bind {host}: {e}"))?;
    info!(
        address = %host,
        route = %settings.route,
        upstream = settings.proxy.target.as_deref().unwrap_or("<unset>"),
        "matomo proxy listening"
    );
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server failed: {e}"))
}
