//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// System-wide configuration.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub fleet: FleetConfig,
    pub orka: OrkaConfig,
    pub images: ImageConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Mount the JSON status snapshot at `/api/v1/status`.
    pub expose_status: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            expose_status: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// Shared secret the webhook signature is computed with.
    pub webhook_secret: String,
}

/// Fleet limits and retry timing.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Maximum number of live VMs.
    pub capacity: usize,
    pub start_backoff: Duration,
    pub stop_backoff: Duration,
    /// Upper bound on a single VM deploy call.
    pub provision_timeout: Duration,
    /// How long expired markers and finished jobs are remembered.
    pub expired_retention: Duration,
    pub prune_interval: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            start_backoff: Duration::from_secs(15),
            stop_backoff: Duration::from_secs(30),
            provision_timeout: Duration::from_secs(600),
            expired_retention: Duration::from_secs(86_400),
            prune_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrkaConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

/// Mapping from runner label (`14`, `14-arm64`, ...) to VM image.
#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    pub default_image: Option<String>,
    pub images: BTreeMap<String, String>,
}

impl ImageConfig {
    /// Image for a runner label, falling back to the default image.
    pub fn image_for(&self, runner_label: &str) -> Option<&str> {
        self.images
            .get(runner_label)
            .or(self.default_image.as_ref())
            .map(String::as_str)
    }
}

/// Read and parse a system configuration file.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut server = ServerConfig::default();
    let mut github = None;
    let mut fleet = FleetConfig::default();
    let mut orka = None;
    let mut images = ImageConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => server = parse_server(node)?,
            "github" => github = Some(parse_github(node)?),
            "fleet" => fleet = parse_fleet(node)?,
            "orka" => orka = Some(parse_orka(node)?),
            "images" => images = parse_images(node)?,
            _ => {} // Ignore unknown nodes
        }
    }

    let github = github.ok_or_else(|| ConfigError::MissingField("github".to_string()))?;
    let orka = orka.ok_or_else(|| ConfigError::MissingField("orka".to_string()))?;

    Ok(SystemConfig {
        server,
        github,
        fleet,
        orka,
        images,
    })
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerConfig> {
    let mut server = ServerConfig::default();

    for child in children(node) {
        match child.name().value() {
            "bind" => {
                let raw = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("server bind".to_string()))?;
                server.bind = raw.parse().map_err(|e| ConfigError::InvalidValue {
                    field: "server bind".to_string(),
                    message: format!("{}: {}", raw, e),
                })?;
            }
            "expose-status" => {
                server.expose_status = get_first_bool_arg(child).unwrap_or(false);
            }
            _ => {}
        }
    }

    Ok(server)
}

fn parse_github(node: &KdlNode) -> ConfigResult<GitHubConfig> {
    let mut webhook_secret = None;

    for child in children(node) {
        if child.name().value() == "webhook-secret" {
            webhook_secret = get_secret(child)?;
        }
    }

    let webhook_secret = webhook_secret
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingField("github webhook-secret".to_string()))?;

    Ok(GitHubConfig { webhook_secret })
}

fn parse_fleet(node: &KdlNode) -> ConfigResult<FleetConfig> {
    let mut fleet = FleetConfig::default();

    for child in children(node) {
        match child.name().value() {
            "capacity" => {
                let capacity = get_u64_arg(child, "fleet capacity")?;
                if capacity == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "fleet capacity".to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                fleet.capacity = usize::try_from(capacity).map_err(|_| {
                    ConfigError::InvalidValue {
                        field: "fleet capacity".to_string(),
                        message: format!("{} is too large", capacity),
                    }
                })?;
            }
            "start-backoff-secs" => {
                fleet.start_backoff = get_secs_arg(child, "fleet start-backoff-secs")?;
            }
            "stop-backoff-secs" => {
                fleet.stop_backoff = get_secs_arg(child, "fleet stop-backoff-secs")?;
            }
            "provision-timeout-secs" => {
                fleet.provision_timeout = get_secs_arg(child, "fleet provision-timeout-secs")?;
            }
            "expired-retention-secs" => {
                fleet.expired_retention = get_secs_arg(child, "fleet expired-retention-secs")?;
            }
            "prune-interval-secs" => {
                fleet.prune_interval = get_secs_arg(child, "fleet prune-interval-secs")?;
                if fleet.prune_interval.is_zero() {
                    return Err(ConfigError::InvalidValue {
                        field: "fleet prune-interval-secs".to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(fleet)
}

fn parse_orka(node: &KdlNode) -> ConfigResult<OrkaConfig> {
    let mut base_url = None;
    let mut token = None;
    let mut request_timeout = Duration::from_secs(300);

    for child in children(node) {
        match child.name().value() {
            "base-url" => {
                let raw = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("orka base-url".to_string()))?;
                let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    field: "orka base-url".to_string(),
                    message: format!("{}: {}", raw, e),
                })?;
                base_url = Some(url);
            }
            "token" => {
                token = get_secret(child)?;
            }
            "request-timeout-secs" => {
                request_timeout = get_secs_arg(child, "orka request-timeout-secs")?;
            }
            _ => {}
        }
    }

    let base_url =
        base_url.ok_or_else(|| ConfigError::MissingField("orka base-url".to_string()))?;

    Ok(OrkaConfig {
        base_url,
        token,
        request_timeout,
    })
}

fn parse_images(node: &KdlNode) -> ConfigResult<ImageConfig> {
    let mut images = ImageConfig::default();

    for child in children(node) {
        match child.name().value() {
            "default-image" => {
                images.default_image = get_first_string_arg(child);
            }
            "image" => {
                let label = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("image runner label".to_string()))?;
                let config = get_string_prop(child, "config").ok_or_else(|| {
                    ConfigError::MissingField(format!("config for image '{}'", label))
                })?;
                images.images.insert(label, config);
            }
            _ => {}
        }
    }

    Ok(images)
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_u64_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} is not a non-negative integer", value),
    })
}

fn get_secs_arg(node: &KdlNode, field: &str) -> ConfigResult<Duration> {
    get_u64_arg(node, field).map(Duration::from_secs)
}

/// A secret given inline (`token "abc"`) or by environment variable
/// (`token env="ORKA_TOKEN"`).
fn get_secret(node: &KdlNode) -> ConfigResult<Option<String>> {
    if let Some(value) = get_first_string_arg(node) {
        return Ok(Some(value));
    }

    match get_string_prop(node, "env") {
        Some(var) => std::env::var(&var)
            .map(Some)
            .map_err(|_| ConfigError::MissingEnv(var)),
        None => Ok(None),
    }
}
