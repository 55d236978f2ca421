//! Model server configuration and address handling.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from parsing a model server URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("missing scheme in '{0}' (expected ws://host:port)")]
    MissingScheme(String),
    #[error("unsupported scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("missing host in '{0}'")]
    MissingHost(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Resolved address of the model server.
///
/// Parsed once from configuration and shared read-only by the supervisor,
/// the readiness probe, and every concurrent inference call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    /// Parse a `ws://host:port` style URL.
    ///
    /// The port defaults to 443 for `wss` and 80 otherwise, matching what
    /// the model server's clients have always assumed.
    pub fn parse(url: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| AddressError::MissingScheme(url.to_string()))?;

        if !scheme.eq_ignore_ascii_case("ws") && !scheme.eq_ignore_ascii_case("wss") {
            return Err(AddressError::UnsupportedScheme(scheme.to_string()));
        }

        // Ignore any path component; the worker serves on the socket root.
        let authority = rest.split(['/', '?']).next().unwrap_or(rest);

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| AddressError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None => {
                let default_port = if scheme.eq_ignore_ascii_case("wss") {
                    443
                } else {
                    80
                };
                (authority, default_port)
            }
        };

        if host.is_empty() {
            return Err(AddressError::MissingHost(url.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
        })
    }

    /// URL form accepted by the WebSocket connector.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl std::fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Configuration for the model server lifecycle and its socket.
///
/// Owned by the host configuration layer; this crate only consumes it.
#[derive(Debug, Clone)]
pub struct ModelServerConfig {
    /// Launch the worker on host start. When false, `start` is a no-op.
    pub autostart: bool,
    /// Worker socket URL.
    pub server_url: String,
    /// Directory containing the worker script; also its working directory.
    pub script_dir: PathBuf,
    /// Worker entry point, relative to `script_dir`.
    pub script_name: String,
    /// Explicit interpreter path. Empty/absent means: resolve a venv
    /// interpreter under `script_dir` (or its parent), else bare `python`.
    pub python_path: Option<PathBuf>,
    /// Deadline for a single readiness probe.
    pub probe_timeout: Duration,
    /// Pause between readiness polls during startup.
    pub poll_interval: Duration,
    /// Overall startup deadline. Model and CUDA initialization are slow,
    /// so this is generous.
    pub startup_timeout: Duration,
    /// How long a stopping worker gets before it is force-killed.
    pub stop_grace: Duration,
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            server_url: "ws://localhost:8765".to_string(),
            script_dir: PathBuf::from("python_model"),
            script_name: "model_server.py".to_string(),
            python_path: None,
            probe_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(120),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl ModelServerConfig {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Recognized variables: `QC_MODEL_AUTOSTART`, `QC_MODEL_SERVER_URL`,
    /// `QC_MODEL_DIR`, `QC_MODEL_PYTHON`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(autostart) = std::env::var("QC_MODEL_AUTOSTART") {
            config.autostart = !matches!(
                autostart.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        if let Ok(url) = std::env::var("QC_MODEL_SERVER_URL")
            && !url.is_empty()
        {
            config.server_url = url;
        }
        if let Ok(dir) = std::env::var("QC_MODEL_DIR")
            && !dir.is_empty()
        {
            config.script_dir = PathBuf::from(dir);
        }
        if let Ok(python) = std::env::var("QC_MODEL_PYTHON")
            && !python.is_empty()
        {
            config.python_path = Some(PathBuf::from(python));
        }

        config
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.script_dir = dir.into();
        self
    }

    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    pub fn with_python_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.python_path = Some(path.into());
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr = WorkerAddress::parse("ws://localhost:8765").unwrap();
        assert_eq!(addr.scheme, "ws");
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 8765);
        assert_eq!(addr.url(), "ws://localhost:8765");
    }

    #[test]
    fn default_port_depends_on_scheme() {
        let ws = WorkerAddress::parse("ws://model-host").unwrap();
        assert_eq!(ws.port, 80);

        let wss = WorkerAddress::parse("wss://model-host").unwrap();
        assert_eq!(wss.port, 443);
    }

    #[test]
    fn path_component_is_ignored() {
        let addr = WorkerAddress::parse("ws://localhost:8765/infer").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 8765);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(matches!(
            WorkerAddress::parse("localhost:8765"),
            Err(AddressError::MissingScheme(_))
        ));
    }

    #[test]
    fn rejects_http_scheme() {
        assert!(matches!(
            WorkerAddress::parse("http://localhost:8765"),
            Err(AddressError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(matches!(
            WorkerAddress::parse("ws://localhost:notaport"),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn rejects_empty_host() {
        assert!(matches!(
            WorkerAddress::parse("ws://:8765"),
            Err(AddressError::MissingHost(_))
        ));
    }

    #[test]
    fn display_matches_url() {
        let addr = WorkerAddress::parse("wss://example.org:9001").unwrap();
        assert_eq!(addr.to_string(), "wss://example.org:9001");
    }

    #[test]
    fn config_defaults_match_deployment() {
        let config = ModelServerConfig::default();
        assert!(config.autostart);
        assert_eq!(config.server_url, "ws://localhost:8765");
        assert_eq!(config.script_name, "model_server.py");
        assert_eq!(config.startup_timeout, Duration::from_secs(120));
    }

    #[test]
    fn builder_pattern() {
        let config = ModelServerConfig::default()
            .with_autostart(false)
            .with_server_url("ws://127.0.0.1:9000")
            .with_python_path("/opt/venv/bin/python");

        assert!(!config.autostart);
        assert_eq!(config.server_url, "ws://127.0.0.1:9000");
        assert_eq!(
            config.python_path,
            Some(PathBuf::from("/opt/venv/bin/python"))
        );
    }
}
