//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` path given on the command line
//! 2. `$INVOICE_RELAY_CONFIG` (environment variable)
//! 3. `~/.config/invoice-relay/config.toml` (Linux/macOS)
//!    `%APPDATA%\invoice-relay\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! Environment variables from the original relay setup (`INVOICE_STRING`,
//! `RELAY_EMAIL_HOST`, …) are layered on top, then CLI flags. The result is
//! validated once and handed to the pipeline as a plain value.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispatch::simulate::sanitize_attachment_name;
use crate::dispatch::DispatchMode;
use crate::error::{RelayError, Result};
use crate::model::address::EmailAddress;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging and cache settings.
    pub general: GeneralConfig,
    /// Where inbound mail is read from.
    pub source: SourceConfig,
    /// Invoice detection and merging.
    pub invoice: InvoiceConfig,
    /// Simulation output.
    pub simulation: SimulationConfig,
    /// SMTP relay.
    pub relay: RelayConfig,
}

/// Logging and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Debug mode: forces the log level to "debug". Never changes control flow.
    pub debug: bool,
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
}

/// Kind of local mail source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Directory of `.eml` files.
    Spool,
    /// Single mbox file.
    Mbox,
}

/// Where inbound mail is read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Spool directory or mbox file. `~` is expanded.
    pub path: Option<PathBuf>,
}

/// Invoice detection and merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceConfig {
    /// Case-insensitive substring that promotes a PDF to the front of the merge.
    pub match_string: Option<String>,
    /// Filename of the merged attachment.
    pub merged_filename: String,
    /// Minimum number of candidate PDFs before a merge happens (at least 2).
    pub min_merge_count: usize,
    /// Largest PDF accepted for merging, in bytes.
    pub max_pdf_size: u64,
}

/// Simulation output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Base directory for simulation bundles (default `~/Desktop/email_relay_simulation`).
    pub base_dir: Option<PathBuf>,
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS (port 587).
    Starttls,
    /// Implicit TLS (port 465).
    Wrapper,
    /// No encryption. Local test relays only.
    None,
}

/// SMTP relay settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: Option<String>,
    pub port: u16,
    pub tls: TlsMode,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// SMTP `MAIL FROM`. Defaults to the message's own sender.
    pub envelope_from: Option<String>,
    /// SMTP `RCPT TO`. Defaults to the message's own recipients.
    pub forward_to: Vec<String>,
    /// Connection and command timeout in seconds.
    pub timeout_secs: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            debug: false,
            cache_dir: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Spool,
            path: None,
        }
    }
}

impl Default for InvoiceConfig {
    fn default() -> Self {
        Self {
            match_string: None,
            merged_filename: "merged_invoice.pdf".to_string(),
            min_merge_count: 2,
            max_pdf_size: 50 * 1024 * 1024, // 50 MiB
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            tls: TlsMode::Starttls,
            username: None,
            password: None,
            envelope_from: None,
            forward_to: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("envelope_from", &self.envelope_from)
            .field("forward_to", &self.forward_to)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit`, or from the standard locations.
///
/// A missing file at a standard location yields the defaults; a missing
/// explicit file, or any file that fails to parse, is a `ConfigError`.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => {
            if !p.exists() {
                return Err(RelayError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match config_file_path() {
            Some(p) if p.exists() => p,
            _ => {
                tracing::debug!("No config file found, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| RelayError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg = toml::from_str::<Config>(&contents)
        .map_err(|e| RelayError::Config(format!("cannot parse {}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("INVOICE_RELAY_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("invoice-relay").join("config.toml"))
}

impl Config {
    /// Layer environment overrides on top of the file values.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(s) = lookup("INVOICE_STRING") {
            self.invoice.match_string = Some(s);
        }
        if let Some(flag) = lookup("DEBUG_EMAIL_RELAY") {
            self.general.debug = flag.trim().eq_ignore_ascii_case("true");
        }
        if let Some(path) = lookup("EMAIL_RELAY_SOURCE") {
            self.source.path = Some(PathBuf::from(path));
        }
        if let Some(host) = lookup("RELAY_EMAIL_HOST") {
            self.relay.host = Some(host);
        }
        if let Some(port) = lookup("RELAY_EMAIL_PORT") {
            match port.trim().parse() {
                Ok(p) => self.relay.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid RELAY_EMAIL_PORT"),
            }
        }
        if let Some(user) = lookup("RELAY_EMAIL_USERNAME") {
            self.relay.username = Some(user);
        }
        if let Some(pass) = lookup("RELAY_EMAIL_PASSWORD") {
            self.relay.password = Some(pass);
        }
        if let Some(from) = lookup("RELAY_FROM_EMAIL") {
            self.relay.envelope_from = Some(from);
        }
        if let Some(to) = lookup("RELAY_TO_EMAIL") {
            self.relay.forward_to = to
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Check everything the given mode needs. Fatal on failure.
    pub fn validate(&self, mode: DispatchMode) -> Result<()> {
        if self.invoice.min_merge_count < 2 {
            return Err(RelayError::Config(format!(
                "invoice.min_merge_count must be at least 2, got {}",
                self.invoice.min_merge_count
            )));
        }
        let merged = &self.invoice.merged_filename;
        if sanitize_attachment_name(merged).ok().as_ref() != Some(merged) {
            return Err(RelayError::Config(format!(
                "invoice.merged_filename is not a plain filename: '{}'",
                self.invoice.merged_filename
            )));
        }

        if mode == DispatchMode::Relay {
            if self.relay.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
                return Err(RelayError::Config(
                    "relay mode needs relay.host (or RELAY_EMAIL_HOST)".into(),
                ));
            }
            if self.relay.username.is_some() != self.relay.password.is_some() {
                return Err(RelayError::Config(
                    "relay.username and relay.password must be set together".into(),
                ));
            }
            let addresses = self
                .relay
                .envelope_from
                .iter()
                .chain(self.relay.forward_to.iter());
            for raw in addresses {
                if !EmailAddress::parse(raw).is_routable() {
                    return Err(RelayError::Config(format!(
                        "not a routable address: '{raw}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Source path with `~` expanded, or the default spool directory.
    pub fn source_path(&self) -> PathBuf {
        match &self.source.path {
            Some(p) => expand_tilde(p),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("invoice-relay")
                .join("inbox"),
        }
    }

    /// Simulation base directory with `~` expanded.
    pub fn simulation_dir(&self) -> PathBuf {
        match &self.simulation.base_dir {
            Some(p) => expand_tilde(p),
            None => dirs::desktop_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Desktop")))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("email_relay_simulation"),
        }
    }

    /// Effective log level after the debug flag.
    pub fn log_level(&self) -> &str {
        if self.general.debug {
            "debug"
        } else {
            &self.general.log_level
        }
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return expand_tilde(dir);
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("invoice-relay")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("invoice-relay.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.invoice.merged_filename, "merged_invoice.pdf");
        assert_eq!(cfg.invoice.min_merge_count, 2);
        assert_eq!(cfg.relay.port, 587);
        assert_eq!(cfg.relay.tls, TlsMode::Starttls);
        assert_eq!(cfg.source.kind, SourceKind::Spool);
        assert!(cfg.simulation_dir().ends_with("email_relay_simulation"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[invoice]
match_string = "INV"

[relay]
host = "smtp.example.test"
tls = "wrapper"
port = 465
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.invoice.match_string.as_deref(), Some("INV"));
        assert_eq!(cfg.invoice.merged_filename, "merged_invoice.pdf");
        assert_eq!(cfg.relay.tls, TlsMode::Wrapper);
        assert_eq!(cfg.relay.timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("INVOICE_STRING", "Rechnung"),
            ("DEBUG_EMAIL_RELAY", "TRUE"),
            ("RELAY_EMAIL_HOST", "smtp.relay.test"),
            ("RELAY_EMAIL_PORT", "2525"),
            ("RELAY_TO_EMAIL", "ap@corp.test, books@corp.test"),
        ]));
        assert_eq!(cfg.invoice.match_string.as_deref(), Some("Rechnung"));
        assert!(cfg.general.debug);
        assert_eq!(cfg.log_level(), "debug");
        assert_eq!(cfg.relay.host.as_deref(), Some("smtp.relay.test"));
        assert_eq!(cfg.relay.port, 2525);
        assert_eq!(cfg.relay.forward_to, vec!["ap@corp.test", "books@corp.test"]);
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("RELAY_EMAIL_PORT", "smtp")]));
        assert_eq!(cfg.relay.port, 587);
    }

    #[test]
    fn test_validate_relay_needs_host() {
        let cfg = Config::default();
        assert!(cfg.validate(DispatchMode::Simulate).is_ok());
        let err = cfg.validate(DispatchMode::Relay).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_validate_rejects_bad_addresses_and_counts() {
        let mut cfg = Config::default();
        cfg.relay.host = Some("smtp.relay.test".into());
        cfg.relay.forward_to = vec!["not-an-address".into()];
        assert!(cfg.validate(DispatchMode::Relay).is_err());

        let mut cfg = Config::default();
        cfg.invoice.min_merge_count = 1;
        assert!(cfg.validate(DispatchMode::Simulate).is_err());

        let mut cfg = Config::default();
        cfg.invoice.merged_filename = "../escape.pdf".into();
        assert!(cfg.validate(DispatchMode::Simulate).is_err());
    }

    #[test]
    fn test_validate_merged_filename_must_be_writable() {
        let mut cfg = Config::default();
        for bad in ["..", ".", "", "  ", "a:b.pdf"] {
            cfg.invoice.merged_filename = bad.into();
            assert!(cfg.validate(DispatchMode::Simulate).is_err(), "{bad:?}");
        }
        cfg.invoice.merged_filename = "Rechnungen März.pdf".into();
        assert!(cfg.validate(DispatchMode::Simulate).is_ok());
    }

    #[test]
    fn test_validate_credentials_pairing() {
        let mut cfg = Config::default();
        cfg.relay.host = Some("smtp.relay.test".into());
        cfg.relay.username = Some("relay".into());
        assert!(cfg.validate(DispatchMode::Relay).is_err());
        cfg.relay.password = Some("secret".into());
        assert!(cfg.validate(DispatchMode::Relay).is_ok());
    }

    #[test]
    fn test_load_missing_explicit_file_is_fatal() {
        let err = load_config(Some(Path::new("/nonexistent/invoice-relay.toml"))).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_unparseable_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[relay\nport = ").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_password_not_serialized_or_debugged() {
        let mut cfg = Config::default();
        cfg.relay.password = Some("hunter2".into());
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        assert!(!toml_str.contains("hunter2"));
        assert!(!format!("{:?}", cfg.relay).contains("hunter2"));
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/var/spool/inbox");
        assert_eq!(expand_tilde(plain), plain);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/Mail")), home.join("Mail"));
        }
    }
}
