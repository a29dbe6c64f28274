use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Command-line flags, parsed with clap the way a real daemon's `--help`/`--version`
/// are free once you reach for a derive parser.
#[derive(Debug, Parser)]
#[command(name = "cups-browsed-rs", version, about = "Print-queue discovery and reconciliation daemon")]
pub struct Cli {
    /// Enable verbose / debug logging.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Increase verbosity; may be repeated (-v, -vv, -vvv).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Override the default config file search path.
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,

    /// Auto-shutdown mode: on, off, avahi, or none.
    #[arg(long = "autoshutdown")]
    pub autoshutdown: Option<String>,

    /// Auto-shutdown timeout in seconds.
    #[arg(long = "autoshutdown-timeout")]
    pub autoshutdown_timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoShutdown {
    On,
    Off,
    Avahi,
    None,
}

impl Default for AutoShutdown {
    fn default() -> Self {
        AutoShutdown::Avahi
    }
}

impl AutoShutdown {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" | "yes" => Some(AutoShutdown::On),
            "off" | "0" | "false" | "no" => Some(AutoShutdown::Off),
            "avahi" => Some(AutoShutdown::Avahi),
            "none" => Some(AutoShutdown::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowseProtocol {
    DnsSd,
    Cups,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AllowRuleConfig {
    All,
    Exact(String),
    Network(String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollServerConfig {
    pub host: String,
    pub port: u16,
    pub ipp_version: Option<(u8, u8)>,
}

/// The fully-resolved configuration the daemon runs with: CLI flags layered over
/// a parsed config file, both layered over built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub browse_local_protocols: Vec<BrowseProtocol>,
    pub browse_remote_protocols: Vec<BrowseProtocol>,
    pub browse_poll: Vec<PollServerConfig>,
    pub browse_allow: Vec<AllowRuleConfig>,
    pub domain_socket: Option<PathBuf>,
    pub create_ipp_printer_queues: bool,
    pub autoshutdown: AutoShutdown,
    pub autoshutdown_timeout_secs: u64,
    pub browse_port: u16,
    pub browse_interval_secs: u64,
    pub browse_timeout_secs: u64,
    pub confirm_secs: u64,
    pub retry_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            // Local dnssd advertising of shared queues is not supported by
            // this daemon — it is CUPS' own job, not cups-browsed-rs'.
            // Nothing is enabled locally until `BrowseLocalProtocols` or
            // `BrowseProtocols` opts into `cups` (legacy broadcast rebroadcast).
            browse_local_protocols: Vec::new(),
            browse_remote_protocols: vec![BrowseProtocol::DnsSd, BrowseProtocol::Cups],
            browse_poll: Vec::new(),
            browse_allow: vec![AllowRuleConfig::All],
            domain_socket: default_domain_socket(),
            create_ipp_printer_queues: true,
            autoshutdown: AutoShutdown::default(),
            autoshutdown_timeout_secs: 30,
            browse_port: 631,
            browse_interval_secs: 10,
            browse_timeout_secs: 300,
            confirm_secs: 10,
            retry_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn browse_timeout(&self) -> Duration {
        Duration::from_secs(self.browse_timeout_secs)
    }

    pub fn confirm_interval(&self) -> Duration {
        Duration::from_secs(self.confirm_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    /// `CUPS_SERVER` is pinned at startup to the configured domain socket when it
    /// looks usable, else falls back to localhost. The `ipp` crate's async client
    /// speaks HTTP(S), not raw unix sockets, so a configured `DomainSocket` only
    /// changes this advisory value; RPCs still go out over `http://localhost:631`
    /// unless a remote server URI is given. See DESIGN.md for this scope decision.
    pub fn cups_server_env(&self) -> String {
        match &self.domain_socket {
            Some(path) if path.exists() => path.display().to_string(),
            _ => "localhost".to_string(),
        }
    }

    /// Load a config file (CUPS-style `Key Value` lines), then apply CLI overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = AppConfig::default();

        let path = cli
            .config_path
            .clone()
            .or_else(default_config_path)
            .filter(|p| p.exists());

        if let Some(path) = path {
            apply_config_file(&mut cfg, &path)?;
        }

        if cli.debug || cli.verbose > 0 {
            cfg.debug = true;
        }
        if let Some(mode) = cli.autoshutdown.as_deref().and_then(AutoShutdown::parse) {
            cfg.autoshutdown = mode;
        }
        if let Some(t) = cli.autoshutdown_timeout {
            cfg.autoshutdown_timeout_secs = t;
        }

        Ok(cfg)
    }
}

fn default_domain_socket() -> Option<PathBuf> {
    Some(PathBuf::from("/var/run/cups/cups.sock"))
}

fn default_config_path() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::config_dir().map(|p| p.join("cups-browsed-rs/cups-browsed-rs.conf"))
    } else if cfg!(target_os = "windows") {
        dirs::config_dir().map(|p| p.join("cups-browsed-rs/cups-browsed-rs.conf"))
    } else {
        Some(PathBuf::from("/etc/cups/cups-browsed.conf"))
    }
}

/// Apply a CUPS-style config file to `cfg` in place. Unknown keys and
/// unparseable lines are logged and skipped; a single bad line never aborts
/// startup ("Config parse error on a single line: log and ignore").
fn apply_config_file(cfg: &mut AppConfig, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default().trim();
        if let Err(reason) = apply_directive(cfg, key, value) {
            tracing::warn!(file = %path.display(), line = lineno + 1, %reason, "ignoring config line");
        }
    }
    Ok(())
}

fn apply_directive(cfg: &mut AppConfig, key: &str, value: &str) -> std::result::Result<(), String> {
    match key.to_ascii_lowercase().as_str() {
        "browseprotocols" => {
            let protos = parse_protocols(value)?;
            cfg.browse_local_protocols = drop_unsupported_local_dnssd(&protos);
            cfg.browse_remote_protocols = protos;
        }
        "browselocalprotocols" => {
            let protos = parse_protocols(value)?;
            cfg.browse_local_protocols = drop_unsupported_local_dnssd(&protos);
        }
        "browseremoteprotocols" => {
            cfg.browse_remote_protocols = parse_protocols(value)?;
        }
        "browsepoll" => cfg.browse_poll.push(parse_poll_server(value)?),
        "browseallow" => cfg.browse_allow.push(parse_allow_rule(value)?),
        "domainsocket" => cfg.domain_socket = Some(PathBuf::from(value)),
        "createippprinterqueues" => cfg.create_ipp_printer_queues = parse_bool(value)?,
        "autoshutdown" => {
            cfg.autoshutdown = AutoShutdown::parse(value).ok_or_else(|| format!("bad AutoShutdown value {value:?}"))?
        }
        "autoshutdowntimeout" => {
            cfg.autoshutdown_timeout_secs = value.parse().map_err(|_| format!("bad AutoShutdownTimeout {value:?}"))?
        }
        other => return Err(format!("unknown config key {other:?}")),
    }
    Ok(())
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "yes" | "true" => Ok(true),
        "off" | "0" | "no" | "false" => Ok(false),
        other => Err(format!("not a boolean: {other:?}")),
    }
}

fn parse_protocols(value: &str) -> std::result::Result<Vec<BrowseProtocol>, String> {
    let mut protos = Vec::new();
    for tok in value.split([',', ' ', '\t']).filter(|s| !s.is_empty()) {
        match tok.to_ascii_lowercase().as_str() {
            "dnssd" => protos.push(BrowseProtocol::DnsSd),
            "cups" => protos.push(BrowseProtocol::Cups),
            "none" => {}
            other => return Err(format!("unknown browse protocol {other:?}")),
        }
    }
    Ok(protos)
}

/// Local dnssd advertising is out of scope : CUPS itself handles
/// dnssd sharing of its own queues, so `dnssd` in a *local* protocol list is
/// dropped with a warning rather than silently accepted.
fn drop_unsupported_local_dnssd(protos: &[BrowseProtocol]) -> Vec<BrowseProtocol> {
    let (kept, dropped): (Vec<_>, Vec<_>) = protos.iter().partition(|p| !matches!(p, BrowseProtocol::DnsSd));
    if !dropped.is_empty() {
        tracing::warn!("local dnssd browsing is not supported by this daemon; ignoring");
    }
    kept
}

fn parse_poll_server(value: &str) -> std::result::Result<PollServerConfig, String> {
    let (hostport, version) = match value.split_once("/version=") {
        Some((hp, v)) => (hp, Some(v)),
        None => (value, None),
    };
    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().map_err(|_| format!("bad port in {value:?}"))?),
        None => (hostport.to_string(), 631),
    };
    let ipp_version = version
        .map(|v| {
            let (maj, min) = v.split_once('.').ok_or_else(|| format!("bad version {v:?}"))?;
            Ok::<_, String>((
                maj.parse().map_err(|_| format!("bad version {v:?}"))?,
                min.parse().map_err(|_| format!("bad version {v:?}"))?,
            ))
        })
        .transpose()?;
    Ok(PollServerConfig { host, port, ipp_version })
}

fn parse_allow_rule(value: &str) -> std::result::Result<AllowRuleConfig, String> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(AllowRuleConfig::All);
    }
    if let Some((addr, mask)) = value.split_once('/') {
        return Ok(AllowRuleConfig::Network(addr.to_string(), mask.to_string()));
    }
    Ok(AllowRuleConfig::Exact(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_text(text: &str) -> AppConfig {
        let mut cfg = AppConfig::default();
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default().trim();
            if let Err(reason) = apply_directive(&mut cfg, key, value) {
                panic!("line {}: {reason}", lineno + 1);
            }
        }
        cfg
    }

    #[test]
    fn browse_poll_parses_host_port_and_version() {
        let cfg = load_text("BrowsePoll printserver.example.com:631/version=1.1\n");
        assert_eq!(cfg.browse_poll.len(), 1);
        assert_eq!(cfg.browse_poll[0].host, "printserver.example.com");
        assert_eq!(cfg.browse_poll[0].port, 631);
        assert_eq!(cfg.browse_poll[0].ipp_version, Some((1, 1)));
    }

    #[test]
    fn browse_poll_defaults_port_when_omitted() {
        let cfg = load_text("BrowsePoll printserver.example.com\n");
        assert_eq!(cfg.browse_poll[0].port, 631);
        assert!(cfg.browse_poll[0].ipp_version.is_none());
    }

    #[test]
    fn local_dnssd_is_dropped_with_a_warning_not_an_error() {
        let cfg = load_text("BrowseLocalProtocols dnssd cups\n");
        assert_eq!(cfg.browse_local_protocols, vec![BrowseProtocol::Cups]);
    }

    #[test]
    fn unparseable_line_is_skipped_not_fatal() {
        // A single bad line must not abort startup : this directly
        // exercises `apply_config_file`'s per-line try/log/continue, not just
        // the directive parser.
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "AutoShutdownTimeout not-a-number\nAutoShutdown on").unwrap();

        let mut cfg = AppConfig::default();
        apply_config_file(&mut cfg, file.path()).unwrap();
        assert_eq!(cfg.autoshutdown, AutoShutdown::On);
        assert_eq!(cfg.autoshutdown_timeout_secs, AppConfig::default().autoshutdown_timeout_secs);
    }

    #[test]
    fn create_ipp_printer_queues_accepts_common_boolean_spellings() {
        let cfg = load_text("CreateIPPPrinterQueues off\n");
        assert!(!cfg.create_ipp_printer_queues);
    }

    #[test]
    fn allow_rule_with_prefix_len_parses_as_network() {
        // `BrowseAllow` appends; the default ruleset already contains `All`.
        let cfg = load_text("BrowseAllow 10.0.0.0/8\n");
        match cfg.browse_allow.last().unwrap() {
            AllowRuleConfig::Network(addr, mask) => {
                assert_eq!(addr, "10.0.0.0");
                assert_eq!(mask, "8");
            }
            other => panic!("expected a Network rule, got {other:?}"),
        }
    }
}
