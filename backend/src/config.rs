//! Service configuration, read once from the environment at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const VERSION: &str = "2.0.0-TRIO";

/// Operating posture of the service.
///
/// - `Shield`: private ledger, internal alerting only.
/// - `Sword`: public registry, violations are exposed to regulators.
/// - `Judge`: public registry plus binding rulings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SovereignMode {
    #[default]
    Shield,
    Sword,
    Judge,
}

#[derive(Clone, Debug, Serialize)]
pub struct ModeProfile {
    pub description: &'static str,
    pub audit_log: &'static str,
    pub alerting: &'static str,
    pub verification: &'static str,
    pub certification: &'static str,
    pub exposes_violations: bool,
    pub public_registry: bool,
}

impl SovereignMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SovereignMode::Shield => "SHIELD",
            SovereignMode::Sword => "SWORD",
            SovereignMode::Judge => "JUDGE",
        }
    }

    pub fn profile(self) -> ModeProfile {
        match self {
            SovereignMode::Shield => ModeProfile {
                description: "Lawyer Mode - Defend the Giants",
                audit_log: "private",
                alerting: "internal_only",
                verification: "mpc_secret",
                certification: "private_report",
                exposes_violations: false,
                public_registry: false,
            },
            SovereignMode::Sword => ModeProfile {
                description: "Police Mode - Enforce the Law",
                audit_log: "public",
                alerting: "whistleblower_eu",
                verification: "zk_proof",
                certification: "public_trust",
                exposes_violations: true,
                public_registry: true,
            },
            SovereignMode::Judge => ModeProfile {
                description: "Judge Mode - Set the Standards",
                audit_log: "canonical",
                alerting: "court_rulings",
                verification: "binding_interpretation",
                certification: "legal_precedent",
                exposes_violations: true,
                public_registry: true,
            },
        }
    }

    pub fn verification_type(self) -> &'static str {
        match self {
            SovereignMode::Shield => "MPC (weights stay secret)",
            SovereignMode::Sword => "ZK Proofs (verifiable truth)",
            SovereignMode::Judge => "Binding Interpretation (legal standard)",
        }
    }

    pub fn can_expose_violations(self) -> bool {
        matches!(self, SovereignMode::Sword | SovereignMode::Judge)
    }

    pub fn is_public_registry(self) -> bool {
        matches!(self, SovereignMode::Sword | SovereignMode::Judge)
    }

    /// How each tracked EU AI Act article is honoured in this mode.
    pub fn article_mapping(self) -> BTreeMap<&'static str, &'static str> {
        let texts = match self {
            SovereignMode::Shield => [
                "Private logging for client compliance",
                "Transparent to client only",
                "Internal human oversight",
                "Client-managed accuracy",
            ],
            SovereignMode::Sword => [
                "Public immutable ledger for regulators",
                "Full transparency to EU",
                "Sovereign Pause (kill switch)",
                "Mandatory accuracy testing",
            ],
            SovereignMode::Judge => [
                "Canonical audit trail (legal standard)",
                "Binding transparency rules",
                "Court-enforced oversight",
                "Precedent-setting accuracy standards",
            ],
        };
        ["article_12", "article_13", "article_14", "article_15"]
            .into_iter()
            .zip(texts)
            .collect()
    }

    /// Multi-line startup summary.
    pub fn banner(self) -> String {
        let p = self.profile();
        format!(
            "Digital Gallows {VERSION}\n  mode:               {}\n  description:        {}\n  audit log:          {}\n  alerting:           {}\n  verification:       {}\n  certification:      {}\n  exposes violations: {}\n  public registry:    {}",
            self.as_str(),
            p.description,
            p.audit_log,
            p.alerting,
            self.verification_type(),
            p.certification,
            self.can_expose_violations(),
            self.is_public_registry(),
        )
    }
}

impl fmt::Display for SovereignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl FromStr for SovereignMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SHIELD" => Ok(SovereignMode::Shield),
            "SWORD" => Ok(SovereignMode::Sword),
            "JUDGE" => Ok(SovereignMode::Judge),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: SovereignMode,
    pub addr: String,
    pub api_key: String,
    pub data_dir: PathBuf,
    pub quorum_threshold: usize,
    pub quorum_nodes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: SovereignMode::Shield,
            addr: "127.0.0.1:8080".to_string(),
            api_key: "dev-secret-key".to_string(),
            data_dir: PathBuf::from("data"),
            quorum_threshold: 3,
            quorum_nodes: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let mode = match lookup("SOVEREIGN_MODE") {
            None => defaults.mode,
            Some(raw) => raw.parse().unwrap_or_else(|UnknownMode(m)| {
                tracing::warn!(mode = %m, "unknown SOVEREIGN_MODE, falling back to SHIELD");
                SovereignMode::Shield
            }),
        };

        Self {
            mode,
            addr: lookup("BACKEND_ADDR").unwrap_or(defaults.addr),
            api_key: lookup("API_KEY").unwrap_or(defaults.api_key),
            data_dir: lookup("GALLOWS_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            quorum_threshold: parse_or(&lookup, "QUORUM_THRESHOLD", defaults.quorum_threshold),
            quorum_nodes: parse_or(&lookup, "QUORUM_NODES", defaults.quorum_nodes),
        }
    }

    /// Node ids for the local quorum network.
    pub fn quorum_node_ids(&self) -> Vec<String> {
        (1..=self.quorum_nodes).map(|i| format!("node-{i}")).collect()
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(%key, value = %raw, default, "invalid number, using default");
            default
        }),
    }
}
