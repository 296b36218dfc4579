//! Network port and health-check configuration.
//!
//! User-provided values are preserved exactly as they arrived; all
//! normalization happens on copies at descriptor-emission time.

use super::flex::FlexInt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A single exposed port, as supplied by the user or synthesized from
/// artifact-detected ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NetworkPort {
    #[serde(rename = "port", alias = "port_number", default)]
    pub port_number: FlexInt,

    #[serde(rename = "type", alias = "port_type", alias = "portType", default)]
    pub port_type: String,

    /// Never flipped implicitly; the user's value wins unconditionally.
    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub domain: String,

    #[serde(alias = "customDomain", default)]
    pub custom_domain: String,

    #[serde(alias = "hasHealthCheck", default)]
    pub has_health_check: String,

    #[serde(alias = "healthCheck", default)]
    pub health_check: HealthCheck,
}

impl NetworkPort {
    pub fn port(&self) -> i64 {
        self.port_number.value()
    }
}

/// Health-check settings attached to a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HealthCheck {
    #[serde(rename = "type", default)]
    pub check_type: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub interval: String,

    #[serde(default)]
    pub timeout: String,

    #[serde(default)]
    pub port: FlexInt,
}

const ALLOWED_CHECK_TYPES: &[&str] = &["grpc", "tcp", "http", "script"];
const DEFAULT_INTERVAL: &str = "30s";

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+[smhd]$").unwrap())
}

/// True for strings like `30s`, `5m`, `1h`, `7d`.
pub fn is_duration(value: &str) -> bool {
    duration_re().is_match(value)
}

/// Purely numeric values get a seconds suffix, well-formed durations are
/// kept, anything else falls back to the default.
fn normalize_duration(value: &str) -> String {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return format!("{}s", value);
    }
    if is_duration(value) {
        return value.to_string();
    }
    DEFAULT_INTERVAL.to_string()
}

impl HealthCheck {
    /// Normalized copy for descriptor emission. The input is never mutated.
    ///
    /// `parent_port` is the surrounding entry's port number, inherited when
    /// the check does not name its own.
    pub fn normalized(&self, parent_port: i64) -> HealthCheck {
        let check_type = if ALLOWED_CHECK_TYPES.contains(&self.check_type.as_str()) {
            self.check_type.clone()
        } else {
            "tcp".to_string()
        };

        // A path holding an interval string is a misfiled duration, not a path.
        let path = if self.path.is_empty() || is_duration(&self.path) {
            "/".to_string()
        } else {
            self.path.clone()
        };

        let port = if self.port.value() <= 0 {
            parent_port
        } else {
            self.port.value()
        };

        HealthCheck {
            check_type,
            path,
            interval: normalize_duration(&self.interval),
            timeout: normalize_duration(&self.timeout),
            port: FlexInt(port),
        }
    }

    /// Default check for synthesized zero-config entries.
    pub fn synthesized(port_type: PortType, port: i64) -> HealthCheck {
        let (check_type, path) = if port_type.is_http_like() {
            ("http", "/")
        } else {
            ("tcp", "/")
        };
        HealthCheck {
            check_type: check_type.to_string(),
            path: path.to_string(),
            interval: DEFAULT_INTERVAL.to_string(),
            timeout: DEFAULT_INTERVAL.to_string(),
            port: FlexInt(port),
        }
    }
}

/// Port type used when synthesizing zero-config network entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Http,
    Https,
    Tcp,
    Grpc,
}

impl PortType {
    pub fn as_str(self) -> &'static str {
        match self {
            PortType::Http => "http",
            PortType::Https => "https",
            PortType::Tcp => "tcp",
            PortType::Grpc => "grpc",
        }
    }

    pub fn is_http_like(self) -> bool {
        matches!(self, PortType::Http | PortType::Https)
    }
}

/// Conventional port-number to protocol mapping. Only consulted when the
/// user supplied no networks at all.
pub fn infer_port_type(port: i64) -> PortType {
    match port {
        80 | 3000 | 5000 | 8000 | 8080 | 8888 | 9000 => PortType::Http,
        443 | 8443 => PortType::Https,
        _ => PortType::Tcp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_normalization() {
        assert_eq!(normalize_duration("30"), "30s");
        assert_eq!(normalize_duration("45s"), "45s");
        assert_eq!(normalize_duration("5m"), "5m");
        assert_eq!(normalize_duration("1h"), "1h");
        assert_eq!(normalize_duration("7d"), "7d");
        assert_eq!(normalize_duration(""), "30s");
        assert_eq!(normalize_duration("soon"), "30s");
        assert_eq!(normalize_duration("10x"), "30s");
    }

    #[test]
    fn test_check_type_fallback() {
        let hc = HealthCheck {
            check_type: "websocket".to_string(),
            ..HealthCheck::default()
        };
        assert_eq!(hc.normalized(80).check_type, "tcp");

        let hc = HealthCheck {
            check_type: "grpc".to_string(),
            ..HealthCheck::default()
        };
        assert_eq!(hc.normalized(80).check_type, "grpc");
    }

    #[test]
    fn test_path_never_holds_an_interval() {
        let hc = HealthCheck {
            path: "30s".to_string(),
            ..HealthCheck::default()
        };
        assert_eq!(hc.normalized(80).path, "/");

        let hc = HealthCheck {
            path: "".to_string(),
            ..HealthCheck::default()
        };
        assert_eq!(hc.normalized(80).path, "/");

        let hc = HealthCheck {
            path: "/healthz".to_string(),
            ..HealthCheck::default()
        };
        assert_eq!(hc.normalized(80).path, "/healthz");
    }

    #[test]
    fn test_port_inherited_from_parent() {
        let hc = HealthCheck::default();
        assert_eq!(hc.normalized(8080).port.value(), 8080);

        let hc = HealthCheck {
            port: FlexInt(9999),
            ..HealthCheck::default()
        };
        assert_eq!(hc.normalized(8080).port.value(), 9999);
    }

    #[test]
    fn test_normalization_does_not_mutate_input() {
        let hc = HealthCheck {
            check_type: "bogus".to_string(),
            path: String::new(),
            interval: "10".to_string(),
            timeout: String::new(),
            port: FlexInt(0),
        };
        let _ = hc.normalized(80);
        assert_eq!(hc.check_type, "bogus");
        assert_eq!(hc.interval, "10");
    }

    #[test]
    fn test_port_type_inference() {
        assert_eq!(infer_port_type(80), PortType::Http);
        assert_eq!(infer_port_type(3000), PortType::Http);
        assert_eq!(infer_port_type(8888), PortType::Http);
        assert_eq!(infer_port_type(443), PortType::Https);
        assert_eq!(infer_port_type(8443), PortType::Https);
        assert_eq!(infer_port_type(5432), PortType::Tcp);
        assert_eq!(infer_port_type(6379), PortType::Tcp);
        assert_eq!(infer_port_type(12345), PortType::Tcp);
    }

    #[test]
    fn test_network_port_wire_names() {
        let port: NetworkPort = serde_json::from_str(
            r#"{"port": "8080", "type": "http", "public": false, "domain": "api"}"#,
        )
        .unwrap();
        assert_eq!(port.port(), 8080);
        assert_eq!(port.port_type, "http");
        assert!(!port.public);
        assert_eq!(port.domain, "api");
    }
}
