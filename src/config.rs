use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::engine::EngineConfig;
use crate::selector::SelectionPolicy;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub engine: EngineConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(env_string)
    }

    /// Creates a configuration from an arbitrary variable source.
    ///
    /// `lookup` returns the trimmed, non-empty value of a variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api: ApiConfig::from_lookup(&lookup),
            engine: load_engine_config(&lookup),
            store: StoreConfig::from_lookup(&lookup),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "STOW_IT_NOW_API_HOST";
    const PORT_VAR: &'static str = "STOW_IT_NOW_API_PORT";

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host_value = lookup(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                tracing::warn!(
                    var = Self::HOST_VAR,
                    value = %host_value,
                    error = %err,
                    "Could not parse host, using {}",
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match lookup(Self::PORT_VAR) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    tracing::warn!(
                        var = Self::PORT_VAR,
                        "Port must not be 0, using {}",
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    tracing::warn!(
                        var = Self::PORT_VAR,
                        value = %raw,
                        error = %err,
                        "Could not parse port, using {}",
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

/// Configuration for the backing store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    seed_demo_data: bool,
}

impl StoreConfig {
    const DEFAULT_SEED_DEMO_DATA: bool = true;
    const SEED_DEMO_DATA_VAR: &'static str = "STOW_IT_NOW_SEED_DEMO_DATA";

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let seed_demo_data = lookup(Self::SEED_DEMO_DATA_VAR)
            .and_then(|raw| parse_bool(&raw, Self::SEED_DEMO_DATA_VAR))
            .unwrap_or(Self::DEFAULT_SEED_DEMO_DATA);
        Self { seed_demo_data }
    }

    /// Whether the store starts with the demo storage units and carriers.
    pub fn seed_demo_data(&self) -> bool {
        self.seed_demo_data
    }
}

const SELECTION_POLICY_VAR: &str = "STOW_IT_NOW_SELECTION_POLICY";
const MAX_CANDIDATES_VAR: &str = "STOW_IT_NOW_MAX_SHIPMENT_CANDIDATES";

fn load_engine_config(lookup: impl Fn(&str) -> Option<String>) -> EngineConfig {
    let selection_policy = match lookup(SELECTION_POLICY_VAR) {
        Some(raw) => raw.parse::<SelectionPolicy>().unwrap_or_else(|err| {
            tracing::warn!(
                var = SELECTION_POLICY_VAR,
                error = %err,
                "Invalid selection policy, using {}",
                SelectionPolicy::default()
            );
            SelectionPolicy::default()
        }),
        None => SelectionPolicy::default(),
    };
    if selection_policy != SelectionPolicy::default() {
        tracing::warn!(
            var = SELECTION_POLICY_VAR,
            policy = %selection_policy,
            "Adjusted selection policy changes which units items land in"
        );
    }

    let max_shipment_candidates = load_usize_with_warning(
        &lookup,
        MAX_CANDIDATES_VAR,
        EngineConfig::DEFAULT_MAX_SHIPMENT_CANDIDATES,
        |value| value >= 1,
        "must be at least 1",
        "Adjusted candidate limit changes the worst-case search time",
    );

    EngineConfig::builder()
        .selection_policy(selection_policy)
        .max_shipment_candidates(max_shipment_candidates)
        .build()
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            tracing::warn!(var = name, error = %err, "Access failed, using default value");
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            tracing::warn!(
                var = var_name,
                value = other,
                "Could not interpret as boolean value, using default value"
            );
            None
        }
    }
}

fn load_usize_with_warning(
    lookup: impl Fn(&str) -> Option<String>,
    var_name: &str,
    default: usize,
    validator: impl Fn(usize) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> usize {
    match lookup(var_name) {
        Some(raw) => match raw.parse::<usize>() {
            Ok(value) if !validator(value) => {
                tracing::warn!(
                    var = var_name,
                    value = %raw,
                    "Invalid value ({}), using {}",
                    invalid_hint,
                    default
                );
                default
            }
            Ok(value) => {
                if value != default {
                    tracing::warn!(var = var_name, value, "{}", warning);
                }
                value
            }
            Err(err) => {
                tracing::warn!(
                    var = var_name,
                    value = %raw,
                    error = %err,
                    "Could not parse as number, using {}",
                    default
                );
                default
            }
        },
        None => default,
    }
}
