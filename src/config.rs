use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::catalog::CatalogSet;
use crate::packer::PackingConfig;
use crate::rates::RateShopConfig;

/// Source of raw configuration values, keyed by variable name.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub packing: PackingSettings,
    pub rates: RateProviderConfig,
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(&env_string)
    }

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            api: ApiConfig::from_lookup(lookup),
            packing: PackingSettings::from_lookup(lookup),
            rates: RateProviderConfig::from_lookup(lookup),
            catalog: CatalogConfig::from_lookup(lookup),
        }
    }

    /// Settings for one rate-shopping pass.
    pub fn rate_shop_config(&self) -> RateShopConfig {
        RateShopConfig {
            buffers: self.packing.packing_config(),
            provider_timeout: self.rates.timeout(),
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
    const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    const DEFAULT_PORT: u16 = 8080;

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let host_value =
            lookup("SHIP_IT_NOW_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, display_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                tracing::warn!(
                    value = %host_value,
                    error = %err,
                    "could not parse SHIP_IT_NOW_API_HOST, using {}",
                    Self::DEFAULT_HOST
                );
                (Self::DEFAULT_BIND_IP, Self::DEFAULT_HOST.to_string())
            }
        };

        let port = load_with_warning(
            lookup,
            "SHIP_IT_NOW_API_PORT",
            Self::DEFAULT_PORT,
            |value| value != 0,
            "must not be 0",
        );

        Self {
            bind_ip,
            display_host,
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
}

/// Safety buffers applied by the packer and when declaring packages.
#[derive(Clone, Debug)]
pub struct PackingSettings {
    packing: PackingConfig,
}

impl PackingSettings {
    const VOLUME_BUFFER_VAR: &'static str = "SHIP_IT_NOW_VOLUME_BUFFER";
    const WEIGHT_BUFFER_VAR: &'static str = "SHIP_IT_NOW_WEIGHT_BUFFER";

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let is_fraction = |value: f64| value > 0.0 && value <= 1.0;

        let volume_buffer = load_with_warning(
            lookup,
            Self::VOLUME_BUFFER_VAR,
            PackingConfig::DEFAULT_VOLUME_BUFFER,
            is_fraction,
            "must be within (0, 1]",
        );
        let weight_buffer = load_with_warning(
            lookup,
            Self::WEIGHT_BUFFER_VAR,
            PackingConfig::DEFAULT_WEIGHT_BUFFER,
            is_fraction,
            "must be within (0, 1]",
        );

        let packing = PackingConfig::builder()
            .volume_buffer(volume_buffer)
            .weight_buffer(weight_buffer)
            .build();

        Self { packing }
    }

    pub fn packing_config(&self) -> PackingConfig {
        self.packing
    }
}

/// Connection settings of the external rate provider.
#[derive(Clone, Debug)]
pub struct RateProviderConfig {
    endpoint: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

impl RateProviderConfig {
    const DEFAULT_TIMEOUT_SECS: u64 = 15;

    fn from_lookup(lookup: Lookup<'_>) -> Self {
        let timeout_secs = load_with_warning(
            lookup,
            "SHIP_IT_NOW_RATE_TIMEOUT_SECS",
            Self::DEFAULT_TIMEOUT_SECS,
            |value| value > 0,
            "must be greater than 0",
        );

        Self {
            endpoint: lookup("SHIP_IT_NOW_RATE_PROVIDER_URL"),
            token: lookup("SHIP_IT_NOW_RATE_PROVIDER_TOKEN"),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Endpoint of the rate provider; rate shopping is disabled without one.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Time budget of one rate-provider call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Where box catalogs come from.
#[derive(Clone, Debug)]
pub struct CatalogConfig {
    path: Option<PathBuf>,
}

impl CatalogConfig {
    fn from_lookup(lookup: Lookup<'_>) -> Self {
        Self {
            path: lookup("SHIP_IT_NOW_BOX_CATALOG_PATH").map(PathBuf::from),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads the configured catalog file, falling back to the built-in catalogs.
    pub fn load(&self) -> CatalogSet {
        let Some(path) = self.path.as_deref() else {
            return CatalogSet::builtin();
        };

        match CatalogSet::load_from_path(path) {
            Ok(catalogs) => {
                tracing::info!(path = %path.display(), sources = catalogs.len(), "loaded box catalogs");
                catalogs
            }
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "could not load box catalogs, using built-in catalogs"
                );
                CatalogSet::builtin()
            }
        }
    }
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
            tracing::warn!(variable = name, error = %err, "access failed, using default value");
            None
        }
    }
}

fn load_with_warning<T>(
    lookup: Lookup<'_>,
    var_name: &str,
    default: T,
    validator: impl Fn(T) -> bool,
    invalid_hint: &str,
) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(var_name) else {
        return default;
    };

    match raw.parse::<T>() {
        Ok(value) if validator(value) => value,
        Ok(_) => {
            tracing::warn!(
                variable = var_name,
                value = %raw,
                "invalid value: {invalid_hint}, using {default}"
            );
            default
        }
        Err(err) => {
            tracing::warn!(
                variable = var_name,
                value = %raw,
                error = %err,
                "could not parse value, using {default}"
            );
            default
        }
    }
}
