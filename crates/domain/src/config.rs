//! Environment-driven configuration shared by the monitor and API binaries.

use std::{env, time::Duration};

use thiserror::Error;

use crate::address::{AddressError, LedgerAddress};
use crate::credential::{CredentialError, SigningCredential};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Immutable forwarding settings, validated once at startup.
///
/// The credential must control the monitored account; any mismatch is a
/// configuration error rather than something to retry.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    credential: SigningCredential,
    monitored_address: LedgerAddress,
    destination_address: LedgerAddress,
    fee_reserve: u64,
    poll_interval: Duration,
    ledger_endpoint: String,
    ledger_api_key: Option<String>,
    signer: SignerSettings,
}

/// How to reach the external co-signer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerSettings {
    pub url: String,
    pub address: Option<LedgerAddress>,
    /// `None` waits for the co-signer indefinitely.
    pub timeout: Option<Duration>,
}

impl ForwardingConfig {
    pub fn new(
        credential: SigningCredential,
        monitored_address: LedgerAddress,
        destination_address: LedgerAddress,
        fee_reserve: u64,
        poll_interval: Duration,
        ledger_endpoint: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if credential.address() != &monitored_address {
            return Err(ConfigError::CredentialMismatch {
                derived: credential.address().to_string(),
                configured: monitored_address.to_string(),
            });
        }
        if destination_address == monitored_address {
            return Err(ConfigError::DestinationIsMonitored);
        }
        if poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        let ledger_endpoint = validate_url("FORWARDER_LEDGER_ENDPOINT", ledger_endpoint.into())?;

        Ok(Self {
            credential,
            monitored_address,
            destination_address,
            fee_reserve,
            poll_interval,
            ledger_endpoint,
            ledger_api_key: None,
            signer: SignerSettings::default(),
        })
    }

    pub fn with_signer(mut self, signer: SignerSettings) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_ledger_api_key(mut self, key: Option<String>) -> Self {
        self.ledger_api_key = key;
        self
    }

    /// Hydrates `.env` (if present) and reads the `FORWARDER_*` variables.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let credential = SigningCredential::from_hex(&get_required_var("FORWARDER_PRIVATE_KEY")?)?;
        let monitored_address = get_address("FORWARDER_MONITORED_ADDRESS")?;
        let destination_address = get_address("FORWARDER_DESTINATION_ADDRESS")?;
        let fee_reserve = parse_number("FORWARDER_FEE_RESERVE_SUN", get_required_var("FORWARDER_FEE_RESERVE_SUN")?)?;
        let poll_interval = match get_optional_var("FORWARDER_POLL_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(parse_number("FORWARDER_POLL_INTERVAL_SECS", raw)?),
            None => DEFAULT_POLL_INTERVAL,
        };
        let ledger_endpoint = get_required_var("FORWARDER_LEDGER_ENDPOINT")?;

        let signer = SignerSettings {
            url: validate_url("FORWARDER_SIGNER_URL", get_required_var("FORWARDER_SIGNER_URL")?)?,
            address: get_optional_var("FORWARDER_SIGNER_ADDRESS")
                .map(|raw| {
                    LedgerAddress::parse(&raw).map_err(|source| ConfigError::InvalidAddress {
                        key: "FORWARDER_SIGNER_ADDRESS",
                        source,
                    })
                })
                .transpose()?,
            timeout: get_optional_var("FORWARDER_SIGNER_TIMEOUT_SECS")
                .map(|raw| parse_number("FORWARDER_SIGNER_TIMEOUT_SECS", raw).map(Duration::from_secs))
                .transpose()?,
        };

        Ok(Self::new(
            credential,
            monitored_address,
            destination_address,
            fee_reserve,
            poll_interval,
            ledger_endpoint,
        )?
        .with_signer(signer)
        .with_ledger_api_key(get_optional_var("FORWARDER_LEDGER_API_KEY")))
    }

    pub fn credential(&self) -> &SigningCredential {
        &self.credential
    }

    pub fn monitored_address(&self) -> &LedgerAddress {
        &self.monitored_address
    }

    pub fn destination_address(&self) -> &LedgerAddress {
        &self.destination_address
    }

    pub fn fee_reserve(&self) -> u64 {
        self.fee_reserve
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn ledger_endpoint(&self) -> &str {
        &self.ledger_endpoint
    }

    pub fn ledger_api_key(&self) -> Option<&str> {
        self.ledger_api_key.as_deref()
    }

    pub fn signer(&self) -> &SignerSettings {
        &self.signer
    }
}

/// HTTP surface settings for the API binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    api_bind_address: String,
    autostart: bool,
}

impl ApiConfig {
    /// Loads only the variables owned by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let autostart = match get_optional_var("API_AUTOSTART") {
            Some(raw) => parse_bool("API_AUTOSTART", &raw)?,
            None => true,
        };

        Ok(Self {
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            autostart,
        })
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    /// Whether monitoring starts as soon as the server boots.
    pub fn autostart(&self) -> bool {
        self.autostart
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_address(key: &'static str) -> Result<LedgerAddress, ConfigError> {
    LedgerAddress::parse(&get_required_var(key)?)
        .map_err(|source| ConfigError::InvalidAddress { key, source })
}

fn parse_number(key: &'static str, raw: String) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|source| ConfigError::InvalidNumber { key, source })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: raw.to_string(),
        }),
    }
}

fn validate_url(key: &'static str, raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidUrl { key, value: raw })
    }
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("FORWARDER_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or configuration validation fails.
/// All of them are fatal: monitoring never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid boolean in `{key}`: `{value}`")]
    InvalidBool { key: &'static str, value: String },
    #[error("invalid address in `{key}`: {source}")]
    InvalidAddress {
        key: &'static str,
        #[source]
        source: AddressError,
    },
    #[error("invalid url in `{key}`: `{value}`")]
    InvalidUrl { key: &'static str, value: String },
    #[error("invalid signing credential: {0}")]
    InvalidCredential(#[from] CredentialError),
    #[error("credential controls {derived} but monitored address is {configured}")]
    CredentialMismatch { derived: String, configured: String },
    #[error("destination address must differ from the monitored address")]
    DestinationIsMonitored,
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
