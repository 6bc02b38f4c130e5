// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment configuration. Read once at startup; a malformed value
//! is fatal then, never mid-cycle.

use anyhow::{anyhow, bail, Context, Result};
use collector::NxapiConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the persisted snapshot store.
    pub snapdir: PathBuf,
    /// Collection cycle interval.
    pub poll_interval: Duration,
    /// Port for the Prometheus metrics endpoint.
    pub prom_port: u16,
    /// Port for the read API.
    pub api_port: u16,
    /// Prefer JSON-RPC over HTTPS for NX-OS devices.
    pub use_nxapi: bool,
    pub nxapi: NxapiConfig,
    /// Credentials for inventory-sourced devices.
    pub netops_user: Option<String>,
    pub netops_pass: Option<String>,
    /// Pull the inventory from NetBox instead of the static list.
    pub use_netbox: bool,
    pub nb_url: Option<String>,
    pub nb_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            snapdir: PathBuf::from(
                env_str("SNAPDIR").unwrap_or_else(|| "./route_snaps".into()),
            ),
            poll_interval: Duration::from_secs(env_parse(
                "POLL_INTERVAL_SEC",
                60,
            )?),
            prom_port: env_parse("PROM_PORT", 9108)?,
            api_port: env_parse("API_PORT", 8080)?,
            use_nxapi: env_bool("USE_NXAPI", false)?,
            nxapi: NxapiConfig {
                scheme: env_str("NXAPI_SCHEME")
                    .unwrap_or_else(|| "https".into()),
                port: env_parse("NXAPI_PORT", 443)?,
                verify: env_bool("NXAPI_VERIFY", false)?,
            },
            netops_user: env_str("NETOPS_USER"),
            netops_pass: env_str("NETOPS_PASS"),
            use_netbox: env_bool("USE_NETBOX", false)?,
            nb_url: env_str("NB_URL"),
            nb_token: env_str("NB_TOKEN"),
        };

        if config.poll_interval.is_zero() {
            bail!("POLL_INTERVAL_SEC must be at least 1");
        }
        if config.use_netbox {
            if config.nb_url.is_none() || config.nb_token.is_none() {
                bail!(
                    "NetBox inventory requested but NB_URL/NB_TOKEN not set"
                );
            }
            if config.netops_user.is_none() || config.netops_pass.is_none() {
                bail!(
                    "NetBox inventory requires NETOPS_USER and NETOPS_PASS"
                );
            }
        }

        Ok(config)
    }

    /// Cycles that run past this deadline are aborted.
    pub fn cycle_deadline(&self) -> Duration {
        self.poll_interval * 2
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_str(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("malformed {key}='{raw}'")),
        None => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env_str(key) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(anyhow!("malformed {key}='{raw}', expected bool")),
        },
        None => Ok(default),
    }
}
