// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device table collection.
//!
//! The collector owns the two acquisition paths (JSON-RPC over HTTPS for
//! NX-OS boxes, `| json` over an SSH CLI session for everything else),
//! runs the per-VRF/AFI show commands, and hands the raw JSON to the
//! shape reconciler. Every failure is scoped to a single
//! `(kind, vrf, afi)` table: a bad command never takes down the rest of
//! the device's cycle, and a bad device never takes down the cycle at
//! all (that boundary lives in the scheduler).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::{debug, warn, Logger};
use snapdb_types::{AddressFamily, BgpRow, RibRow, TableKind};
use std::sync::Arc;

pub mod cli;
pub mod error;
pub mod nxapi;
pub mod shapes;

pub use cli::{CliParser, CliSession, SshSession};
pub use error::Error;
pub use nxapi::{NxapiClient, NxapiConfig};

#[cfg(test)]
mod cli_channel;

/// Which transport family a device speaks. The tag values match the
/// inventory feed.
#[derive(
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    JsonSchema,
    Eq,
    PartialEq,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    CiscoNxos,
    CiscoXe,
}

/// One inventory entry: everything needed to reach a device and the
/// table coordinates to collect from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_type: DeviceType,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    pub vrfs: Vec<String>,
    pub afis: Vec<AddressFamily>,
}

fn default_ssh_port() -> u16 {
    22
}

/// A table that could not be collected this cycle. The scheduler treats
/// the coordinate as absent: no snapshot write, no diff.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableFailure {
    pub kind: TableKind,
    pub vrf: String,
    pub afi: AddressFamily,
    pub error: String,
}

/// Normalized output of one device collection.
#[derive(Debug, Default)]
pub struct DeviceTables {
    pub rib: Vec<RibRow>,
    pub bgp: Vec<BgpRow>,
    pub failures: Vec<TableFailure>,
}

pub fn rib_command(vrf: &str, afi: AddressFamily) -> String {
    match afi {
        AddressFamily::Ipv4 => format!("show ip route vrf {vrf}"),
        AddressFamily::Ipv6 => format!("show ipv6 route vrf {vrf}"),
    }
}

pub fn bgp_command(vrf: &str, afi: AddressFamily) -> String {
    match afi {
        AddressFamily::Ipv4 => format!("show bgp vrf {vrf} ipv4 unicast"),
        AddressFamily::Ipv6 => format!("show bgp vrf {vrf} ipv6 unicast"),
    }
}

/// One acquisition path, abstracted over so the table loop doesn't care
/// whether commands go out over HTTPS or a CLI session.
#[async_trait::async_trait]
trait Fetch: Send {
    async fn fetch(&mut self, cmd: &str) -> Result<serde_json::Value, Error>;
}

struct NxapiFetch {
    client: NxapiClient,
}

#[async_trait::async_trait]
impl Fetch for NxapiFetch {
    async fn fetch(&mut self, cmd: &str) -> Result<serde_json::Value, Error> {
        self.client.run(cmd).await
    }
}

struct CliFetch<'a, S: CliSession> {
    session: &'a mut S,
    parser: Option<Arc<dyn CliParser>>,
}

#[async_trait::async_trait]
impl<S: CliSession> Fetch for CliFetch<'_, S> {
    async fn fetch(&mut self, cmd: &str) -> Result<serde_json::Value, Error> {
        let reply = self.session.run(&format!("{cmd} | json")).await?;
        let trimmed = reply.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return Ok(serde_json::from_str(trimmed)?);
        }
        // The device rejected the json modifier. Last resort is the
        // pluggable structured-CLI parser over raw output.
        let Some(parser) = self.parser.clone() else {
            return Err(Error::NonJson(cmd.to_string()));
        };
        let raw = self.session.run(cmd).await?;
        parser.parse(cmd, &raw)
    }
}

/// The collector. Construct once, reuse across cycles; per-cycle state
/// (the CLI session) is scoped to `collect`.
#[derive(Clone)]
pub struct Collector {
    nxapi: Option<NxapiConfig>,
    cli_parser: Option<Arc<dyn CliParser>>,
    log: Logger,
}

impl Collector {
    pub fn new(log: Logger) -> Self {
        Self {
            nxapi: None,
            cli_parser: None,
            log,
        }
    }

    /// Prefer JSON-RPC over HTTPS for NX-OS devices. Devices of other
    /// families still use the CLI path.
    pub fn with_nxapi(mut self, config: NxapiConfig) -> Self {
        self.nxapi = Some(config);
        self
    }

    /// Plug in a structured-CLI parser used when a device refuses the
    /// `| json` modifier. Without one, non-JSON output is a per-table
    /// failure.
    pub fn with_cli_parser(mut self, parser: Arc<dyn CliParser>) -> Self {
        self.cli_parser = Some(parser);
        self
    }

    /// Collect all requested tables from one device. NX-API devices
    /// never open an SSH session; CLI devices open exactly one session
    /// for the duration of the cycle.
    pub async fn collect(&self, device: &Device) -> Result<DeviceTables, Error> {
        if device.device_type == DeviceType::CiscoNxos {
            if let Some(config) = &self.nxapi {
                let client = NxapiClient::new(config, device)?;
                let mut fetch = NxapiFetch { client };
                return self.collect_tables(device, &mut fetch).await;
            }
        }
        let mut session = SshSession::connect(device).await?;
        self.collect_over_cli(device, &mut session).await
    }

    /// Collect over an already-open CLI session. Split out so tests can
    /// drive the whole flow with a simulated session.
    pub async fn collect_over_cli<S: CliSession>(
        &self,
        device: &Device,
        session: &mut S,
    ) -> Result<DeviceTables, Error> {
        let mut fetch = CliFetch {
            session,
            parser: self.cli_parser.clone(),
        };
        self.collect_tables(device, &mut fetch).await
    }

    async fn collect_tables(
        &self,
        device: &Device,
        fetch: &mut dyn Fetch,
    ) -> Result<DeviceTables, Error> {
        let mut out = DeviceTables::default();
        for vrf in &device.vrfs {
            for &afi in &device.afis {
                let cmd = rib_command(vrf, afi);
                match fetch.fetch(&cmd).await {
                    Ok(parsed) => {
                        let rows =
                            shapes::parse_rib(&device.name, vrf, afi, &parsed);
                        debug!(
                            self.log,
                            "collected rib table";
                            "device" => device.name.as_str(),
                            "vrf" => vrf.as_str(),
                            "afi" => %afi,
                            "rows" => rows.len(),
                        );
                        out.rib.extend(rows);
                    }
                    Err(e) => {
                        warn!(
                            self.log,
                            "rib table collection failed";
                            "device" => device.name.as_str(),
                            "vrf" => vrf.as_str(),
                            "afi" => %afi,
                            "error" => %e,
                        );
                        out.failures.push(TableFailure {
                            kind: TableKind::Rib,
                            vrf: vrf.clone(),
                            afi,
                            error: e.to_string(),
                        });
                    }
                }

                let cmd = bgp_command(vrf, afi);
                match fetch.fetch(&cmd).await {
                    Ok(parsed) => {
                        let rows =
                            shapes::parse_bgp(&device.name, vrf, afi, &parsed);
                        debug!(
                            self.log,
                            "collected bgp table";
                            "device" => device.name.as_str(),
                            "vrf" => vrf.as_str(),
                            "afi" => %afi,
                            "rows" => rows.len(),
                        );
                        out.bgp.extend(rows);
                    }
                    Err(e) => {
                        warn!(
                            self.log,
                            "bgp table collection failed";
                            "device" => device.name.as_str(),
                            "vrf" => vrf.as_str(),
                            "afi" => %afi,
                            "error" => %e,
                        );
                        out.failures.push(TableFailure {
                            kind: TableKind::Bgp,
                            vrf: vrf.clone(),
                            afi,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}

impl DeviceTables {
    /// Did collection fail for this coordinate's table?
    pub fn failed(
        &self,
        kind: TableKind,
        vrf: &str,
        afi: AddressFamily,
    ) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == kind && f.vrf == vrf && f.afi == afi)
    }
}
