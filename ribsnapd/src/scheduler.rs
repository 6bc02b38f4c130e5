// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The collection cycle. Devices fan out as parallel tasks under a
//! bounded semaphore; inside a task everything is serial on one device
//! session. Failures are caught at two boundaries: a table failure
//! skips that coordinate, a device failure becomes a per-device error
//! report. Neither touches any other device or the next cycle.

use crate::config::Config;
use crate::error::Error;
use crate::inventory;
use crate::metrics::Metrics;
use collector::{Collector, Device, DeviceTables};
use schemars::JsonSchema;
use serde::Serialize;
use slog::{error, info, warn, Logger};
use snapdb::{bgp_diff, rib_diff, DiffPayload, Store, TableDiff};
use snapdb_types::{AddressFamily, BgpRow, RibRow, TableKind, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

/// Upper bound on concurrently polled devices.
pub const MAX_FANOUT: usize = 16;

/// Everything a device task needs, shared across the cycle.
pub struct CycleContext {
    pub store: Store,
    pub collector: Collector,
    pub metrics: Arc<Metrics>,
    pub log: Logger,
}

/// Per-device outcome of one cycle. Serialized as-is into the `--once`
/// report: either an error or the diffs produced per coordinate.
#[derive(Debug, Serialize, JsonSchema)]
pub struct DeviceReport {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub vrfs: BTreeMap<String, BTreeMap<String, DiffPayload>>,
}

impl DeviceReport {
    fn ok(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            error: None,
            vrfs: BTreeMap::new(),
        }
    }

    fn failed(device: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            error: Some(error.into()),
            vrfs: BTreeMap::new(),
        }
    }
}

/// Run the poller until the process exits.
pub async fn run_forever(ctx: Arc<CycleContext>, config: Config) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    // an overrunning cycle coalesces into one immediate restart, it
    // does not queue a backlog of ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let devices = match inventory::fetch(&config, &ctx.log).await {
            Ok(devices) => devices,
            Err(e) => {
                error!(ctx.log, "inventory fetch failed"; "error" => %e);
                continue;
            }
        };
        let started = std::time::Instant::now();
        let reports =
            run_cycle(ctx.clone(), devices, config.cycle_deadline()).await;
        let failures =
            reports.iter().filter(|r| r.error.is_some()).count();
        info!(
            ctx.log,
            "cycle complete";
            "devices" => reports.len(),
            "failures" => failures,
            "elapsed_ms" => started.elapsed().as_millis() as u64,
        );
    }
}

/// Run one cycle across the inventory and return per-device reports.
pub async fn run_cycle(
    ctx: Arc<CycleContext>,
    devices: Vec<Device>,
    deadline: Duration,
) -> Vec<DeviceReport> {
    let permits = Arc::new(Semaphore::new(
        devices.len().clamp(1, MAX_FANOUT),
    ));

    let mut handles = Vec::new();
    for device in devices {
        let ctx = ctx.clone();
        let permits = permits.clone();
        let name = device.name.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .expect("cycle semaphore closed");
            let device_name = device.name.clone();
            match run_device_cycle(&ctx, &device).await {
                Ok(report) => report,
                Err(e) => {
                    error!(
                        ctx.log,
                        "device cycle failed";
                        "device" => device_name.as_str(),
                        "error" => %e,
                    );
                    DeviceReport::failed(device_name, e.to_string())
                }
            }
        });
        handles.push((name, handle));
    }

    let cutoff = tokio::time::Instant::now() + deadline;
    let mut expired = false;
    let mut reports = Vec::new();
    for (name, mut handle) in handles {
        let joined = if expired {
            handle.abort();
            handle.await
        } else {
            match tokio::time::timeout_at(cutoff, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    expired = true;
                    handle.abort();
                    handle.await
                }
            }
        };
        match joined {
            Ok(report) => reports.push(report),
            Err(e) if e.is_cancelled() => {
                warn!(
                    ctx.log,
                    "cycle deadline exceeded, device task aborted";
                    "device" => name.as_str(),
                );
                reports.push(DeviceReport::failed(
                    name,
                    "cycle deadline exceeded",
                ));
            }
            Err(e) => {
                error!(
                    ctx.log,
                    "device task panicked";
                    "device" => name.as_str(),
                    "error" => %e,
                );
                reports.push(DeviceReport::failed(
                    name,
                    format!("device task panicked: {e}"),
                ));
            }
        }
    }
    reports
}

/// One device: collect over the owned session, then persist and diff
/// per coordinate.
pub async fn run_device_cycle(
    ctx: &CycleContext,
    device: &Device,
) -> Result<DeviceReport, Error> {
    let tables = ctx.collector.collect(device).await?;
    let ts = Timestamp::now();
    persist_device_tables(
        &ctx.store,
        &ctx.metrics,
        device,
        &tables,
        &ts,
        &ctx.log,
    )
}

/// Persist snapshots and emit diffs for every coordinate that collected
/// cleanly. A coordinate with a failed table keeps its previous
/// "latest" untouched and emits nothing. A failed latest-replace after
/// a successful archive escalates to a device-level error.
pub fn persist_device_tables(
    store: &Store,
    metrics: &Metrics,
    device: &Device,
    tables: &DeviceTables,
    ts: &Timestamp,
    log: &Logger,
) -> Result<DeviceReport, Error> {
    let mut report = DeviceReport::ok(&device.name);

    for vrf in &device.vrfs {
        for &afi in &device.afis {
            match persist_coordinate(
                store, metrics, device, tables, vrf, afi, ts,
            ) {
                Ok(Some(payload)) => {
                    report
                        .vrfs
                        .entry(vrf.clone())
                        .or_default()
                        .insert(afi.to_string(), payload);
                }
                Ok(None) => {}
                Err(Error::Db(snapdb::Error::LatestReplace(e))) => {
                    // the archive made it to disk; keep it as forensic
                    // evidence and fail the device
                    return Err(Error::Db(snapdb::Error::LatestReplace(e)));
                }
                Err(e) => {
                    warn!(
                        log,
                        "coordinate cycle abandoned";
                        "device" => device.name.as_str(),
                        "vrf" => vrf.as_str(),
                        "afi" => %afi,
                        "error" => %e,
                    );
                }
            }
        }
    }

    Ok(report)
}

/// Handle one `(vrf, afi)` coordinate: write snapshots for the tables
/// that collected, and emit a combined diff when a prior snapshot
/// existed for at least one of them. Cold start (no prior) is silent.
fn persist_coordinate(
    store: &Store,
    metrics: &Metrics,
    device: &Device,
    tables: &DeviceTables,
    vrf: &str,
    afi: AddressFamily,
    ts: &Timestamp,
) -> Result<Option<DiffPayload>, Error> {
    let name = device.name.as_str();
    let mut payload = DiffPayload {
        device: name.to_string(),
        vrf: vrf.to_string(),
        afi,
        rib: TableDiff::default(),
        bgp: TableDiff::default(),
    };
    let mut have_prior = false;

    if !tables.failed(TableKind::Rib, vrf, afi) {
        let mut curr: Vec<RibRow> = tables
            .rib
            .iter()
            .filter(|r| r.vrf == vrf && r.afi == afi)
            .cloned()
            .collect();
        curr.sort_by_key(|r| r.key());

        let prev: Option<Vec<RibRow>> =
            store.read_latest(name, TableKind::Rib, vrf, afi)?;
        if let Some(prev) = prev {
            payload.rib = rib_diff(prev, curr.clone());
            have_prior = true;
        }
        store.write_latest_and_archive(
            name,
            TableKind::Rib,
            vrf,
            afi,
            &curr,
            ts,
        )?;
        metrics.observe_rib_snapshot(name, vrf, afi, &curr);
    }

    if !tables.failed(TableKind::Bgp, vrf, afi) {
        let mut curr: Vec<BgpRow> = tables
            .bgp
            .iter()
            .filter(|r| r.vrf == vrf && r.afi == afi)
            .cloned()
            .collect();
        curr.sort_by_key(|r| r.key());

        let prev: Option<Vec<BgpRow>> =
            store.read_latest(name, TableKind::Bgp, vrf, afi)?;
        if let Some(prev) = prev {
            payload.bgp = bgp_diff(prev, curr.clone());
            have_prior = true;
        }
        store.write_latest_and_archive(
            name,
            TableKind::Bgp,
            vrf,
            afi,
            &curr,
            ts,
        )?;
        metrics.observe_bgp_snapshot(name, vrf, afi, &curr);
    }

    if !have_prior {
        return Ok(None);
    }

    store.write_diff(name, vrf, afi, ts, &payload)?;
    metrics.observe_diff(&payload);
    Ok(Some(payload))
}

#[cfg(test)]
mod test {
    use super::*;
    use collector::{DeviceType, TableFailure};
    use snapdb_types::{NextHop, Prefix};
    use std::str::FromStr;

    fn test_device() -> Device {
        Device {
            device_type: DeviceType::CiscoXe,
            host: "198.51.100.1".to_string(),
            port: 22,
            username: "netops".to_string(),
            password: "secret".to_string(),
            name: "r1".to_string(),
            vrfs: vec!["default".to_string()],
            afis: vec![AddressFamily::Ipv4, AddressFamily::Ipv6],
        }
    }

    fn rib_row(afi: AddressFamily, prefix: &str, nh: &str) -> RibRow {
        RibRow {
            device: "r1".into(),
            vrf: "default".into(),
            afi,
            prefix: Prefix::from_str(prefix).unwrap(),
            protocol: "ospf".into(),
            distance: Some(110),
            metric: Some(20),
            best: true,
            nexthops: [NextHop::new(nh, None)].into_iter().collect(),
        }
    }

    fn setup() -> (Store, Metrics, tempfile::TempDir, Logger) {
        let dir = tempfile::TempDir::new().unwrap();
        let log = rs_common::log::init_logger();
        let store = Store::new(dir.path(), log.clone());
        let metrics = Metrics::new().unwrap();
        (store, metrics, dir, log)
    }

    #[test]
    fn cold_start_emits_no_diff() {
        let (store, metrics, _dir, log) = setup();
        let device = test_device();
        let tables = DeviceTables {
            rib: vec![rib_row(AddressFamily::Ipv4, "10.0.0.0/24", "1.1.1.1")],
            bgp: vec![],
            failures: vec![],
        };
        let ts: Timestamp = "20250811031450".parse().unwrap();
        let report = persist_device_tables(
            &store, &metrics, &device, &tables, &ts, &log,
        )
        .unwrap();

        assert!(report.error.is_none());
        assert!(report.vrfs.is_empty());
        // latest exists, diff series does not
        let latest: Option<Vec<RibRow>> = store
            .read_latest("r1", TableKind::Rib, "default", AddressFamily::Ipv4)
            .unwrap();
        assert_eq!(latest.unwrap().len(), 1);
        assert!(store.list_diffs("r1", None, None).unwrap().is_empty());
    }

    #[test]
    fn second_cycle_produces_diff() {
        let (store, metrics, _dir, log) = setup();
        let device = test_device();
        let first = DeviceTables {
            rib: vec![rib_row(AddressFamily::Ipv4, "10.0.0.0/24", "1.1.1.1")],
            bgp: vec![],
            failures: vec![],
        };
        let ts1: Timestamp = "20250811031450".parse().unwrap();
        persist_device_tables(&store, &metrics, &device, &first, &ts1, &log)
            .unwrap();

        let second = DeviceTables {
            rib: vec![
                rib_row(AddressFamily::Ipv4, "10.0.0.0/24", "1.1.1.1"),
                rib_row(AddressFamily::Ipv4, "10.1.0.0/24", "2.2.2.2"),
            ],
            bgp: vec![],
            failures: vec![],
        };
        let ts2: Timestamp = "20250811031550".parse().unwrap();
        let report = persist_device_tables(
            &store, &metrics, &device, &second, &ts2, &log,
        )
        .unwrap();

        let payload = &report.vrfs["default"]["ipv4"];
        assert_eq!(payload.rib.adds.len(), 1);
        assert_eq!(
            payload.rib.adds[0].prefix.to_string(),
            "10.1.0.0/24"
        );
        assert!(payload.rib.rems.is_empty());

        let diffs = store.list_diffs("r1", None, None).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].summary.added, 1);
    }

    #[test]
    fn failed_table_isolates_to_its_coordinate() {
        let (store, metrics, _dir, log) = setup();
        let device = test_device();

        // cycle 1: both address families collect
        let first = DeviceTables {
            rib: vec![
                rib_row(AddressFamily::Ipv4, "10.0.0.0/24", "1.1.1.1"),
                rib_row(AddressFamily::Ipv6, "2001:db8::/64", "fe80::1"),
            ],
            bgp: vec![],
            failures: vec![],
        };
        let ts1: Timestamp = "20250811031450".parse().unwrap();
        persist_device_tables(&store, &metrics, &device, &first, &ts1, &log)
            .unwrap();

        // cycle 2: ipv6 rib command fails; ipv4 moves
        let second = DeviceTables {
            rib: vec![rib_row(AddressFamily::Ipv4, "10.9.0.0/24", "1.1.1.1")],
            bgp: vec![],
            failures: vec![TableFailure {
                kind: TableKind::Rib,
                vrf: "default".to_string(),
                afi: AddressFamily::Ipv6,
                error: "command rejected".to_string(),
            }],
        };
        let ts2: Timestamp = "20250811031550".parse().unwrap();
        let report = persist_device_tables(
            &store, &metrics, &device, &second, &ts2, &log,
        )
        .unwrap();

        // ipv4 diffed; the failed ipv6 table kept its prior latest and
        // produced nothing
        assert!(report.vrfs["default"].contains_key("ipv4"));
        let v6_latest: Option<Vec<RibRow>> = store
            .read_latest("r1", TableKind::Rib, "default", AddressFamily::Ipv6)
            .unwrap();
        assert_eq!(
            v6_latest.unwrap()[0].prefix.to_string(),
            "2001:db8::/64"
        );
        let v6_diffs = store
            .list_diffs("r1", Some("default"), Some(AddressFamily::Ipv6))
            .unwrap();
        assert!(v6_diffs.is_empty());

        // cycle 3: ipv6 recovers and diffs against the untouched prior
        let third = DeviceTables {
            rib: vec![
                rib_row(AddressFamily::Ipv4, "10.9.0.0/24", "1.1.1.1"),
                rib_row(AddressFamily::Ipv6, "2001:db8:1::/64", "fe80::1"),
            ],
            bgp: vec![],
            failures: vec![],
        };
        let ts3: Timestamp = "20250811031650".parse().unwrap();
        let report = persist_device_tables(
            &store, &metrics, &device, &third, &ts3, &log,
        )
        .unwrap();
        let v6 = &report.vrfs["default"]["ipv6"];
        assert_eq!(v6.rib.adds.len(), 1);
        assert_eq!(v6.rib.rems.len(), 1);
    }

    #[test]
    fn rows_from_other_coordinates_are_filtered_out() {
        let (store, metrics, _dir, log) = setup();
        let mut device = test_device();
        device.afis = vec![AddressFamily::Ipv4];

        let mut stray = rib_row(AddressFamily::Ipv4, "10.2.0.0/24", "3.3.3.3");
        stray.vrf = "OTHER".to_string();
        let tables = DeviceTables {
            rib: vec![
                rib_row(AddressFamily::Ipv4, "10.0.0.0/24", "1.1.1.1"),
                stray,
            ],
            bgp: vec![],
            failures: vec![],
        };
        let ts: Timestamp = "20250811031450".parse().unwrap();
        persist_device_tables(&store, &metrics, &device, &tables, &ts, &log)
            .unwrap();

        let latest: Vec<RibRow> = store
            .read_latest("r1", TableKind::Rib, "default", AddressFamily::Ipv4)
            .unwrap()
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].prefix.to_string(), "10.0.0.0/24");
    }

    #[tokio::test]
    async fn empty_inventory_cycle_is_a_no_op() {
        let (store, metrics, _dir, log) = setup();
        let ctx = Arc::new(CycleContext {
            store,
            collector: Collector::new(log.clone()),
            metrics: Arc::new(metrics),
            log,
        });
        let reports =
            run_cycle(ctx, vec![], Duration::from_secs(5)).await;
        assert!(reports.is_empty());
    }
}
