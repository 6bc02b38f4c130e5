// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Churn metrics. One process-global registry, built once at startup
//! and passed to the scheduler as a dependency; counters only move
//! forward within a process lifetime. The endpoint stays up through
//! device failures, it just stops advancing for the affected
//! coordinates.

use dropshot::{
    endpoint, ApiDescription, Body, ConfigDropshot, HttpError,
    HttpServerStarter, RequestContext,
};
use prometheus::{
    Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use slog::{error, info, o, warn, Logger};
use snapdb::DiffPayload;
use snapdb_types::{AddressFamily, BgpRow, RibRow};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Metrics {
    pub registry: Registry,

    // current-snapshot gauges
    route_count: IntGaugeVec,
    bgp_best_count: IntGaugeVec,

    // churn counters
    rib_adds: IntCounterVec,
    rib_removes: IntCounterVec,
    bgp_attr_changes: IntCounterVec,
    default_nexthop_changes: IntCounterVec,
    upstream_as_changes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let route_count = IntGaugeVec::new(
            Opts::new("route_count", "RIB route count"),
            &["device", "vrf", "afi"],
        )?;
        registry.register(Box::new(route_count.clone()))?;

        let bgp_best_count = IntGaugeVec::new(
            Opts::new("bgp_best_count", "BGP bestpath entries"),
            &["device", "vrf", "afi"],
        )?;
        registry.register(Box::new(bgp_best_count.clone()))?;

        let rib_adds = IntCounterVec::new(
            Opts::new("rib_adds_total", "RIB adds"),
            &["device", "vrf", "afi"],
        )?;
        registry.register(Box::new(rib_adds.clone()))?;

        let rib_removes = IntCounterVec::new(
            Opts::new("rib_removes_total", "RIB removes"),
            &["device", "vrf", "afi"],
        )?;
        registry.register(Box::new(rib_removes.clone()))?;

        let bgp_attr_changes = IntCounterVec::new(
            Opts::new("bgp_attr_changes_total", "BGP attribute changes"),
            &["device", "vrf", "afi", "attr"],
        )?;
        registry.register(Box::new(bgp_attr_changes.clone()))?;

        let default_nexthop_changes = IntCounterVec::new(
            Opts::new(
                "default_nexthop_change_total",
                "Default route nexthop change",
            ),
            &["device", "vrf", "afi"],
        )?;
        registry.register(Box::new(default_nexthop_changes.clone()))?;

        let upstream_as_changes = IntCounterVec::new(
            Opts::new("upstream_as_change_total", "Upstream ASN change"),
            &["device", "vrf", "afi", "prefix"],
        )?;
        registry.register(Box::new(upstream_as_changes.clone()))?;

        Ok(Self {
            registry,
            route_count,
            bgp_best_count,
            rib_adds,
            rib_removes,
            bgp_attr_changes,
            default_nexthop_changes,
            upstream_as_changes,
        })
    }

    /// Gauges track the snapshot that was just persisted.
    pub fn observe_rib_snapshot(
        &self,
        device: &str,
        vrf: &str,
        afi: AddressFamily,
        rows: &[RibRow],
    ) {
        let afi = afi.to_string();
        let distinct: BTreeSet<_> =
            rows.iter().map(|r| (r.prefix, r.protocol.as_str())).collect();
        self.route_count
            .with_label_values(&[device, vrf, &afi])
            .set(distinct.len() as i64);
    }

    pub fn observe_bgp_snapshot(
        &self,
        device: &str,
        vrf: &str,
        afi: AddressFamily,
        rows: &[BgpRow],
    ) {
        let afi = afi.to_string();
        let best = rows.iter().filter(|r| r.best).count();
        self.bgp_best_count
            .with_label_values(&[device, vrf, &afi])
            .set(best as i64);
    }

    /// Counters advance from a persisted diff.
    pub fn observe_diff(&self, payload: &DiffPayload) {
        let device = payload.device.as_str();
        let vrf = payload.vrf.as_str();
        let afi = payload.afi.to_string();

        self.rib_adds
            .with_label_values(&[device, vrf, &afi])
            .inc_by(payload.rib.adds.len() as u64);
        self.rib_removes
            .with_label_values(&[device, vrf, &afi])
            .inc_by(payload.rib.rems.len() as u64);

        const WATCHED: &[&str] = &[
            "best",
            "nh",
            "as_path",
            "local_pref",
            "med",
            "origin",
            "communities_hash",
            "peer",
        ];
        for chg in &payload.bgp.chgs {
            for attr in WATCHED {
                if chg.delta.contains_key(*attr) {
                    self.bgp_attr_changes
                        .with_label_values(&[device, vrf, &afi, attr])
                        .inc();
                }
            }
            if chg.delta.contains_key("upstream_as") {
                let prefix = chg.row.prefix.to_string();
                self.upstream_as_changes
                    .with_label_values(&[device, vrf, &afi, &prefix])
                    .inc();
            }
            if chg.row.prefix.is_default_route()
                && chg.delta.contains_key("nh")
            {
                self.default_nexthop_changes
                    .with_label_values(&[device, vrf, &afi])
                    .inc();
            }
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<(String, Vec<u8>), prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

#[endpoint { method = GET, path = "/metrics" }]
async fn get_metrics(
    ctx: RequestContext<Arc<Metrics>>,
) -> Result<http::Response<Body>, HttpError> {
    let (content_type, buffer) = ctx
        .context()
        .render()
        .map_err(|e| HttpError::for_internal_error(e.to_string()))?;
    http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(Body::from(buffer))
        .map_err(|e| HttpError::for_internal_error(e.to_string()))
}

pub fn start_server(
    log: Logger,
    port: u16,
    metrics: Arc<Metrics>,
) -> Result<JoinHandle<()>, String> {
    let sa = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
    let ds_config = ConfigDropshot {
        bind_address: sa,
        ..Default::default()
    };

    let ds_log = log.new(o!("unit" => "metrics-server"));

    let mut api = ApiDescription::new();
    crate::register!(api, get_metrics);

    let server = HttpServerStarter::new(&ds_config, api, metrics, &ds_log)
        .map_err(|e| format!("new metrics dropshot: {}", e))?;

    info!(log, "metrics: listening on {}", sa);

    Ok(tokio::spawn(async move {
        match server.start().await {
            Ok(_) => warn!(log, "metrics: unexpected server exit"),
            Err(e) => error!(log, "metrics: server start error {:?}", e),
        }
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use snapdb::{bgp_diff, rib_diff};
    use snapdb_types::{NextHop, Prefix};
    use std::str::FromStr;

    fn rib_row(prefix: &str, protocol: &str) -> RibRow {
        RibRow {
            device: "r1".into(),
            vrf: "default".into(),
            afi: AddressFamily::Ipv4,
            prefix: Prefix::from_str(prefix).unwrap(),
            protocol: protocol.into(),
            distance: Some(110),
            metric: Some(20),
            best: true,
            nexthops: [NextHop::new("1.1.1.1", None)].into_iter().collect(),
        }
    }

    fn bgp_row(prefix: &str, nh: &str, as_path: &str) -> BgpRow {
        let mut row = BgpRow {
            device: "r1".into(),
            vrf: "default".into(),
            afi: AddressFamily::Ipv4,
            prefix: Prefix::from_str(prefix).unwrap(),
            best: true,
            nh: Some(nh.into()),
            as_path: as_path.into(),
            local_pref: Some(100),
            med: None,
            origin: Some("i".into()),
            communities: vec![],
            communities_hash: String::new(),
            weight: None,
            peer: Some(nh.into()),
            originator_id: None,
            cluster_list: None,
        };
        row.set_communities(vec![]);
        row
    }

    fn counter_value(
        vec: &IntCounterVec,
        labels: &[&str],
    ) -> u64 {
        vec.with_label_values(labels).get()
    }

    #[test]
    fn snapshot_gauges() {
        let metrics = Metrics::new().unwrap();
        let rows = vec![
            rib_row("10.0.0.0/24", "ospf"),
            rib_row("10.0.0.0/24", "bgp"),
            rib_row("10.1.0.0/24", "ospf"),
        ];
        metrics.observe_rib_snapshot(
            "r1",
            "default",
            AddressFamily::Ipv4,
            &rows,
        );
        assert_eq!(
            metrics
                .route_count
                .with_label_values(&["r1", "default", "ipv4"])
                .get(),
            3
        );

        let mut alt = bgp_row("10.0.0.0/24", "1.1.1.1", "65001");
        alt.best = false;
        let bgp = vec![bgp_row("0.0.0.0/0", "3.3.3.3", "65001"), alt];
        metrics.observe_bgp_snapshot(
            "r1",
            "default",
            AddressFamily::Ipv4,
            &bgp,
        );
        assert_eq!(
            metrics
                .bgp_best_count
                .with_label_values(&["r1", "default", "ipv4"])
                .get(),
            1
        );
    }

    #[test]
    fn default_route_change_hits_every_counter() {
        let metrics = Metrics::new().unwrap();
        let payload = DiffPayload {
            device: "r1".into(),
            vrf: "default".into(),
            afi: AddressFamily::Ipv4,
            rib: rib_diff(vec![], vec![]),
            bgp: bgp_diff(
                vec![bgp_row("0.0.0.0/0", "3.3.3.3", "65001 3356")],
                vec![bgp_row("0.0.0.0/0", "4.4.4.4", "65002 3356")],
            ),
        };
        metrics.observe_diff(&payload);

        let base = ["r1", "default", "ipv4"];
        for attr in ["nh", "as_path", "peer"] {
            assert_eq!(
                counter_value(
                    &metrics.bgp_attr_changes,
                    &["r1", "default", "ipv4", attr],
                ),
                1,
                "attr {attr}"
            );
        }
        assert_eq!(
            counter_value(&metrics.default_nexthop_changes, &base),
            1
        );
        assert_eq!(
            counter_value(
                &metrics.upstream_as_changes,
                &["r1", "default", "ipv4", "0.0.0.0/0"],
            ),
            1
        );
    }

    #[test]
    fn counters_are_monotonic_across_cycles() {
        let metrics = Metrics::new().unwrap();
        let add = |n: usize| DiffPayload {
            device: "r1".into(),
            vrf: "default".into(),
            afi: AddressFamily::Ipv4,
            rib: rib_diff(
                vec![],
                (0..n)
                    .map(|i| rib_row(&format!("10.{i}.0.0/24"), "ospf"))
                    .collect(),
            ),
            bgp: bgp_diff(vec![], vec![]),
        };

        let labels = ["r1", "default", "ipv4"];
        let mut last = 0;
        for n in [3, 0, 2] {
            metrics.observe_diff(&add(n));
            let now = counter_value(&metrics.rib_adds, &labels);
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 5);
    }

    #[test]
    fn render_exposition_format() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_rib_snapshot(
            "r1",
            "default",
            AddressFamily::Ipv4,
            &[rib_row("10.0.0.0/24", "ospf")],
        );
        let (content_type, body) = metrics.render().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("# TYPE route_count gauge"));
        assert!(text.contains(
            "route_count{afi=\"ipv4\",device=\"r1\",vrf=\"default\"} 1"
        ));
    }
}
