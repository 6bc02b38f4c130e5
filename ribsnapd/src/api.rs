// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The read API: everything a browser UI needs to list devices and walk
//! snapshots and diffs. Strictly read-only over the store.

use crate::error::Error;
use dropshot::{
    endpoint, ApiDescription, ConfigDropshot, HttpError, HttpResponseOk,
    HttpServerStarter, Path, Query, RequestContext,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use slog::{error, info, o, warn, Logger};
use snapdb::{Coordinates, DiffMeta, DiffPayload, Store};
use snapdb_types::{AddressFamily, TableKind, Timestamp};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

pub struct HandlerContext {
    pub store: Store,
    pub log: Logger,
}

#[macro_export]
macro_rules! register {
    ($api:expr, $endpoint:expr) => {
        $api.register($endpoint).expect(stringify!($endpoint))
    };
}

pub fn start_server(
    log: Logger,
    addr: IpAddr,
    port: u16,
    context: Arc<HandlerContext>,
) -> Result<tokio::task::JoinHandle<()>, String> {
    let sa = SocketAddr::new(addr, port);
    let ds_config = ConfigDropshot {
        bind_address: sa,
        ..Default::default()
    };

    let ds_log = log.new(o!("unit" => "api-server"));

    let api = api_description();

    let server = HttpServerStarter::new(&ds_config, api, context, &ds_log)
        .map_err(|e| format!("new api dropshot: {}", e))?;

    info!(log, "api: listening on {}", sa);

    Ok(tokio::spawn(async move {
        match server.start().await {
            Ok(_) => warn!(log, "api: unexpected server exit"),
            Err(e) => error!(log, "api: server start error {:?}", e),
        }
    }))
}

pub fn api_description() -> ApiDescription<Arc<HandlerContext>> {
    let mut api = ApiDescription::new();
    register!(api, list_devices);
    register!(api, get_device_tables);
    register!(api, get_latest_snapshot);
    register!(api, list_archives);
    register!(api, get_archive);
    register!(api, list_device_diffs);
    register!(api, get_diff);
    api
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DevicePath {
    device: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TsPath {
    device: String,
    ts: String,
}

/// Selects one table coordinate.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct TableQuery {
    kind: TableKind,
    vrf: String,
    afi: AddressFamily,
}

/// Selects one diff coordinate.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct VrfAfiQuery {
    vrf: String,
    afi: AddressFamily,
}

/// Optional narrowing for diff listings.
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct DiffListQuery {
    vrf: Option<String>,
    afi: Option<AddressFamily>,
}

fn parse_ts(raw: &str) -> Result<Timestamp, Error> {
    Timestamp::from_str(raw).map_err(Error::BadRequest)
}

#[endpoint { method = GET, path = "/devices" }]
async fn list_devices(
    ctx: RequestContext<Arc<HandlerContext>>,
) -> Result<HttpResponseOk<Vec<String>>, HttpError> {
    let ctx = ctx.context();
    let devices = ctx.store.devices().map_err(Error::from)?;
    Ok(HttpResponseOk(devices))
}

#[endpoint { method = GET, path = "/devices/{device}/tables" }]
async fn get_device_tables(
    ctx: RequestContext<Arc<HandlerContext>>,
    path: Path<DevicePath>,
) -> Result<HttpResponseOk<Coordinates>, HttpError> {
    let ctx = ctx.context();
    let path = path.into_inner();
    let coordinates =
        ctx.store.coordinates(&path.device).map_err(Error::from)?;
    Ok(HttpResponseOk(coordinates))
}

#[endpoint { method = GET, path = "/devices/{device}/latest" }]
async fn get_latest_snapshot(
    ctx: RequestContext<Arc<HandlerContext>>,
    path: Path<DevicePath>,
    query: Query<TableQuery>,
) -> Result<HttpResponseOk<Vec<serde_json::Value>>, HttpError> {
    let ctx = ctx.context();
    let path = path.into_inner();
    let query = query.into_inner();
    let rows = ctx
        .store
        .read_latest(&path.device, query.kind, &query.vrf, query.afi)
        .map_err(Error::from)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{}/{}/{}.{}",
                path.device, query.kind, query.vrf, query.afi
            ))
        })?;
    Ok(HttpResponseOk(rows))
}

#[endpoint { method = GET, path = "/devices/{device}/archives" }]
async fn list_archives(
    ctx: RequestContext<Arc<HandlerContext>>,
    path: Path<DevicePath>,
    query: Query<TableQuery>,
) -> Result<HttpResponseOk<Vec<Timestamp>>, HttpError> {
    let ctx = ctx.context();
    let path = path.into_inner();
    let query = query.into_inner();
    let timestamps = ctx
        .store
        .list_archive_timestamps(
            &path.device,
            query.kind,
            &query.vrf,
            query.afi,
        )
        .map_err(Error::from)?;
    Ok(HttpResponseOk(timestamps))
}

#[endpoint { method = GET, path = "/devices/{device}/archives/{ts}" }]
async fn get_archive(
    ctx: RequestContext<Arc<HandlerContext>>,
    path: Path<TsPath>,
    query: Query<TableQuery>,
) -> Result<HttpResponseOk<Vec<serde_json::Value>>, HttpError> {
    let ctx = ctx.context();
    let path = path.into_inner();
    let query = query.into_inner();
    let ts = parse_ts(&path.ts)?;
    let rows = ctx
        .store
        .read_archive(&path.device, query.kind, &query.vrf, query.afi, &ts)
        .map_err(Error::from)?;
    Ok(HttpResponseOk(rows))
}

#[endpoint { method = GET, path = "/devices/{device}/diffs" }]
async fn list_device_diffs(
    ctx: RequestContext<Arc<HandlerContext>>,
    path: Path<DevicePath>,
    query: Query<DiffListQuery>,
) -> Result<HttpResponseOk<Vec<DiffMeta>>, HttpError> {
    let ctx = ctx.context();
    let path = path.into_inner();
    let query = query.into_inner();
    let diffs = ctx
        .store
        .list_diffs(&path.device, query.vrf.as_deref(), query.afi)
        .map_err(Error::from)?;
    Ok(HttpResponseOk(diffs))
}

#[endpoint { method = GET, path = "/devices/{device}/diffs/{ts}" }]
async fn get_diff(
    ctx: RequestContext<Arc<HandlerContext>>,
    path: Path<TsPath>,
    query: Query<VrfAfiQuery>,
) -> Result<HttpResponseOk<DiffPayload>, HttpError> {
    let ctx = ctx.context();
    let path = path.into_inner();
    let query = query.into_inner();
    let ts = parse_ts(&path.ts)?;
    let payload = ctx
        .store
        .read_diff(&path.device, &query.vrf, query.afi, &ts)
        .map_err(Error::from)?;
    Ok(HttpResponseOk(payload))
}
