// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device inventory. Either the enumerated static list or a NetBox
//! query, selected by configuration. The collector only ever sees the
//! resulting device descriptors.

use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use collector::{Device, DeviceType};
use serde_json::Value;
use slog::{debug, Logger};
use snapdb_types::AddressFamily;
use std::time::Duration;

const NETBOX_TIMEOUT: Duration = Duration::from_secs(15);

/// Roles that mark a NetBox device as part of the routing fleet.
const ROUTER_ROLES: &[&str] = &["router", "core-router", "edge-router"];

/// Fetch the inventory for this cycle.
pub async fn fetch(config: &Config, log: &Logger) -> Result<Vec<Device>> {
    if config.use_netbox {
        netbox_inventory(config, log).await
    } else {
        Ok(static_inventory(config))
    }
}

/// The enumerated fallback inventory: the DevNet always-on NX-OS
/// sandbox, handy for trying the daemon without any infrastructure.
fn static_inventory(config: &Config) -> Vec<Device> {
    vec![Device {
        device_type: DeviceType::CiscoNxos,
        host: "sbx-nxos-mgmt.cisco.com".to_string(),
        port: 22,
        username: config
            .netops_user
            .clone()
            .unwrap_or_else(|| "admin".to_string()),
        password: config
            .netops_pass
            .clone()
            .unwrap_or_else(|| "Admin_1234!".to_string()),
        name: "sbx-nxos".to_string(),
        vrfs: vec!["default".to_string(), "CUSTOMER_A".to_string()],
        afis: vec![AddressFamily::Ipv4, AddressFamily::Ipv6],
    }]
}

/// Pull active routers from NetBox. Devices qualify by routing role or
/// a `nexus` tag, and need a primary IP. VRF names come from the global
/// VRF table; NetBox rarely models VRF-to-device bindings tightly
/// enough to narrow further.
async fn netbox_inventory(
    config: &Config,
    log: &Logger,
) -> Result<Vec<Device>> {
    let base = config
        .nb_url
        .as_deref()
        .ok_or_else(|| anyhow!("NB_URL not set"))?;
    let token = config
        .nb_token
        .as_deref()
        .ok_or_else(|| anyhow!("NB_TOKEN not set"))?;
    let username = config
        .netops_user
        .clone()
        .ok_or_else(|| anyhow!("NETOPS_USER not set"))?;
    let password = config
        .netops_pass
        .clone()
        .ok_or_else(|| anyhow!("NETOPS_PASS not set"))?;

    let client = reqwest::Client::builder()
        .timeout(NETBOX_TIMEOUT)
        .build()
        .context("build netbox client")?;

    let mut vrfs: Vec<String> = Vec::new();
    for item in
        fetch_all(&client, base, token, "/api/ipam/vrfs/?limit=0").await?
    {
        if let Some(name) = item.get("name").and_then(Value::as_str) {
            vrfs.push(name.to_string());
        }
    }
    if vrfs.is_empty() {
        vrfs.push("default".to_string());
    }

    let mut devices = Vec::new();
    for item in fetch_all(
        &client,
        base,
        token,
        "/api/dcim/devices/?status=active&limit=0",
    )
    .await?
    {
        let role = item
            .get("role")
            .and_then(|r| r.get("slug"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let nexus_tagged = item
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter().any(|t| {
                    t.get("slug").and_then(Value::as_str) == Some("nexus")
                })
            })
            .unwrap_or(false);
        if !ROUTER_ROLES.contains(&role) && !nexus_tagged {
            continue;
        }

        let Some(address) = item
            .get("primary_ip")
            .and_then(|ip| ip.get("address"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        let host = address.split('/').next().unwrap_or(address).to_string();

        let Some(name) = item.get("name").and_then(Value::as_str) else {
            continue;
        };

        // Anything that looks like a Nexus goes over the NX-OS path.
        let model = format!(
            "{} {}",
            item.get("device_type")
                .and_then(|t| t.get("display"))
                .and_then(Value::as_str)
                .unwrap_or_default(),
            item.get("device_type")
                .and_then(|t| t.get("model"))
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        let device_type = if model.contains("Nexus") || model.contains("NX") {
            DeviceType::CiscoNxos
        } else {
            DeviceType::CiscoXe
        };

        debug!(
            log,
            "inventory device";
            "name" => name,
            "host" => host.as_str(),
            "role" => role,
        );

        devices.push(Device {
            device_type,
            host,
            port: 22,
            username: username.clone(),
            password: password.clone(),
            name: name.to_string(),
            vrfs: vrfs.clone(),
            afis: vec![AddressFamily::Ipv4, AddressFamily::Ipv6],
        });
    }

    Ok(devices)
}

/// Follow NetBox pagination: each page carries `results` plus a `next`
/// URL until exhausted.
async fn fetch_all(
    client: &reqwest::Client,
    base: &str,
    token: &str,
    path: &str,
) -> Result<Vec<Value>> {
    let mut url = format!("{}{}", base.trim_end_matches('/'), path);
    let mut out = Vec::new();
    loop {
        let page: Value = client
            .get(&url)
            .header("Authorization", format!("Token {token}"))
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("netbox request {url}"))?
            .error_for_status()
            .with_context(|| format!("netbox response {url}"))?
            .json()
            .await
            .with_context(|| format!("netbox payload {url}"))?;

        match page.get("results").and_then(Value::as_array) {
            Some(results) => out.extend(results.iter().cloned()),
            None => return Err(anyhow!("netbox payload missing results")),
        }

        match page.get("next").and_then(Value::as_str) {
            Some(next) if !next.is_empty() => url = next.to_string(),
            _ => break,
        }
    }
    Ok(out)
}
