// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON-RPC over HTTPS for NX-OS devices. One POST to `/ins` per show
//! command; the response body carries the same JSON tree the CLI
//! `| json` modifier produces, wrapped in the `ins_api` envelope.

use crate::error::Error;
use crate::Device;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound for one HTTPS request/response round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct NxapiConfig {
    pub scheme: String,
    pub port: u16,
    /// Verify the device's TLS certificate. Off by default; switch
    /// certificates are self-signed in most fleets.
    pub verify: bool,
}

impl Default for NxapiConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: 443,
            verify: false,
        }
    }
}

#[derive(Clone)]
pub struct NxapiClient {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl NxapiClient {
    pub fn new(config: &NxapiConfig, device: &Device) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify)
            .build()?;
        Ok(Self {
            http,
            url: format!(
                "{}://{}:{}/ins",
                config.scheme, device.host, config.port
            ),
            username: device.username.clone(),
            password: device.password.clone(),
        })
    }

    /// Run one show command and return the unwrapped body.
    pub async fn run(&self, cmd: &str) -> Result<Value, Error> {
        let payload = json!({
            "ins_api": {
                "version": "1.2",
                "type": "cli_show",
                "chunk": "0",
                "sid": "1",
                "input": cmd,
                "output_format": "json",
            }
        });
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        let data: Value = response.json().await?;
        extract_body(&data).ok_or(Error::BadEnvelope)
    }
}

/// Unwrap the `ins_api` envelope: `outputs.output` may be a single
/// object or a list (take the first), and the table tree sits under its
/// `body` field.
pub fn extract_body(data: &Value) -> Option<Value> {
    let output = data.get("ins_api")?.get("outputs")?.get("output")?;
    let output = match output {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match output.get("body") {
        Some(Value::Null) | None => Some(output.clone()),
        Some(body) => Some(body.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_with_single_output() {
        let data = json!({
            "ins_api": {
                "outputs": {
                    "output": {
                        "body": {"TABLE_vrf": {}},
                        "code": "200",
                        "msg": "Success"
                    }
                }
            }
        });
        assert_eq!(
            extract_body(&data).unwrap(),
            json!({"TABLE_vrf": {}})
        );
    }

    #[test]
    fn envelope_with_output_list() {
        let data = json!({
            "ins_api": {
                "outputs": {
                    "output": [
                        {"body": {"first": 1}},
                        {"body": {"second": 2}}
                    ]
                }
            }
        });
        assert_eq!(extract_body(&data).unwrap(), json!({"first": 1}));
    }

    #[test]
    fn envelope_without_body_falls_back_to_output() {
        let data = json!({
            "ins_api": {"outputs": {"output": {"code": "200"}}}
        });
        assert_eq!(extract_body(&data).unwrap(), json!({"code": "200"}));
    }

    #[test]
    fn malformed_envelope_is_none() {
        assert!(extract_body(&json!({"nope": {}})).is_none());
        assert!(extract_body(&json!({
            "ins_api": {"outputs": {"output": []}}
        }))
        .is_none());
    }
}
