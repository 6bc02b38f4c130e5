// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error {0}")]
    Http(#[from] reqwest::Error),

    #[error("ssh error {0}")]
    Ssh(String),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),

    #[error("json error {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected api envelope")]
    BadEnvelope,

    #[error("device returned non-json output for '{0}'")]
    NonJson(String),

    #[error("timeout running '{0}'")]
    Timeout(String),

    #[error("cli parse error: {0}")]
    CliParse(String),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
