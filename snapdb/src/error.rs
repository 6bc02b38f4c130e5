// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("store io error {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid store name {0}")]
    InvalidName(String),

    #[error("archive collision retries exhausted for {0}")]
    ArchiveCollision(String),

    #[error("latest replace failed after archive write: {0}")]
    LatestReplace(std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),
}
