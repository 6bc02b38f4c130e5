// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use dropshot::HttpError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("store error: {0}")]
    Db(#[from] snapdb::Error),

    #[error("collector error: {0}")]
    Collector(#[from] collector::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<Error> for HttpError {
    fn from(value: Error) -> Self {
        match value {
            Error::Db(snapdb::Error::NotFound(_)) => {
                Self::for_not_found(None, value.to_string())
            }
            Error::Db(snapdb::Error::InvalidName(_)) => {
                Self::for_bad_request(None, value.to_string())
            }
            Error::Db(_) | Error::Collector(_) => {
                Self::for_internal_error(value.to_string())
            }
            Error::NotFound(_) => {
                Self::for_not_found(None, value.to_string())
            }
            Error::BadRequest(_) => {
                Self::for_bad_request(None, value.to_string())
            }
        }
    }
}
