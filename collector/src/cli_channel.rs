// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only CLI session. Maps commands to canned replies so the
//! collection flow can be exercised without a device on the other end;
//! commands with no scripted reply fail the way a rejected command does.

use crate::cli::CliSession;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct ChannelSession {
    replies: HashMap<String, String>,
    pub commands_run: Vec<String>,
}

impl ChannelSession {
    pub fn new() -> Self {
        Self {
            replies: HashMap::new(),
            commands_run: Vec::new(),
        }
    }

    pub fn reply(
        mut self,
        cmd: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.replies.insert(cmd.into(), output.into());
        self
    }
}

#[async_trait]
impl CliSession for ChannelSession {
    async fn run(&mut self, cmd: &str) -> Result<String, Error> {
        self.commands_run.push(cmd.to_string());
        match self.replies.get(cmd) {
            Some(reply) => Ok(reply.clone()),
            None => Err(Error::Ssh(format!("command rejected: {cmd}"))),
        }
    }
}
