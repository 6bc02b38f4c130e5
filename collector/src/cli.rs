// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI transport: one SSH session per device per cycle, one exec channel
//! per command. libssh2 is blocking, so everything runs on the blocking
//! pool and the async side enforces the command deadline.

use crate::error::Error;
use crate::Device;
use async_trait::async_trait;
use rs_common::lock;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for a single CLI command round trip.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for TCP connect + SSH handshake + auth.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A CLI session that can run show commands. The production
/// implementation is [`SshSession`]; tests substitute a scripted one.
#[async_trait]
pub trait CliSession: Send {
    async fn run(&mut self, cmd: &str) -> Result<String, Error>;
}

/// A pluggable structured-CLI parser for devices that reject the
/// `| json` modifier: takes the command and its raw text output,
/// returns a JSON-like tree in one of the known shapes.
pub trait CliParser: Send + Sync {
    fn parse(&self, cmd: &str, raw: &str)
        -> Result<serde_json::Value, Error>;
}

pub struct SshSession {
    session: Arc<Mutex<ssh2::Session>>,
}

impl SshSession {
    pub async fn connect(device: &Device) -> Result<Self, Error> {
        let host = device.host.clone();
        let port = device.port;
        let username = device.username.clone();
        let password = device.password.clone();
        let worker = tokio::task::spawn_blocking(move || {
            Self::connect_sync(&host, port, &username, &password)
        });
        let joined = tokio::time::timeout(CONNECT_TIMEOUT, worker)
            .await
            .map_err(|_| Error::Timeout("ssh connect".to_string()))?;
        let session = joined??;
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }

    fn connect_sync(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<ssh2::Session, Error> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::Ssh(format!("resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| Error::Ssh(format!("no address for {host}")))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| Error::Ssh(format!("connect {addr}: {e}")))?;
        let mut session = ssh2::Session::new()
            .map_err(|e| Error::Ssh(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| Error::Ssh(format!("handshake: {e}")))?;
        session
            .userauth_password(username, password)
            .map_err(|e| Error::Ssh(format!("auth: {e}")))?;
        if !session.authenticated() {
            return Err(Error::Ssh("authentication failed".to_string()));
        }
        Ok(session)
    }

    fn exec_sync(
        session: &ssh2::Session,
        cmd: &str,
    ) -> Result<String, Error> {
        let mut channel = session
            .channel_session()
            .map_err(|e| Error::Ssh(e.to_string()))?;
        channel
            .exec(cmd)
            .map_err(|e| Error::Ssh(format!("exec: {e}")))?;
        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| Error::Ssh(format!("read: {e}")))?;
        channel
            .wait_close()
            .map_err(|e| Error::Ssh(e.to_string()))?;
        Ok(output)
    }
}

#[async_trait]
impl CliSession for SshSession {
    async fn run(&mut self, cmd: &str) -> Result<String, Error> {
        let session = self.session.clone();
        let owned = cmd.to_string();
        let worker = tokio::task::spawn_blocking(move || {
            let session = lock!(session);
            Self::exec_sync(&session, &owned)
        });
        // On deadline the blocking worker is abandoned, not interrupted;
        // the session is dropped with the device task at cycle end.
        let joined = tokio::time::timeout(COMMAND_TIMEOUT, worker)
            .await
            .map_err(|_| Error::Timeout(cmd.to_string()))?;
        joined?
    }
}
