// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Status source used by the monitor loop.
//!
//! The monitor only needs to open a session and read a device's variables.
//! [`StatusClient`] and [`StatusSession`] describe exactly that, and
//! [`NutStatusClient`] implements them on top of `nut-client`.

use async_trait::async_trait;
use nut_client::{ConnectionConfig, ErrorKind, NutClient, NutError};
use thiserror::Error;

use crate::snapshot::StatusSnapshot;

/// Failure talking to the status server, classified for reconnect decisions.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session could not be opened.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The link broke; the session must be discarded.
    #[error("connection lost: {0}")]
    Transport(String),

    /// The server answered with an error or bad data; the session is kept.
    #[error("bad response: {0}")]
    Protocol(String),
}

impl ClientError {
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<NutError> for ClientError {
    fn from(err: NutError) -> Self {
        match err.kind() {
            ErrorKind::Connect => Self::Connect(err.to_string()),
            ErrorKind::Transport => Self::Transport(err.to_string()),
            ErrorKind::Protocol => Self::Protocol(err.to_string()),
        }
    }
}

/// Opens sessions with a status server.
#[async_trait]
pub trait StatusClient: Send {
    type Session: StatusSession;

    /// Server address for log messages.
    fn server(&self) -> String;

    async fn connect(&mut self) -> Result<Self::Session, ClientError>;
}

/// An open session with a status server.
#[async_trait]
pub trait StatusSession: Send {
    /// Names of the devices the server knows about.
    async fn devices(&mut self) -> Result<Vec<String>, ClientError>;

    /// Current variables of `device`.
    async fn query(&mut self, device: &str) -> Result<StatusSnapshot, ClientError>;

    /// A single variable of `device`.
    async fn variable(&mut self, device: &str, name: &str) -> Result<String, ClientError>;

    /// End the session.
    async fn close(self) -> Result<(), ClientError>;
}

/// [`StatusClient`] backed by a upsd server.
#[derive(Debug, Clone)]
pub struct NutStatusClient {
    config: ConnectionConfig,
}

impl NutStatusClient {
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StatusClient for NutStatusClient {
    type Session = NutClient;

    fn server(&self) -> String {
        self.config.address()
    }

    async fn connect(&mut self) -> Result<NutClient, ClientError> {
        NutClient::connect(&self.config).await.map_err(|err| match err.kind() {
            // Any failure before the session is up counts as a connect failure
            ErrorKind::Connect => ClientError::from(err),
            ErrorKind::Transport | ErrorKind::Protocol => ClientError::Connect(err.to_string()),
        })
    }
}

#[async_trait]
impl StatusSession for NutClient {
    async fn devices(&mut self) -> Result<Vec<String>, ClientError> {
        Ok(self.list_ups().await?.into_keys().collect())
    }

    async fn query(&mut self, device: &str) -> Result<StatusSnapshot, ClientError> {
        Ok(self.list_vars(device).await?.into())
    }

    async fn variable(&mut self, device: &str, name: &str) -> Result<String, ClientError> {
        Ok(self.get_var(device, name).await?)
    }

    async fn close(self) -> Result<(), ClientError> {
        Ok(self.logout().await?)
    }
}
