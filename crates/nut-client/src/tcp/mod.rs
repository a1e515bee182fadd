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

//! Async TCP connection layer for upsd.
//!
//! A [`NutClient`] owns one TCP session with upsd. It performs the optional
//! `USERNAME`/`PASSWORD` login on connect and then serves requests one at a
//! time. Every network operation is bounded by the configured timeout.
//!
//! Failures are classified by [`NutError::kind`] so callers can tell a dead
//! link (reconnect) from a server-side or data error (keep the session).

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::protocol::{parse_response, quote, ParseError, Response};

/// Default upsd TCP port.
pub const DEFAULT_PORT: u16 = 3493;

/// Configuration for a upsd connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Login user; no login is attempted when `None`.
    pub username: Option<String>,
    /// Login password, sent after the user name.
    pub password: Option<String>,
    /// Bound on connecting and on each request/response exchange.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConnectionConfig {
    /// Server address in "host:port" format.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Broad category of a [`NutError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The session could not be established.
    Connect,
    /// The link failed mid-session; the client must be discarded.
    Transport,
    /// The server answered but the answer was an error or malformed.
    Protocol,
}

/// Errors returned by [`NutClient`].
#[derive(Debug, Error)]
pub enum NutError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("login rejected by server: {0}")]
    LoginRejected(String),

    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("timed out waiting for server response")]
    Timeout,

    #[error("server returned ERR {code}{}", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Server { code: String, detail: Option<String> },

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A reply did not belong to the request just sent.
    #[error("reply out of sequence: {0}")]
    OutOfSync(String),
}

impl NutError {
    /// Classify the error for reconnect decisions.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout(_) | Self::LoginRejected(_) => {
                ErrorKind::Connect
            }
            Self::Io(_) | Self::Closed | Self::Timeout | Self::OutOfSync(_) => {
                ErrorKind::Transport
            }
            Self::Server { .. } | Self::Parse(_) => ErrorKind::Protocol,
        }
    }

    /// Whether the session is unusable after this error.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

/// A single authenticated session with upsd.
pub struct NutClient {
    stream: BufReader<TcpStream>,
    address: String,
    timeout: Duration,
}

impl std::fmt::Debug for NutClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NutClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl NutClient {
    /// Open a session and log in if credentials are configured.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, NutError> {
        let address = config.address();
        debug!("Connecting to upsd at {}...", address);

        let stream = match tokio::time::timeout(
            config.timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(NutError::Connect { address, source }),
            Err(_elapsed) => return Err(NutError::ConnectTimeout(address)),
        };

        let mut client = Self {
            stream: BufReader::new(stream),
            address,
            timeout: config.timeout,
        };

        if let Some(username) = &config.username {
            client.login("USERNAME", username).await?;
            if let Some(password) = &config.password {
                client.login("PASSWORD", password).await?;
            }
        }

        info!("Connected to upsd at {}", client.address);
        Ok(client)
    }

    /// List the devices served by upsd, keyed by name with their descriptions.
    pub async fn list_ups(&mut self) -> Result<BTreeMap<String, String>, NutError> {
        let entries = self.list(&["UPS"]).await?;
        let mut devices = BTreeMap::new();
        for entry in entries {
            match entry {
                Response::Ups { name, description } => {
                    devices.insert(name, description);
                }
                other => warn!("Ignoring unexpected line in UPS list: {:?}", other),
            }
        }
        Ok(devices)
    }

    /// Fetch every variable of a device.
    pub async fn list_vars(&mut self, ups: &str) -> Result<BTreeMap<String, String>, NutError> {
        let entries = self.list(&["VAR", ups]).await?;
        let mut vars = BTreeMap::new();
        for entry in entries {
            match entry {
                Response::Var { ups: owner, name, value } if owner == ups => {
                    vars.insert(name, value);
                }
                other => warn!("Ignoring unexpected line in VAR list: {:?}", other),
            }
        }
        Ok(vars)
    }

    /// Fetch a single variable of a device.
    pub async fn get_var(&mut self, ups: &str, name: &str) -> Result<String, NutError> {
        let request = format!("GET VAR {} {}", quote(ups), quote(name));
        match self.request(&request).await? {
            Response::Var { value, .. } => Ok(value),
            other => Err(NutError::OutOfSync(format!(
                "expected VAR {ups} {name}, got {other:?}"
            ))),
        }
    }

    /// Close the session politely.
    pub async fn logout(mut self) -> Result<(), NutError> {
        let response = self.request("LOGOUT").await;
        // upsd closes the socket right after answering
        let _ = self.stream.get_mut().shutdown().await;
        match response {
            Ok(_) | Err(NutError::Closed) => {
                debug!("Logged out of upsd at {}", self.address);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn login(&mut self, command: &str, value: &str) -> Result<(), NutError> {
        let request = format!("{command} {}", quote(value));
        match self.request(&request).await {
            Ok(Response::Ok(_)) => Ok(()),
            Ok(other) => Err(NutError::LoginRejected(format!("{command}: {other:?}"))),
            Err(NutError::Server { code, .. }) => {
                Err(NutError::LoginRejected(format!("{command}: {code}")))
            }
            Err(e) => Err(e),
        }
    }

    /// Run a `LIST` query and return the lines between `BEGIN` and `END`.
    ///
    /// A malformed entry fails the query only after the rest of the block has
    /// been read, so the next request starts on a fresh reply.
    async fn list(&mut self, query: &[&str]) -> Result<Vec<Response>, NutError> {
        let args: Vec<String> = query.iter().map(|a| quote(a)).collect();
        let request = format!("LIST {}", args.join(" "));

        let expected: Vec<String> = query.iter().map(|a| (*a).to_string()).collect();
        match self.request(&request).await? {
            Response::BeginList(kind) if kind == expected => {}
            other => {
                return Err(NutError::OutOfSync(format!(
                    "expected BEGIN LIST {}, got {other:?}",
                    expected.join(" ")
                )))
            }
        }

        let mut entries = Vec::new();
        loop {
            match self.read_response().await {
                Ok(Response::EndList(kind)) if kind == expected => return Ok(entries),
                Ok(Response::Err { code, detail }) => {
                    return Err(NutError::Server { code, detail })
                }
                Ok(entry) => entries.push(entry),
                Err(NutError::Parse(err)) => {
                    warn!("Malformed line in LIST {} reply: {}", expected.join(" "), err);
                    self.skip_list(&expected).await?;
                    return Err(err.into());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Discard the remainder of a `LIST` block up to its `END LIST` line.
    async fn skip_list(&mut self, expected: &[String]) -> Result<(), NutError> {
        loop {
            match self.read_response().await {
                Ok(Response::EndList(kind)) if kind == expected => return Ok(()),
                Ok(_) | Err(NutError::Parse(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Send one request line and read the first reply line.
    async fn request(&mut self, line: &str) -> Result<Response, NutError> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');

        let writer = self.stream.get_mut();
        with_timeout(self.timeout, async {
            writer.write_all(&payload).await?;
            writer.flush().await
        })
        .await?;

        match self.read_response().await? {
            Response::Err { code, detail } => Err(NutError::Server { code, detail }),
            response => Ok(response),
        }
    }

    async fn read_response(&mut self) -> Result<Response, NutError> {
        let mut line = String::new();
        let read = with_timeout(self.timeout, self.stream.read_line(&mut line)).await?;
        if read == 0 {
            return Err(NutError::Closed);
        }
        Ok(parse_response(&line)?)
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, NutError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_elapsed) => Err(NutError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Serve one connection, answering each expected request with canned lines.
    async fn fake_upsd(script: Vec<(&'static str, Vec<&'static str>)>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            for (expected, replies) in script {
                let mut line = String::new();
                if socket.read_line(&mut line).await.unwrap() == 0 {
                    return;
                }
                assert_eq!(line.trim_end(), expected);
                for reply in replies {
                    socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
                    socket.get_mut().write_all(b"\n").await.unwrap();
                }
            }
        });
        port
    }

    fn config(port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_with_login() {
        let port = fake_upsd(vec![
            ("USERNAME monuser", vec!["OK"]),
            ("PASSWORD \"pass word\"", vec!["OK"]),
        ])
        .await;

        let client = NutClient::connect(&ConnectionConfig {
            username: Some("monuser".to_string()),
            password: Some("pass word".to_string()),
            ..config(port)
        })
        .await
        .unwrap();
        client.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_rejected_is_connect_error() {
        let port = fake_upsd(vec![
            ("USERNAME monuser", vec!["OK"]),
            ("PASSWORD wrong", vec!["ERR ACCESS-DENIED"]),
        ])
        .await;

        let err = NutClient::connect(&ConnectionConfig {
            username: Some("monuser".to_string()),
            password: Some("wrong".to_string()),
            ..config(port)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, NutError::LoginRejected(_)));
        assert_eq!(err.kind(), ErrorKind::Connect);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = NutClient::connect(&config(port)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
    }

    #[tokio::test]
    async fn test_list_vars() {
        let port = fake_upsd(vec![(
            "LIST VAR myups",
            vec![
                "BEGIN LIST VAR myups",
                "VAR myups battery.charge \"42\"",
                "VAR myups ups.status \"OB DISCHRG\"",
                "END LIST VAR myups",
            ],
        )])
        .await;

        let mut client = NutClient::connect(&config(port)).await.unwrap();
        let vars = client.list_vars("myups").await.unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("battery.charge").map(String::as_str), Some("42"));
        assert_eq!(vars.get("ups.status").map(String::as_str), Some("OB DISCHRG"));
    }

    #[tokio::test]
    async fn test_list_ups() {
        let port = fake_upsd(vec![(
            "LIST UPS",
            vec![
                "BEGIN LIST UPS",
                "UPS rack \"Rack UPS\"",
                "UPS desk \"Desk UPS\"",
                "END LIST UPS",
            ],
        )])
        .await;

        let mut client = NutClient::connect(&config(port)).await.unwrap();
        let devices = client.list_ups().await.unwrap();
        assert_eq!(devices.keys().collect::<Vec<_>>(), vec!["desk", "rack"]);
    }

    #[tokio::test]
    async fn test_unknown_ups_is_protocol_error() {
        let port = fake_upsd(vec![
            ("LIST VAR nope", vec!["ERR UNKNOWN-UPS"]),
            ("GET VAR myups battery.charge", vec!["VAR myups battery.charge \"99\""]),
        ])
        .await;

        let mut client = NutClient::connect(&config(port)).await.unwrap();
        let err = client.list_vars("nope").await.unwrap_err();
        assert!(matches!(&err, NutError::Server { code, .. } if code == "UNKNOWN-UPS"));
        assert_eq!(err.kind(), ErrorKind::Protocol);

        // The session is still usable after a protocol error
        let value = client.get_var("myups", "battery.charge").await.unwrap();
        assert_eq!(value, "99");
    }

    #[tokio::test]
    async fn test_malformed_list_entry_keeps_session_in_step() {
        let port = fake_upsd(vec![
            (
                "LIST VAR myups",
                vec![
                    "BEGIN LIST VAR myups",
                    "VAR myups ups.mfr \"broken",
                    "VAR myups battery.charge \"90\"",
                    "END LIST VAR myups",
                ],
            ),
            (
                "LIST VAR myups",
                vec![
                    "BEGIN LIST VAR myups",
                    "VAR myups battery.charge \"10\"",
                    "END LIST VAR myups",
                ],
            ),
        ])
        .await;

        let mut client = NutClient::connect(&config(port)).await.unwrap();
        let err = client.list_vars("myups").await.unwrap_err();
        assert!(matches!(err, NutError::Parse(ParseError::UnterminatedQuote(_))));
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let vars = client.list_vars("myups").await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("battery.charge").map(String::as_str), Some("10"));
    }

    #[tokio::test]
    async fn test_reply_out_of_sequence_is_transport_error() {
        let port = fake_upsd(vec![(
            "LIST VAR myups",
            vec!["VAR myups battery.charge \"90\""],
        )])
        .await;

        let mut client = NutClient::connect(&config(port)).await.unwrap();
        let err = client.list_vars("myups").await.unwrap_err();
        assert!(matches!(err, NutError::OutOfSync(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_server_hangup_is_transport_error() {
        let port = fake_upsd(vec![("LIST VAR myups", vec!["BEGIN LIST VAR myups"])]).await;

        let mut client = NutClient::connect(&config(port)).await.unwrap();
        let err = client.list_vars("myups").await.unwrap_err();
        assert!(matches!(err, NutError::Closed));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_logout() {
        let port = fake_upsd(vec![("LOGOUT", vec!["OK Goodbye"])]).await;

        let client = NutClient::connect(&config(port)).await.unwrap();
        client.logout().await.unwrap();
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
