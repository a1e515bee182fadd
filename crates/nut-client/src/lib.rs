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

//! Client library for Network UPS Tools (NUT) servers.
//!
//! The library is split into two layers that can be used independently:
//!
//! - **Protocol layer**: tokenizing and parsing upsd reply lines
//! - **Connection layer**: an async TCP session with login, queries and
//!   per-request timeouts
//!
//! # Quick Start
//!
//! ```no_run
//! use nut_client::{ConnectionConfig, NutClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nut_client::NutError> {
//!     let mut client = NutClient::connect(&ConnectionConfig {
//!         host: "localhost".to_string(),
//!         username: Some("monuser".to_string()),
//!         password: Some("secret".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//!     let vars = client.list_vars("ups").await?;
//!     println!("status: {:?}", vars.get("ups.status"));
//!     client.logout().await
//! }
//! ```
//!
//! ## Protocol Layer Only
//!
//! ```
//! use nut_client::protocol::{parse_response, Response};
//!
//! let line = r#"VAR ups battery.charge "87""#;
//! if let Ok(Response::Var { name, value, .. }) = parse_response(line) {
//!     println!("{name} = {value}");
//! }
//! ```

pub mod protocol;
pub mod tcp;

pub use protocol::{parse_response, ParseError, Response};
pub use tcp::{ConnectionConfig, ErrorKind, NutClient, NutError, DEFAULT_PORT};
