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

//! Protocol layer for the upsd text protocol.
//!
//! upsd speaks a line-oriented protocol over TCP (port 3493 by default).
//! Every request is a single line and every reply is either a single line
//! (`OK`, `ERR <code>`, `VAR ...`) or a `BEGIN LIST` / `END LIST` block.
//! This module turns reply lines into [`Response`] values; it performs no IO.

mod tokenizer;

pub use tokenizer::{quote, tokenize};

use thiserror::Error;

/// Errors that can occur while parsing upsd replies.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid response line: {0}")]
    InvalidFormat(String),

    #[error("unterminated quoted string in: {0}")]
    UnterminatedQuote(String),
}

/// A single parsed reply line from upsd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK` with optional trailing text (e.g. `OK Goodbye`).
    Ok(Option<String>),

    /// `ERR <code> [detail]`.
    Err {
        /// Error code such as `ACCESS-DENIED` or `UNKNOWN-UPS`.
        code: String,
        /// Optional extra text after the code.
        detail: Option<String>,
    },

    /// `BEGIN LIST <kind...>`.
    BeginList(Vec<String>),

    /// `END LIST <kind...>`.
    EndList(Vec<String>),

    /// `VAR <ups> <name> "<value>"`.
    Var {
        /// Device the variable belongs to.
        ups: String,
        /// Variable name, e.g. `battery.charge`.
        name: String,
        /// Raw string value.
        value: String,
    },

    /// `UPS <name> "<description>"`.
    Ups {
        /// Device name as configured in ups.conf.
        name: String,
        /// Free-form description.
        description: String,
    },
}

/// Parse a single reply line.
pub fn parse_response(line: &str) -> Result<Response, ParseError> {
    let mut words = tokenize(line)?;
    if words.is_empty() {
        return Err(ParseError::InvalidFormat(line.to_string()));
    }

    let keyword = words.remove(0);
    match keyword.as_str() {
        "OK" => Ok(Response::Ok(join_rest(words))),
        "ERR" => {
            if words.is_empty() {
                return Err(ParseError::InvalidFormat(line.to_string()));
            }
            let code = words.remove(0);
            Ok(Response::Err {
                code,
                detail: join_rest(words),
            })
        }
        "BEGIN" | "END" => {
            if words.first().map(String::as_str) != Some("LIST") {
                return Err(ParseError::InvalidFormat(line.to_string()));
            }
            words.remove(0);
            if keyword == "BEGIN" {
                Ok(Response::BeginList(words))
            } else {
                Ok(Response::EndList(words))
            }
        }
        "VAR" => {
            let [ups, name, value]: [String; 3] = words
                .try_into()
                .map_err(|_words: Vec<String>| ParseError::InvalidFormat(line.to_string()))?;
            Ok(Response::Var { ups, name, value })
        }
        "UPS" => {
            let [name, description]: [String; 2] = words
                .try_into()
                .map_err(|_words: Vec<String>| ParseError::InvalidFormat(line.to_string()))?;
            Ok(Response::Ups { name, description })
        }
        _ => Err(ParseError::InvalidFormat(line.to_string())),
    }
}

fn join_rest(words: Vec<String>) -> Option<String> {
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}
