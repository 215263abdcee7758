//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Dmail.
//
// Dmail is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Dmail is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Dmail. If not, see <http://www.gnu.org/licenses/>.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A line could not be decoded or decrypted.
    #[error("Malformed or undecryptable line")]
    Framing,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Connection closed before the session was complete")]
    UnexpectedEof,
    #[error("Handshake failed: {0}")]
    Handshake(String),
    /// The peer answered with `error <text>`; holds `<text>`.
    #[error("Peer reported error: {0}")]
    Remote(String),
    #[error("Unknown domain {0}")]
    UnknownDomain(String),
    #[error("No key for identity '{0}'")]
    NoSuchKey(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Relay queue closed")]
    QueueClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// Whether this error is just the peer going away.
    pub fn is_disconnect(&self) -> bool {
        match *self {
            Error::UnexpectedEof => true,
            Error::Io(ref e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
