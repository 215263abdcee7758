//-
// Copyright (c) 2020, 2023, 2024, 2025 Jason Lingle
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

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::trace;

use super::cipher::SessionCipher;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// The longest line, in bytes and including the line ending, either protocol
/// accepts. Encrypted lines are longer than their cleartext; the limit applies
/// to what is on the wire.
pub const MAX_LINE: usize = 65536;

/// Line framing shared by both protocols.
///
/// Lines are terminated by LF; a CR before the LF is dropped. Once a
/// `SessionCipher` is installed, every line in both directions is transparently
/// encrypted, so the state machines above never see the difference.
pub struct Codec {
    read: Box<dyn BufRead + Send>,
    write: Box<dyn Write + Send>,
    cipher: Option<SessionCipher>,
    log_prefix: LogPrefix,
    buffer: Vec<u8>,
}

impl Codec {
    pub fn new(
        read: Box<dyn BufRead + Send>,
        write: Box<dyn Write + Send>,
        log_prefix: LogPrefix,
    ) -> Self {
        Codec {
            read,
            write,
            cipher: None,
            log_prefix,
            buffer: Vec::new(),
        }
    }

    /// Wrap an established TCP connection, applying `timeout` to every read
    /// and write.
    pub fn from_tcp(
        stream: TcpStream,
        timeout: Duration,
        log_prefix: LogPrefix,
    ) -> Result<Self, Error> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let read = BufReader::new(stream.try_clone()?);
        Ok(Codec::new(
            Box::new(read),
            Box::new(BufWriter::new(stream)),
            log_prefix,
        ))
    }

    /// Connect to `address` (`host:port`), trying each address it resolves to
    /// in turn.
    pub fn connect(
        address: &str,
        timeout: Duration,
        protocol: &str,
    ) -> Result<Self, Error> {
        let mut last_error = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    return Self::from_tcp(
                        stream,
                        timeout,
                        LogPrefix::for_peer(protocol, address),
                    )
                },
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Io(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no addresses", address),
            )
        })))
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt all further lines with `cipher`.
    pub fn set_cipher(&mut self, cipher: SessionCipher) {
        self.cipher = Some(cipher);
    }

    /// Drop the session cipher, zeroing its key, and return to plaintext.
    pub fn clear_cipher(&mut self) {
        self.cipher = None;
    }

    /// Read the next line, without its line ending.
    ///
    /// End of stream, including within a line, is `Error::UnexpectedEof`.
    pub fn read_line(&mut self) -> Result<String, Error> {
        self.buffer.clear();
        (&mut self.read)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut self.buffer)?;

        if self.buffer.is_empty() {
            return Err(Error::UnexpectedEof);
        }

        if !self.buffer.ends_with(b"\n") {
            if self.buffer.len() >= MAX_LINE {
                return Err(Error::Protocol("line too long".to_owned()));
            } else {
                return Err(Error::UnexpectedEof);
            }
        }

        self.buffer.pop();
        if self.buffer.ends_with(b"\r") {
            self.buffer.pop();
        }

        let line = std::str::from_utf8(&self.buffer)
            .map_err(|_| Error::Framing)?;
        let line = match self.cipher {
            None => line.to_owned(),
            Some(ref mut cipher) => cipher.decrypt_line(line)?,
        };

        trace!("{} >> {}", self.log_prefix, line);
        Ok(line)
    }

    /// Write `line` followed by a line ending and flush.
    pub fn write_line(&mut self, line: &str) -> Result<(), Error> {
        self.write_lines(std::iter::once(line))
    }

    /// Write several lines, flushing only once at the end.
    pub fn write_lines<'a>(
        &mut self,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), Error> {
        for line in lines {
            if line.contains('\n') {
                return Err(Error::Protocol(
                    "attempted to send a line containing a line break"
                        .to_owned(),
                ));
            }

            trace!("{} << {}", self.log_prefix, line);
            match self.cipher {
                None => self.write.write_all(line.as_bytes())?,
                Some(ref mut cipher) => {
                    let encrypted = cipher.encrypt_line(line)?;
                    self.write.write_all(encrypted.as_bytes())?;
                },
            }
            self.write.write_all(b"\n")?;
        }

        self.write.flush()?;
        Ok(())
    }
}

impl Drop for Codec {
    fn drop(&mut self) {
        let _ = self.write.flush();
    }
}

/// Split `line` into its first word and the rest.
///
/// The rest is `None` if there is no space at all, and `Some("")` if the
/// line ends with a single space.
pub fn split_command(line: &str) -> (&str, Option<&str>) {
    let mut parts = line.splitn(2, ' ');
    let head = parts.next().unwrap_or("");
    (head, parts.next())
}

/// Interpret a reply that is expected to be `ok` or `ok <text>`.
///
/// `error <text>` becomes `Error::Remote(text)`; anything else is a protocol
/// error.
pub fn expect_ok(reply: &str) -> Result<Option<&str>, Error> {
    match split_command(reply) {
        ("ok", rest) => Ok(rest),
        ("error", rest) => Err(Error::Remote(rest.unwrap_or("").to_owned())),
        _ => Err(Error::Protocol(format!("unexpected reply: {}", reply))),
    }
}
