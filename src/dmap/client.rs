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

use std::time::Duration;

use super::server::{GREETING, NO_EMAILS};
use super::syntax::Command;
use crate::mail::{message::Mail, store::MessageId};
use crate::support::error::Error;
use crate::wire::{
    codec::{expect_ok, split_command, Codec},
    handshake,
    keys::KeyStore,
};

/// One line of a `list` reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: MessageId,
    pub sender: String,
    pub subject: String,
}

/// The client side of one access protocol connection.
pub struct Client {
    codec: Codec,
}

impl Client {
    pub fn new(codec: Codec) -> Self {
        Client { codec }
    }

    /// Connect to the mailbox server at `address` and read its greeting.
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, Error> {
        let mut client = Client::new(Codec::connect(address, timeout, "dmap")?);
        client.init()?;
        Ok(client)
    }

    pub fn init(&mut self) -> Result<(), Error> {
        let greeting = self.codec.read_line()?;
        if GREETING != greeting {
            return Err(Error::Protocol(format!(
                "unexpected greeting: {}",
                greeting
            )));
        }

        Ok(())
    }

    pub fn is_secure(&self) -> bool {
        self.codec.is_encrypted()
    }

    /// Upgrade the connection to an encrypted session.
    ///
    /// The server's public key is looked up in `keys` under the identity it
    /// announces, which is returned on success. Any failure leaves the
    /// connection unusable.
    pub fn start_secure(&mut self, keys: &KeyStore) -> Result<String, Error> {
        let reply = self.command(Command::StartSecure)?;
        let identity = match expect_ok(&reply)? {
            Some(identity) if !identity.is_empty() => identity.to_owned(),
            _ => {
                return Err(Error::Protocol(format!(
                    "unexpected reply to startsecure: {}",
                    reply
                )))
            },
        };

        let key = keys.public_key(&identity)?;
        handshake::initiate(&mut self.codec, &*key)?;
        Ok(identity)
    }

    pub fn login(&mut self, user: &str, password: &str) -> Result<(), Error> {
        self.simple_command(Command::Login(
            user.to_owned(),
            password.to_owned(),
        ))
    }

    pub fn list(&mut self) -> Result<Vec<MessageSummary>, Error> {
        let mut first = self.command(Command::List)?;
        if NO_EMAILS == first {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        loop {
            if "ok" == first {
                break;
            }

            let mut parts = first.splitn(3, ' ');
            match (
                parts.next().and_then(|id| id.parse::<MessageId>().ok()),
                parts.next(),
                parts.next(),
            ) {
                (Some(id), Some(sender), Some(subject)) => {
                    summaries.push(MessageSummary {
                        id,
                        sender: sender.to_owned(),
                        subject: subject.to_owned(),
                    })
                },
                _ => {
                    expect_ok(&first)?;
                    return Err(Error::Protocol(format!(
                        "bad list entry: {}",
                        first
                    )));
                },
            }

            first = self.codec.read_line()?;
        }

        Ok(summaries)
    }

    pub fn show(&mut self, id: MessageId) -> Result<Mail, Error> {
        let from = self.command(Command::Show(id))?;
        let sender = field(&from, "from")?;
        let to = self.codec.read_line()?;
        let recipients = field(&to, "to")?;
        let subject = self.codec.read_line()?;
        let subject = field(&subject, "subject")?;
        let data = self.codec.read_line()?;
        let body = field(&data, "data")?;
        let hash = self.codec.read_line()?;
        let tag = field(&hash, "hash")?;
        let end = self.codec.read_line()?;
        if "ok" != end {
            return Err(Error::Protocol(format!(
                "expected end of message, got {}",
                end
            )));
        }

        let mut mail = Mail::new(
            sender,
            recipients.split(',').map(str::to_owned).collect(),
            subject,
            body,
        );
        if !tag.is_empty() {
            mail.integrity_tag = Some(tag.to_owned());
        }
        Ok(mail)
    }

    pub fn delete(&mut self, id: MessageId) -> Result<(), Error> {
        self.simple_command(Command::Delete(id))
    }

    pub fn logout(&mut self) -> Result<(), Error> {
        self.simple_command(Command::Logout)
    }

    pub fn quit(mut self) -> Result<(), Error> {
        let reply = self.command(Command::Quit)?;
        if "ok bye" == reply {
            Ok(())
        } else {
            expect_ok(&reply)?;
            Err(Error::Protocol(format!("unexpected reply to quit: {}", reply)))
        }
    }

    fn command(&mut self, command: Command) -> Result<String, Error> {
        self.codec.write_line(&command.to_line())?;
        self.codec.read_line()
    }

    fn simple_command(&mut self, command: Command) -> Result<(), Error> {
        let reply = self.command(command)?;
        match expect_ok(&reply)? {
            None => Ok(()),
            Some(_) => Err(Error::Protocol(format!(
                "unexpected reply: {}",
                reply
            ))),
        }
    }
}

/// Extract the value of a `show` line which must start with `keyword`.
fn field<'a>(line: &'a str, keyword: &str) -> Result<&'a str, Error> {
    match split_command(line) {
        (k, value) if k == keyword => Ok(value.unwrap_or("")),
        _ => {
            expect_ok(line)?;
            Err(Error::Protocol(format!(
                "expected {} line, got {}",
                keyword, line
            )))
        },
    }
}
