//-
// Copyright (c) 2024, Jason Lingle
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

use log::info;

use super::server::GREETING;
use super::syntax::Command;
use crate::mail::message::Mail;
use crate::support::error::Error;
use crate::wire::codec::{expect_ok, split_command, Codec};

/// The sending side of one transfer protocol connection.
pub struct Client {
    codec: Codec,
}

impl Client {
    pub fn new(codec: Codec) -> Self {
        Client { codec }
    }

    /// Connect to the transfer server at `address` and run `init()`.
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, Error> {
        let mut client = Client::new(Codec::connect(address, timeout, "dmtp")?);
        client.init()?;
        Ok(client)
    }

    /// Read the greeting and open the session with `begin`.
    pub fn init(&mut self) -> Result<(), Error> {
        let greeting = self.codec.read_line()?;
        if GREETING != greeting {
            return Err(Error::Protocol(format!(
                "unexpected greeting: {}",
                greeting
            )));
        }

        self.simple_command(Command::Begin)
    }

    /// Transfer `mail` and ask the server to accept it.
    ///
    /// If the server rejects some recipients as unknown, `on_unknown` is
    /// called with the user parts it reported and the transfer carries on;
    /// the server still delivers to the recipients it knows.
    pub fn send_mail(
        &mut self,
        mail: &Mail,
        mut on_unknown: impl FnMut(&[&str]),
    ) -> Result<(), Error> {
        let recipients = mail.recipients.clone();
        let count = recipients.len();
        let reply = self.command(Command::To(recipients))?;
        match split_command(&reply) {
            ("ok", Some(n)) if n.parse::<usize>().ok() == Some(count) => (),
            ("error", Some(text))
                if text.starts_with("unknown recipient ") =>
            {
                let users = text["unknown recipient ".len()..]
                    .split(',')
                    .collect::<Vec<_>>();
                on_unknown(&users);
            },
            _ => {
                expect_ok(&reply)?;
                return Err(Error::Protocol(format!(
                    "unexpected reply to to: {}",
                    reply
                )));
            },
        }

        self.simple_command(Command::From(mail.sender.clone()))?;
        self.simple_command(Command::Subject(mail.subject.clone()))?;
        self.simple_command(Command::Data(mail.body.clone()))?;
        if let Some(ref tag) = mail.integrity_tag {
            self.simple_command(Command::Hash(tag.clone()))?;
        }
        self.simple_command(Command::Send)?;

        info!(
            "{} Transferred message from {} to {} recipient(s)",
            self.codec.log_prefix(),
            mail.sender,
            count
        );
        Ok(())
    }

    /// End the session.
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

    /// Send `command` and require a bare `ok` in response.
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
