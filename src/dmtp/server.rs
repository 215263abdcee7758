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

use log::{info, warn};

use super::syntax::Command;
use crate::mail::{
    address,
    message::{Mail, Message},
};
use crate::support::error::Error;
use crate::wire::codec::Codec;

pub const GREETING: &str = "ok DMTP";

/// What a transfer server does with the mail it receives.
pub trait MailConsumer {
    /// Whether mail to `address`, which is syntactically valid, can be
    /// accepted.
    fn accepts_recipient(&self, address: &str) -> bool;

    /// Take responsibility for a complete message.
    ///
    /// An error here is reported to the client, which may retry.
    fn consume(&self, mail: Mail) -> Result<(), Error>;
}

/// The receiving side of one transfer protocol connection.
pub struct Server<'a> {
    codec: Codec,
    consumer: &'a dyn MailConsumer,
    envelope: Message,
    quit: bool,
}

impl<'a> Server<'a> {
    pub fn new(codec: Codec, consumer: &'a dyn MailConsumer) -> Self {
        Server {
            codec,
            consumer,
            envelope: Message::default(),
            quit: false,
        }
    }

    /// Run the session until the client quits.
    ///
    /// Any protocol violation by the client ends the session with an error,
    /// after telling the client `error protocol error`.
    pub fn run(&mut self) -> Result<(), Error> {
        self.codec.write_line(GREETING)?;

        match self.read_command()? {
            Command::Begin => self.codec.write_line("ok")?,
            Command::Quit => return self.cmd_quit(),
            command => {
                return self.protocol_error(&format!(
                    "expected begin, got {:?}",
                    command
                ))
            },
        }

        while !self.quit {
            let command = self.read_command()?;
            self.run_command(command)?;
        }

        Ok(())
    }

    fn read_command(&mut self) -> Result<Command, Error> {
        let line = self.codec.read_line()?;
        match line.parse::<Command>() {
            Ok(command) => Ok(command),
            Err(()) => {
                let shown = line.chars().take(64).collect::<String>();
                self.protocol_error(&format!("bad command {:?}", shown))
            },
        }
    }

    fn run_command(&mut self, command: Command) -> Result<(), Error> {
        match command {
            Command::Begin => self.protocol_error("repeated begin"),
            Command::To(recipients) => self.cmd_to(recipients),
            Command::From(sender) => self.cmd_from(sender),
            Command::Subject(subject) => {
                self.envelope.subject = Some(subject);
                self.codec.write_line("ok")
            },
            Command::Data(body) => {
                self.envelope.body = Some(body);
                self.codec.write_line("ok")
            },
            Command::Hash(tag) => {
                self.envelope.integrity_tag = Some(tag);
                self.codec.write_line("ok")
            },
            Command::Send => self.cmd_send(),
            Command::Quit => self.cmd_quit(),
        }
    }

    fn cmd_to(&mut self, recipients: Vec<String>) -> Result<(), Error> {
        if let Some(invalid) =
            recipients.iter().find(|r| !address::is_valid(r))
        {
            return self
                .codec
                .write_line(&format!("error invalid recipient {}", invalid));
        }

        let unknown = recipients
            .iter()
            .filter(|r| !self.consumer.accepts_recipient(r))
            .filter_map(|r| address::user(r))
            .collect::<Vec<_>>();
        let reply = if unknown.is_empty() {
            format!("ok {}", recipients.len())
        } else {
            format!("error unknown recipient {}", unknown.join(","))
        };

        self.envelope.recipients = Some(recipients);
        self.codec.write_line(&reply)
    }

    fn cmd_from(&mut self, sender: String) -> Result<(), Error> {
        if !address::is_valid(&sender) {
            return self
                .codec
                .write_line(&format!("error invalid address {}", sender));
        }

        self.envelope.sender = Some(sender);
        self.codec.write_line("ok")
    }

    fn cmd_send(&mut self) -> Result<(), Error> {
        let mail = match self.envelope.clone().complete() {
            Ok(mail) => mail,
            Err((_, missing)) => {
                return self.codec.write_line(&format!("error no {}", missing))
            },
        };

        let sender = mail.sender.clone();
        let recipient_count = mail.recipients.len();
        match self.consumer.consume(mail) {
            Ok(()) => {
                info!(
                    "{} Accepted message from {} to {} recipient(s)",
                    self.codec.log_prefix(),
                    sender,
                    recipient_count
                );
                self.envelope = Message::default();
                self.codec.write_line("ok")
            },
            Err(e) => {
                warn!(
                    "{} Failed to consume message from {}: {}",
                    self.codec.log_prefix(),
                    sender,
                    e
                );
                self.codec.write_line("error consuming email")
            },
        }
    }

    fn cmd_quit(&mut self) -> Result<(), Error> {
        self.quit = true;
        self.envelope = Message::default();
        self.codec.write_line("ok bye")
    }

    fn protocol_error<T>(&mut self, what: &str) -> Result<T, Error> {
        warn!("{} Protocol error: {}", self.codec.log_prefix(), what);
        let _ = self.codec.write_line("error protocol error");
        Err(Error::Protocol(what.to_owned()))
    }
}
