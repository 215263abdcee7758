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

use std::sync::Arc;

use log::{info, warn};

use super::syntax::Command;
use crate::mail::{
    message::Mail,
    store::{MailStore, MessageId},
    users::UserDirectory,
};
use crate::support::error::Error;
use crate::wire::{codec::Codec, handshake, keys::KeyStore};

pub const GREETING: &str = "ok DMAP2.0";
pub const NO_EMAILS: &str = "no emails :(";

/// Everything an access server needs to serve one mailbox domain.
#[derive(Clone)]
pub struct MailboxContext {
    /// The identity token announced by `startsecure`, which also names the
    /// server's key pair.
    pub identity: String,
    pub keys: Arc<KeyStore>,
    pub users: UserDirectory,
    pub store: MailStore,
}

/// The server side of one access protocol connection.
pub struct Server<'a> {
    codec: Codec,
    context: &'a MailboxContext,
    user: Option<String>,
    quit: bool,
}

impl<'a> Server<'a> {
    pub fn new(codec: Codec, context: &'a MailboxContext) -> Self {
        Server {
            codec,
            context,
            user: None,
            quit: false,
        }
    }

    /// Run the session until the client quits.
    ///
    /// Malformed commands and failed handshakes end the session with an
    /// error. Everything else, including commands in the wrong state, gets an
    /// `error` reply and the session continues.
    pub fn run(&mut self) -> Result<(), Error> {
        self.codec.write_line(GREETING)?;

        while !self.quit {
            let line = self.codec.read_line()?;
            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(()) => {
                    // Don't echo the line; it might contain a password
                    warn!("{} Malformed command", self.codec.log_prefix());
                    let _ = self.codec.write_line("error protocol error");
                    return Err(Error::Protocol("malformed command".to_owned()));
                },
            };

            self.run_command(command)?;
        }

        Ok(())
    }

    fn run_command(&mut self, command: Command) -> Result<(), Error> {
        match command {
            Command::StartSecure => self.cmd_start_secure(),
            Command::Login(user, password) => self.cmd_login(user, password),
            Command::Quit => self.cmd_quit(),
            Command::List => match self.user.clone() {
                Some(user) => self.cmd_list(&user),
                None => self.not_logged_in(),
            },
            Command::Show(id) => match self.user.clone() {
                Some(user) => self.cmd_show(&user, id),
                None => self.not_logged_in(),
            },
            Command::Delete(id) => match self.user.clone() {
                Some(user) => self.cmd_delete(&user, id),
                None => self.not_logged_in(),
            },
            Command::Logout => match self.user.take() {
                Some(user) => {
                    info!("{} Logged out {}", self.codec.log_prefix(), user);
                    self.codec.log_prefix().set_user(None);
                    self.codec.write_line("ok")
                },
                None => self.not_logged_in(),
            },
        }
    }

    fn cmd_start_secure(&mut self) -> Result<(), Error> {
        if self.codec.is_encrypted() {
            return self.codec.write_line("error already secure");
        }

        let key = match self.context.keys.private_key(&self.context.identity)
        {
            Ok(key) => key,
            Err(e) => {
                warn!(
                    "{} Cannot offer secure session: {}",
                    self.codec.log_prefix(),
                    e
                );
                return self
                    .codec
                    .write_line("error secure sessions unavailable");
            },
        };

        self.codec
            .write_line(&format!("ok {}", self.context.identity))?;
        handshake::respond(&mut self.codec, &key)
    }

    fn cmd_login(
        &mut self,
        user: String,
        password: String,
    ) -> Result<(), Error> {
        if self.user.is_some() {
            return self.codec.write_line("error already logged in");
        }

        if !self.context.users.user_exists(&user) {
            return self.codec.write_line("error unknown user");
        }

        if !self.context.users.check_password(&user, &password) {
            warn!(
                "{} Wrong password for {}",
                self.codec.log_prefix(),
                user
            );
            return self.codec.write_line("error wrong password");
        }

        info!("{} Logged in {}", self.codec.log_prefix(), user);
        self.codec.log_prefix().set_user(Some(user.clone()));
        self.user = Some(user);
        self.codec.write_line("ok")
    }

    fn cmd_list(&mut self, user: &str) -> Result<(), Error> {
        let messages = self.context.store.list(user);
        if messages.is_empty() {
            return self.codec.write_line(NO_EMAILS);
        }

        let lines = messages
            .iter()
            .map(|(id, mail)| {
                format!("{} {} {}", id, mail.sender, mail.subject)
            })
            .collect::<Vec<_>>();
        self.codec.write_lines(
            lines.iter().map(String::as_str).chain(std::iter::once("ok")),
        )
    }

    fn cmd_show(&mut self, user: &str, id: MessageId) -> Result<(), Error> {
        match self.context.store.get(user, id) {
            Some(mail) => {
                let lines = show_lines(&mail);
                self.codec.write_lines(
                    lines
                        .iter()
                        .map(String::as_str)
                        .chain(std::iter::once("ok")),
                )
            },
            None => self.codec.write_line("error unknown message id"),
        }
    }

    fn cmd_delete(&mut self, user: &str, id: MessageId) -> Result<(), Error> {
        if self.context.store.delete(user, id) {
            info!("{} Deleted message {}", self.codec.log_prefix(), id);
            self.codec.write_line("ok")
        } else {
            self.codec.write_line("error unknown message id")
        }
    }

    fn cmd_quit(&mut self) -> Result<(), Error> {
        self.quit = true;
        self.user = None;
        self.codec.write_line("ok bye")
    }

    fn not_logged_in(&mut self) -> Result<(), Error> {
        self.codec.write_line("error not logged in")
    }
}

/// The lines `show` answers with, before the terminating `ok`.
fn show_lines(mail: &Mail) -> Vec<String> {
    vec![
        format!("from {}", mail.sender),
        format!("to {}", mail.joined_recipients()),
        format!("subject {}", mail.subject),
        format!("data {}", mail.body),
        match mail.integrity_tag {
            Some(ref tag) => format!("hash {}", tag),
            None => "hash".to_owned(),
        },
    ]
}
