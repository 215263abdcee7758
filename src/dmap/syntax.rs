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

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::mail::store::MessageId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// startsecure
    StartSecure,
    /// login user password
    Login(String, String),
    /// list
    List,
    /// show id
    Show(MessageId),
    /// delete id
    Delete(MessageId),
    /// logout
    Logout,
    /// quit
    Quit,
}

static SIMPLE_COMMANDS: &[(&str, Command)] = &[
    ("startsecure", Command::StartSecure),
    ("list", Command::List),
    ("logout", Command::Logout),
    ("quit", Command::Quit),
];

lazy_static! {
    static ref RX_LOGIN: Regex =
        Regex::new("^login ([^ ]+) ([^ ]+)$").unwrap();
    static ref RX_ID: Regex =
        Regex::new("^(show|delete) ([0-9]{1,19})$").unwrap();
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        for &(keyword, ref cmd) in SIMPLE_COMMANDS {
            if keyword == s {
                return Ok(cmd.clone());
            }
        }

        if let Some(cap) = RX_LOGIN.captures(s) {
            Ok(Command::Login(cap[1].to_owned(), cap[2].to_owned()))
        } else if let Some(cap) = RX_ID.captures(s) {
            let id = cap[2].parse::<MessageId>().map_err(|_| ())?;
            if "show" == &cap[1] {
                Ok(Command::Show(id))
            } else {
                Ok(Command::Delete(id))
            }
        } else {
            Err(())
        }
    }
}

impl Command {
    /// Format this command the way it is sent on the wire.
    pub fn to_line(&self) -> String {
        match *self {
            Command::StartSecure => "startsecure".to_owned(),
            Command::Login(ref user, ref password) => {
                format!("login {} {}", user, password)
            },
            Command::List => "list".to_owned(),
            Command::Show(id) => format!("show {}", id),
            Command::Delete(id) => format!("delete {}", id),
            Command::Logout => "logout".to_owned(),
            Command::Quit => "quit".to_owned(),
        }
    }
}
