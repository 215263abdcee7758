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

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// begin
    Begin,
    /// to addr[,addr...]
    To(Vec<String>),
    /// from addr
    From(String),
    /// subject [text...]
    Subject(String),
    /// data [text...]
    Data(String),
    /// hash base64
    Hash(String),
    /// send
    Send,
    /// quit
    Quit,
}

static SIMPLE_COMMANDS: &[(&str, Command)] = &[
    ("begin", Command::Begin),
    ("send", Command::Send),
    ("quit", Command::Quit),
];

lazy_static! {
    static ref RX_TO: Regex = Regex::new("^to ([^ ]+)$").unwrap();
    static ref RX_FROM: Regex = Regex::new("^from ([^ ]+)$").unwrap();
    static ref RX_TEXT: Regex =
        Regex::new("^(subject|data)(?: (.*))?$").unwrap();
    static ref RX_HASH: Regex =
        Regex::new("^hash ([A-Za-z0-9+/]+=*)$").unwrap();
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        for &(keyword, ref cmd) in SIMPLE_COMMANDS {
            if keyword == s {
                return Ok(cmd.clone());
            }
        }

        if let Some(cap) = RX_TO.captures(s) {
            let recipients = cap[1]
                .split(',')
                .map(str::to_owned)
                .collect::<Vec<_>>();
            if recipients.iter().any(String::is_empty) {
                return Err(());
            }
            Ok(Command::To(recipients))
        } else if let Some(cap) = RX_FROM.captures(s) {
            Ok(Command::From(cap[1].to_owned()))
        } else if let Some(cap) = RX_TEXT.captures(s) {
            let text = cap.get(2).map_or("", |m| m.as_str()).to_owned();
            if "subject" == &cap[1] {
                Ok(Command::Subject(text))
            } else {
                Ok(Command::Data(text))
            }
        } else if let Some(cap) = RX_HASH.captures(s) {
            Ok(Command::Hash(cap[1].to_owned()))
        } else {
            Err(())
        }
    }
}

impl Command {
    /// Format this command the way it is sent on the wire.
    pub fn to_line(&self) -> String {
        match *self {
            Command::Begin => "begin".to_owned(),
            Command::To(ref recipients) => {
                format!("to {}", recipients.join(","))
            },
            Command::From(ref sender) => format!("from {}", sender),
            Command::Subject(ref text) => format!("subject {}", text),
            Command::Data(ref text) => format!("data {}", text),
            Command::Hash(ref tag) => format!("hash {}", tag),
            Command::Send => "send".to_owned(),
            Command::Quit => "quit".to_owned(),
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(Ok(Command::Begin), "begin".parse());
        assert_eq!(Err(()), "begin now".parse::<Command>());
        assert_eq!(Err(()), "BEGIN".parse::<Command>());

        assert_eq!(
            Ok(Command::To(vec!["dib@earth.planet".to_owned()])),
            "to dib@earth.planet".parse()
        );
        assert_eq!(
            Ok(Command::To(vec![
                "dib@earth.planet".to_owned(),
                "zim@irk.planet".to_owned()
            ])),
            "to dib@earth.planet,zim@irk.planet".parse()
        );
        // Validity of the addresses is the server's business
        assert_eq!(
            Ok(Command::To(vec!["dib".to_owned()])),
            "to dib".parse()
        );
        assert_eq!(Err(()), "to".parse::<Command>());
        assert_eq!(Err(()), "to ".parse::<Command>());
        assert_eq!(Err(()), "to a@b.c d@e.f".parse::<Command>());
        assert_eq!(Err(()), "to a@b.c,,d@e.f".parse::<Command>());

        assert_eq!(
            Ok(Command::From("zim@irk.planet".to_owned())),
            "from zim@irk.planet".parse()
        );
        assert_eq!(Err(()), "from".parse::<Command>());
        assert_eq!(Err(()), "from a@b.c d@e.f".parse::<Command>());

        assert_eq!(
            Ok(Command::Subject("Doom doom doom".to_owned())),
            "subject Doom doom doom".parse()
        );
        assert_eq!(Ok(Command::Subject(String::new())), "subject".parse());
        assert_eq!(Ok(Command::Subject(String::new())), "subject ".parse());
        assert_eq!(
            Ok(Command::Data(" leading space".to_owned())),
            "data  leading space".parse()
        );
        assert_eq!(Ok(Command::Data(String::new())), "data".parse());
        assert_eq!(Err(()), "database".parse::<Command>());

        assert_eq!(
            Ok(Command::Hash("YWJj".to_owned())),
            "hash YWJj".parse()
        );
        assert_eq!(Err(()), "hash".parse::<Command>());
        assert_eq!(Err(()), "hash !!".parse::<Command>());

        assert_eq!(Ok(Command::Send), "send".parse());
        assert_eq!(Ok(Command::Quit), "quit".parse());
        assert_eq!(Err(()), "quit now".parse::<Command>());
        assert_eq!(Err(()), "".parse::<Command>());
        assert_eq!(Err(()), "login dib hunter2".parse::<Command>());
    }

    proptest! {
        #[test]
        fn text_commands_survive_formatting(text in "[^\r\n]*") {
            let subject = Command::Subject(text.clone());
            prop_assert_eq!(Ok(subject.clone()), subject.to_line().parse());
            let data = Command::Data(text);
            prop_assert_eq!(Ok(data.clone()), data.to_line().parse());
        }
    }
}
