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

use std::fmt;

use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};

use super::address;
use crate::support::error::Error;

/// A mail message.
///
/// While being composed, every field may be unset; a message is only relayed
/// or stored once it is `complete()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub sender: Option<String>,
    pub recipients: Option<Vec<String>>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// Base64 HMAC-SHA256 over `integrity_input()`.
    pub integrity_tag: Option<String>,
}

/// A fully populated message.
///
/// This is what actually travels through the relay queue and gets stored in
/// mailboxes; there is no way to construct one with a missing field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub integrity_tag: Option<String>,
}

/// The fields of a message, in the order they are checked for presence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Sender,
    Recipients,
    Subject,
    Body,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Field::Sender => "sender",
            Field::Recipients => "recipients",
            Field::Subject => "subject",
            Field::Body => "body",
        })
    }
}

impl Message {
    /// Return the first field, in priority order, which is not yet set.
    pub fn missing_field(&self) -> Option<Field> {
        if self.sender.is_none() {
            Some(Field::Sender)
        } else if self.recipients.as_ref().map_or(true, |r| r.is_empty()) {
            Some(Field::Recipients)
        } else if self.subject.is_none() {
            Some(Field::Subject)
        } else if self.body.is_none() {
            Some(Field::Body)
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing_field().is_none()
    }

    /// Convert into a `Mail` if every field is set.
    ///
    /// On failure, returns the message unchanged together with the first
    /// missing field.
    pub fn complete(self) -> Result<Mail, (Self, Field)> {
        if let Some(missing) = self.missing_field() {
            return Err((self, missing));
        }

        match self {
            Message {
                sender: Some(sender),
                recipients: Some(recipients),
                subject: Some(subject),
                body: Some(body),
                integrity_tag,
            } => Ok(Mail {
                sender,
                recipients,
                subject,
                body,
                integrity_tag,
            }),
            // missing_field() already ruled this out
            incomplete => Err((incomplete, Field::Sender)),
        }
    }
}

impl From<Mail> for Message {
    fn from(mail: Mail) -> Self {
        Message {
            sender: Some(mail.sender),
            recipients: Some(mail.recipients),
            subject: Some(mail.subject),
            body: Some(mail.body),
            integrity_tag: mail.integrity_tag,
        }
    }
}

impl Mail {
    pub fn new(
        sender: impl Into<String>,
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Mail {
            sender: sender.into(),
            recipients,
            subject: subject.into(),
            body: body.into(),
            integrity_tag: None,
        }
    }

    /// The recipients joined the way they travel on the wire.
    pub fn joined_recipients(&self) -> String {
        self.recipients.join(",")
    }

    /// The text the integrity tag is computed over.
    pub fn integrity_input(&self) -> String {
        [
            &*self.sender,
            &*self.joined_recipients(),
            &*self.subject,
            &*self.body,
        ]
        .join("\n")
    }

    /// Compute the integrity tag with the shared secret `key` and attach it.
    pub fn sign(&mut self, key: &[u8]) -> Result<(), Error> {
        let tag = hmac(key, self.integrity_input().as_bytes())?;
        self.integrity_tag = Some(base64::encode(&tag));
        Ok(())
    }

    /// Check the attached integrity tag against the shared secret `key`.
    ///
    /// Returns `false` if there is no tag or it is not valid base64.
    pub fn verify(&self, key: &[u8]) -> Result<bool, Error> {
        let claimed = match self
            .integrity_tag
            .as_ref()
            .and_then(|t| base64::decode(t).ok())
        {
            Some(claimed) => claimed,
            None => return Ok(false),
        };

        let actual = hmac(key, self.integrity_input().as_bytes())?;
        Ok(claimed.len() == actual.len()
            && openssl::memcmp::eq(&claimed, &actual))
    }

    /// The domain of the sender, if the sender is a valid address.
    pub fn sender_domain(&self) -> Option<String> {
        address::domain(&self.sender).map(str::to_lowercase)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let key = PKey::hmac(key)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}
