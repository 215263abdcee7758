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

use std::collections::BTreeMap;
use std::sync::Arc;

/// The users of one mailbox server and their passwords.
#[derive(Clone, Debug, Default)]
pub struct UserDirectory {
    domain: String,
    passwords: Arc<BTreeMap<String, String>>,
}

impl UserDirectory {
    pub fn new(domain: &str, passwords: BTreeMap<String, String>) -> Self {
        UserDirectory {
            domain: domain.to_lowercase(),
            passwords: Arc::new(passwords),
        }
    }

    /// The domain these users receive mail for.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn user_exists(&self, user: &str) -> bool {
        self.passwords.contains_key(user)
    }

    pub fn check_password(&self, user: &str, password: &str) -> bool {
        self.passwords.get(user).map_or(false, |expected| {
            expected.len() == password.len()
                && openssl::memcmp::eq(expected.as_bytes(), password.as_bytes())
        })
    }

    /// If `address` belongs to this domain, return its user name.
    pub fn local_user<'a>(&self, address: &'a str) -> Option<&'a str> {
        match (
            super::address::user(address),
            super::address::domain(address),
        ) {
            (Some(user), Some(domain))
                if domain.eq_ignore_ascii_case(&self.domain) =>
            {
                Some(user)
            },
            _ => None,
        }
    }
}
