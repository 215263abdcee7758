//-
// Copyright (c) 2020, 2023, 2024, 2025, Jason Lingle
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

//! Mail address syntax.
//!
//! An address is `local@domain`, where the local part is non-empty and the
//! domain contains at least one dot with something on both sides of it. This
//! is far looser than RFC 5322; the rest of the system only needs a routing
//! domain and a user name out of an address.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RX_ADDRESS: Regex =
        Regex::new(r"^([^@\s,]+)@([^@\s,]+\.[^@\s,]+)$").unwrap();
}

/// Return whether `address` is a syntactically valid mail address.
pub fn is_valid(address: &str) -> bool {
    RX_ADDRESS.is_match(address)
}

/// Return the domain part of `address`, or `None` if it is not valid.
pub fn domain(address: &str) -> Option<&str> {
    RX_ADDRESS
        .captures(address)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str())
}

/// Return the user (local) part of `address`, or `None` if it is not valid.
pub fn user(address: &str) -> Option<&str> {
    RX_ADDRESS
        .captures(address)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Split `recipients` into groups sharing the same domain.
///
/// Groups are ordered by the first occurrence of their domain, and each group
/// keeps the relative order of its recipients. Domains are compared
/// case-insensitively and reported in lower case. Invalid addresses are
/// returned separately.
pub fn group_by_domain<'a>(
    recipients: impl IntoIterator<Item = &'a String>,
) -> (Vec<(String, Vec<String>)>, Vec<String>) {
    let mut groups = Vec::<(String, Vec<String>)>::new();
    let mut invalid = Vec::new();

    for recipient in recipients {
        let domain = match domain(recipient) {
            Some(d) => d.to_lowercase(),
            None => {
                invalid.push(recipient.clone());
                continue;
            },
        };

        if let Some(&mut (_, ref mut group)) =
            groups.iter_mut().find(|&&mut (ref d, _)| *d == domain)
        {
            group.push(recipient.clone());
        } else {
            groups.push((domain, vec![recipient.clone()]));
        }
    }

    (groups, invalid)
}
