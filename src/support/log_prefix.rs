//-
// Copyright (c) 2023, 2024, Jason Lingle
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
use std::sync::{Arc, Mutex};

/// Tracks text that should be included in at the start of every log statement.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    protocol: String,
    peer: Option<String>,
    user: Option<String>,
    secure: bool,
}

impl LogPrefix {
    pub fn new(protocol: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: None,
                user: None,
                secure: false,
            })),
        }
    }

    /// Create a prefix for a connection with the given peer.
    pub fn for_peer(protocol: &str, peer: &str) -> Self {
        let prefix = Self::new(protocol.to_owned());
        prefix.set_peer(peer.to_owned());
        prefix
    }

    fn set_peer(&self, peer: String) {
        self.lock().peer = Some(sanitise(peer));
    }

    pub fn set_user(&self, user: Option<String>) {
        self.lock().user = user.map(sanitise);
    }

    pub fn set_secure(&self, secure: bool) {
        self.lock().secure = secure;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning is irrelevant; the contents are plain strings.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.lock();
        write!(f, "{}", inner.protocol)?;
        if let Some(ref peer) = inner.peer {
            write!(f, ":{}", peer)?;
        }

        if inner.user.is_some() || inner.secure {
            write!(f, "[")?;
            if let Some(ref user) = inner.user {
                write!(f, "{}", user)?;
                if inner.secure {
                    write!(f, " ")?;
                }
            }
            if inner.secure {
                write!(f, "secure")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting() {
        let prefix = LogPrefix::for_peer("dmap", "127.0.0.1:4000");
        assert_eq!("dmap:127.0.0.1:4000", prefix.to_string());

        prefix.set_user(Some("zim\n".to_owned()));
        assert_eq!("dmap:127.0.0.1:4000[zim]", prefix.to_string());

        prefix.set_secure(true);
        assert_eq!("dmap:127.0.0.1:4000[zim secure]", prefix.to_string());

        let shared = prefix.clone();
        shared.set_user(None);
        assert_eq!("dmap:127.0.0.1:4000[secure]", prefix.to_string());
    }

    #[test]
    fn long_values_truncated() {
        let prefix = LogPrefix::new("dmtp".to_owned());
        prefix.set_user(Some("x".repeat(100)));
        assert_eq!(4 + 2 + 64, prefix.to_string().len());
    }
}
