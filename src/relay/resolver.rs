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

use std::collections::BTreeMap;

/// Maps a mail domain to the `host:port` of the server that accepts its mail.
pub trait Resolver: Send + Sync {
    /// Return the address of the server for `domain`, or `None` if the
    /// domain is unknown. Domains are case-insensitive.
    fn resolve(&self, domain: &str) -> Option<String>;
}

/// A `Resolver` backed by a fixed table.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    domains: BTreeMap<String, String>,
}

impl StaticResolver {
    pub fn new(domains: impl IntoIterator<Item = (String, String)>) -> Self {
        StaticResolver {
            domains: domains
                .into_iter()
                .map(|(domain, target)| (domain.to_lowercase(), target))
                .collect(),
        }
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, domain: &str) -> Option<String> {
        self.domains.get(&domain.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn static_resolution() {
        let resolver = StaticResolver::new(vec![
            ("Earth.Planet".to_owned(), "127.0.0.1:2526".to_owned()),
            ("irk.planet".to_owned(), "irk.example:2526".to_owned()),
        ]);

        assert_eq!(
            Some("127.0.0.1:2526".to_owned()),
            resolver.resolve("earth.planet")
        );
        assert_eq!(
            Some("irk.example:2526".to_owned()),
            resolver.resolve("IRK.PLANET")
        );
        assert_eq!(None, resolver.resolve("vort.planet"));
    }
}
