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

// Log with error! rather than just printing so that failures of the servers
// end up wherever logging.toml sends them.
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        log::error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

mod client;
pub mod main;
mod serve;
