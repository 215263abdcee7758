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

//! The transfer server: accepts mail from clients and relays it onwards.

use std::net::SocketAddr;
use std::sync::Arc;

use log::info;

use super::listener::{Handler, Listener};
use crate::dmtp::server::{MailConsumer, Server};
use crate::mail::message::Mail;
use crate::relay::{
    pipeline::{RelayPipeline, RelayQueue, Relayer},
    resolver::{Resolver, StaticResolver},
};
use crate::support::{error::Error, system_config::TransferConfig};
use crate::wire::codec::Codec;

/// Hands every received message to the relay queue.
pub struct TransferConsumer {
    queue: RelayQueue,
}

impl TransferConsumer {
    pub fn new(queue: RelayQueue) -> Self {
        TransferConsumer { queue }
    }
}

impl MailConsumer for TransferConsumer {
    fn accepts_recipient(&self, _: &str) -> bool {
        true
    }

    fn consume(&self, mail: Mail) -> Result<(), Error> {
        self.queue.submit(mail)
    }
}

pub struct TransferServer {
    listener: Listener,
    pipeline: RelayPipeline,
}

impl TransferServer {
    /// Start a transfer server resolving domains through the static table in
    /// `config`.
    pub fn start(config: &TransferConfig) -> Result<Self, Error> {
        let resolver = StaticResolver::new(
            config
                .domains
                .iter()
                .map(|(domain, address)| (domain.clone(), address.clone())),
        );
        Self::start_with(config, Arc::new(resolver))
    }

    pub fn start_with(
        config: &TransferConfig,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Self, Error> {
        let relayer = Arc::new(Relayer::new(
            resolver,
            config.bounce_sender.clone(),
            config.connect_timeout(),
        ));
        let pipeline = RelayPipeline::start(
            relayer,
            config.relay_workers,
            config.queue_capacity,
        );

        let consumer = Arc::new(TransferConsumer::new(pipeline.queue()));
        let handler: Arc<Handler> = Arc::new(move |codec: Codec| {
            Server::new(codec, &*consumer).run()
        });

        let listener = match Listener::start(
            "dmtp",
            &config.listen,
            config.connection_workers,
            config.idle_timeout(),
            handler,
        ) {
            Ok(listener) => listener,
            Err(e) => {
                pipeline.shutdown();
                return Err(e);
            },
        };

        Ok(TransferServer { listener, pipeline })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Stop accepting mail, then stop relaying.
    pub fn shutdown(self) {
        self.listener.shutdown();
        self.pipeline.shutdown();
        info!("Transfer server stopped");
    }
}
