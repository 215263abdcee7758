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

//! A TCP listener feeding a fixed pool of connection handlers.
//!
//! Accepted sockets are passed to the workers through a bounded channel, so a
//! burst of connections beyond what the pool can serve waits in the kernel
//! backlog instead of spawning more threads.

use std::collections::HashMap;
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use log::{error, info, warn};

use crate::support::{error::Error, log_prefix::LogPrefix};
use crate::wire::codec::Codec;

/// Serves one connection to completion.
pub type Handler = dyn Fn(Codec) -> Result<(), Error> + Send + Sync;

type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

pub struct Listener {
    name: String,
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    connections: Connections,
    /// Dropped to release an acceptor waiting for a free worker.
    shutdown: Option<Sender<()>>,
    acceptor: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Listener {
    /// Bind `address` and start serving connections with `handler` on
    /// `worker_count` threads.
    ///
    /// `name` labels the protocol in log messages. Connections idle for
    /// longer than `idle_timeout` are dropped.
    pub fn start(
        name: &str,
        address: &str,
        worker_count: usize,
        idle_timeout: Duration,
        handler: Arc<Handler>,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(address)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let connections = Connections::default();
        let next_id = Arc::new(AtomicU64::new(0));
        let worker_count = worker_count.max(1);
        let (tx, rx) = channel::bounded::<TcpStream>(worker_count);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let worker = Worker {
                name: name.to_owned(),
                rx: rx.clone(),
                stop: Arc::clone(&stop),
                connections: Arc::clone(&connections),
                next_id: Arc::clone(&next_id),
                idle_timeout,
                handler: Arc::clone(&handler),
            };
            workers.push(
                thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || worker.run())?,
            );
        }

        let acceptor_stop = Arc::clone(&stop);
        let acceptor_name = name.to_owned();
        let acceptor = thread::Builder::new()
            .name(format!("{}-accept", name))
            .spawn(move || {
                for stream in listener.incoming() {
                    if acceptor_stop.load(Ordering::SeqCst) {
                        break;
                    }

                    match stream {
                        // Wait for a free worker, unless shutting down
                        Ok(stream) => crossbeam::select! {
                            send(tx, stream) -> sent => if sent.is_err() {
                                break;
                            },
                            recv(shutdown_rx) -> _ => break,
                        },
                        Err(e) => {
                            warn!("{} Failed to accept: {}", acceptor_name, e)
                        },
                    }
                }
            })?;

        info!("{} Listening on {}", name, local_addr);
        Ok(Listener {
            name: name.to_owned(),
            local_addr,
            stop,
            connections,
            shutdown: Some(shutdown_tx),
            acceptor: Some(acceptor),
            workers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every open connection, and wait for all threads
    /// to exit.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.shutdown.take();
        // Workers register before checking the stop flag, so nothing can slip
        // in after this sweep.
        for stream in lock(&self.connections).values() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        // The acceptor may be blocked in accept(); give it one last
        // connection so it notices the stop flag.
        let _ = TcpStream::connect_timeout(
            &wake_address(self.local_addr),
            Duration::from_secs(5),
        );
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                error!("{} Acceptor thread panicked", self.name);
            }
        }

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("{} Connection worker panicked", self.name);
            }
        }

        info!("{} Stopped listening on {}", self.name, self.local_addr);
    }
}

fn wake_address(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        },
        IpAddr::V6(ip) if ip.is_unspecified() => {
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        },
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

fn lock(connections: &Connections) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
    match connections.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Worker {
    name: String,
    rx: Receiver<TcpStream>,
    stop: Arc<AtomicBool>,
    connections: Connections,
    next_id: Arc<AtomicU64>,
    idle_timeout: Duration,
    handler: Arc<Handler>,
}

impl Worker {
    fn run(&self) {
        for stream in self.rx.iter() {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            self.serve(stream);
        }
    }

    fn serve(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned());
        let log_prefix = LogPrefix::for_peer(&self.name, &peer);

        let _registration = match self.register(&stream) {
            Ok(registration) => registration,
            Err(e) => {
                warn!("{} Failed to set up connection: {}", log_prefix, e);
                return;
            },
        };

        // shutdown() may have swept the registry just before we registered
        if self.stop.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        info!("{} Connection established", log_prefix);
        let codec =
            match Codec::from_tcp(stream, self.idle_timeout, log_prefix.clone())
            {
                Ok(codec) => codec,
                Err(e) => {
                    warn!("{} Failed to set up connection: {}", log_prefix, e);
                    return;
                },
            };

        match (self.handler)(codec) {
            Ok(()) => info!("{} Connection closed", log_prefix),
            Err(e) if e.is_disconnect() => {
                info!("{} Connection closed by peer", log_prefix)
            },
            Err(e) => warn!("{} Connection aborted: {}", log_prefix, e),
        }
    }

    fn register(&self, stream: &TcpStream) -> Result<Registration, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.connections).insert(id, stream.try_clone()?);
        Ok(Registration {
            id,
            connections: Arc::clone(&self.connections),
        })
    }
}

/// Removes a connection from the registry when dropped.
struct Registration {
    id: u64,
    connections: Connections,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&self.connections).remove(&self.id);
    }
}
