//! TCP acceptor.
//!
//! Binds the listen socket and spawns one task per accepted connection.
//! Sessions share nothing but the user store and the file lock registry;
//! everything else is per-connection state owned by the session task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::UserStore;
use crate::files::LockRegistry;
use crate::session::{Session, SessionOptions};

/// The listening server.
///
/// The lock registry lives here, not in a global: it is created with the
/// server and handed to every session it spawns.
pub struct Server {
    listener: TcpListener,
    users: Arc<UserStore>,
    locks: Arc<LockRegistry>,
    options: SessionOptions,
}

impl Server {
    /// Bind the listen socket.
    pub async fn bind(
        addr: SocketAddr,
        users: Arc<UserStore>,
        options: SessionOptions,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            users,
            locks: Arc::new(LockRegistry::new()),
            options,
        })
    }

    /// The address the server actually bound (resolves port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, spawning a session task for each.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "listening");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let users = Arc::clone(&self.users);
            let locks = Arc::clone(&self.locks);
            let options = self.options.clone();

            tokio::spawn(async move {
                let session = Session::new(stream, users, locks, options);
                let id = session.id();
                info!(session = %id, peer = %peer, "connection accepted");
                match session.run().await {
                    Ok(()) => info!(session = %id, "session closed"),
                    Err(e) => warn!(session = %id, error = %e, "session ended with error"),
                }
            });
        }
    }
}
