use super::session::run_session;
use crate::server::engine::Engine;
use core::convert::Infallible;
use seqd_core::{
    Result,
    store::{BufferStore, CounterStore},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, ToSocketAddrs};

/// Accepts client connections and spawns one session per connection.
///
/// There is no connection limit and no supervision: the first accept error
/// is returned from [`serve`](Self::serve) and ends the service.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub async fn serve<B, C>(self, engine: Arc<Engine<B, C>>) -> Result<Infallible>
    where
        B: BufferStore,
        C: CounterStore,
    {
        loop {
            let (stream, peer) = self.inner.accept().await?;
            tracing::debug!("Accepted connection from {peer}");

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY for {peer}: {e}");
            }

            tokio::spawn(run_session(stream, peer.to_string(), Arc::clone(&engine)));
        }
    }
}
