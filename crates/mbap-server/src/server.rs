use std::net::SocketAddr;
use std::sync::Arc;

use mbap_core::frame::{MAX_ADU_LEN, MBAP_HEADER_LEN};
use mbap_core::StreamReassembler;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::dispatch::{Dispatch, Dispatcher};
use crate::store::SharedDataStore;
use crate::ServerError;

/// Tokio host for the dispatcher: one task per accepted socket.
#[derive(Debug)]
pub struct ModbusTcpServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    connections: Arc<Semaphore>,
}

impl ModbusTcpServer {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: ServerConfig,
        store: SharedDataStore,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener, config, store)
    }

    pub fn from_listener(
        listener: TcpListener,
        config: ServerConfig,
        store: SharedDataStore,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(config.unit_id, store),
            connections: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &SharedDataStore {
        self.dispatcher.store()
    }

    /// Accepts peers until the listener fails.
    ///
    /// Peers beyond `max_connections` are closed immediately.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                warn!(%peer, "modbus tcp connection limit reached, closing peer");
                drop(socket);
                continue;
            };
            let dispatcher = self.dispatcher.clone();
            debug!(%peer, "accepted modbus tcp connection");

            tokio::spawn(async move {
                if let Err(err) = handle_connection(socket, dispatcher).await {
                    warn!(%peer, error = %err, "modbus tcp server connection ended with error");
                }
                drop(permit);
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    dispatcher: Dispatcher,
) -> Result<(), ServerError> {
    socket.set_nodelay(true)?;
    let mut reassembler = StreamReassembler::new();
    let mut chunk = [0u8; MAX_ADU_LEN];

    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }

        for frame in reassembler.push(&chunk[..n]) {
            let Dispatch::Respond(response) = dispatcher.dispatch(&frame) else {
                continue;
            };
            debug!(
                correlation_id = frame.transaction_id(),
                unit_id = dispatcher.unit_id(),
                pdu_len = response.len() - MBAP_HEADER_LEN,
                "sending modbus tcp server response"
            );
            socket.write_all(&response).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ModbusTcpServer;
    use crate::config::ServerConfig;
    use crate::store::SharedDataStore;
    use crate::ServerError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(
        config: ServerConfig,
    ) -> (
        std::net::SocketAddr,
        SharedDataStore,
        tokio::task::JoinHandle<Result<(), ServerError>>,
    ) {
        let store = SharedDataStore::default();
        let server = ModbusTcpServer::bind("127.0.0.1:0", config, store.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        (addr, store, tokio::spawn(server.run()))
    }

    #[tokio::test]
    async fn answers_read_holding_registers() {
        let (addr, store, task) = start(ServerConfig::default()).await;
        store.set_holding_register(0, 10).unwrap();
        store.set_holding_register(1, 20).unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02])
            .await
            .unwrap();
        let mut response = [0u8; 13];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(
            response,
            [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]
        );

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn fragmented_write_updates_store() {
        let (addr, store, task) = start(ServerConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = [
            0x00, 0x05, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00,
            0x0A, 0x00, 0x14,
        ];
        for piece in request.chunks(3) {
            stream.write_all(piece).await.unwrap();
            stream.flush().await.unwrap();
            tokio::task::yield_now().await;
        }
        let mut response = [0u8; 12];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(
            response,
            [0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x10, 0x00, 0x00, 0x00, 0x02]
        );
        assert_eq!(store.holding_register(0), Ok(10));
        assert_eq!(store.holding_register(1), Ok(20));

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn foreign_unit_gets_no_reply() {
        let (addr, _store, task) = start(ServerConfig::default().with_unit_id(1)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // Unit 2 first, then unit 1; only the second is answered.
        stream
            .write_all(&[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02,
                0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01,
            ])
            .await
            .unwrap();
        let mut response = [0u8; 11];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(response[..2], [0x00, 0x02]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn illegal_function_round_trip() {
        let (addr, _store, task) = start(ServerConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&[0x12, 0x34, 0x00, 0x00, 0x00, 0x02, 0x01, 0x07])
            .await
            .unwrap();
        let mut response = [0u8; 9];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0x12, 0x34, 0x00, 0x00, 0x00, 0x03, 0x01, 0x87, 0x01]);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn connection_limit_closes_extra_peers() {
        let (addr, _store, task) = start(ServerConfig::default().with_max_connections(1)).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let mut response = [0u8; 11];
        first.read_exact(&mut response).await.unwrap();

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(second.read(&mut buf).await.unwrap(), 0);

        task.abort();
        let _ = task.await;
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let err = ModbusTcpServer::bind(
            "127.0.0.1:0",
            ServerConfig::default().with_unit_id(0),
            SharedDataStore::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }
}
