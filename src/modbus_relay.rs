use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use socket2::TcpKeepalive;
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    connection::ConnectionManager,
    dispatcher::Dispatcher,
    errors::{ClientErrorKind, ConnectionError, FrameErrorKind, ProtocolErrorKind, RelayError},
    http_api::start_http_server,
    modbus::{self, Pdu, MBAP_HEADER_SIZE},
    rtu_transport::RtuTransport,
    translators::{Emulator, RelayShim, Registry},
    IoOperation, TransportError,
};

pub struct ModbusRelay {
    config: crate::RelayConfig,
    dispatcher: Arc<Dispatcher>,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Sender<()>,
}

fn build_registry(config: &crate::config::TranslatorsConfig) -> Registry {
    let mut registry = Registry::new();
    for &slave_id in &config.relay_shim_slaves {
        registry.register(slave_id, Arc::new(RelayShim::new()));
    }
    for &slave_id in &config.emulator_slaves {
        registry.register(slave_id, Arc::new(Emulator::new()));
    }
    registry
}

impl ModbusRelay {
    pub fn new(config: crate::RelayConfig) -> Result<Self, RelayError> {
        crate::config::RelayConfig::validate(&config)?;

        let (shutdown, _) = broadcast::channel(1);

        let transport: Arc<dyn crate::rtu_transport::SerialTransport> =
            Arc::new(RtuTransport::new(&config.rtu));
        let registry = build_registry(&config.translators);
        let dispatcher = Dispatcher::spawn(
            transport,
            registry,
            config.dispatcher.queue_capacity,
            config.dispatcher.job_timeout,
            shutdown.subscribe(),
        );

        let connection_manager = Arc::new(ConnectionManager::new(config.connection.clone()));

        Ok(Self {
            config,
            dispatcher,
            connection_manager,
            shutdown,
        })
    }

    fn spawn_task<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(future);
        debug!("Spawned {} task: {:?}", name, task.id());
    }

    pub async fn run(self: Arc<Self>) -> Result<(), RelayError> {
        let addr = format!("{}:{}", self.config.tcp.bind_addr, self.config.tcp.bind_port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Transport(TransportError::Io {
                operation: IoOperation::Configure,
                details: format!("Failed to bind to address {}", addr),
                source: e,
            })
        })?;

        info!("Listening on {}", addr);

        if self.config.http.enabled {
            let manager = Arc::clone(&self.connection_manager);
            let shutdown_rx = self.shutdown.subscribe();
            let http_addr = self.config.http.bind_addr.clone();
            let http_port = self.config.http.bind_port;

            self.spawn_task("http", async move {
                if let Err(e) = start_http_server(http_addr, http_port, manager, shutdown_rx).await
                {
                    error!("HTTP server error: {}", e);
                }
            });
        }

        // Background sweep of per-client stats entries that have gone quiet
        // (distinct from the per-socket idle timer each handler keeps).
        let manager = Arc::clone(&self.connection_manager);
        let mut shutdown_rx = self.shutdown.subscribe();

        self.spawn_task("cleanup", async move {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_secs(60)) => {
                        if let Err(e) = manager.cleanup_idle_connections().await {
                            error!("Error during connection cleanup: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cleanup task received shutdown signal");
                        break;
                    }
                }
            }
        });

        // Periodically log statistics
        let manager = Arc::clone(&self.connection_manager);
        let mut shutdown_rx = self.shutdown.subscribe();

        self.spawn_task("stats", async move {
            loop {
                tokio::select! {
                    _ = sleep(Duration::from_secs(300)) => {
                      match manager.get_stats().await {
                        Ok(stats) => info!("Connection stats: {:?}", stats),
                        Err(e) => error!("Failed to get connection stats: {}", e),
                      }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Stats task received shutdown signal");
                        break;
                    }
                }
            }
        });

        let tcp_idle_timeout = self.config.connection.tcp_idle_timeout;
        let keep_alive = self.config.tcp.keep_alive;

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let accept_result = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Acceptor received shutdown signal, closing listener");
                    break;
                }
                result = listener.accept() => result,
            };

            match accept_result {
                Ok((socket, peer)) => {
                    info!("New connection from {}", peer);

                    if let Err(e) = apply_keepalive(&socket, keep_alive) {
                        warn!("Failed to set TCP keepalive for {}: {}", peer, e);
                    }

                    match self.connection_manager.accept_connection(peer).await {
                        Ok(guard) => {
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let manager = Arc::clone(&self.connection_manager);

                            self.spawn_task("client", async move {
                                if let Err(e) = handle_client(
                                    socket,
                                    dispatcher,
                                    &manager,
                                    peer,
                                    tcp_idle_timeout,
                                )
                                .await
                                {
                                    error!("Client error: {}", e);
                                    if let Err(stat_err) = manager.record_client_error(&peer).await
                                    {
                                        error!("Failed to record client error: {}", stat_err);
                                    }
                                }
                                drop(guard);
                            });
                        }
                        Err(e) => {
                            error!("Connection rejected: {}", e);
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }

        Ok(())
    }

    /// Graceful shutdown: stop accepting, signal the dispatcher worker and
    /// background tasks, then give in-flight handlers a moment to drain.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        info!("Initiating graceful shutdown");
        self.shutdown.send(()).map_err(|e| {
            RelayError::Connection(ConnectionError::InvalidState(format!(
                "Failed to send shutdown signal: {}",
                e
            )))
        })?;

        sleep(Duration::from_secs(5)).await;

        Ok(())
    }
}

fn apply_keepalive(socket: &TcpStream, interval: Duration) -> std::io::Result<()> {
    socket.set_nodelay(true)?;
    if interval.is_zero() {
        return Ok(());
    }
    let sock_ref = socket2::SockRef::from(socket);
    let keepalive = TcpKeepalive::new().with_time(interval);
    sock_ref.set_tcp_keepalive(&keepalive)
}

/// Accumulates TCP bytes into complete MBAP ADUs (spec §4.6): at least the
/// 7-byte header, then `length - 1` more body bytes, then yields exactly one
/// PDU at a time. Unlike a single bounded read, this is correct regardless of
/// how a real TCP stream happens to fragment the request across packets.
struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Returns the next complete ADU's bytes once enough have accumulated,
    /// draining them from the internal buffer.
    fn try_take_adu(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < MBAP_HEADER_SIZE {
            return None;
        }
        let length = u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize;
        if length == 0 {
            return None;
        }
        let total_len = MBAP_HEADER_SIZE - 1 + length;
        if self.buf.len() < total_len {
            return None;
        }
        Some(self.buf.drain(..total_len).collect())
    }
}

async fn handle_client<S>(
    socket: S,
    dispatcher: Arc<Dispatcher>,
    manager: &ConnectionManager,
    peer_addr: SocketAddr,
    idle_timeout: Duration,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    info!("New client connected from {}", peer_addr);

    let (mut reader, mut writer) = split(socket);
    let mut framer = Framer::new();
    let mut read_buf = vec![0u8; 512];

    loop {
        let adu = loop {
            if let Some(adu) = framer.try_take_adu() {
                break adu;
            }

            let n = match timeout(idle_timeout, reader.read(&mut read_buf)).await {
                Ok(Ok(0)) => {
                    info!("Client {} disconnected", peer_addr);
                    return Ok(());
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    manager.record_request(peer_addr, false).await;
                    return Err(RelayError::Connection(ConnectionError::InvalidState(
                        format!("Connection lost: {}", e),
                    )));
                }
                Err(_) => {
                    debug!("Connection {} idle for {:?}, closing", peer_addr, idle_timeout);
                    return Ok(());
                }
            };

            framer.buf.extend_from_slice(&read_buf[..n]);
        };

        debug!("Received TCP ADU from {}: {:02X?}", peer_addr, &adu);

        let (transaction_id, pdu) = match modbus::decode_tcp(&adu) {
            Ok(decoded) => decoded,
            Err(e) => {
                manager.record_request(peer_addr, false).await;
                return Err(RelayError::frame(
                    FrameErrorKind::InvalidFormat,
                    e.to_string(),
                    Some(adu),
                ));
            }
        };

        if u16::from_be_bytes([adu[2], adu[3]]) != 0 {
            manager.record_request(peer_addr, false).await;
            return Err(RelayError::protocol(
                ProtocolErrorKind::InvalidProtocolId,
                "non-zero protocol id",
            ));
        }

        let reply_pdu = dispatcher.process(transaction_id, pdu).await;
        let response = modbus::encode_tcp(&reply_pdu, transaction_id);

        debug!("Sending TCP response to {}: {:02X?}", peer_addr, &response);

        match timeout(idle_timeout, writer.write_all(&response)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                manager.record_request(peer_addr, false).await;
                return Err(RelayError::client(
                    ClientErrorKind::WriteError,
                    peer_addr,
                    format!("Failed to write response: {}", e),
                ));
            }
            Err(_) => {
                manager.record_request(peer_addr, false).await;
                return Err(RelayError::client(
                    ClientErrorKind::Timeout,
                    peer_addr,
                    "Write timeout",
                ));
            }
        }

        manager.record_request(peer_addr, !reply_pdu.is_exception()).await;
    }
}

#[allow(dead_code)]
fn exception_for(request: &Pdu, code: u8) -> Pdu {
    Pdu::exception(request, code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::modbus::FUNC_READ_HOLDING_REGISTERS;
    use crate::translators::Registry;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_modbus_relay_shutdown() {
        let config = crate::RelayConfig::default();
        let relay = ModbusRelay::new(config).unwrap();

        assert!(relay.shutdown().await.is_ok());
    }

    struct EchoTransport;

    #[async_trait::async_trait]
    impl crate::rtu_transport::SerialTransport for EchoTransport {
        async fn send(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
            let pdu = Pdu {
                slave_id: request[0],
                function_code: request[1],
                data: vec![2, 0, 0],
            };
            Ok(modbus::encode_rtu(&pdu).unwrap())
        }
    }

    fn test_dispatcher() -> Arc<Dispatcher> {
        let (_tx, rx) = broadcast::channel(1);
        Dispatcher::spawn(Arc::new(EchoTransport), Registry::new(), 10, Duration::from_secs(1), rx)
    }

    #[tokio::test]
    async fn framer_assembles_split_adu() {
        let pdu = Pdu::read_holding_registers(1, 0, 1);
        let adu = modbus::encode_tcp(&pdu, 7);

        let mut framer = Framer::new();
        assert!(framer.try_take_adu().is_none());

        framer.buf.extend_from_slice(&adu[..5]);
        assert!(framer.try_take_adu().is_none());

        framer.buf.extend_from_slice(&adu[5..]);
        let taken = framer.try_take_adu().unwrap();
        assert_eq!(taken, adu);
        assert!(framer.try_take_adu().is_none());
    }

    #[tokio::test]
    async fn handle_client_invalid_protocol_id_is_rejected() {
        let dispatcher = test_dispatcher();
        let manager = Arc::new(ConnectionManager::new(ConnectionConfig::default()));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);

        let (client, server) = tokio::io::duplex(64);
        let mut client_writer = tokio::io::BufWriter::new(client);

        let invalid_frame = [
            0x00, 0x01, 0x01, 0x00, 0x00, 0x06, 0x01, FUNC_READ_HOLDING_REGISTERS, 0x00, 0x00,
            0x00, 0x01,
        ];
        client_writer.write_all(&invalid_frame).await.unwrap();
        client_writer.flush().await.unwrap();
        drop(client_writer);

        let result = handle_client(server, dispatcher, &manager, addr, Duration::from_secs(5))
            .await;

        assert!(matches!(
            result,
            Err(RelayError::Protocol {
                kind: ProtocolErrorKind::InvalidProtocolId,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn handle_client_closes_after_idle_timeout() {
        let dispatcher = test_dispatcher();
        let manager = Arc::new(ConnectionManager::new(ConnectionConfig::default()));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8081);

        let (client, server) = tokio::io::duplex(64);

        let result = handle_client(
            server,
            dispatcher,
            &manager,
            addr,
            Duration::from_millis(50),
        )
        .await;

        assert!(result.is_ok(), "idle timeout should close cleanly, got {:?}", result);
        drop(client);
    }
}
