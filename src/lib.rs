pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod http_api;
pub mod logging;
pub mod modbus;
pub mod modbus_relay;
pub mod rtu_transport;
pub mod translators;

pub use config::{
    ConnectionConfig, DispatcherConfig, HttpConfig, LoggingConfig, RelayConfig, RtuConfig,
    TcpConfig, TranslatorsConfig,
};
pub use config::{DataBits, Parity, StopBits};
pub use connection::BackoffStrategy;
pub use connection::{ClientStats, ConnectionStats, IpStats};
pub use connection::{ConnectionGuard, ConnectionManager};
pub use dispatcher::Dispatcher;
pub use errors::{
    BackoffError, ClientErrorKind, ConfigValidationError, ConnectionError, DispatchError,
    FrameError, FrameErrorKind, IoOperation, ProtocolErrorKind, RelayError, SerialErrorKind,
    TransportError,
};
pub use http_api::start_http_server;
pub use logging::setup_logging;
pub use modbus::{
    checksum, decode_rtu, decode_tcp, encode_rtu, encode_tcp, predicted_reply_len, Crc16, Pdu,
};
pub use modbus_relay::ModbusRelay;
pub use rtu_transport::{RtuTransport, SerialTransport};
pub use translators::{Emulator, RelayShim, Registry, Translator};
