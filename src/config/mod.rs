mod backoff;
mod connection;
mod dispatcher;
mod http;
mod logging;
mod relay;
mod rtu;
mod tcp;
mod translators;
mod types;

pub use backoff::Config as BackoffConfig;
pub use connection::Config as ConnectionConfig;
pub use dispatcher::Config as DispatcherConfig;
pub use http::Config as HttpConfig;
pub use logging::Config as LoggingConfig;
pub use relay::Config as RelayConfig;
pub use rtu::Config as RtuConfig;
pub use tcp::Config as TcpConfig;
pub use translators::Config as TranslatorsConfig;
pub use types::{DataBits, Parity, StopBits};
