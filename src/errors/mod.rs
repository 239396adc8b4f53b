mod backoff;
mod config;
mod connection;
mod dispatch;
mod frame;
mod init;
mod io_operation;
mod kinds;
mod relay;
mod transport;

pub use kinds::ClientErrorKind;
pub use kinds::FrameErrorKind;
pub use kinds::FrameFormatKind;
pub use kinds::FrameSizeKind;
pub use kinds::ProtocolErrorKind;
pub use kinds::SerialErrorKind;
pub use kinds::SystemErrorKind;

pub use backoff::BackoffError;
pub use config::ConfigValidationError;
pub use connection::ConnectionError;
pub use dispatch::DispatchError;
pub use frame::FrameError;
pub use init::InitializationError;
pub use io_operation::IoOperation;
pub use relay::RelayError;
pub use transport::TransportError;
