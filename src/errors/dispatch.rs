use thiserror::Error;

/// Failures raised by the single-consumer serial dispatcher (spec §7).
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatcher queue is full")]
    QueueFull,

    #[error("no reply within the per-job timeout")]
    Timeout,

    #[error("dispatcher is shutting down")]
    ShutdownInProgress,
}
