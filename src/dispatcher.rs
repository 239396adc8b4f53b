//! Single-consumer pipeline that funnels requests from many concurrent TCP
//! handlers onto the one shared serial bus (spec §4.5). At most one RTU
//! transaction is in flight at any instant — the dispatcher's worker is the
//! bus's only caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::errors::DispatchError;
use crate::modbus::{self, Pdu, EXC_SERVER_DEVICE_FAILURE};
use crate::rtu_transport::SerialTransport;
use crate::translators::Registry;

struct Job {
    transaction_id: u16,
    request: Pdu,
    reply_tx: oneshot::Sender<Pdu>,
}

pub struct Dispatcher {
    translators: Registry,
    job_tx: mpsc::Sender<Job>,
    job_timeout: Duration,
    /// Flipped once by the worker as it starts its shutdown drain, so
    /// `process` can reject new submissions with `ShutdownInProgress`
    /// instead of racing a job into a channel that is about to close.
    shutting_down: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Spawns the worker task and returns a handle to submit jobs through.
    /// `shutdown` is a broadcast receiver the worker selects on so in-flight
    /// jobs still get a synthetic reply once the process starts shutting
    /// down, rather than hanging forever.
    pub fn spawn(
        transport: Arc<dyn SerialTransport>,
        translators: Registry,
        queue_capacity: usize,
        job_timeout: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Arc<Self> {
        let (job_tx, mut job_rx) = mpsc::channel::<Job>(queue_capacity);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let worker_shutting_down = shutting_down.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        debug!("dispatcher worker received shutdown signal");
                        break;
                    }
                    job = job_rx.recv() => {
                        let Some(job) = job else { break };
                        Self::run_job(&transport, job).await;
                    }
                }
            }

            // No new jobs are accepted past this point; `process` checks the
            // flag before it ever reaches `try_send`.
            worker_shutting_down.store(true, Ordering::SeqCst);

            // Drain remaining jobs with a synthetic failure so no submitter
            // is left waiting after the worker has stopped taking new work.
            job_rx.close();
            while let Ok(job) = job_rx.try_recv() {
                let reply = Pdu::exception(&job.request, EXC_SERVER_DEVICE_FAILURE);
                let _ = job.reply_tx.send(reply);
            }
        });

        Arc::new(Self {
            translators,
            job_tx,
            job_timeout,
            shutting_down,
        })
    }

    async fn run_job(transport: &Arc<dyn SerialTransport>, job: Job) {
        let reply = match Self::transact(transport, &job.request).await {
            Ok(pdu) => pdu,
            Err(e) => {
                error!(tr_id = job.transaction_id, error = %e, "serial transaction failed");
                Pdu::exception(&job.request, EXC_SERVER_DEVICE_FAILURE)
            }
        };
        // Completion fires at most once; a dropped receiver (submitter gave
        // up on timeout) makes this a no-op.
        let _ = job.reply_tx.send(reply);
    }

    async fn transact(
        transport: &Arc<dyn SerialTransport>,
        request: &Pdu,
    ) -> Result<Pdu, crate::errors::RelayError> {
        let rtu_request = modbus::encode_rtu(request)?;
        let rtu_reply = transport.send(&rtu_request).await?;
        Ok(modbus::decode_rtu(&rtu_reply)?)
    }

    /// Runs the translator hook for `pdu.slave_id` (if any), then either
    /// returns its short-circuit reply or enqueues the PDU onto the serial
    /// worker and waits for its reply or the per-job timeout.
    pub async fn process(&self, transaction_id: u16, mut pdu: Pdu) -> Pdu {
        if self.translators.apply(&mut pdu) {
            return pdu;
        }

        if self.shutting_down.load(Ordering::SeqCst) {
            warn!(tr_id = transaction_id, error = %DispatchError::ShutdownInProgress, "dispatcher no longer accepting jobs");
            return Pdu::exception(&pdu, EXC_SERVER_DEVICE_FAILURE);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            transaction_id,
            request: pdu.clone(),
            reply_tx,
        };

        match self.job_tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(tr_id = transaction_id, error = %DispatchError::QueueFull, "dispatcher queue full");
                return Pdu::exception(&pdu, crate::modbus::EXC_SERVER_DEVICE_BUSY);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(tr_id = transaction_id, error = %DispatchError::ShutdownInProgress, "dispatcher worker already gone");
                return Pdu::exception(&pdu, EXC_SERVER_DEVICE_FAILURE);
            }
        }

        match tokio::time::timeout(self.job_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                // Worker dropped the sender without replying (e.g. shutdown
                // raced the channel close); treat like a failed transaction.
                error!(tr_id = transaction_id, "dispatcher worker dropped job without replying");
                Pdu::exception(&pdu, EXC_SERVER_DEVICE_FAILURE)
            }
            Err(_) => {
                warn!(tr_id = transaction_id, error = %DispatchError::Timeout, "dispatcher job timed out");
                Pdu::exception(&pdu, EXC_SERVER_DEVICE_FAILURE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RtuConfig;
    use crate::modbus::FUNC_READ_HOLDING_REGISTERS;
    use crate::translators::{Emulator, Registry};
    use std::sync::Arc;

    fn test_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(100, Arc::new(Emulator::new()));
        registry
    }

    #[tokio::test]
    async fn s4_translator_short_circuit_never_touches_the_bus() {
        // No transport is constructed at all — if the emulator didn't
        // short-circuit, this test would have nothing to call `send` on.
        let registry = test_registry();
        let mut pdu = Pdu::write_single_register(100, 1, 42);
        assert!(registry.apply(&mut pdu));
    }

    #[test]
    fn rtu_config_defaults_are_sane_for_dispatcher_tests() {
        let cfg = RtuConfig::default();
        assert!(cfg.baud_rate > 0);
    }

    /// Replies after a fixed delay with a canned RTU frame, so tests can pin
    /// down the worker mid-transaction without a real serial handle.
    struct SlowTransport {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl SerialTransport for SlowTransport {
        async fn send(&self, request: &[u8]) -> Result<Vec<u8>, crate::errors::TransportError> {
            tokio::time::sleep(self.delay).await;
            let pdu = Pdu {
                slave_id: request[0],
                function_code: request[1],
                data: vec![2, 0, 0],
            };
            Ok(modbus::encode_rtu(&pdu).unwrap())
        }
    }

    fn spawn_dispatcher(queue_capacity: usize, job_timeout: Duration, delay: Duration) -> Arc<Dispatcher> {
        let (_tx, rx) = broadcast::channel(1);
        Dispatcher::spawn(
            Arc::new(SlowTransport { delay }),
            Registry::new(),
            queue_capacity,
            job_timeout,
            rx,
        )
    }

    /// S6: with the worker already occupied by a long-running transaction
    /// and one job already buffered, a third submission must not block and
    /// must come back as a "server device busy" exception.
    #[tokio::test]
    async fn s6_queue_full_returns_busy_exception_without_blocking() {
        let dispatcher = spawn_dispatcher(1, Duration::from_secs(5), Duration::from_secs(2));
        let pdu = Pdu::read_holding_registers(1, 0, 1);

        let d1 = dispatcher.clone();
        let p1 = pdu.clone();
        let first = tokio::spawn(async move { d1.process(1, p1).await });
        // Give the worker a chance to pick the first job off the channel so
        // the channel itself is empty again before we fill it.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let d2 = dispatcher.clone();
        let p2 = pdu.clone();
        let second = tokio::spawn(async move { d2.process(2, p2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let third = dispatcher.process(3, pdu.clone()).await;
        assert!(third.is_exception());
        assert_eq!(third.data[0], crate::modbus::EXC_SERVER_DEVICE_BUSY);

        let _ = first.await;
        let _ = second.await;
    }

    /// S7: a transport that takes longer than the configured job timeout
    /// must cause `process` to return a "server device failure" exception
    /// rather than waiting for the slow reply.
    #[tokio::test]
    async fn s7_job_timeout_returns_failure_exception() {
        let dispatcher = spawn_dispatcher(10, Duration::from_millis(20), Duration::from_secs(5));
        let pdu = Pdu::read_holding_registers(1, 0, 1);

        let reply = dispatcher.process(1, pdu).await;
        assert!(reply.is_exception());
        assert_eq!(reply.data[0], EXC_SERVER_DEVICE_FAILURE);
    }

    /// Once shutdown has been signalled and the worker has drained, a
    /// submission arriving afterwards must not be enqueued at all — it
    /// comes back as a failure exception without ever touching the bus.
    #[tokio::test]
    async fn process_after_shutdown_returns_failure_exception_without_enqueueing() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let dispatcher = Dispatcher::spawn(
            Arc::new(SlowTransport {
                delay: Duration::from_millis(1),
            }),
            Registry::new(),
            10,
            Duration::from_secs(1),
            shutdown_rx,
        );

        shutdown_tx.send(()).unwrap();
        // Give the worker a moment to observe the shutdown signal and flip
        // `shutting_down` before the next submission races it.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let pdu = Pdu::read_holding_registers(1, 0, 1);
        let reply = dispatcher.process(1, pdu).await;
        assert!(reply.is_exception());
        assert_eq!(reply.data[0], EXC_SERVER_DEVICE_FAILURE);
    }

    #[test]
    fn read_holding_registers_predicts_function_code_for_fixture() {
        let pdu = Pdu::read_holding_registers(1, 0, 1);
        assert_eq!(pdu.function_code, FUNC_READ_HOLDING_REGISTERS);
    }
}
