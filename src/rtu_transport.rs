//! Serial transport (spec §4.3). Owns the RS-485 line exclusively; the
//! dispatcher worker is its only caller. Opens lazily, paces writes with the
//! Modbus 3.5-character silent interval, and closes itself after a quiet
//! period so an unplugged or power-cycled converter doesn't wedge the port.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPort;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{DataBits, Parity, RtuConfig, StopBits};
use crate::errors::TransportError;
use crate::modbus::{self, RTU_MIN_SIZE};

/// What the dispatcher needs from a serial bus: hand it a framed RTU request,
/// get back a framed RTU reply. Abstracted so the dispatcher can be driven by
/// a fake bus in tests without a real `/dev/tty*`.
#[async_trait]
pub trait SerialTransport: Send + Sync {
    async fn send(&self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Below this baud rate character/frame times scale with baud (spec §4.3);
/// at or above it, the spec fixes the silent interval to 750/1750 µs.
const HIGH_BAUD_THRESHOLD: u32 = 19_200;
const HIGH_BAUD_CHAR_TIME_US: u64 = 750;
const HIGH_BAUD_FRAME_TIME_US: u64 = 1_750;

pub struct RtuTransport {
    device: String,
    baud_rate: u32,
    data_bits: DataBits,
    parity: Parity,
    stop_bits: StopBits,
    serial_timeout: Duration,
    idle_timeout: Duration,
    max_frame_size: usize,
    flush_after_write: bool,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    /// Millis since UNIX epoch of the last observed activity, bumped on every
    /// `send`. A delayed idle-check task reads this to decide whether the
    /// quiet period has actually elapsed, so repeated sends re-arm the timer
    /// without stacking a new sleeping task per send.
    last_activity_ms: Arc<AtomicU64>,
    /// Bumped on every idle-close so a stale delayed check (racing a new
    /// `send`) knows its generation is no longer current and does nothing.
    generation: Arc<AtomicU64>,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl RtuTransport {
    pub fn new(config: &RtuConfig) -> Self {
        Self {
            device: config.device.clone(),
            baud_rate: config.baud_rate,
            data_bits: config.data_bits,
            parity: config.parity,
            stop_bits: config.stop_bits,
            serial_timeout: config.serial_timeout,
            idle_timeout: config.idle_timeout,
            max_frame_size: config.max_frame_size,
            flush_after_write: config.flush_after_write,
            port: Arc::new(Mutex::new(None)),
            last_activity_ms: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Character time and frame time in microseconds (spec §4.3).
    fn timing_us(&self) -> (u64, u64) {
        if self.baud_rate >= HIGH_BAUD_THRESHOLD {
            (HIGH_BAUD_CHAR_TIME_US, HIGH_BAUD_FRAME_TIME_US)
        } else {
            let baud = self.baud_rate.max(1) as u64;
            (15_000_000 / baud, 35_000_000 / baud)
        }
    }

    /// Total silence to observe after writing `request_len` bytes before a
    /// `predicted_reply_len`-byte reply can plausibly have arrived.
    fn silent_interval(&self, request_len: usize, predicted_reply_len: usize) -> Duration {
        let (char_time_us, frame_time_us) = self.timing_us();
        let total_us =
            char_time_us * (request_len + predicted_reply_len) as u64 + frame_time_us;
        Duration::from_micros(total_us)
    }

    async fn ensure_open<'a>(
        &self,
        guard: &mut tokio::sync::MutexGuard<'a, Option<Box<dyn SerialPort>>>,
    ) -> Result<(), TransportError> {
        if guard.is_none() {
            debug!(device = %self.device, baud = self.baud_rate, "opening serial port");
            let port = serialport::new(&self.device, self.baud_rate)
                .data_bits(self.data_bits.into())
                .parity(self.parity.into())
                .stop_bits(self.stop_bits.into())
                .timeout(self.serial_timeout)
                .open()?;
            **guard = Some(port);
            self.arm_idle_close();
        }
        Ok(())
    }

    fn touch_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::SeqCst);
    }

    /// Arms a single delayed check for the idle-close timeout. Each call
    /// bumps `generation`; the spawned check only acts if its captured
    /// generation is still current, which is how re-arming on repeated
    /// activity avoids stacking up timers (spec §4.3: "re-armed, not
    /// stacked").
    fn arm_idle_close(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(Self::idle_close_task(
            self.idle_timeout,
            self.last_activity_ms.clone(),
            self.generation.clone(),
            self.port.clone(),
            generation,
        ));
    }

    async fn idle_close_task(
        idle_timeout: Duration,
        last_activity_ms: Arc<AtomicU64>,
        generation_flag: Arc<AtomicU64>,
        port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
        my_generation: u64,
    ) {
        tokio::time::sleep(idle_timeout).await;
        if generation_flag.load(Ordering::SeqCst) != my_generation {
            return;
        }
        let elapsed = now_ms().saturating_sub(last_activity_ms.load(Ordering::SeqCst));
        if elapsed >= idle_timeout.as_millis() as u64 {
            let mut guard = port.lock().await;
            if guard.take().is_some() {
                debug!("serial port idle, closed");
            }
        }
    }

    async fn read_reply(
        &self,
        port: &mut dyn SerialPort,
        request_fc: u8,
        predicted_reply_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; self.max_frame_size];
        let mut read_total = 0usize;

        while read_total < RTU_MIN_SIZE {
            let n = port.read(&mut buf[read_total..])?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        if read_total < RTU_MIN_SIZE {
            return Err(TransportError::NoResponse {
                attempts: 1,
                elapsed: self.serial_timeout,
            });
        }

        let fc_byte = buf[1];
        if fc_byte == request_fc {
            if (modbus::RTU_MIN_SIZE + 1..=self.max_frame_size).contains(&predicted_reply_len)
                && predicted_reply_len > read_total
            {
                while read_total < predicted_reply_len {
                    let n = port.read(&mut buf[read_total..predicted_reply_len])?;
                    if n == 0 {
                        break;
                    }
                    read_total += n;
                }
            }
        } else if fc_byte & modbus::EXCEPTION_FLAG != 0 {
            while read_total < modbus::RTU_EXCEPTION_SIZE {
                let n = port.read(&mut buf[read_total..modbus::RTU_EXCEPTION_SIZE])?;
                if n == 0 {
                    break;
                }
                read_total += n;
            }
        }

        buf.truncate(read_total);
        Ok(buf)
    }
}

#[async_trait]
impl SerialTransport for RtuTransport {
    async fn send(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        if request.len() < RTU_MIN_SIZE {
            warn!(len = request.len(), "request frame below minimum RTU size");
        }

        let mut guard = self.port.lock().await;
        self.ensure_open(&mut guard).await?;
        self.touch_activity();

        let request_fc = request.get(1).copied().unwrap_or(0);
        let predicted_reply_len =
            modbus::predicted_reply_len(request).unwrap_or(RTU_MIN_SIZE);

        let reply = {
            let port = guard.as_mut().expect("port just opened");
            port.write_all(request)?;
            if self.flush_after_write {
                port.flush()?;
            }

            tokio::time::sleep(self.silent_interval(request.len(), predicted_reply_len)).await;

            self.read_reply(port.as_mut(), request_fc, predicted_reply_len)
                .await?
        };

        self.touch_activity();
        self.arm_idle_close();

        Ok(reply)
    }
}
