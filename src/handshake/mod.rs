//! Shared state channel between the dispatcher and the query engine.
//!
//! The channel consists of four independently named segments with a fixed
//! little-endian layout that the engine reads and writes directly:
//!
//! | segment      | width | values                                             |
//! |--------------|-------|----------------------------------------------------|
//! | ready flag   | `u16` | 0 = waiting, 1 = signaled                          |
//! | strategy     | `u16` | 0 = undecided, 1 = redo, 2 = process, 3 = pipeline |
//! | state size   | `u64` | bytes the engine would persist at the pause point  |
//! | sequence     | `u64` | record version, odd while a write is in progress   |
//!
//! ## Protocol
//!
//! Flag, size, and strategy form one versioned record guarded by the
//! sequence segment:
//!
//! * A writer reads an even sequence `s`, stores `s + 1`, writes its fields
//!   in any order, then stores `s + 2`. A writer that finds an odd sequence
//!   backs off.
//! * A reader takes the sequence, the three fields, and the sequence again.
//!   The record is accepted only when both sequence reads are equal and
//!   even. Anything else is a write in flight and is retried on the next
//!   poll, so a partially written record is never observed.
//! * The engine is the only writer while the flag is waiting (it writes the
//!   size and sets the flag to signaled). The dispatcher is the only writer
//!   while the flag is signaled (it writes the strategy and sets the flag
//!   back to waiting). Writers therefore never overlap.
//! * Between `signal` and the matching `acknowledge` the engine stays at its
//!   pause point, polling [`HandshakeChannel::poll_decision`].
//! * `acknowledge` only answers the record version that `poll` accepted. If
//!   the record moved in between, the acknowledgement is refused.

pub mod memory;
#[cfg(unix)]
pub mod shm;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::strategy::Strategy;
use crate::{AppError, Result};

/// Consistent reads attempted by [`HandshakeChannel::snapshot`].
const SNAPSHOT_ATTEMPTS: usize = 16;

/// One of the four shared segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// 16-bit ready flag.
    Ready,
    /// 16-bit strategy selector.
    Strategy,
    /// 64-bit persisted state size.
    StateSize,
    /// 64-bit record sequence number.
    Sequence,
}

impl Field {
    /// Every field, in layout order.
    pub const ALL: [Self; 4] = [Self::Ready, Self::Strategy, Self::StateSize, Self::Sequence];

    /// Size of the field in bytes.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::Ready | Self::Strategy => 2,
            Self::StateSize | Self::Sequence => 8,
        }
    }
}

/// Ready flag values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadyFlag {
    /// No pause point pending.
    Waiting,
    /// Engine is parked at a pause point.
    Signaled,
}

impl ReadyFlag {
    /// Wire value.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Waiting => 0,
            Self::Signaled => 1,
        }
    }

    /// Decode a wire value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` for values other than 0 or 1.
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Signaled),
            other => Err(AppError::Handshake(format!("unknown ready flag {other}"))),
        }
    }
}

/// Names of the four shared segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SegmentNames {
    /// Ready flag segment.
    #[serde(default = "default_ready_name")]
    pub ready: String,
    /// Strategy selector segment.
    #[serde(default = "default_strategy_name")]
    pub strategy: String,
    /// State size segment.
    #[serde(default = "default_state_size_name")]
    pub state_size: String,
    /// Record sequence segment.
    #[serde(default = "default_sequence_name")]
    pub sequence: String,
}

fn default_ready_name() -> String {
    "/riveter_ready_flag".into()
}

fn default_strategy_name() -> String {
    "/riveter_strategy".into()
}

fn default_state_size_name() -> String {
    "/riveter_state_size".into()
}

fn default_sequence_name() -> String {
    "/riveter_sequence".into()
}

impl Default for SegmentNames {
    fn default() -> Self {
        Self {
            ready: default_ready_name(),
            strategy: default_strategy_name(),
            state_size: default_state_size_name(),
            sequence: default_sequence_name(),
        }
    }
}

impl SegmentNames {
    /// Name of the segment backing `field`.
    #[must_use]
    pub fn name(&self, field: Field) -> &str {
        match field {
            Field::Ready => &self.ready,
            Field::Strategy => &self.strategy,
            Field::StateSize => &self.state_size,
            Field::Sequence => &self.sequence,
        }
    }

    /// Check that every name is a valid, distinct shared memory object name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for a malformed or duplicated name.
    pub fn validate(&self) -> Result<()> {
        for (i, field) in Field::ALL.iter().enumerate() {
            let name = self.name(*field);
            let valid = name
                .strip_prefix('/')
                .is_some_and(|rest| !rest.is_empty() && !rest.contains(['/', '\0']));
            if !valid {
                return Err(AppError::Config(format!(
                    "segment name '{name}' must be '/' followed by a non-empty name without '/'"
                )));
            }
            if Field::ALL[i + 1..].iter().any(|other| self.name(*other) == name) {
                return Err(AppError::Config(format!(
                    "segment names must be distinct, '{name}' is used twice"
                )));
            }
        }
        Ok(())
    }
}

/// Raw byte access to the four segments.
///
/// Implementations only move bytes; protocol rules live in
/// [`HandshakeChannel`].
pub trait SharedSegments: Send + Sync {
    /// Fill `buf` (exactly `field.width()` bytes) from the segment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the segment cannot be read.
    fn read(&self, field: Field, buf: &mut [u8]) -> Result<()>;

    /// Overwrite the segment with `bytes` (exactly `field.width()` bytes).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the segment cannot be written.
    fn write(&self, field: Field, bytes: &[u8]) -> Result<()>;

    /// Release the segments. Called at most once by the channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if a segment could not be released.
    fn release(&self) -> Result<()>;
}

/// Decoded, consistent view of the record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HandshakeState {
    /// Record version the fields were read at.
    pub sequence: u64,
    /// Current ready flag.
    pub ready_flag: ReadyFlag,
    /// Last size written by the engine.
    pub state_bytes: u64,
    /// Last strategy written by the dispatcher.
    pub strategy: Option<Strategy>,
}

/// A signal accepted by `poll`, identified by its record version.
#[derive(Debug, Clone, Copy)]
struct PendingSignal {
    sequence: u64,
    size: u64,
}

/// Protocol wrapper over a [`SharedSegments`] backend.
pub struct HandshakeChannel<S: SharedSegments> {
    segments: S,
    pending: Mutex<Option<PendingSignal>>,
    generation: AtomicU64,
    released: AtomicBool,
}

impl<S: SharedSegments> HandshakeChannel<S> {
    /// Wrap a backend.
    #[must_use]
    pub fn new(segments: S) -> Self {
        Self {
            segments,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// Reset the record to the launch state (waiting, 0 bytes, undecided).
    ///
    /// A sequence left odd by an abandoned writer is closed, so the record
    /// version keeps increasing across runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if a segment write fails.
    pub fn initialize(&self) -> Result<()> {
        self.ensure_live()?;
        let current = self.read_u64(Field::Sequence)?;
        if current & 1 == 1 {
            warn!(sequence = current, "closing abandoned record write");
        }
        let open = current | 1;
        self.write_u64(Field::Sequence, open)?;
        self.write_u64(Field::StateSize, 0)?;
        self.write_u16(Field::Strategy, 0)?;
        self.write_u16(Field::Ready, ReadyFlag::Waiting.code())?;
        self.write_u64(Field::Sequence, open + 1)?;
        *self.lock_pending()? = None;
        Ok(())
    }

    /// Decode a consistent copy of the record without changing any state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` on read failure, an undecodable value,
    /// or a record that stays mid-write across every attempt.
    pub fn snapshot(&self) -> Result<HandshakeState> {
        self.ensure_live()?;
        for _ in 0..SNAPSHOT_ATTEMPTS {
            if let Some(state) = self.read_record()? {
                return Ok(state);
            }
            std::thread::yield_now();
        }
        Err(AppError::Handshake(
            "record stayed mid-write, no consistent snapshot".into(),
        ))
    }

    /// Engine side: report a pause point with `size` bytes of state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if a previous signal is still
    /// unacknowledged, the record is being written, or a write fails.
    pub fn signal(&self, size: u64) -> Result<()> {
        self.ensure_live()?;
        let Some(record) = self.read_record()? else {
            return Err(AppError::Handshake(
                "record is being written, signal again".into(),
            ));
        };
        if record.ready_flag == ReadyFlag::Signaled {
            return Err(AppError::Handshake(
                "previous pause signal has not been acknowledged".into(),
            ));
        }
        let sequence = self.write_record(|| {
            self.write_u64(Field::StateSize, size)?;
            self.write_u16(Field::Ready, ReadyFlag::Signaled.code())
        })?;
        debug!(size, sequence, "pause point signaled");
        Ok(())
    }

    /// Dispatcher side: non-blocking check for a pause signal.
    ///
    /// Returns the reported state size while a consistent record shows the
    /// flag signaled, `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` on read failure or after teardown.
    pub fn poll(&self) -> Result<Option<u64>> {
        self.ensure_live()?;
        let Some(record) = self.read_record()? else {
            debug!("record write in flight, retrying");
            return Ok(None);
        };
        if record.ready_flag != ReadyFlag::Signaled {
            return Ok(None);
        }

        let mut pending = self.lock_pending()?;
        if pending.map(|signal| signal.sequence) != Some(record.sequence) {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                generation,
                sequence = record.sequence,
                state_bytes = record.state_bytes,
                "pause signal observed"
            );
        }
        *pending = Some(PendingSignal {
            sequence: record.sequence,
            size: record.state_bytes,
        });
        Ok(Some(record.state_bytes))
    }

    /// Dispatcher side: write the decision and release the engine.
    ///
    /// Returns the generation of the acknowledged signal.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if no polled signal is pending (a
    /// second acknowledge for the same signal), the record changed since it
    /// was polled, or a write fails.
    pub fn acknowledge(&self, strategy: Strategy) -> Result<u64> {
        self.ensure_live()?;
        let mut pending = self.lock_pending()?;
        let Some(signal) = pending.take() else {
            return Err(AppError::Handshake(
                "no pending pause signal to acknowledge".into(),
            ));
        };
        match self.read_record()? {
            Some(record)
                if record.sequence == signal.sequence
                    && record.ready_flag == ReadyFlag::Signaled => {}
            current => {
                return Err(AppError::Handshake(format!(
                    "record moved from sequence {} to {:?} before acknowledge",
                    signal.sequence,
                    current.map(|record| record.sequence)
                )));
            }
        }
        let written = self.write_record(|| {
            self.write_u16(Field::Strategy, strategy.code())?;
            self.write_u16(Field::Ready, ReadyFlag::Waiting.code())
        });
        let sequence = match written {
            Ok(sequence) => sequence,
            Err(err) => {
                *pending = Some(signal);
                return Err(err);
            }
        };
        let generation = self.generation.load(Ordering::SeqCst);
        info!(
            generation,
            sequence,
            %strategy,
            state_bytes = signal.size,
            "pause signal acknowledged"
        );
        Ok(generation)
    }

    /// Engine side: the strategy written back, once the flag returned to
    /// waiting. Only meaningful after this side has called [`Self::signal`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` on read failure.
    pub fn poll_decision(&self) -> Result<Option<Strategy>> {
        self.ensure_live()?;
        match self.read_record()? {
            Some(record) if record.ready_flag == ReadyFlag::Waiting => Ok(record.strategy),
            _ => Ok(None),
        }
    }

    /// Release the segments. Repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Handshake` if the backend fails to release; the
    /// channel then allows another attempt.
    pub fn teardown(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.segments.release() {
            self.released.store(false, Ordering::SeqCst);
            return Err(err);
        }
        info!("handshake segments released");
        Ok(())
    }

    /// Number of distinct pause signals observed so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether [`Self::teardown`] has completed.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Read the record, or `None` if a write was in flight.
    fn read_record(&self) -> Result<Option<HandshakeState>> {
        let before = self.read_u64(Field::Sequence)?;
        if before & 1 == 1 {
            return Ok(None);
        }
        let ready = self.read_u16(Field::Ready)?;
        let state_bytes = self.read_u64(Field::StateSize)?;
        let strategy = self.read_u16(Field::Strategy)?;
        if self.read_u64(Field::Sequence)? != before {
            return Ok(None);
        }
        Ok(Some(HandshakeState {
            sequence: before,
            ready_flag: ReadyFlag::from_code(ready)?,
            state_bytes,
            strategy: Strategy::from_code(strategy)?,
        }))
    }

    /// Open the record, run `fields`, close it. Returns the new sequence.
    ///
    /// A failed `fields` leaves the sequence odd, so readers never accept
    /// the partial record.
    fn write_record(&self, fields: impl FnOnce() -> Result<()>) -> Result<u64> {
        let sequence = self.read_u64(Field::Sequence)?;
        if sequence & 1 == 1 {
            return Err(AppError::Handshake(format!(
                "record write already in progress at sequence {sequence}"
            )));
        }
        self.write_u64(Field::Sequence, sequence + 1)?;
        fields()?;
        self.write_u64(Field::Sequence, sequence + 2)?;
        Ok(sequence + 2)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_released() {
            Err(AppError::Handshake("channel has been torn down".into()))
        } else {
            Ok(())
        }
    }

    fn lock_pending(&self) -> Result<std::sync::MutexGuard<'_, Option<PendingSignal>>> {
        self.pending
            .lock()
            .map_err(|_| AppError::Handshake("pending signal mutex poisoned".into()))
    }

    fn read_u16(&self, field: Field) -> Result<u16> {
        let mut buf = [0_u8; 2];
        self.segments.read(field, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_u16(&self, field: Field, value: u16) -> Result<()> {
        self.segments.write(field, &value.to_le_bytes())
    }

    fn read_u64(&self, field: Field) -> Result<u64> {
        let mut buf = [0_u8; 8];
        self.segments.read(field, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u64(&self, field: Field, value: u64) -> Result<()> {
        self.segments.write(field, &value.to_le_bytes())
    }
}

pub(crate) fn check_width(field: Field, len: usize) -> Result<()> {
    if len == field.width() {
        Ok(())
    } else {
        Err(AppError::Handshake(format!(
            "{field:?} segment is {} bytes, got buffer of {len}",
            field.width()
        )))
    }
}
