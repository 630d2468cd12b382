//! POSIX shared memory backend.
//!
//! Each field lives in its own named object under the shared memory
//! namespace (`/dev/shm` on Linux). Objects are sized to exactly the field
//! width and accessed with positioned reads and writes, so no mapping is
//! needed.

use std::fs::File;
use std::os::unix::fs::FileExt;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use tracing::{debug, warn};

use super::{check_width, Field, SegmentNames, SharedSegments};
use crate::{AppError, Result};

struct Segment {
    name: String,
    file: File,
}

/// The four named shared memory segments.
pub struct ShmSegments {
    ready: Segment,
    strategy: Segment,
    state_size: Segment,
    sequence: Segment,
}

impl std::fmt::Debug for ShmSegments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegments")
            .field("ready", &self.ready.name)
            .field("strategy", &self.strategy.name)
            .field("state_size", &self.state_size.name)
            .field("sequence", &self.sequence.name)
            .finish()
    }
}

impl ShmSegments {
    /// Create the segments, or open them if the engine already created them.
    ///
    /// Segments created by this call are unlinked again if a later one fails.
    ///
    /// # Errors
    ///
    /// Returns `AppError::IpcSetup` if any segment cannot be created, opened,
    /// or sized.
    pub fn create_or_open(names: &SegmentNames) -> Result<Self> {
        let mut created: Vec<String> = Vec::new();
        let result = Self::open_all(names, true, &mut created);
        if result.is_err() {
            for name in &created {
                if let Err(err) = shm_unlink(name.as_str()) {
                    warn!(segment = %name, %err, "failed to unlink partially created segment");
                }
            }
        }
        result
    }

    /// Open segments that must already exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::IpcSetup` if any segment is missing or cannot be
    /// opened.
    pub fn open_existing(names: &SegmentNames) -> Result<Self> {
        Self::open_all(names, false, &mut Vec::new())
    }

    fn open_all(names: &SegmentNames, create: bool, created: &mut Vec<String>) -> Result<Self> {
        names.validate()?;
        Ok(Self {
            ready: open_segment(names.name(Field::Ready), Field::Ready, create, created)?,
            strategy: open_segment(names.name(Field::Strategy), Field::Strategy, create, created)?,
            state_size: open_segment(
                names.name(Field::StateSize),
                Field::StateSize,
                create,
                created,
            )?,
            sequence: open_segment(names.name(Field::Sequence), Field::Sequence, create, created)?,
        })
    }

    fn segment(&self, field: Field) -> &Segment {
        match field {
            Field::Ready => &self.ready,
            Field::Strategy => &self.strategy,
            Field::StateSize => &self.state_size,
            Field::Sequence => &self.sequence,
        }
    }
}

fn open_segment(
    name: &str,
    field: Field,
    create: bool,
    created: &mut Vec<String>,
) -> Result<Segment> {
    let mode = Mode::from_bits_truncate(0o666);
    let fd = if create {
        match shm_open(name, OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR, mode) {
            Ok(fd) => {
                created.push(name.to_owned());
                fd
            }
            Err(Errno::EEXIST) => shm_open(name, OFlag::O_RDWR, mode).map_err(|err| {
                AppError::IpcSetup(format!("failed to open segment {name}: {err}"))
            })?,
            Err(err) => {
                return Err(AppError::IpcSetup(format!(
                    "failed to create segment {name}: {err}"
                )))
            }
        }
    } else {
        shm_open(name, OFlag::O_RDWR, mode)
            .map_err(|err| AppError::IpcSetup(format!("failed to open segment {name}: {err}")))?
    };

    let file = File::from(fd);
    let width = field.width() as u64;
    let current = file
        .metadata()
        .map_err(|err| AppError::IpcSetup(format!("failed to stat segment {name}: {err}")))?
        .len();
    if current < width {
        file.set_len(width).map_err(|err| {
            AppError::IpcSetup(format!("failed to size segment {name}: {err}"))
        })?;
    }
    debug!(segment = name, width, "segment ready");

    Ok(Segment {
        name: name.to_owned(),
        file,
    })
}

impl SharedSegments for ShmSegments {
    fn read(&self, field: Field, buf: &mut [u8]) -> Result<()> {
        check_width(field, buf.len())?;
        let segment = self.segment(field);
        segment
            .file
            .read_exact_at(buf, 0)
            .map_err(|err| AppError::Handshake(format!("failed to read {}: {err}", segment.name)))
    }

    fn write(&self, field: Field, bytes: &[u8]) -> Result<()> {
        check_width(field, bytes.len())?;
        let segment = self.segment(field);
        segment
            .file
            .write_all_at(bytes, 0)
            .map_err(|err| AppError::Handshake(format!("failed to write {}: {err}", segment.name)))
    }

    fn release(&self) -> Result<()> {
        let mut first_error = None;
        for field in Field::ALL {
            let name = &self.segment(field).name;
            match shm_unlink(name.as_str()) {
                Ok(()) | Err(Errno::ENOENT) => {}
                Err(err) => {
                    warn!(segment = %name, %err, "failed to unlink segment");
                    first_error.get_or_insert_with(|| {
                        AppError::Handshake(format!("failed to unlink segment {name}: {err}"))
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
