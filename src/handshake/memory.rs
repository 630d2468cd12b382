//! In-process segment backend with the same byte layout as shared memory.
//!
//! Cloned handles share one buffer, so an engine running on another thread
//! (or a test) can drive one side of the handshake while the dispatcher
//! drives the other.

use std::sync::{Arc, Mutex};

use super::{check_width, Field, SharedSegments};
use crate::{AppError, Result};

#[derive(Debug, Default)]
struct Layout {
    ready: [u8; 2],
    strategy: [u8; 2],
    state_size: [u8; 8],
    sequence: [u8; 8],
    released: bool,
}

impl Layout {
    fn field_mut(&mut self, field: Field) -> &mut [u8] {
        match field {
            Field::Ready => &mut self.ready,
            Field::Strategy => &mut self.strategy,
            Field::StateSize => &mut self.state_size,
            Field::Sequence => &mut self.sequence,
        }
    }
}

/// Shared in-memory segments.
#[derive(Debug, Clone, Default)]
pub struct MemorySegments {
    layout: Arc<Mutex<Layout>>,
}

impl MemorySegments {
    /// Fresh zeroed segments (waiting, undecided, 0 bytes, sequence 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any handle has released the segments.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.layout.lock().map(|l| l.released).unwrap_or(true)
    }

    fn with_layout<T>(&self, f: impl FnOnce(&mut Layout) -> Result<T>) -> Result<T> {
        let mut guard = self
            .layout
            .lock()
            .map_err(|_| AppError::Handshake("memory segment mutex poisoned".into()))?;
        if guard.released {
            return Err(AppError::Handshake("memory segments released".into()));
        }
        f(&mut guard)
    }
}

impl SharedSegments for MemorySegments {
    fn read(&self, field: Field, buf: &mut [u8]) -> Result<()> {
        check_width(field, buf.len())?;
        self.with_layout(|layout| {
            buf.copy_from_slice(layout.field_mut(field));
            Ok(())
        })
    }

    fn write(&self, field: Field, bytes: &[u8]) -> Result<()> {
        check_width(field, bytes.len())?;
        self.with_layout(|layout| {
            layout.field_mut(field).copy_from_slice(bytes);
            Ok(())
        })
    }

    fn release(&self) -> Result<()> {
        let mut guard = self
            .layout
            .lock()
            .map_err(|_| AppError::Handshake("memory segment mutex poisoned".into()))?;
        guard.released = true;
        Ok(())
    }
}
