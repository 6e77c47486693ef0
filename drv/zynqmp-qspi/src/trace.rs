// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory trace of driver events.
//!
//! The driver never prints. Instead each instance keeps a small ring of the
//! most recent events, tagged with the source line that recorded them, that
//! can be inspected from a debugger or dumped by the owning task. Repeats of
//! the same event from the same line bump a count rather than evicting
//! history, so a spinning status loop doesn't wipe out what came before it.

use drv_zynqmp_qspi_api::{FlashSelect, Prescaler, QspiError, ReadMode, Status};
use heapless::Deque;

pub const TRACE_DEPTH: usize = 32;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    Initialized,
    Reset,
    Abort { tx_bytes: i32, rx_bytes: i32 },
    Rejected(QspiError),
    ReadMode(ReadMode),
    Prescaler(Prescaler),
    Select(FlashSelect),
    CsAssert,
    CsDeassert,
    Submit { index: usize, len: u32 },
    IoFallback { len: u32 },
    DmaSetup { addr: u64, len: u32 },
    DmaDone,
    DmaTail { offset: usize, len: u32 },
    DmaError(u32),
    PollConfigured { cmd: u8, timeout: u32 },
    Reported(Status),
    Idle,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TraceEntry {
    pub line: u16,
    pub count: u32,
    pub payload: Trace,
}

pub struct TraceBuf {
    entries: Deque<TraceEntry, TRACE_DEPTH>,
}

impl TraceBuf {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    pub fn entry(&mut self, line: u16, payload: Trace) {
        if let Some(last) = self.entries.back_mut() {
            if last.line == line && last.payload == payload {
                if let Some(count) = last.count.checked_add(1) {
                    last.count = count;
                    return;
                }
            }
        }

        if self.entries.is_full() {
            self.entries.pop_front();
        }
        // Can't fail, we just made room.
        let _ = self.entries.push_back(TraceEntry {
            line,
            count: 1,
            payload,
        });
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&Trace> {
        self.entries.back().map(|e| &e.payload)
    }

    pub fn contains(&self, payload: &Trace) -> bool {
        self.iter().any(|e| &e.payload == payload)
    }
}

/// Records `$payload` in the driver's trace ring along with the current line.
macro_rules! trace {
    ($buf:expr, $payload:expr) => {
        $buf.entry(line!() as u16, $payload)
    };
}
pub(crate) use trace;
