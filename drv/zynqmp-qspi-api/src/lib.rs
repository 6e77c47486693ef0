// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and constants shared by the ZynqMP GQSPI driver and its users.

#![no_std]

use num_derive::FromPrimitive;
use serde::Deserialize;

/// Size in bytes of a single page of data (i.e., the max length of slice we
/// accept for `page_program()`).
///
/// This value is really a property of the flash we're talking to and not this
/// driver, but it's correct for the parts we drive.
pub const PAGE_SIZE_BYTES: usize = 256;

/// Size in bytes of a single sector of data (i.e., the size of the data erased
/// by a call to `sector_erase()`).
pub const SECTOR_SIZE_BYTES: usize = 65_536;

/// Largest receive the DMA engine can move in one go. Receives above this are
/// rejected before anything is written to the controller.
pub const DMA_BYTES_MAX: u32 = 0x1000_0000;

/// SPI NOR opcodes issued by the flash helper layer. These are the 4-byte
/// address variants so that parts larger than 16 MiB work without mode
/// switching.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    ReadStatusReg = 0x05,
    WriteEnable = 0x06,
    PageProgram = 0x12,
    Read = 0x13,
    ReadId = 0x9F,
    BulkErase = 0xC7,
    SectorErase = 0xDC,
    // 4-BYTE QUAD OUTPUT FAST READ
    QuadRead = 0x6C,
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

/// Bits in the SPI NOR status register.
pub mod status {
    /// Write in progress.
    pub const WIP: u8 = 1 << 0;
    /// Write enable latch.
    pub const WEL: u8 = 1 << 1;
}

/// Errors returned synchronously by the driver. Apart from `DmaFault`, when
/// any of these comes back the controller has not been touched by the
/// failing call.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum QspiError {
    /// Another transfer is in flight.
    Busy = 1,

    /// A receive is larger than the DMA engine can express.
    InvalidLength = 2,

    /// Empty message list, zero byte count, or a buffer shorter than the
    /// message's byte count.
    BadMessage = 3,

    /// A receive into a 64-bit bus address needs an IO-mode tail, which it
    /// can't have since the CPU can't reach the destination.
    UnalignedRemoteRead = 4,

    /// `initialize` was called on a controller that is already up.
    AlreadyStarted = 5,

    /// The operation isn't available in the configured flash topology.
    UnsupportedTopology = 6,

    /// The controller hasn't been initialized.
    NotReady = 7,

    /// The DMA engine reported an error during a polled or non-blocking
    /// transfer. The controller has been aborted and chip select released.
    DmaFault = 8,
}

impl From<QspiError> for u32 {
    fn from(rc: QspiError) -> Self {
        rc as u32
    }
}

/// Outcome of an asynchronous (interrupt driven) transfer, handed to the
/// completion handler.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum Status {
    TransferDone = 0,
    /// The DMA engine flagged an error (AXI response, timeout, overflow).
    CommandError = 1,
    /// The status value matched during a poll-data transfer.
    PollDone = 2,
    /// The poll-data transfer ran out of time without a match.
    PollTimeout = 3,
}

/// Number of data lines used for a message.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusWidth {
    Single = 1,
    Dual = 2,
    Quad = 4,
}

/// How the attached flash parts are wired up.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// One part on the lower chip select and bus.
    Single = 0,
    /// Two parts sharing the lower bus, one per chip select.
    Stacked = 1,
    /// Two parts on separate buses, each carrying half of every byte stream.
    Parallel = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashSelect {
    Lower,
    Upper,
    Both,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusSelect {
    Lower,
    Upper,
    Both,
}

/// How received data gets from the RX FIFO to memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadMode {
    Dma,
    Io,
}

/// Divider from the controller reference clock to the SPI clock.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum Prescaler {
    Div2 = 0,
    Div4 = 1,
    Div8 = 2,
    Div16 = 3,
    Div32 = 4,
    Div64 = 5,
    Div128 = 6,
    Div256 = 7,
}

impl Prescaler {
    pub const fn divisor(self) -> u32 {
        2 << (self as u32)
    }
}

bitflags::bitflags! {
    /// Driver options, as set by `set_options` and `clear_options`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Options: u32 {
        const CLK_ACTIVE_LOW = 1 << 1;
        const CLK_PHASE_1 = 1 << 2;
        /// GENFIFO entries only run once software kicks the controller.
        const MANUAL_START = 1 << 3;
    }
}

bitflags::bitflags! {
    /// What a message does on the bus.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct MsgFlags: u32 {
        /// Split the byte stream across both buses (parallel topology).
        const STRIPE = 1 << 0;
        const RX = 1 << 1;
        const TX = 1 << 2;
        /// Hardware status polling; see `PollConfig`.
        const POLL = 1 << 3;
    }
}
