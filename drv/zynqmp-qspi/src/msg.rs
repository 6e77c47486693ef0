// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transfer descriptors.

use drv_zynqmp_qspi_api::{
    BusSelect, BusWidth, DMA_BYTES_MAX, MsgFlags, QspiError, ReadMode,
};

/// Where received bytes go.
pub(crate) enum RxTarget<'a> {
    None,
    Local(&'a mut [u8]),
    /// A bus address the DMA engine can reach but the CPU may not, such as
    /// memory above 4 GiB.
    Remote(u64),
}

/// Parameters for a hardware status poll (see `Msg::poll`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PollConfig {
    /// Opcode that reads the status register.
    pub status_cmd: u8,
    /// Value to wait for, compared under `mask`.
    pub data: u8,
    pub mask: u8,
    /// Which bus(es) the comparison applies to.
    pub bus: BusSelect,
    /// Poll timeout register value, in controller clocks.
    pub timeout: u32,
}

/// One bus operation within a chip-select bracket.
pub struct Msg<'a> {
    pub(crate) tx: Option<&'a [u8]>,
    pub(crate) rx: RxTarget<'a>,
    pub(crate) byte_count: u32,
    pub(crate) bus_width: BusWidth,
    pub(crate) flags: MsgFlags,
    pub(crate) poll: Option<PollConfig>,
}

impl<'a> Msg<'a> {
    fn new(byte_count: usize, flags: MsgFlags) -> Self {
        Self {
            tx: None,
            rx: RxTarget::None,
            // Anything that doesn't fit is caught by `validate`.
            byte_count: u32::try_from(byte_count).unwrap_or(u32::MAX),
            bus_width: BusWidth::Single,
            flags,
            poll: None,
        }
    }

    /// Sends all of `data`; anything clocked back is discarded.
    pub fn tx(data: &'a [u8]) -> Self {
        Self {
            tx: Some(data),
            ..Self::new(data.len(), MsgFlags::TX)
        }
    }

    /// Fills `buf` with received bytes.
    pub fn rx(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        Self {
            rx: RxTarget::Local(buf),
            ..Self::new(len, MsgFlags::RX)
        }
    }

    /// Full duplex: sends `tx` while receiving into `rx`. The two must be the
    /// same length.
    pub fn tx_rx(tx: &'a [u8], rx: &'a mut [u8]) -> Self {
        Self {
            tx: Some(tx),
            rx: RxTarget::Local(rx),
            ..Self::new(tx.len(), MsgFlags::TX | MsgFlags::RX)
        }
    }

    /// Clocks the bus for `cycles` without moving data, e.g. the dummy
    /// cycles of a fast read.
    pub fn dummy(cycles: u32) -> Self {
        Self::new(cycles as usize, MsgFlags::empty())
    }

    /// Receives `len` bytes by DMA straight to the 64-bit bus address `addr`.
    pub fn rx_remote(addr: u64, len: u32) -> Self {
        Self {
            rx: RxTarget::Remote(addr),
            ..Self::new(len as usize, MsgFlags::RX)
        }
    }

    /// Has the controller poll a status register until it matches; only
    /// valid as the sole message of an interrupt transfer.
    pub fn poll(cfg: PollConfig) -> Self {
        Self {
            poll: Some(cfg),
            ..Self::new(1, MsgFlags::POLL)
        }
    }

    pub fn with_bus_width(mut self, width: BusWidth) -> Self {
        self.bus_width = width;
        self
    }

    /// Splits the data across both buses (parallel topology).
    pub fn striped(mut self) -> Self {
        self.flags |= MsgFlags::STRIPE;
        self
    }

    pub fn byte_count(&self) -> u32 {
        self.byte_count
    }

    pub fn flags(&self) -> MsgFlags {
        self.flags
    }

    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    pub(crate) fn is_tx(&self) -> bool {
        self.flags.contains(MsgFlags::TX)
    }

    pub(crate) fn is_rx(&self) -> bool {
        self.flags.contains(MsgFlags::RX)
    }

    pub(crate) fn is_remote(&self) -> bool {
        matches!(self.rx, RxTarget::Remote(_))
    }

    pub(crate) fn tx_data(&self) -> &[u8] {
        self.tx.unwrap_or(&[])
    }

    pub(crate) fn rx_buf(&mut self) -> &mut [u8] {
        match &mut self.rx {
            RxTarget::Local(buf) => &mut buf[..],
            _ => &mut [],
        }
    }

    /// Bus address of byte `offset` of the receive target.
    pub(crate) fn rx_addr(&mut self, offset: usize) -> u64 {
        match &mut self.rx {
            RxTarget::Local(buf) => {
                buf.as_mut_ptr() as usize as u64 + offset as u64
            }
            RxTarget::Remote(addr) => *addr + offset as u64,
            RxTarget::None => 0,
        }
    }

    fn check(&self, mode: ReadMode) -> Result<(), QspiError> {
        let n = self.byte_count;
        if n == 0 {
            return Err(QspiError::BadMessage);
        }
        if self.is_rx() && n > DMA_BYTES_MAX {
            return Err(QspiError::InvalidLength);
        }
        let n = n as usize;
        if self.tx.is_some_and(|tx| tx.len() < n) {
            return Err(QspiError::BadMessage);
        }
        match &self.rx {
            RxTarget::Local(buf) if buf.len() < n => {
                return Err(QspiError::BadMessage);
            }
            RxTarget::Remote(_) => {
                if mode != ReadMode::Dma || n < 8 || n % 4 != 0 {
                    return Err(QspiError::UnalignedRemoteRead);
                }
            }
            _ => (),
        }
        Ok(())
    }
}

/// Checks a whole batch up front so that a bad message late in the list
/// can't leave the controller half way through a transfer.
pub(crate) fn validate(
    msgs: &[Msg<'_>],
    mode: ReadMode,
) -> Result<(), QspiError> {
    if msgs.is_empty() {
        return Err(QspiError::BadMessage);
    }
    // Length problems take priority so that an oversized receive is always
    // reported as such.
    if msgs.iter().any(|m| m.is_rx() && m.byte_count > DMA_BYTES_MAX) {
        return Err(QspiError::InvalidLength);
    }
    msgs.iter().try_for_each(|m| m.check(mode))
}
