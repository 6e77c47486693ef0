// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SPI NOR commands on top of the transfer engine.
//!
//! Every command is a single polled transfer: opcode and address go out in
//! one message, data follows in the next, all under one chip select.

use drv_zynqmp_qspi_api::{Command, PAGE_SIZE_BYTES, QspiError, status};

use crate::Qspi;
use crate::msg::{Msg, PollConfig};
use crate::platform::Platform;
use crate::regs::RegisterIo;

/// Dummy clocks between the address and data phases of a quad output fast
/// read.
const QUAD_READ_DUMMY_CYCLES: u32 = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashError {
    Qspi(QspiError),
    /// More data than fits in a page.
    TooLong,
    /// The part was still busy after the allowed number of status reads.
    Timeout,
}

impl From<QspiError> for FlashError {
    fn from(e: QspiError) -> Self {
        Self::Qspi(e)
    }
}

fn cmd_addr(cmd: Command, addr: u32) -> [u8; 5] {
    let a = addr.to_be_bytes();
    [u8::from(cmd), a[0], a[1], a[2], a[3]]
}

pub struct Flash<'q, R: RegisterIo, P: Platform> {
    qspi: &'q mut Qspi<R, P>,
}

impl<'q, R: RegisterIo, P: Platform> Flash<'q, R, P> {
    pub fn new(qspi: &'q mut Qspi<R, P>) -> Self {
        Self { qspi }
    }

    /// Reads the JEDEC manufacturer and device ID.
    pub fn read_id(&mut self) -> Result<[u8; 3], FlashError> {
        let mut id = [0u8; 3];
        self.qspi.polled_transfer(&mut [
            Msg::tx(&[u8::from(Command::ReadId)]),
            Msg::rx(&mut id),
        ])?;
        Ok(id)
    }

    pub fn read_status(&mut self) -> Result<u8, FlashError> {
        let mut sr = [0u8; 1];
        self.qspi.polled_transfer(&mut [
            Msg::tx(&[u8::from(Command::ReadStatusReg)]),
            Msg::rx(&mut sr),
        ])?;
        Ok(sr[0])
    }

    /// Sets the write enable latch, allowing the next program or erase to
    /// take effect.
    pub fn write_enable(&mut self) -> Result<(), FlashError> {
        let cmd = [u8::from(Command::WriteEnable)];
        self.qspi.polled_transfer(&mut [Msg::tx(&cmd)])?;
        Ok(())
    }

    /// Writes `data` into flash beginning at `addr`. Only zero bits take
    /// effect; the range should have been erased first. Writes past the end
    /// of the page wrap to its start.
    pub fn page_program(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> Result<(), FlashError> {
        if data.len() > PAGE_SIZE_BYTES {
            return Err(FlashError::TooLong);
        }
        if data.is_empty() {
            return Ok(());
        }
        let cmd = cmd_addr(Command::PageProgram, addr);
        self.qspi.polled_transfer(&mut [Msg::tx(&cmd), Msg::tx(data)])?;
        Ok(())
    }

    /// Reads `out.len()` bytes starting at `addr` on a single data line.
    pub fn read(
        &mut self,
        addr: u32,
        out: &mut [u8],
    ) -> Result<(), FlashError> {
        if out.is_empty() {
            return Ok(());
        }
        let cmd = cmd_addr(Command::Read, addr);
        self.qspi.polled_transfer(&mut [Msg::tx(&cmd), Msg::rx(out)])?;
        Ok(())
    }

    /// Like `read`, but with the data phase on as many lines as the board
    /// supports.
    pub fn fast_read_quad(
        &mut self,
        addr: u32,
        out: &mut [u8],
    ) -> Result<(), FlashError> {
        if out.is_empty() {
            return Ok(());
        }
        let cmd = cmd_addr(Command::QuadRead, addr);
        let width = self.qspi.config.bus_width;
        self.qspi.polled_transfer(&mut [
            Msg::tx(&cmd),
            Msg::dummy(QUAD_READ_DUMMY_CYCLES),
            Msg::rx(out).with_bus_width(width),
        ])?;
        Ok(())
    }

    /// Erases the 64 KiB sector containing `addr`.
    pub fn sector_erase(&mut self, addr: u32) -> Result<(), FlashError> {
        let cmd = cmd_addr(Command::SectorErase, addr);
        self.qspi.polled_transfer(&mut [Msg::tx(&cmd)])?;
        Ok(())
    }

    /// Erases the whole part. This can take minutes on large parts.
    pub fn bulk_erase(&mut self) -> Result<(), FlashError> {
        let cmd = [u8::from(Command::BulkErase)];
        self.qspi.polled_transfer(&mut [Msg::tx(&cmd)])?;
        Ok(())
    }

    /// Reads the status register until the write in progress bit clears,
    /// giving up after `max_polls` reads.
    pub fn wait_ready(&mut self, max_polls: u32) -> Result<(), FlashError> {
        for _ in 0..max_polls {
            if self.read_status()? & status::WIP == 0 {
                return Ok(());
            }
        }
        Err(FlashError::Timeout)
    }

    /// A hardware poll that completes once the write in progress bit clears,
    /// for use with `Qspi::interrupt_transfer` and `Msg::poll`.
    pub fn ready_poll_config(&self, timeout: u32) -> PollConfig {
        PollConfig {
            status_cmd: u8::from(Command::ReadStatusReg),
            data: 0,
            mask: status::WIP,
            bus: self.qspi.bus,
            timeout,
        }
    }
}
