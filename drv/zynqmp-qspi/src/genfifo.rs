// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GENFIFO command construction.
//!
//! Every bus operation is queued as one or more 32-bit GENFIFO entries. Data
//! lengths up to 255 bytes fit in the 8-bit immediate field. Anything longer
//! is split into power-of-two chunks, each queued as an "exponent" entry
//! whose immediate field holds the exponent, followed by one immediate entry
//! for whatever is left below 256.

use bitfield::bitfield;
use drv_zynqmp_qspi_api::{BusSelect, BusWidth, FlashSelect, MsgFlags, ReadMode};

use crate::Qspi;
use crate::msg::Msg;
use crate::platform::Platform;
use crate::regs::{FIFO_DEPTH_WORDS, Reg, RegisterIo};
use crate::trace::{Trace, trace};

bitfield! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct GenFifoEntry(u32);
    pub u8, imm_data, set_imm_data: 7, 0;
    pub data_xfer, set_data_xfer: 8;
    pub exponent, set_exponent: 9;
    pub u8, mode, set_mode: 11, 10;
    pub cs_lower, set_cs_lower: 12;
    pub cs_upper, set_cs_upper: 13;
    pub bus_lower, set_bus_lower: 14;
    pub bus_upper, set_bus_upper: 15;
    pub tx, set_tx: 16;
    pub rx, set_rx: 17;
    pub stripe, set_stripe: 18;
    pub poll, set_poll: 19;
}

/// Clock cycles between chip select assertion and the first data clock.
pub const CS_SETUP_CYCLES: u8 = 0x05;
/// Clock cycles chip select is held after the last data clock.
pub const CS_HOLD_CYCLES: u8 = 0x04;

/// Messages shorter than this are never received by DMA.
pub const SMALL_TRANSFER: u32 = 8;

const MODE_SPI: u8 = 0b01;
const MODE_DUAL_SPI: u8 = 0b10;
const MODE_QUAD_SPI: u8 = 0b11;

fn spi_mode(width: BusWidth) -> u8 {
    match width {
        BusWidth::Single => MODE_SPI,
        BusWidth::Dual => MODE_DUAL_SPI,
        BusWidth::Quad => MODE_QUAD_SPI,
    }
}

impl GenFifoEntry {
    fn selecting(flash: FlashSelect, bus: BusSelect) -> Self {
        let mut e = Self(0);
        e.set_cs_lower(matches!(flash, FlashSelect::Lower | FlashSelect::Both));
        e.set_cs_upper(matches!(flash, FlashSelect::Upper | FlashSelect::Both));
        e.set_bus_lower(matches!(bus, BusSelect::Lower | BusSelect::Both));
        e.set_bus_upper(matches!(bus, BusSelect::Upper | BusSelect::Both));
        e
    }

    /// Asserts chip select on `flash`.
    pub fn chip_select(flash: FlashSelect, bus: BusSelect) -> Self {
        let mut e = Self::selecting(flash, bus);
        e.set_mode(MODE_SPI);
        e.set_imm_data(CS_SETUP_CYCLES);
        e
    }

    /// Releases every chip select on `bus`.
    pub fn chip_deselect(bus: BusSelect) -> Self {
        let mut e = Self::chip_select(FlashSelect::Lower, bus);
        e.set_cs_lower(false);
        e.set_imm_data(CS_HOLD_CYCLES);
        e
    }

    /// Base for a data transfer; direction and length are filled in later.
    pub fn data(width: BusWidth, flash: FlashSelect, bus: BusSelect) -> Self {
        let mut e = Self::selecting(flash, bus);
        e.set_mode(spi_mode(width));
        e.set_data_xfer(true);
        e
    }

    /// Sends `byte` from the immediate field instead of the TX FIFO.
    pub fn immediate_tx(flash: FlashSelect, bus: BusSelect, byte: u8) -> Self {
        let mut e = Self::selecting(flash, bus);
        e.set_mode(MODE_SPI);
        e.set_tx(true);
        e.set_imm_data(byte);
        e
    }

    pub fn with_length(mut self, field: LengthField) -> Self {
        match field {
            LengthField::Immediate(n) => {
                self.set_exponent(false);
                self.set_imm_data(n);
            }
            LengthField::Exponent(e) => {
                self.set_exponent(true);
                self.set_imm_data(e);
            }
        }
        self
    }

    /// Number of bytes (or clock cycles, for entries moving no data) this
    /// entry accounts for.
    pub fn length(&self) -> u64 {
        if self.exponent() {
            1 << self.imm_data()
        } else {
            u64::from(self.imm_data())
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LengthField {
    Immediate(u8),
    Exponent(u8),
}

/// Splits `count` into GENFIFO length fields: exponents in ascending order,
/// then the immediate remainder if there is one.
pub fn length_fields(count: u32) -> LengthFields {
    LengthFields {
        count,
        exponent: if count <= 0xFF { u32::BITS as u8 } else { 8 },
        done: false,
    }
}

pub struct LengthFields {
    count: u32,
    exponent: u8,
    done: bool,
}

impl Iterator for LengthFields {
    type Item = LengthField;

    fn next(&mut self) -> Option<LengthField> {
        while u32::from(self.exponent) < u32::BITS {
            let e = self.exponent;
            self.exponent += 1;
            if self.count & (1 << e) != 0 {
                return Some(LengthField::Exponent(e));
            }
        }
        if self.done {
            return None;
        }
        self.done = true;
        let rem = (self.count & 0xFF) as u8;
        if self.count <= 0xFF || rem != 0 {
            Some(LengthField::Immediate(rem))
        } else {
            None
        }
    }
}

impl<R: RegisterIo, P: Platform> Qspi<R, P> {
    pub(crate) fn push_entry(&mut self, entry: GenFifoEntry) {
        self.regs.write(Reg::GenFifo, entry.0);
        self.xfer.genfifo_entries += 1;
    }

    pub(crate) fn cs_assert(&mut self) {
        self.push_entry(GenFifoEntry::chip_select(self.flash, self.bus));
        trace!(self.trace, Trace::CsAssert);
    }

    pub(crate) fn cs_deassert(&mut self) {
        self.push_entry(GenFifoEntry::chip_deselect(self.bus));
        trace!(self.trace, Trace::CsDeassert);
    }

    /// Queues the current segment of `msg` (all of it, unless a DMA receive
    /// left an unaligned tail) and primes the TX FIFO or DMA engine for it.
    pub(crate) fn push_message(&mut self, index: usize, msg: &mut Msg<'_>) {
        let mut entry = GenFifoEntry::data(msg.bus_width, self.flash, self.bus);
        entry.set_stripe(msg.flags.contains(MsgFlags::STRIPE));

        if self.xfer.seg_len < SMALL_TRANSFER && self.read_mode == ReadMode::Dma
        {
            self.switch_read_mode(ReadMode::Io);
            self.unaligned = true;
            trace!(self.trace, Trace::IoFallback { len: self.xfer.seg_len });
        }

        self.setup_tx_rx(msg, &mut entry);
        trace!(
            self.trace,
            Trace::Submit {
                index,
                len: self.xfer.seg_len
            }
        );

        for field in length_fields(self.xfer.seg_len) {
            self.push_entry(entry.with_length(field));
        }

        // An IO-mode receive needs a trailing empty entry so that the last
        // partial word is pushed out of the RX shifter.
        if self.read_mode == ReadMode::Io && msg.is_rx() {
            self.push_entry(GenFifoEntry(0));
        }
    }

    fn setup_tx_rx(&mut self, msg: &mut Msg<'_>, entry: &mut GenFifoEntry) {
        self.xfer.tx_bytes = 0;
        self.xfer.rx_bytes = 0;
        self.xfer.tx_pos = self.xfer.seg_offset;
        self.xfer.rx_pos = self.xfer.seg_offset;
        entry.set_tx(msg.is_tx());
        entry.set_rx(msg.is_rx());

        if msg.is_rx() {
            self.xfer.rx_bytes = self.xfer.seg_len as i32;
            if self.read_mode == ReadMode::Dma {
                // May trim the segment to a word multiple.
                self.setup_rx_dma(msg);
            }
        }
        if msg.is_tx() {
            self.xfer.tx_bytes = self.xfer.seg_len as i32;
            self.fill_tx_fifo(msg, FIFO_DEPTH_WORDS);
        }
    }
}
