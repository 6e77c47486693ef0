// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GQSPI register map and typed views of the registers we touch.
//!
//! Offsets are relative to the GQSPI block, which sits `GQSPI_OFFSET` bytes
//! into the QSPI controller's address range. The DMA destination registers
//! live in the same window.

use bitfield::bitfield;
use drv_zynqmp_qspi_api::ReadMode;
use vcell::VolatileCell;

/// Offset of the generic QSPI register block from the controller base.
pub const GQSPI_OFFSET: usize = 0x100;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reg {
    Cfg = 0x00,
    Isr = 0x04,
    Ier = 0x08,
    Idr = 0x0C,
    Imr = 0x10,
    En = 0x14,
    Txd = 0x1C,
    Rxd = 0x20,
    TxThreshold = 0x28,
    RxThreshold = 0x2C,
    Gpio = 0x30,
    LpbkDlyAdj = 0x38,
    GenFifo = 0x40,
    Sel = 0x44,
    FifoCtrl = 0x4C,
    GfThreshold = 0x50,
    PollCfg = 0x54,
    PollTimeout = 0x58,
    XferSts = 0x5C,
    DataDlyAdj = 0xF8,
    ModId = 0xFC,
    DmaDstAddr = 0x700,
    DmaDstSize = 0x704,
    DmaDstSts = 0x708,
    DmaDstCtrl = 0x70C,
    DmaDstIntSts = 0x714,
    DmaDstIntEn = 0x718,
    DmaDstIntDis = 0x71C,
    DmaDstIntMask = 0x720,
    DmaDstCtrl2 = 0x724,
    DmaDstAddrMsb = 0x728,
}

impl Reg {
    pub const fn offset(self) -> usize {
        self as usize
    }
}

/// Word access to the controller's registers.
///
/// The driver only ever talks to hardware through this trait, which lets the
/// whole transfer engine run against a simulated register block.
pub trait RegisterIo {
    fn read(&self, reg: Reg) -> u32;
    fn write(&self, reg: Reg, value: u32);

    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let v = self.read(reg);
        self.write(reg, f(v));
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read(&self, reg: Reg) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        (**self).write(reg, value)
    }
}

/// Memory-mapped GQSPI registers.
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a mapped GQSPI register block (that is,
    /// the controller base plus `GQSPI_OFFSET`), and nothing else may be
    /// driving that block while this `Mmio` exists.
    pub unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn cell(&self, reg: Reg) -> &VolatileCell<u32> {
        // Safety: the constructor's contract makes every offset in `Reg` a
        // valid, aligned register for the lifetime of `self`.
        unsafe { &*((self.base + reg.offset()) as *const VolatileCell<u32>) }
    }
}

impl RegisterIo for Mmio {
    fn read(&self, reg: Reg) -> u32 {
        self.cell(reg).get()
    }

    fn write(&self, reg: Reg, value: u32) {
        self.cell(reg).set(value)
    }
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct Cfg(u32);
    pub u8, mode_en, set_mode_en: 31, 30;
    pub gen_fifo_start_mode, set_gen_fifo_start_mode: 29;
    pub start_gen_fifo, set_start_gen_fifo: 28;
    pub endian, set_endian: 26;
    pub en_poll_timeout, set_en_poll_timeout: 20;
    pub wp_hold, set_wp_hold: 19;
    pub u8, baud_rate_div, set_baud_rate_div: 5, 3;
    pub clk_pha, set_clk_pha: 2;
    pub clk_pol, set_clk_pol: 1;
}

const MODE_EN_IO: u8 = 0b00;
const MODE_EN_DMA: u8 = 0b10;

impl Cfg {
    pub fn read_mode(&self) -> ReadMode {
        if self.mode_en() == MODE_EN_DMA {
            ReadMode::Dma
        } else {
            ReadMode::Io
        }
    }

    pub fn set_read_mode(&mut self, mode: ReadMode) {
        self.set_mode_en(match mode {
            ReadMode::Dma => MODE_EN_DMA,
            ReadMode::Io => MODE_EN_IO,
        });
    }
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct PollCfg(u32);
    pub en_mask_upper, set_en_mask_upper: 31;
    pub en_mask_lower, set_en_mask_lower: 30;
    pub u8, mask, set_mask: 15, 8;
    pub u8, data, set_data: 7, 0;
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct LpbkDlyAdj(u32);
    pub use_lpbk, set_use_lpbk: 5;
}

bitfield! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct DataDlyAdj(u32);
    pub use_data_dly, set_use_data_dly: 31;
    pub u8, dly, set_dly: 30, 28;
}

bitflags::bitflags! {
    /// Layout shared by ISR, IER, IDR and IMR. Only `POLL_TIME_EXPIRE` is
    /// sticky (write one to clear); everything else reflects FIFO levels.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Intr: u32 {
        const POLL_TIME_EXPIRE = 1 << 1;
        const TX_NOT_FULL = 1 << 2;
        const TX_FULL = 1 << 3;
        const RX_NOT_EMPTY = 1 << 4;
        const RX_FULL = 1 << 5;
        const GENFIFO_EMPTY = 1 << 7;
        const TX_EMPTY = 1 << 8;
        const GENFIFO_NOT_FULL = 1 << 9;
        const GENFIFO_FULL = 1 << 10;
        const RX_EMPTY = 1 << 11;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct FifoCtrl: u32 {
        const RESET_GENFIFO = 1 << 0;
        const RESET_TX = 1 << 1;
        const RESET_RX = 1 << 2;
    }
}

bitflags::bitflags! {
    /// DMA destination interrupt status/enable/disable layout. Status bits
    /// are write one to clear.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct DmaIntr: u32 {
        const DONE = 1 << 1;
        const AXI_BRESP_ERR = 1 << 2;
        const TIMEOUT_STRM = 1 << 3;
        const TIMEOUT_MEM = 1 << 4;
        const THRESHOLD_HIT = 1 << 5;
        const INVALID_APB = 1 << 6;
        const FIFO_OVERFLOW = 1 << 7;

        const ERRORS = Self::AXI_BRESP_ERR.bits()
            | Self::TIMEOUT_STRM.bits()
            | Self::TIMEOUT_MEM.bits()
            | Self::THRESHOLD_HIT.bits()
            | Self::INVALID_APB.bits()
            | Self::FIFO_OVERFLOW.bits();
    }
}

bitflags::bitflags! {
    /// The pause bits of the DMA destination control register. The rest of
    /// that register is left as programmed by `DMA_DST_CTRL_RESET`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct DmaCtrl: u32 {
        const PAUSE_MEM = 1 << 0;
        const PAUSE_STRM = 1 << 1;
    }
}

pub const DMA_DST_CTRL_RESET: u32 = 0x803F_FA00;
/// Write-to-clear bits of the DMA destination status register.
pub const DMA_DST_STS_WTC: u32 = 0xE000;
pub const DMA_ADDR_MSB_MASK: u32 = 0xFFF;
/// AXI cache attributes for coherent DMA writes (DST_CTRL2 AWCACHE).
pub const DMA_DST_CTRL2_AWCACHE_COHERENT: u32 = 0b0011 << 24;

pub const SEL_GQSPI: u32 = 1;
pub const EN_ENABLE: u32 = 1;
/// Write-protect line in the GPIO register.
pub const GPIO_WP: u32 = 1;

pub const TX_THRESHOLD: u32 = 1;
pub const RX_THRESHOLD: u32 = 1;
pub const GF_THRESHOLD: u32 = 0x10;

/// Depth of the TX and RX FIFOs, in words.
pub const FIFO_DEPTH_WORDS: usize = 64;
