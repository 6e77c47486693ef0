// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ZynqMP GQSPI low-level driver crate.
//!
//! The controller is driven entirely through its GENFIFO: every bus
//! operation (chip select, immediate bytes, data phases, status polls) is a
//! 32-bit entry pushed into a command queue, with data flowing through the
//! TX FIFO on the way out and through either the RX FIFO (IO mode) or the
//! RX DMA engine on the way in.
//!
//! `Qspi` owns one controller. It talks to the hardware through a
//! `RegisterIo` implementation (normally `Mmio`) and to the rest of the SoC
//! through a `Platform`.

#![cfg_attr(target_os = "none", no_std)]

mod config;
mod dma;
mod fifo;
mod flash;
mod genfifo;
mod msg;
mod platform;
mod regs;
#[cfg(test)]
mod sim;
mod trace;
mod xfer;

pub use drv_zynqmp_qspi_api::*;

pub use crate::config::{Config, ZYNQMP_QSPI_BASE};
pub use crate::dma::dma_split;
pub use crate::flash::{Flash, FlashError};
pub use crate::genfifo::{GenFifoEntry, LengthField, length_fields};
pub use crate::msg::{Msg, PollConfig};
pub use crate::platform::{Coherent, Platform};
pub use crate::regs::{GQSPI_OFFSET, Mmio, Reg, RegisterIo};
pub use crate::trace::{Trace, TraceBuf, TraceEntry};
pub use crate::xfer::{DmaTransfer, InterruptTransfer, Progress, StatusHandler};

use crate::regs::{
    Cfg, DMA_DST_CTRL_RESET, DMA_DST_CTRL2_AWCACHE_COHERENT, DMA_DST_STS_WTC,
    DataDlyAdj, DmaCtrl, DmaIntr, EN_ENABLE, FifoCtrl, GF_THRESHOLD, GPIO_WP,
    Intr, LpbkDlyAdj, RX_THRESHOLD, SEL_GQSPI, TX_THRESHOLD,
};
use crate::trace::trace;

/// Bus frequencies at or below this need the RX tap delay bypassed.
const TAPDLY_BYPASS_MAX_HZ: u32 = 40_000_000;
/// Up to this frequency data delay adjustment is used as well as the
/// loopback clock.
const DATA_DLY_MAX_HZ: u32 = 100_000_000;
/// Up to this frequency the loopback clock alone is used.
const LPBK_MAX_HZ: u32 = 150_000_000;

/// LQSPI RX bit of IOU_TAPDLY_BYPASS.
const TAPDLY_BYPASS_LQSPI_RX: u32 = 1 << 2;
const DATA_DLY_ADJ_DLY: u8 = 2;

/// Bookkeeping for the message currently on the bus.
///
/// A message is normally queued in one go, but a DMA receive that isn't a
/// multiple of four bytes is queued twice: once for the aligned part and
/// once, in IO mode, for the tail. `seg_offset`/`seg_len` describe the part
/// currently queued.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct XferCounters {
    /// Bytes still to go into the TX FIFO.
    pub tx_bytes: i32,
    /// Bytes still expected from the RX FIFO or DMA engine.
    pub rx_bytes: i32,
    pub tx_pos: usize,
    pub rx_pos: usize,
    pub seg_offset: usize,
    pub seg_len: u32,
    /// Entries written to the GENFIFO for the current transfer.
    pub genfifo_entries: u32,
}

/// Driver for one GQSPI controller.
pub struct Qspi<R: RegisterIo = Mmio, P: Platform = Coherent> {
    pub(crate) regs: R,
    pub(crate) platform: P,
    pub(crate) config: Config,
    ready: bool,
    pub(crate) busy: bool,
    /// Mode the controller is in right now, which may be a temporary IO
    /// switch for a short or unaligned receive (see `unaligned`).
    pub(crate) read_mode: ReadMode,
    pub(crate) flash: FlashSelect,
    pub(crate) bus: BusSelect,
    /// Set while `read_mode` is a temporary switch from DMA to IO.
    pub(crate) unaligned: bool,
    pub(crate) manual_start: bool,
    options: Options,
    pub(crate) xfer: XferCounters,
    pub(crate) trace: TraceBuf,
}

impl<P: Platform> Qspi<Mmio, P> {
    /// Builds a driver for the controller described by `config`.
    ///
    /// # Safety
    ///
    /// `config.base_address` must be the base of a mapped QSPI controller,
    /// and nothing else may drive that controller while the returned driver
    /// exists.
    pub unsafe fn from_config(config: Config, platform: P) -> Self {
        let regs = unsafe { Mmio::new(config.base_address + GQSPI_OFFSET) };
        Self::new(regs, platform, config)
    }
}

impl<R: RegisterIo, P: Platform> Qspi<R, P> {
    /// Wraps a controller. Nothing is written until `initialize`.
    pub fn new(regs: R, platform: P, config: Config) -> Self {
        Self {
            regs,
            platform,
            config,
            ready: false,
            busy: false,
            read_mode: ReadMode::Dma,
            flash: FlashSelect::Lower,
            bus: BusSelect::Lower,
            unaligned: false,
            manual_start: true,
            options: Options::MANUAL_START,
            xfer: XferCounters::default(),
            trace: TraceBuf::new(),
        }
    }

    /// Brings the controller up in its default configuration: DMA reads,
    /// lower flash on the lower bus, manual GENFIFO start.
    pub fn initialize(&mut self) -> Result<(), QspiError> {
        if self.busy || self.ready {
            return Err(QspiError::AlreadyStarted);
        }

        self.read_mode = ReadMode::Dma;
        self.flash = FlashSelect::Lower;
        self.bus = BusSelect::Lower;
        self.unaligned = false;
        self.manual_start = true;
        self.options = Options::MANUAL_START;

        self.regs.write(Reg::Sel, SEL_GQSPI);
        self.reset();
        self.regs.write(Reg::En, EN_ENABLE);
        self.ready = true;
        trace!(self.trace, Trace::Initialized);
        Ok(())
    }

    /// Aborts anything in flight and puts the controller back in its
    /// default configuration. The prescaler and the clock polarity and phase
    /// options go back to their defaults; the read mode and `MANUAL_START`
    /// are kept.
    pub fn reset(&mut self) {
        self.abort();
        self.set_default_config();
        trace!(self.trace, Trace::Reset);
    }

    fn set_default_config(&mut self) {
        let mode = self.read_mode;
        let manual = self.manual_start;
        self.regs.modify(Reg::Cfg, |v| {
            let mut cfg = Cfg(v);
            cfg.set_read_mode(mode);
            cfg.set_gen_fifo_start_mode(manual);
            cfg.set_endian(false);
            cfg.set_en_poll_timeout(false);
            cfg.set_wp_hold(true);
            cfg.set_baud_rate_div(0);
            cfg.set_clk_pha(false);
            cfg.set_clk_pol(false);
            cfg.0
        });
        self.options.remove(Options::CLK_ACTIVE_LOW | Options::CLK_PHASE_1);

        self.regs.modify(Reg::LpbkDlyAdj, |v| {
            let mut lpbk = LpbkDlyAdj(v);
            lpbk.set_use_lpbk(true);
            lpbk.0
        });

        self.regs.write(Reg::TxThreshold, TX_THRESHOLD);
        self.regs.write(Reg::RxThreshold, RX_THRESHOLD);
        self.regs.write(Reg::GfThreshold, GF_THRESHOLD);

        if self.read_mode == ReadMode::Dma {
            self.regs.write(Reg::DmaDstCtrl, DMA_DST_CTRL_RESET);
        }
        if self.config.is_cache_coherent {
            self.regs.modify(Reg::DmaDstCtrl2, |v| {
                v | DMA_DST_CTRL2_AWCACHE_COHERENT
            });
        }
    }

    /// Stops whatever the controller is doing and flushes all its queues.
    /// Safe to call at any time; in-flight transfer handles call it when
    /// dropped early.
    pub fn abort(&mut self) {
        trace!(
            self.trace,
            Trace::Abort {
                tx_bytes: self.xfer.tx_bytes,
                rx_bytes: self.xfer.rx_bytes,
            }
        );

        self.regs.write(Reg::Isr, Intr::POLL_TIME_EXPIRE.bits());
        let dma = self.regs.read(Reg::DmaDstIntSts);
        self.regs.write(Reg::DmaDstIntSts, dma);
        self.regs.modify(Reg::DmaDstSts, |v| v | DMA_DST_STS_WTC);
        self.disable_interrupts();

        self.regs.write(
            Reg::FifoCtrl,
            (FifoCtrl::RESET_GENFIFO | FifoCtrl::RESET_TX).bits(),
        );
        // The RX FIFO can only be reset in IO mode.
        self.write_cfg_mode(ReadMode::Io);
        self.regs.write(Reg::FifoCtrl, FifoCtrl::RESET_RX.bits());

        if self.unaligned {
            self.unaligned = false;
            self.read_mode = ReadMode::Dma;
        }
        let mode = self.read_mode;
        self.regs.modify(Reg::Cfg, |v| {
            let mut cfg = Cfg(v);
            cfg.set_read_mode(mode);
            cfg.set_en_poll_timeout(false);
            cfg.0
        });

        self.xfer = XferCounters::default();
        if self.busy {
            self.busy = false;
            self.platform.ref_clock_disable();
        }
    }

    pub(crate) fn disable_interrupts(&mut self) {
        self.regs.write(Reg::Idr, Intr::all().bits());
        self.regs.write(Reg::DmaDstIntDis, DmaIntr::all().bits());
    }

    pub(crate) fn status(&self) -> Intr {
        Intr::from_bits_truncate(self.regs.read(Reg::Isr))
    }

    /// Changes the read mode both here and in the controller.
    pub(crate) fn switch_read_mode(&mut self, mode: ReadMode) {
        self.read_mode = mode;
        self.write_cfg_mode(mode);
        trace!(self.trace, Trace::ReadMode(mode));
    }

    fn write_cfg_mode(&mut self, mode: ReadMode) {
        self.regs.modify(Reg::Cfg, |v| {
            let mut cfg = Cfg(v);
            cfg.set_read_mode(mode);
            cfg.0
        });
    }

    /// The read mode as the user configured it, ignoring any temporary IO
    /// switch.
    pub(crate) fn configured_read_mode(&self) -> ReadMode {
        if self.unaligned {
            ReadMode::Dma
        } else {
            self.read_mode
        }
    }

    fn check_not_busy(&mut self) -> Result<(), QspiError> {
        if self.busy {
            trace!(self.trace, Trace::Rejected(QspiError::Busy));
            Err(QspiError::Busy)
        } else {
            Ok(())
        }
    }

    /// Turns on the given options.
    pub fn set_options(&mut self, options: Options) -> Result<(), QspiError> {
        self.check_not_busy()?;
        self.options.insert(options);
        self.apply_options();
        Ok(())
    }

    /// Turns off the given options.
    pub fn clear_options(&mut self, options: Options) -> Result<(), QspiError> {
        self.check_not_busy()?;
        self.options.remove(options);
        self.apply_options();
        Ok(())
    }

    fn apply_options(&mut self) {
        let opts = self.options;
        self.manual_start = opts.contains(Options::MANUAL_START);
        self.regs.modify(Reg::Cfg, |v| {
            let mut cfg = Cfg(v);
            cfg.set_clk_pol(opts.contains(Options::CLK_ACTIVE_LOW));
            cfg.set_clk_pha(opts.contains(Options::CLK_PHASE_1));
            cfg.set_gen_fifo_start_mode(opts.contains(Options::MANUAL_START));
            cfg.0
        });
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Sets the SPI clock divider and the RX tap delays that go with the
    /// resulting bus frequency.
    pub fn set_clk_prescaler(
        &mut self,
        prescaler: Prescaler,
    ) -> Result<(), QspiError> {
        self.check_not_busy()?;
        self.regs.modify(Reg::Cfg, |v| {
            let mut cfg = Cfg(v);
            cfg.set_baud_rate_div(prescaler as u8);
            cfg.0
        });
        self.set_tap_delay(self.config.bus_hz(prescaler.divisor()));
        trace!(self.trace, Trace::Prescaler(prescaler));
        Ok(())
    }

    fn set_tap_delay(&mut self, bus_hz: u32) {
        let mut bypass = 0;
        let mut lpbk = LpbkDlyAdj(0);
        let mut data = DataDlyAdj(0);

        if bus_hz <= TAPDLY_BYPASS_MAX_HZ {
            bypass = TAPDLY_BYPASS_LQSPI_RX;
        } else if bus_hz <= DATA_DLY_MAX_HZ {
            bypass = TAPDLY_BYPASS_LQSPI_RX;
            lpbk.set_use_lpbk(true);
            data.set_use_data_dly(true);
            data.set_dly(DATA_DLY_ADJ_DLY);
        } else if bus_hz <= LPBK_MAX_HZ {
            lpbk.set_use_lpbk(true);
        }

        self.platform.set_tap_delay_bypass(bypass);
        self.regs.write(Reg::LpbkDlyAdj, lpbk.0);
        self.regs.write(Reg::DataDlyAdj, data.0);
    }

    /// Chooses how received data is moved to memory.
    pub fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), QspiError> {
        self.check_not_busy()?;
        self.unaligned = false;
        self.switch_read_mode(mode);
        Ok(())
    }

    /// Chooses the chip select(s) and bus(es) used by later transfers.
    pub fn select_flash(
        &mut self,
        flash: FlashSelect,
        bus: BusSelect,
    ) -> Result<(), QspiError> {
        self.check_not_busy()?;
        self.flash = flash;
        self.bus = bus;
        trace!(self.trace, Trace::Select(flash));
        Ok(())
    }

    /// Drives the WP line. Only meaningful with a single flash part.
    pub fn write_protect_toggle(
        &mut self,
        enable: bool,
    ) -> Result<(), QspiError> {
        if self.config.connection_mode != ConnectionMode::Single {
            trace!(self.trace, Trace::Rejected(QspiError::UnsupportedTopology));
            return Err(QspiError::UnsupportedTopology);
        }
        self.regs.write(Reg::Gpio, if enable { GPIO_WP } else { 0 });
        Ok(())
    }

    /// Pauses the DMA engine and gates the reference clock, for when the
    /// controller won't be used for a while.
    pub fn idle(&mut self) {
        if self.regs.read(Reg::En) != 0 {
            self.regs.modify(Reg::DmaDstCtrl, |v| {
                v | (DmaCtrl::PAUSE_MEM | DmaCtrl::PAUSE_STRM).bits()
            });
            self.platform.ref_clock_disable();
            trace!(self.trace, Trace::Idle);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn read_mode(&self) -> ReadMode {
        self.configured_read_mode()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn trace(&self) -> &TraceBuf {
        &self.trace
    }
}
