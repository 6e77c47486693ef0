// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A register-level model of the GQSPI controller with one SPI NOR part
//! attached, for host tests.
//!
//! The model advances whenever the driver reads a register, running the
//! GENFIFO until it either drains or stalls (on an empty TX FIFO, a full RX
//! FIFO, a stalled DMA engine or a manual start that hasn't been given).
//! Everything happens in zero time, so interrupt-driven tests just call the
//! handler in a loop.
//!
//! Host pointers are wider than the 44-bit DMA address registers, so the
//! driver reports each local DMA destination through `expose_dma_target`
//! and the model writes through that pointer. A DMA destination that wasn't
//! reported (a remote bus address) is never dereferenced.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use drv_zynqmp_qspi_api::{ReadMode, status};

use crate::genfifo::GenFifoEntry;
use crate::platform::Platform;
use crate::regs::{
    Cfg, DMA_ADDR_MSB_MASK, DMA_DST_STS_WTC, DmaIntr, FIFO_DEPTH_WORDS,
    FifoCtrl, Intr, PollCfg, Reg, RegisterIo,
};

/// Register reads after which a test is assumed to be spinning forever.
const READ_LIMIT: usize = 1_000_000;
/// Cap on poll iterations, whatever the timeout register says.
const POLL_LIMIT: u32 = 10_000;
const GENFIFO_DEPTH: usize = 32;

/// The bits of a DMA destination that survive the address registers.
const DMA_BUS_MASK: u64 =
    ((DMA_ADDR_MSB_MASK as u64) << 32) | u32::MAX as u64;

thread_local! {
    static DMA_TARGET: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Records the full host address of the next DMA destination. Called by
/// the driver just before it programs the DMA address registers.
pub fn expose_dma_target(addr: u64) {
    DMA_TARGET.with(|t| t.set(Some(addr)));
}

pub const FLASH_SIZE: usize = 0x4_0000;
pub const FLASH_ID: [u8; 3] = [0x20, 0xBA, 0x21];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusEvent {
    CsAssert,
    CsDeassert,
    Immediate(u8),
    Data { tx: bool, rx: bool, len: u64 },
    Poll,
}

/// A SPI NOR part speaking the 4-byte address command set.
pub struct SpiNor {
    pub mem: Vec<u8>,
    pub id: [u8; 3],
    pub status: u8,
    /// Status reads left before a program or erase finishes.
    pub busy_polls: u32,
    selected: bool,
    shifted: Vec<u8>,
}

impl SpiNor {
    fn new() -> Self {
        Self {
            mem: vec![0xFF; FLASH_SIZE],
            id: FLASH_ID,
            status: 0,
            busy_polls: 0,
            selected: false,
            shifted: Vec::new(),
        }
    }

    fn select(&mut self) {
        self.selected = true;
        self.shifted.clear();
    }

    fn addr(&self) -> usize {
        let a = &self.shifted[1..5];
        u32::from_be_bytes([a[0], a[1], a[2], a[3]]) as usize
    }

    fn writable(&self) -> bool {
        self.status & status::WEL != 0 && self.status & status::WIP == 0
    }

    fn exchange(&mut self, tx: u8) -> u8 {
        if !self.selected {
            return 0xFF;
        }
        let index = self.shifted.len();
        self.shifted.push(tx);
        if index == 0 {
            return 0xFF;
        }

        match self.shifted[0] {
            0x9F => self.id.get(index - 1).copied().unwrap_or(0),
            0x05 => {
                let s = self.status;
                self.tick();
                s
            }
            0x13 | 0x6C if index >= 5 => {
                let a = self.addr() + index - 5;
                self.mem[a % FLASH_SIZE]
            }
            0x12 if index >= 5 => {
                if self.writable() {
                    let addr = self.addr();
                    let a = (addr & !0xFF) | ((addr + index - 5) & 0xFF);
                    self.mem[a % FLASH_SIZE] &= tx;
                }
                0xFF
            }
            _ => 0xFF,
        }
    }

    fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        let writable = self.writable();
        match self.shifted.first().copied() {
            Some(0x06) if self.status & status::WIP == 0 => {
                self.status |= status::WEL;
            }
            Some(0x12) if writable && self.shifted.len() > 5 => {
                self.start_busy();
            }
            Some(0xDC) if writable && self.shifted.len() >= 5 => {
                let base = self.addr() % FLASH_SIZE & !0xFFFF;
                let end = (base + 0x1_0000).min(FLASH_SIZE);
                self.mem[base..end].fill(0xFF);
                self.start_busy();
            }
            Some(0xC7) if writable => {
                self.mem.fill(0xFF);
                self.start_busy();
            }
            _ => (),
        }
        self.shifted.clear();
    }

    fn start_busy(&mut self) {
        self.status = (self.status | status::WIP) & !status::WEL;
        self.busy_polls = 3;
    }

    fn tick(&mut self) {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            if self.busy_polls == 0 {
                self.status &= !status::WIP;
            }
        }
    }
}

#[derive(Copy, Clone)]
struct Active {
    entry: GenFifoEntry,
    remaining: u64,
}

struct Dma {
    /// Host address to write through, if the destination is host memory.
    host: Option<u64>,
    len: u32,
    done: u32,
}

struct SimState {
    regs: HashMap<usize, u32>,
    genfifo: VecDeque<u32>,
    active: Option<Active>,
    started: bool,
    tx_fifo: VecDeque<u32>,
    tx_word: [u8; 4],
    tx_left: usize,
    rx_fifo: VecDeque<u32>,
    rx_word: [u8; 4],
    rx_len: usize,
    poll_expired: bool,
    dma: Option<Dma>,
    dma_status: u32,
    dma_stalled: bool,
    dma_to_memory: bool,
    dma_error: bool,
    flash: SpiNor,
    reads: usize,
    writes: Vec<(Reg, u32)>,
    genfifo_log: Vec<GenFifoEntry>,
    fifo_ctrl_log: Vec<FifoCtrl>,
    events: Vec<BusEvent>,
    dma_setups: Vec<(u64, u32)>,
    io_rx_bytes: usize,
}

impl SimState {
    fn stored(&self, reg: Reg) -> u32 {
        self.regs.get(&reg.offset()).copied().unwrap_or(0)
    }

    fn isr(&self) -> Intr {
        let mut isr = Intr::empty();
        isr.set(Intr::POLL_TIME_EXPIRE, self.poll_expired);
        isr.set(Intr::TX_NOT_FULL, self.tx_fifo.len() < FIFO_DEPTH_WORDS);
        isr.set(Intr::TX_FULL, self.tx_fifo.len() >= FIFO_DEPTH_WORDS);
        isr.set(Intr::TX_EMPTY, self.tx_fifo.is_empty());
        isr.set(Intr::RX_NOT_EMPTY, !self.rx_fifo.is_empty());
        isr.set(Intr::RX_FULL, self.rx_fifo.len() >= FIFO_DEPTH_WORDS);
        isr.set(Intr::RX_EMPTY, self.rx_fifo.is_empty());
        isr.set(
            Intr::GENFIFO_EMPTY,
            self.genfifo.is_empty() && self.active.is_none(),
        );
        isr.set(Intr::GENFIFO_NOT_FULL, self.genfifo.len() < GENFIFO_DEPTH);
        isr.set(Intr::GENFIFO_FULL, self.genfifo.len() >= GENFIFO_DEPTH);
        isr
    }

    fn read(&mut self, reg: Reg) -> u32 {
        self.reads += 1;
        assert!(self.reads < READ_LIMIT, "driver is spinning");
        self.run();
        match reg {
            Reg::Isr => self.isr().bits(),
            Reg::Rxd => self.rx_fifo.pop_front().unwrap_or(0),
            Reg::DmaDstIntSts => self.dma_status,
            _ => self.stored(reg),
        }
    }

    fn write(&mut self, reg: Reg, value: u32) {
        self.writes.push((reg, value));
        match reg {
            Reg::Cfg => {
                let mut cfg = Cfg(value);
                if cfg.start_gen_fifo() {
                    self.started = true;
                    cfg.set_start_gen_fifo(false);
                }
                self.regs.insert(reg.offset(), cfg.0);
            }
            Reg::Isr => {
                if Intr::from_bits_truncate(value)
                    .contains(Intr::POLL_TIME_EXPIRE)
                {
                    self.poll_expired = false;
                }
            }
            Reg::Ier => {
                let imr = self.stored(Reg::Imr) | value;
                self.regs.insert(Reg::Imr.offset(), imr);
            }
            Reg::Idr => {
                let imr = self.stored(Reg::Imr) & !value;
                self.regs.insert(Reg::Imr.offset(), imr);
            }
            Reg::Txd => {
                if self.tx_fifo.len() < FIFO_DEPTH_WORDS {
                    self.tx_fifo.push_back(value);
                }
            }
            Reg::GenFifo => {
                self.genfifo.push_back(value);
                self.genfifo_log.push(GenFifoEntry(value));
            }
            Reg::FifoCtrl => {
                let ctrl = FifoCtrl::from_bits_truncate(value);
                if ctrl.contains(FifoCtrl::RESET_GENFIFO) {
                    self.genfifo.clear();
                    self.active = None;
                    self.started = false;
                    // Chip selects idle once nothing is driving them.
                    if self.flash.selected {
                        self.events.push(BusEvent::CsDeassert);
                        self.flash.deselect();
                    }
                }
                if ctrl.contains(FifoCtrl::RESET_TX) {
                    self.tx_fifo.clear();
                    self.tx_left = 0;
                }
                if ctrl.contains(FifoCtrl::RESET_RX) {
                    self.rx_fifo.clear();
                    self.rx_len = 0;
                }
                self.fifo_ctrl_log.push(ctrl);
            }
            Reg::DmaDstSize => {
                let bus = (u64::from(self.stored(Reg::DmaDstAddrMsb)) << 32)
                    | u64::from(self.stored(Reg::DmaDstAddr));
                let host = DMA_TARGET
                    .with(Cell::take)
                    .filter(|host| host & DMA_BUS_MASK == bus);
                self.dma = Some(Dma {
                    host,
                    len: value,
                    done: 0,
                });
                self.dma_setups.push((host.unwrap_or(bus), value));
                self.regs.insert(reg.offset(), value);
            }
            Reg::DmaDstIntSts => self.dma_status &= !value,
            Reg::DmaDstSts => {
                let sts = self.stored(reg) & !(value & DMA_DST_STS_WTC);
                self.regs.insert(reg.offset(), sts);
            }
            Reg::DmaDstIntEn => {
                let mask = self.stored(Reg::DmaDstIntMask) | value;
                self.regs.insert(Reg::DmaDstIntMask.offset(), mask);
            }
            Reg::DmaDstIntDis => {
                let mask = self.stored(Reg::DmaDstIntMask) & !value;
                self.regs.insert(Reg::DmaDstIntMask.offset(), mask);
            }
            _ => {
                self.regs.insert(reg.offset(), value);
            }
        }
    }

    fn run(&mut self) {
        while self.step() {}
    }

    fn step(&mut self) -> bool {
        if self.active.is_some() {
            return self.data_byte();
        }
        let manual = Cfg(self.stored(Reg::Cfg)).gen_fifo_start_mode();
        if manual && !self.started {
            return false;
        }
        match self.genfifo.pop_front() {
            Some(raw) => {
                self.begin(GenFifoEntry(raw));
                true
            }
            None => {
                self.started = false;
                false
            }
        }
    }

    fn begin(&mut self, e: GenFifoEntry) {
        if e.data_xfer() {
            let len = e.length();
            self.events.push(BusEvent::Data {
                tx: e.tx(),
                rx: e.rx(),
                len,
            });
            // Dummy clocks don't move any data.
            if e.tx() || e.rx() {
                self.active = Some(Active {
                    entry: e,
                    remaining: len,
                });
            }
        } else if e.poll() {
            self.poll();
        } else if e.tx() {
            self.events.push(BusEvent::Immediate(e.imm_data()));
            self.flash.exchange(e.imm_data());
        } else if e.cs_lower() || e.cs_upper() {
            if !self.flash.selected {
                self.events.push(BusEvent::CsAssert);
                self.flash.select();
            }
        } else if e.imm_data() != 0 && self.flash.selected {
            self.events.push(BusEvent::CsDeassert);
            self.flash.deselect();
        }
    }

    fn poll(&mut self) {
        self.events.push(BusEvent::Poll);
        let cfg = PollCfg(self.stored(Reg::PollCfg));
        let mask = cfg.mask();
        let timeout = self.stored(Reg::PollTimeout).min(POLL_LIMIT);
        for _ in 0..timeout {
            let b = self.flash.exchange(0);
            if b & mask == cfg.data() & mask {
                self.rx_fifo.push_back(u32::from(b));
                return;
            }
        }
        if Cfg(self.stored(Reg::Cfg)).en_poll_timeout() {
            self.poll_expired = true;
        }
    }

    fn next_tx_byte(&mut self) -> Option<u8> {
        if self.tx_left == 0 {
            self.tx_word = self.tx_fifo.pop_front()?.to_le_bytes();
            self.tx_left = 4;
        }
        let b = self.tx_word[4 - self.tx_left];
        self.tx_left -= 1;
        Some(b)
    }

    fn data_byte(&mut self) -> bool {
        let Some(mut active) = self.active else {
            return false;
        };
        let e = active.entry;
        let dma = Cfg(self.stored(Reg::Cfg)).read_mode() == ReadMode::Dma;

        if e.rx() {
            if dma && self.dma_stalled {
                return false;
            }
            let rx_full = self.rx_fifo.len() >= FIFO_DEPTH_WORDS;
            if !dma && self.rx_len == 3 && rx_full {
                return false;
            }
        }
        let tx = if e.tx() {
            match self.next_tx_byte() {
                Some(b) => b,
                None => return false,
            }
        } else {
            0
        };

        let rx = self.flash.exchange(tx);
        if e.rx() {
            if dma {
                self.dma_byte(rx);
            } else {
                self.io_byte(rx);
            }
        }

        active.remaining -= 1;
        if active.remaining == 0 {
            self.active = None;
            self.tx_left = 0;
            if self.rx_len != 0 {
                self.rx_fifo.push_back(u32::from_le_bytes(self.rx_word));
                self.rx_len = 0;
            }
        } else {
            self.active = Some(active);
        }
        true
    }

    fn io_byte(&mut self, b: u8) {
        if self.rx_len == 0 {
            self.rx_word = [0; 4];
        }
        self.rx_word[self.rx_len] = b;
        self.rx_len += 1;
        self.io_rx_bytes += 1;
        if self.rx_len == 4 {
            self.rx_fifo.push_back(u32::from_le_bytes(self.rx_word));
            self.rx_len = 0;
        }
    }

    fn dma_byte(&mut self, b: u8) {
        let Some(dma) = self.dma.as_mut() else {
            return;
        };
        if self.dma_to_memory {
            let Some(host) = dma.host else {
                panic!("DMA write to a destination that isn't host memory");
            };
            let p = (host + u64::from(dma.done)) as usize as *mut u8;
            // Safety: the driver only exposes local receive buffers, which
            // the transfer borrows until it finishes.
            unsafe { p.write_volatile(b) };
        }
        dma.done += 1;
        if dma.done == dma.len {
            self.dma = None;
            self.dma_status |= DmaIntr::DONE.bits();
            if self.dma_error {
                self.dma_error = false;
                self.dma_status |= DmaIntr::AXI_BRESP_ERR.bits();
            }
        }
    }
}

pub struct Sim {
    state: RefCell<SimState>,
}

impl Sim {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(SimState {
                regs: HashMap::new(),
                genfifo: VecDeque::new(),
                active: None,
                started: false,
                tx_fifo: VecDeque::new(),
                tx_word: [0; 4],
                tx_left: 0,
                rx_fifo: VecDeque::new(),
                rx_word: [0; 4],
                rx_len: 0,
                poll_expired: false,
                dma: None,
                dma_status: 0,
                dma_stalled: false,
                dma_to_memory: true,
                dma_error: false,
                flash: SpiNor::new(),
                reads: 0,
                writes: Vec::new(),
                genfifo_log: Vec::new(),
                fifo_ctrl_log: Vec::new(),
                events: Vec::new(),
                dma_setups: Vec::new(),
                io_rx_bytes: 0,
            }),
        }
    }

    /// Current value of `reg` as the hardware would report it, without
    /// advancing the model.
    pub fn reg(&self, reg: Reg) -> u32 {
        let s = self.state.borrow();
        match reg {
            Reg::Isr => s.isr().bits(),
            Reg::DmaDstIntSts => s.dma_status,
            _ => s.stored(reg),
        }
    }

    /// Lets the controller work through whatever it has been given, as if
    /// time passed without the driver looking.
    pub fn run(&self) {
        self.state.borrow_mut().run();
    }

    pub fn writes(&self) -> Vec<(Reg, u32)> {
        self.state.borrow().writes.clone()
    }

    pub fn genfifo_log(&self) -> Vec<GenFifoEntry> {
        self.state.borrow().genfifo_log.clone()
    }

    pub fn fifo_ctrl_log(&self) -> Vec<FifoCtrl> {
        self.state.borrow().fifo_ctrl_log.clone()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.borrow().events.clone()
    }

    /// Destination and length of every DMA receive, with host buffers at
    /// their full host address.
    pub fn dma_setups(&self) -> Vec<(u64, u32)> {
        self.state.borrow().dma_setups.clone()
    }

    /// Bytes delivered through the RX FIFO by IO-mode receives.
    pub fn io_rx_bytes(&self) -> usize {
        self.state.borrow().io_rx_bytes
    }

    pub fn tx_fifo_words(&self) -> Vec<u32> {
        self.state.borrow().tx_fifo.iter().copied().collect()
    }

    pub fn push_rx_word(&self, word: u32) {
        self.state.borrow_mut().rx_fifo.push_back(word);
    }

    /// While set, the DMA engine accepts no data, so a DMA receive never
    /// finishes.
    pub fn set_dma_stalled(&self, stalled: bool) {
        self.state.borrow_mut().dma_stalled = stalled;
    }

    /// Makes the next DMA completion also report an AXI write error.
    pub fn inject_dma_error(&self) {
        self.state.borrow_mut().dma_error = true;
    }

    /// Whether DMA receives actually write to the destination address.
    pub fn set_dma_to_memory(&self, enabled: bool) {
        self.state.borrow_mut().dma_to_memory = enabled;
    }

    pub fn with_flash<T>(&self, f: impl FnOnce(&mut SpiNor) -> T) -> T {
        f(&mut self.state.borrow_mut().flash)
    }

    pub fn flash_id(&self) -> [u8; 3] {
        self.state.borrow().flash.id
    }
}

impl RegisterIo for Sim {
    fn read(&self, reg: Reg) -> u32 {
        self.state.borrow_mut().read(reg)
    }

    fn write(&self, reg: Reg, value: u32) {
        self.state.borrow_mut().write(reg, value)
    }
}

/// Records what the driver asked of the platform.
#[derive(Default)]
pub struct RecordingPlatform {
    invalidations: RefCell<Vec<(usize, usize)>>,
    bypass: Cell<Option<u32>>,
    clock_enables: Cell<u32>,
    clock_disables: Cell<u32>,
}

impl RecordingPlatform {
    pub fn invalidations(&self) -> Vec<(usize, usize)> {
        self.invalidations.borrow().clone()
    }

    pub fn tap_delay_bypass(&self) -> Option<u32> {
        self.bypass.get()
    }

    pub fn clock_enables(&self) -> u32 {
        self.clock_enables.get()
    }

    pub fn clock_disables(&self) -> u32 {
        self.clock_disables.get()
    }
}

impl Platform for RecordingPlatform {
    fn dcache_invalidate(&self, addr: usize, len: usize) {
        self.invalidations.borrow_mut().push((addr, len));
    }

    fn ref_clock_enable(&self) {
        self.clock_enables.set(self.clock_enables.get() + 1);
    }

    fn ref_clock_disable(&self) {
        self.clock_disables.set(self.clock_disables.get() + 1);
    }

    fn set_tap_delay_bypass(&self, value: u32) {
        self.bypass.set(Some(value));
    }
}
