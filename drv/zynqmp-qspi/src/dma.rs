// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RX DMA.
//!
//! The DMA engine only moves whole words. A receive whose length isn't a
//! multiple of four is split: the aligned part goes by DMA, then the
//! controller drops to IO mode and the last one to three bytes are read out
//! of the RX FIFO by software, landing just past the DMA-written region.
//!
//! On platforms where DMA isn't cache coherent the destination is
//! invalidated before the transfer is started and again once it's done,
//! since the CPU may have speculatively pulled lines back in while the DMA
//! was running.

use drv_zynqmp_qspi_api::ReadMode;

use crate::Qspi;
use crate::msg::Msg;
use crate::platform::Platform;
use crate::regs::{DMA_ADDR_MSB_MASK, DmaIntr, Reg, RegisterIo};
use crate::trace::{Trace, trace};

/// Splits a receive of `n` bytes into the part the DMA engine can move and
/// the tail left for IO mode.
pub fn dma_split(n: u32) -> (u32, u32) {
    (n & !0b11, n & 0b11)
}

impl<R: RegisterIo, P: Platform> Qspi<R, P> {
    /// Points the DMA engine at the current segment of `msg` and trims the
    /// segment to the word-aligned part the engine will move.
    pub(crate) fn setup_rx_dma(&mut self, msg: &mut Msg<'_>) {
        let full = self.xfer.seg_len;
        let (aligned, _) = dma_split(full);
        self.xfer.seg_len = aligned;

        let addr = msg.rx_addr(self.xfer.seg_offset);
        if !msg.is_remote() {
            self.invalidate(addr, full);
            #[cfg(test)]
            crate::sim::expose_dma_target(addr);
        }

        self.regs.write(Reg::DmaDstAddr, addr as u32);
        self.regs
            .write(Reg::DmaDstAddrMsb, (addr >> 32) as u32 & DMA_ADDR_MSB_MASK);
        self.regs.write(Reg::DmaDstSize, aligned);
        trace!(self.trace, Trace::DmaSetup { addr, len: aligned });
    }

    /// Called once the engine reports DONE for the current segment. Returns
    /// `true` if an unaligned tail still has to be read, in which case the
    /// segment now describes that tail and the controller is in IO mode.
    pub(crate) fn finish_rx_dma(&mut self, msg: &mut Msg<'_>) -> bool {
        trace!(self.trace, Trace::DmaDone);
        if !msg.is_remote() {
            let addr = msg.rx_addr(self.xfer.seg_offset);
            self.invalidate(addr, self.xfer.seg_len);
        }
        self.set_io_mode()
    }

    fn set_io_mode(&mut self) -> bool {
        let (aligned, tail) = dma_split(self.xfer.rx_bytes.max(0) as u32);
        if tail == 0 {
            return false;
        }

        self.xfer.seg_offset += aligned as usize;
        self.xfer.seg_len = tail;
        self.unaligned = true;
        self.switch_read_mode(ReadMode::Io);
        trace!(
            self.trace,
            Trace::DmaTail {
                offset: self.xfer.seg_offset,
                len: tail
            }
        );
        true
    }

    /// Undoes a temporary switch to IO mode once the message that needed it
    /// is finished.
    pub(crate) fn restore_dma_mode(&mut self) {
        if self.unaligned {
            self.unaligned = false;
            self.switch_read_mode(ReadMode::Dma);
        }
    }

    /// Reads and acknowledges the DMA interrupt status.
    pub(crate) fn take_dma_status(&mut self) -> DmaIntr {
        let status = self.regs.read(Reg::DmaDstIntSts);
        self.regs.write(Reg::DmaDstIntSts, status);
        DmaIntr::from_bits_retain(status)
    }

    fn invalidate(&self, addr: u64, len: u32) {
        if !self.config.is_cache_coherent {
            self.platform.dcache_invalidate(addr as usize, len as usize);
        }
    }
}
