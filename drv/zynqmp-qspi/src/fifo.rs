// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Moving bytes between message buffers and the TX/RX FIFOs.
//!
//! Both FIFOs are a word wide and little-endian: the first byte on the wire
//! is the least significant byte of the word. The last word of a transfer
//! may be partial, in which case only its low bytes are meaningful.
//!
//! The remaining-byte counters are signed and drop by a full word per FIFO
//! access; they are clamped at zero after a partial word rather than being
//! allowed to go negative.

use crate::Qspi;
use crate::msg::Msg;
use crate::platform::Platform;
use crate::regs::{Intr, RX_THRESHOLD, Reg, RegisterIo};

impl<R: RegisterIo, P: Platform> Qspi<R, P> {
    /// Copies up to `cap_words` words of the current message into the TX
    /// FIFO, stopping early if the FIFO fills up.
    pub(crate) fn fill_tx_fifo(&mut self, msg: &Msg<'_>, cap_words: usize) {
        let src = msg.tx_data();
        let mut words = 0;

        while self.xfer.tx_bytes > 0 && words < cap_words {
            if self.status().contains(Intr::TX_FULL) {
                break;
            }

            let pos = self.xfer.tx_pos;
            let n = (self.xfer.tx_bytes as usize).min(4);
            let mut word = [0u8; 4];
            if let Some(bytes) = src.get(pos..pos + n) {
                word[..n].copy_from_slice(bytes);
            }
            self.regs.write(Reg::Txd, u32::from_le_bytes(word));

            self.xfer.tx_pos += n;
            self.xfer.tx_bytes -= 4;
            if self.xfer.tx_bytes < 0 {
                self.xfer.tx_bytes = 0;
            }
            words += 1;
        }
    }

    /// Copies up to `cap_bytes` (rounded up to a word) out of the RX FIFO
    /// into the current message. The caller is responsible for only asking
    /// for data the FIFO actually holds.
    pub(crate) fn drain_rx_fifo(
        &mut self,
        msg: &mut Msg<'_>,
        cap_bytes: usize,
    ) {
        let dst = msg.rx_buf();
        let mut count = 0;

        while self.xfer.rx_bytes > 0 && count < cap_bytes {
            let word = self.regs.read(Reg::Rxd).to_le_bytes();
            let pos = self.xfer.rx_pos;
            let n = (self.xfer.rx_bytes as usize).min(4);
            if let Some(out) = dst.get_mut(pos..pos + n) {
                out.copy_from_slice(&word[..n]);
            }

            self.xfer.rx_pos += n;
            self.xfer.rx_bytes -= 4;
            if self.xfer.rx_bytes < 0 {
                self.xfer.rx_bytes = 0;
            }
            count += 4;
        }
    }

    /// IO-mode receive step. Takes a threshold's worth of words when the RX
    /// FIFO has data; once the GENFIFO has run dry everything still expected
    /// is already in the FIFO, so take all of it.
    pub(crate) fn io_read(&mut self, msg: &mut Msg<'_>, status: Intr) {
        if status.contains(Intr::RX_NOT_EMPTY) {
            self.drain_rx_fifo(msg, RX_THRESHOLD as usize * 4);
        } else if status.contains(Intr::GENFIFO_EMPTY) {
            let remaining = self.xfer.rx_bytes.max(0) as usize;
            self.drain_rx_fifo(msg, remaining);
        }
    }
}
