// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transfer sequencing.
//!
//! A transfer is a list of messages run back to back inside one chip-select
//! bracket: chip select is asserted before the first message and released
//! after the last, never in between, so that a command, its address and its
//! data can be split across messages.
//!
//! Three ways of driving a transfer are provided:
//!
//! - `Qspi::polled_transfer` spins on the status registers until everything
//!   is done.
//!
//! - `Qspi::interrupt_transfer` queues the first message and hands back an
//!   `InterruptTransfer`; the controller interrupt should call its
//!   `handle_interrupt`, which advances through the messages and reports the
//!   outcome to a `StatusHandler`. A `POLL` message instead runs the
//!   hardware status-polling sequence.
//!
//! - `Qspi::start_dma_transfer` runs everything up to a final DMA receive and
//!   hands back a `DmaTransfer` whose `check_done` can be polled.
//!
//! In-flight transfers borrow both the driver and the message buffers, so
//! neither can be touched until the transfer is finished. Dropping one that
//! hasn't finished aborts the controller.

use drv_zynqmp_qspi_api::{BusSelect, MsgFlags, QspiError, ReadMode, Status};

use crate::Qspi;
use crate::genfifo::GenFifoEntry;
use crate::msg::{Msg, PollConfig, validate};
use crate::platform::Platform;
use crate::regs::{
    Cfg, DmaIntr, FIFO_DEPTH_WORDS, Intr, PollCfg, Reg, RegisterIo,
};
use crate::trace::{Trace, trace};

/// Receives the outcome of interrupt driven transfers. Called from the
/// interrupt handler, so it must not block.
pub trait StatusHandler {
    fn status(&mut self, status: Status, byte_count: usize);
}

impl<F: FnMut(Status, usize)> StatusHandler for F {
    fn status(&mut self, status: Status, byte_count: usize) {
        self(status, byte_count)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Progress {
    InFlight,
    Finished,
}

const XFER_INTERRUPTS: Intr = Intr::TX_NOT_FULL
    .union(Intr::TX_EMPTY)
    .union(Intr::RX_NOT_EMPTY)
    .union(Intr::GENFIFO_EMPTY)
    .union(Intr::RX_EMPTY);

const POLL_INTERRUPTS: Intr = Intr::RX_NOT_EMPTY.union(Intr::POLL_TIME_EXPIRE);

impl<R: RegisterIo, P: Platform> Qspi<R, P> {
    fn check_idle(&self) -> Result<(), QspiError> {
        if self.busy {
            Err(QspiError::Busy)
        } else if !self.ready {
            Err(QspiError::NotReady)
        } else {
            Ok(())
        }
    }

    /// Takes ownership of the controller for a transfer of `msgs`, or
    /// explains why not without touching the hardware.
    fn claim(&mut self, msgs: &[Msg<'_>]) -> Result<(), QspiError> {
        let r = self
            .check_idle()
            .and_then(|()| validate(msgs, self.configured_read_mode()));
        if let Err(e) = r {
            trace!(self.trace, Trace::Rejected(e));
            return Err(e);
        }
        self.busy = true;
        self.xfer.genfifo_entries = 0;
        self.platform.ref_clock_enable();
        Ok(())
    }

    fn release(&mut self) {
        self.busy = false;
        self.platform.ref_clock_disable();
    }

    pub(crate) fn begin_message(&mut self, msg: &Msg<'_>) {
        self.xfer.seg_offset = 0;
        self.xfer.seg_len = msg.byte_count;
    }

    /// Kicks the GENFIFO if we're in manual start mode. In auto mode the
    /// controller picks up entries as they're written.
    pub(crate) fn manual_start(&mut self) {
        if self.manual_start {
            self.regs.modify(Reg::Cfg, |v| {
                let mut cfg = Cfg(v);
                cfg.set_start_gen_fifo(true);
                cfg.0
            });
        }
    }

    pub(crate) fn wait_genfifo_empty(&mut self) {
        while !self.status().contains(Intr::GENFIFO_EMPTY) {}
    }

    /// Services a queued message until it's done. Returns `true` if a DMA
    /// receive finished with an unaligned tail that still has to be queued.
    fn service_polled(&mut self, msg: &mut Msg<'_>) -> Result<bool, QspiError> {
        loop {
            let status = self.status();

            if msg.is_tx()
                && status.contains(Intr::TX_NOT_FULL)
                && self.xfer.tx_bytes > 0
            {
                self.fill_tx_fifo(msg, FIFO_DEPTH_WORDS);
            }

            if msg.is_rx() && self.read_mode == ReadMode::Dma {
                let dma = self.take_dma_status();
                if dma.intersects(DmaIntr::ERRORS) {
                    trace!(self.trace, Trace::DmaError(dma.bits()));
                    self.abort();
                    return Err(QspiError::DmaFault);
                }
                if dma.contains(DmaIntr::DONE) {
                    let tail = self.finish_rx_dma(msg);
                    self.xfer.rx_bytes = 0;
                    if tail {
                        return Ok(true);
                    }
                }
            } else if msg.is_rx() {
                self.io_read(msg, status);
            }

            if status.contains(Intr::GENFIFO_EMPTY | Intr::TX_EMPTY)
                && self.xfer.tx_bytes == 0
                && self.xfer.rx_bytes == 0
            {
                return Ok(false);
            }
        }
    }

    /// Waits out a message whose entries are already queued, including any
    /// IO tail it turns out to need.
    fn complete_polled(
        &mut self,
        index: usize,
        msg: &mut Msg<'_>,
    ) -> Result<(), QspiError> {
        while self.service_polled(msg)? {
            self.push_message(index, msg);
            self.manual_start();
        }
        self.restore_dma_mode();
        Ok(())
    }

    fn transfer_polled(
        &mut self,
        index: usize,
        msg: &mut Msg<'_>,
    ) -> Result<(), QspiError> {
        self.begin_message(msg);
        self.push_message(index, msg);
        self.manual_start();
        self.complete_polled(index, msg)
    }

    fn finish_polled(&mut self) {
        self.cs_deassert();
        self.manual_start();
        self.wait_genfifo_empty();
        self.release();
    }

    /// Runs `msgs` to completion, spinning on controller status.
    pub fn polled_transfer(
        &mut self,
        msgs: &mut [Msg<'_>],
    ) -> Result<(), QspiError> {
        self.claim(msgs)?;
        self.cs_assert();
        for (index, msg) in msgs.iter_mut().enumerate() {
            self.transfer_polled(index, msg)?;
        }
        self.finish_polled();
        Ok(())
    }

    /// Starts `msgs` and returns as soon as the first message is queued.
    /// Progress is made by calling `InterruptTransfer::handle_interrupt`
    /// from the controller's interrupt; the outcome goes to `handler`.
    ///
    /// If the first message is a `POLL` message it must be the only one, and
    /// the controller polls the flash status register instead.
    pub fn interrupt_transfer<'a, 'm>(
        &'a mut self,
        msgs: &'a mut [Msg<'m>],
        handler: &'a mut dyn StatusHandler,
    ) -> Result<InterruptTransfer<'a, 'm, R, P>, QspiError> {
        let poll = msgs
            .first()
            .filter(|m| m.flags.contains(MsgFlags::POLL))
            .map(|m| m.poll);

        let kind = match poll {
            Some(cfg) => {
                let r = self.check_idle().and_then(|()| match cfg {
                    Some(cfg) if msgs.len() == 1 => Ok(cfg),
                    _ => Err(QspiError::BadMessage),
                });
                let cfg = match r {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        trace!(self.trace, Trace::Rejected(e));
                        return Err(e);
                    }
                };
                self.busy = true;
                self.platform.ref_clock_enable();
                self.poll_data_config(&cfg);
                Kind::Poll
            }
            None => {
                self.claim(msgs)?;
                self.cs_assert();
                let msg = &mut msgs[0];
                self.begin_message(msg);
                self.push_message(0, msg);
                self.manual_start();

                self.regs.write(Reg::Ier, XFER_INTERRUPTS.bits());
                if self.configured_read_mode() == ReadMode::Dma {
                    self.regs.write(Reg::DmaDstIntEn, DmaIntr::DONE.bits());
                }
                Kind::Messages
            }
        };

        Ok(InterruptTransfer {
            qspi: self,
            msgs,
            handler,
            kind,
            index: 0,
            in_flight: true,
            bytes: 0,
            poll_status: None,
            finished: false,
        })
    }

    /// Queues the hardware status poll: send `status_cmd` once, then let the
    /// controller clock the status register until `(status & mask) ==
    /// (data & mask)` or the poll timeout expires.
    fn poll_data_config(&mut self, cfg: &PollConfig) {
        let mut poll = PollCfg(0);
        poll.set_data(cfg.data);
        poll.set_mask(cfg.mask);
        poll.set_en_mask_lower(cfg.bus != BusSelect::Upper);
        poll.set_en_mask_upper(cfg.bus != BusSelect::Lower);
        self.regs.write(Reg::PollCfg, poll.0);
        self.regs.write(Reg::PollTimeout, cfg.timeout);

        self.cs_assert();
        self.push_entry(GenFifoEntry::immediate_tx(
            self.flash,
            self.bus,
            cfg.status_cmd,
        ));
        let mut entry = GenFifoEntry::chip_select(self.flash, self.bus);
        entry.set_imm_data(0);
        entry.set_poll(true);
        entry.set_rx(true);
        entry.set_stripe(cfg.bus == BusSelect::Both);
        self.push_entry(entry);
        self.push_entry(GenFifoEntry(0));

        // Polling happens in IO mode whatever the configured read mode;
        // `read_mode` is left alone so it can be restored afterwards.
        self.regs.modify(Reg::Cfg, |v| {
            let mut c = Cfg(v);
            c.set_read_mode(ReadMode::Io);
            c.set_start_gen_fifo(true);
            c.set_en_poll_timeout(true);
            c.0
        });
        self.regs.write(Reg::Ier, POLL_INTERRUPTS.bits());
        trace!(
            self.trace,
            Trace::PollConfigured {
                cmd: cfg.status_cmd,
                timeout: cfg.timeout
            }
        );
    }

    /// Runs every message but the last to completion and, if the last one is
    /// a DMA receive, leaves it running and returns. Completion is then
    /// polled with `DmaTransfer::check_done`.
    pub fn start_dma_transfer<'a, 'm>(
        &'a mut self,
        msgs: &'a mut [Msg<'m>],
    ) -> Result<DmaTransfer<'a, 'm, R, P>, QspiError> {
        self.claim(msgs)?;
        let Some((last, rest)) = msgs.split_last_mut() else {
            // `claim` rejects empty lists.
            return Err(QspiError::BadMessage);
        };

        self.cs_assert();
        for (index, msg) in rest.iter_mut().enumerate() {
            self.transfer_polled(index, msg)?;
        }

        let index = rest.len();
        self.begin_message(last);
        self.push_message(index, last);
        self.manual_start();

        if last.is_rx() && self.read_mode == ReadMode::Dma {
            Ok(DmaTransfer {
                qspi: self,
                msg: Some(last),
                index,
                finished: false,
            })
        } else {
            // Nothing for the DMA engine to do, so nothing to wait for.
            self.complete_polled(index, last)?;
            Ok(DmaTransfer {
                qspi: self,
                msg: None,
                index,
                finished: false,
            })
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Kind {
    Messages,
    Poll,
}

/// An interrupt driven transfer in progress.
pub struct InterruptTransfer<'a, 'm, R: RegisterIo, P: Platform> {
    qspi: &'a mut Qspi<R, P>,
    msgs: &'a mut [Msg<'m>],
    handler: &'a mut dyn StatusHandler,
    kind: Kind,
    /// Message currently being worked on. Runs one past the end while the
    /// chip-select release drains.
    index: usize,
    /// Whether `msgs[index]` has entries queued that aren't retired yet.
    in_flight: bool,
    /// Bytes in retired messages.
    bytes: usize,
    poll_status: Option<u8>,
    finished: bool,
}

impl<R: RegisterIo, P: Platform> InterruptTransfer<'_, '_, R, P> {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The status byte that matched, once a poll transfer reports
    /// `PollDone`.
    pub fn poll_status(&self) -> Option<u8> {
        self.poll_status
    }

    fn finish(&mut self, status: Status, bytes: usize) -> Progress {
        self.finished = true;
        trace!(self.qspi.trace, Trace::Reported(status));
        self.handler.status(status, bytes);
        Progress::Finished
    }

    /// The controller interrupt handler. Spurious calls are harmless.
    pub fn handle_interrupt(&mut self) -> Progress {
        if self.finished {
            return Progress::Finished;
        }
        match self.kind {
            Kind::Messages => self.service_messages(),
            Kind::Poll => self.service_poll(),
        }
    }

    fn service_messages(&mut self) -> Progress {
        let q = &mut *self.qspi;
        let status = q.status();
        let dma = if q.read_mode == ReadMode::Dma {
            q.take_dma_status()
        } else {
            DmaIntr::empty()
        };

        if dma.intersects(DmaIntr::ERRORS) {
            trace!(q.trace, Trace::DmaError(dma.bits()));
            q.abort();
            let bytes = self.bytes;
            return self.finish(Status::CommandError, bytes);
        }

        let count = self.msgs.len();
        if self.in_flight && self.index < count {
            let index = self.index;
            let msg = &mut self.msgs[index];

            if msg.is_tx()
                && status.contains(Intr::TX_NOT_FULL)
                && q.xfer.tx_bytes > 0
            {
                q.fill_tx_fifo(msg, FIFO_DEPTH_WORDS);
            }

            let retired = if msg.is_rx() && q.read_mode == ReadMode::Dma {
                if !dma.contains(DmaIntr::DONE) {
                    false
                } else if q.finish_rx_dma(msg) {
                    q.push_message(index, msg);
                    q.manual_start();
                    false
                } else {
                    q.xfer.rx_bytes = 0;
                    true
                }
            } else if msg.is_rx() {
                if q.xfer.rx_bytes != 0 {
                    q.io_read(msg, status);
                }
                q.xfer.rx_bytes == 0
            } else if msg.is_tx() {
                status.contains(Intr::TX_EMPTY | Intr::GENFIFO_EMPTY)
                    && q.xfer.tx_bytes == 0
            } else {
                // Dummy clocks.
                status.contains(Intr::GENFIFO_EMPTY)
            };

            if retired {
                // Dummy messages count clocks, not bytes.
                if msg.is_tx() || msg.is_rx() {
                    self.bytes += msg.byte_count as usize;
                }
                self.index += 1;
                self.in_flight = false;
            }
        }

        // Anything new goes in only once the GENFIFO has drained.
        if !self.in_flight && status.contains(Intr::GENFIFO_EMPTY) {
            q.restore_dma_mode();
            if self.index < count {
                let index = self.index;
                let msg = &mut self.msgs[index];
                q.begin_message(msg);
                q.push_message(index, msg);
                q.manual_start();
                self.in_flight = true;
            } else if self.index == count {
                self.index += 1;
                q.cs_deassert();
                q.manual_start();
            } else {
                q.disable_interrupts();
                q.release();
                let bytes = self.bytes;
                return self.finish(Status::TransferDone, bytes);
            }
        }

        Progress::InFlight
    }

    fn service_poll(&mut self) -> Progress {
        let q = &mut *self.qspi;
        let status = q.status();

        let outcome = if status.contains(Intr::RX_NOT_EMPTY) {
            self.poll_status = Some(q.regs.read(Reg::Rxd) as u8);
            Status::PollDone
        } else if status.contains(Intr::POLL_TIME_EXPIRE) {
            q.regs.write(Reg::Isr, Intr::POLL_TIME_EXPIRE.bits());
            Status::PollTimeout
        } else {
            return Progress::InFlight;
        };

        q.regs.write(Reg::Idr, POLL_INTERRUPTS.bits());
        let mode = q.read_mode;
        q.regs.modify(Reg::Cfg, |v| {
            let mut c = Cfg(v);
            c.set_en_poll_timeout(false);
            c.set_read_mode(mode);
            c.0
        });
        q.cs_deassert();
        q.manual_start();
        q.release();
        self.finish(outcome, 0)
    }
}

impl<R: RegisterIo, P: Platform> Drop for InterruptTransfer<'_, '_, R, P> {
    fn drop(&mut self) {
        if !self.finished {
            self.qspi.abort();
        }
    }
}

/// A transfer whose final DMA receive is still running.
pub struct DmaTransfer<'a, 'm, R: RegisterIo, P: Platform> {
    qspi: &'a mut Qspi<R, P>,
    msg: Option<&'a mut Msg<'m>>,
    index: usize,
    finished: bool,
}

impl<R: RegisterIo, P: Platform> DmaTransfer<'_, '_, R, P> {
    /// Returns `WouldBlock` until the DMA engine is done, then finishes the
    /// transfer: reads any unaligned tail, releases chip select and frees the
    /// controller.
    pub fn check_done(&mut self) -> nb::Result<(), QspiError> {
        if self.finished {
            return Ok(());
        }
        let q = &mut *self.qspi;

        if let Some(msg) = self.msg.as_deref_mut() {
            let dma = q.take_dma_status();
            if dma.intersects(DmaIntr::ERRORS) {
                trace!(q.trace, Trace::DmaError(dma.bits()));
                q.abort();
                self.finished = true;
                return Err(nb::Error::Other(QspiError::DmaFault));
            }
            if !dma.contains(DmaIntr::DONE) {
                return Err(nb::Error::WouldBlock);
            }

            if q.finish_rx_dma(msg) {
                q.xfer.rx_bytes = 0;
                q.push_message(self.index, msg);
                q.manual_start();
                if let Err(e) = q.complete_polled(self.index, msg) {
                    self.finished = true;
                    return Err(nb::Error::Other(e));
                }
            } else {
                q.xfer.rx_bytes = 0;
                q.restore_dma_mode();
            }
            self.msg = None;
        }

        q.finish_polled();
        self.finished = true;
        Ok(())
    }
}

impl<R: RegisterIo, P: Platform> Drop for DmaTransfer<'_, '_, R, P> {
    fn drop(&mut self) {
        if !self.finished {
            self.qspi.abort();
        }
    }
}
