// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hooks into the rest of the SoC that the controller can't reach through
//! its own register block.

/// Services the driver needs from outside the GQSPI block: cache
/// maintenance around DMA, the reference clock gate, and the IOU tap delay
/// bypass register.
pub trait Platform {
    /// Invalidates `len` bytes at `addr` from the data cache. Only called on
    /// platforms configured as not cache coherent.
    fn dcache_invalidate(&self, addr: usize, len: usize);

    fn ref_clock_enable(&self) {}

    fn ref_clock_disable(&self) {}

    /// Programs the RX tap delay bypass register (IOU_TAPDLY_BYPASS).
    fn set_tap_delay_bypass(&self, _value: u32) {}
}

impl<T: Platform + ?Sized> Platform for &T {
    fn dcache_invalidate(&self, addr: usize, len: usize) {
        (**self).dcache_invalidate(addr, len)
    }

    fn ref_clock_enable(&self) {
        (**self).ref_clock_enable()
    }

    fn ref_clock_disable(&self) {
        (**self).ref_clock_disable()
    }

    fn set_tap_delay_bypass(&self, value: u32) {
        (**self).set_tap_delay_bypass(value)
    }
}

/// A platform whose DMA is cache coherent and whose clocks and tap delays
/// are fixed by boot firmware.
#[derive(Copy, Clone, Debug, Default)]
pub struct Coherent;

impl Platform for Coherent {
    fn dcache_invalidate(&self, _addr: usize, _len: usize) {}
}
