// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_zynqmp_qspi_api::{BusWidth, ConnectionMode};
use serde::Deserialize;

/// Base address of the ZynqMP QSPI controller.
pub const ZYNQMP_QSPI_BASE: usize = 0xFF0F_0000;

/// Static description of one controller instance, normally carried in the
/// board's TOML description.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Controller base address. The GQSPI registers are at
    /// `base_address + GQSPI_OFFSET`.
    pub base_address: usize,
    /// QSPI reference clock, before the prescaler.
    pub input_clock_hz: u32,
    pub connection_mode: ConnectionMode,
    /// Widest bus mode the board wiring supports.
    pub bus_width: BusWidth,
    #[serde(default)]
    pub is_cache_coherent: bool,
}

impl Config {
    pub const fn zynqmp() -> Self {
        Self {
            base_address: ZYNQMP_QSPI_BASE,
            input_clock_hz: 300_000_000,
            connection_mode: ConnectionMode::Single,
            bus_width: BusWidth::Quad,
            is_cache_coherent: false,
        }
    }

    /// Bus frequency that results from dividing the reference clock by
    /// `divisor`.
    pub fn bus_hz(&self, divisor: u32) -> u32 {
        self.input_clock_hz / divisor
    }
}
