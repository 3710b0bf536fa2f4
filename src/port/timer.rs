//! SysTick tick source configuration

use crate::config::{PortConfig, SYSTICK_RELOAD_MAX};
use crate::error::{OsError, OsResult};
use crate::types::OsAddr;

/// SysTick Control and Status Register
pub const SYST_CSR: OsAddr = 0xE000_E010;
/// SysTick Reload Value Register
pub const SYST_RVR: OsAddr = 0xE000_E014;
/// SysTick Current Value Register
pub const SYST_CVR: OsAddr = 0xE000_E018;

/// CSR: counter enable
pub const SYST_CSR_ENABLE: u32 = 1 << 0;
/// CSR: interrupt on wrap to zero
pub const SYST_CSR_TICKINT: u32 = 1 << 1;
/// CSR: count the processor clock instead of the external reference
pub const SYST_CSR_CLKSOURCE: u32 = 1 << 2;

/// Register values that start SysTick at the configured tick rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SysTickSetup {
    /// Value for SYST_RVR
    pub reload: u32,
    /// Value for SYST_CSR, written once with interrupt and counter enabled
    pub ctrl: u32,
}

impl SysTickSetup {
    /// Compute the SysTick setup for `config`
    ///
    /// # Example
    /// 72 MHz core clock, 1000 Hz tick: reload = 72_000_000 / 1000 - 1 = 71_999
    pub fn new(config: &PortConfig) -> OsResult<Self> {
        if config.tick_rate_hz == 0 {
            return Err(OsError::TickRateInvalid);
        }

        let counts = config.systick_clock_hz() / config.tick_rate_hz;
        // A reload of zero never fires
        if counts < 2 || counts - 1 > SYSTICK_RELOAD_MAX {
            return Err(OsError::TickReloadInvalid);
        }

        let clk = if config.systick_clock_hz.is_none() {
            SYST_CSR_CLKSOURCE
        } else {
            0
        };

        Ok(SysTickSetup {
            reload: counts - 1,
            ctrl: clk | SYST_CSR_TICKINT | SYST_CSR_ENABLE,
        })
    }

    /// Whether SysTick counts the core clock
    #[inline]
    pub fn uses_core_clock(&self) -> bool {
        self.ctrl & SYST_CSR_CLKSOURCE != 0
    }
}
