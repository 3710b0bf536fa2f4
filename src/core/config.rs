//! Compile-time configuration for the Cortex-M3 port
//!
//! These constants control the tick source and the interrupt priority layout.
//! [`PortConfig::DEFAULT`] collects them; other values can be built in const
//! context for boards with different clocks.

use crate::error::{OsError, OsResult};
use crate::types::OsIntPrio;

/// Core clock frequency in Hz
pub const CFG_CPU_CLOCK_HZ: u32 = 72_000_000;

/// System tick rate in Hz
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Separate SysTick clock in Hz.
///
/// `None` means SysTick counts the core clock (CLKSOURCE set). `Some(hz)`
/// means an external reference clock of `hz` is used (CLKSOURCE clear).
pub const CFG_SYSTICK_CLOCK_HZ: Option<u32> = None;

/// Priority of PendSV and SysTick. 255 is the least urgent value; the
/// hardware drops the unimplemented low bits.
pub const CFG_KERNEL_INTERRUPT_PRIORITY: OsIntPrio = 255;

/// BASEPRI ceiling used inside the kernel handlers. Interrupts with a
/// numerically lower (more urgent) priority stay live during a switch.
pub const CFG_MAX_SYSCALL_INTERRUPT_PRIORITY: OsIntPrio = 0xB0;

/// Stack alignment in bytes
pub const CFG_STK_ALIGN: u32 = 8;

/// SysTick counter width
pub const SYSTICK_RELOAD_MAX: u32 = 0x00FF_FFFF;

/// Port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub cpu_clock_hz: u32,
    pub tick_rate_hz: u32,
    pub systick_clock_hz: Option<u32>,
    pub kernel_interrupt_priority: OsIntPrio,
    pub max_syscall_interrupt_priority: OsIntPrio,
}

impl PortConfig {
    /// Configuration built from the `CFG_*` constants
    pub const DEFAULT: Self = Self {
        cpu_clock_hz: CFG_CPU_CLOCK_HZ,
        tick_rate_hz: CFG_TICK_RATE_HZ,
        systick_clock_hz: CFG_SYSTICK_CLOCK_HZ,
        kernel_interrupt_priority: CFG_KERNEL_INTERRUPT_PRIORITY,
        max_syscall_interrupt_priority: CFG_MAX_SYSCALL_INTERRUPT_PRIORITY,
    };

    /// Frequency of the clock SysTick counts
    #[inline]
    pub const fn systick_clock_hz(&self) -> u32 {
        match self.systick_clock_hz {
            Some(hz) => hz,
            None => self.cpu_clock_hz,
        }
    }

    /// Check the priority layout against the number of priority bits the
    /// NVIC implements.
    ///
    /// The max syscall priority must be non-zero (BASEPRI = 0 disables
    /// masking) and must not use bits the hardware drops, otherwise the
    /// effective ceiling silently differs from the configured one.
    pub fn validate_priorities(&self, prio_bits: u8) -> OsResult<()> {
        let unimplemented = unimplemented_prio_mask(prio_bits);

        let syscall = self.max_syscall_interrupt_priority;
        if syscall == 0 || syscall & unimplemented != 0 {
            crate::error!("max syscall priority {} invalid for {} priority bits", syscall, prio_bits);
            return Err(OsError::SyscallPrioInvalid);
        }

        let kernel = self.kernel_interrupt_priority & !unimplemented;
        if kernel < syscall {
            crate::error!("kernel priority {} is more urgent than the syscall ceiling {}", kernel, syscall);
            return Err(OsError::PrioInvalid);
        }

        Ok(())
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Mask of the priority bits a core with `prio_bits` implemented bits ignores
#[inline]
pub const fn unimplemented_prio_mask(prio_bits: u8) -> OsIntPrio {
    if prio_bits >= 8 {
        0
    } else {
        0xFF >> prio_bits
    }
}
