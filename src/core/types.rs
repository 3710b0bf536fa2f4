//! Core type definitions for the port layer
//!
//! Cortex-M3 is a 32-bit core, so every register, stack word and address the
//! port handles is a `u32`.

/// Stack element type
pub type OsStkElement = u32;

/// Address in the target's 32-bit address space
pub type OsAddr = u32;

/// Saved stack pointer value, as stored in the first word of a TCB
pub type OsStkPtr = OsAddr;

/// Critical section nesting counter
pub type OsNestingCtr = u32;

/// Interrupt priority byte as written to the NVIC/SCB (0 = most urgent)
pub type OsIntPrio = u8;

/// Tick counter type
pub type OsTick = u32;

/// Kernel exceptions whose priority the port configures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelHandler {
    /// Context-switch trampoline
    PendSV,
    /// Periodic tick
    SysTick,
}

impl KernelHandler {
    /// Bit offset of this handler's byte lane inside SHPR3
    #[inline]
    pub const fn shpr3_shift(self) -> u32 {
        match self {
            KernelHandler::PendSV => 16,
            KernelHandler::SysTick => 24,
        }
    }

    /// Exception number (as seen in IPSR)
    #[inline]
    pub const fn exception_number(self) -> u8 {
        match self {
            KernelHandler::PendSV => 14,
            KernelHandler::SysTick => 15,
        }
    }
}
