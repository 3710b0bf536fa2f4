//! Error types for the port layer
//!
//! Only configuration problems that can be detected before the first task is
//! launched are reported as errors. Everything after the launch is fail-stop.

/// Port error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum OsError {
    // ============ OS state errors ============
    /// Scheduler already started
    OsRunning = 24202,

    // ============ Priority errors ============
    /// Kernel interrupt priority is more urgent than the max syscall priority
    PrioInvalid = 25203,
    /// Max syscall priority is zero or not representable in the implemented
    /// priority bits
    SyscallPrioInvalid = 25204,

    // ============ Tick timer errors ============
    /// Tick rate of zero
    TickRateInvalid = 29311,
    /// Reload value does not fit the 24-bit SysTick counter
    TickReloadInvalid = 29312,
}

/// Result type alias for port operations
pub type OsResult<T> = Result<T, OsError>;

impl OsError {
    /// Numeric error code
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }
}
