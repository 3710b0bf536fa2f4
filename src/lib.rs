//! ARM Cortex-M3 port layer for a preemptive real-time kernel
//!
//! Provides the architecture-specific pieces a kernel needs on ARMv7-M:
//! - Initial task stack frames
//! - Nested task-level critical sections and the BASEPRI ceiling for ISRs
//! - First-task launch (SVC), context switching (PendSV) and tick (SysTick)
//!
//! The kernel plugs in through the [`task::Scheduler`] trait.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod port;

// ============ Re-exports ============

pub use self::core::config;
pub use self::core::config::*;
pub use self::core::critical;
pub use self::core::error;
pub use self::core::error::{OsError, OsResult};
pub use self::core::kernel;
pub use self::core::kernel::{PortState, PORT};
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::task;
pub use self::core::task::{OsTcb, Scheduler};
