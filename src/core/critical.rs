//! Critical section handling
//!
//! Two exclusion primitives live here:
//! - the task-level critical section, a nesting counter over PRIMASK
//!   ([`PortState::enter_critical`] / [`PortState::exit_critical`]);
//! - the BASEPRI ceiling used from handler mode
//!   ([`set_interrupt_mask_from_isr`] / [`clear_interrupt_mask_from_isr`]).

use core::sync::atomic::Ordering;

use crate::kernel::PortState;
use crate::port::Cpu;
use crate::types::OsIntPrio;

impl PortState {
    /// Enter a critical section by disabling interrupts.
    ///
    /// Task level only. Calls nest; interrupts stay disabled until the
    /// matching outermost [`exit_critical`](Self::exit_critical).
    #[inline]
    pub fn enter_critical<C: Cpu + ?Sized>(&self, cpu: &mut C) {
        cpu.disable_interrupts();

        // Interrupts are off, so the load/store pair cannot be torn
        let nesting = self.critical_nesting.load(Ordering::Relaxed).wrapping_add(1);
        self.critical_nesting.store(nesting, Ordering::Relaxed);

        if nesting == 1 {
            debug_assert!(
                cpu.active_exception() == 0,
                "task-level critical section entered from an ISR"
            );
        }
    }

    /// Leave a critical section, re-enabling interrupts when the outermost
    /// one is left.
    #[inline]
    pub fn exit_critical<C: Cpu + ?Sized>(&self, cpu: &mut C) {
        let nesting = self.critical_nesting.load(Ordering::Relaxed);
        debug_assert!(nesting != 0, "critical section exit without matching enter");

        let nesting = nesting.wrapping_sub(1);
        self.critical_nesting.store(nesting, Ordering::Relaxed);

        if nesting == 0 {
            cpu.enable_interrupts();
        }
    }
}

/// Raise BASEPRI to the port's ceiling and return the previous value.
///
/// Handler mode only. Interrupts more urgent than the ceiling stay live.
#[inline]
pub fn set_interrupt_mask_from_isr<C: Cpu + ?Sized>(port: &PortState, cpu: &mut C) -> OsIntPrio {
    let saved = cpu.basepri();
    cpu.set_basepri(port.basepri_ceiling());
    saved
}

/// Restore the BASEPRI value returned by [`set_interrupt_mask_from_isr`]
#[inline]
pub fn clear_interrupt_mask_from_isr<C: Cpu + ?Sized>(cpu: &mut C, saved: OsIntPrio) {
    cpu.set_basepri(saved);
}

/// Check if the CPU is executing an exception handler
#[inline]
pub fn is_isr_context<C: Cpu + ?Sized>(cpu: &C) -> bool {
    cpu.active_exception() != 0
}

#[cfg(target_arch = "arm")]
pub use guard::{critical_section, CriticalSection};

#[cfg(target_arch = "arm")]
mod guard {
    use crate::kernel::PORT;
    use crate::port::CortexM3;

    /// RAII guard for task-level critical sections
    ///
    /// When this guard is created, interrupts are disabled and the nesting
    /// counter incremented. Dropping it undoes one level.
    pub struct CriticalSection {
        _private: (),
    }

    impl CriticalSection {
        /// Enter a critical section by disabling interrupts.
        #[inline(always)]
        pub fn enter() -> Self {
            PORT.enter_critical(&mut CortexM3);
            CriticalSection { _private: () }
        }
    }

    impl Drop for CriticalSection {
        #[inline(always)]
        fn drop(&mut self) {
            PORT.exit_critical(&mut CortexM3);
        }
    }

    /// Execute a closure with interrupts disabled
    ///
    /// The closure receives a reference to the critical section guard,
    /// which can be used to access [`CsCell`] protected data.
    ///
    /// [`CsCell`]: crate::core::cs_cell::CsCell
    #[inline]
    pub fn critical_section<F, R>(f: F) -> R
    where
        F: FnOnce(&CriticalSection) -> R,
    {
        let cs = CriticalSection::enter();
        f(&cs)
    }
}
