//! Task-facing contracts
//!
//! The port does not create or schedule tasks. It defines the TCB layout it
//! depends on and the [`Scheduler`] interface through which the exception
//! handlers reach the scheduler collaborator.

mod tcb;

pub use tcb::OsTcb;

use core::ptr::NonNull;

use crate::port::Cpu;

/// Task entry point function type
///
/// Entered by exception return with the argument in r0, so it must use the
/// C calling convention.
pub type OsTaskFn = extern "C" fn(*mut ()) -> !;

/// The scheduler collaborator, as seen from the exception handlers
///
/// All three methods are called from handler mode with the kernel
/// exceptions unable to preempt each other, so implementations do not need
/// any locking of their own against the port.
///
/// # Safety
/// The handlers dereference [`current_tcb`](Scheduler::current_tcb) without
/// further checks and load the stack pointer found there into PSP.
/// Implementations must keep that TCB alive and its `stk_ptr` pointing at a
/// complete frame.
pub unsafe trait Scheduler {
    /// TCB of the task that owns (or is about to own) the CPU.
    ///
    /// Must point to a live TCB whose `stk_ptr` is valid whenever the port
    /// calls this.
    fn current_tcb(&self) -> NonNull<OsTcb>;

    /// Pick the next task to run, updating what [`current_tcb`] returns.
    ///
    /// Called only from the context-switch handler under the BASEPRI ceiling.
    ///
    /// [`current_tcb`]: Scheduler::current_tcb
    fn switch_context(&mut self);

    /// Per-tick accounting. Requests a switch by calling
    /// [`Cpu::pend_context_switch`] when it wants one.
    fn increment_tick(&mut self, cpu: &mut dyn Cpu);
}
