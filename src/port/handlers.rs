//! Exception handler bodies
//!
//! The three kernel exceptions share these step functions between the
//! target and the simulator. What they leave out is the part that has to be
//! assembly on the real core: moving r4-r11 between the register file and
//! the task stack, and the exception return.
//!
//! ```text
//! PendSV   (a) psp -> r0        trampoline
//!          (b) push r4-r11      trampoline
//!          (c)-(g)              switch_context()
//!          (g) pop r4-r11, psp  trampoline
//!          (h) bx lr            trampoline
//! SVCall   current_task_stack(), pop r4-r11, psp, BASEPRI = 0, lr |= 0xD, bx lr
//! SysTick  tick()
//! ```

use crate::critical::{clear_interrupt_mask_from_isr, set_interrupt_mask_from_isr};
use crate::kernel::PortState;
use crate::port::Cpu;
use crate::task::Scheduler;
use crate::types::OsStkPtr;

/// EXC_RETURN: back to thread mode on the main stack
pub const EXC_RETURN_THREAD_MSP: u32 = 0xFFFF_FFF9;
/// EXC_RETURN: back to thread mode on the process stack
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;
/// EXC_RETURN: back to handler mode
pub const EXC_RETURN_HANDLER: u32 = 0xFFFF_FFF1;
/// Low bits ORed into LR by the SVC handler: thread mode, PSP, Thumb
pub const EXC_RETURN_PSP_BITS: u32 = 0xD;

/// Saved stack pointer of the task `current_tcb` refers to
///
/// The SVC handler loads the first task from it; the context switch loads
/// the incoming task after the scheduler has picked it.
#[inline]
pub fn current_task_stack(sched: &dyn Scheduler) -> OsStkPtr {
    // SAFETY: `Scheduler` guarantees `current_tcb` points to a live TCB
    unsafe { sched.current_tcb().as_ref().stk_ptr }
}

/// Middle of the context switch.
///
/// `saved_sp` is the outgoing task's PSP after r4-r11 were pushed. Returns
/// the incoming task's saved stack pointer for the trampoline to pop from.
pub fn switch_context(
    port: &PortState,
    cpu: &mut dyn Cpu,
    sched: &mut dyn Scheduler,
    saved_sp: OsStkPtr,
) -> OsStkPtr {
    // SAFETY: `Scheduler` guarantees `current_tcb` points to a live TCB
    unsafe { sched.current_tcb().as_mut().stk_ptr = saved_sp };

    cpu.set_basepri(port.basepri_ceiling());
    sched.switch_context();
    cpu.set_basepri(0);

    current_task_stack(sched)
}

/// Tick interrupt body
///
/// The BASEPRI value on entry is restored no matter what the scheduler's
/// tick accounting did with the mask in between.
pub fn tick(port: &PortState, cpu: &mut dyn Cpu, sched: &mut dyn Scheduler) {
    let saved = set_interrupt_mask_from_isr(port, cpu);

    port.tick_increment();
    sched.increment_tick(cpu);

    clear_interrupt_mask_from_isr(cpu, saved);
}
