//! Cortex-M3 port implementation
//!
//! - First task launched through SVC
//! - Context switching in the PendSV exception handler
//! - Tick from SysTick
//!
//! PendSV and SysTick run at the lowest priority, so they never preempt a
//! device interrupt and never preempt each other. Inside them BASEPRI keeps
//! kernel-aware interrupts out of the scheduler while interrupts above the
//! ceiling stay live.

use core::arch::{asm, naked_asm};
use core::convert::Infallible;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::SCB;
use cortex_m::register::{basepri, primask};

use crate::config::PortConfig;
use crate::core::cs_cell::CsCell;
use crate::critical::{self, critical_section};
use crate::error::OsResult;
use crate::kernel::PORT;
use crate::port::frame;
use crate::port::handlers::{self, EXC_RETURN_PSP_BITS};
use crate::port::timer::SysTickSetup;
use crate::port::{Cpu, SCB_VTOR};
use crate::task::{OsTaskFn, Scheduler};
use crate::types::{KernelHandler, OsAddr, OsIntPrio, OsStkElement, OsStkPtr};

/// The physical core
#[derive(Debug, Clone, Copy, Default)]
pub struct CortexM3;

impl CortexM3 {
    fn system_handler(handler: KernelHandler) -> SystemHandler {
        match handler {
            KernelHandler::PendSV => SystemHandler::PendSV,
            KernelHandler::SysTick => SystemHandler::SysTick,
        }
    }
}

impl Cpu for CortexM3 {
    #[inline(always)]
    fn read_word(&self, addr: OsAddr) -> u32 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    #[inline(always)]
    fn write_word(&mut self, addr: OsAddr, value: u32) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }

    #[inline(always)]
    fn disable_interrupts(&mut self) {
        cortex_m::interrupt::disable();
    }

    #[inline(always)]
    fn enable_interrupts(&mut self) {
        unsafe { cortex_m::interrupt::enable() }
    }

    #[inline(always)]
    fn interrupts_enabled(&self) -> bool {
        primask::read().is_inactive()
    }

    #[inline(always)]
    fn basepri(&self) -> OsIntPrio {
        basepri::read()
    }

    #[inline(always)]
    fn set_basepri(&mut self, value: OsIntPrio) {
        unsafe { basepri::write(value) };
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    #[inline(always)]
    fn active_exception(&self) -> u8 {
        let ipsr: u32;
        unsafe {
            asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr as u8
    }

    /// Write all ones to the SysTick priority byte and count how many
    /// survive. The original priority is put back.
    fn priority_bits(&mut self) -> u8 {
        let mut scb = unsafe { cortex_m::Peripherals::steal() }.SCB;

        let saved = SCB::get_priority(SystemHandler::SysTick);
        unsafe { scb.set_priority(SystemHandler::SysTick, 0xFF) };
        let implemented = SCB::get_priority(SystemHandler::SysTick);
        unsafe { scb.set_priority(SystemHandler::SysTick, saved) };

        implemented.leading_ones() as u8
    }

    fn set_handler_priority(&mut self, handler: KernelHandler, priority: OsIntPrio) {
        let mut scb = unsafe { cortex_m::Peripherals::steal() }.SCB;
        unsafe { scb.set_priority(Self::system_handler(handler), priority) };
    }

    fn configure_systick(&mut self, setup: &SysTickSetup) {
        let mut syst = unsafe { cortex_m::Peripherals::steal() }.SYST;

        syst.disable_counter();
        syst.set_reload(setup.reload);
        syst.clear_current();
        // Clock source, interrupt and counter enable in one write
        unsafe { syst.csr.write(setup.ctrl) };
    }

    #[inline(always)]
    fn pend_context_switch(&mut self) {
        SCB::set_pendsv();
    }
}

// ============ Scheduler binding ============

/// Scheduler the exception handlers call into
static SCHEDULER: CsCell<Option<&'static mut dyn Scheduler>> = CsCell::new(None);

/// Scheduler bound by [`os_start_scheduler`]
///
/// # Safety
/// Only the kernel exception handlers may call this; they cannot preempt
/// each other, so the returned reference is unique while they run.
unsafe fn bound_scheduler() -> &'static mut dyn Scheduler {
    match unsafe { SCHEDULER.get_in_handler() } {
        Some(sched) => &mut **sched,
        None => cortex_m::asm::udf(),
    }
}

// ============ Task-level API ============

/// Initialize a task stack
///
/// Builds the first frame of `task_fn(arg)` below `stk_top` and returns the
/// stack pointer to store in the task's TCB.
///
/// # Safety
/// `stk_top` must be one past the end of a stack region owned by the new
/// task, with room for the frame plus alignment slack.
pub unsafe fn os_task_stk_init(
    stk_top: *mut OsStkElement,
    task_fn: OsTaskFn,
    arg: *mut (),
) -> *mut OsStkElement {
    let sp = frame::init_stack(
        &mut CortexM3,
        stk_top as usize as OsAddr,
        task_fn as usize as OsAddr,
        arg as usize as u32,
        task_exit_error as *const () as usize as OsAddr,
    );
    sp as usize as *mut OsStkElement
}

/// Enter a task-level critical section
#[inline(always)]
pub fn os_enter_critical() {
    PORT.enter_critical(&mut CortexM3);
}

/// Leave a task-level critical section
#[inline(always)]
pub fn os_exit_critical() {
    PORT.exit_critical(&mut CortexM3);
}

/// Raise BASEPRI to the kernel ceiling from an ISR, returning the old value
#[inline(always)]
pub fn os_set_interrupt_mask_from_isr() -> OsIntPrio {
    critical::set_interrupt_mask_from_isr(&PORT, &mut CortexM3)
}

/// Restore BASEPRI saved by [`os_set_interrupt_mask_from_isr`]
#[inline(always)]
pub fn os_clear_interrupt_mask_from_isr(saved: OsIntPrio) {
    critical::clear_interrupt_mask_from_isr(&mut CortexM3, saved);
}

/// Trigger context switch from task or interrupt level
#[inline(always)]
pub fn os_ctx_sw() {
    CortexM3.pend_context_switch();
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Start the scheduler
///
/// Validates [`PortConfig::DEFAULT`], binds `sched` to the exception
/// handlers, configures interrupt priorities and SysTick, and launches the
/// task `sched.current_tcb()` refers to. `sched` is only bound once the
/// start is accepted.
///
/// # Returns
/// This function does not return on success.
/// * `Err(OsError::OsRunning)` - Scheduler already started
/// * `Err(..)` - Configuration rejected by [`PortState::prepare_start`];
///   interrupts are left disabled
///
/// [`PortState::prepare_start`]: crate::kernel::PortState::prepare_start
pub fn os_start_scheduler(sched: &'static mut dyn Scheduler) -> OsResult<Infallible> {
    PORT.prepare_start_with(&mut CortexM3, &PortConfig::DEFAULT, || {
        critical_section(|cs| {
            SCHEDULER.replace(cs, Some(sched));
        })
    })?;

    unsafe { start_first_task() }
}

/// Called if a task returns from its implementing function
extern "C" fn task_exit_error() -> ! {
    cortex_m::interrupt::disable();
    crate::error!("task returned from its entry function");
    loop {
        cortex_m::asm::wfi();
    }
}

// ============ Exception handlers ============

/// Bootstrap trap
///
/// Resets MSP to the initial value from the vector table (the startup stack
/// is not needed again), enables interrupts and faults, and traps into
/// [`SVCall`]. Never returns.
#[unsafe(naked)]
unsafe extern "C" fn start_first_task() -> ! {
    naked_asm!(
        "movw r0, #{vtor_lo}",
        "movt r0, #{vtor_hi}",
        "ldr r0, [r0]",
        "ldr r0, [r0]",
        "msr msp, r0",

        "cpsie i",
        "cpsie f",
        "dsb",
        "isb",

        "svc 0",
        "udf #0",

        vtor_lo = const SCB_VTOR & 0xFFFF,
        vtor_hi = const SCB_VTOR >> 16,
    );
}

unsafe extern "C" fn svc_first_task_sp() -> OsStkPtr {
    handlers::current_task_stack(unsafe { bound_scheduler() })
}

/// SVC exception handler - launches the first task
///
/// 1. Load the first task's r4-r11 from its stack
/// 2. Point PSP past them
/// 3. Clear BASEPRI
/// 4. Exception return to thread mode on PSP; hardware pops the rest
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "push {{r3, lr}}",
        "bl {first_sp}",
        "pop {{r3, lr}}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "isb",

        "mov r0, #0",
        "msr basepri, r0",

        "orr lr, lr, #{psp_bits}",
        "bx lr",

        first_sp = sym svc_first_task_sp,
        psp_bits = const EXC_RETURN_PSP_BITS,
    );
}

unsafe extern "C" fn pendsv_switch_context(saved_sp: OsStkPtr) -> OsStkPtr {
    handlers::switch_context(&PORT, &mut CortexM3, unsafe { bound_scheduler() }, saved_sp)
}

/// PendSV exception handler - performs full context switch
///
/// 1. Save r4-r11 to the current task's PSP
/// 2. Store PSP in the outgoing TCB, select the next task under BASEPRI
/// 3. Restore r4-r11 from the new task's stack
/// 4. Exception return
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "isb",
        "stmdb r0!, {{r4-r11}}",

        // r3 keeps the main stack 8-byte aligned across the call
        "push {{r3, lr}}",
        "bl {switch}",
        "pop {{r3, lr}}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "isb",
        "bx lr",

        switch = sym pendsv_switch_context,
    );
}

/// SysTick interrupt handler
#[no_mangle]
pub extern "C" fn SysTick() {
    handlers::tick(&PORT, &mut CortexM3, unsafe { bound_scheduler() });
}
