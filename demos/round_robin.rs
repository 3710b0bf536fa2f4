//! Round Robin Example - two tasks sharing a Cortex-M3 through the port
//!
//! A minimal scheduler alternates between two tasks on every tenth tick and
//! whenever a task yields. Needs a `memory.x` for the board when linking.
//! On non-ARM hosts this builds to an empty program.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
use core::cell::UnsafeCell;
#[cfg(target_arch = "arm")]
use core::ptr::{self, addr_of_mut, NonNull};

#[cfg(target_arch = "arm")]
use cm3port::port::{os_ctx_sw, os_start_scheduler, os_task_stk_init, Cpu};
#[cfg(target_arch = "arm")]
use cm3port::task::{OsTaskFn, OsTcb, Scheduler};
#[cfg(target_arch = "arm")]
use cm3port::types::{OsStkElement, OsStkPtr};
#[cfg(target_arch = "arm")]
use cortex_m_rt::entry;

// ============ Scheduler ============

#[cfg(target_arch = "arm")]
const TASK_COUNT: usize = 2;

#[cfg(target_arch = "arm")]
const SLICE_TICKS: u32 = 10;

#[cfg(target_arch = "arm")]
struct RoundRobin {
    tcbs: [UnsafeCell<OsTcb>; TASK_COUNT],
    current: usize,
    ticks: u32,
}

#[cfg(target_arch = "arm")]
unsafe impl Scheduler for RoundRobin {
    fn current_tcb(&self) -> NonNull<OsTcb> {
        // UnsafeCell::get never returns null
        unsafe { NonNull::new_unchecked(self.tcbs[self.current].get()) }
    }

    fn switch_context(&mut self) {
        self.current = (self.current + 1) % TASK_COUNT;
    }

    fn increment_tick(&mut self, cpu: &mut dyn Cpu) {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % SLICE_TICKS == 0 {
            cpu.pend_context_switch();
        }
    }
}

// ============ Task Storage ============

#[cfg(target_arch = "arm")]
const STK_SIZE: usize = 256;

#[cfg(target_arch = "arm")]
static mut PING_STK: [OsStkElement; STK_SIZE] = [0; STK_SIZE];
#[cfg(target_arch = "arm")]
static mut PONG_STK: [OsStkElement; STK_SIZE] = [0; STK_SIZE];

#[cfg(target_arch = "arm")]
static mut SCHED: RoundRobin = RoundRobin {
    tcbs: [UnsafeCell::new(OsTcb::new()), UnsafeCell::new(OsTcb::new())],
    current: 0,
    ticks: 0,
};

// ============ Tasks ============

#[cfg(target_arch = "arm")]
extern "C" fn ping(_: *mut ()) -> ! {
    cm3port::info!("ping task started");
    loop {
        cm3port::info!("ping");
        os_ctx_sw();
    }
}

#[cfg(target_arch = "arm")]
extern "C" fn pong(_: *mut ()) -> ! {
    cm3port::info!("pong task started");
    loop {
        cm3port::info!("pong");
        cortex_m::asm::wfi();
    }
}

/// Build the first frame of `task` on `stk` and store it in `tcb`
///
/// # Safety
/// `stk` must be a stack no other task uses.
#[cfg(target_arch = "arm")]
unsafe fn prepare_task(tcb: &UnsafeCell<OsTcb>, stk: *mut OsStkElement, task: OsTaskFn) {
    let top = unsafe { stk.add(STK_SIZE) };
    let sp = unsafe { os_task_stk_init(top, task, ptr::null_mut()) };
    unsafe { (*tcb.get()).stk_ptr = sp as usize as OsStkPtr };
}

// ============ Main ============

#[cfg(target_arch = "arm")]
#[entry]
fn main() -> ! {
    let sched = unsafe { &mut *addr_of_mut!(SCHED) };

    unsafe {
        prepare_task(&sched.tcbs[0], addr_of_mut!(PING_STK).cast(), ping);
        prepare_task(&sched.tcbs[1], addr_of_mut!(PONG_STK).cast(), pong);
    }

    cm3port::info!("Starting scheduler");
    match os_start_scheduler(sched) {
        Ok(never) => match never {},
        Err(_err) => {
            cm3port::error!("scheduler start failed: {}", _err);
            loop { cortex_m::asm::wfi(); }
        }
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
