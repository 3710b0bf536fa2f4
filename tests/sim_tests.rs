//! Port behaviour on the simulated core
//!
//! The exception handlers run step by step on [`SimCpu`] against a small
//! round-robin scheduler.

use core::ptr::NonNull;

use cm3port::config::PortConfig;
use cm3port::port::frame::{init_stack, StackFrame};
use cm3port::port::sim::{Mode, SimCpu, RAM_BASE, RAM_END};
use cm3port::port::timer::{SYST_CSR, SYST_CVR, SYST_RVR};
use cm3port::port::{Cpu, SCB_SHPR3};
use cm3port::task::{OsTcb, Scheduler};
use cm3port::types::{KernelHandler, OsIntPrio, OsStkPtr};
use cm3port::{OsError, PortState};

const TASK_A_TOP: u32 = RAM_BASE + 0x1000;
const TASK_B_TOP: u32 = RAM_BASE + 0x1800;
const TASK_A_ENTRY: u32 = 0x0800_0401;
const TASK_B_ENTRY: u32 = 0x0800_0801;
const TASK_EXIT: u32 = 0x0800_0F01;

/// Round-robin over a fixed set of TCBs
struct RoundRobin {
    tcbs: Vec<NonNull<OsTcb>>,
    current: usize,
    switches: usize,
    ticks: usize,
    pend_on_tick: bool,
    clobber_basepri: Option<OsIntPrio>,
    basepri_in_tick: Option<OsIntPrio>,
}

impl RoundRobin {
    fn new(stacks: &[OsStkPtr]) -> Self {
        let tcbs = stacks
            .iter()
            .map(|&sp| NonNull::from(Box::leak(Box::new(OsTcb::with_stack(sp)))))
            .collect();
        RoundRobin {
            tcbs,
            current: 0,
            switches: 0,
            ticks: 0,
            pend_on_tick: false,
            clobber_basepri: None,
            basepri_in_tick: None,
        }
    }

    fn stk_ptr(&self, index: usize) -> OsStkPtr {
        unsafe { self.tcbs[index].as_ref().stk_ptr }
    }
}

unsafe impl Scheduler for RoundRobin {
    fn current_tcb(&self) -> NonNull<OsTcb> {
        self.tcbs[self.current]
    }

    fn switch_context(&mut self) {
        self.current = (self.current + 1) % self.tcbs.len();
        self.switches += 1;
    }

    fn increment_tick(&mut self, cpu: &mut dyn Cpu) {
        self.ticks += 1;
        self.basepri_in_tick = Some(cpu.basepri());
        if let Some(value) = self.clobber_basepri {
            cpu.set_basepri(value);
        }
        if self.pend_on_tick {
            cpu.pend_context_switch();
        }
    }
}

/// Two tasks with fresh frames, scheduler started, task A running
fn launch_two_tasks() -> (SimCpu, PortState, RoundRobin) {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();

    let a = init_stack(&mut cpu, TASK_A_TOP, TASK_A_ENTRY, 0xAAAA_0001, TASK_EXIT);
    let b = init_stack(&mut cpu, TASK_B_TOP, TASK_B_ENTRY, 0xBBBB_0002, TASK_EXIT);
    let mut sched = RoundRobin::new(&[a, b]);

    port.prepare_start(&mut cpu, &PortConfig::DEFAULT).unwrap();
    cpu.start_first_task(&mut sched);

    (cpu, port, sched)
}

fn assert_fresh_task(cpu: &SimCpu, entry: u32, arg: u32, top: u32) {
    assert_eq!(cpu.mode, Mode::Thread);
    assert!(cpu.psp_selected);
    assert_eq!(cpu.regs.pc, entry & !1);
    assert_eq!(cpu.regs.r[0], arg);
    assert_eq!(cpu.regs.lr, TASK_EXIT);
    assert_ne!(cpu.regs.xpsr & (1 << 24), 0);
    assert_eq!(cpu.regs.psp, top);

    let sentinels = [
        0x0404_0404, 0x0505_0505, 0x0606_0606, 0x0707_0707,
        0x0808_0808, 0x0909_0909, 0x1010_1010, 0x1111_1111,
    ];
    assert_eq!(&cpu.regs.r[4..12], &sentinels);
    assert_eq!(cpu.regs.r[1], 0x0101_0101);
    assert_eq!(cpu.regs.r[2], 0x0202_0202);
    assert_eq!(cpu.regs.r[3], 0x0303_0303);
    assert_eq!(cpu.regs.r[12], 0x1212_1212);
}

// ============ Frame builder ============

#[test]
fn test_stack_frame_size_and_alignment() {
    let mut cpu = SimCpu::new(4);

    let sp = init_stack(&mut cpu, TASK_A_TOP, TASK_A_ENTRY, 0, TASK_EXIT);
    assert_eq!(sp, TASK_A_TOP - 64);

    // Top rounded down to 8 bytes first
    let sp = init_stack(&mut cpu, TASK_B_TOP + 4, TASK_B_ENTRY, 0, TASK_EXIT);
    assert_eq!(sp, TASK_B_TOP - 64);
    assert_eq!(sp % 8, 0);

    let frame = StackFrame::read(&cpu, sp);
    assert_eq!(frame, StackFrame::initial(TASK_B_ENTRY, 0, TASK_EXIT));
}

#[test]
fn test_first_task_launch() {
    let (cpu, port, sched) = launch_two_tasks();

    assert_fresh_task(&cpu, TASK_A_ENTRY, 0xAAAA_0001, TASK_A_TOP);
    assert_eq!(sched.current, 0);
    assert_eq!(sched.switches, 0);

    // Launch leaves everything unmasked
    assert_eq!(cpu.basepri, 0);
    assert!(!cpu.primask);
    assert!(!cpu.faultmask);
    assert_eq!(port.critical_nesting(), 0);

    // Main stack reset to the vector table value
    assert_eq!(cpu.regs.msp, RAM_END);
}

// ============ Context switch ============

#[test]
fn test_pendsv_switch_and_back() {
    let (mut cpu, port, mut sched) = launch_two_tasks();

    // Task A runs for a while
    for i in 0..13 {
        cpu.regs.r[i] = 0xA000_0000 + i as u32;
    }
    cpu.regs.lr = 0x0800_0455;
    cpu.regs.pc = 0x0800_0460;
    cpu.regs.psp -= 24;
    let a_regs = cpu.regs;
    let b_frame = StackFrame::read(&cpu, sched.stk_ptr(1));

    cpu.pend_context_switch();
    assert!(cpu.service_pending(&port, &mut sched));
    assert_eq!(sched.current, 1);

    // Outgoing stack pointer: hardware frame plus r4-r11
    assert_eq!(sched.stk_ptr(0), a_regs.psp - 64);

    // B starts from its untouched initial image
    assert_eq!(b_frame, StackFrame::initial(TASK_B_ENTRY, 0xBBBB_0002, TASK_EXIT));
    assert_fresh_task(&cpu, TASK_B_ENTRY, 0xBBBB_0002, TASK_B_TOP);
    assert_eq!(cpu.basepri, 0);

    // A's saved frame holds exactly its registers
    let a_frame = StackFrame::read(&cpu, sched.stk_ptr(0));
    assert_eq!(a_frame.r4, a_regs.r[4]);
    assert_eq!(a_frame.r11, a_regs.r[11]);
    assert_eq!(a_frame.r0, a_regs.r[0]);
    assert_eq!(a_frame.r12, a_regs.r[12]);
    assert_eq!(a_frame.lr, a_regs.lr);
    assert_eq!(a_frame.pc, a_regs.pc);
    assert_eq!(a_frame.xpsr, a_regs.xpsr);

    // B does some work, then yields back
    cpu.regs.r[5] = 0xB5B5_B5B5;
    cpu.pend_context_switch();
    assert!(cpu.service_pending(&port, &mut sched));
    assert_eq!(sched.current, 0);
    assert_eq!(sched.switches, 2);

    assert_eq!(cpu.regs, a_regs);
    assert_eq!(StackFrame::read(&cpu, sched.stk_ptr(1)).r5, 0xB5B5_B5B5);
}

#[test]
fn test_pendsv_deferred_by_critical_section() {
    let (mut cpu, port, mut sched) = launch_two_tasks();

    port.enter_critical(&mut cpu);
    cpu.pend_context_switch();
    assert!(!cpu.service_pending(&port, &mut sched));
    assert_eq!(sched.current, 0);

    port.exit_critical(&mut cpu);
    assert!(cpu.service_pending(&port, &mut sched));
    assert_eq!(sched.current, 1);
    assert!(!cpu.pendsv_pending);
}

#[test]
fn test_pendsv_deferred_by_basepri() {
    let (mut cpu, port, mut sched) = launch_two_tasks();

    // PendSV sits at 0xF0, masked by anything at or below it
    cpu.set_basepri(0xB0);
    cpu.pend_context_switch();
    assert!(!cpu.service_pending(&port, &mut sched));

    cpu.set_basepri(0);
    assert!(cpu.service_pending(&port, &mut sched));
}

// ============ Tick ============

#[test]
fn test_tick_counts_and_masks() {
    let (mut cpu, port, mut sched) = launch_two_tasks();

    assert!(cpu.take_systick(&port, &mut sched));
    assert!(cpu.take_systick(&port, &mut sched));

    assert_eq!(port.tick_get(), 2);
    assert_eq!(sched.ticks, 2);
    assert_eq!(sched.basepri_in_tick, Some(0xB0));
    assert_eq!(cpu.basepri, 0);
    // No switch unless the scheduler asks
    assert_eq!(sched.switches, 0);
    assert_eq!(cpu.mode, Mode::Thread);
}

#[test]
fn test_tick_pends_switch() {
    let (mut cpu, port, mut sched) = launch_two_tasks();
    sched.pend_on_tick = true;

    assert!(cpu.take_systick(&port, &mut sched));

    assert_eq!(sched.switches, 1);
    assert_eq!(sched.current, 1);
    assert_fresh_task(&cpu, TASK_B_ENTRY, 0xBBBB_0002, TASK_B_TOP);
}

#[test]
fn test_tick_held_off_by_critical_section() {
    let (mut cpu, port, mut sched) = launch_two_tasks();
    sched.pend_on_tick = true;

    port.enter_critical(&mut cpu);
    assert!(!cpu.take_systick(&port, &mut sched));
    assert_eq!(port.tick_get(), 0);
    assert_eq!(sched.ticks, 0);
    assert_eq!(sched.switches, 0);
    assert_eq!(port.critical_nesting(), 1);

    port.exit_critical(&mut cpu);
    assert!(cpu.take_systick(&port, &mut sched));
    assert_eq!(port.tick_get(), 1);
    assert_eq!(sched.switches, 1);
}

#[test]
fn test_tick_held_off_by_basepri() {
    let (mut cpu, port, mut sched) = launch_two_tasks();

    // SysTick sits at 0xF0 like PendSV
    cpu.set_basepri(0xB0);
    assert!(!cpu.take_systick(&port, &mut sched));
    assert_eq!(sched.ticks, 0);

    cpu.set_basepri(0);
    assert!(cpu.take_systick(&port, &mut sched));
    assert_eq!(sched.ticks, 1);
}

#[quickcheck_macros::quickcheck]
fn tick_restores_basepri(clobber: Option<u8>, before: u8) -> bool {
    let (mut cpu, port, mut sched) = launch_two_tasks();
    sched.clobber_basepri = clobber;

    cpu.set_basepri(before);
    let before = cpu.basepri;

    cpu.exception_entry(KernelHandler::SysTick.exception_number());
    cm3port::port::handlers::tick(&port, &mut cpu, &mut sched);
    cpu.exception_return();

    cpu.basepri == before && sched.ticks == 1
}

// ============ Critical sections ============

#[quickcheck_macros::quickcheck]
fn critical_nesting_tracks_interrupt_mask(ops: Vec<bool>) -> bool {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();
    port.prepare_start(&mut cpu, &PortConfig::DEFAULT).unwrap();

    let mut depth = 0u32;
    for enter in ops {
        if enter {
            port.enter_critical(&mut cpu);
            depth += 1;
        } else if depth > 0 {
            port.exit_critical(&mut cpu);
            depth -= 1;
        }

        if port.critical_nesting() != depth {
            return false;
        }
        if cpu.interrupts_enabled() != (depth == 0) {
            return false;
        }
    }
    true
}

#[test]
fn test_critical_before_start_keeps_interrupts_off() {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();
    assert_eq!(port.critical_nesting(), cm3port::kernel::CRITICAL_NESTING_UNINIT);

    port.enter_critical(&mut cpu);
    port.exit_critical(&mut cpu);

    assert!(!cpu.interrupts_enabled());
    assert_eq!(port.critical_nesting(), cm3port::kernel::CRITICAL_NESTING_UNINIT);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "without matching enter")]
fn test_critical_exit_underflow() {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();
    port.prepare_start(&mut cpu, &PortConfig::DEFAULT).unwrap();

    port.exit_critical(&mut cpu);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "from an ISR")]
fn test_critical_enter_from_isr() {
    let (mut cpu, port, _sched) = launch_two_tasks();

    cpu.exception_entry(KernelHandler::SysTick.exception_number());
    port.enter_critical(&mut cpu);
}

#[test]
fn test_isr_mask_helpers() {
    use cm3port::critical::{
        clear_interrupt_mask_from_isr, is_isr_context, set_interrupt_mask_from_isr,
    };

    let (mut cpu, port, _sched) = launch_two_tasks();
    assert!(!is_isr_context(&cpu));

    cpu.exception_entry(KernelHandler::SysTick.exception_number());
    assert!(is_isr_context(&cpu));

    cpu.set_basepri(0x40);
    let saved = set_interrupt_mask_from_isr(&port, &mut cpu);
    assert_eq!(saved, 0x40);
    assert_eq!(cpu.basepri, port.basepri_ceiling());

    clear_interrupt_mask_from_isr(&mut cpu, saved);
    assert_eq!(cpu.basepri, 0x40);
}

// ============ Scheduler bootstrap ============

#[test]
fn test_prepare_start_programs_hardware() {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();
    assert!(!port.is_running());

    let setup = port.prepare_start(&mut cpu, &PortConfig::DEFAULT).unwrap();

    // 255 reads back as 0xF0 with four priority bits
    assert_eq!(cpu.read_word(SCB_SHPR3), 0xF0F0_0000);
    assert_eq!(cpu.handler_priority(KernelHandler::PendSV), 0xF0);
    assert_eq!(cpu.handler_priority(KernelHandler::SysTick), 0xF0);

    assert_eq!(setup.reload, 71_999);
    assert_eq!(cpu.read_word(SYST_RVR), 71_999);
    assert_eq!(cpu.read_word(SYST_CVR), 0);
    assert_eq!(cpu.read_word(SYST_CSR), 0b111);

    // Kernel-aware interrupts stay masked until the first task runs
    assert_eq!(cpu.basepri, 0xB0);
    assert_eq!(port.basepri_ceiling(), 0xB0);

    assert_eq!(port.critical_nesting(), 0);
    assert!(port.is_running());
}

#[test]
fn test_prepare_start_twice() {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();

    port.prepare_start(&mut cpu, &PortConfig::DEFAULT).unwrap();
    assert_eq!(
        port.prepare_start(&mut cpu, &PortConfig::DEFAULT),
        Err(OsError::OsRunning)
    );
}

#[test]
fn test_prepare_start_rejects_bad_config() {
    let configs = [
        (
            PortConfig { max_syscall_interrupt_priority: 0x08, ..PortConfig::DEFAULT },
            OsError::SyscallPrioInvalid,
        ),
        (
            PortConfig { kernel_interrupt_priority: 0x20, ..PortConfig::DEFAULT },
            OsError::PrioInvalid,
        ),
        (
            PortConfig { tick_rate_hz: 0, ..PortConfig::DEFAULT },
            OsError::TickRateInvalid,
        ),
    ];

    for (config, expected) in configs {
        let mut cpu = SimCpu::new(4);
        let port = PortState::new();

        assert_eq!(port.prepare_start(&mut cpu, &config), Err(expected));

        // Nothing programmed
        assert_eq!(cpu.read_word(SCB_SHPR3), 0);
        assert_eq!(cpu.read_word(SYST_CSR), 0);
        assert_eq!(cpu.basepri, 0);
        assert_eq!(port.critical_nesting(), cm3port::kernel::CRITICAL_NESTING_UNINIT);
        assert!(!port.is_running());
    }
}

#[test]
fn test_start_binds_scheduler_once_accepted() {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();

    let a = init_stack(&mut cpu, TASK_A_TOP, TASK_A_ENTRY, 0, TASK_EXIT);
    let b = init_stack(&mut cpu, TASK_B_TOP, TASK_B_ENTRY, 0, TASK_EXIT);
    let mut first = RoundRobin::new(&[a]);
    let mut second = RoundRobin::new(&[b]);
    let first_tcb = first.current_tcb();

    let mut slot: Option<&mut dyn Scheduler> = None;
    let mut binds = 0;

    port.prepare_start_with(&mut cpu, &PortConfig::DEFAULT, || {
        binds += 1;
        slot = Some(&mut first as &mut dyn Scheduler);
    })
    .unwrap();
    assert_eq!(binds, 1);

    // A second start is refused without touching the binding
    assert_eq!(
        port.prepare_start_with(&mut cpu, &PortConfig::DEFAULT, || {
            binds += 1;
            slot = Some(&mut second as &mut dyn Scheduler);
        }),
        Err(OsError::OsRunning)
    );
    assert_eq!(binds, 1);

    let bound = slot.unwrap();
    assert_eq!(bound.current_tcb(), first_tcb);
}

#[test]
fn test_rejected_start_does_not_bind() {
    let mut cpu = SimCpu::new(4);
    let port = PortState::new();
    let config = PortConfig { tick_rate_hz: 0, ..PortConfig::DEFAULT };

    let mut bound = false;
    assert_eq!(
        port.prepare_start_with(&mut cpu, &config, || bound = true),
        Err(OsError::TickRateInvalid)
    );
    assert!(!bound);
    assert_eq!(cpu.read_word(SYST_CSR), 0);

    // Nothing is left half-started, so a corrected start still goes through
    port.prepare_start_with(&mut cpu, &PortConfig::DEFAULT, || bound = true)
        .unwrap();
    assert!(bound);
    assert!(port.is_running());
}

#[test]
fn test_prepare_start_separate_clock() {
    let mut cpu = SimCpu::new(3);
    let port = PortState::new();
    let config = PortConfig {
        systick_clock_hz: Some(9_000_000),
        max_syscall_interrupt_priority: 0xA0,
        ..PortConfig::DEFAULT
    };

    port.prepare_start(&mut cpu, &config).unwrap();

    assert_eq!(cpu.read_word(SYST_RVR), 8_999);
    assert_eq!(cpu.read_word(SYST_CSR), 0b011);
    assert_eq!(cpu.read_word(SCB_SHPR3), 0xE0E0_0000);
    assert_eq!(cpu.basepri, 0xA0);
}
