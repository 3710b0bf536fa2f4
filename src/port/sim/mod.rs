//! Software model of the Cortex-M3 core
//!
//! Stands in for the target on host builds. It models just enough of the
//! ARMv7-M exception machinery to run the port's handlers step by step:
//! the register file, both stack pointers, PRIMASK/FAULTMASK/BASEPRI,
//! hardware stacking on exception entry and unstacking on exception return,
//! a small RAM and a handful of memory-mapped registers.
//!
//! Nested exceptions are not modelled; every exception is taken from
//! thread mode.

use crate::config::unimplemented_prio_mask;
use crate::kernel::PortState;
use crate::port::frame::HW_FRAME_WORDS;
use crate::port::handlers::{self, EXC_RETURN_HANDLER, EXC_RETURN_PSP_BITS,
    EXC_RETURN_THREAD_MSP, EXC_RETURN_THREAD_PSP};
use crate::port::timer::{SysTickSetup, SYST_CSR, SYST_CVR, SYST_RVR};
use crate::port::{Cpu, SCB_SHPR3, SCB_VTOR};
use crate::task::Scheduler;
use crate::types::{KernelHandler, OsAddr, OsIntPrio, OsStkPtr};

/// Start of simulated SRAM
pub const RAM_BASE: OsAddr = 0x2000_0000;
/// Size of simulated SRAM in words
pub const RAM_WORDS: usize = 2048;
/// One past the end of simulated SRAM
pub const RAM_END: OsAddr = RAM_BASE + (RAM_WORDS as u32) * 4;
/// Where the simulated vector table lives
pub const VECTOR_TABLE_BASE: OsAddr = 0x0800_0000;

/// SVCall exception number
pub const EXC_SVCALL: u8 = 11;

const MMIO_SLOTS: usize = 16;

/// Core registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterFile {
    /// r0-r12
    pub r: [u32; 13],
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
    pub msp: u32,
    pub psp: u32,
}

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Thread,
    /// Running the handler of the given exception number
    Handler(u8),
}

/// Simulated Cortex-M3
pub struct SimCpu {
    pub regs: RegisterFile,
    pub primask: bool,
    pub faultmask: bool,
    pub basepri: OsIntPrio,
    /// CONTROL.SPSEL: thread mode runs on PSP
    pub psp_selected: bool,
    pub mode: Mode,
    pub pendsv_pending: bool,
    prio_bits: u8,
    ram: [u32; RAM_WORDS],
    mmio: [(OsAddr, u32); MMIO_SLOTS],
    mmio_len: usize,
}

impl SimCpu {
    /// Core fresh out of reset: thread mode on MSP, interrupts enabled,
    /// VTOR pointing at a vector table whose first word is the top of RAM.
    ///
    /// `prio_bits` is the number of NVIC priority bits to model.
    pub fn new(prio_bits: u8) -> Self {
        let mut cpu = SimCpu {
            regs: RegisterFile::default(),
            primask: false,
            faultmask: false,
            basepri: 0,
            psp_selected: false,
            mode: Mode::Thread,
            pendsv_pending: false,
            prio_bits,
            ram: [0; RAM_WORDS],
            mmio: [(0, 0); MMIO_SLOTS],
            mmio_len: 0,
        };
        cpu.write_word(SCB_VTOR, VECTOR_TABLE_BASE);
        cpu.write_word(VECTOR_TABLE_BASE, RAM_END);
        // Startup code has already used some of the main stack
        cpu.regs.msp = RAM_END - 0x100;
        cpu
    }

    fn ram_index(addr: OsAddr) -> Option<usize> {
        if addr >= RAM_BASE && addr < RAM_END {
            assert!(addr % 4 == 0, "unaligned word access at {:#010x}", addr);
            Some(((addr - RAM_BASE) / 4) as usize)
        } else {
            None
        }
    }

    fn mmio_slot(&self, addr: OsAddr) -> Option<usize> {
        self.mmio[..self.mmio_len].iter().position(|&(a, _)| a == addr)
    }

    /// `stmdb r0!, {r4-r11}`
    pub fn push_callee_saved(&mut self, sp: OsStkPtr) -> OsStkPtr {
        let sp = sp - 8 * 4;
        for i in 0..8 {
            let value = self.regs.r[4 + i];
            self.write_word(sp + i as u32 * 4, value);
        }
        sp
    }

    /// `ldmia r0!, {r4-r11}`
    pub fn pop_callee_saved(&mut self, sp: OsStkPtr) -> OsStkPtr {
        for i in 0..8 {
            self.regs.r[4 + i] = self.read_word(sp + i as u32 * 4);
        }
        sp + 8 * 4
    }

    /// Hardware side of taking exception `number`: stack r0-r3, r12, lr, pc,
    /// xPSR on the active stack and load EXC_RETURN into lr.
    pub fn exception_entry(&mut self, number: u8) {
        assert_eq!(self.mode, Mode::Thread, "nested exceptions are not modelled");

        let on_psp = self.psp_selected;
        let mut sp = if on_psp { self.regs.psp } else { self.regs.msp };
        sp -= HW_FRAME_WORDS as u32 * 4;

        let r = self.regs;
        let words = [r.r[0], r.r[1], r.r[2], r.r[3], r.r[12], r.lr, r.pc, r.xpsr];
        for (i, word) in words.iter().enumerate() {
            self.write_word(sp + i as u32 * 4, *word);
        }

        if on_psp {
            self.regs.psp = sp;
            self.regs.lr = EXC_RETURN_THREAD_PSP;
        } else {
            self.regs.msp = sp;
            self.regs.lr = EXC_RETURN_THREAD_MSP;
        }
        self.mode = Mode::Handler(number);
    }

    /// `bx lr` with an EXC_RETURN value in lr: unstack the hardware frame
    /// from the stack EXC_RETURN selects and resume in thread mode.
    pub fn exception_return(&mut self) {
        let exc_return = self.regs.lr;
        let on_psp = match exc_return {
            EXC_RETURN_THREAD_PSP => true,
            EXC_RETURN_THREAD_MSP => false,
            EXC_RETURN_HANDLER => panic!("return to handler mode is not modelled"),
            other => panic!("bx lr with invalid EXC_RETURN {:#010x}", other),
        };

        let sp = if on_psp { self.regs.psp } else { self.regs.msp };
        let mut words = [0u32; HW_FRAME_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.read_word(sp + i as u32 * 4);
        }
        let sp = sp + HW_FRAME_WORDS as u32 * 4;

        self.regs.r[0] = words[0];
        self.regs.r[1] = words[1];
        self.regs.r[2] = words[2];
        self.regs.r[3] = words[3];
        self.regs.r[12] = words[4];
        self.regs.lr = words[5];
        self.regs.pc = words[6];
        self.regs.xpsr = words[7];

        if on_psp {
            self.regs.psp = sp;
        } else {
            self.regs.msp = sp;
        }
        self.psp_selected = on_psp;
        self.mode = Mode::Thread;
    }

    /// Priority byte of a kernel exception, as read back from SHPR3
    pub fn handler_priority(&self, handler: KernelHandler) -> OsIntPrio {
        (self.read_word(SCB_SHPR3) >> handler.shpr3_shift()) as OsIntPrio
    }

    /// Whether a pending exception with `priority` would be taken now
    fn can_preempt(&self, priority: OsIntPrio) -> bool {
        !self.primask
            && !self.faultmask
            && self.mode == Mode::Thread
            && (self.basepri == 0 || priority < self.basepri)
    }

    /// Bootstrap trap: reload MSP from the vector table, enable interrupts
    /// and faults, then `svc 0` into the SVC handler.
    pub fn start_first_task(&mut self, sched: &mut dyn Scheduler) {
        let vector_table = self.read_word(SCB_VTOR);
        self.regs.msp = self.read_word(vector_table);

        self.primask = false;
        self.faultmask = false;

        self.exception_entry(EXC_SVCALL);
        self.svc_handler(sched);
    }

    /// SVC handler: load the first task's r4-r11 and PSP, unmask BASEPRI,
    /// return to thread mode on PSP.
    pub fn svc_handler(&mut self, sched: &mut dyn Scheduler) {
        let sp = handlers::current_task_stack(sched);
        let sp = self.pop_callee_saved(sp);
        self.regs.psp = sp;
        self.set_basepri(0);
        self.regs.lr |= EXC_RETURN_PSP_BITS;
        self.exception_return();
    }

    /// PendSV handler, steps (a)-(h)
    pub fn pendsv_handler(&mut self, port: &PortState, sched: &mut dyn Scheduler) {
        let sp = self.regs.psp;
        let sp = self.push_callee_saved(sp);

        // The real trampoline keeps lr on the main stack across the call
        let exc_return = self.regs.lr;
        let sp = handlers::switch_context(port, self, sched, sp);
        self.regs.lr = exc_return;

        let sp = self.pop_callee_saved(sp);
        self.regs.psp = sp;
        self.exception_return();
    }

    /// Take the PendSV exception now
    pub fn take_pendsv(&mut self, port: &PortState, sched: &mut dyn Scheduler) {
        self.pendsv_pending = false;
        self.exception_entry(KernelHandler::PendSV.exception_number());
        self.pendsv_handler(port, sched);
    }

    /// Fire SysTick: take the exception if the current masks allow it, then
    /// run PendSV if the tick pended it. Returns whether the tick was taken.
    pub fn take_systick(&mut self, port: &PortState, sched: &mut dyn Scheduler) -> bool {
        if !self.can_preempt(self.handler_priority(KernelHandler::SysTick)) {
            return false;
        }

        self.exception_entry(KernelHandler::SysTick.exception_number());
        handlers::tick(port, self, sched);
        self.exception_return();
        self.service_pending(port, sched);
        true
    }

    /// Run a pending PendSV if the current masks allow it. Returns whether
    /// it ran.
    pub fn service_pending(&mut self, port: &PortState, sched: &mut dyn Scheduler) -> bool {
        if self.pendsv_pending && self.can_preempt(self.handler_priority(KernelHandler::PendSV)) {
            self.take_pendsv(port, sched);
            true
        } else {
            false
        }
    }
}

impl Cpu for SimCpu {
    fn read_word(&self, addr: OsAddr) -> u32 {
        match Self::ram_index(addr) {
            Some(i) => self.ram[i],
            None => self.mmio_slot(addr).map_or(0, |i| self.mmio[i].1),
        }
    }

    fn write_word(&mut self, addr: OsAddr, value: u32) {
        if let Some(i) = Self::ram_index(addr) {
            self.ram[i] = value;
            return;
        }
        match self.mmio_slot(addr) {
            Some(i) => self.mmio[i].1 = value,
            None => {
                assert!(self.mmio_len < MMIO_SLOTS, "too many simulated registers");
                self.mmio[self.mmio_len] = (addr, value);
                self.mmio_len += 1;
            }
        }
    }

    fn disable_interrupts(&mut self) {
        self.primask = true;
    }

    fn enable_interrupts(&mut self) {
        self.primask = false;
    }

    fn interrupts_enabled(&self) -> bool {
        !self.primask
    }

    fn basepri(&self) -> OsIntPrio {
        self.basepri
    }

    fn set_basepri(&mut self, value: OsIntPrio) {
        self.basepri = value & !unimplemented_prio_mask(self.prio_bits);
    }

    fn active_exception(&self) -> u8 {
        match self.mode {
            Mode::Thread => 0,
            Mode::Handler(n) => n,
        }
    }

    fn priority_bits(&mut self) -> u8 {
        self.prio_bits
    }

    fn set_handler_priority(&mut self, handler: KernelHandler, priority: OsIntPrio) {
        let value = (priority & !unimplemented_prio_mask(self.prio_bits)) as u32;
        let shift = handler.shpr3_shift();
        let shpr3 = self.read_word(SCB_SHPR3);
        self.write_word(SCB_SHPR3, (shpr3 & !(0xFF << shift)) | (value << shift));
    }

    fn configure_systick(&mut self, setup: &SysTickSetup) {
        self.write_word(SYST_RVR, setup.reload);
        self.write_word(SYST_CVR, 0);
        self.write_word(SYST_CSR, setup.ctrl);
    }

    fn pend_context_switch(&mut self) {
        self.pendsv_pending = true;
    }
}
