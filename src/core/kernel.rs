//! Port-wide state and scheduler bootstrap
//!
//! All mutable state the port owns lives in one [`PortState`]. The target
//! uses the [`PORT`] instance; tests build their own and drive them through
//! the simulator.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::{PortConfig, CFG_MAX_SYSCALL_INTERRUPT_PRIORITY};
use crate::error::{OsError, OsResult};
use crate::port::timer::SysTickSetup;
use crate::port::Cpu;
use crate::types::{KernelHandler, OsIntPrio, OsNestingCtr, OsTick};

/// Nesting counter value before the scheduler starts.
///
/// Critical sections entered during startup push the counter above this
/// value and never bring it back to zero, so interrupts stay disabled until
/// the first task is launched.
pub const CRITICAL_NESTING_UNINIT: OsNestingCtr = 0xAAAA_AAAA;

/// Port-wide state
pub struct PortState {
    pub(crate) critical_nesting: AtomicU32,
    running: AtomicBool,
    basepri_ceiling: AtomicU8,
    tick_counter: AtomicU32,
}

impl PortState {
    pub const fn new() -> Self {
        Self {
            critical_nesting: AtomicU32::new(CRITICAL_NESTING_UNINIT),
            running: AtomicBool::new(false),
            basepri_ceiling: AtomicU8::new(CFG_MAX_SYSCALL_INTERRUPT_PRIORITY),
            tick_counter: AtomicU32::new(0),
        }
    }

    /// Check if the scheduler has been started
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current critical section nesting depth
    #[inline(always)]
    pub fn critical_nesting(&self) -> OsNestingCtr {
        self.critical_nesting.load(Ordering::Relaxed)
    }

    /// BASEPRI value the kernel handlers raise to
    #[inline(always)]
    pub fn basepri_ceiling(&self) -> OsIntPrio {
        self.basepri_ceiling.load(Ordering::Relaxed)
    }

    /// Number of tick interrupts taken since start
    #[inline(always)]
    pub fn tick_get(&self) -> OsTick {
        self.tick_counter.load(Ordering::Relaxed)
    }

    /// Increment and return tick count
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> OsTick {
        self.tick_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Everything the scheduler start does before launching the first task.
    ///
    /// Validates `config` against the hardware, masks kernel-aware
    /// interrupts with BASEPRI (the SVC handler clears it when the first
    /// task starts), moves PendSV and SysTick to the kernel priority, starts
    /// the tick timer and takes the nesting counter out of its startup state.
    ///
    /// # Returns
    /// * `Ok(setup)` - SysTick is running with `setup`
    /// * `Err(OsError::OsRunning)` - Scheduler already started
    /// * `Err(..)` - Configuration rejected; hardware left untouched
    pub fn prepare_start(&self, cpu: &mut dyn Cpu, config: &PortConfig) -> OsResult<SysTickSetup> {
        self.prepare_start_with(cpu, config, || ())
    }

    /// [`prepare_start`](Self::prepare_start) with a hook that runs once the
    /// start is known to go ahead, before any hardware is programmed.
    ///
    /// The target binds the scheduler to the exception handlers here. On any
    /// error `bind` is not called, so a rejected or repeated start leaves the
    /// running scheduler bound.
    pub fn prepare_start_with<F>(
        &self,
        cpu: &mut dyn Cpu,
        config: &PortConfig,
        bind: F,
    ) -> OsResult<SysTickSetup>
    where
        F: FnOnce(),
    {
        if self.is_running() {
            return Err(OsError::OsRunning);
        }

        let prio_bits = cpu.priority_bits();
        config.validate_priorities(prio_bits)?;
        let setup = SysTickSetup::new(config)?;

        // Nesting is still at its startup value, so a critical section in
        // `bind` keeps interrupts off
        bind();

        self.basepri_ceiling
            .store(config.max_syscall_interrupt_priority, Ordering::Relaxed);
        cpu.set_basepri(config.max_syscall_interrupt_priority);

        cpu.set_handler_priority(KernelHandler::PendSV, config.kernel_interrupt_priority);
        cpu.set_handler_priority(KernelHandler::SysTick, config.kernel_interrupt_priority);

        cpu.configure_systick(&setup);

        self.critical_nesting.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        crate::info!(
            "scheduler start: {} priority bits, reload {}, ctrl {=u32:#x}",
            prio_bits,
            setup.reload,
            setup.ctrl
        );

        Ok(setup)
    }
}

impl Default for PortState {
    fn default() -> Self {
        Self::new()
    }
}

/// Global port state instance
pub static PORT: PortState = PortState::new();
