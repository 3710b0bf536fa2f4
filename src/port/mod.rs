//! Port layer - CPU-specific implementations
//!
//! The exception handlers and the critical section manager are written
//! against the [`Cpu`] trait. The target implementation lives in
//! [`cortex_m3`]; on other architectures a software model of the core,
//! [`sim::SimCpu`], takes its place so the same step sequences can be tested
//! on the host.

pub mod frame;
pub mod handlers;
pub mod timer;

#[cfg(target_arch = "arm")]
pub mod cortex_m3;

#[cfg(target_arch = "arm")]
pub use cortex_m3::*;

#[cfg(not(target_arch = "arm"))]
pub mod sim;

use crate::types::{KernelHandler, OsAddr, OsIntPrio};
use timer::SysTickSetup;

/// Vector Table Offset Register
pub const SCB_VTOR: OsAddr = 0xE000_ED08;
/// System Handler Priority Register 3 (PendSV, SysTick)
pub const SCB_SHPR3: OsAddr = 0xE000_ED20;

/// Minimal platform interface the port needs from the core
///
/// Everything here is a single register access or a single instruction on
/// the real hardware. The trampolines that move r4-r11 and the exception
/// return itself are not part of the trait; they are naked assembly on the
/// target and explicit model steps in the simulator.
pub trait Cpu {
    /// Read a word of memory (stack RAM or a memory-mapped register)
    fn read_word(&self, addr: OsAddr) -> u32;

    /// Write a word of memory (stack RAM or a memory-mapped register)
    fn write_word(&mut self, addr: OsAddr, value: u32);

    /// Set PRIMASK (`cpsid i`)
    fn disable_interrupts(&mut self);

    /// Clear PRIMASK (`cpsie i`)
    fn enable_interrupts(&mut self);

    /// `true` when PRIMASK is clear
    fn interrupts_enabled(&self) -> bool;

    /// Current BASEPRI
    fn basepri(&self) -> OsIntPrio;

    /// Write BASEPRI, followed by the barriers the write needs to take
    /// effect before the next instruction
    fn set_basepri(&mut self, value: OsIntPrio);

    /// Active exception number (IPSR); zero in thread mode
    fn active_exception(&self) -> u8;

    /// Number of priority bits the NVIC implements
    fn priority_bits(&mut self) -> u8;

    /// Program the priority byte of a kernel exception
    fn set_handler_priority(&mut self, handler: KernelHandler, priority: OsIntPrio);

    /// Program and start SysTick
    fn configure_systick(&mut self, setup: &SysTickSetup);

    /// Pend the context-switch exception
    fn pend_context_switch(&mut self);
}
