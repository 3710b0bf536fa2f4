//! Critical section protected cell
//!
//! Holds state shared between task level and the kernel exception handlers.
//! Task level goes through a [`CriticalSection`]; the handlers, which
//! nothing that touches the cell can preempt, use
//! [`get_in_handler`](CsCell::get_in_handler).

use core::cell::UnsafeCell;
use core::mem;

use crate::critical::CriticalSection;

/// Port state shared with the kernel exception handlers
pub struct CsCell<T>(UnsafeCell<T>);

// Single core, and every access is either under a critical section or from a
// kernel handler
unsafe impl<T> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Borrow the value for the duration of a critical section
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn get<'cs>(&'cs self, _cs: &'cs CriticalSection) -> &'cs mut T {
        unsafe { &mut *self.0.get() }
    }

    /// Store `value`, returning what was there before
    #[inline(always)]
    pub fn replace(&self, cs: &CriticalSection, value: T) -> T {
        mem::replace(self.get(cs), value)
    }

    /// Borrow the value from a kernel exception handler
    ///
    /// # Safety
    /// Only PendSV, SysTick and SVCall may call this. They share one
    /// priority, so none of them runs while another holds the borrow, and
    /// task level cannot run until they return.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_in_handler(&self) -> &mut T {
        unsafe { &mut *self.0.get() }
    }
}
