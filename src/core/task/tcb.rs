//! Task Control Block prefix
//!
//! The scheduler owns the full TCB. The port only relies on its first field.

use crate::types::OsStkPtr;

/// Port-visible head of a Task Control Block
///
/// A scheduler's own TCB type must be `#[repr(C)]` and start with this
/// struct (or a bare `OsStkPtr`), so a pointer to the TCB is also a pointer
/// to the saved stack pointer. The exception handlers read and write
/// `stk_ptr` and nothing else.
#[repr(C)]
#[derive(Debug)]
pub struct OsTcb {
    /// Lowest word of the task's saved frame while it is not running
    pub stk_ptr: OsStkPtr,
}

impl OsTcb {
    /// Create a TCB head with no saved stack
    pub const fn new() -> Self {
        OsTcb { stk_ptr: 0 }
    }

    /// Create a TCB head for a stack prepared by the frame builder
    pub const fn with_stack(stk_ptr: OsStkPtr) -> Self {
        OsTcb { stk_ptr }
    }
}

impl Default for OsTcb {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for OsTcb {}
unsafe impl Sync for OsTcb {}
