//! Task stack frame layout
//!
//! A suspended task is a 16-word frame on its own stack. The upper eight
//! words are what the core stacks on exception entry; the lower eight are
//! r4-r11, pushed and popped by the context-switch trampoline.

use crate::config::CFG_STK_ALIGN;
use crate::port::Cpu;
use crate::types::{OsAddr, OsStkElement, OsStkPtr};

/// Initial xPSR: only the Thumb bit
pub const INITIAL_XPSR: u32 = 0x0100_0000;

/// Exception return ignores the low bit of the stacked PC; it must be clear
pub const START_ADDRESS_MASK: u32 = 0xFFFF_FFFE;

/// Words stacked by hardware on exception entry
pub const HW_FRAME_WORDS: usize = 8;

/// Words stacked by the context-switch trampoline
pub const SW_FRAME_WORDS: usize = 8;

/// Full frame size in words
pub const CONTEXT_STACK_SIZE: usize = HW_FRAME_WORDS + SW_FRAME_WORDS;

const WORD: u32 = core::mem::size_of::<OsStkElement>() as u32;

/// Saved context, lowest address first
#[repr(C, align(4))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

impl StackFrame {
    /// Frame that starts `entry(arg)` on first switch-in and traps into
    /// `exit` if the task function ever returns.
    ///
    /// Registers with no meaning yet get per-register fill patterns.
    pub const fn initial(entry: OsAddr, arg: u32, exit: OsAddr) -> Self {
        StackFrame {
            r4: 0x0404_0404,
            r5: 0x0505_0505,
            r6: 0x0606_0606,
            r7: 0x0707_0707,
            r8: 0x0808_0808,
            r9: 0x0909_0909,
            r10: 0x1010_1010,
            r11: 0x1111_1111,
            r0: arg,
            r1: 0x0101_0101,
            r2: 0x0202_0202,
            r3: 0x0303_0303,
            r12: 0x1212_1212,
            lr: exit,
            pc: entry & START_ADDRESS_MASK,
            xpsr: INITIAL_XPSR,
        }
    }

    /// Words in memory order (lowest address first)
    pub const fn to_words(&self) -> [u32; CONTEXT_STACK_SIZE] {
        [
            self.r4, self.r5, self.r6, self.r7, self.r8, self.r9, self.r10, self.r11,
            self.r0, self.r1, self.r2, self.r3, self.r12, self.lr, self.pc, self.xpsr,
        ]
    }

    /// Inverse of [`to_words`](Self::to_words)
    pub const fn from_words(w: &[u32; CONTEXT_STACK_SIZE]) -> Self {
        StackFrame {
            r4: w[0],
            r5: w[1],
            r6: w[2],
            r7: w[3],
            r8: w[4],
            r9: w[5],
            r10: w[6],
            r11: w[7],
            r0: w[8],
            r1: w[9],
            r2: w[10],
            r3: w[11],
            r12: w[12],
            lr: w[13],
            pc: w[14],
            xpsr: w[15],
        }
    }

    /// Read the frame whose lowest word is at `sp`
    pub fn read<C: Cpu + ?Sized>(cpu: &C, sp: OsStkPtr) -> Self {
        let mut words = [0u32; CONTEXT_STACK_SIZE];
        for (i, w) in words.iter_mut().enumerate() {
            *w = cpu.read_word(sp + i as u32 * WORD);
        }
        Self::from_words(&words)
    }
}

/// Build the initial frame of a task below `stk_top` and return the stack
/// pointer to store in its TCB.
///
/// `stk_top` is the address just past the stack region; it is rounded down
/// to [`CFG_STK_ALIGN`] first. The caller guarantees the region holds at
/// least [`CONTEXT_STACK_SIZE`] words below that.
pub fn init_stack<C: Cpu + ?Sized>(
    cpu: &mut C,
    stk_top: OsAddr,
    entry: OsAddr,
    arg: u32,
    exit: OsAddr,
) -> OsStkPtr {
    let top = stk_top & !(CFG_STK_ALIGN - 1);
    let sp = top - CONTEXT_STACK_SIZE as u32 * WORD;

    let frame = StackFrame::initial(entry, arg, exit);
    for (i, word) in frame.to_words().iter().enumerate() {
        cpu.write_word(sp + i as u32 * WORD, *word);
    }

    sp
}
