//! Rotate the destination through several buffers so consecutive calls write code the
//! processor has not just executed.

use super::{Context, Strategy, execute, keep};
use crate::config::CODE_SIZE;
use crate::hw;

/// What to do with a buffer once its code has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterUse {
    Keep,
    Flush,
    FlushOpt,
    Clear,
}

/// Writes to buffer `i mod count` on call `i`. The counter is never reset, so the sequence
/// continues across trials.
#[derive(Debug, Clone)]
pub struct Rotating {
    count: usize,
    cursor: usize,
    after: AfterUse,
}

impl Rotating {
    pub fn new(count: usize, after: AfterUse) -> Self {
        assert!(count > 0, "rotation over zero regions");
        Rotating {
            count,
            cursor: 0,
            after,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Buffer the next call will write to.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Buffer for this call; moves the cursor on.
    pub fn next_index(&mut self) -> usize {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.count;
        index
    }
}

impl Strategy for Rotating {
    fn apply(&mut self, cx: &mut Context) {
        let index = self.next_index();
        let dst = cx.regions.get_mut(index);
        cx.codegen.forward(dst.as_mut_slice(), 0);
        execute(dst);

        let p = dst.as_ptr();
        match self.after {
            AfterUse::Keep => {}
            // SAFETY: every line lies inside the mapped buffer
            AfterUse::Flush => hw::for_each_line(p, CODE_SIZE, |line| unsafe { hw::clflush(line) }),
            // SAFETY: as above; only registered when the processor reports CLFLUSHOPT
            AfterUse::FlushOpt => {
                hw::for_each_line(p, CODE_SIZE, |line| unsafe { hw::clflushopt(line) })
            }
            AfterUse::Clear => {
                dst.as_mut_slice().fill(0);
                keep(p);
            }
        }
    }
}
