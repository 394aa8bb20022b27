//! # Code generator
//!
//! Emits the trivial instruction stream every strategy writes: a run of `ADD EAX, imm32`
//! (`05 xx xx xx xx`) closed by `RET` (`C3`), written one instruction at a time the way a
//! simple JIT would. Immediates come from a running value transformed by `x -> 2x + 1` after
//! each instruction. That value lives in [`CodeGen`] and is deliberately never reset, so
//! consecutive writes to the same buffer always change its bytes.
//!
//! The module also builds the jump chains used to pollute the instruction stream before a
//! timed write.

use crate::config::CACHE_LINE;

/// `ADD EAX, imm32`
pub const OP_ADD_EAX: u8 = 0x05;
/// `RET`
pub const OP_RET: u8 = 0xC3;
/// `UD2`, as stored little-endian in a `u16`
pub const UD2: u16 = 0x0B0F;
/// `INT3`
pub const OP_INT3: u8 = 0xCC;
/// `JMP rel8`
pub const OP_JMP_REL8: u8 = 0xEB;

/// Opcode plus 4-byte immediate.
pub const INSN_LEN: usize = 5;
/// Room kept at the end of the buffer for the last instruction.
pub const TAIL_MARGIN: usize = 6;

/// Offset of the `RET` written by a generator pass starting at `start` over a `len` byte buffer.
///
/// Both emission orders go through this, so they always agree on where the stream ends.
pub fn terminator_offset(len: usize, start: usize) -> usize {
    let limit = len.saturating_sub(TAIL_MARGIN);
    if start >= limit {
        start
    } else {
        start + (limit - start).div_ceil(INSN_LEN) * INSN_LEN
    }
}

/// Number of `ADD` instructions emitted before the terminator.
pub fn instruction_count(len: usize, start: usize) -> usize {
    (terminator_offset(len, start) - start) / INSN_LEN
}

/// Value the running immediate holds after `steps` applications of `x -> 2x + 1`.
///
/// `f^k(x) = 2^k (x + 1) - 1`, so past 32 steps every bit is set.
pub fn advance(value: u32, steps: usize) -> u32 {
    let scale = u32::try_from(steps)
        .ok()
        .and_then(|s| 1u32.checked_shl(s))
        .unwrap_or(0);
    value.wrapping_add(1).wrapping_mul(scale).wrapping_sub(1)
}

/// Instruction emitter carrying the running immediate across calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeGen {
    base: u32,
}

impl CodeGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a specific running value (tests replay a sequence with this).
    pub fn with_state(base: u32) -> Self {
        CodeGen { base }
    }

    pub fn state(&self) -> u32 {
        self.base
    }

    /// Write the stream from `start` upwards, `RET` last. Returns the terminator offset.
    ///
    /// Panics if `start` is not inside `code`.
    #[inline]
    pub fn forward(&mut self, code: &mut [u8], start: usize) -> usize {
        let limit = code.len().saturating_sub(TAIL_MARGIN);
        let mut offset = start;
        while offset < limit {
            code[offset] = OP_ADD_EAX;
            code[offset + 1..offset + INSN_LEN].copy_from_slice(&self.base.to_le_bytes());
            offset += INSN_LEN;
            self.base = self.base.wrapping_mul(2).wrapping_add(1);
        }
        code[offset] = OP_RET;
        offset
    }

    /// Write the same bytes as [`CodeGen::forward`] from offset 0, but `RET` first and the
    /// instructions in decreasing address order. Returns the terminator offset.
    #[inline]
    pub fn reverse(&mut self, code: &mut [u8]) -> usize {
        let end = terminator_offset(code.len(), 0);
        code[end] = OP_RET;
        let mut slot = end / INSN_LEN;
        let mut p = end;
        while p > 0 {
            p -= INSN_LEN;
            slot -= 1;
            code[p] = OP_ADD_EAX;
            code[p + 1..p + INSN_LEN].copy_from_slice(&advance(self.base, slot).to_le_bytes());
        }
        self.base = advance(self.base, end / INSN_LEN);
        end
    }
}

/// Fill `code` with a chain of short jumps that walks every cache line of it before returning.
///
/// Aligned chains put a 2-byte `JMP rel8` at the start of each 64-byte line. Unaligned chains
/// put it at offset 63 so each jump straddles a line boundary, and only every other line needs
/// one. Returns the entry offset. Everything not on the path is `INT3`.
pub fn jump_chain(code: &mut [u8], unaligned: bool) -> usize {
    code.fill(OP_INT3);
    let (entry, stride) = if unaligned {
        (CACHE_LINE - 1, 2 * CACHE_LINE)
    } else {
        (0, CACHE_LINE)
    };
    assert!(code.len() >= entry + stride, "jump chain span too small");

    let hops = (code.len() - entry) / stride;
    let rel = i8::try_from(stride - 2).unwrap_or(i8::MAX).to_le_bytes()[0];
    for hop in 0..hops - 1 {
        let at = entry + hop * stride;
        code[at] = OP_JMP_REL8;
        code[at + 1] = rel;
    }
    code[entry + (hops - 1) * stride] = OP_RET;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE_SIZE: usize = 1024;

    #[test]
    fn terminator_for_default_buffer() {
        assert_eq!(terminator_offset(CODE_SIZE, 0), 1020);
        assert_eq!(terminator_offset(CODE_SIZE, 5), 1020);
        assert_eq!(instruction_count(CODE_SIZE, 0), 204);
    }

    #[test]
    fn forward_layout() {
        let mut code = [0u8; CODE_SIZE];
        let mut cg = CodeGen::new();
        let end = cg.forward(&mut code, 0);
        assert_eq!(end, 1020);
        assert_eq!(code[end], OP_RET);
        assert_eq!(&code[0..5], &[OP_ADD_EAX, 0, 0, 0, 0]);
        assert_eq!(&code[5..10], &[OP_ADD_EAX, 1, 0, 0, 0]);
        assert_eq!(&code[10..15], &[OP_ADD_EAX, 3, 0, 0, 0]);
        assert_eq!(cg.state(), u32::MAX);
        assert!(code[end + 1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn state_carries_across_calls() {
        let mut code = [0u8; 64];
        let mut cg = CodeGen::with_state(7);
        let n = instruction_count(64, 0);
        cg.forward(&mut code, 0);
        assert_eq!(cg.state(), advance(7, n));
        let first = code;
        cg.forward(&mut code, 0);
        assert_ne!(first, code);
    }

    #[test]
    fn advance_matches_iteration() {
        let mut x = 0xDEAD_BEEFu32;
        for k in 0..40 {
            assert_eq!(advance(0xDEAD_BEEF, k), x, "step {k}");
            x = x.wrapping_mul(2).wrapping_add(1);
        }
    }

    #[test]
    fn smallest_buffers() {
        // just the terminator
        let mut code = [0u8; TAIL_MARGIN];
        assert_eq!(CodeGen::new().forward(&mut code, 0), 0);
        assert_eq!(code[0], OP_RET);

        // one instruction plus terminator
        let mut code = [0u8; TAIL_MARGIN + 1];
        assert_eq!(CodeGen::new().forward(&mut code, 0), 5);
        assert_eq!(CodeGen::new().reverse(&mut code), 5);
        assert_eq!(code[0], OP_ADD_EAX);
        assert_eq!(code[5], OP_RET);
    }

    #[test]
    fn aligned_chain_hits_every_line() {
        let mut code = vec![0u8; 32 * 1024];
        let entry = jump_chain(&mut code, false);
        assert_eq!(entry, 0);

        let mut pc = entry;
        let mut jumps = 0;
        while code[pc] == OP_JMP_REL8 {
            assert_eq!(pc % 64, 0);
            pc = pc + 2 + code[pc + 1] as usize;
            jumps += 1;
        }
        assert_eq!(code[pc], OP_RET);
        assert_eq!(jumps, 511);
    }

    #[test]
    fn unaligned_chain_straddles_lines() {
        let mut code = vec![0u8; 32 * 1024];
        let entry = jump_chain(&mut code, true);
        assert_eq!(entry, 63);

        let mut pc = entry;
        let mut jumps = 0;
        while code[pc] == OP_JMP_REL8 {
            // opcode in one line, displacement in the next
            assert_eq!(pc % 64, 63);
            pc = pc + 2 + code[pc + 1] as usize;
            jumps += 1;
        }
        assert_eq!(code[pc], OP_RET);
        assert_eq!(jumps, 254);
        assert!(pc < code.len());
    }
}
