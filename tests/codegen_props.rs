use proptest::prelude::*;
use smc_jit_bench::codegen::{
    CodeGen, INSN_LEN, OP_ADD_EAX, OP_RET, advance, instruction_count, terminator_offset,
};

/// Check `code` holds `ADD EAX, imm` from `start` up to the terminator with immediates
/// continuing from `seed`.
fn assert_stream(code: &[u8], start: usize, seed: u32) {
    let end = terminator_offset(code.len(), start);
    assert_eq!(code[end], OP_RET, "terminator at {end}");
    for (k, at) in (start..end).step_by(INSN_LEN).enumerate() {
        assert_eq!(code[at], OP_ADD_EAX, "opcode at {at}");
        let imm = u32::from_le_bytes(code[at + 1..at + 5].try_into().unwrap());
        assert_eq!(imm, advance(seed, k), "immediate at {at}");
    }
}

#[test]
fn forward_and_reverse_agree_for_every_size() {
    for len in 6..=2048 {
        let mut fwd = vec![0u8; len];
        let mut rev = vec![0u8; len];
        let mut a = CodeGen::with_state(0x1234_5678);
        let mut b = a.clone();
        let end_fwd = a.forward(&mut fwd, 0);
        let end_rev = b.reverse(&mut rev);
        assert_eq!(end_fwd, end_rev, "len {len}");
        assert_eq!(fwd, rev, "len {len}");
        assert_eq!(a, b, "len {len}");
    }
}

#[test]
fn default_buffer_stream() {
    let mut code = vec![0u8; 1024];
    let mut cg = CodeGen::new();
    cg.forward(&mut code, 0);
    assert_stream(&code, 0, 0);
    let seed = cg.state();
    cg.reverse(&mut code);
    assert_stream(&code, 0, seed);
}

proptest! {
    #[test]
    fn reverse_matches_forward(seed in any::<u32>(), len in 6usize..4096) {
        let mut fwd = vec![0u8; len];
        let mut rev = vec![0xAAu8; len];
        let mut a = CodeGen::with_state(seed);
        let mut b = CodeGen::with_state(seed);
        a.forward(&mut fwd, 0);
        b.reverse(&mut rev);
        let end = terminator_offset(len, 0);
        prop_assert_eq!(&fwd[..=end], &rev[..=end]);
        prop_assert_eq!(a.state(), b.state());
    }

    #[test]
    fn same_state_same_bytes(seed in any::<u32>(), start in 0usize..64) {
        let mut x = vec![0u8; 1024];
        let mut y = vec![0xFFu8; 1024];
        CodeGen::with_state(seed).forward(&mut x, start);
        CodeGen::with_state(seed).forward(&mut y, start);
        let end = terminator_offset(1024, start);
        prop_assert_eq!(&x[start..=end], &y[start..=end]);
    }

    #[test]
    fn stays_inside_the_buffer(seed in any::<u32>(), len in 1usize..512, start_frac in 0.0f64..1.0) {
        let start = ((len as f64) * start_frac) as usize;
        let mut backing = vec![0x5Au8; len + 16];
        let mut cg = CodeGen::with_state(seed);
        let end = cg.forward(&mut backing[..len], start);
        prop_assert!(end < len);
        prop_assert!(backing[len..].iter().all(|&b| b == 0x5A));
        prop_assert!(backing[..start].iter().all(|&b| b == 0x5A));
        prop_assert!(backing[end + 1..len].iter().all(|&b| b == 0x5A));
        prop_assert_eq!(cg.state(), advance(seed, instruction_count(len, start)));
    }

    #[test]
    fn stream_is_well_formed(seed in any::<u32>(), len in 6usize..2048, start in 0usize..16) {
        prop_assume!(start < len);
        let mut code = vec![0u8; len];
        CodeGen::with_state(seed).forward(&mut code, start);
        assert_stream(&code, start, seed);
    }
}
