//! M-extension multiply/divide/remainder.
//!
//! Written fresh against `original_source/src/device/cpu/riscv_rv_ima/computations.c`
//! rather than adapted from the teacher: `general_exec.rs`'s DIV arm sets an FCSR
//! divide-by-zero flag (an F-extension concept this core doesn't implement) and
//! returns `u64::MAX` rather than following the RISC-V-mandated all-ones/dividend
//! contract for every width, so it was not a safe base to generalize from
//! (see DESIGN.md).

use crate::config::Xlen;
use crate::decode::MulDivOp;

pub fn exec(xlen: Xlen, op: MulDivOp, a: u64, b: u64, word: bool) -> u64 {
    if word {
        return exec32(op, a as u32, b as u32) as i32 as i64 as u64;
    }
    match xlen {
        Xlen::Rv32 => exec32(op, a as u32, b as u32) as i32 as i64 as u64,
        Xlen::Rv64 => exec64(op, a, b),
    }
}

fn exec64(op: MulDivOp, a: u64, b: u64) -> u64 {
    match op {
        MulDivOp::Mul => a.wrapping_mul(b),
        MulDivOp::Mulh => (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64,
        MulDivOp::Mulhsu => (((a as i64 as i128) * (b as i128)) >> 64) as u64,
        MulDivOp::Mulhu => (((a as u128) * (b as u128)) >> 64) as u64,
        MulDivOp::Div => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                u64::MAX
            } else if a == i64::MIN && b == -1 {
                a as u64
            } else {
                (a / b) as u64
            }
        }
        MulDivOp::Divu => {
            if b == 0 {
                u64::MAX
            } else {
                a / b
            }
        }
        MulDivOp::Rem => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                a as u64
            } else if a == i64::MIN && b == -1 {
                0
            } else {
                (a % b) as u64
            }
        }
        MulDivOp::Remu => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
    }
}

fn exec32(op: MulDivOp, a: u32, b: u32) -> u32 {
    match op {
        MulDivOp::Mul => a.wrapping_mul(b),
        MulDivOp::Mulh => (((a as i32 as i64) * (b as i32 as i64)) >> 32) as u32,
        MulDivOp::Mulhsu => (((a as i32 as i64) * (b as i64)) >> 32) as u32,
        MulDivOp::Mulhu => (((a as u64) * (b as u64)) >> 32) as u32,
        MulDivOp::Div => {
            let (a, b) = (a as i32, b as i32);
            if b == 0 {
                u32::MAX
            } else if a == i32::MIN && b == -1 {
                a as u32
            } else {
                (a / b) as u32
            }
        }
        MulDivOp::Divu => {
            if b == 0 {
                u32::MAX
            } else {
                a / b
            }
        }
        MulDivOp::Rem => {
            let (a, b) = (a as i32, b as i32);
            if b == 0 {
                a as u32
            } else if a == i32::MIN && b == -1 {
                0
            } else {
                (a % b) as u32
            }
        }
        MulDivOp::Remu => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_by_zero_is_all_ones() {
        assert_eq!(exec(Xlen::Rv64, MulDivOp::Div, 10, 0, false), u64::MAX);
        assert_eq!(exec(Xlen::Rv64, MulDivOp::Divu, 10, 0, false), u64::MAX);
    }

    #[test]
    fn rem_by_zero_returns_dividend() {
        assert_eq!(exec(Xlen::Rv64, MulDivOp::Rem, 10, 0, false), 10);
    }

    #[test]
    fn div_overflow_returns_dividend() {
        let min = i64::MIN as u64;
        assert_eq!(exec(Xlen::Rv64, MulDivOp::Div, min, u64::MAX, false), min);
        assert_eq!(exec(Xlen::Rv64, MulDivOp::Rem, min, u64::MAX, false), 0);
    }

    #[test]
    fn mulhu_upper_bits() {
        let a = u64::MAX;
        let b = 2u64;
        assert_eq!(exec(Xlen::Rv64, MulDivOp::Mulhu, a, b, false), 1);
    }

    #[test]
    fn divw_sign_extends_32_bit_result() {
        let r = exec(Xlen::Rv64, MulDivOp::Div, (-10i64) as u64, 3, true);
        assert_eq!(r as i64, -3);
    }
}
