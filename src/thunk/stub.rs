//! Machine-code generation for the two stub flavours.
//!
//! Both stubs share one shape: a mode-specific prologue, a far jump into
//! the other CPU mode, argument marshalling, a near call to the real
//! callee, a far jump back, and an epilogue. The far-jump and call
//! immediates are left zero; the synthesiser wires them up with
//! relocations afterwards.

use super::asm::{Asm, Reg, CALL_REL32, CALL_SLOT, LJMP_ABS, LJMP_SLOT};
use crate::error::{Error, Result};
use crate::sig::{CType, ReturnType, Signature};

/// System V argument registers by position. Four-byte arguments use the
/// low halves of the same registers.
const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// An emitted stub plus the three offsets at which 4-byte relocation slots
/// sit inside it: the outgoing far jump, the near call, and the returning
/// far jump.
#[derive(Debug)]
pub struct Stub {
    pub code: Vec<u8>,
    pub first_jump_slot: usize,
    pub call_slot: usize,
    pub second_jump_slot: usize,
}

impl Stub {
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

fn arg_reg(position: usize, count: usize) -> Result<Reg> {
    if count > ARG_REGS.len() {
        return Err(Error::BadSignature(format!(
            "{} arguments exceed the {} argument registers",
            count,
            ARG_REGS.len()
        )));
    }
    Ok(ARG_REGS[position])
}

/// `front + ljmp + mid + call + after_call + ljmp + back`, with slot
/// offsets computed from the fragment lengths.
fn compose(front: Asm, mid: Asm, after_call: Asm, back: Asm) -> Result<Stub> {
    let (front, mid, after_call, back) = (
        front.into_bytes(),
        mid.into_bytes(),
        after_call.into_bytes(),
        back.into_bytes(),
    );
    let first_jump_slot = front.len() + LJMP_SLOT;
    let call_slot = front.len() + LJMP_ABS.len() + mid.len() + CALL_SLOT;
    let second_jump_slot =
        front.len() + LJMP_ABS.len() + mid.len() + CALL_REL32.len() + after_call.len() + LJMP_SLOT;

    let mut code = front;
    code.extend(LJMP_ABS);
    code.extend(mid);
    code.extend(CALL_REL32);
    code.extend(after_call);
    code.extend(LJMP_ABS);
    code.extend(back);

    let stub = Stub {
        code,
        first_jump_slot,
        call_slot,
        second_jump_slot,
    };
    for slot in [stub.first_jump_slot, stub.call_slot, stub.second_jump_slot] {
        if stub.code[slot..slot + 4] != [0, 0, 0, 0] {
            return Err(Error::Codegen(format!(
                "relocation slot at {:#x} is not zero",
                slot
            )));
        }
    }
    Ok(stub)
}

/// The total `sub rsp` so that six pushes plus the argument area leave the
/// stack 16-byte aligned at the call.
fn outbound_stack_adjust(args_size: usize) -> i32 {
    let args_size = args_size as i64;
    (args_size + (8 - args_size).rem_euclid(16)) as i32
}

/// A stub placed in front of a 64-bit caller's external reference: it
/// spills the register arguments to the stack in 32-bit cdecl order, drops
/// to compatibility mode, reloads the data segments and calls the 32-bit
/// callee, then returns to long mode and widens the result.
pub fn stub_64_to_32(sig: &Signature) -> Result<Stub> {
    let mut front = Asm::new();
    for reg in [Reg::Rbx, Reg::Rbp, Reg::R12, Reg::R13, Reg::R14, Reg::R15] {
        front.push64(reg);
    }
    let adjust = outbound_stack_adjust(sig.args_size());
    front.sub_rsp(adjust);
    let mut offset = 0i32;
    for (position, arg) in sig.args.iter().enumerate() {
        let reg = arg_reg(position, sig.args.len())?;
        match arg.size() {
            8 => front.store_rsp64(offset, reg),
            _ => front.store_rsp32(offset, reg),
        }
        offset += arg.size() as i32;
    }

    let mut mid = Asm::new();
    mid.push_imm8(0x2b);
    mid.pop_ds();
    mid.push_imm8(0x2b);
    mid.pop_es();

    let mut back = Asm::new();
    match sig.return_type {
        ReturnType::Void => {}
        ReturnType::Value(value) if value.size() == 8 => {
            // reassemble the 32-bit ABI's edx:eax pair into rax
            back.mov32(Reg::Rax, Reg::Rax);
            back.shl64(Reg::Rdx, 32);
            back.or64(Reg::Rax, Reg::Rdx);
        }
        ReturnType::Value(_) => {
            back.mov32(Reg::Rax, Reg::Rax);
        }
    }
    back.add_rsp(adjust);
    for reg in [Reg::R15, Reg::R14, Reg::R13, Reg::R12, Reg::Rbp, Reg::Rbx] {
        back.pop64(reg);
    }
    back.ret();

    compose(front, mid, Asm::new(), back)
}

/// A stub exported in place of a 32-bit-visible function: it saves the
/// cdecl callee-saved registers, enters long mode, loads the stack
/// arguments into the System V registers and calls the 64-bit
/// implementation, then splits the result into edx:eax and drops back.
pub fn stub_32_to_64(sig: &Signature) -> Result<Stub> {
    let mut front = Asm::new();
    front.push32(Reg::Rdi);
    front.push32(Reg::Rsi);
    front.sub_esp(4);

    // two saved registers, the adjust word and the return address put the
    // first stack argument at rsp+16 on the far side
    let mut mid = Asm::new();
    let mut offset = 16i32;
    for (position, arg) in sig.args.iter().enumerate() {
        let reg = arg_reg(position, sig.args.len())?;
        match (*arg, arg.size()) {
            (CType::Long, _) => mid.movsxd_rsp(reg, offset),
            (_, 8) => mid.load_rsp64(reg, offset),
            _ => mid.load_rsp32(reg, offset),
        }
        offset += arg.size() as i32;
    }

    let mut after_call = Asm::new();
    after_call.mov64(Reg::Rdx, Reg::Rax);
    after_call.shr64(Reg::Rdx, 32);

    let mut back = Asm::new();
    back.add_esp(4);
    back.pop32(Reg::Rsi);
    back.pop32(Reg::Rdi);
    back.ret();

    compose(front, mid, after_call, back)
}
