//! Per-function prologue/epilogue analysis and the permutation pass that
//! rewrites register-save order in place.
//!
//! The disassembler/encoder is `iced-x86`: functions are decoded fully up
//! front into an instruction list, which is then scanned for a prologue
//! (a run of `push reg` instructions) and every epilogue that mirrors it
//! (a run of `pop reg` instructions popping the same registers in reverse
//! order). Decoding fully first, rather than decoding incrementally with
//! rewind, keeps the scanning logic a plain slice walk.

use iced_x86::{Decoder, DecoderOptions, Encoder, Instruction, Mnemonic, OpKind, Register};

use crate::function::FunctionRecord;
use crate::rng;
use crate::window::WindowMut;
use crate::{Error, Result};

fn is_gpr64(reg: Register) -> bool {
    matches!(
        reg,
        Register::RAX
            | Register::RCX
            | Register::RDX
            | Register::RBX
            | Register::RSP
            | Register::RBP
            | Register::RSI
            | Register::RDI
            | Register::R8
            | Register::R9
            | Register::R10
            | Register::R11
            | Register::R12
            | Register::R13
            | Register::R14
            | Register::R15
    )
}

/// Register operand of a `push`, if it's a GPR other than `rbp`.
fn prologue_candidate(instr: &Instruction) -> Option<Register> {
    if instr.mnemonic() == Mnemonic::Push && instr.op0_kind() == OpKind::Register {
        let reg = instr.op0_register();
        if is_gpr64(reg) && reg != Register::RBP {
            return Some(reg);
        }
    }
    None
}

/// Register operand of a `pop`, if it's a GPR other than `rbp`.
fn epilogue_candidate(instr: &Instruction) -> Option<Register> {
    if instr.mnemonic() == Mnemonic::Pop && instr.op0_kind() == OpKind::Register {
        let reg = instr.op0_register();
        if is_gpr64(reg) && reg != Register::RBP {
            return Some(reg);
        }
    }
    None
}

/// A contiguous run of instructions (a prologue or one epilogue) together
/// with the register each one touches, in original decode order.
#[derive(Debug, Clone)]
pub struct InstructionSet {
    pub start: u64,
    pub end: u64,
    instrs: Vec<Instruction>,
    regs: Vec<Register>,
}

impl InstructionSet {
    pub fn nr_instrs(&self) -> usize {
        self.instrs.len()
    }

    pub fn regs(&self) -> &[Register] {
        &self.regs
    }
}

/// A function that passed analysis and is eligible for permutation.
#[derive(Debug, Clone)]
pub struct Transformable {
    pub record: FunctionRecord,
    pub prologue: InstructionSet,
    pub epilogues: Vec<InstructionSet>,
    pub order: Vec<usize>,
}

#[derive(Default)]
pub struct TransformEngine {
    transformables: Vec<Transformable>,
}

impl TransformEngine {
    pub fn new() -> Self {
        TransformEngine::default()
    }

    pub fn transformables(&self) -> &[Transformable] {
        &self.transformables
    }

    pub fn len(&self) -> usize {
        self.transformables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformables.is_empty()
    }

    /// Analyzes one function's bytes (exactly `record.len` bytes, starting
    /// at `record.addr`). Every rejection in this function is a soft
    /// failure: it's logged and `Ok(())` is returned so the caller keeps
    /// iterating the rest of the binary's functions.
    pub fn add_function(&mut self, record: FunctionRecord, bytes: &[u8]) -> Result<()> {
        let bytes = match bytes.get(..record.len as usize) {
            Some(b) => b,
            None => {
                log::warn!(
                    "function @ 0x{:x}: range straddles the text window boundary",
                    record.addr
                );
                return Ok(());
            }
        };

        let instrs = match decode_all(bytes, record.addr) {
            Some(instrs) => instrs,
            None => {
                log::warn!("function @ 0x{:x}: decoder returned an invalid instruction", record.addr);
                return Ok(());
            }
        };

        let consumed: u64 = instrs.iter().map(|i| i.len() as u64).sum();
        if consumed != record.len {
            log::warn!(
                "function @ 0x{:x}: decoded {} bytes, expected {}",
                record.addr,
                consumed,
                record.len
            );
            return Ok(());
        }

        let (prologue, rest_idx) = match find_prologue(&instrs) {
            Some(found) => found,
            None => {
                log::debug!("function @ 0x{:x}: prologue predicate never satisfied", record.addr);
                return Ok(());
            }
        };

        if prologue.nr_instrs() < 2 {
            log::warn!("function @ 0x{:x}: prologue shorter than 2 instructions", record.addr);
            return Ok(());
        }

        let epilogues = find_epilogues(&instrs[rest_idx..], &prologue.regs);
        if epilogues.is_empty() {
            log::warn!("function @ 0x{:x}: no matching epilogue found", record.addr);
            return Ok(());
        }

        let n = prologue.nr_instrs();
        self.transformables.push(Transformable {
            record,
            prologue,
            epilogues,
            order: (0..n).collect(),
        });
        Ok(())
    }

    /// Draws a fresh random permutation for every transformable function
    /// and re-encodes its prologue and epilogues in place.
    pub fn permute_all(&mut self, text: &mut WindowMut) -> Result<()> {
        for t in &mut self.transformables {
            rng::shuffle(&mut t.order);
            encode_set_in_order(text, &t.prologue, &t.order)?;

            let n = t.order.len();
            let eorder: Vec<usize> = (0..n).map(|i| (n - 1) - t.order[(n - 1) - i]).collect();
            for epilogue in &t.epilogues {
                encode_set_in_order(text, epilogue, &eorder)?;
            }
        }
        Ok(())
    }
}

fn decode_all(bytes: &[u8], ip: u64) -> Option<Vec<Instruction>> {
    let mut decoder = Decoder::with_ip(64, bytes, ip, DecoderOptions::NONE);
    let mut out = Vec::new();
    while decoder.can_decode() {
        let instr = decoder.decode();
        if instr.is_invalid() {
            return None;
        }
        out.push(instr);
    }
    Some(out)
}

/// Scans from the start of `instrs`, skipping leading non-matching
/// instructions, then collecting the maximal run of prologue candidates
/// starting there. Returns the prologue set and the index of the first
/// instruction after it.
///
/// Each `push reg`/`pop reg` is re-encoded from its own register later, so
/// its length travels with it regardless of where in `order` it lands —
/// there's no need to restrict a run to one REX class for the permutation's
/// total byte length to come out right.
fn find_prologue(instrs: &[Instruction]) -> Option<(InstructionSet, usize)> {
    let mut idx = 0;
    // Skip leading instructions that don't start a prologue run.
    while idx < instrs.len() && prologue_candidate(&instrs[idx]).is_none() {
        idx += 1;
    }
    if idx == instrs.len() {
        return None;
    }

    let mut set_instrs = Vec::new();
    let mut regs = Vec::new();

    while idx < instrs.len() {
        let Some(reg) = prologue_candidate(&instrs[idx]) else {
            break;
        };
        set_instrs.push(instrs[idx]);
        regs.push(reg);
        idx += 1;
    }

    let start = set_instrs[0].ip();
    let end = start + set_instrs.iter().map(|i| i.len() as u64).sum::<u64>();
    Some((
        InstructionSet {
            start,
            end,
            instrs: set_instrs,
            regs,
        },
        idx,
    ))
}

/// Scans the remainder of the function for runs of `pop` instructions,
/// keeping every run whose length and register order mirror the prologue.
fn find_epilogues(instrs: &[Instruction], prologue_regs: &[Register]) -> Vec<InstructionSet> {
    let nr = prologue_regs.len();
    let mirror: Vec<Register> = prologue_regs.iter().rev().copied().collect();

    let mut epilogues = Vec::new();
    let mut cursor = 0;
    while cursor < instrs.len() {
        let run_start = cursor;
        let mut run_regs = Vec::new();
        while cursor < instrs.len() {
            match epilogue_candidate(&instrs[cursor]) {
                Some(reg) => {
                    run_regs.push(reg);
                    cursor += 1;
                }
                None => break,
            }
        }

        if run_regs.is_empty() {
            cursor += 1;
            continue;
        }

        if run_regs.len() == nr && run_regs == mirror {
            let run = &instrs[run_start..cursor];
            let start = run[0].ip();
            let end = start + run.iter().map(|i| i.len() as u64).sum::<u64>();
            epilogues.push(InstructionSet {
                start,
                end,
                instrs: run.to_vec(),
                regs: run_regs,
            });
        }
    }
    epilogues
}

fn encode_set_in_order(text: &mut WindowMut, set: &InstructionSet, order: &[usize]) -> Result<()> {
    let mut encoder = Encoder::new(64);
    let mut pos = set.start;

    for &slot in order {
        let instr = set.instrs[slot];
        let written = encoder
            .encode(&instr, pos)
            .map_err(|e| Error::Transform(e.to_string()))?;
        let bytes = encoder.take_buffer();

        if pos + written as u64 > set.end {
            return Err(Error::Transform(format!(
                "encode overflow past 0x{:x} while rewriting 0x{:x}",
                set.end, set.start
            )));
        }

        let dest = text
            .view_mut(pos)
            .ok_or_else(|| Error::Transform(format!("0x{pos:x} outside text window")))?;
        dest[..bytes.len()].copy_from_slice(&bytes);
        pos += written as u64;
    }

    if pos != set.end {
        return Err(Error::Transform(format!(
            "encode underflow: wrote {} bytes, expected {}",
            pos - set.start,
            set.end - set.start
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // push rbx; push r12; mov rax, 1; pop r12; pop rbx; ret
    fn s1_function() -> Vec<u8> {
        vec![
            0x53, // push rbx
            0x41, 0x54, // push r12
            0x48, 0xC7, 0xC0, 0x01, 0x00, 0x00, 0x00, // mov rax, 1
            0x41, 0x5C, // pop r12
            0x5B, // pop rbx
            0xC3, // ret
        ]
    }

    #[test]
    fn s1_recovers_matching_prologue_and_epilogue() {
        let bytes = s1_function();
        let record = FunctionRecord::new(0x1000, bytes.len() as u64);
        let mut engine = TransformEngine::new();
        engine.add_function(record, &bytes).unwrap();
        assert_eq!(engine.len(), 1);

        let t = &engine.transformables()[0];
        assert_eq!(t.prologue.nr_instrs(), 2);
        assert_eq!(t.prologue.regs(), &[Register::RBX, Register::R12]);
        assert_eq!(t.epilogues.len(), 1);
        assert_eq!(t.epilogues[0].regs(), &[Register::R12, Register::RBX]);
    }

    #[test]
    fn s2_single_push_prologue_is_rejected() {
        let bytes = vec![0x53, 0xC3]; // push rbx; ret
        let record = FunctionRecord::new(0x1000, bytes.len() as u64);
        let mut engine = TransformEngine::new();
        engine.add_function(record, &bytes).unwrap();
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn s3_non_mirrored_epilogue_is_rejected() {
        // push rbx; push r12; push r13; pop r12; pop r13; ret
        // Three pushes, but only two pops, and not in reverse order.
        let bytes = vec![0x53, 0x41, 0x54, 0x41, 0x55, 0x41, 0x5C, 0x41, 0x5D, 0xC3];
        let record = FunctionRecord::new(0x1000, bytes.len() as u64);
        let mut engine = TransformEngine::new();
        engine.add_function(record, &bytes).unwrap();
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn s4_two_epilogues_both_recorded() {
        // push rbx; push r12; test eax,eax; je +5; pop r12; pop rbx; ret; pop r12; pop rbx; ret
        let bytes = vec![
            0x53, 0x41, 0x54, // push rbx; push r12
            0x85, 0xC0, // test eax, eax
            0x74, 0x05, // je +5
            0x41, 0x5C, 0x5B, 0xC3, // pop r12; pop rbx; ret
            0x41, 0x5C, 0x5B, 0xC3, // pop r12; pop rbx; ret
        ];
        let record = FunctionRecord::new(0x1000, bytes.len() as u64);
        let mut engine = TransformEngine::new();
        engine.add_function(record, &bytes).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.transformables()[0].epilogues.len(), 2);
    }

    #[test]
    fn permute_all_applies_mirrored_order() {
        let bytes = s1_function();
        let record = FunctionRecord::new(0x1000, bytes.len() as u64);
        let mut engine = TransformEngine::new();
        engine.add_function(record, &bytes).unwrap();

        rng::seed(1);
        {
            let t = &mut engine.transformables[0];
            t.order = vec![1, 0];
        }

        let mut staged = bytes.clone();
        let mut window = WindowMut::new(0x1000, &mut staged);
        // Bypass the random draw to test the exact S1 permutation deterministically.
        let t = engine.transformables.remove(0);
        let prologue = t.prologue.clone();
        let epilogues = t.epilogues.clone();
        let order = t.order.clone();
        let n = order.len();
        encode_set_in_order(&mut window, &prologue, &order).unwrap();
        let eorder: Vec<usize> = (0..n).map(|i| (n - 1) - order[(n - 1) - i]).collect();
        for epilogue in &epilogues {
            encode_set_in_order(&mut window, epilogue, &eorder).unwrap();
        }

        assert_eq!(&staged[0..3], &[0x41, 0x54, 0x53]); // push r12; push rbx
        assert_eq!(&staged[10..13], &[0x5B, 0x41, 0x5C]); // pop rbx; pop r12
    }
}
