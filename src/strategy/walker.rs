//! Recursive-descent walk of one straight-line path through 65C816 code.

use serde::Serialize;

use crate::decoder::{Flow, Instruction, ProcessorContext};
use crate::mapping::CpuAddress;
use crate::{Decoder, RomOffset};

/// Instructions a single walk may decode before giving up.
pub const DEFAULT_INSTRUCTION_LIMIT: usize = 4096;

/// Where a walk is, or why it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkState {
    Running,
    /// RTS/RTL/RTI or STP.
    TerminatedReturn,
    /// Unconditional JMP/JML/BRA/BRL.
    TerminatedJump,
    /// Instruction limit reached.
    TerminatedLimit,
    /// Ran past the image or the current bank.
    TerminatedTruncated,
}

impl WalkState {
    /// The walk ended on a real control-flow terminator.
    pub fn is_confident(self) -> bool {
        matches!(self, WalkState::TerminatedReturn | WalkState::TerminatedJump)
    }
}

/// A control transfer discovered during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Offset of the transferring instruction.
    pub from: RomOffset,
    pub address: CpuAddress,
    /// `None` when the address is not backed by ROM.
    pub offset: Option<RomOffset>,
    /// Processor state the target is entered with.
    pub context: ProcessorContext,
}

/// Result of walking from one start offset.
#[derive(Debug, Clone, Serialize)]
pub struct Walk {
    pub start: RomOffset,
    pub state: WalkState,
    pub instructions: Vec<Instruction>,
    /// JSR/JSL targets.
    pub calls: Vec<Target>,
    /// Conditional branches and BRA/BRL; these stay in the same routine.
    pub branches: Vec<Target>,
    /// JMP/JML targets.
    pub jumps: Vec<Target>,
    /// Offsets of indirect jumps and calls.
    pub unresolved: Vec<RomOffset>,
    /// Offset the walk could not decode, for truncated walks.
    pub truncated_at: Option<RomOffset>,
    /// Processor state after the last instruction.
    pub exit_context: ProcessorContext,
}

impl Walk {
    fn new(start: RomOffset, context: ProcessorContext) -> Self {
        Self {
            start,
            state: WalkState::Running,
            instructions: Vec::new(),
            calls: Vec::new(),
            branches: Vec::new(),
            jumps: Vec::new(),
            unresolved: Vec::new(),
            truncated_at: None,
            exit_context: context,
        }
    }

    /// First offset after the last decoded instruction.
    pub fn end(&self) -> RomOffset {
        self.instructions.last().map_or(self.start, Instruction::end)
    }
}

/// Follows fall-through paths, recording every transfer it passes.
pub struct ControlFlowWalker<'a> {
    rom: &'a [u8],
    decoder: &'a dyn Decoder,
    limit: usize,
    end: Option<RomOffset>,
}

impl<'a> ControlFlowWalker<'a> {
    pub fn new(rom: &'a [u8], decoder: &'a dyn Decoder) -> Self {
        Self {
            rom,
            decoder,
            limit: DEFAULT_INSTRUCTION_LIMIT,
            end: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Treat everything at or past `end` as outside the image.
    pub fn with_end(mut self, end: RomOffset) -> Self {
        self.end = Some(end);
        self
    }

    fn target(&self, from: RomOffset, address: CpuAddress, context: ProcessorContext) -> Target {
        Target {
            from,
            address,
            offset: self.decoder.translator().cpu_to_rom_offset(address),
            context,
        }
    }

    /// Walk from `start` until a terminator, the limit, or the end of the bank.
    pub fn walk(&self, start: RomOffset, context: ProcessorContext) -> Walk {
        let mut walk = Walk::new(start, context);
        let mut ctx = context;
        let mut at = start;
        let window_end = self
            .decoder
            .translator()
            .bank_end(start)
            .min(self.end.unwrap_or(usize::MAX))
            .min(self.rom.len());

        while walk.state == WalkState::Running {
            if walk.instructions.len() >= self.limit {
                walk.state = WalkState::TerminatedLimit;
                break;
            }
            let insn = match self.decoder.decode(self.rom, at, &ctx) {
                Ok(insn) if insn.end() <= window_end => insn,
                _ => {
                    walk.state = WalkState::TerminatedTruncated;
                    walk.truncated_at = Some(at);
                    break;
                }
            };

            ctx.apply(&insn);
            match insn.flow() {
                Flow::Next => {}
                Flow::Call(Some(address)) => {
                    walk.calls.push(self.target(insn.offset, address, ctx.enter_routine()))
                }
                Flow::Call(None) => walk.unresolved.push(insn.offset),
                Flow::Branch(address) => walk.branches.push(self.target(insn.offset, address, ctx)),
                Flow::Goto(address) => {
                    walk.branches.push(self.target(insn.offset, address, ctx));
                    walk.state = WalkState::TerminatedJump;
                }
                Flow::Jump(Some(address)) => {
                    walk.jumps.push(self.target(insn.offset, address, ctx.enter_routine()));
                    walk.state = WalkState::TerminatedJump;
                }
                Flow::Jump(None) => {
                    walk.unresolved.push(insn.offset);
                    walk.state = WalkState::TerminatedJump;
                }
                Flow::Return | Flow::Halt => walk.state = WalkState::TerminatedReturn,
            }
            at = insn.end();
            walk.instructions.push(insn);
        }

        walk.exit_context = ctx;
        log::debug!(
            "walk from 0x{:06x}: {} instructions, {:?}",
            start,
            walk.instructions.len(),
            walk.state
        );
        walk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SnesDecoder;
    use crate::mapping::MappingType;

    fn rom_with(code: &[(usize, &[u8])]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x10000];
        for (at, bytes) in code {
            rom[*at..*at + bytes.len()].copy_from_slice(bytes);
        }
        rom
    }

    fn walk(rom: &[u8], start: RomOffset) -> Walk {
        let decoder = SnesDecoder::for_mapping(MappingType::LoRom, rom.len());
        ControlFlowWalker::new(rom, &decoder).walk(start, ProcessorContext::emulation())
    }

    #[test]
    fn test_call_then_return() {
        let rom = rom_with(&[(0, &[0x20, 0x10, 0x80, 0x60]), (0x10, &[0x60])]);
        let walk = walk(&rom, 0);
        assert_eq!(walk.state, WalkState::TerminatedReturn);
        assert_eq!(walk.instructions.len(), 2);
        assert_eq!(walk.calls.len(), 1);
        assert_eq!(walk.calls[0].offset, Some(0x10));
        assert_eq!(walk.calls[0].address, CpuAddress::new(0, 0x8010));
        assert_eq!(walk.end(), 4);
    }

    #[test]
    fn test_conditional_branch_continues() {
        // BNE +1; NOP; RTL
        let rom = rom_with(&[(0, &[0xD0, 0x01, 0xEA, 0x6B])]);
        let walk = walk(&rom, 0);
        assert_eq!(walk.state, WalkState::TerminatedReturn);
        assert_eq!(walk.instructions.len(), 3);
        assert_eq!(walk.branches[0].offset, Some(3));
    }

    #[test]
    fn test_bra_and_jmp_terminate() {
        let rom = rom_with(&[(0, &[0x80, 0x10]), (0x20, &[0x4C, 0x00, 0x90])]);
        let bra = walk(&rom, 0);
        assert_eq!(bra.state, WalkState::TerminatedJump);
        assert_eq!(bra.branches[0].offset, Some(0x12));
        assert!(bra.jumps.is_empty());

        let jmp = walk(&rom, 0x20);
        assert_eq!(jmp.state, WalkState::TerminatedJump);
        assert_eq!(jmp.jumps[0].offset, Some(0x1000));
    }

    #[test]
    fn test_indirect_jump_is_unresolved() {
        let rom = rom_with(&[(0, &[0x7C, 0x00, 0x90])]);
        let walk = walk(&rom, 0);
        assert_eq!(walk.state, WalkState::TerminatedJump);
        assert_eq!(walk.unresolved, vec![0]);
    }

    #[test]
    fn test_stp_ends_walk() {
        let rom = rom_with(&[(0, &[0xEA, 0xDB, 0xEA])]);
        let walk = walk(&rom, 0);
        assert_eq!(walk.state, WalkState::TerminatedReturn);
        assert_eq!(walk.instructions.len(), 2);
    }

    #[test]
    fn test_all_ff_terminates() {
        let rom = vec![0xFF; 0x10000];
        let walk = walk(&rom, 0);
        assert_eq!(walk.state, WalkState::TerminatedLimit);
        assert_eq!(walk.instructions.len(), DEFAULT_INSTRUCTION_LIMIT);

        let decoder = SnesDecoder::for_mapping(MappingType::LoRom, rom.len());
        let short = ControlFlowWalker::new(&rom, &decoder)
            .with_limit(100_000)
            .walk(0x8000, ProcessorContext::default());
        assert_eq!(short.state, WalkState::TerminatedTruncated);
        assert_eq!(short.truncated_at, Some(0x10000));
    }

    #[test]
    fn test_stops_at_bank_boundary() {
        // NOPs run off the end of bank 0
        let mut rom = vec![0xEA; 0x10000];
        rom[0x8000] = 0x60;
        let walk = walk(&rom, 0x7FF0);
        assert_eq!(walk.state, WalkState::TerminatedTruncated);
        assert_eq!(walk.instructions.len(), 0x10);
        assert_eq!(walk.truncated_at, Some(0x8000));
    }

    #[test]
    fn test_call_targets_forget_data_bank() {
        // PHK; PLB; BEQ +3; JSR $8010; RTS
        let rom = rom_with(&[(0, &[0x4B, 0xAB, 0xF0, 0x03, 0x20, 0x10, 0x80, 0x60]), (0x10, &[0x60])]);
        let walk = walk(&rom, 0);
        assert_eq!(walk.branches[0].context.data_bank, Some(0x00));
        assert_eq!(walk.calls[0].context.data_bank, None);
        assert_eq!(walk.exit_context.data_bank, Some(0x00));
    }

    #[test]
    fn test_rep_widens_following_immediate() {
        // CLC; XCE; REP #$20; LDA #$1234; RTS
        let rom = rom_with(&[(0, &[0x18, 0xFB, 0xC2, 0x20, 0xA9, 0x34, 0x12, 0x60])]);
        let walk = walk(&rom, 0);
        assert_eq!(walk.state, WalkState::TerminatedReturn);
        assert_eq!(walk.instructions[3].size, 3);
        assert!(walk.exit_context.accumulator_16);
    }
}
