//! 65C816 instruction decoding under a tracked processor state.

use std::fmt;

use serde::Serialize;

use crate::mapping::{AddressTranslator, CpuAddress, MappingType};
use crate::opcodes::{descriptor, AddressingMode, Mnemonic};
use crate::{Decoder, RomOffset};

/// Longest 65C816 instruction in bytes.
pub const MAX_INSTRUCTION_SIZE: usize = 4;

/// Depth of the PHP/PLP shadow stack.
const SAVED_STATUS_DEPTH: usize = 8;

/// Bytes of the hardware stack followed for `PHK`/`PHB`/`PLB`.
const SHADOW_STACK_DEPTH: usize = 8;

/// Status-register bit for accumulator/memory width.
pub const FLAG_M: u8 = 0x20;
/// Status-register bit for index width.
pub const FLAG_X: u8 = 0x10;
/// Status-register bit for carry.
pub const FLAG_C: u8 = 0x01;

/// Errors that can occur during decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The instruction at `offset` needs more bytes than the image holds
    #[error("instruction at 0x{offset:06x} needs {needed} bytes, {available} available")]
    TruncatedInstruction {
        offset: RomOffset,
        needed: usize,
        available: usize,
    },

    /// The layout gives `offset` no CPU address
    #[error("offset 0x{offset:06x} is outside the mapped part of the image")]
    UnmappedOffset { offset: RomOffset },
}

/// Register widths and mode bits in effect at an instruction.
///
/// Only what changes decoding or operand resolution is tracked. The carry is
/// kept so `CLC; XCE` and `SEC; XCE` resolve the mode exactly, and a small
/// byte shadow of the stack follows the data bank through `PHK`/`PHB`/`PLB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProcessorContext {
    /// M flag clear: accumulator and memory operations are 16-bit.
    pub accumulator_16: bool,
    /// X flag clear: index registers are 16-bit.
    pub index_16: bool,
    /// Data bank register, `None` when it cannot be known statically.
    pub data_bank: Option<u8>,
    pub emulation: bool,
    /// An `XCE` ran with an unknown carry, so `emulation` is a guess.
    pub mode_uncertain: bool,
    /// Last statically known carry value.
    pub carry: Option<bool>,
    #[serde(skip)]
    saved: [(bool, bool); SAVED_STATUS_DEPTH],
    #[serde(skip)]
    depth: u8,
    /// Pushed bytes, `None` where the value is unknown.
    #[serde(skip)]
    stack: [Option<u8>; SHADOW_STACK_DEPTH],
    #[serde(skip)]
    stack_depth: u8,
}

impl Default for ProcessorContext {
    /// Native mode with 8-bit registers.
    fn default() -> Self {
        Self {
            accumulator_16: false,
            index_16: false,
            data_bank: None,
            emulation: false,
            mode_uncertain: false,
            carry: None,
            saved: [(false, false); SAVED_STATUS_DEPTH],
            depth: 0,
            stack: [None; SHADOW_STACK_DEPTH],
            stack_depth: 0,
        }
    }
}

impl ProcessorContext {
    /// Emulation mode with 8-bit registers, as on entry to an emulation-mode interrupt.
    pub fn emulation() -> Self {
        Self {
            emulation: true,
            ..Self::default()
        }
    }

    /// State right after reset: emulation mode with the data bank cleared.
    pub fn reset() -> Self {
        Self {
            data_bank: Some(0),
            ..Self::emulation()
        }
    }

    /// State a called or jumped-to routine starts with.
    ///
    /// Widths carry over from the transfer site; the data bank and the stack
    /// shadow do not, since other callers may differ.
    pub fn enter_routine(mut self) -> Self {
        self.data_bank = None;
        self.stack_depth = 0;
        self
    }

    fn push_byte(&mut self, value: Option<u8>) {
        if (self.stack_depth as usize) < SHADOW_STACK_DEPTH {
            self.stack[self.stack_depth as usize] = value;
            self.stack_depth += 1;
        } else {
            self.stack.rotate_left(1);
            self.stack[SHADOW_STACK_DEPTH - 1] = value;
        }
    }

    fn push_unknown(&mut self, count: usize) {
        for _ in 0..count {
            self.push_byte(None);
        }
    }

    /// Pop one byte; an empty shadow yields `None`.
    fn pop_byte(&mut self) -> Option<u8> {
        if self.stack_depth == 0 {
            return None;
        }
        self.stack_depth -= 1;
        self.stack[self.stack_depth as usize]
    }

    fn pop_unknown(&mut self, count: usize) {
        for _ in 0..count {
            self.pop_byte();
        }
    }

    /// Native mode with explicit widths.
    pub fn native(accumulator_16: bool, index_16: bool) -> Self {
        Self {
            accumulator_16,
            index_16,
            ..Self::default()
        }
    }

    /// `REP #mask`: clear status bits, widening registers in native mode.
    pub fn rep(&mut self, mask: u8) {
        if self.mode_uncertain {
            // widening only makes sense in native mode
            self.emulation = false;
            self.mode_uncertain = false;
        }
        if !self.emulation {
            if mask & FLAG_M != 0 {
                self.accumulator_16 = true;
            }
            if mask & FLAG_X != 0 {
                self.index_16 = true;
            }
        }
        if mask & FLAG_C != 0 {
            self.carry = Some(false);
        }
    }

    /// `SEP #mask`: set status bits, narrowing registers.
    pub fn sep(&mut self, mask: u8) {
        if mask & FLAG_M != 0 {
            self.accumulator_16 = false;
        }
        if mask & FLAG_X != 0 {
            self.index_16 = false;
        }
        if mask & FLAG_C != 0 {
            self.carry = Some(true);
        }
    }

    /// `XCE`: swap carry and emulation. Registers come out 8-bit either way.
    pub fn xce(&mut self) {
        self.accumulator_16 = false;
        self.index_16 = false;
        match self.carry {
            Some(carry) => {
                let previous = (!self.mode_uncertain).then_some(self.emulation);
                self.emulation = carry;
                self.mode_uncertain = false;
                self.carry = previous;
            }
            None => {
                self.mode_uncertain = true;
                self.carry = None;
            }
        }
    }

    /// `PHP`: remember the current widths.
    pub fn php(&mut self) {
        let entry = (self.accumulator_16, self.index_16);
        if (self.depth as usize) < SAVED_STATUS_DEPTH {
            self.saved[self.depth as usize] = entry;
            self.depth += 1;
        } else {
            self.saved.rotate_left(1);
            self.saved[SAVED_STATUS_DEPTH - 1] = entry;
        }
    }

    /// `PLP`: restore the widths from the matching `PHP`, if one was seen.
    pub fn plp(&mut self) {
        if self.depth > 0 {
            self.depth -= 1;
            let (accumulator_16, index_16) = self.saved[self.depth as usize];
            self.accumulator_16 = accumulator_16 && !self.emulation;
            self.index_16 = index_16 && !self.emulation;
        }
        self.carry = None;
    }

    /// Advance the state past `instruction`.
    pub fn apply(&mut self, instruction: &Instruction) {
        use Mnemonic::*;

        let operand = instruction.operand.unwrap_or(0) as u8;
        let a_len = if self.accumulator_16 { 2 } else { 1 };
        let x_len = if self.index_16 { 2 } else { 1 };
        match instruction.mnemonic {
            Rep => self.rep(operand),
            Sep => self.sep(operand),
            Xce => self.xce(),
            Clc => self.carry = Some(false),
            Sec => self.carry = Some(true),
            Php => {
                self.php();
                self.push_byte(None);
            }
            Plp => {
                self.plp();
                self.pop_byte();
            }
            Phk => self.push_byte(Some(instruction.address.bank)),
            Phb => self.push_byte(self.data_bank),
            Plb => self.data_bank = self.pop_byte(),
            Pha => self.push_unknown(a_len),
            Phx | Phy => self.push_unknown(x_len),
            Phd | Pea | Pei | Per => self.push_unknown(2),
            Pla => self.pop_unknown(a_len),
            Plx | Ply => self.pop_unknown(x_len),
            Pld => self.pop_unknown(2),
            Tcs | Txs => self.stack_depth = 0,
            Mvn | Mvp => self.data_bank = instruction.block_move.map(|m| m.destination),
            m if m.writes_carry() => self.carry = None,
            _ => {}
        }
    }

    /// The widths as they would read in the status register.
    pub fn status_bits(&self) -> u8 {
        let mut p = 0;
        if !self.accumulator_16 {
            p |= FLAG_M;
        }
        if !self.index_16 {
            p |= FLAG_X;
        }
        if self.carry == Some(true) {
            p |= FLAG_C;
        }
        p
    }
}

/// Source and destination banks of an `MVN`/`MVP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockMove {
    pub source: u8,
    pub destination: u8,
}

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Falls through to the next instruction.
    Next,
    /// JSR/JSL; `None` when the target goes through a pointer.
    Call(Option<CpuAddress>),
    /// Conditional branch; also falls through.
    Branch(CpuAddress),
    /// BRA/BRL: unconditional, stays in the same routine.
    Goto(CpuAddress),
    /// JMP/JML; `None` when indirect.
    Jump(Option<CpuAddress>),
    /// RTS, RTL or RTI.
    Return,
    /// STP.
    Halt,
}

/// One decoded instruction. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub offset: RomOffset,
    pub address: CpuAddress,
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Raw bytes, valid up to `size`.
    pub bytes: [u8; MAX_INSTRUCTION_SIZE],
    pub size: u8,
    pub cycles: u8,
    /// Little-endian operand value as encoded.
    pub operand: Option<u32>,
    /// Statically known effective value: a 24-bit address or an immediate.
    pub resolved: Option<u32>,
    pub block_move: Option<BlockMove>,
}

impl Instruction {
    /// Returns the instruction bytes, up to the actual instruction size.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.size as usize]
    }

    pub fn operand_bytes(&self) -> &[u8] {
        &self.bytes[1..self.size as usize]
    }

    /// First offset after this instruction.
    pub fn end(&self) -> RomOffset {
        self.offset + self.size as usize
    }

    pub fn resolved_address(&self) -> Option<CpuAddress> {
        self.resolved.map(CpuAddress::from_u24)
    }

    /// Classify how execution continues after this instruction.
    pub fn flow(&self) -> Flow {
        let target = match self.mode {
            AddressingMode::Absolute
            | AddressingMode::AbsoluteLong
            | AddressingMode::Relative
            | AddressingMode::RelativeLong => self.resolved_address(),
            _ => None,
        };
        match self.mnemonic {
            m if m.is_call() => Flow::Call(target),
            m if m.is_return() => Flow::Return,
            Mnemonic::Stp => Flow::Halt,
            Mnemonic::Bra | Mnemonic::Brl => match target {
                Some(target) => Flow::Goto(target),
                None => Flow::Jump(None),
            },
            Mnemonic::Jmp | Mnemonic::Jml => Flow::Jump(target),
            m if m.is_conditional_branch() => match target {
                Some(target) => Flow::Branch(target),
                None => Flow::Next,
            },
            _ => Flow::Next,
        }
    }

    /// Whether this instruction ends straight-line execution.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.flow(),
            Flow::Return | Flow::Halt | Flow::Jump(_) | Flow::Goto(_)
        )
    }

    fn operand_text(&self) -> String {
        use AddressingMode::*;
        let value = self.operand.unwrap_or(0);
        let width = self.size.saturating_sub(1) as usize * 2;
        let hex = format!("${:0width$X}", value, width = width);
        match self.mode {
            Implied => String::new(),
            Accumulator => "A".to_string(),
            Immediate => format!("#{}", hex),
            Absolute | AbsoluteLong | Direct => hex,
            AbsoluteX | AbsoluteLongX | DirectX => format!("{},X", hex),
            AbsoluteY | DirectY => format!("{},Y", hex),
            AbsoluteIndirect | DirectIndirect => format!("({})", hex),
            AbsoluteIndexedIndirect | DirectIndexedIndirect => format!("({},X)", hex),
            DirectIndirectIndexed => format!("({}),Y", hex),
            AbsoluteIndirectLong | DirectIndirectLong => format!("[{}]", hex),
            DirectIndirectLongIndexed => format!("[{}],Y", hex),
            StackRelative => format!("{},S", hex),
            StackRelativeIndirectIndexed => format!("({},S),Y", hex),
            Relative | RelativeLong => match self.resolved_address() {
                Some(target) => format!("${:04X}", target.addr),
                None => hex,
            },
            BlockMove => match self.block_move {
                Some(moves) => format!("${:02X},${:02X}", moves.source, moves.destination),
                None => hex,
            },
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operand = self.operand_text();
        if operand.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, operand)
        }
    }
}

/// Table-driven 65C816 decoder bound to one image layout.
#[derive(Debug, Clone, Copy)]
pub struct SnesDecoder {
    translator: AddressTranslator,
}

impl SnesDecoder {
    pub fn new(translator: AddressTranslator) -> Self {
        Self { translator }
    }

    /// Decoder for a `rom_len`-byte image with the given layout.
    pub fn for_mapping(mapping: MappingType, rom_len: usize) -> Self {
        Self::new(AddressTranslator::new(mapping, rom_len))
    }
}

impl Decoder for SnesDecoder {
    fn decode(
        &self,
        rom: &[u8],
        offset: RomOffset,
        context: &ProcessorContext,
    ) -> Result<Instruction, DecodeError> {
        let truncated = |needed: usize| DecodeError::TruncatedInstruction {
            offset,
            needed,
            available: rom.len().saturating_sub(offset),
        };

        let opcode = *rom.get(offset).ok_or_else(|| truncated(1))?;
        let address = self
            .translator
            .rom_offset_to_cpu(offset)
            .ok_or(DecodeError::UnmappedOffset { offset })?;
        let desc = descriptor(opcode);
        let operand_len = desc.operand_len_with(context.accumulator_16, context.index_16) as usize;
        let size = 1 + operand_len;
        let raw = rom.get(offset..offset + size).ok_or_else(|| truncated(size))?;

        let mut bytes = [0u8; MAX_INSTRUCTION_SIZE];
        bytes[..size].copy_from_slice(raw);
        let operand = (operand_len > 0).then(|| {
            raw[1..]
                .iter()
                .rev()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32)
        });

        let block_move = (desc.mode == AddressingMode::BlockMove).then(|| BlockMove {
            destination: raw[1],
            source: raw[2],
        });

        Ok(Instruction {
            offset,
            address,
            opcode,
            mnemonic: desc.mnemonic,
            mode: desc.mode,
            bytes,
            size: size as u8,
            cycles: desc.cycles + (operand_len as u8).saturating_sub(desc.operand_len),
            resolved: operand.and_then(|value| resolve(desc.mnemonic, desc.mode, value, address, size, context)),
            operand,
            block_move,
        })
    }

    fn translator(&self) -> &AddressTranslator {
        &self.translator
    }
}

/// Effective value of an operand when it can be computed without running code.
fn resolve(
    mnemonic: Mnemonic,
    mode: AddressingMode,
    value: u32,
    address: CpuAddress,
    size: usize,
    context: &ProcessorContext,
) -> Option<u32> {
    match mode {
        AddressingMode::Immediate => Some(value),
        AddressingMode::Relative => {
            let displacement = value as u8 as i8 as i32;
            Some(address.wrapping_add(size as i32 + displacement).to_u24())
        }
        AddressingMode::RelativeLong => {
            let displacement = value as u16 as i16 as i32;
            Some(address.wrapping_add(size as i32 + displacement).to_u24())
        }
        AddressingMode::AbsoluteLong => Some(value),
        AddressingMode::Absolute => match mnemonic {
            Mnemonic::Jmp | Mnemonic::Jsr => Some(CpuAddress::new(address.bank, value as u16).to_u24()),
            Mnemonic::Pea => Some(value),
            _ => context
                .data_bank
                .map(|bank| CpuAddress::new(bank, value as u16).to_u24()),
        },
        _ => None,
    }
}

/// Decode one instruction from a ROM of the given layout.
pub fn decode(
    rom: &[u8],
    offset: RomOffset,
    context: &ProcessorContext,
    mapping: MappingType,
) -> Result<Instruction, DecodeError> {
    SnesDecoder::for_mapping(mapping, rom.len()).decode(rom, offset, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn lorom(bytes: &[u8]) -> Vec<u8> {
        let mut rom = vec![0xEA; 0x8000];
        rom[..bytes.len()].copy_from_slice(bytes);
        rom
    }

    #[rstest]
    #[case(false, false, 2)]
    #[case(true, false, 3)]
    #[case(false, true, 2)]
    fn test_lda_immediate_follows_m(#[case] a16: bool, #[case] x16: bool, #[case] size: u8) {
        let rom = lorom(&[0xA9, 0x34, 0x12]);
        let insn = decode(&rom, 0, &ProcessorContext::native(a16, x16), MappingType::LoRom).unwrap();
        assert_eq!(insn.mnemonic, Mnemonic::Lda);
        assert_eq!(insn.size, size);
    }

    #[rstest]
    #[case(0xA2, false, 2)]
    #[case(0xA2, true, 3)]
    #[case(0xC0, true, 3)]
    fn test_index_immediate_follows_x(#[case] opcode: u8, #[case] x16: bool, #[case] size: u8) {
        let rom = lorom(&[opcode, 0x34, 0x12]);
        let insn = decode(&rom, 0, &ProcessorContext::native(false, x16), MappingType::LoRom).unwrap();
        assert_eq!(insn.size, size);
    }

    #[rstest]
    #[case(0xC2)]
    #[case(0xE2)]
    #[case(0x00)]
    #[case(0x02)]
    #[case(0x42)]
    fn test_fixed_width_immediates(#[case] opcode: u8) {
        let rom = lorom(&[opcode, 0x30, 0xEA]);
        let insn = decode(&rom, 0, &ProcessorContext::native(true, true), MappingType::LoRom).unwrap();
        assert_eq!(insn.size, 2);
    }

    #[test]
    fn test_branch_to_self() {
        let mut rom = lorom(&[]);
        rom[0x10] = 0xF0;
        rom[0x11] = 0xFE;
        let insn = decode(&rom, 0x10, &ProcessorContext::default(), MappingType::LoRom).unwrap();
        assert_eq!(insn.address, CpuAddress::new(0x00, 0x8010));
        assert_eq!(insn.resolved_address(), Some(CpuAddress::new(0x00, 0x8010)));
        assert_eq!(insn.flow(), Flow::Branch(CpuAddress::new(0x00, 0x8010)));
        assert_eq!(insn.to_string(), "BEQ $8010");
    }

    #[test]
    fn test_branch_wraps_within_bank() {
        // BRL at $00:FFFD jumping forward wraps to the start of bank 0
        let mut rom = lorom(&[]);
        rom[0x7FFD..0x8000].copy_from_slice(&[0x82, 0x10, 0x00]);
        let insn = decode(&rom, 0x7FFD, &ProcessorContext::default(), MappingType::LoRom).unwrap();
        assert_eq!(insn.resolved_address(), Some(CpuAddress::new(0x00, 0x0010)));
    }

    #[test]
    fn test_block_move_banks() {
        let rom = lorom(&[0x54, 0x7E, 0xC0]);
        let insn = decode(&rom, 0, &ProcessorContext::default(), MappingType::LoRom).unwrap();
        assert_eq!(insn.size, 3);
        assert_eq!(
            insn.block_move,
            Some(BlockMove {
                source: 0xC0,
                destination: 0x7E
            })
        );
        assert_eq!(insn.to_string(), "MVN $C0,$7E");
    }

    #[test]
    fn test_truncated_at_end_of_image() {
        let rom = [0xEA, 0xAD, 0x00];
        let err = decode(&rom, 1, &ProcessorContext::default(), MappingType::LoRom).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedInstruction {
                offset: 1,
                needed: 3,
                available: 2
            }
        );
        assert!(decode(&rom, 3, &ProcessorContext::default(), MappingType::LoRom).is_err());
    }

    #[test]
    fn test_unmapped_offset_is_not_decoded() {
        let rom = vec![0xEA; 0x40_0010];
        let err = decode(&rom, 0x40_0000, &ProcessorContext::default(), MappingType::LoRom).unwrap_err();
        assert_eq!(err, DecodeError::UnmappedOffset { offset: 0x40_0000 });

        let insn = decode(&rom, 0x40_0000, &ProcessorContext::default(), MappingType::ExHiRom).unwrap();
        assert_eq!(insn.address, CpuAddress::new(0x40, 0x0000));
    }

    #[test]
    fn test_jump_targets_and_indirects() {
        let rom = lorom(&[0x20, 0x10, 0x80, 0x5C, 0x00, 0x90, 0x01, 0x6C, 0x00, 0x02]);
        let ctx = ProcessorContext::default();
        let jsr = decode(&rom, 0, &ctx, MappingType::LoRom).unwrap();
        assert_eq!(jsr.flow(), Flow::Call(Some(CpuAddress::new(0, 0x8010))));

        let jml = decode(&rom, 3, &ctx, MappingType::LoRom).unwrap();
        assert_eq!(jml.flow(), Flow::Jump(Some(CpuAddress::new(0x01, 0x9000))));
        assert_eq!(jml.to_string(), "JML $019000");

        let indirect = decode(&rom, 7, &ctx, MappingType::LoRom).unwrap();
        assert_eq!(indirect.resolved, None);
        assert_eq!(indirect.flow(), Flow::Jump(None));
        assert_eq!(indirect.to_string(), "JMP ($0200)");
    }

    #[test]
    fn test_absolute_data_uses_data_bank() {
        let rom = lorom(&[0xAD, 0x00, 0x21]);
        let ctx = ProcessorContext {
            data_bank: Some(0x7E),
            ..ProcessorContext::default()
        };
        let insn = decode(&rom, 0, &ctx, MappingType::LoRom).unwrap();
        assert_eq!(insn.resolved, Some(0x7E2100));

        let unknown = decode(&rom, 0, &ProcessorContext::default(), MappingType::LoRom).unwrap();
        assert_eq!(unknown.resolved, None);
        let after_reset = decode(&rom, 0, &ProcessorContext::reset(), MappingType::LoRom).unwrap();
        assert_eq!(after_reset.resolved, Some(0x002100));
    }

    #[rstest]
    // PHK; PLB; LDA $2000 in bank $01
    #[case(&[0x4B, 0xAB, 0xAD, 0x00, 0x20], 3, Some(0x012000))]
    // LDA #$7E; PHA; PLB; LDA $2000: pushed value is not tracked
    #[case(&[0xA9, 0x7E, 0x48, 0xAB, 0xAD, 0x00, 0x20], 4, None)]
    // PHB; PHA; PLA; PLB keeps the reset bank
    #[case(&[0x8B, 0x48, 0x68, 0xAB, 0xAD, 0x00, 0x20], 5, Some(0x002000))]
    // PLB with nothing pushed
    #[case(&[0xAB, 0xAD, 0x00, 0x20], 2, None)]
    // MVN $7E,$C0 leaves DBR at the destination bank
    #[case(&[0x54, 0x7E, 0xC0, 0xAD, 0x00, 0x20], 2, Some(0x7E2000))]
    fn test_data_bank_follows_stack(#[case] code: &[u8], #[case] count: usize, #[case] expected: Option<u32>) {
        // second LoROM bank, so PHK pushes $01
        let mut rom = vec![0xEA; 0x10000];
        rom[0x8000..0x8000 + code.len()].copy_from_slice(code);
        let mut ctx = ProcessorContext::reset();
        let mut at = 0x8000;
        for _ in 0..count - 1 {
            let insn = decode(&rom, at, &ctx, MappingType::LoRom).unwrap();
            ctx.apply(&insn);
            at = insn.end();
        }
        let lda = decode(&rom, at, &ctx, MappingType::LoRom).unwrap();
        assert_eq!(lda.mnemonic, Mnemonic::Lda);
        assert_eq!(lda.resolved, expected);
    }

    #[test]
    fn test_enter_routine_forgets_data_bank() {
        let mut ctx = ProcessorContext::native(true, false);
        ctx.data_bank = Some(0x7E);
        let entered = ctx.enter_routine();
        assert_eq!(entered.data_bank, None);
        assert!(entered.accumulator_16);
    }

    #[test]
    fn test_rep_sep_xce() {
        let mut ctx = ProcessorContext::emulation();
        ctx.rep(0x30);
        assert!(!ctx.accumulator_16, "REP cannot widen in emulation mode");

        ctx.carry = Some(false);
        ctx.xce();
        assert!(!ctx.emulation);
        assert_eq!(ctx.carry, Some(true));
        ctx.rep(0x30);
        assert!(ctx.accumulator_16 && ctx.index_16);
        ctx.sep(0x20);
        assert!(!ctx.accumulator_16 && ctx.index_16);

        ctx.carry = None;
        ctx.xce();
        assert!(ctx.mode_uncertain);
        assert!(!ctx.accumulator_16 && !ctx.index_16);
        ctx.rep(0x20);
        assert!(!ctx.mode_uncertain && !ctx.emulation);
        assert!(ctx.accumulator_16);
    }

    #[test]
    fn test_php_plp_restores_widths() {
        let mut ctx = ProcessorContext::native(true, true);
        ctx.php();
        ctx.sep(0x30);
        assert_eq!(ctx.status_bits() & (FLAG_M | FLAG_X), FLAG_M | FLAG_X);
        ctx.plp();
        assert!(ctx.accumulator_16 && ctx.index_16);
        // unmatched PLP keeps what we have
        ctx.plp();
        assert!(ctx.accumulator_16);
    }

    #[test]
    fn test_apply_tracks_clc_xce_rep() {
        let rom = lorom(&[0x18, 0xFB, 0xC2, 0x30, 0xA9, 0x00, 0x00]);
        let mut ctx = ProcessorContext::emulation();
        let mut at = 0;
        for _ in 0..3 {
            let insn = decode(&rom, at, &ctx, MappingType::LoRom).unwrap();
            ctx.apply(&insn);
            at = insn.end();
        }
        assert!(!ctx.emulation && !ctx.mode_uncertain);
        let lda = decode(&rom, at, &ctx, MappingType::LoRom).unwrap();
        assert_eq!(lda.size, 3);
        assert_eq!(lda.to_string(), "LDA #$0000");
    }
}
