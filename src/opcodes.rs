//! Static 65C816 opcode matrix.
//!
//! Every one of the 256 opcode values is a defined instruction on the 65C816,
//! so the table is complete and [`lookup`] never returns `None` in practice.
//! Immediate operands are the only ones whose size is not fixed: their width
//! follows the M or X status flag (see [`ImmediateWidth`]).

use std::fmt;
use serde::Serialize;

/// An operation mnemonic, independent of addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Bra, Brk, Brl, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cop, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny,
    Jml, Jmp, Jsl, Jsr, Lda, Ldx, Ldy, Lsr, Mvn, Mvp, Nop, Ora, Pea, Pei, Per,
    Pha, Phb, Phd, Phk, Php, Phx, Phy, Pla, Plb, Pld, Plp, Plx, Ply, Rep, Rol,
    Ror, Rti, Rtl, Rts, Sbc, Sec, Sed, Sei, Sep, Sta, Stp, Stx, Sty, Stz, Tax,
    Tay, Tcd, Tcs, Tdc, Trb, Tsb, Tsc, Tsx, Txa, Txs, Txy, Tya, Tyx, Wai, Wdm,
    Xba, Xce,
}

impl Mnemonic {
    /// Assembler spelling of the mnemonic.
    pub fn as_str(self) -> &'static str {
        use Mnemonic::*;
        match self {
            Adc => "ADC", And => "AND", Asl => "ASL", Bcc => "BCC", Bcs => "BCS",
            Beq => "BEQ", Bit => "BIT", Bmi => "BMI", Bne => "BNE", Bpl => "BPL",
            Bra => "BRA", Brk => "BRK", Brl => "BRL", Bvc => "BVC", Bvs => "BVS",
            Clc => "CLC", Cld => "CLD", Cli => "CLI", Clv => "CLV", Cmp => "CMP",
            Cop => "COP", Cpx => "CPX", Cpy => "CPY", Dec => "DEC", Dex => "DEX",
            Dey => "DEY", Eor => "EOR", Inc => "INC", Inx => "INX", Iny => "INY",
            Jml => "JML", Jmp => "JMP", Jsl => "JSL", Jsr => "JSR", Lda => "LDA",
            Ldx => "LDX", Ldy => "LDY", Lsr => "LSR", Mvn => "MVN", Mvp => "MVP",
            Nop => "NOP", Ora => "ORA", Pea => "PEA", Pei => "PEI", Per => "PER",
            Pha => "PHA", Phb => "PHB", Phd => "PHD", Phk => "PHK", Php => "PHP",
            Phx => "PHX", Phy => "PHY", Pla => "PLA", Plb => "PLB", Pld => "PLD",
            Plp => "PLP", Plx => "PLX", Ply => "PLY", Rep => "REP", Rol => "ROL",
            Ror => "ROR", Rti => "RTI", Rtl => "RTL", Rts => "RTS", Sbc => "SBC",
            Sec => "SEC", Sed => "SED", Sei => "SEI", Sep => "SEP", Sta => "STA",
            Stp => "STP", Stx => "STX", Sty => "STY", Stz => "STZ", Tax => "TAX",
            Tay => "TAY", Tcd => "TCD", Tcs => "TCS", Tdc => "TDC", Trb => "TRB",
            Tsb => "TSB", Tsc => "TSC", Tsx => "TSX", Txa => "TXA", Txs => "TXS",
            Txy => "TXY", Tya => "TYA", Tyx => "TYX", Wai => "WAI", Wdm => "WDM",
            Xba => "XBA", Xce => "XCE",
        }
    }

    /// Which status flag decides the width of this mnemonic's immediate operand.
    pub const fn immediate_width(self) -> ImmediateWidth {
        use Mnemonic::*;
        match self {
            Ora | And | Eor | Adc | Bit | Lda | Cmp | Sbc => ImmediateWidth::Accumulator,
            Ldx | Ldy | Cpx | Cpy => ImmediateWidth::Index,
            _ => ImmediateWidth::Byte,
        }
    }

    /// RTS, RTL and RTI.
    pub fn is_return(self) -> bool {
        matches!(self, Mnemonic::Rts | Mnemonic::Rtl | Mnemonic::Rti)
    }

    /// JSR and JSL.
    pub fn is_call(self) -> bool {
        matches!(self, Mnemonic::Jsr | Mnemonic::Jsl)
    }

    /// The eight flag-testing branches.
    pub fn is_conditional_branch(self) -> bool {
        use Mnemonic::*;
        matches!(self, Bpl | Bmi | Bvc | Bvs | Bcc | Bcs | Bne | Beq)
    }

    /// Transfers with no fall-through path.
    pub fn is_unconditional_transfer(self) -> bool {
        matches!(self, Mnemonic::Jmp | Mnemonic::Jml | Mnemonic::Bra | Mnemonic::Brl)
    }

    /// Whether executing this instruction can change the carry flag.
    pub fn writes_carry(self) -> bool {
        use Mnemonic::*;
        matches!(
            self,
            Adc | Sbc | Cmp | Cpx | Cpy | Asl | Lsr | Rol | Ror | Clc | Sec | Plp | Rti | Rep
                | Sep | Xce
        )
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the size of an `Immediate` operand is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImmediateWidth {
    /// Always one byte (REP, SEP, BRK, COP, WDM).
    Byte,
    /// Follows the accumulator width flag M.
    Accumulator,
    /// Follows the index width flag X.
    Index,
}

/// 65C816 addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    /// `$hhll`
    Absolute,
    /// `$hhll,X`
    AbsoluteX,
    /// `$hhll,Y`
    AbsoluteY,
    /// `$bbhhll`
    AbsoluteLong,
    /// `$bbhhll,X`
    AbsoluteLongX,
    /// `($hhll)`
    AbsoluteIndirect,
    /// `($hhll,X)`
    AbsoluteIndexedIndirect,
    /// `[$hhll]`
    AbsoluteIndirectLong,
    /// `$dp`
    Direct,
    /// `$dp,X`
    DirectX,
    /// `$dp,Y`
    DirectY,
    /// `($dp)`
    DirectIndirect,
    /// `($dp,X)`
    DirectIndexedIndirect,
    /// `($dp),Y`
    DirectIndirectIndexed,
    /// `[$dp]`
    DirectIndirectLong,
    /// `[$dp],Y`
    DirectIndirectLongIndexed,
    /// `$sr,S`
    StackRelative,
    /// `($sr,S),Y`
    StackRelativeIndirectIndexed,
    Relative,
    RelativeLong,
    /// `$src,$dst` for MVN/MVP
    BlockMove,
}

impl AddressingMode {
    /// Operand length in bytes, with immediate operands at their 8-bit size.
    pub const fn base_operand_len(self) -> u8 {
        use AddressingMode::*;
        match self {
            Implied | Accumulator => 0,
            Immediate | Direct | DirectX | DirectY | DirectIndirect | DirectIndexedIndirect
            | DirectIndirectIndexed | DirectIndirectLong | DirectIndirectLongIndexed
            | StackRelative | StackRelativeIndirectIndexed | Relative => 1,
            Absolute | AbsoluteX | AbsoluteY | AbsoluteIndirect | AbsoluteIndexedIndirect
            | AbsoluteIndirectLong | RelativeLong | BlockMove => 2,
            AbsoluteLong | AbsoluteLongX => 3,
        }
    }

    /// Modes whose effective address goes through a pointer in memory.
    pub fn is_indirect(self) -> bool {
        use AddressingMode::*;
        matches!(
            self,
            AbsoluteIndirect
                | AbsoluteIndexedIndirect
                | AbsoluteIndirectLong
                | DirectIndirect
                | DirectIndexedIndirect
                | DirectIndirectIndexed
                | DirectIndirectLong
                | DirectIndirectLongIndexed
                | StackRelativeIndirectIndexed
        )
    }
}

/// Immutable metadata for one opcode value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpcodeDescriptor {
    pub opcode: u8,
    pub mnemonic: Mnemonic,
    pub mode: AddressingMode,
    /// Operand bytes with 8-bit registers; immediate operands may grow by one.
    pub operand_len: u8,
    /// Base cycle count with 8-bit registers and no page/bank penalties.
    pub cycles: u8,
    pub immediate: ImmediateWidth,
}

impl OpcodeDescriptor {
    /// Size of the whole instruction with 8-bit registers.
    pub const fn base_size(&self) -> u8 {
        1 + self.operand_len
    }

    /// Operand length once the M/X widths are known.
    pub fn operand_len_with(&self, accumulator_16: bool, index_16: bool) -> u8 {
        if self.mode != AddressingMode::Immediate {
            return self.operand_len;
        }
        match self.immediate {
            ImmediateWidth::Byte => 1,
            ImmediateWidth::Accumulator => 1 + accumulator_16 as u8,
            ImmediateWidth::Index => 1 + index_16 as u8,
        }
    }
}

const fn op(opcode: u8, mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> OpcodeDescriptor {
    OpcodeDescriptor {
        opcode,
        mnemonic,
        mode,
        operand_len: mode.base_operand_len(),
        cycles,
        immediate: mnemonic.immediate_width(),
    }
}

use AddressingMode::*;
use Mnemonic::*;

/// The full opcode matrix, indexed by opcode value.
pub static OPCODES: [OpcodeDescriptor; 256] = [
    op(0x00, Brk, Immediate, 7), op(0x01, Ora, DirectIndexedIndirect, 6),
    op(0x02, Cop, Immediate, 7), op(0x03, Ora, StackRelative, 4),
    op(0x04, Tsb, Direct, 5), op(0x05, Ora, Direct, 3),
    op(0x06, Asl, Direct, 5), op(0x07, Ora, DirectIndirectLong, 6),
    op(0x08, Php, Implied, 3), op(0x09, Ora, Immediate, 2),
    op(0x0A, Asl, Accumulator, 2), op(0x0B, Phd, Implied, 4),
    op(0x0C, Tsb, Absolute, 6), op(0x0D, Ora, Absolute, 4),
    op(0x0E, Asl, Absolute, 6), op(0x0F, Ora, AbsoluteLong, 5),

    op(0x10, Bpl, Relative, 2), op(0x11, Ora, DirectIndirectIndexed, 5),
    op(0x12, Ora, DirectIndirect, 5), op(0x13, Ora, StackRelativeIndirectIndexed, 7),
    op(0x14, Trb, Direct, 5), op(0x15, Ora, DirectX, 4),
    op(0x16, Asl, DirectX, 6), op(0x17, Ora, DirectIndirectLongIndexed, 6),
    op(0x18, Clc, Implied, 2), op(0x19, Ora, AbsoluteY, 4),
    op(0x1A, Inc, Accumulator, 2), op(0x1B, Tcs, Implied, 2),
    op(0x1C, Trb, Absolute, 6), op(0x1D, Ora, AbsoluteX, 4),
    op(0x1E, Asl, AbsoluteX, 7), op(0x1F, Ora, AbsoluteLongX, 5),

    op(0x20, Jsr, Absolute, 6), op(0x21, And, DirectIndexedIndirect, 6),
    op(0x22, Jsl, AbsoluteLong, 8), op(0x23, And, StackRelative, 4),
    op(0x24, Bit, Direct, 3), op(0x25, And, Direct, 3),
    op(0x26, Rol, Direct, 5), op(0x27, And, DirectIndirectLong, 6),
    op(0x28, Plp, Implied, 4), op(0x29, And, Immediate, 2),
    op(0x2A, Rol, Accumulator, 2), op(0x2B, Pld, Implied, 5),
    op(0x2C, Bit, Absolute, 4), op(0x2D, And, Absolute, 4),
    op(0x2E, Rol, Absolute, 6), op(0x2F, And, AbsoluteLong, 5),

    op(0x30, Bmi, Relative, 2), op(0x31, And, DirectIndirectIndexed, 5),
    op(0x32, And, DirectIndirect, 5), op(0x33, And, StackRelativeIndirectIndexed, 7),
    op(0x34, Bit, DirectX, 4), op(0x35, And, DirectX, 4),
    op(0x36, Rol, DirectX, 6), op(0x37, And, DirectIndirectLongIndexed, 6),
    op(0x38, Sec, Implied, 2), op(0x39, And, AbsoluteY, 4),
    op(0x3A, Dec, Accumulator, 2), op(0x3B, Tsc, Implied, 2),
    op(0x3C, Bit, AbsoluteX, 4), op(0x3D, And, AbsoluteX, 4),
    op(0x3E, Rol, AbsoluteX, 7), op(0x3F, And, AbsoluteLongX, 5),

    op(0x40, Rti, Implied, 6), op(0x41, Eor, DirectIndexedIndirect, 6),
    op(0x42, Wdm, Immediate, 2), op(0x43, Eor, StackRelative, 4),
    op(0x44, Mvp, BlockMove, 7), op(0x45, Eor, Direct, 3),
    op(0x46, Lsr, Direct, 5), op(0x47, Eor, DirectIndirectLong, 6),
    op(0x48, Pha, Implied, 3), op(0x49, Eor, Immediate, 2),
    op(0x4A, Lsr, Accumulator, 2), op(0x4B, Phk, Implied, 3),
    op(0x4C, Jmp, Absolute, 3), op(0x4D, Eor, Absolute, 4),
    op(0x4E, Lsr, Absolute, 6), op(0x4F, Eor, AbsoluteLong, 5),

    op(0x50, Bvc, Relative, 2), op(0x51, Eor, DirectIndirectIndexed, 5),
    op(0x52, Eor, DirectIndirect, 5), op(0x53, Eor, StackRelativeIndirectIndexed, 7),
    op(0x54, Mvn, BlockMove, 7), op(0x55, Eor, DirectX, 4),
    op(0x56, Lsr, DirectX, 6), op(0x57, Eor, DirectIndirectLongIndexed, 6),
    op(0x58, Cli, Implied, 2), op(0x59, Eor, AbsoluteY, 4),
    op(0x5A, Phy, Implied, 3), op(0x5B, Tcd, Implied, 2),
    op(0x5C, Jml, AbsoluteLong, 4), op(0x5D, Eor, AbsoluteX, 4),
    op(0x5E, Lsr, AbsoluteX, 7), op(0x5F, Eor, AbsoluteLongX, 5),

    op(0x60, Rts, Implied, 6), op(0x61, Adc, DirectIndexedIndirect, 6),
    op(0x62, Per, RelativeLong, 6), op(0x63, Adc, StackRelative, 4),
    op(0x64, Stz, Direct, 3), op(0x65, Adc, Direct, 3),
    op(0x66, Ror, Direct, 5), op(0x67, Adc, DirectIndirectLong, 6),
    op(0x68, Pla, Implied, 4), op(0x69, Adc, Immediate, 2),
    op(0x6A, Ror, Accumulator, 2), op(0x6B, Rtl, Implied, 6),
    op(0x6C, Jmp, AbsoluteIndirect, 5), op(0x6D, Adc, Absolute, 4),
    op(0x6E, Ror, Absolute, 6), op(0x6F, Adc, AbsoluteLong, 5),

    op(0x70, Bvs, Relative, 2), op(0x71, Adc, DirectIndirectIndexed, 5),
    op(0x72, Adc, DirectIndirect, 5), op(0x73, Adc, StackRelativeIndirectIndexed, 7),
    op(0x74, Stz, DirectX, 4), op(0x75, Adc, DirectX, 4),
    op(0x76, Ror, DirectX, 6), op(0x77, Adc, DirectIndirectLongIndexed, 6),
    op(0x78, Sei, Implied, 2), op(0x79, Adc, AbsoluteY, 4),
    op(0x7A, Ply, Implied, 4), op(0x7B, Tdc, Implied, 2),
    op(0x7C, Jmp, AbsoluteIndexedIndirect, 6), op(0x7D, Adc, AbsoluteX, 4),
    op(0x7E, Ror, AbsoluteX, 7), op(0x7F, Adc, AbsoluteLongX, 5),

    op(0x80, Bra, Relative, 3), op(0x81, Sta, DirectIndexedIndirect, 6),
    op(0x82, Brl, RelativeLong, 4), op(0x83, Sta, StackRelative, 4),
    op(0x84, Sty, Direct, 3), op(0x85, Sta, Direct, 3),
    op(0x86, Stx, Direct, 3), op(0x87, Sta, DirectIndirectLong, 6),
    op(0x88, Dey, Implied, 2), op(0x89, Bit, Immediate, 2),
    op(0x8A, Txa, Implied, 2), op(0x8B, Phb, Implied, 3),
    op(0x8C, Sty, Absolute, 4), op(0x8D, Sta, Absolute, 4),
    op(0x8E, Stx, Absolute, 4), op(0x8F, Sta, AbsoluteLong, 5),

    op(0x90, Bcc, Relative, 2), op(0x91, Sta, DirectIndirectIndexed, 6),
    op(0x92, Sta, DirectIndirect, 5), op(0x93, Sta, StackRelativeIndirectIndexed, 7),
    op(0x94, Sty, DirectX, 4), op(0x95, Sta, DirectX, 4),
    op(0x96, Stx, DirectY, 4), op(0x97, Sta, DirectIndirectLongIndexed, 6),
    op(0x98, Tya, Implied, 2), op(0x99, Sta, AbsoluteY, 5),
    op(0x9A, Txs, Implied, 2), op(0x9B, Txy, Implied, 2),
    op(0x9C, Stz, Absolute, 4), op(0x9D, Sta, AbsoluteX, 5),
    op(0x9E, Stz, AbsoluteX, 5), op(0x9F, Sta, AbsoluteLongX, 5),

    op(0xA0, Ldy, Immediate, 2), op(0xA1, Lda, DirectIndexedIndirect, 6),
    op(0xA2, Ldx, Immediate, 2), op(0xA3, Lda, StackRelative, 4),
    op(0xA4, Ldy, Direct, 3), op(0xA5, Lda, Direct, 3),
    op(0xA6, Ldx, Direct, 3), op(0xA7, Lda, DirectIndirectLong, 6),
    op(0xA8, Tay, Implied, 2), op(0xA9, Lda, Immediate, 2),
    op(0xAA, Tax, Implied, 2), op(0xAB, Plb, Implied, 4),
    op(0xAC, Ldy, Absolute, 4), op(0xAD, Lda, Absolute, 4),
    op(0xAE, Ldx, Absolute, 4), op(0xAF, Lda, AbsoluteLong, 5),

    op(0xB0, Bcs, Relative, 2), op(0xB1, Lda, DirectIndirectIndexed, 5),
    op(0xB2, Lda, DirectIndirect, 5), op(0xB3, Lda, StackRelativeIndirectIndexed, 7),
    op(0xB4, Ldy, DirectX, 4), op(0xB5, Lda, DirectX, 4),
    op(0xB6, Ldx, DirectY, 4), op(0xB7, Lda, DirectIndirectLongIndexed, 6),
    op(0xB8, Clv, Implied, 2), op(0xB9, Lda, AbsoluteY, 4),
    op(0xBA, Tsx, Implied, 2), op(0xBB, Tyx, Implied, 2),
    op(0xBC, Ldy, AbsoluteX, 4), op(0xBD, Lda, AbsoluteX, 4),
    op(0xBE, Ldx, AbsoluteY, 4), op(0xBF, Lda, AbsoluteLongX, 5),

    op(0xC0, Cpy, Immediate, 2), op(0xC1, Cmp, DirectIndexedIndirect, 6),
    op(0xC2, Rep, Immediate, 3), op(0xC3, Cmp, StackRelative, 4),
    op(0xC4, Cpy, Direct, 3), op(0xC5, Cmp, Direct, 3),
    op(0xC6, Dec, Direct, 5), op(0xC7, Cmp, DirectIndirectLong, 6),
    op(0xC8, Iny, Implied, 2), op(0xC9, Cmp, Immediate, 2),
    op(0xCA, Dex, Implied, 2), op(0xCB, Wai, Implied, 3),
    op(0xCC, Cpy, Absolute, 4), op(0xCD, Cmp, Absolute, 4),
    op(0xCE, Dec, Absolute, 6), op(0xCF, Cmp, AbsoluteLong, 5),

    op(0xD0, Bne, Relative, 2), op(0xD1, Cmp, DirectIndirectIndexed, 5),
    op(0xD2, Cmp, DirectIndirect, 5), op(0xD3, Cmp, StackRelativeIndirectIndexed, 7),
    op(0xD4, Pei, DirectIndirect, 6), op(0xD5, Cmp, DirectX, 4),
    op(0xD6, Dec, DirectX, 6), op(0xD7, Cmp, DirectIndirectLongIndexed, 6),
    op(0xD8, Cld, Implied, 2), op(0xD9, Cmp, AbsoluteY, 4),
    op(0xDA, Phx, Implied, 3), op(0xDB, Stp, Implied, 3),
    op(0xDC, Jml, AbsoluteIndirectLong, 6), op(0xDD, Cmp, AbsoluteX, 4),
    op(0xDE, Dec, AbsoluteX, 7), op(0xDF, Cmp, AbsoluteLongX, 5),

    op(0xE0, Cpx, Immediate, 2), op(0xE1, Sbc, DirectIndexedIndirect, 6),
    op(0xE2, Sep, Immediate, 3), op(0xE3, Sbc, StackRelative, 4),
    op(0xE4, Cpx, Direct, 3), op(0xE5, Sbc, Direct, 3),
    op(0xE6, Inc, Direct, 5), op(0xE7, Sbc, DirectIndirectLong, 6),
    op(0xE8, Inx, Implied, 2), op(0xE9, Sbc, Immediate, 2),
    op(0xEA, Nop, Implied, 2), op(0xEB, Xba, Implied, 3),
    op(0xEC, Cpx, Absolute, 4), op(0xED, Sbc, Absolute, 4),
    op(0xEE, Inc, Absolute, 6), op(0xEF, Sbc, AbsoluteLong, 5),

    op(0xF0, Beq, Relative, 2), op(0xF1, Sbc, DirectIndirectIndexed, 5),
    op(0xF2, Sbc, DirectIndirect, 5), op(0xF3, Sbc, StackRelativeIndirectIndexed, 7),
    op(0xF4, Pea, Absolute, 5), op(0xF5, Sbc, DirectX, 4),
    op(0xF6, Inc, DirectX, 6), op(0xF7, Sbc, DirectIndirectLongIndexed, 6),
    op(0xF8, Sed, Implied, 2), op(0xF9, Sbc, AbsoluteY, 4),
    op(0xFA, Plx, Implied, 4), op(0xFB, Xce, Implied, 2),
    op(0xFC, Jsr, AbsoluteIndexedIndirect, 8), op(0xFD, Sbc, AbsoluteX, 4),
    op(0xFE, Inc, AbsoluteX, 7), op(0xFF, Sbc, AbsoluteLongX, 5),
];

/// Look up the descriptor for `opcode`.
pub fn lookup(opcode: u8) -> Option<&'static OpcodeDescriptor> {
    OPCODES.get(opcode as usize)
}

/// Infallible form of [`lookup`]; the table covers every `u8`.
pub fn descriptor(opcode: u8) -> &'static OpcodeDescriptor {
    &OPCODES[opcode as usize]
}
