//! Core traits, errors and dispatch for the SNES Decay 65C816 disassembler.
//!
//! The library takes a raw SNES ROM image (copier header already stripped),
//! works out whether it is laid out as LoROM or HiROM, and recovers code by
//! walking control flow from the interrupt vectors, caller-supplied entry
//! points and windows that look like code.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use snes_decay::{
//!     engine::{analyze, load_rom, AnalysisOptions},
//!     format::OutputFormat,
//! };
//!
//! let rom = load_rom("path/to/game.sfc").unwrap();
//! let result = analyze(&rom, &AnalysisOptions::default());
//!
//! println!("{} ({:.0}%)", result.mapping.mapping, result.mapping.confidence * 100.0);
//! for function in &result.functions {
//!     println!("{} {} instructions", function.name, function.instructions.len());
//! }
//!
//! let listing = OutputFormat::Text.get_formatter().format(&result).unwrap();
//! print!("{}", listing);
//! ```

pub mod opcodes;
pub mod mapping;
pub mod parser;
pub mod decoder;
pub mod strategy;
pub mod classifier;
pub mod engine;
pub mod format;
mod large_tests;

use serde::Serialize;

pub use decoder::{DecodeError, Instruction, ProcessorContext, SnesDecoder};
pub use engine::{analyze, AnalysisOptions, AnalysisResult, Function};
pub use mapping::{AddressTranslator, CpuAddress, MappingType};
pub use parser::RomMetadata;

/// Byte offset into the (copier-free) ROM image.
pub type RomOffset = usize;

/// Decoder trait: turns bytes at an offset into one 65C816 instruction.
pub trait Decoder: Send + Sync {
    /// Decode the instruction at `offset` under the register widths in `context`.
    ///
    /// # Arguments
    /// * `rom` - The whole ROM image
    /// * `offset` - Offset of the opcode byte
    /// * `context` - Processor state in effect at `offset`
    ///
    /// # Returns
    /// The decoded instruction, or `DecodeError` if it runs past the image.
    fn decode(
        &self,
        rom: &[u8],
        offset: RomOffset,
        context: &ProcessorContext,
    ) -> Result<Instruction, DecodeError>;

    /// Address translation used to place and resolve instructions.
    fn translator(&self) -> &AddressTranslator;
}

/// Parser trait: turn raw bytes into `RomMetadata`.
///
/// Parsing never fails; an image without a usable header still gets a
/// LoROM layout with zero confidence.
pub trait RomParser: Send + Sync {
    /// Parse a ROM image into metadata
    fn parse(&self, rom: &[u8]) -> RomMetadata;
}

/// Error type for the fallible public surface.
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A CPU address string could not be parsed
    #[error("Invalid CPU address: {0}")]
    InvalidAddress(String),

    /// Analysis options could not be parsed or are inconsistent
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An output formatter failed
    #[error("Formatting error: {0}")]
    Format(String),
}

/// Recoverable problems encountered during analysis.
///
/// These never abort an analysis; they are collected on the result.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisIssue {
    /// An instruction at `offset` runs past the end of the image
    #[error("truncated instruction at offset 0x{offset:06x}")]
    TruncatedInstruction { offset: RomOffset },

    /// No header scored well; LoROM assumed
    #[error("no convincing internal header (confidence {confidence:.2}), assuming LoROM")]
    InvalidMappingHeader { confidence: f64 },

    /// A control transfer at `offset` goes through a pointer
    #[error("unresolvable control transfer at offset 0x{offset:06x}")]
    UnresolvableOperand { offset: RomOffset },

    /// The layout gives these offsets no CPU address, so they are not analyzed
    #[error("offsets 0x{start:06x}..0x{end:06x} have no CPU address and were skipped")]
    UnmappedRegion { start: RomOffset, end: RomOffset },

    /// The instruction budget ran out with work still queued
    #[error("instruction budget exhausted with {remaining} entries unanalyzed")]
    BudgetExhausted { remaining: usize },
}
