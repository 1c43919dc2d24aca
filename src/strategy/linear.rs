//! Linear-sweep disassembly with parallel processing per bank

use std::ops::Range;
use std::time::Instant;

use rayon::prelude::*;

use crate::decoder::{Instruction, ProcessorContext};
use crate::{Decoder, RomOffset};

/// Linear sweep of one window, tracking REP/SEP/XCE along the way.
///
/// Stops at the first instruction that would run past `end` or the image.
pub fn sweep(
    rom: &[u8],
    decoder: &dyn Decoder,
    start: RomOffset,
    end: RomOffset,
    context: ProcessorContext,
) -> Vec<Instruction> {
    let end = end.min(rom.len());
    let mut ctx = context;
    let mut at = start;
    let mut insns = Vec::new();

    while at < end {
        match decoder.decode(rom, at, &ctx) {
            Ok(insn) if insn.end() <= end => {
                ctx.apply(&insn);
                at = insn.end();
                insns.push(insn);
            }
            _ => break,
        }
    }
    insns
}

/// Linear-sweep disassembly of `range`, one bank per task
///
/// Every bank window restarts from `context`, since straight-line code
/// cannot cross a bank boundary.
///
/// # Arguments
/// * `rom` - The ROM image
/// * `decoder` - The decoder to use for disassembly
/// * `range` - ROM offsets to cover
/// * `context` - Processor state assumed at the start of each bank
///
/// # Returns
/// Instructions in ascending offset order
pub fn run(
    rom: &[u8],
    decoder: &dyn Decoder,
    range: Range<RomOffset>,
    context: ProcessorContext,
) -> Vec<Instruction> {
    let end = range.end.min(decoder.translator().mapped_len());
    if range.start >= end {
        return Vec::new();
    }
    let start_time = Instant::now();

    let mut windows = Vec::new();
    let mut at = range.start;
    while at < end {
        let window_end = decoder.translator().bank_end(at).min(end);
        windows.push(at..window_end);
        at = window_end;
    }

    let chunks: Vec<Vec<Instruction>> = windows
        .into_par_iter()
        .map(|window| sweep(rom, decoder, window.start, window.end, context))
        .collect();
    let insns: Vec<Instruction> = chunks.into_iter().flatten().collect();

    log::debug!(
        "linear sweep of 0x{:06x}..0x{:06x}: {} instructions in {:?}",
        range.start,
        end,
        insns.len(),
        start_time.elapsed()
    );
    insns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SnesDecoder;
    use crate::mapping::MappingType;
    use crate::opcodes::Mnemonic;

    #[test]
    fn test_sweep_tracks_widths() {
        // REP #$30; LDX #$0000; SEP #$20; LDA #$00
        let mut rom = vec![0xEA; 0x8000];
        rom[..9].copy_from_slice(&[0xC2, 0x30, 0xA2, 0x00, 0x00, 0xE2, 0x20, 0xA9, 0x00]);
        let decoder = SnesDecoder::for_mapping(MappingType::LoRom, rom.len());

        let insns = sweep(&rom, &decoder, 0, 9, ProcessorContext::default());
        let sizes: Vec<u8> = insns.iter().map(|i| i.size).collect();
        assert_eq!(sizes, vec![2, 3, 2, 2]);
        assert_eq!(insns[3].mnemonic, Mnemonic::Lda);
    }

    #[test]
    fn test_run_splits_at_banks() {
        // a 3-byte instruction straddling the bank boundary is dropped
        let mut rom = vec![0xEA; 0x10000];
        rom[0x7FFE] = 0xAD;
        let decoder = SnesDecoder::for_mapping(MappingType::LoRom, rom.len());

        let insns = run(&rom, &decoder, 0x7FF0..0x8004, ProcessorContext::default());
        assert_eq!(insns.len(), 0x0E + 4);
        assert_eq!(insns[0x0E].offset, 0x8000);
        assert!(insns.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn test_run_empty_range() {
        let rom = vec![0xEA; 0x100];
        let decoder = SnesDecoder::for_mapping(MappingType::LoRom, rom.len());
        assert!(run(&rom, &decoder, 0x200..0x300, ProcessorContext::default()).is_empty());
    }
}
