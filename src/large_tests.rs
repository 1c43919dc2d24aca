#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Instant;

    use rstest::rstest;

    use crate::{
        engine::{analyze, analyze_with, load_rom, AnalysisOptions, CodeTag, NoopObserver, Seed},
        format::OutputFormat,
        mapping::{detect_mapping, CpuAddress, MappingType},
        opcodes::Mnemonic,
        parser::{InterruptVector, EXHIROM_HEADER, HIROM_HEADER, LOROM_HEADER},
        strategy::WalkState,
        AnalysisIssue,
    };

    /// 64KB of zeros with `JSR $8010; RTS` at $8000 and `RTS` at $8010.
    fn jsr_rts_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x10000];
        rom[..4].copy_from_slice(&[0x20, 0x10, 0x80, 0x60]);
        rom[0x10] = 0x60;
        rom
    }

    fn write_header(rom: &mut [u8], at: usize, title: &str, map_mode: u8) {
        rom[at..at + 21].fill(b' ');
        rom[at..at + title.len()].copy_from_slice(title.as_bytes());
        rom[at + 0x15] = map_mode;
        rom[at + 0x16] = 0x02;
        rom[at + 0x17] = 0x09;
        rom[at + 0x1C..at + 0x1E].copy_from_slice(&0x5A5Au16.to_le_bytes());
        rom[at + 0x1E..at + 0x20].copy_from_slice(&0xA5A5u16.to_le_bytes());
    }

    #[test]
    fn test_two_function_scenario() {
        let result = analyze(&jsr_rts_rom(), &AnalysisOptions::default());

        assert_eq!(result.functions.len(), 2);

        let caller = &result.functions[0];
        assert_eq!(caller.address, CpuAddress::new(0x00, 0x8000));
        let mnemonics: Vec<_> = caller.instructions.iter().map(|i| i.mnemonic).collect();
        assert_eq!(mnemonics, vec![Mnemonic::Jsr, Mnemonic::Rts]);
        assert_eq!(caller.calls, vec![CpuAddress::new(0x00, 0x8010)]);
        assert_eq!(caller.termination, WalkState::TerminatedReturn);
        assert_eq!(caller.tag, CodeTag::Code);
        assert_eq!(caller.seed, Seed::Fallback);

        let callee = &result.functions[1];
        assert_eq!(callee.address, CpuAddress::new(0x00, 0x8010));
        assert_eq!(callee.instructions.len(), 1);
        assert_eq!(callee.instructions[0].mnemonic, Mnemonic::Rts);
        assert_eq!(callee.seed, Seed::Call);

        let xrefs: Vec<_> = result.xrefs.iter().map(|x| (x.from, x.to)).collect();
        assert_eq!(xrefs, vec![(0x0000, 0x0010)]);
        assert_eq!(result.symbols.get(&0x10).map(String::as_str), Some("sub_00_8010"));
        assert_eq!(result.instructions.len(), 3);
        assert!(!result.budget_exhausted);
    }

    #[test]
    fn test_functions_are_contiguous_or_gapped() {
        // $8000: BCC $8006; RTS; (2 junk bytes); $8006: RTS
        let mut rom = vec![0u8; 0x10000];
        rom[..7].copy_from_slice(&[0x90, 0x04, 0x60, 0xFF, 0xFF, 0xFF, 0x60]);
        let result = analyze(&rom, &AnalysisOptions::default());

        let function = &result.functions[0];
        assert_eq!(function.instructions.len(), 3);
        assert_eq!(function.gaps, vec![3..6]);
        for pair in function.instructions.windows(2) {
            let contiguous = pair[0].end() == pair[1].offset;
            let gapped = function.gaps.iter().any(|g| g.start == pair[0].end() && g.end == pair[1].offset);
            assert!(contiguous || gapped);
        }
        assert!(function.end >= function.start);
    }

    #[test]
    fn test_determinism() {
        let mut rom = jsr_rts_rom();
        // a second, busier routine reached from the reset vector
        rom[0x7FFC..0x7FFE].copy_from_slice(&0x8100u16.to_le_bytes());
        rom[0x100..0x112].copy_from_slice(&[
            0x18, 0xFB, 0xC2, 0x30, 0xA2, 0x00, 0x00, 0xBD, 0x00, 0x90, 0xF0, 0x03, 0x20, 0x00,
            0x80, 0xE8, 0x80, 0xF5,
        ]);

        let parallel = AnalysisOptions::default();
        let sequential = AnalysisOptions {
            parallel: false,
            ..AnalysisOptions::default()
        };
        let format = OutputFormat::Json.get_formatter();
        let a = format.format(&analyze(&rom, &parallel)).unwrap();
        let b = format.format(&analyze(&rom, &parallel)).unwrap();
        let c = format.format(&analyze(&rom, &sequential)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);

        let full_a = serde_json::to_string(&analyze(&rom, &parallel)).unwrap();
        let full_b = serde_json::to_string(&analyze(&rom, &sequential)).unwrap();
        assert_eq!(full_a, full_b);
    }

    #[rstest]
    #[case(0x10000)]
    #[case(0x20000)]
    fn test_all_ff_terminates(#[case] len: usize) {
        let rom = vec![0xFF; len];
        let start = Instant::now();
        let result = analyze(&rom, &AnalysisOptions::default());
        println!("all-0xFF image of {} bytes analysed in {:?}", len, start.elapsed());

        assert!(result.functions.iter().all(|f| f.instructions.len() <= 4096));
        assert!(result
            .functions
            .iter()
            .all(|f| matches!(f.termination, WalkState::TerminatedLimit | WalkState::TerminatedTruncated)));
    }

    #[test]
    fn test_branch_to_self() {
        let mut rom = vec![0u8; 0x10000];
        rom[0x10..0x12].copy_from_slice(&[0xF0, 0xFE]);
        rom[0x12] = 0x60;
        let options = AnalysisOptions {
            entry_points: vec![CpuAddress::new(0x00, 0x8010)],
            ..AnalysisOptions::default()
        };
        let result = analyze(&rom, &options);

        let insn = &result.instructions[&0x10];
        assert_eq!(insn.mnemonic, Mnemonic::Beq);
        assert_eq!(insn.resolved_address(), Some(CpuAddress::new(0x00, 0x8010)));
        let function = result.function_at(0x10).unwrap();
        assert_eq!(function.instructions.len(), 2);
        assert_eq!(function.seed, Seed::EntryPoint);
    }

    #[rstest]
    #[case(&[0xA9, 0x00, 0x60], 2)]
    #[case(&[0xC2, 0x20, 0xA9, 0x00, 0x00, 0x60], 3)]
    #[case(&[0xC2, 0x20, 0xE2, 0x20, 0xA9, 0x00, 0x60], 2)]
    fn test_immediate_size_follows_m(#[case] code: &[u8], #[case] lda_size: u8) {
        let mut rom = vec![0u8; 0x10000];
        rom[..code.len()].copy_from_slice(code);
        let options = AnalysisOptions {
            entry_points: vec![CpuAddress::new(0x00, 0x8000)],
            ..AnalysisOptions::default()
        };
        let result = analyze(&rom, &options);

        let lda = result
            .instructions
            .values()
            .find(|i| i.mnemonic == Mnemonic::Lda)
            .unwrap();
        assert_eq!(lda.size, lda_size);
        assert_eq!(result.functions[0].instructions.last().unwrap().mnemonic, Mnemonic::Rts);
    }

    #[rstest]
    #[case(0x8000)]
    #[case(0x10000)]
    fn test_lorom_header_detection(#[case] len: usize) {
        let mut rom = vec![0u8; len];
        write_header(&mut rom, LOROM_HEADER, "SYNTHETIC LOROM", 0x20);
        let detection = detect_mapping(&rom);
        assert_eq!(detection.mapping, MappingType::LoRom);
        assert!(detection.confidence >= 0.8, "confidence {}", detection.confidence);
        assert!(!detection.copier_header);

        let result = analyze(&rom, &AnalysisOptions::default());
        assert!(!result
            .issues
            .iter()
            .any(|i| matches!(i, AnalysisIssue::InvalidMappingHeader { .. })));
        assert_eq!(result.header.unwrap().title, "SYNTHETIC LOROM");
    }

    #[test]
    fn test_hirom_header_detection_and_vectors() {
        let mut rom = vec![0u8; 0x20000];
        write_header(&mut rom, HIROM_HEADER, "SYNTHETIC HIROM", 0x21);
        rom[0xFFFC..0xFFFE].copy_from_slice(&0x8000u16.to_le_bytes());
        rom[0x8000..0x8005].copy_from_slice(&[0x22, 0x00, 0x00, 0xC1, 0x6B]);
        rom[0x10000] = 0x6B;

        let result = analyze(&rom, &AnalysisOptions::default());
        assert_eq!(result.mapping.mapping, MappingType::HiRom);
        assert!(result.mapping.confidence >= 0.8);

        let reset = result.function_at(0x8000).unwrap();
        assert_eq!(reset.seed, Seed::Vector(InterruptVector::Reset));
        assert_eq!(reset.calls, vec![CpuAddress::new(0xC1, 0x0000)]);
        assert!(result.function_at(0x10000).is_some());
    }

    #[test]
    fn test_exhirom_code_past_four_megabytes() {
        let mut rom = vec![0u8; 0x60_0000];
        write_header(&mut rom, EXHIROM_HEADER, "EXTENDED", 0x25);
        rom[0x40_FFFC..0x40_FFFE].copy_from_slice(&0x8000u16.to_le_bytes());
        // $40:8000: JSR $9000; RTS   $40:9000: RTS
        rom[0x40_8000..0x40_8004].copy_from_slice(&[0x20, 0x00, 0x90, 0x60]);
        rom[0x40_9000] = 0x60;

        let result = analyze(&rom, &AnalysisOptions::default());
        assert_eq!(result.mapping.mapping, MappingType::ExHiRom);
        assert!(!result
            .issues
            .iter()
            .any(|i| matches!(i, AnalysisIssue::UnmappedRegion { .. })));

        let reset = result.function_at(0x40_8000).unwrap();
        assert_eq!(reset.address, CpuAddress::new(0x40, 0x8000));
        assert_eq!(reset.calls, vec![CpuAddress::new(0x40, 0x9000)]);
        assert_eq!(result.function_at(0x40_9000).unwrap().name, "sub_40_9000");
        assert!(result.functions.iter().all(|f| f.start >= 0x40_0000));
    }

    #[test]
    fn test_lorom_past_four_megabytes_reports_unmapped_tail() {
        let rom = vec![0u8; 0x60_0000];
        let options = AnalysisOptions {
            mapping: Some(MappingType::LoRom),
            ..AnalysisOptions::default()
        };
        let result = analyze(&rom, &options);
        assert!(result.issues.contains(&AnalysisIssue::UnmappedRegion {
            start: 0x40_0000,
            end: 0x60_0000,
        }));
        assert!(result.functions.iter().all(|f| f.end <= 0x40_0000));
        assert!(result.regions.iter().all(|r| r.end() <= 0x40_0000));
    }

    #[test]
    fn test_copier_shifted_header_is_flagged() {
        let mut rom = vec![0u8; 0x10200];
        write_header(&mut rom, LOROM_HEADER + 0x200, "SHIFTED", 0x20);
        let detection = detect_mapping(&rom);
        assert!(detection.copier_header);
        assert_eq!(detection.header_offset, Some(LOROM_HEADER + 0x200));
    }

    #[test]
    fn test_budget_exhaustion_reports_unanalyzed() {
        let options = AnalysisOptions {
            instruction_budget: Some(2),
            ..AnalysisOptions::default()
        };
        let result = analyze_with(&jsr_rts_rom(), &options, &NoopObserver);

        assert!(result.budget_exhausted);
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.unanalyzed, vec![0x10]);
        assert!(result
            .issues
            .contains(&AnalysisIssue::BudgetExhausted { remaining: 1 }));
    }

    #[test]
    fn test_no_panic_on_tiny_images() {
        for len in [0usize, 1, 3, 0x7FC0, 0x8000] {
            let rom = vec![0x22; len];
            let result = analyze_with(&rom, &AnalysisOptions::default(), &NoopObserver);
            assert!(result.functions.iter().all(|f| f.end <= len));
        }
    }

    #[test]
    fn test_load_rom_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&jsr_rts_rom()).unwrap();
        file.flush().unwrap();

        let rom = load_rom(file.path()).unwrap();
        assert_eq!(rom.len(), 0x10000);
        let result = analyze(&rom, &AnalysisOptions::default());
        assert_eq!(result.functions.len(), 2);

        assert!(load_rom(file.path().with_extension("missing")).is_err());
    }

    #[test]
    fn test_options_file_drives_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(
            &path,
            r#"{ "entry_points": ["$00:8010"], "seed_vectors": false, "seed_regions": false }"#,
        )
        .unwrap();

        let options = AnalysisOptions::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let result = analyze(&jsr_rts_rom(), &options);
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].address, CpuAddress::new(0x00, 0x8010));
    }
}
