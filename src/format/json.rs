//! JSON and JSON Lines output formatters

use std::collections::BTreeMap;

use serde::Serialize;

use super::{hex_bytes, AnalysisFormatter};
use crate::decoder::Instruction;
use crate::mapping::CpuAddress;
use crate::engine::{AnalysisResult, CodeTag, CrossReference, Function, FunctionKind, Seed};
use crate::strategy::WalkState;
use crate::{AnalysisIssue, DisassemblyError, RomOffset};

/// Serializable instruction for JSON output
#[derive(Serialize)]
struct InstructionJson {
    offset: RomOffset,
    /// CPU address as `$BB:AAAA`
    address: String,
    /// Bytes of the instruction as hex string
    bytes: String,
    mnemonic: String,
    /// Full assembler text, e.g. `LDA #$01`
    text: String,
    size: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    resolved: Option<u32>,
}

impl From<&Instruction> for InstructionJson {
    fn from(insn: &Instruction) -> Self {
        Self {
            offset: insn.offset,
            address: insn.address.to_string(),
            bytes: hex_bytes(insn.bytes()),
            mnemonic: insn.mnemonic.to_string(),
            text: insn.to_string(),
            size: insn.size,
            resolved: insn.resolved,
        }
    }
}

/// Serializable function for JSON output
#[derive(Serialize)]
struct FunctionJson<'a> {
    name: &'a str,
    start: RomOffset,
    end: RomOffset,
    address: String,
    kind: FunctionKind,
    tag: CodeTag,
    seed: Seed,
    termination: WalkState,
    calls: Vec<String>,
    jumps: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unmapped_targets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gaps: Vec<[RomOffset; 2]>,
    instructions: Vec<InstructionJson>,
}

impl<'a> From<&'a Function> for FunctionJson<'a> {
    fn from(function: &'a Function) -> Self {
        let addresses =
            |list: &[CpuAddress]| -> Vec<String> { list.iter().map(|a| a.to_string()).collect() };
        Self {
            name: &function.name,
            start: function.start,
            end: function.end,
            address: function.address.to_string(),
            kind: function.kind,
            tag: function.tag,
            seed: function.seed,
            termination: function.termination,
            calls: addresses(&function.calls),
            jumps: addresses(&function.jumps),
            unmapped_targets: addresses(&function.unmapped_targets),
            gaps: function.gaps.iter().map(|g| [g.start, g.end]).collect(),
            instructions: function.instructions.iter().map(InstructionJson::from).collect(),
        }
    }
}

/// Serializable analysis result for JSON output
#[derive(Serialize)]
struct AnalysisJson<'a> {
    mapping: String,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    functions: Vec<FunctionJson<'a>>,
    /// Instructions that belong to no function (linear sweeps)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    listing: Vec<InstructionJson>,
    xrefs: Vec<&'a CrossReference>,
    symbols: &'a BTreeMap<RomOffset, String>,
    labels: &'a BTreeMap<RomOffset, String>,
    issues: &'a [AnalysisIssue],
    unanalyzed: &'a [RomOffset],
    budget_exhausted: bool,
}

fn to_json_error(e: serde_json::Error) -> DisassemblyError {
    DisassemblyError::Format(format!("JSON serialization error: {}", e))
}

impl AnalysisFormatter for super::JsonFormatter {
    fn format(&self, result: &AnalysisResult) -> Result<String, DisassemblyError> {
        let listing = if result.functions.is_empty() {
            result.instructions.values().map(InstructionJson::from).collect()
        } else {
            Vec::new()
        };
        let document = AnalysisJson {
            mapping: result.mapping.mapping.to_string(),
            confidence: result.mapping.confidence,
            title: result.header.as_ref().map(|h| h.title.as_str()),
            functions: result.functions.iter().map(FunctionJson::from).collect(),
            listing,
            xrefs: result.xrefs.iter().collect(),
            symbols: &result.symbols,
            labels: &result.labels,
            issues: &result.issues,
            unanalyzed: &result.unanalyzed,
            budget_exhausted: result.budget_exhausted,
        };

        serde_json::to_string_pretty(&document).map_err(to_json_error)
    }
}

impl AnalysisFormatter for super::JsonLinesFormatter {
    fn format(&self, result: &AnalysisResult) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        if result.functions.is_empty() {
            for insn in result.instructions.values() {
                output.push_str(&serde_json::to_string(&InstructionJson::from(insn)).map_err(to_json_error)?);
                output.push('\n');
            }
            return Ok(output);
        }

        for function in &result.functions {
            output.push_str(&serde_json::to_string(&FunctionJson::from(function)).map_err(to_json_error)?);
            output.push('\n');
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{analyze_with, AnalysisOptions, NoopObserver};
    use crate::format::{JsonFormatter, JsonLinesFormatter};
    use crate::strategy::Strategy;
    use serde_json::Value;

    fn two_function_rom() -> Vec<u8> {
        let mut rom = vec![0u8; 0x10000];
        rom[..4].copy_from_slice(&[0x20, 0x10, 0x80, 0x60]);
        rom[0x10] = 0x60;
        rom
    }

    #[test]
    fn test_json_formatter() {
        let result = analyze_with(&two_function_rom(), &AnalysisOptions::default(), &NoopObserver);
        let json = JsonFormatter.format(&result).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["mapping"], "LoROM");
        assert_eq!(value["functions"].as_array().unwrap().len(), 2);
        let first = &value["functions"][0];
        assert_eq!(first["name"], "sub_00_8000");
        assert_eq!(first["calls"][0], "$00:8010");
        assert_eq!(first["instructions"][0]["bytes"], "20 10 80");
        assert_eq!(first["instructions"][0]["text"], "JSR $8010");
        assert_eq!(value["xrefs"][0]["to"], 16);
        assert_eq!(value["symbols"]["16"], "sub_00_8010");
    }

    #[test]
    fn test_json_lines_formatter() {
        let result = analyze_with(&two_function_rom(), &AnalysisOptions::default(), &NoopObserver);
        let output = JsonLinesFormatter.format(&result).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert!(value["name"].as_str().unwrap().starts_with("sub_00_80"));
        }
    }

    #[test]
    fn test_linear_listing_output() {
        let options = AnalysisOptions {
            strategy: Strategy::Linear,
            range: Some(0..4),
            ..AnalysisOptions::default()
        };
        let result = analyze_with(&two_function_rom(), &options, &NoopObserver);

        let value: Value = serde_json::from_str(&JsonFormatter.format(&result).unwrap()).unwrap();
        assert_eq!(value["listing"].as_array().unwrap().len(), 2);

        let lines = JsonLinesFormatter.format(&result).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }
}
