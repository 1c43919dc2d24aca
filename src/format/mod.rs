//! Output format module implementation

mod json;

pub use self::json::*;

use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::decoder::{Flow, Instruction};
use crate::engine::AnalysisResult;
use crate::{DisassemblyError, RomOffset};

/// Supported output formats for analysis results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Assembler listing (default)
    #[default]
    Text,
    /// JSON document of the whole result
    Json,
    /// JSON Lines, one function per line
    JsonLines,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = DisassemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "asm" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            _ => Err(DisassemblyError::Config(format!("Unknown output format: {}", s))),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[OutputFormat::Text, OutputFormat::Json, OutputFormat::JsonLines]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn AnalysisFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
        }
    }
}

/// Formatter trait for analysis output
pub trait AnalysisFormatter {
    /// Format an analysis result
    fn format(&self, result: &AnalysisResult) -> Result<String, DisassemblyError>;
}

/// Format results as an assembler listing
pub struct TextFormatter;

/// Format results as one JSON document
pub struct JsonFormatter;

/// Format results in JSON Lines
pub struct JsonLinesFormatter;

/// Raw bytes as space-separated hex.
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

impl TextFormatter {
    /// Name of whatever symbol or label sits at a transfer target.
    fn target_name<'r>(result: &'r AnalysisResult, insn: &Instruction) -> Option<&'r str> {
        let address = match insn.flow() {
            Flow::Call(Some(address))
            | Flow::Jump(Some(address))
            | Flow::Goto(address)
            | Flow::Branch(address) => address,
            _ => return None,
        };
        let offset = result.mapping.mapping.cpu_to_rom_offset(address)?;
        result
            .symbols
            .get(&offset)
            .or_else(|| result.labels.get(&offset))
            .map(String::as_str)
    }

    fn write_instruction(out: &mut String, result: &AnalysisResult, insn: &Instruction) -> fmt::Result {
        write!(out, "  {}  {:<12} {}", insn.address, hex_bytes(insn.bytes()), insn)?;
        if let Some(name) = Self::target_name(result, insn) {
            write!(out, "  ; {}", name)?;
        }
        out.push('\n');
        Ok(())
    }

    fn write_listing(out: &mut String, result: &AnalysisResult) -> fmt::Result {
        writeln!(
            out,
            "; {} (confidence {:.2})",
            result.mapping.mapping, result.mapping.confidence
        )?;
        if let Some(header) = &result.header {
            writeln!(out, "; title: {}", header.title)?;
        }
        writeln!(
            out,
            "; {} functions, {} instructions",
            result.functions.len(),
            result.instructions.len()
        )?;
        for issue in &result.issues {
            writeln!(out, "; issue: {}", issue)?;
        }

        if result.functions.is_empty() {
            out.push('\n');
            for insn in result.instructions.values() {
                Self::write_instruction(out, result, insn)?;
            }
            return Ok(());
        }

        for function in &result.functions {
            writeln!(out)?;
            let callers: Vec<String> = result
                .callers_of(function.start)
                .map(|x| x.from_address.to_string())
                .collect();
            write!(out, "{}:  ; {}, {:?}", function.name, function.kind, function.tag)?;
            if !callers.is_empty() {
                write!(out, ", from {}", callers.join(" "))?;
            }
            out.push('\n');

            let mut previous_end: Option<RomOffset> = None;
            for insn in &function.instructions {
                if previous_end.is_some_and(|end| end < insn.offset) {
                    writeln!(out, "  ; ...")?;
                }
                if insn.offset != function.start {
                    if let Some(label) = result.labels.get(&insn.offset) {
                        writeln!(out, "{}:", label)?;
                    }
                }
                Self::write_instruction(out, result, insn)?;
                previous_end = Some(insn.end());
            }
        }
        Ok(())
    }
}

impl AnalysisFormatter for TextFormatter {
    fn format(&self, result: &AnalysisResult) -> Result<String, DisassemblyError> {
        let mut output = String::new();
        Self::write_listing(&mut output, result)
            .map_err(|e| DisassemblyError::Format(format!("text formatting error: {}", e)))?;
        Ok(output)
    }
}
