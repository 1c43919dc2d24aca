//! Whole-ROM analysis: seeding, wave-parallel tracing and result assembly.
//!
//! The engine detects the cartridge layout, scores the image in windows,
//! and then traces functions from explicit entry points, the interrupt
//! vectors and code-like windows. Work is processed in waves: every entry
//! queued at the start of a wave is traced in parallel against the shared,
//! read-only image, and the traces are merged back in ascending offset order
//! by the coordinator, which alone owns the seen-set and the queue. The
//! output is therefore identical for identical input, however many threads
//! ran it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::ops::Range;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};

use crate::classifier::{ClassifierWeights, RegionClassifier, RegionKind, RegionScore, DEFAULT_WINDOW_SIZE};
use crate::decoder::{Flow, Instruction, ProcessorContext, SnesDecoder};
use crate::mapping::{has_copier_header, BankMapEntry, CpuAddress, MappingDetection, MappingType};
use crate::opcodes::Mnemonic;
use crate::parser::{InterruptVector, SnesHeader, SnesHeaderParser, VectorTarget};
use crate::strategy::{linear, ControlFlowWalker, Strategy, Target, WalkState, DEFAULT_INSTRUCTION_LIMIT};
use crate::{AnalysisIssue, Decoder, DisassemblyError, RomOffset, RomParser};

/// Detection confidence below which the layout is reported as a guess.
const MIN_MAPPING_CONFIDENCE: f64 = 0.5;

/// Knobs for [`analyze`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Classifier window size in bytes.
    pub window_size: usize,
    /// Instruction limit for a single walk, and for a single function.
    pub max_instructions: usize,
    pub seed_vectors: bool,
    pub seed_regions: bool,
    /// Windows scoring at least this much are seeded as code.
    pub min_region_confidence: f64,
    /// Total instructions across all functions; `None` for unbounded.
    pub instruction_budget: Option<usize>,
    /// Extra entry points, e.g. `"$00:8000"`.
    #[serde(deserialize_with = "deserialize_addresses")]
    pub entry_points: Vec<CpuAddress>,
    /// Restrict analysis to these ROM offsets.
    pub range: Option<Range<RomOffset>>,
    /// Skip header detection and use this layout.
    pub mapping: Option<MappingType>,
    pub strategy: Strategy,
    pub parallel: bool,
    pub weights: ClassifierWeights,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_instructions: DEFAULT_INSTRUCTION_LIMIT,
            seed_vectors: true,
            seed_regions: true,
            min_region_confidence: 0.6,
            instruction_budget: None,
            entry_points: Vec::new(),
            range: None,
            mapping: None,
            strategy: Strategy::Recursive,
            parallel: true,
            weights: ClassifierWeights::default(),
        }
    }
}

impl AnalysisOptions {
    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, DisassemblyError> {
        let options: Self =
            serde_json::from_str(text).map_err(|e| DisassemblyError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), DisassemblyError> {
        if self.window_size == 0 {
            return Err(DisassemblyError::Config("window_size must be non-zero".into()));
        }
        if self.max_instructions == 0 {
            return Err(DisassemblyError::Config("max_instructions must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.min_region_confidence) {
            return Err(DisassemblyError::Config(format!(
                "min_region_confidence {} is outside [0, 1]",
                self.min_region_confidence
            )));
        }
        if let Some(range) = &self.range {
            if range.start > range.end {
                return Err(DisassemblyError::Config(format!(
                    "range 0x{:x}..0x{:x} is reversed",
                    range.start, range.end
                )));
            }
        }
        Ok(())
    }
}

fn deserialize_addresses<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<CpuAddress>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Linear(u32),
        Split(CpuAddress),
    }

    Vec::<Raw>::deserialize(d)?
        .into_iter()
        .map(|raw| match raw {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Linear(value) => Ok(CpuAddress::from_u24(value)),
            Raw::Split(address) => Ok(address),
        })
        .collect()
}

/// How much to trust a function's boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeTag {
    /// Entry walk ended on a return or jump.
    Code,
    /// Entry walk ran off the image or bank.
    LikelyData,
    /// Entry walk hit the instruction limit.
    Unknown,
}

/// Rough behavioural role of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    InterruptHandler,
    MainLoop,
    DataHandler,
    Calculation,
    Subroutine,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionKind::InterruptHandler => write!(f, "interrupt"),
            FunctionKind::MainLoop => write!(f, "main_loop"),
            FunctionKind::DataHandler => write!(f, "data_handler"),
            FunctionKind::Calculation => write!(f, "calculation"),
            FunctionKind::Subroutine => write!(f, "subroutine"),
        }
    }
}

/// Why a function was traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", content = "vector", rename_all = "snake_case")]
pub enum Seed {
    EntryPoint,
    Vector(InterruptVector),
    Call,
    Jump,
    Region,
    /// Nothing else seeded, so the start of the image was tried.
    Fallback,
}

/// A discovered routine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    /// `sub_BB_AAAA`
    pub name: String,
    pub start: RomOffset,
    /// Exclusive.
    pub end: RomOffset,
    pub address: CpuAddress,
    /// Ascending, non-overlapping; holes are listed in `gaps`.
    pub instructions: Vec<Instruction>,
    pub calls: Vec<CpuAddress>,
    pub jumps: Vec<CpuAddress>,
    /// Transfer targets with no ROM behind them.
    pub unmapped_targets: Vec<CpuAddress>,
    /// Offsets of indirect jumps and calls.
    pub unresolved: Vec<RomOffset>,
    /// Bytes between instructions that no path reaches.
    pub gaps: Vec<Range<RomOffset>>,
    pub tag: CodeTag,
    pub kind: FunctionKind,
    pub seed: Seed,
    pub termination: WalkState,
    pub entry_context: ProcessorContext,
}

impl Function {
    pub fn contains(&self, offset: RomOffset) -> bool {
        (self.start..self.end).contains(&offset)
    }
}

/// Kind of control transfer behind a cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum XrefKind {
    Call,
    Jump,
}

/// One resolved transfer from an instruction to a function entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CrossReference {
    pub from: RomOffset,
    pub to: RomOffset,
    pub kind: XrefKind,
    pub from_address: CpuAddress,
    pub to_address: CpuAddress,
}

/// Everything [`analyze`] learned about an image.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub mapping: MappingDetection,
    pub header: Option<SnesHeader>,
    pub vectors: Vec<VectorTarget>,
    pub banks: Vec<BankMapEntry>,
    pub strategy: Strategy,
    /// Ordered by start offset.
    pub functions: Vec<Function>,
    pub instructions: BTreeMap<RomOffset, Instruction>,
    pub xrefs: BTreeSet<CrossReference>,
    /// Function entry offset to `sub_BB_AAAA`.
    pub symbols: BTreeMap<RomOffset, String>,
    /// Branch target offset to `loc_BB_AAAA`.
    pub labels: BTreeMap<RomOffset, String>,
    pub regions: Vec<RegionScore>,
    pub issues: Vec<AnalysisIssue>,
    /// Entry offsets still queued when the budget ran out.
    pub unanalyzed: Vec<RomOffset>,
    pub budget_exhausted: bool,
    pub instructions_decoded: usize,
}

impl AnalysisResult {
    pub fn function_at(&self, offset: RomOffset) -> Option<&Function> {
        self.functions
            .binary_search_by_key(&offset, |f| f.start)
            .ok()
            .map(|i| &self.functions[i])
    }

    pub fn function_named(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Cross-references pointing at `offset`.
    pub fn callers_of(&self, offset: RomOffset) -> impl Iterator<Item = &CrossReference> + '_ {
        self.xrefs.iter().filter(move |x| x.to == offset)
    }
}

/// Progress hooks; every method defaults to doing nothing.
pub trait AnalysisObserver: Send + Sync {
    fn mapping_detected(&self, _detection: &MappingDetection) {}
    fn wave_started(&self, _wave: usize, _entries: usize) {}
    fn function_found(&self, _function: &Function) {}
    fn budget_exhausted(&self, _remaining: usize) {}
    fn finished(&self, _result: &AnalysisResult) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl AnalysisObserver for NoopObserver {}

/// Observer that reports through the `log` facade.
pub struct LogObserver;

impl AnalysisObserver for LogObserver {
    fn mapping_detected(&self, detection: &MappingDetection) {
        if detection.confidence < MIN_MAPPING_CONFIDENCE {
            log::warn!(
                "no convincing header (confidence {:.2}), assuming {}",
                detection.confidence,
                detection.mapping
            );
        } else {
            log::info!("{} detected (confidence {:.2})", detection.mapping, detection.confidence);
        }
    }

    fn wave_started(&self, wave: usize, entries: usize) {
        log::debug!("wave {}: {} entries", wave, entries);
    }

    fn function_found(&self, function: &Function) {
        log::debug!(
            "{} at 0x{:06x}: {} instructions, {:?}",
            function.name,
            function.start,
            function.instructions.len(),
            function.termination
        );
    }

    fn budget_exhausted(&self, remaining: usize) {
        log::warn!("instruction budget exhausted, {} entries left unanalyzed", remaining);
    }

    fn finished(&self, result: &AnalysisResult) {
        log::info!(
            "analysis complete: {} functions, {} instructions, {} issues",
            result.functions.len(),
            result.instructions.len(),
            result.issues.len()
        );
    }
}

/// Analyze a copier-free ROM image, logging progress.
///
/// The image must not carry a 512-byte copier header (length
/// `N * 1024 + 512`); strip it first. Never fails: problems are reported in
/// [`AnalysisResult::issues`].
pub fn analyze(rom: &[u8], options: &AnalysisOptions) -> AnalysisResult {
    analyze_with(rom, options, &LogObserver)
}

/// [`analyze`] with a caller-supplied observer.
pub fn analyze_with(rom: &[u8], options: &AnalysisOptions, observer: &dyn AnalysisObserver) -> AnalysisResult {
    let parser = match options.mapping {
        Some(mapping) => SnesHeaderParser::with_mapping(mapping),
        None => SnesHeaderParser::new(),
    };
    let metadata = parser.parse(rom);
    observer.mapping_detected(&metadata.detection);

    let range = options
        .range
        .clone()
        .map(|r| r.start.min(rom.len())..r.end.min(rom.len()))
        .unwrap_or(0..rom.len());
    let decoder = SnesDecoder::for_mapping(metadata.mapping(), rom.len());

    let mut issues = Vec::new();
    if options.mapping.is_none() && metadata.detection.confidence < MIN_MAPPING_CONFIDENCE {
        issues.push(AnalysisIssue::InvalidMappingHeader {
            confidence: metadata.detection.confidence,
        });
    }
    let mapped = decoder.translator().mapped_len();
    if mapped < rom.len() {
        log::warn!(
            "{} cannot address offsets past 0x{:06x}; 0x{:x} bytes skipped",
            metadata.mapping(),
            mapped,
            rom.len() - mapped
        );
        issues.push(AnalysisIssue::UnmappedRegion {
            start: mapped,
            end: rom.len(),
        });
    }

    let range = range.start.min(mapped)..range.end.min(mapped);
    let classifier = RegionClassifier::new(options.window_size, options.weights, options.min_region_confidence);
    let regions = classifier.classify(rom, range.clone());

    let mut engine = Engine {
        rom,
        decoder: &decoder,
        options,
        range: range.clone(),
        observer,
        queue: BTreeMap::new(),
        seen: BTreeSet::new(),
        functions: Vec::new(),
        covered: BTreeMap::new(),
        issues,
        unanalyzed: Vec::new(),
        budget_exhausted: false,
        decoded: 0,
        wave: 0,
    };

    let mut linear_listing = Vec::new();
    match options.strategy {
        Strategy::Recursive => engine.run_recursive(&metadata.vectors, &regions),
        Strategy::Linear => {
            linear_listing = linear::run(rom, &decoder, range, ProcessorContext::default());
            engine.decoded = linear_listing.len();
        }
    }

    let result = engine.finish(metadata, regions, linear_listing);
    observer.finished(&result);
    result
}

/// Linear sweep of `range` without any control-flow analysis.
///
/// Uses `mapping` if given, otherwise the detected layout.
pub fn disassemble_range(
    rom: &[u8],
    range: Range<RomOffset>,
    mapping: Option<MappingType>,
    context: ProcessorContext,
) -> Vec<Instruction> {
    let mapping = mapping.unwrap_or_else(|| crate::mapping::detect_mapping(rom).mapping);
    let decoder = SnesDecoder::for_mapping(mapping, rom.len());
    linear::run(rom, &decoder, range, context)
}

/// Read a ROM image from disk.
///
/// A length that looks like it still carries a copier header is logged but
/// left alone.
pub fn load_rom(path: impl AsRef<Path>) -> Result<Vec<u8>, DisassemblyError> {
    let path = path.as_ref();
    let rom = std::fs::read(path)?;
    if has_copier_header(rom.len()) {
        log::warn!(
            "{} is 0x{:x} bytes, which suggests a 512-byte copier header; strip it before analysis",
            path.display(),
            rom.len()
        );
    }
    Ok(rom)
}

/// A function entry waiting to be traced.
#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    offset: RomOffset,
    context: ProcessorContext,
    seed: Seed,
}

/// Output of tracing one function, before it is merged.
struct Trace {
    entry: PendingEntry,
    state: WalkState,
    truncated_at: Option<RomOffset>,
    instructions: BTreeMap<RomOffset, Instruction>,
    calls: Vec<Target>,
    jumps: Vec<Target>,
    labels: BTreeSet<RomOffset>,
    unmapped: BTreeSet<CpuAddress>,
    unresolved: BTreeSet<RomOffset>,
    decoded: usize,
}

impl Trace {
    /// Keep only the first `count` instructions by offset, and the transfers
    /// made from them. The result is marked as stopped by a limit.
    fn truncate(&mut self, count: usize) {
        let Some(&cut) = self.instructions.keys().nth(count) else {
            return;
        };
        self.instructions.retain(|&offset, _| offset < cut);
        self.calls.retain(|t| t.from < cut);
        self.jumps.retain(|t| t.from < cut);
        self.labels.retain(|&offset| offset < cut);
        self.unresolved.retain(|&offset| offset < cut);
        self.decoded = self.instructions.len();
        self.truncated_at = None;
        self.state = WalkState::TerminatedLimit;
    }
}

struct Engine<'a> {
    rom: &'a [u8],
    decoder: &'a SnesDecoder,
    options: &'a AnalysisOptions,
    range: Range<RomOffset>,
    observer: &'a dyn AnalysisObserver,
    queue: BTreeMap<RomOffset, PendingEntry>,
    seen: BTreeSet<RomOffset>,
    functions: Vec<(Function, BTreeSet<RomOffset>)>,
    /// Instruction start to end, across all merged functions.
    covered: BTreeMap<RomOffset, RomOffset>,
    issues: Vec<AnalysisIssue>,
    unanalyzed: Vec<RomOffset>,
    budget_exhausted: bool,
    decoded: usize,
    wave: usize,
}

impl<'a> Engine<'a> {
    fn enqueue(&mut self, offset: RomOffset, context: ProcessorContext, seed: Seed) -> bool {
        if !self.range.contains(&offset) || !self.seen.insert(offset) {
            return false;
        }
        self.queue.insert(offset, PendingEntry { offset, context, seed });
        true
    }

    fn run_recursive(&mut self, vectors: &[VectorTarget], regions: &[RegionScore]) {
        let options = self.options;
        let mut seeded = false;
        for &address in &options.entry_points {
            if let Some(offset) = self.decoder.translator().cpu_to_rom_offset(address) {
                seeded |= self.enqueue(offset, ProcessorContext::default(), Seed::EntryPoint);
            }
        }
        if options.seed_vectors {
            for vector in vectors {
                let Some(offset) = vector.offset else { continue };
                let context = match vector.vector {
                    InterruptVector::Reset => ProcessorContext::reset(),
                    v if v.is_emulation() => ProcessorContext::emulation(),
                    _ => ProcessorContext::default(),
                };
                seeded |= self.enqueue(offset, context, Seed::Vector(vector.vector));
            }
        }
        self.drain();

        if options.seed_regions {
            let candidates = regions
                .iter()
                .filter(|r| r.kind == RegionKind::Code && r.confidence >= options.min_region_confidence);
            for region in candidates {
                if self.budget_exhausted {
                    break;
                }
                if self.is_covered(region.offset..region.end()) {
                    continue;
                }
                if self.enqueue(region.offset, ProcessorContext::default(), Seed::Region) {
                    seeded = true;
                    self.drain();
                }
            }
        }

        if !seeded && self.functions.is_empty() {
            self.enqueue(self.range.start, ProcessorContext::emulation(), Seed::Fallback);
            self.drain();
        }
    }

    fn is_covered(&self, window: Range<RomOffset>) -> bool {
        let before = self
            .covered
            .range(..window.start)
            .next_back()
            .is_some_and(|(_, &end)| end > window.start);
        before || self.covered.range(window).next().is_some()
    }

    /// Trace queued entries wave by wave until the queue is empty.
    fn drain(&mut self) {
        while !self.queue.is_empty() {
            let wave: Vec<PendingEntry> = std::mem::take(&mut self.queue).into_values().collect();
            if self.budget_exhausted {
                self.unanalyzed.extend(wave.iter().map(|e| e.offset));
                continue;
            }
            self.wave += 1;
            self.observer.wave_started(self.wave, wave.len());

            let this = &*self;
            let traces: Vec<Trace> = if this.options.parallel {
                wave.par_iter().map(|entry| this.trace(entry)).collect()
            } else {
                wave.iter().map(|entry| this.trace(entry)).collect()
            };

            let mut traces = traces.into_iter();
            while let Some(mut trace) = traces.next() {
                if let Some(budget) = self.options.instruction_budget {
                    if self.decoded + trace.decoded > budget {
                        self.budget_exhausted = true;
                        let remaining = budget - self.decoded;
                        if remaining == 0 {
                            self.unanalyzed.push(trace.entry.offset);
                        } else {
                            trace.truncate(remaining);
                            self.decoded = budget;
                            self.merge(trace);
                        }
                        self.unanalyzed.extend(traces.by_ref().map(|t| t.entry.offset));
                        break;
                    }
                }
                self.decoded += trace.decoded;
                self.merge(trace);
            }
        }
    }

    /// Trace one function: its entry walk plus every branch target reached from it.
    fn trace(&self, entry: &PendingEntry) -> Trace {
        let walker = ControlFlowWalker::new(self.rom, self.decoder)
            .with_limit(self.options.max_instructions)
            .with_end(self.range.end);
        let first = walker.walk(entry.offset, entry.context);
        let confident = first.state.is_confident();

        let mut trace = Trace {
            entry: *entry,
            state: first.state,
            truncated_at: first.truncated_at,
            instructions: BTreeMap::new(),
            calls: Vec::new(),
            jumps: Vec::new(),
            labels: BTreeSet::new(),
            unmapped: BTreeSet::new(),
            unresolved: BTreeSet::new(),
            decoded: 0,
        };

        let mut walked = BTreeSet::from([entry.offset]);
        let mut pending = VecDeque::new();
        let mut walk = first;
        loop {
            trace.decoded += walk.instructions.len();
            for insn in walk.instructions {
                insert_non_overlapping(&mut trace.instructions, insn);
            }
            trace.unresolved.extend(walk.unresolved);

            // a walk that never reached a terminator may be decoding data
            if confident {
                for target in walk.calls {
                    self.note_target(&mut trace, target, true);
                }
                for target in walk.jumps {
                    self.note_target(&mut trace, target, false);
                }
                for target in walk.branches {
                    match target.offset {
                        None => {
                            trace.unmapped.insert(target.address);
                        }
                        Some(offset) if offset < entry.offset || !self.range.contains(&offset) => {
                            trace.jumps.push(target);
                        }
                        Some(offset) => {
                            trace.labels.insert(offset);
                            if walked.insert(offset) {
                                pending.push_back((offset, target.context));
                            }
                        }
                    }
                }
            }

            let mut next = None;
            while let Some((offset, context)) = pending.pop_front() {
                if !trace.instructions.contains_key(&offset) {
                    next = Some((offset, context));
                    break;
                }
            }
            let Some((offset, context)) = next else { break };
            if trace.instructions.len() >= self.options.max_instructions {
                break;
            }
            walk = walker.walk(offset, context);
        }
        trace
    }

    fn note_target(&self, trace: &mut Trace, target: Target, call: bool) {
        if target.offset.is_none() {
            trace.unmapped.insert(target.address);
        }
        if call {
            trace.calls.push(target);
        } else {
            trace.jumps.push(target);
        }
    }

    fn merge(&mut self, trace: Trace) {
        let entry = trace.entry;
        if trace.instructions.is_empty() {
            if let Some(offset) = trace.truncated_at {
                self.issues.push(AnalysisIssue::TruncatedInstruction { offset });
            }
            return;
        }
        if entry.seed == Seed::Region && !trace.state.is_confident() {
            log::debug!("dropping region seed at 0x{:06x}: {:?}", entry.offset, trace.state);
            return;
        }
        if trace.state == WalkState::TerminatedTruncated {
            if let Some(offset) = trace.truncated_at {
                self.issues.push(AnalysisIssue::TruncatedInstruction { offset });
            }
        }
        self.issues.extend(
            trace
                .unresolved
                .iter()
                .map(|&offset| AnalysisIssue::UnresolvableOperand { offset }),
        );

        for target in trace.calls.iter() {
            if let Some(offset) = target.offset {
                self.enqueue(offset, target.context, Seed::Call);
            }
        }
        for target in trace.jumps.iter() {
            if let Some(offset) = target.offset {
                self.enqueue(offset, target.context, Seed::Jump);
            }
        }

        let Some(function) = build_function(&trace) else {
            return;
        };
        for insn in &function.instructions {
            self.covered.entry(insn.offset).or_insert(insn.end());
        }
        self.observer.function_found(&function);
        self.functions.push((function, trace.labels));
    }

    fn finish(
        self,
        metadata: crate::parser::RomMetadata,
        regions: Vec<RegionScore>,
        linear_listing: Vec<Instruction>,
    ) -> AnalysisResult {
        let Engine {
            decoder,
            options,
            observer,
            functions,
            mut issues,
            mut unanalyzed,
            budget_exhausted,
            decoded,
            ..
        } = self;
        let translator = decoder.translator();

        let mut functions = functions;
        functions.sort_by_key(|(f, _)| f.start);

        let mut instructions = BTreeMap::new();
        let mut symbols = BTreeMap::new();
        let mut labels = BTreeMap::new();
        let mut xrefs = BTreeSet::new();
        let entries: BTreeSet<RomOffset> = functions.iter().map(|(f, _)| f.start).collect();

        for (function, branch_labels) in &functions {
            symbols.insert(function.start, function.name.clone());
            for &offset in branch_labels {
                if offset != function.start && !entries.contains(&offset) {
                    if let Some(address) = translator.rom_offset_to_cpu(offset) {
                        labels.insert(offset, label_name(address));
                    }
                }
            }
            // targets of walks that never terminated were not followed
            let follows_targets = function.termination.is_confident();
            for insn in &function.instructions {
                instructions.entry(insn.offset).or_insert_with(|| insn.clone());
                if !follows_targets {
                    continue;
                }
                let (kind, address) = match insn.flow() {
                    Flow::Call(Some(address)) => (XrefKind::Call, address),
                    Flow::Jump(Some(address)) => (XrefKind::Jump, address),
                    _ => continue,
                };
                if let Some(to) = translator.cpu_to_rom_offset(address) {
                    xrefs.insert(CrossReference {
                        from: insn.offset,
                        to,
                        kind,
                        from_address: insn.address,
                        to_address: address,
                    });
                }
            }
        }
        for insn in linear_listing {
            instructions.entry(insn.offset).or_insert(insn);
        }

        unanalyzed.sort_unstable();
        unanalyzed.dedup();
        if budget_exhausted {
            observer.budget_exhausted(unanalyzed.len());
            issues.push(AnalysisIssue::BudgetExhausted {
                remaining: unanalyzed.len(),
            });
        }

        AnalysisResult {
            mapping: metadata.detection,
            header: metadata.header,
            vectors: metadata.vectors,
            banks: metadata.banks,
            strategy: options.strategy,
            functions: functions.into_iter().map(|(f, _)| f).collect(),
            instructions,
            xrefs,
            symbols,
            labels,
            regions,
            issues,
            unanalyzed,
            budget_exhausted,
            instructions_decoded: decoded,
        }
    }
}

/// Keep `insn` unless it overlaps one already present.
fn insert_non_overlapping(map: &mut BTreeMap<RomOffset, Instruction>, insn: Instruction) {
    let overlaps_before = map
        .range(..=insn.offset)
        .next_back()
        .is_some_and(|(_, prev)| prev.end() > insn.offset);
    let overlaps_after = map.range(insn.offset..insn.end()).next().is_some();
    if !overlaps_before && !overlaps_after {
        map.insert(insn.offset, insn);
    }
}

fn build_function(trace: &Trace) -> Option<Function> {
    let start = trace.entry.offset;
    let instructions: Vec<Instruction> = trace.instructions.values().cloned().collect();
    let address = instructions.first()?.address;
    let end = instructions.last().map_or(start, Instruction::end);

    let gaps = instructions
        .windows(2)
        .filter(|w| w[0].end() < w[1].offset)
        .map(|w| w[0].end()..w[1].offset)
        .collect();

    let sorted = |targets: &[Target]| -> Vec<CpuAddress> {
        targets
            .iter()
            .map(|t| t.address)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    };

    let tag = match trace.state {
        WalkState::TerminatedReturn | WalkState::TerminatedJump => CodeTag::Code,
        WalkState::TerminatedTruncated => CodeTag::LikelyData,
        WalkState::TerminatedLimit | WalkState::Running => CodeTag::Unknown,
    };

    Some(Function {
        name: function_name(address),
        start,
        end,
        address,
        kind: classify_kind(&instructions),
        instructions,
        calls: sorted(&trace.calls),
        jumps: sorted(&trace.jumps),
        unmapped_targets: trace.unmapped.iter().copied().collect(),
        unresolved: trace.unresolved.iter().copied().collect(),
        gaps,
        tag,
        seed: trace.entry.seed,
        termination: trace.state,
        entry_context: trace.entry.context,
    })
}

/// `sub_BB_AAAA`
pub fn function_name(address: CpuAddress) -> String {
    format!("sub_{:02X}_{:04X}", address.bank, address.addr)
}

/// `loc_BB_AAAA`
pub fn label_name(address: CpuAddress) -> String {
    format!("loc_{:02X}_{:04X}", address.bank, address.addr)
}

/// Guess what a routine does from its instruction mix.
pub fn classify_kind(instructions: &[Instruction]) -> FunctionKind {
    use Mnemonic::*;

    if instructions.iter().any(|i| i.mnemonic == Rti) {
        return FunctionKind::InterruptHandler;
    }
    let total = instructions.len();
    let tail = &instructions[total.saturating_sub(5)..];
    if total > 50 && tail.iter().any(|i| matches!(i.mnemonic, Bra | Brl | Jmp | Jml)) {
        return FunctionKind::MainLoop;
    }
    let count = |pred: fn(Mnemonic) -> bool| instructions.iter().filter(|i| pred(i.mnemonic)).count();
    let moves = count(|m| matches!(m, Lda | Sta | Ldx | Stx | Ldy | Sty | Stz));
    if moves * 10 > total * 6 {
        return FunctionKind::DataHandler;
    }
    let math = count(|m| matches!(m, Adc | Sbc | And | Ora | Eor | Asl | Lsr | Rol | Ror));
    if math * 10 > total * 4 {
        return FunctionKind::Calculation;
    }
    FunctionKind::Subroutine
}
