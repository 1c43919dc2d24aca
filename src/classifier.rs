//! Statistical code/data scoring of fixed-size ROM windows.
//!
//! Scores are advisory: the engine only uses them to pick extra entry points,
//! and nothing downstream treats them as ground truth.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::opcodes::{descriptor, Mnemonic};
use crate::RomOffset;

/// Default window size in bytes.
pub const DEFAULT_WINDOW_SIZE: usize = 1024;

/// Entropy (bits per byte) that typical 65C816 code sits around.
const CODE_ENTROPY_CENTER: f64 = 6.0;
const CODE_ENTROPY_SPREAD: f64 = 2.0;

/// Relative weight of each signal in the combined confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierWeights {
    pub entropy: f64,
    pub density: f64,
    pub padding: f64,
}

impl Default for ClassifierWeights {
    fn default() -> Self {
        Self {
            entropy: 0.4,
            density: 0.4,
            padding: 0.2,
        }
    }
}

/// What a window most likely holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Code,
    Data,
    Padding,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Code => write!(f, "code"),
            RegionKind::Data => write!(f, "data"),
            RegionKind::Padding => write!(f, "padding"),
        }
    }
}

/// Scores for one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionScore {
    pub offset: RomOffset,
    pub len: usize,
    /// Shannon entropy in bits per byte.
    pub entropy: f64,
    pub opcode_density: f64,
    pub padding_ratio: f64,
    pub confidence: f64,
    pub kind: RegionKind,
}

impl RegionScore {
    pub fn end(&self) -> RomOffset {
        self.offset + self.len
    }
}

/// Scores aligned windows of a ROM image.
#[derive(Debug, Clone, Copy)]
pub struct RegionClassifier {
    pub window_size: usize,
    pub weights: ClassifierWeights,
    /// Confidence at or above which a window counts as code.
    pub threshold: f64,
}

impl Default for RegionClassifier {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            weights: ClassifierWeights::default(),
            threshold: 0.6,
        }
    }
}

impl RegionClassifier {
    pub fn new(window_size: usize, weights: ClassifierWeights, threshold: f64) -> Self {
        Self {
            window_size: window_size.max(1),
            weights,
            threshold,
        }
    }

    /// Score every `window_size`-aligned window in `range` of `rom`.
    ///
    /// A window cut by the range boundary is scored over the part inside it.
    pub fn classify(&self, rom: &[u8], range: std::ops::Range<RomOffset>) -> Vec<RegionScore> {
        let end = range.end.min(rom.len());
        if range.start >= end {
            return Vec::new();
        }
        let size = self.window_size.max(1);
        let first = range.start / size * size;
        let starts: Vec<RomOffset> = (first..end).step_by(size).collect();

        starts
            .into_par_iter()
            .map(|aligned| {
                let offset = aligned.max(range.start);
                self.score(&rom[offset..(aligned + size).min(end)], offset)
            })
            .collect()
    }

    /// Score one window that starts at `offset`.
    pub fn score(&self, window: &[u8], offset: RomOffset) -> RegionScore {
        let entropy = shannon_entropy(window);
        let opcode_density = opcode_density(window);
        let padding_ratio = padding_ratio(window);
        let entropy_score =
            (1.0 - (entropy - CODE_ENTROPY_CENTER).abs() / CODE_ENTROPY_SPREAD).clamp(0.0, 1.0);

        let w = &self.weights;
        let total = w.entropy + w.density + w.padding;
        let confidence = if total > 0.0 {
            (w.entropy * entropy_score + w.density * opcode_density + w.padding * (1.0 - padding_ratio))
                / total
        } else {
            0.0
        };

        let kind = if padding_ratio > 0.9 {
            RegionKind::Padding
        } else if confidence >= self.threshold {
            RegionKind::Code
        } else {
            RegionKind::Data
        };

        RegionScore {
            offset,
            len: window.len(),
            entropy,
            opcode_density,
            padding_ratio,
            confidence: confidence.clamp(0.0, 1.0),
            kind,
        }
    }
}

/// Shannon entropy of `bytes` in bits per byte.
pub fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let len = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Opcodes that show up far more often as filler than as code.
fn is_filler_opcode(opcode: u8) -> bool {
    let mnemonic = descriptor(opcode).mnemonic;
    opcode == 0xFF || matches!(mnemonic, Mnemonic::Brk | Mnemonic::Cop | Mnemonic::Wdm | Mnemonic::Stp)
}

/// Share of bytes that are multi-byte opcodes whose operand fits in the window.
pub fn opcode_density(window: &[u8]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let hits = window
        .iter()
        .enumerate()
        .filter(|&(i, &b)| {
            let desc = descriptor(b);
            desc.operand_len > 0
                && !is_filler_opcode(b)
                && i + desc.base_size() as usize <= window.len()
        })
        .count();
    hits as f64 / window.len() as f64
}

/// Share of `0x00` and `0xFF` bytes.
pub fn padding_ratio(window: &[u8]) -> f64 {
    if window.is_empty() {
        return 1.0;
    }
    let pad = window.iter().filter(|&&b| b == 0x00 || b == 0xFF).count();
    pad as f64 / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(shannon_entropy(&[0u8; 64]), 0.0);
        let all: Vec<u8> = (0..=255).collect();
        assert!((shannon_entropy(&all) - 8.0).abs() < 1e-9);
        assert_eq!(shannon_entropy(&[]), 0.0);
    }

    #[test]
    fn test_padding_window_is_padding() {
        let classifier = RegionClassifier::default();
        let score = classifier.score(&[0xFF; 1024], 0);
        assert_eq!(score.padding_ratio, 1.0);
        assert_eq!(score.opcode_density, 0.0);
        assert_eq!(score.kind, RegionKind::Padding);
        assert!(score.confidence < 0.1);
    }

    #[test]
    fn test_code_like_window_scores_higher_than_tiles() {
        // REP #$30; LDA $1234,X; STA $7E2000,X; INX; INX; CPX #$0040; BNE; SEP #$20; JSR; RTS
        let routine: [u8; 24] = [
            0xC2, 0x30, 0xBD, 0x34, 0x12, 0x9F, 0x00, 0x20, 0x7E, 0xE8, 0xE8, 0xE0, 0x40, 0x00,
            0xD0, 0xF3, 0xE2, 0x20, 0x20, 0x00, 0x90, 0x60, 0xA9, 0x01,
        ];
        let mut code = Vec::new();
        let mut salt = 0u8;
        while code.len() < 1024 {
            code.extend(routine.iter().map(|&b| if b == 0x34 { salt } else { b }));
            salt = salt.wrapping_add(37);
        }
        code.truncate(1024);
        // 2bpp tile rows, mostly blank
        let tiles: Vec<u8> = [0x00, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x42, 0x00]
            .iter()
            .copied()
            .cycle()
            .take(1024)
            .collect();

        let classifier = RegionClassifier::default();
        let code_score = classifier.score(&code, 0);
        let tile_score = classifier.score(&tiles, 0);
        assert!(code_score.opcode_density > 0.3);
        assert!(tile_score.opcode_density < 0.2);
        assert!(code_score.confidence > tile_score.confidence + 0.2);
    }

    #[test]
    fn test_classify_aligns_windows() {
        let rom = vec![0xEA; 0x1000];
        let classifier = RegionClassifier::new(0x400, ClassifierWeights::default(), 0.6);
        let scores = classifier.classify(&rom, 0x500..0x1000);
        let offsets: Vec<_> = scores.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0x500, 0x800, 0xC00]);
        assert_eq!(scores[0].len, 0x300);
        assert!(scores[1..].iter().all(|s| s.len == 0x400));
    }

    #[test]
    fn test_zero_weights_do_not_divide_by_zero() {
        let weights = ClassifierWeights {
            entropy: 0.0,
            density: 0.0,
            padding: 0.0,
        };
        let score = RegionClassifier::new(16, weights, 0.5).score(&[0xEA; 16], 0);
        assert_eq!(score.confidence, 0.0);
    }
}
