//! ROM offset <-> CPU address translation for LoROM and HiROM cartridges.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::parser::{SnesHeader, COPIER_HEADER_LEN, EXHIROM_HEADER, HEADER_LEN, HIROM_HEADER, LOROM_HEADER};
use crate::{DisassemblyError, RomOffset};

/// Size of the ROM window a LoROM bank exposes at `$8000-$FFFF`.
pub const LOROM_BANK_SIZE: usize = 0x8000;
/// Size of a HiROM bank.
pub const HIROM_BANK_SIZE: usize = 0x10000;
/// Largest image LoROM and HiROM can address.
pub const MAX_MAPPED_ROM: usize = 0x40_0000;
/// Largest image ExHiROM can address: 4MB at `$C0-$FF` plus banks `$40-$7D`.
pub const MAX_EXHIROM: usize = 0x7E_0000;

/// Cartridge memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    /// 32KB banks mapped at `$8000-$FFFF`.
    #[value(name = "lorom")]
    LoRom,
    /// 64KB banks mapped linearly.
    #[value(name = "hirom")]
    HiRom,
    /// HiROM past 4MB: the first 4MB at `$C0-$FF`, the rest at `$40-$7D`.
    #[value(name = "exhirom")]
    ExHiRom,
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingType::LoRom => write!(f, "LoROM"),
            MappingType::HiRom => write!(f, "HiROM"),
            MappingType::ExHiRom => write!(f, "ExHiROM"),
        }
    }
}

impl MappingType {
    /// Bytes of ROM visible in one bank.
    pub fn bank_size(self) -> usize {
        match self {
            MappingType::LoRom => LOROM_BANK_SIZE,
            MappingType::HiRom | MappingType::ExHiRom => HIROM_BANK_SIZE,
        }
    }

    /// Number of image bytes this layout gives a CPU address.
    pub fn mapped_len(self) -> usize {
        match self {
            MappingType::LoRom | MappingType::HiRom => MAX_MAPPED_ROM,
            MappingType::ExHiRom => MAX_EXHIROM,
        }
    }

    /// File offset of the internal header for this layout.
    pub fn header_offset(self) -> usize {
        match self {
            MappingType::LoRom => LOROM_HEADER,
            MappingType::HiRom => HIROM_HEADER,
            MappingType::ExHiRom => EXHIROM_HEADER,
        }
    }

    /// Canonical CPU address of a ROM offset, or `None` past [`Self::mapped_len`].
    ///
    /// LoROM banks `$7E`/`$7F` are WRAM, so the last 64KB of a 4MB LoROM
    /// image is reported through the `$FE`/`$FF` mirrors instead.
    pub fn rom_offset_to_cpu(self, offset: RomOffset) -> Option<CpuAddress> {
        if offset >= self.mapped_len() {
            return None;
        }
        let address = match self {
            MappingType::LoRom => {
                let bank = (offset / LOROM_BANK_SIZE) as u8;
                let bank = if bank >= 0x7E { bank | 0x80 } else { bank };
                CpuAddress::new(bank, (0x8000 + offset % LOROM_BANK_SIZE) as u16)
            }
            MappingType::HiRom => {
                CpuAddress::new((offset / HIROM_BANK_SIZE) as u8, (offset % HIROM_BANK_SIZE) as u16)
            }
            MappingType::ExHiRom => {
                let bank = (offset / HIROM_BANK_SIZE) as u8;
                let bank = if bank < 0x40 { bank | 0xC0 } else { bank };
                CpuAddress::new(bank, (offset % HIROM_BANK_SIZE) as u16)
            }
        };
        Some(address)
    }

    /// ROM offset a CPU address reads from, or `None` for RAM and I/O.
    pub fn cpu_to_rom_offset(self, address: CpuAddress) -> Option<RomOffset> {
        let CpuAddress { bank, addr } = address;
        if bank == 0x7E || bank == 0x7F {
            return None;
        }
        match self {
            MappingType::LoRom => {
                if addr < 0x8000 {
                    return None;
                }
                let index = if bank >= 0x80 { bank - 0x80 } else { bank } as usize;
                Some(index * LOROM_BANK_SIZE + (addr as usize - 0x8000))
            }
            MappingType::HiRom => {
                let index = (bank & 0x3F) as usize;
                Some(index * HIROM_BANK_SIZE + addr as usize)
            }
            MappingType::ExHiRom => {
                let (base, index) = match bank {
                    0xC0..=0xFF => (0, bank - 0xC0),
                    0x80..=0xBF if addr >= 0x8000 => (0, bank - 0x80),
                    0x40..=0x7D => (MAX_MAPPED_ROM, bank - 0x40),
                    0x00..=0x3D if addr >= 0x8000 => (MAX_MAPPED_ROM, bank),
                    _ => return None,
                };
                Some(base + index as usize * HIROM_BANK_SIZE + addr as usize)
            }
        }
    }
}

/// A 24-bit CPU address split into bank and 16-bit offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CpuAddress {
    pub bank: u8,
    pub addr: u16,
}

impl CpuAddress {
    pub const fn new(bank: u8, addr: u16) -> Self {
        Self { bank, addr }
    }

    /// Split a 24-bit value; bits above 23 are ignored.
    pub const fn from_u24(value: u32) -> Self {
        Self {
            bank: (value >> 16) as u8,
            addr: value as u16,
        }
    }

    pub const fn to_u24(self) -> u32 {
        (self.bank as u32) << 16 | self.addr as u32
    }

    /// Same bank, offset moved by `delta` with 16-bit wrap-around.
    pub fn wrapping_add(self, delta: i32) -> Self {
        Self {
            bank: self.bank,
            addr: (self.addr as i32).wrapping_add(delta) as u16,
        }
    }
}

impl fmt::Display for CpuAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:02X}:{:04X}", self.bank, self.addr)
    }
}

impl FromStr for CpuAddress {
    type Err = DisassemblyError;

    /// Accepts `$BB:AAAA`, `BB:AAAA`, `$BBAAAA`, `BBAAAA` and bank-0 `$AAAA`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DisassemblyError::InvalidAddress(s.to_string());
        let text = s.trim();
        let text = text.strip_prefix('$').unwrap_or(text);

        if let Some((bank, addr)) = text.split_once(':') {
            let bank = u8::from_str_radix(bank, 16).map_err(|_| invalid())?;
            let addr = u16::from_str_radix(addr, 16).map_err(|_| invalid())?;
            return Ok(CpuAddress::new(bank, addr));
        }

        match text.len() {
            6 => {
                let value = u32::from_str_radix(text, 16).map_err(|_| invalid())?;
                Ok(CpuAddress::from_u24(value))
            }
            4 => {
                let addr = u16::from_str_radix(text, 16).map_err(|_| invalid())?;
                Ok(CpuAddress::new(0, addr))
            }
            _ => Err(invalid()),
        }
    }
}

/// Translator bound to one image, so out-of-range offsets map to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressTranslator {
    pub mapping: MappingType,
    pub rom_len: usize,
}

impl AddressTranslator {
    pub fn new(mapping: MappingType, rom_len: usize) -> Self {
        Self { mapping, rom_len }
    }

    pub fn rom_offset_to_cpu(&self, offset: RomOffset) -> Option<CpuAddress> {
        self.mapping.rom_offset_to_cpu(offset)
    }

    /// Bytes of this image that have a CPU address.
    pub fn mapped_len(&self) -> usize {
        self.rom_len.min(self.mapping.mapped_len())
    }

    pub fn cpu_to_rom_offset(&self, address: CpuAddress) -> Option<RomOffset> {
        self.mapping
            .cpu_to_rom_offset(address)
            .filter(|&offset| offset < self.rom_len)
    }

    /// First offset past the bank window that contains `offset`.
    ///
    /// The program counter wraps inside a bank, so straight-line code cannot
    /// continue beyond this point.
    pub fn bank_end(&self, offset: RomOffset) -> RomOffset {
        let size = self.mapping.bank_size();
        ((offset / size + 1) * size).min(self.rom_len)
    }

    /// Per-bank layout of the image.
    pub fn bank_map(&self) -> Vec<BankMapEntry> {
        let size = self.mapping.bank_size();
        (0..self.mapped_len().div_ceil(size))
            .filter_map(|index| {
                let rom_offset = index * size;
                let start = self.rom_offset_to_cpu(rom_offset)?;
                let mirror = match self.mapping {
                    MappingType::LoRom if start.bank < 0x80 => Some(start.bank | 0x80),
                    MappingType::LoRom => None,
                    MappingType::HiRom => Some(start.bank | 0xC0),
                    // upper halves only, at $80-$BF and $00-$3D
                    MappingType::ExHiRom => Some(start.bank - 0x40),
                };
                Some(BankMapEntry {
                    bank: start.bank,
                    rom_offset,
                    cpu_start: start.addr,
                    cpu_end: start.addr.wrapping_add((size - 1) as u16),
                    mapping: self.mapping,
                    size: size.min(self.rom_len - rom_offset),
                    mirror,
                })
            })
            .collect()
    }
}

/// One bank of the image and where the CPU sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BankMapEntry {
    pub bank: u8,
    pub rom_offset: RomOffset,
    pub cpu_start: u16,
    /// Inclusive.
    pub cpu_end: u16,
    pub mapping: MappingType,
    /// Bytes actually present in the image (the last bank may be short).
    pub size: usize,
    /// Bank number of the FastROM/upper mirror, if any.
    pub mirror: Option<u8>,
}

/// Outcome of header-based layout detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingDetection {
    pub mapping: MappingType,
    /// Score of the winning header in `[0.0, 1.0]`.
    pub confidence: f64,
    pub lorom_score: f64,
    pub hirom_score: f64,
    /// File offset of the header the decision was based on.
    pub header_offset: Option<usize>,
    /// The best header sat 0x200 bytes late, i.e. a copier header is present.
    pub copier_header: bool,
}

impl MappingDetection {
    /// Result used when the image is too small to carry a header.
    pub fn unknown() -> Self {
        Self {
            mapping: MappingType::LoRom,
            confidence: 0.0,
            lorom_score: 0.0,
            hirom_score: 0.0,
            header_offset: None,
            copier_header: false,
        }
    }

    /// Detection forced by the caller.
    pub fn forced(mapping: MappingType) -> Self {
        Self {
            mapping,
            confidence: 1.0,
            lorom_score: 0.0,
            hirom_score: 0.0,
            header_offset: None,
            copier_header: false,
        }
    }
}

/// Guess the layout of `rom` from its internal header.
///
/// Never fails: a missing or unreadable header yields LoROM with the score
/// it earned (zero if the image is shorter than a LoROM header). A HiROM
/// image too large for HiROM is reported as ExHiROM.
pub fn detect_mapping(rom: &[u8]) -> MappingDetection {
    if rom.len() < LOROM_HEADER + HEADER_LEN {
        return MappingDetection::unknown();
    }

    const LAYOUTS: [MappingType; 3] = [MappingType::LoRom, MappingType::HiRom, MappingType::ExHiRom];
    let candidates = [
        (MappingType::LoRom, LOROM_HEADER, false),
        (MappingType::LoRom, LOROM_HEADER + COPIER_HEADER_LEN, true),
        (MappingType::HiRom, HIROM_HEADER, false),
        (MappingType::HiRom, HIROM_HEADER + COPIER_HEADER_LEN, true),
        (MappingType::ExHiRom, EXHIROM_HEADER, false),
    ];

    let mut best: [(u32, Option<(usize, bool)>); 3] = [(0, None); 3];
    for (mapping, offset, shifted) in candidates {
        let Some(header) = SnesHeader::read(rom, offset) else {
            continue;
        };
        let points = header.score(mapping);
        let slot = &mut best[LAYOUTS.iter().position(|&m| m == mapping).unwrap_or(0)];
        if slot.1.is_none() || points > slot.0 {
            *slot = (points, Some((offset, shifted)));
        }
    }

    // earlier layouts win ties
    let mut winner = 0;
    for (i, (points, _)) in best.iter().enumerate() {
        if *points > best[winner].0 {
            winner = i;
        }
    }
    let (points, at) = best[winner];
    let mut mapping = LAYOUTS[winner];
    if mapping == MappingType::HiRom && rom.len() > MAX_MAPPED_ROM {
        mapping = MappingType::ExHiRom;
    }

    MappingDetection {
        mapping,
        confidence: points as f64 / 100.0,
        lorom_score: best[0].0 as f64 / 100.0,
        hirom_score: best[1].0.max(best[2].0) as f64 / 100.0,
        header_offset: at.map(|(offset, _)| offset),
        copier_header: at.is_some_and(|(_, shifted)| shifted),
    }
}

/// Whether an image length looks like it still carries a 512-byte copier header.
pub fn has_copier_header(len: usize) -> bool {
    len % 1024 == COPIER_HEADER_LEN
}
