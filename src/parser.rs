//! SNES internal header and interrupt vector parsing.

use std::fmt;

use serde::Serialize;

use crate::mapping::{detect_mapping, AddressTranslator, BankMapEntry, CpuAddress, MappingDetection, MappingType};
use crate::{RomOffset, RomParser};

/// File offset of the LoROM internal header.
pub const LOROM_HEADER: usize = 0x7FC0;
/// File offset of the HiROM internal header.
pub const HIROM_HEADER: usize = 0xFFC0;
/// Internal header of an ExHiROM image, in the first bank past 4MB.
pub const EXHIROM_HEADER: usize = 0x40_FFC0;
/// Bytes from the header start through the end of the vector table.
pub const HEADER_LEN: usize = 0x40;
/// Length of the header some copier devices prepend to dumps.
pub const COPIER_HEADER_LEN: usize = 0x200;

const TITLE_LEN: usize = 21;

// Header scoring, in points out of 100.
const TITLE_POINTS: u32 = 35;
const MAP_MODE_POINTS: u32 = 10;
const LAYOUT_POINTS: u32 = 5;
const CART_TYPE_POINTS: u32 = 5;
const CHECKSUM_POINTS: u32 = 45;

/// The 65C816 interrupt vectors stored at the top of bank 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InterruptVector {
    CopNative,
    BrkNative,
    AbortNative,
    NmiNative,
    IrqNative,
    CopEmulation,
    AbortEmulation,
    NmiEmulation,
    Reset,
    IrqEmulation,
}

impl InterruptVector {
    pub const ALL: [InterruptVector; 10] = [
        InterruptVector::CopNative,
        InterruptVector::BrkNative,
        InterruptVector::AbortNative,
        InterruptVector::NmiNative,
        InterruptVector::IrqNative,
        InterruptVector::CopEmulation,
        InterruptVector::AbortEmulation,
        InterruptVector::NmiEmulation,
        InterruptVector::Reset,
        InterruptVector::IrqEmulation,
    ];

    /// Bank-0 address of the vector's pointer.
    pub fn cpu_address(self) -> u16 {
        match self {
            InterruptVector::CopNative => 0xFFE4,
            InterruptVector::BrkNative => 0xFFE6,
            InterruptVector::AbortNative => 0xFFE8,
            InterruptVector::NmiNative => 0xFFEA,
            InterruptVector::IrqNative => 0xFFEE,
            InterruptVector::CopEmulation => 0xFFF4,
            InterruptVector::AbortEmulation => 0xFFF8,
            InterruptVector::NmiEmulation => 0xFFFA,
            InterruptVector::Reset => 0xFFFC,
            InterruptVector::IrqEmulation => 0xFFFE,
        }
    }

    /// Whether the CPU is in emulation mode when it takes this vector.
    pub fn is_emulation(self) -> bool {
        matches!(
            self,
            InterruptVector::CopEmulation
                | InterruptVector::AbortEmulation
                | InterruptVector::NmiEmulation
                | InterruptVector::Reset
                | InterruptVector::IrqEmulation
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            InterruptVector::CopNative => "cop_native",
            InterruptVector::BrkNative => "brk_native",
            InterruptVector::AbortNative => "abort_native",
            InterruptVector::NmiNative => "nmi_native",
            InterruptVector::IrqNative => "irq_native",
            InterruptVector::CopEmulation => "cop_emulation",
            InterruptVector::AbortEmulation => "abort_emulation",
            InterruptVector::NmiEmulation => "nmi_emulation",
            InterruptVector::Reset => "reset",
            InterruptVector::IrqEmulation => "irq_emulation",
        }
    }
}

impl fmt::Display for InterruptVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The 64-byte internal header at `$FFC0` of the cartridge's bank 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnesHeader {
    /// File offset the header was read from.
    pub offset: usize,
    /// Title with unprintable bytes replaced by `?` and trailing blanks trimmed.
    pub title: String,
    pub title_bytes: [u8; TITLE_LEN],
    pub map_mode: u8,
    pub cartridge_type: u8,
    pub rom_size: u8,
    pub sram_size: u8,
    pub region: u8,
    pub developer: u8,
    pub version: u8,
    pub checksum_complement: u16,
    pub checksum: u16,
    /// Raw vector table words from `$FFE0-$FFFF`.
    pub vector_table: [u16; 16],
}

impl SnesHeader {
    /// Read a header at `offset`, or `None` if the image is too short.
    pub fn read(rom: &[u8], offset: usize) -> Option<Self> {
        let raw = rom.get(offset..offset.checked_add(HEADER_LEN)?)?;
        let word = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);

        let mut title_bytes = [0u8; TITLE_LEN];
        title_bytes.copy_from_slice(&raw[..TITLE_LEN]);
        let title: String = title_bytes
            .iter()
            .map(|&b| if is_printable(b) { b as char } else { '?' })
            .collect::<String>()
            .trim_end_matches([' ', '?'])
            .to_string();

        let mut vector_table = [0u16; 16];
        for (i, slot) in vector_table.iter_mut().enumerate() {
            *slot = word(0x20 + i * 2);
        }

        Some(Self {
            offset,
            title,
            title_bytes,
            map_mode: raw[0x15],
            cartridge_type: raw[0x16],
            rom_size: raw[0x17],
            sram_size: raw[0x18],
            region: raw[0x19],
            developer: raw[0x1A],
            version: raw[0x1B],
            checksum_complement: word(0x1C),
            checksum: word(0x1E),
            vector_table,
        })
    }

    /// Number of printable ASCII bytes in the title field.
    pub fn printable_title_bytes(&self) -> usize {
        self.title_bytes.iter().filter(|&&b| is_printable(b)).count()
    }

    /// Map mode is one of the known `001x_xxxx` layouts.
    pub fn map_mode_valid(&self) -> bool {
        matches!(self.map_mode & 0xEF, 0x20 | 0x21 | 0x22 | 0x23 | 0x25 | 0x2A)
    }

    /// Odd map modes are the HiROM family; `$x5` is ExHiROM.
    pub fn map_mode_mapping(&self) -> Option<MappingType> {
        self.map_mode_valid().then(|| match self.map_mode & 0x0F {
            0x05 => MappingType::ExHiRom,
            mode if mode & 0x01 != 0 => MappingType::HiRom,
            _ => MappingType::LoRom,
        })
    }

    /// ROM only / RAM / battery, optionally with a coprocessor nibble.
    pub fn cartridge_type_valid(&self) -> bool {
        let low = self.cartridge_type & 0x0F;
        let high = self.cartridge_type >> 4;
        (high == 0 && low <= 0x06) || (high > 0 && (0x03..=0x06).contains(&low))
    }

    pub fn checksum_pair_valid(&self) -> bool {
        self.checksum ^ self.checksum_complement == 0xFFFF
    }

    /// Declared ROM size in bytes.
    pub fn declared_rom_size(&self) -> Option<usize> {
        (self.rom_size > 0 && self.rom_size < 16).then(|| 0x400usize << self.rom_size)
    }

    /// Plausibility of this header for `expected`, in points out of 100.
    pub fn score(&self, expected: MappingType) -> u32 {
        let mut points = TITLE_POINTS * self.printable_title_bytes() as u32 / TITLE_LEN as u32;
        if let Some(layout) = self.map_mode_mapping() {
            points += MAP_MODE_POINTS;
            if layout == expected {
                points += LAYOUT_POINTS;
            }
        }
        if self.cartridge_type_valid() {
            points += CART_TYPE_POINTS;
        }
        if self.checksum_pair_valid() {
            points += CHECKSUM_POINTS;
        }
        points
    }
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}

/// Checksum the way the cartridge header defines it: a 16-bit byte sum, with
/// a non-power-of-two tail mirrored up to the next power of two.
pub fn compute_checksum(rom: &[u8]) -> u16 {
    fn sum(bytes: &[u8]) -> u32 {
        bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
    }
    if rom.is_empty() {
        return 0;
    }
    let base = if rom.len().is_power_of_two() {
        rom.len()
    } else {
        rom.len().next_power_of_two() / 2
    };
    let (head, tail) = rom.split_at(base);
    let mut total = sum(head);
    if !tail.is_empty() {
        let repeats = (base / tail.len()).max(1) as u32;
        total = total.wrapping_add(sum(tail).wrapping_mul(repeats));
    }
    total as u16
}

/// Where one interrupt vector points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorTarget {
    pub vector: InterruptVector,
    pub address: CpuAddress,
    /// `None` when the handler lives outside ROM (e.g. a RAM trampoline).
    pub offset: Option<RomOffset>,
}

/// Everything learned from the image before any code is decoded.
#[derive(Debug, Clone, Serialize)]
pub struct RomMetadata {
    pub detection: MappingDetection,
    pub header: Option<SnesHeader>,
    pub banks: Vec<BankMapEntry>,
    /// Populated vectors in [`InterruptVector::ALL`] order.
    pub vectors: Vec<VectorTarget>,
    pub computed_checksum: u16,
}

impl RomMetadata {
    pub fn mapping(&self) -> MappingType {
        self.detection.mapping
    }

    /// Header checksum matches the one computed over the image.
    pub fn checksum_matches(&self) -> bool {
        self.header
            .as_ref()
            .is_some_and(|h| h.checksum_pair_valid() && h.checksum == self.computed_checksum)
    }
}

/// Header-driven metadata parser, optionally with a fixed layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnesHeaderParser {
    forced: Option<MappingType>,
}

impl SnesHeaderParser {
    pub fn new() -> Self {
        Self { forced: None }
    }

    /// Skip detection and use `mapping`.
    pub fn with_mapping(mapping: MappingType) -> Self {
        Self {
            forced: Some(mapping),
        }
    }

    fn read_vectors(rom: &[u8], translator: &AddressTranslator) -> Vec<VectorTarget> {
        InterruptVector::ALL
            .iter()
            .filter_map(|&vector| {
                let at = translator.cpu_to_rom_offset(CpuAddress::new(0, vector.cpu_address()))?;
                let bytes = rom.get(at..at + 2)?;
                let value = u16::from_le_bytes([bytes[0], bytes[1]]);
                if value == 0x0000 || value == 0xFFFF {
                    return None;
                }
                let address = CpuAddress::new(0, value);
                Some(VectorTarget {
                    vector,
                    address,
                    offset: translator.cpu_to_rom_offset(address),
                })
            })
            .collect()
    }
}

impl RomParser for SnesHeaderParser {
    fn parse(&self, rom: &[u8]) -> RomMetadata {
        let detection = match self.forced {
            Some(mapping) => MappingDetection::forced(mapping),
            None => detect_mapping(rom),
        };
        let header_at = detection
            .header_offset
            .unwrap_or_else(|| detection.mapping.header_offset());
        let header = SnesHeader::read(rom, header_at);
        let translator = AddressTranslator::new(detection.mapping, rom.len());

        log::debug!(
            "{} header at 0x{:x}: {:?}",
            detection.mapping,
            header_at,
            header.as_ref().map(|h| h.title.as_str())
        );

        RomMetadata {
            vectors: Self::read_vectors(rom, &translator),
            banks: translator.bank_map(),
            computed_checksum: compute_checksum(rom),
            header,
            detection,
        }
    }
}
