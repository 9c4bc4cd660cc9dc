const ROM_BANK_SIZE: usize = 0x4000;
const VRAM_SIZE: usize = 0x2000;
const ERAM_SIZE: usize = 0x2000;
const WRAM_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0xA0;
const IO_SIZE: usize = 0x80;
const HRAM_SIZE: usize = 0x7F;

const TILE_BYTES: usize = 16;

// I/O register addresses (gbdev.io/pandocs/Hardware_Reg_List.html)
pub const P1: u16 = 0xFF00;
pub const IF: u16 = 0xFF0F;
pub const LCDC: u16 = 0xFF40;
pub const STAT: u16 = 0xFF41;
pub const SCY: u16 = 0xFF42;
pub const SCX: u16 = 0xFF43;
pub const LY: u16 = 0xFF44;
pub const LYC: u16 = 0xFF45;
pub const BGP: u16 = 0xFF47;
pub const OBP0: u16 = 0xFF48;
pub const OBP1: u16 = 0xFF49;
pub const WY: u16 = 0xFF4A;
pub const WX: u16 = 0xFF4B;
pub const IE: u16 = 0xFFFF;

const NINTENDO_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];
const LOGO_START: usize = 0x0104;
const HEADER_CHECKSUM_START: usize = 0x0134;
const HEADER_CHECKSUM_END: usize = 0x014C;
const HEADER_CHECKSUM: usize = 0x014D;

/// Which BGP value `load_rom` installs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BgpConvention {
    /// 0xFC, the value the DMG boot ROM leaves behind.
    #[default]
    Dmg,
    /// 0xE4, the identity mapping (shade n for colour n).
    Identity,
}

impl BgpConvention {
    pub const fn value(self) -> u8 {
        match self {
            BgpConvention::Dmg => 0xFC,
            BgpConvention::Identity => 0xE4,
        }
    }
}

/// Result of the cartridge header sanity checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RomCheck {
    pub logo: bool,
    pub header_checksum: bool,
}

impl RomCheck {
    pub fn is_valid(&self) -> bool {
        self.logo && self.header_checksum
    }
}

/// Flat 16-bit address space.
///
/// Every address maps to exactly one region, so reads and writes are total.
/// ROM writes are dropped since no bank controller is modelled.
pub struct Mmu {
    rom0: Box<[u8; ROM_BANK_SIZE]>,
    romx: Box<[u8; ROM_BANK_SIZE]>,
    vram: Box<[u8; VRAM_SIZE]>,
    eram: Box<[u8; ERAM_SIZE]>,
    wram: Box<[u8; WRAM_SIZE]>,
    oam: [u8; OAM_SIZE],
    io: [u8; IO_SIZE],
    hram: [u8; HRAM_SIZE],
    ie_reg: u8,
}

impl Mmu {
    pub fn new() -> Self {
        Self {
            rom0: Box::new([0; ROM_BANK_SIZE]),
            romx: Box::new([0; ROM_BANK_SIZE]),
            vram: Box::new([0; VRAM_SIZE]),
            eram: Box::new([0; ERAM_SIZE]),
            wram: Box::new([0; WRAM_SIZE]),
            oam: [0; OAM_SIZE],
            io: [0; IO_SIZE],
            hram: [0; HRAM_SIZE],
            ie_reg: 0,
        }
    }

    #[inline]
    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => self.rom0[addr as usize],
            0x4000..=0x7FFF => self.romx[(addr - 0x4000) as usize],
            0x8000..=0x9FFF => self.vram[(addr - 0x8000) as usize],
            0xA000..=0xBFFF => self.eram[(addr - 0xA000) as usize],
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            // Echo RAM aliases C000-DDFF.
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00..=0xFF7F => self.io[(addr - 0xFF00) as usize],
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie_reg,
        }
    }

    #[inline]
    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => {}
            0x8000..=0x9FFF => self.vram[(addr - 0x8000) as usize] = val,
            0xA000..=0xBFFF => self.eram[(addr - 0xA000) as usize] = val,
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F => self.io[(addr - 0xFF00) as usize] = val,
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie_reg = val,
        }
    }

    /// Little-endian 16-bit read. The high byte wraps to 0x0000 after 0xFFFF.
    #[inline]
    pub fn read_word(&self, addr: u16) -> u16 {
        let lo = self.read_byte(addr);
        let hi = self.read_byte(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    #[inline]
    pub fn write_word(&mut self, addr: u16, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write_byte(addr, lo);
        self.write_byte(addr.wrapping_add(1), hi);
    }

    /// The 16 bytes of tile data for `index`.
    ///
    /// Unsigned numbering bases tile 0 at 0x8000. Signed numbering bases
    /// tile 0 at 0x9000 and treats `index` as an `i8`, reaching back to
    /// 0x8800 for index 0x80.
    pub fn tile_data(&self, index: u8, signed: bool) -> &[u8] {
        let offset = if signed {
            (0x1000 + (index as i8 as isize) * TILE_BYTES as isize) as usize
        } else {
            index as usize * TILE_BYTES
        };
        &self.vram[offset..offset + TILE_BYTES]
    }

    /// Background tile map selected by LCDC bit 3.
    pub fn bg_map_base(&self) -> u16 {
        if self.read_byte(LCDC) & 0x08 != 0 {
            0x9C00
        } else {
            0x9800
        }
    }

    /// Tile data area selected by LCDC bit 4.
    pub fn tile_data_base(&self) -> u16 {
        if self.read_byte(LCDC) & 0x10 != 0 {
            0x8000
        } else {
            0x8800
        }
    }

    /// Clear RAM and I/O, copy `data` into ROM0/ROMX and install the
    /// post-boot LCD register defaults.
    ///
    /// Short buffers are zero-padded and anything past 0x8000 is ignored.
    pub fn load_rom(&mut self, data: &[u8], bgp: BgpConvention) {
        self.rom0.fill(0);
        self.romx.fill(0);
        self.vram.fill(0);
        self.eram.fill(0);
        self.wram.fill(0);
        self.oam.fill(0);
        self.io.fill(0);
        self.hram.fill(0);
        self.ie_reg = 0;

        let bank0 = data.len().min(ROM_BANK_SIZE);
        self.rom0[..bank0].copy_from_slice(&data[..bank0]);
        if data.len() > ROM_BANK_SIZE {
            let bank1 = (data.len() - ROM_BANK_SIZE).min(ROM_BANK_SIZE);
            self.romx[..bank1].copy_from_slice(&data[ROM_BANK_SIZE..ROM_BANK_SIZE + bank1]);
        }

        let capacity = 2 * ROM_BANK_SIZE;
        if data.len() < capacity {
            log::debug!(
                "ROM buffer is {} bytes; zero-filled {} bytes",
                data.len(),
                capacity - data.len()
            );
        } else if data.len() > capacity {
            log::debug!(
                "ROM buffer is {} bytes; only the first two banks are mapped",
                data.len()
            );
        }

        self.write_byte(LCDC, 0x91);
        self.write_byte(STAT, 0x00);
        self.write_byte(SCY, 0x00);
        self.write_byte(SCX, 0x00);
        self.write_byte(LY, 0x00);
        self.write_byte(LYC, 0x00);
        self.write_byte(BGP, bgp.value());
        self.write_byte(OBP0, 0xFF);
        self.write_byte(OBP1, 0xFF);

        let check = self.verify_rom();
        if !check.is_valid() {
            log::warn!(
                "ROM header check failed (logo: {}, header checksum: {})",
                check.logo,
                check.header_checksum
            );
        }
    }

    /// Compare the Nintendo logo and header checksum of the mapped ROM.
    pub fn verify_rom(&self) -> RomCheck {
        let logo = self.rom0[LOGO_START..LOGO_START + NINTENDO_LOGO.len()] == NINTENDO_LOGO;
        let sum = self.rom0[HEADER_CHECKSUM_START..=HEADER_CHECKSUM_END]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_sub(b).wrapping_sub(1));
        RomCheck {
            logo,
            header_checksum: sum == self.rom0[HEADER_CHECKSUM],
        }
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}
