use crate::mmu::{BGP, LCDC, Mmu, OBP0, OBP1, SCX, SCY, WX, WY};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

/// Default DMG palette colors in 0x00RRGGBB order.
pub const DMG_PALETTE: [u32; 4] = [0x009BBC0F, 0x008BAC0F, 0x00306230, 0x000F380F];

// Sprite limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: u16 = 40;
const OAM_BASE: u16 = 0xFE00;

// Window X position is clipped if greater than this value
const WINDOW_X_MAX: u8 = 166;

/// Turns one finished scanline into pixels. Implementations read VRAM,
/// OAM and the palette registers through `mmu` and must not mutate it.
pub trait Rasterizer {
    fn render_scanline(&mut self, mmu: &Mmu, line: u8);
}

#[derive(Copy, Clone, Default)]
struct Sprite {
    x: i16,
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: u16,
}

/// DMG background, window and sprite renderer into a 160x144 buffer.
pub struct Framebuffer {
    pixels: Box<[u32; SCREEN_WIDTH * SCREEN_HEIGHT]>,
    palette: [u32; 4],
    /// Internal window line counter
    window_line: u8,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::with_palette(DMG_PALETTE)
    }

    /// Use four 0x00RRGGBB shades, lightest first.
    pub fn with_palette(palette: [u32; 4]) -> Self {
        Self {
            pixels: Box::new([palette[0]; SCREEN_WIDTH * SCREEN_HEIGHT]),
            palette,
            window_line: 0,
        }
    }

    /// Row-major 0x00RRGGBB pixels.
    pub fn pixels(&self) -> &[u32] {
        &self.pixels[..]
    }

    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * SCREEN_WIDTH + x]
    }

    #[inline(always)]
    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    fn tile_pixel(tile: &[u8], x: u8, y: u8) -> u8 {
        let lo = tile[y as usize * 2];
        let hi = tile[y as usize * 2 + 1];
        let bit = 7 - x;
        (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1)
    }

    fn line_sprites(mmu: &Mmu, line: u8, height: i16) -> ([Sprite; MAX_SPRITES_PER_LINE], usize) {
        let mut sprites = [Sprite::default(); MAX_SPRITES_PER_LINE];
        let mut count = 0;
        for i in 0..TOTAL_SPRITES {
            if count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = OAM_BASE + i * 4;
            let y = mmu.read_byte(base) as i16 - 16;
            if (line as i16) >= y && (line as i16) < y + height {
                sprites[count] = Sprite {
                    x: mmu.read_byte(base + 1) as i16 - 8,
                    y,
                    tile: mmu.read_byte(base + 2),
                    flags: mmu.read_byte(base + 3),
                    oam_index: i,
                };
                count += 1;
            }
        }
        // DMG-style priority: sort by X position then OAM index
        sprites[..count].sort_by_key(|s| (s.x, s.oam_index));
        (sprites, count)
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for Framebuffer {
    fn render_scanline(&mut self, mmu: &Mmu, line: u8) {
        if line as usize >= SCREEN_HEIGHT {
            return;
        }
        if line == 0 {
            self.window_line = 0;
        }

        let lcdc = mmu.read_byte(LCDC);
        let bgp = mmu.read_byte(BGP);
        let bg_enabled = lcdc & 0x01 != 0;
        let signed_tiles = lcdc & 0x10 == 0;

        // With the background off every pixel is colour 0 and sprites treat
        // the whole line as transparent background.
        let mut row = [self.palette[Self::dmg_shade(bgp, 0) as usize]; SCREEN_WIDTH];
        let mut color_zero = [true; SCREEN_WIDTH];

        if bg_enabled {
            let map = mmu.bg_map_base();
            let y = line.wrapping_add(mmu.read_byte(SCY));
            let scx = mmu.read_byte(SCX);
            for x in 0..SCREEN_WIDTH {
                let px = (x as u8).wrapping_add(scx);
                let tile_index = mmu.read_byte(map + (y as u16 / 8) * 32 + px as u16 / 8);
                let color_id = Self::tile_pixel(mmu.tile_data(tile_index, signed_tiles), px % 8, y % 8);
                row[x] = self.palette[Self::dmg_shade(bgp, color_id) as usize];
                color_zero[x] = color_id == 0;
            }

            let wy = mmu.read_byte(WY);
            let wx = mmu.read_byte(WX);
            if lcdc & 0x20 != 0 && line >= wy && wx <= WINDOW_X_MAX {
                let map = if lcdc & 0x40 != 0 { 0x9C00 } else { 0x9800 };
                let start = wx as i16 - 7;
                let window_y = self.window_line;
                for x in start.max(0)..SCREEN_WIDTH as i16 {
                    let window_x = (x - start) as u16;
                    let tile_index =
                        mmu.read_byte(map + (window_y as u16 / 8) * 32 + window_x / 8);
                    let color_id = Self::tile_pixel(
                        mmu.tile_data(tile_index, signed_tiles),
                        (window_x % 8) as u8,
                        window_y % 8,
                    );
                    row[x as usize] = self.palette[Self::dmg_shade(bgp, color_id) as usize];
                    color_zero[x as usize] = color_id == 0;
                }
                self.window_line = self.window_line.wrapping_add(1);
            }
        }

        if lcdc & 0x02 != 0 {
            let height: i16 = if lcdc & 0x04 != 0 { 16 } else { 8 };
            let (sprites, count) = Self::line_sprites(mmu, line, height);
            let mut drawn = [false; SCREEN_WIDTH];
            for s in &sprites[..count] {
                let tile = if height == 16 { s.tile & 0xFE } else { s.tile };
                let mut line_idx = line as i16 - s.y;
                if s.flags & 0x40 != 0 {
                    line_idx = height - 1 - line_idx;
                }
                let data = mmu.tile_data(tile.wrapping_add((line_idx >> 3) as u8), false);
                let palette = mmu.read_byte(if s.flags & 0x10 != 0 { OBP1 } else { OBP0 });
                for px in 0..8u8 {
                    let tx = if s.flags & 0x20 != 0 { 7 - px } else { px };
                    let color_id = Self::tile_pixel(data, tx, (line_idx & 7) as u8);
                    if color_id == 0 {
                        continue;
                    }
                    let sx = s.x + px as i16;
                    if !(0i16..SCREEN_WIDTH as i16).contains(&sx) || drawn[sx as usize] {
                        continue;
                    }
                    if s.flags & 0x80 != 0 && !color_zero[sx as usize] {
                        continue;
                    }
                    row[sx as usize] = self.palette[Self::dmg_shade(palette, color_id) as usize];
                    drawn[sx as usize] = true;
                }
            }
        }

        let start = line as usize * SCREEN_WIDTH;
        self.pixels[start..start + SCREEN_WIDTH].copy_from_slice(&row);
    }
}
