//! FPS overlay drawn straight into the frame with a 5x7 bitmap font

use crate::pipeline::types::{Frame, Geometry};

const SCALE: u32 = 2;
const GLYPH_ADVANCE: u32 = 6 * SCALE;
const ORIGIN: (u32, u32) = (10, 10);
const PADDING: u32 = 4;

const TEXT: [u8; 3] = [0, 255, 0];
const BACKDROP: [u8; 3] = [0, 0, 0];

/// Draw `text` in the top-left corner over a dark backdrop.
///
/// Single channel frames are promoted to RGB first so the colored text stays
/// visible; frames with 2 channels are left untouched.
pub fn draw_fps(frame: &mut Frame, text: &str) {
    if frame.is_empty() {
        return;
    }
    if frame.channels() == 1 {
        promote_to_rgb(frame);
    }
    if frame.channels() < 3 {
        return;
    }

    let (x, y) = ORIGIN;
    let width = text.chars().count() as u32 * GLYPH_ADVANCE;
    fill_rect(
        frame,
        x.saturating_sub(PADDING),
        y.saturating_sub(PADDING),
        x + width + PADDING,
        y + 7 * SCALE + PADDING,
        BACKDROP,
    );
    draw_text(frame, x, y, text, TEXT);
}

fn promote_to_rgb(frame: &mut Frame) {
    let mono = std::mem::take(frame);
    frame.reshape(Geometry::new(mono.width(), mono.height(), 3));
    for (px, value) in frame.data_mut().chunks_exact_mut(3).zip(mono.data()) {
        px.fill(*value);
    }
}

fn put_pixel(frame: &mut Frame, x: u32, y: u32, color: [u8; 3]) {
    if x >= frame.width() || y >= frame.height() {
        return;
    }
    let channels = frame.channels() as usize;
    let offset = y as usize * frame.stride() + x as usize * channels;
    frame.data_mut()[offset..offset + 3].copy_from_slice(&color);
}

fn fill_rect(frame: &mut Frame, left: u32, top: u32, right: u32, bottom: u32, color: [u8; 3]) {
    let right = right.min(frame.width());
    let bottom = bottom.min(frame.height());
    for y in top..bottom {
        for x in left..right {
            put_pixel(frame, x, y, color);
        }
    }
}

fn draw_text(frame: &mut Frame, mut x: u32, y: u32, text: &str, color: [u8; 3]) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5u32 {
                    if (pattern >> (4 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = x + col * SCALE;
                    let py = y + row as u32 * SCALE;
                    fill_rect(frame, px, py, px + SCALE, py + SCALE, color);
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}
