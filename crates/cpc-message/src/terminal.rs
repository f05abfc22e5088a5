//! Terminal snapshot (type 0) decoding and the run-length plane scheme.
//!
//! Body layout after the type and window id bytes:
//!
//! ```text
//! mode u8 | blink u8 | width u16 | height u16 | cursorX u16 | cursorY u16 | reserved u32
//! mode 0:   RLE screen (w*h) + RLE colors (w*h), one shared run cursor
//! mode 1/2: RLE pixels (w*6 x h*9)
//! palette:  16 (modes 0/1) or 256 (mode 2) RGB triples
//! ```

use bytes::BufMut;
use serde::Serialize;

use crate::error::{MessageError, Result};
use crate::wire::WireReader;

/// Subpixel block per text cell in graphics modes.
pub const CELL_PIXEL_WIDTH: usize = 6;
pub const CELL_PIXEL_HEIGHT: usize = 9;

const MAX_RUN: usize = u8::MAX as usize;

/// Display mode of a terminal snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalMode {
    /// Character grid with a 16-color palette.
    #[default]
    Text,
    /// Subpixel graphics with a 16-color palette.
    Graphics16,
    /// Subpixel graphics with a 256-color palette.
    Graphics256,
}

impl TerminalMode {
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(TerminalMode::Text),
            1 => Ok(TerminalMode::Graphics16),
            2 => Ok(TerminalMode::Graphics256),
            other => Err(MessageError::InvalidTerminalMode(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TerminalMode::Text => 0,
            TerminalMode::Graphics16 => 1,
            TerminalMode::Graphics256 => 2,
        }
    }

    /// Palette entries carried by a snapshot in this mode.
    pub fn palette_len(self) -> usize {
        match self {
            TerminalMode::Graphics256 => 256,
            _ => 16,
        }
    }
}

/// One palette entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A complete, immutable terminal snapshot for one window.
///
/// Planes are row-major. `screen`/`colors` are filled in text mode, `pixels`
/// in graphics modes; the other planes are empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TerminalState {
    pub mode: TerminalMode,
    pub blink: bool,
    pub width: u16,
    pub height: u16,
    pub cursor_x: u16,
    pub cursor_y: u16,
    #[serde(skip)]
    pub screen: Vec<u8>,
    #[serde(skip)]
    pub colors: Vec<u8>,
    #[serde(skip)]
    pub pixels: Vec<u8>,
    pub palette: Vec<Rgb>,
}

impl TerminalState {
    /// Text cells covered by the snapshot.
    pub fn cell_count(&self) -> usize {
        usize::from(self.width) * usize::from(self.height)
    }

    /// Subpixels covered by the snapshot in graphics modes.
    pub fn pixel_count(&self) -> usize {
        self.cell_count() * CELL_PIXEL_WIDTH * CELL_PIXEL_HEIGHT
    }

    /// Character row `y` as bytes, text mode only.
    pub fn screen_row(&self, y: u16) -> Option<&[u8]> {
        row(&self.screen, self.width, y)
    }

    /// Color attribute row `y`, text mode only.
    pub fn color_row(&self, y: u16) -> Option<&[u8]> {
        row(&self.colors, self.width, y)
    }

    /// Decode the body that follows the type and window id bytes.
    pub fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let mode = TerminalMode::from_u8(r.u8()?)?;
        let blink = r.u8()? == 1;
        let width = r.u16()?;
        let height = r.u16()?;
        let cursor_x = r.u16()?;
        let cursor_y = r.u16()?;
        let _reserved = r.u32()?;

        let mut state = TerminalState {
            mode,
            blink,
            width,
            height,
            cursor_x,
            cursor_y,
            ..TerminalState::default()
        };

        let mut runs = RunDecoder::default();
        match mode {
            TerminalMode::Text => {
                let cells = state.cell_count();
                state.screen = runs.fill(r, cells)?;
                state.colors = runs.fill(r, cells)?;
            }
            TerminalMode::Graphics16 | TerminalMode::Graphics256 => {
                state.pixels = runs.fill(r, state.pixel_count())?;
            }
        }

        state.palette = (0..mode.palette_len())
            .map(|_| {
                Ok(Rgb {
                    r: r.u8()?,
                    g: r.u8()?,
                    b: r.u8()?,
                })
            })
            .collect::<Result<_>>()?;

        Ok(state)
    }

    /// Encode the body (without type and window id bytes).
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.mode.as_u8());
        dst.put_u8(u8::from(self.blink));
        dst.put_u16_le(self.width);
        dst.put_u16_le(self.height);
        dst.put_u16_le(self.cursor_x);
        dst.put_u16_le(self.cursor_y);
        dst.put_u32_le(0);
        match self.mode {
            TerminalMode::Text => {
                encode_plane(&self.screen, dst);
                encode_plane(&self.colors, dst);
            }
            TerminalMode::Graphics16 | TerminalMode::Graphics256 => {
                encode_plane(&self.pixels, dst);
            }
        }
        for entry in self.palette.iter().take(self.mode.palette_len()) {
            dst.put_slice(&[entry.r, entry.g, entry.b]);
        }
        for _ in self.palette.len()..self.mode.palette_len() {
            dst.put_slice(&[0, 0, 0]);
        }
    }
}

fn row(plane: &[u8], width: u16, y: u16) -> Option<&[u8]> {
    let width = usize::from(width);
    let start = usize::from(y) * width;
    plane.get(start..start + width)
}

/// Run state shared across consecutive planes.
///
/// A run left over at the end of one plane carries into the next, and the
/// next (value, count) pair is only read when more cells are needed.
#[derive(Debug, Default)]
struct RunDecoder {
    value: u8,
    remaining: usize,
}

impl RunDecoder {
    fn fill(&mut self, r: &mut WireReader<'_>, cells: usize) -> Result<Vec<u8>> {
        // Every pair covers at most 255 cells; refuse to allocate for a plane
        // the rest of the payload cannot possibly describe.
        let reachable = self.remaining + (r.remaining() / 2) * MAX_RUN;
        if cells > reachable {
            return Err(MessageError::Truncated {
                needed: (cells - self.remaining).div_ceil(MAX_RUN) * 2,
                remaining: r.remaining(),
            });
        }

        let mut out = Vec::with_capacity(cells);
        while out.len() < cells {
            if self.remaining == 0 {
                self.value = r.u8()?;
                self.remaining = usize::from(r.u8()?);
                if self.remaining == 0 {
                    return Err(MessageError::ZeroRunLength);
                }
            }
            let take = self.remaining.min(cells - out.len());
            out.resize(out.len() + take, self.value);
            self.remaining -= take;
        }
        Ok(out)
    }
}

/// Decode a single run-length plane of `cells` values.
pub fn decode_plane(bytes: &[u8], cells: usize) -> Result<Vec<u8>> {
    RunDecoder::default().fill(&mut WireReader::new(bytes), cells)
}

/// Run-length encode a plane as (value, count) pairs, runs capped at 255.
pub fn encode_plane(cells: &[u8], dst: &mut impl BufMut) {
    let mut iter = cells.iter().copied().peekable();
    while let Some(value) = iter.next() {
        let mut count = 1usize;
        while count < MAX_RUN && iter.peek() == Some(&value) {
            iter.next();
            count += 1;
        }
        dst.put_u8(value);
        dst.put_u8(count as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette16() -> Vec<Rgb> {
        (0..16u8)
            .map(|i| Rgb {
                r: i,
                g: i * 2,
                b: i * 3,
            })
            .collect()
    }

    #[test]
    fn rle_plane_expands_runs() {
        let plane = decode_plane(&[0x20, 0x03, 0x40, 0x02], 5).unwrap();
        assert_eq!(plane, vec![0x20, 0x20, 0x20, 0x40, 0x40]);
    }

    #[test]
    fn rle_zero_run_is_rejected() {
        assert!(matches!(
            decode_plane(&[0x20, 0x00], 1),
            Err(MessageError::ZeroRunLength)
        ));
    }

    #[test]
    fn rle_short_input_is_truncated() {
        assert!(matches!(
            decode_plane(&[0x20, 0x03], 4),
            Err(MessageError::Truncated { .. })
        ));
    }

    #[test]
    fn rle_refuses_oversized_planes_up_front() {
        let err = decode_plane(&[0x20, 0xFF], usize::MAX / 2).unwrap_err();
        assert!(matches!(err, MessageError::Truncated { .. }));
    }

    #[test]
    fn encode_plane_caps_runs() {
        let mut out = Vec::new();
        encode_plane(&vec![7u8; 300], &mut out);
        assert_eq!(out, vec![7, 255, 7, 45]);
    }

    #[test]
    fn text_mode_snapshot_decodes_both_planes() {
        let mut body = vec![0u8, 1];
        body.extend_from_slice(&3u16.to_le_bytes()); // width
        body.extend_from_slice(&2u16.to_le_bytes()); // height
        body.extend_from_slice(&1u16.to_le_bytes()); // cursor x
        body.extend_from_slice(&0u16.to_le_bytes()); // cursor y
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&[b'>', 1, b' ', 5]); // screen
        body.extend_from_slice(&[0xF0, 6]); // colors
        for entry in palette16() {
            body.extend_from_slice(&[entry.r, entry.g, entry.b]);
        }

        let mut r = WireReader::new(&body);
        let state = TerminalState::decode(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        assert_eq!(state.mode, TerminalMode::Text);
        assert!(state.blink);
        assert_eq!((state.width, state.height), (3, 2));
        assert_eq!((state.cursor_x, state.cursor_y), (1, 0));
        assert_eq!(state.screen_row(0), Some(&b">  "[..]));
        assert_eq!(state.screen_row(1), Some(&b"   "[..]));
        assert_eq!(state.colors, vec![0xF0; 6]);
        assert!(state.pixels.is_empty());
        assert_eq!(state.palette, palette16());
    }

    #[test]
    fn run_carries_from_screen_into_colors() {
        let mut body = vec![0u8, 0];
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        // One run of 4 covers both 2-cell planes.
        body.extend_from_slice(&[0x0F, 4]);
        body.extend(std::iter::repeat(0).take(16 * 3));

        let state = TerminalState::decode(&mut WireReader::new(&body)).unwrap();
        assert_eq!(state.screen, vec![0x0F, 0x0F]);
        assert_eq!(state.colors, vec![0x0F, 0x0F]);
    }

    #[test]
    fn graphics_snapshot_roundtrip() {
        let mut pixels = vec![0u8; 2 * 6 * 9];
        pixels[10] = 3;
        let state = TerminalState {
            mode: TerminalMode::Graphics256,
            blink: false,
            width: 2,
            height: 1,
            cursor_x: 0,
            cursor_y: 0,
            screen: Vec::new(),
            colors: Vec::new(),
            pixels,
            palette: vec![Rgb { r: 1, g: 2, b: 3 }; 256],
        };

        let mut body = Vec::new();
        state.encode(&mut body);
        let decoded = TerminalState::decode(&mut WireReader::new(&body)).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn invalid_mode_rejected() {
        let body = [9u8, 0, 0, 0];
        assert!(matches!(
            TerminalState::decode(&mut WireReader::new(&body)),
            Err(MessageError::InvalidTerminalMode(9))
        ));
    }
}
