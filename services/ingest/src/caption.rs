//! Two-layer "LGTM" caption drawn from the `font8x8` bitmap face.
//!
//! Glyphs are 8x8 cells scaled by nearest-neighbour sampling, so a layer's
//! `size` is its rendered line height in pixels and `stretch` widens each
//! cell horizontally. Text is always white and only lit glyph pixels are
//! written; everything else on the canvas is left untouched.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgba, RgbaImage};

const GLYPH_CELLS: usize = 8;
const CAPTION_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
/// Horizontal offset, in glyph cells, of the second strike used for bold
const BOLD_OFFSET: f32 = 0.35;

/// One line of caption text with fixed presentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptionLayer {
    pub text: &'static str,
    /// Line height in pixels
    pub size: f32,
    /// Horizontal stretch factor applied to every glyph cell
    pub stretch: f32,
    pub bold: bool,
    /// Vertical centre of the line on the canvas
    pub center_y: f32,
}

/// Title and subtitle drawn on every processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptionLayout {
    pub title: CaptionLayer,
    pub subtitle: CaptionLayer,
}

/// Layout for the 800x600 still canvas.
pub const STILL_CAPTION: CaptionLayout = CaptionLayout {
    title: CaptionLayer {
        text: "LGTM",
        size: 160.0,
        stretch: 1.0,
        bold: true,
        center_y: 260.0,
    },
    subtitle: CaptionLayer {
        text: "Looks Great To Me",
        size: 36.0,
        stretch: 1.25,
        bold: false,
        center_y: 410.0,
    },
};

/// Layout for the 400x300 animated canvas, half the still sizes.
pub const ANIMATED_CAPTION: CaptionLayout = CaptionLayout {
    title: CaptionLayer {
        text: "LGTM",
        size: 80.0,
        stretch: 1.0,
        bold: true,
        center_y: 130.0,
    },
    subtitle: CaptionLayer {
        text: "Looks Great To Me",
        size: 18.0,
        stretch: 1.25,
        bold: false,
        center_y: 205.0,
    },
};

impl CaptionLayout {
    pub fn draw(&self, canvas: &mut RgbaImage) {
        self.title.draw(canvas);
        self.subtitle.draw(canvas);
    }
}

impl CaptionLayer {
    fn cell_width(&self) -> f32 {
        self.size * self.stretch
    }

    /// Rendered width in pixels.
    pub fn width(&self) -> f32 {
        self.text.chars().count() as f32 * self.cell_width()
    }

    /// Pixel rows `[top, bottom)` covered by the line.
    pub fn rows(&self) -> (u32, u32) {
        let top = (self.center_y - self.size / 2.0).max(0.0);
        let bottom = (self.center_y + self.size / 2.0).max(0.0);
        (top.floor() as u32, bottom.ceil() as u32)
    }

    /// Draw the line horizontally centred on the canvas.
    pub fn draw(&self, canvas: &mut RgbaImage) {
        let glyphs: Vec<[u8; 8]> = self
            .text
            .chars()
            .map(|c| BASIC_FONTS.get(c).unwrap_or([0; 8]))
            .collect();
        if glyphs.is_empty() {
            return;
        }

        let (canvas_width, canvas_height) = canvas.dimensions();
        let cell_width = self.cell_width();
        let left = (canvas_width as f32 - self.width()) / 2.0;
        let top = self.center_y - self.size / 2.0;

        let (row_start, row_end) = self.rows();
        let col_start = left.max(0.0).floor() as u32;
        let col_end = ((left + self.width()).ceil().max(0.0) as u32).min(canvas_width);

        for y in row_start..row_end.min(canvas_height) {
            let v = (y as f32 + 0.5 - top) / self.size * GLYPH_CELLS as f32;
            if v < 0.0 || v >= GLYPH_CELLS as f32 {
                continue;
            }
            let glyph_row = v as usize;

            for x in col_start..col_end {
                let u = (x as f32 + 0.5 - left) / cell_width;
                if u < 0.0 {
                    continue;
                }
                let index = u as usize;
                let Some(glyph) = glyphs.get(index) else {
                    continue;
                };
                let cell = (u - index as f32) * GLYPH_CELLS as f32;

                let lit = is_lit(glyph, glyph_row, cell)
                    || (self.bold && is_lit(glyph, glyph_row, cell - BOLD_OFFSET));
                if lit {
                    canvas.put_pixel(x, y, CAPTION_COLOR);
                }
            }
        }
    }
}

/// Bit 0 of each glyph row is the leftmost pixel.
fn is_lit(glyph: &[u8; 8], row: usize, cell: f32) -> bool {
    if cell < 0.0 {
        return false;
    }
    let column = cell as usize;
    column < GLYPH_CELLS && glyph[row] & (1 << column) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_rows(canvas: &RgbaImage) -> Vec<u32> {
        (0..canvas.height())
            .filter(|&y| (0..canvas.width()).any(|x| *canvas.get_pixel(x, y) == CAPTION_COLOR))
            .collect()
    }

    #[test]
    fn test_layouts_fit_their_canvas() {
        let canvases = [(STILL_CAPTION, 800.0, 600), (ANIMATED_CAPTION, 400.0, 300)];
        for (layout, width, height) in canvases {
            for layer in [layout.title, layout.subtitle] {
                assert!(layer.width() <= width, "{} too wide", layer.text);
                assert!(layer.rows().1 <= height);
            }
            assert!(layout.title.size > layout.subtitle.size);
            assert!(layout.title.rows().1 <= layout.subtitle.rows().0);
        }
    }

    #[test]
    fn test_animated_layout_is_half_size() {
        assert_eq!(ANIMATED_CAPTION.title.size * 2.0, STILL_CAPTION.title.size);
        assert_eq!(ANIMATED_CAPTION.subtitle.size * 2.0, STILL_CAPTION.subtitle.size);
    }

    #[test]
    fn test_draw_only_touches_caption_rows() {
        let background = Rgba([10, 20, 30, 255]);
        let mut canvas = RgbaImage::from_pixel(800, 600, background);
        STILL_CAPTION.draw(&mut canvas);

        let (title_top, title_bottom) = STILL_CAPTION.title.rows();
        let (sub_top, sub_bottom) = STILL_CAPTION.subtitle.rows();
        let rows = white_rows(&canvas);

        assert!(rows.iter().any(|&y| y >= title_top && y < title_bottom));
        assert!(rows.iter().any(|&y| y >= sub_top && y < sub_bottom));
        assert!(rows
            .iter()
            .all(|&y| (y >= title_top && y < title_bottom) || (y >= sub_top && y < sub_bottom)));

        for pixel in canvas.pixels() {
            assert!(*pixel == background || *pixel == CAPTION_COLOR);
        }
        assert_eq!(*canvas.get_pixel(0, 0), background);
        assert_eq!(*canvas.get_pixel(799, 599), background);
    }

    #[test]
    fn test_bold_strike_lights_more_pixels() {
        let count = |layer: CaptionLayer| {
            let mut canvas = RgbaImage::new(800, 600);
            layer.draw(&mut canvas);
            canvas.pixels().filter(|p| **p == CAPTION_COLOR).count()
        };

        let bold = STILL_CAPTION.title;
        let regular = CaptionLayer {
            bold: false,
            ..bold
        };
        assert!(count(bold) > count(regular));
    }

    #[test]
    fn test_space_is_blank() {
        let mut canvas = RgbaImage::new(100, 100);
        CaptionLayer {
            text: "   ",
            size: 20.0,
            stretch: 1.0,
            bold: true,
            center_y: 50.0,
        }
        .draw(&mut canvas);
        assert!(canvas.pixels().all(|p| p[3] == 0));
    }
}
