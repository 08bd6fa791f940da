use embedded_graphics::mono_font::ascii::{
    FONT_10X20, FONT_4X6, FONT_5X7, FONT_5X8, FONT_6X10, FONT_6X12, FONT_6X13, FONT_6X9,
    FONT_7X13, FONT_7X14, FONT_8X13, FONT_9X15, FONT_9X18,
};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::RgbColor;
use std::borrow::Cow;

pub const DEFAULT_FONT_SIZE: u32 = 15;
pub const LEFT_MARGIN: i32 = 20;
pub const BOTTOM_MARGIN: i32 = 10;
pub const LINE_SPACING: f32 = 1.2;

/// Built-in fonts ordered by cell height.
static FONTS: [&MonoFont<'static>; 13] = [
    &FONT_4X6,
    &FONT_5X7,
    &FONT_5X8,
    &FONT_6X9,
    &FONT_6X10,
    &FONT_6X12,
    &FONT_6X13,
    &FONT_7X13,
    &FONT_7X14,
    &FONT_8X13,
    &FONT_9X15,
    &FONT_9X18,
    &FONT_10X20,
];

/// Largest built-in font whose cell is at most `size` pixels tall (the smallest font when
/// none is). Ties go to the wider font.
pub fn font_for_size(size: u32) -> &'static MonoFont<'static> {
    FONTS
        .iter()
        .copied()
        .filter(|font| font.character_size.height <= size)
        .max_by_key(|font| (font.character_size.height, font.character_size.width))
        .unwrap_or(FONTS[0])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontMetrics {
    /// Pixels from the top of a cell to the baseline.
    pub ascent: i32,
    /// Pixels from the baseline to the bottom of a cell.
    pub descent: i32,
    /// Horizontal distance between adjacent glyph origins.
    pub advance: i32,
    pub line_height: i32,
}

/// Font, colours and margins used to lay out the rolling text.
#[derive(Clone, Copy)]
pub struct TextLayout {
    pub font: &'static MonoFont<'static>,
    pub foreground: Rgb888,
    pub background: Rgb888,
    pub left_margin: i32,
    pub bottom_margin: i32,
    pub line_spacing: f32,
}

impl TextLayout {
    pub fn for_font_size(size: u32) -> Self {
        Self {
            font: font_for_size(size),
            foreground: Rgb888::WHITE,
            background: Rgb888::BLACK,
            left_margin: LEFT_MARGIN,
            bottom_margin: BOTTOM_MARGIN,
            line_spacing: LINE_SPACING,
        }
    }

    pub fn metrics(&self) -> FontMetrics {
        let cell = self.font.character_size;
        let ascent = self.font.baseline as i32;
        let descent = cell.height as i32 - ascent;
        let line_height = (((ascent + descent) as f32) * self.line_spacing).round() as i32;
        FontMetrics {
            ascent,
            descent,
            advance: (cell.width + self.font.character_spacing) as i32,
            line_height: line_height.max(1),
        }
    }

    pub fn text_style(&self) -> MonoTextStyle<'static, Rgb888> {
        MonoTextStyle::new(self.font, self.foreground)
    }

    /// Baseline of the newest (bottom) row on a surface `height` pixels tall.
    pub fn first_baseline(&self, height: u32) -> i32 {
        pixels(height)
            .saturating_sub(self.bottom_margin)
            .saturating_sub(self.metrics().descent)
    }

    /// A row is drawn only when its whole cell lies below the top edge.
    pub fn row_fits(&self, baseline: i32) -> bool {
        baseline - self.metrics().ascent >= 0
    }

    /// Whole character cells that fit between the left margin and the right edge.
    pub fn columns(&self, width: u32) -> usize {
        let usable = pixels(width).saturating_sub(self.left_margin);
        if usable <= 0 {
            return 0;
        }
        (usable / self.metrics().advance.max(1)) as usize
    }

    /// Number of rows a surface `height` pixels tall can show.
    pub fn visible_rows(&self, height: u32) -> usize {
        let metrics = self.metrics();
        let first = self.first_baseline(height);
        if !self.row_fits(first) {
            return 0;
        }
        ((first - metrics.ascent) / metrics.line_height) as usize + 1
    }
}

// Surface sizes past i32::MAX clamp instead of wrapping negative.
fn pixels(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl Default for TextLayout {
    fn default() -> Self {
        Self::for_font_size(DEFAULT_FONT_SIZE)
    }
}

impl std::fmt::Debug for TextLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.font.character_size;
        f.debug_struct("TextLayout")
            .field("font", &format_args!("{}x{}", cell.width, cell.height))
            .field("foreground", &self.foreground)
            .field("background", &self.background)
            .field("left_margin", &self.left_margin)
            .field("bottom_margin", &self.bottom_margin)
            .field("line_spacing", &self.line_spacing)
            .finish()
    }
}

/// Clip `text` to `columns` cells. Control characters occupy one blank cell.
pub fn fit_to_columns(text: &str, columns: usize) -> Cow<'_, str> {
    let needs_clean = text.chars().any(char::is_control);
    let fits = text.chars().count() <= columns;
    if fits && !needs_clean {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .take(columns)
            .map(|ch| if ch.is_control() { ' ' } else { ch })
            .collect(),
    )
}
