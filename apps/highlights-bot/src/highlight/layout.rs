//! Card dimensions and font size as a function of text length.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    pub initial_width: u32,
    pub initial_height: u32,
    pub min_font_size: u32,
    pub max_font_size: u32,
    pub chars_for_max_font: u32,
    pub chars_for_min_font: u32,
    pub padding: u32,
    pub base_text_length_for_height_scaling: u32,
    pub height_scale_factor: u32,
    pub base_text_length_for_width_scaling: u32,
    pub width_scale_threshold: u32,
    pub width_scale_factor: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            initial_width: 603,
            initial_height: 603,
            min_font_size: 28,
            max_font_size: 55,
            chars_for_max_font: 150,
            chars_for_min_font: 888,
            padding: 33,
            base_text_length_for_height_scaling: 90,
            height_scale_factor: 88,
            base_text_length_for_width_scaling: 290,
            width_scale_threshold: 290,
            width_scale_factor: 33,
            max_width: 1500,
            max_height: 2000,
        }
    }
}

impl LayoutConfig {
    /// Restores the ordering the layout relies on (`min <= max` pairs, maxima
    /// at or above the initial size) after field-by-field overrides.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.min_font_size > self.max_font_size {
            std::mem::swap(&mut self.min_font_size, &mut self.max_font_size);
        }
        if self.chars_for_max_font > self.chars_for_min_font {
            std::mem::swap(&mut self.chars_for_max_font, &mut self.chars_for_min_font);
        }
        self.max_width = self.max_width.max(self.initial_width);
        self.max_height = self.max_height.max(self.initial_height);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub card_width: u32,
    pub card_height: u32,
    pub font_size: u32,
}

/// Length is measured in chars.
pub fn calculate_layout(text: &str, config: &LayoutConfig) -> Layout {
    layout_for_length(text.chars().count(), config)
}

pub fn layout_for_length(length: usize, config: &LayoutConfig) -> Layout {
    let length = length as f64;

    let font_size = if length <= f64::from(config.chars_for_max_font) {
        config.max_font_size
    } else if length >= f64::from(config.chars_for_min_font) {
        config.min_font_size
    } else {
        let font_range = f64::from(config.max_font_size) - f64::from(config.min_font_size);
        let char_range = f64::from(config.chars_for_min_font) - f64::from(config.chars_for_max_font);
        let interpolated = f64::from(config.max_font_size)
            - ((length - f64::from(config.chars_for_max_font)) / char_range) * font_range;
        clamp_round(interpolated, config.min_font_size, config.max_font_size)
    };

    let mut card_height = config.initial_height;
    let height_base = f64::from(config.base_text_length_for_height_scaling);
    if length > height_base {
        let extra = log_growth(length, height_base) * f64::from(config.height_scale_factor);
        card_height = clamp_round(
            f64::from(config.initial_height) + extra,
            config.initial_height,
            config.max_height,
        );
    }

    let mut card_width = config.initial_width;
    let width_base = f64::from(config.base_text_length_for_width_scaling);
    if length >= f64::from(config.width_scale_threshold) && length > width_base {
        let extra = log_growth(length, width_base) * f64::from(config.width_scale_factor);
        card_width = clamp_round(
            f64::from(config.initial_width) + extra,
            config.initial_width,
            config.max_width,
        );
    }

    Layout {
        card_width: card_width.min(config.max_width).max(config.initial_width),
        card_height: card_height.min(config.max_height).max(config.initial_height),
        font_size,
    }
}

/// Font weight for the body text: lighter for long passages.
pub fn body_font_weight(text: &str) -> u16 {
    if text.chars().count() >= 100 { 400 } else { 500 }
}

fn log_growth(length: f64, base: f64) -> f64 {
    (length - base + 1.0).max(1.0).ln()
}

fn clamp_round(value: f64, min: u32, max: u32) -> u32 {
    value.round().clamp(f64::from(min), f64::from(max.max(min))) as u32
}
