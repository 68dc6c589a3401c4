use std::{
    env,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
};

use thiserror::Error;

use crate::highlight::LayoutConfig;
use crate::identity::UserId;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub bot_token: String,
    pub bot_secret: String,
    pub owner_id: Option<UserId>,
    pub db_url: Option<String>,
    pub telegram_api_base_url: String,
    pub telegram_timeout_ms: u64,
    pub render_url: Option<String>,
    pub font_dir: PathBuf,
    pub max_donation_stars: u32,
    pub support_contact: String,
    pub layout: LayoutConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid HIGHLIGHTS_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid BOT_OWNER_ID: {0}")]
    InvalidOwnerId(String),
    #[error("invalid {key}: {reason}")]
    InvalidNumber { key: String, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bot_token = non_empty(&lookup, "BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;
        let bot_secret =
            non_empty(&lookup, "BOT_SECRET").ok_or(ConfigError::Missing("BOT_SECRET"))?;
        let bind_addr = non_empty(&lookup, "HIGHLIGHTS_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()?;
        let owner_id = non_empty(&lookup, "BOT_OWNER_ID")
            .map(|raw| {
                raw.parse::<UserId>()
                    .map_err(|error| ConfigError::InvalidOwnerId(error.to_string()))
            })
            .transpose()?;
        let db_url = non_empty(&lookup, "DB_URL").or_else(|| non_empty(&lookup, "DATABASE_URL"));
        let telegram_api_base_url = non_empty(&lookup, "TELEGRAM_API_BASE_URL")
            .unwrap_or_else(|| "https://api.telegram.org".to_string());
        let telegram_timeout_ms =
            parse_u64_env_lookup(&lookup, "TELEGRAM_TIMEOUT_MS", 10_000, 250, 60_000)?;
        let render_url = non_empty(&lookup, "HIGHLIGHTS_RENDER_URL");
        let font_dir = non_empty(&lookup, "HIGHLIGHTS_FONT_DIR")
            .map_or_else(|| PathBuf::from("./fonts/lora"), PathBuf::from);
        let max_donation_stars = parse_u32_env_lookup(
            &lookup,
            "HIGHLIGHTS_MAX_DONATION_STARS",
            10_000,
            1,
            1_000_000,
        )?;
        let support_contact = non_empty(&lookup, "HIGHLIGHTS_SUPPORT_CONTACT")
            .unwrap_or_else(|| "@mikxyas".to_string());
        let layout = parse_layout_from_env(&lookup)?;

        Ok(Self {
            bind_addr,
            bot_token,
            bot_secret,
            owner_id,
            db_url,
            telegram_api_base_url,
            telegram_timeout_ms,
            render_url,
            font_dir,
            max_donation_stars,
            support_contact,
            layout,
        })
    }
}

fn parse_layout_from_env(
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<LayoutConfig, ConfigError> {
    let defaults = LayoutConfig::default();
    let dimension = |key: &str, default: u32| parse_u32_env_lookup(lookup, key, default, 100, 4_000);
    let font = |key: &str, default: u32| parse_u32_env_lookup(lookup, key, default, 8, 200);
    let chars = |key: &str, default: u32| parse_u32_env_lookup(lookup, key, default, 0, 100_000);
    let factor = |key: &str, default: u32| parse_u32_env_lookup(lookup, key, default, 0, 1_000);

    Ok(LayoutConfig {
        initial_width: dimension("HIGHLIGHTS_LAYOUT_INITIAL_WIDTH", defaults.initial_width)?,
        initial_height: dimension("HIGHLIGHTS_LAYOUT_INITIAL_HEIGHT", defaults.initial_height)?,
        min_font_size: font("HIGHLIGHTS_LAYOUT_MIN_FONT_SIZE", defaults.min_font_size)?,
        max_font_size: font("HIGHLIGHTS_LAYOUT_MAX_FONT_SIZE", defaults.max_font_size)?,
        chars_for_max_font: chars("HIGHLIGHTS_LAYOUT_CHARS_FOR_MAX_FONT", defaults.chars_for_max_font)?,
        chars_for_min_font: chars("HIGHLIGHTS_LAYOUT_CHARS_FOR_MIN_FONT", defaults.chars_for_min_font)?,
        padding: parse_u32_env_lookup(lookup, "HIGHLIGHTS_LAYOUT_PADDING", defaults.padding, 0, 500)?,
        base_text_length_for_height_scaling: chars(
            "HIGHLIGHTS_LAYOUT_BASE_TEXT_LENGTH_FOR_HEIGHT_SCALING",
            defaults.base_text_length_for_height_scaling,
        )?,
        height_scale_factor: factor(
            "HIGHLIGHTS_LAYOUT_HEIGHT_SCALE_FACTOR",
            defaults.height_scale_factor,
        )?,
        base_text_length_for_width_scaling: chars(
            "HIGHLIGHTS_LAYOUT_BASE_TEXT_LENGTH_FOR_WIDTH_SCALING",
            defaults.base_text_length_for_width_scaling,
        )?,
        width_scale_threshold: chars(
            "HIGHLIGHTS_LAYOUT_WIDTH_SCALE_THRESHOLD",
            defaults.width_scale_threshold,
        )?,
        width_scale_factor: factor(
            "HIGHLIGHTS_LAYOUT_WIDTH_SCALE_FACTOR",
            defaults.width_scale_factor,
        )?,
        max_width: dimension("HIGHLIGHTS_LAYOUT_MAX_WIDTH", defaults.max_width)?,
        max_height: dimension("HIGHLIGHTS_LAYOUT_MAX_HEIGHT", defaults.max_height)?,
    }
    .normalized())
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u32_env_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ConfigError> {
    parse_with_lookup(lookup, key, default, |raw| {
        raw.parse::<u32>()
            .map_err(|error| invalid_number(key, &error))
            .map(|value| value.clamp(min, max))
    })
}

fn parse_u64_env_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    parse_with_lookup(lookup, key, default, |raw| {
        raw.parse::<u64>()
            .map_err(|error| invalid_number(key, &error))
            .map(|value| value.clamp(min, max))
    })
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match non_empty(lookup, key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

fn invalid_number(key: &str, error: &std::num::ParseIntError) -> ConfigError {
    ConfigError::InvalidNumber {
        key: key.to_string(),
        reason: error.to_string(),
    }
}
