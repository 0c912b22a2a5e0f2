//! Light domain model for lumend
//!
//! Shared vocabulary for every light entity the daemon handles: power
//! states, the typed attribute set, feature flags, and the service names
//! understood by the `light` domain.

use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// Service domain all lumend entities live in.
pub const LIGHT_DOMAIN: &str = "light";

/// Reserved service-data key naming the target entities of a call.
pub const ATTR_ENTITY_ID: &str = "entity_id";

pub const ATTR_BRIGHTNESS: &str = "brightness";
pub const ATTR_BRIGHTNESS_PCT: &str = "brightness_pct";
pub const ATTR_COLOR_TEMP: &str = "color_temp";
pub const ATTR_EFFECT: &str = "effect";
pub const ATTR_EFFECT_LIST: &str = "effect_list";
pub const ATTR_FLASH: &str = "flash";
pub const ATTR_PROFILE: &str = "profile";
pub const ATTR_RGB_COLOR: &str = "rgb_color";
pub const ATTR_TRANSITION: &str = "transition";
pub const ATTR_WHITE_VALUE: &str = "white_value";
pub const ATTR_XY_COLOR: &str = "xy_color";

/// Feature bits a light may advertise through `supported_features`.
pub const SUPPORT_BRIGHTNESS: u32 = 1;
pub const SUPPORT_COLOR_TEMP: u32 = 2;
pub const SUPPORT_EFFECT: u32 = 4;
pub const SUPPORT_FLASH: u32 = 8;
pub const SUPPORT_RGB_COLOR: u32 = 16;
pub const SUPPORT_TRANSITION: u32 = 32;
pub const SUPPORT_XY_COLOR: u32 = 64;
pub const SUPPORT_WHITE_VALUE: u32 = 128;

/// Entity id for a light object id, e.g. `bedroom` -> `light.bedroom`.
pub fn light_entity_id(object_id: &str) -> String {
    format!("{}.{}", LIGHT_DOMAIN, object_id)
}

/// Power state reported by a light entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    /// The entity exists but cannot currently be reached.
    Unavailable,
    /// The entity has never reported, or its last report was indeterminate.
    #[default]
    Unknown,
}

/// Services a light entity responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ServiceKind {
    TurnOn,
    TurnOff,
    Toggle,
}

/// Attribute set carried by a light state.
///
/// Every field is optional: an attribute a light does not report is absent,
/// not zeroed, and stays absent through serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LightAttributes {
    /// Brightness level (0-255).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,

    /// CIE 1931 chromaticity coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xy_color: Option<(f64, f64)>,

    /// Red/green/blue channels (0-255 each).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rgb_color: Option<(u8, u8, u8)>,

    /// White channel level (0-255).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_value: Option<u8>,

    /// Color temperature in mireds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u32>,

    /// Coldest supported color temperature in mireds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_mireds: Option<u32>,

    /// Warmest supported color temperature in mireds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mireds: Option<u32>,

    /// Names of the effects the light can run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect_list: Option<Vec<String>>,

    /// Effect currently running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,

    /// Bitmask of `SUPPORT_*` feature flags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_features: Option<u32>,
}

/// Full state of a light entity: its power state plus attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    #[serde(rename = "state")]
    pub power: PowerState,

    #[serde(default)]
    pub attributes: LightAttributes,
}

impl EntityState {
    pub fn new(power: PowerState) -> Self {
        Self {
            power,
            attributes: LightAttributes::default(),
        }
    }

    pub fn with_attributes(power: PowerState, attributes: LightAttributes) -> Self {
        Self { power, attributes }
    }
}
