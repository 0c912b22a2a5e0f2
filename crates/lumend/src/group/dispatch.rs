//! Command payload sanitization
//!
//! A composite command carries a caller-supplied JSON payload. Before the
//! group forwards it, the payload is reduced to the keys the service kind
//! actually accepts; anything else is dropped without complaint so typo'd
//! or unsupported keys never reach the downstream bus call.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::bus::BusError;
use crate::bus::ServiceData;
use crate::light::ServiceKind;
use crate::light::ATTR_BRIGHTNESS;
use crate::light::ATTR_BRIGHTNESS_PCT;
use crate::light::ATTR_COLOR_TEMP;
use crate::light::ATTR_EFFECT;
use crate::light::ATTR_ENTITY_ID;
use crate::light::ATTR_FLASH;
use crate::light::ATTR_PROFILE;
use crate::light::ATTR_RGB_COLOR;
use crate::light::ATTR_TRANSITION;
use crate::light::ATTR_WHITE_VALUE;
use crate::light::ATTR_XY_COLOR;

/// Payload keys `turn_on` forwards downstream.
const TURN_ON_DATA_KEYS: &[&str] = &[
    ATTR_BRIGHTNESS,
    ATTR_BRIGHTNESS_PCT,
    ATTR_COLOR_TEMP,
    ATTR_EFFECT,
    ATTR_FLASH,
    ATTR_PROFILE,
    ATTR_RGB_COLOR,
    ATTR_TRANSITION,
    ATTR_WHITE_VALUE,
    ATTR_XY_COLOR,
];

/// Payload keys `turn_off` forwards downstream.
const TURN_OFF_DATA_KEYS: &[&str] = &[ATTR_TRANSITION, ATTR_FLASH];

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unrecognized light service '{0}'")]
    InvalidKind(String),

    #[error("group '{0}' is no longer running")]
    Closed(String),

    #[error(transparent)]
    Downstream(#[from] BusError),
}

fn allowed_data_keys(kind: ServiceKind) -> &'static [&'static str] {
    match kind {
        ServiceKind::TurnOn => TURN_ON_DATA_KEYS,
        ServiceKind::TurnOff => TURN_OFF_DATA_KEYS,
        // Toggle carries no attribute payload; it is resolved into an
        // explicit turn_on/turn_off before it reaches a dispatcher.
        ServiceKind::Toggle => &[],
    }
}

/// Copy of `data` holding only the keys allowed for `kind`.
pub fn filter_service_data(kind: ServiceKind, data: &ServiceData) -> ServiceData {
    let allowed = allowed_data_keys(kind);
    let mut filtered = ServiceData::new();
    for (key, value) in data {
        if allowed.contains(&key.as_str()) {
            filtered.insert(key.clone(), value.clone());
        } else {
            debug!("dispatch: discarding key '{}' from {}", key, kind);
        }
    }
    filtered
}

/// Downstream payload for one group call: the filtered attributes plus the
/// member list under the reserved routing key.
pub fn build_service_data(
    kind: ServiceKind,
    data: &ServiceData,
    member_ids: &[String],
) -> ServiceData {
    let mut payload = filter_service_data(kind, data);
    payload.insert(ATTR_ENTITY_ID.to_string(), Value::from(member_ids.to_vec()));
    payload
}
