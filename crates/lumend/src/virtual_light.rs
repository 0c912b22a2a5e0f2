//! Virtual light entities
//!
//! A virtual light is an in-process member entity driven entirely through
//! the service bus: it applies the payload keys its feature set supports
//! and publishes the resulting state to the store. Groups built over
//! virtual lights exercise the full dispatch/recompute cycle without any
//! physical hardware behind them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::bus::ServiceData;
use crate::bus::ServiceHandler;
use crate::light::EntityState;
use crate::light::LightAttributes;
use crate::light::PowerState;
use crate::light::ServiceKind;
use crate::light::ATTR_BRIGHTNESS;
use crate::light::ATTR_BRIGHTNESS_PCT;
use crate::light::ATTR_COLOR_TEMP;
use crate::light::ATTR_EFFECT;
use crate::light::ATTR_RGB_COLOR;
use crate::light::ATTR_WHITE_VALUE;
use crate::light::ATTR_XY_COLOR;
use crate::light::SUPPORT_BRIGHTNESS;
use crate::light::SUPPORT_COLOR_TEMP;
use crate::light::SUPPORT_EFFECT;
use crate::light::SUPPORT_RGB_COLOR;
use crate::light::SUPPORT_WHITE_VALUE;
use crate::light::SUPPORT_XY_COLOR;
use crate::store::StateStore;

/// A bus-driven light entity backed only by the state store.
pub struct VirtualLight {
    entity_id: String,
    supported_features: u32,
    store: Arc<StateStore>,
}

impl VirtualLight {
    /// Create the light and publish its initial state: off, advertising
    /// `supported_features` and the configured effect list.
    pub fn new(
        entity_id: impl Into<String>,
        supported_features: u32,
        effect_list: Option<Vec<String>>,
        store: Arc<StateStore>,
    ) -> Self {
        let entity_id = entity_id.into();
        let attributes = LightAttributes {
            supported_features: Some(supported_features),
            effect_list,
            ..Default::default()
        };
        store.set(
            &entity_id,
            EntityState::with_attributes(PowerState::Off, attributes),
        );
        Self {
            entity_id,
            supported_features,
            store,
        }
    }

    fn supports(&self, feature: u32) -> bool {
        self.supported_features & feature != 0
    }

    fn current(&self) -> EntityState {
        self.store.get(&self.entity_id).unwrap_or_default()
    }

    /// Turn on, applying every supported payload key. Keys the light does
    /// not support are left alone; out-of-range values are ignored.
    fn turn_on(&self, data: &ServiceData) {
        let mut state = self.current();
        state.power = PowerState::On;

        let attrs = &mut state.attributes;
        if self.supports(SUPPORT_BRIGHTNESS) {
            if let Some(v) = u8_value(data, ATTR_BRIGHTNESS) {
                attrs.brightness = Some(v);
            } else if let Some(pct) = u8_value(data, ATTR_BRIGHTNESS_PCT) {
                attrs.brightness = Some(pct_to_brightness(pct));
            }
        }
        if self.supports(SUPPORT_COLOR_TEMP) {
            if let Some(v) = u32_value(data, ATTR_COLOR_TEMP) {
                attrs.color_temp = Some(v);
            }
        }
        if self.supports(SUPPORT_WHITE_VALUE) {
            if let Some(v) = u8_value(data, ATTR_WHITE_VALUE) {
                attrs.white_value = Some(v);
            }
        }
        if self.supports(SUPPORT_XY_COLOR) {
            if let Some(v) = xy_value(data) {
                attrs.xy_color = Some(v);
            }
        }
        if self.supports(SUPPORT_RGB_COLOR) {
            if let Some(v) = rgb_value(data) {
                attrs.rgb_color = Some(v);
            }
        }
        if self.supports(SUPPORT_EFFECT) {
            if let Some(v) = data.get(ATTR_EFFECT).and_then(Value::as_str) {
                attrs.effect = Some(v.to_string());
            }
        }

        debug!("virtual light {}: on", self.entity_id);
        self.store.set(&self.entity_id, state);
    }

    /// Turn off. Attributes stay as they were, matching real lights that
    /// keep reporting their last levels while off.
    fn turn_off(&self) {
        let mut state = self.current();
        state.power = PowerState::Off;
        debug!("virtual light {}: off", self.entity_id);
        self.store.set(&self.entity_id, state);
    }
}

#[async_trait]
impl ServiceHandler for VirtualLight {
    async fn handle_service(&self, service: &str, data: &ServiceData) -> anyhow::Result<()> {
        let kind: ServiceKind = service
            .parse()
            .map_err(|_| anyhow::anyhow!("unrecognized light service '{}'", service))?;
        match kind {
            ServiceKind::TurnOn => self.turn_on(data),
            ServiceKind::TurnOff => self.turn_off(),
            ServiceKind::Toggle => {
                if self.current().power == PowerState::On {
                    self.turn_off();
                } else {
                    self.turn_on(data);
                }
            }
        }
        Ok(())
    }
}

/// 0-100 percentage to a 0-255 level, rounding to nearest.
fn pct_to_brightness(pct: u8) -> u8 {
    let pct = u32::from(pct.min(100));
    ((pct * 255 + 50) / 100) as u8
}

fn u8_value(data: &ServiceData, key: &str) -> Option<u8> {
    data.get(key)?.as_u64().and_then(|v| u8::try_from(v).ok())
}

fn u32_value(data: &ServiceData, key: &str) -> Option<u32> {
    data.get(key)?.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn xy_value(data: &ServiceData) -> Option<(f64, f64)> {
    let list = data.get(ATTR_XY_COLOR)?.as_array()?;
    if list.len() != 2 {
        return None;
    }
    Some((list[0].as_f64()?, list[1].as_f64()?))
}

fn rgb_value(data: &ServiceData) -> Option<(u8, u8, u8)> {
    let list = data.get(ATTR_RGB_COLOR)?.as_array()?;
    if list.len() != 3 {
        return None;
    }
    let channel = |value: &Value| value.as_u64().and_then(|v| u8::try_from(v).ok());
    Some((channel(&list[0])?, channel(&list[1])?, channel(&list[2])?))
}
