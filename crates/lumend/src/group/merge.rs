//! Composite state derivation
//!
//! Pure functions folding the current member snapshots of a group into one
//! composite [`EntityState`]. Each attribute has its own gating rule (which
//! members are allowed to contribute) and its own merge rule; both are
//! evaluated against a single point-in-time snapshot, so recomputing twice
//! over the same snapshot always yields the same composite.

use crate::light::EntityState;
use crate::light::LightAttributes;
use crate::light::PowerState;
use crate::light::SUPPORT_BRIGHTNESS;
use crate::light::SUPPORT_COLOR_TEMP;
use crate::light::SUPPORT_EFFECT;
use crate::light::SUPPORT_FLASH;
use crate::light::SUPPORT_RGB_COLOR;
use crate::light::SUPPORT_TRANSITION;
use crate::light::SUPPORT_WHITE_VALUE;
use crate::light::SUPPORT_XY_COLOR;
use crate::store::StoreSnapshot;

/// Feature bits a composite light can represent. Member bits outside this
/// mask are dropped from the aggregated `supported_features`.
pub const GROUP_SUPPORTED_FEATURES: u32 = SUPPORT_BRIGHTNESS
    | SUPPORT_COLOR_TEMP
    | SUPPORT_EFFECT
    | SUPPORT_FLASH
    | SUPPORT_RGB_COLOR
    | SUPPORT_TRANSITION
    | SUPPORT_XY_COLOR
    | SUPPORT_WHITE_VALUE;

/// Derive the composite state of a group from `snapshot`.
///
/// Members without a snapshot entry contribute nothing. The walk follows
/// the configured member order, which pins down the tie-break for the
/// `effect` mode and the ordering of the merged `effect_list`; every other
/// rule is commutative, so supplying snapshots in a different order cannot
/// change the result.
pub fn merge_composite(member_ids: &[String], snapshot: &StoreSnapshot) -> EntityState {
    let states: Vec<&EntityState> = member_ids
        .iter()
        .filter_map(|id| snapshot.get(id))
        .collect();

    let power = merge_power(&states);
    if power == PowerState::Unavailable {
        // Declared empty state: no attributes, no capabilities.
        return EntityState::with_attributes(
            power,
            LightAttributes {
                supported_features: Some(0),
                ..Default::default()
            },
        );
    }

    let on_states: Vec<&EntityState> = states
        .iter()
        .copied()
        .filter(|state| state.power == PowerState::On)
        .collect();

    let attributes = LightAttributes {
        // Level-style attributes average over the members that are actually
        // on; an off member keeps its last level but must not drag the mean
        // down.
        brightness: mean_u32(reported(&on_states, |a| a.brightness.map(u32::from)))
            .map(|v| v as u8),
        white_value: mean_u32(reported(&on_states, |a| a.white_value.map(u32::from)))
            .map(|v| v as u8),
        color_temp: mean_u32(reported(&on_states, |a| a.color_temp)),
        xy_color: mean_xy(reported(&on_states, |a| a.xy_color)),
        rgb_color: mean_rgb(reported(&on_states, |a| a.rgb_color)),
        effect: most_common(reported(&on_states, |a| a.effect.as_ref())),

        // Capability-style attributes aggregate over every member, whatever
        // its power state.
        min_mireds: reported(&states, |a| a.min_mireds).into_iter().min(),
        max_mireds: reported(&states, |a| a.max_mireds).into_iter().max(),
        effect_list: union_lists(reported(&states, |a| a.effect_list.as_ref())),
        supported_features: or_flags(reported(&states, |a| a.supported_features))
            .map(|flags| flags & GROUP_SUPPORTED_FEATURES),
    };

    EntityState::with_attributes(power, attributes)
}

/// Three-way power classification over all members.
fn merge_power(states: &[&EntityState]) -> PowerState {
    if states.iter().any(|s| s.power == PowerState::On) {
        PowerState::On
    } else if states.iter().any(|s| s.power != PowerState::Unavailable) {
        PowerState::Off
    } else {
        PowerState::Unavailable
    }
}

/// Values of one attribute across `states`, in member order, skipping
/// members that do not report it.
fn reported<'a, T: 'a>(
    states: &[&'a EntityState],
    extract: impl Fn(&'a LightAttributes) -> Option<T>,
) -> Vec<T> {
    states
        .iter()
        .filter_map(|state| extract(&state.attributes))
        .collect()
}

/// Integer mean, truncating toward zero. 255 and 100 average to 177.
fn mean_u32(values: Vec<u32>) -> Option<u32> {
    if values.is_empty() {
        return None;
    }
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    Some((sum / values.len() as u64) as u32)
}

fn mean_xy(values: Vec<(f64, f64)>) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let (sum_x, sum_y) = values
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    Some((sum_x / n, sum_y / n))
}

fn or_flags(flags: Vec<u32>) -> Option<u32> {
    if flags.is_empty() {
        return None;
    }
    Some(flags.into_iter().fold(0, |acc, f| acc | f))
}

fn mean_rgb(values: Vec<(u8, u8, u8)>) -> Option<(u8, u8, u8)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as u32;
    let (r, g, b) = values.iter().fold((0u32, 0u32, 0u32), |(r, g, b), &(vr, vg, vb)| {
        (r + u32::from(vr), g + u32::from(vg), b + u32::from(vb))
    });
    Some(((r / n) as u8, (g / n) as u8, (b / n) as u8))
}

/// Most frequent value; ties go to the value observed first. The count
/// structure is ordered for exactly that reason.
fn most_common(values: Vec<&String>) -> Option<String> {
    let mut counts: Vec<(&String, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&String, usize)> = None;
    for (value, count) in counts {
        // Strictly greater keeps the earliest value on a tie.
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.clone())
}

/// Union of all reported lists, deduplicated, keeping first-seen order.
fn union_lists(lists: Vec<&Vec<String>>) -> Option<Vec<String>> {
    if lists.is_empty() {
        return None;
    }
    let mut merged: Vec<String> = Vec::new();
    for list in lists {
        for value in list {
            if !merged.iter().any(|seen| seen == value) {
                merged.push(value.clone());
            }
        }
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn members(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn snapshot(entries: Vec<(&str, EntityState)>) -> StoreSnapshot {
        StoreSnapshot {
            entities: entries
                .into_iter()
                .map(|(id, state)| (id.to_string(), state))
                .collect(),
        }
    }

    fn light(power: PowerState, attributes: LightAttributes) -> EntityState {
        EntityState::with_attributes(power, attributes)
    }

    #[test]
    fn empty_member_list_is_unavailable_with_zero_features() {
        let composite = merge_composite(&[], &StoreSnapshot::default());
        assert_eq!(composite.power, PowerState::Unavailable);
        assert_eq!(composite.attributes.supported_features, Some(0));
        assert_eq!(composite.attributes.brightness, None);
        assert_eq!(composite.attributes.rgb_color, None);
        assert_eq!(composite.attributes.xy_color, None);
        assert_eq!(composite.attributes.color_temp, None);
        assert_eq!(composite.attributes.effect_list, None);
    }

    #[test]
    fn members_without_snapshots_contribute_nothing() {
        let composite = merge_composite(
            &members(&["light.ghost1", "light.ghost2"]),
            &StoreSnapshot::default(),
        );
        assert_eq!(composite.power, PowerState::Unavailable);
    }

    #[test]
    fn composite_power_covers_every_combination() {
        let powers = [PowerState::On, PowerState::Off, PowerState::Unavailable];

        for n in 0..=4u32 {
            for combination in 0..3u32.pow(n) {
                let mut ids = Vec::new();
                let mut entities = HashMap::new();
                let mut assigned = Vec::new();
                let mut remaining = combination;

                for i in 0..n {
                    let power = powers[(remaining % 3) as usize];
                    remaining /= 3;
                    let id = format!("light.m{}", i);
                    entities.insert(id.clone(), EntityState::new(power));
                    ids.push(id);
                    assigned.push(power);
                }

                let n_on = assigned.iter().filter(|p| **p == PowerState::On).count();
                let n_off = assigned.iter().filter(|p| **p == PowerState::Off).count();
                let expected = if n_on > 0 {
                    PowerState::On
                } else if n_off > 0 {
                    PowerState::Off
                } else {
                    PowerState::Unavailable
                };

                let composite = merge_composite(&ids, &StoreSnapshot { entities });
                assert_eq!(composite.power, expected, "powers {:?}", assigned);
            }
        }
    }

    #[test]
    fn unknown_members_count_toward_off() {
        let composite = merge_composite(
            &members(&["light.a", "light.b"]),
            &snapshot(vec![
                ("light.a", EntityState::new(PowerState::Unknown)),
                ("light.b", EntityState::new(PowerState::Unavailable)),
            ]),
        );
        assert_eq!(composite.power, PowerState::Off);
    }

    #[test]
    fn unavailable_composite_drops_previous_attributes() {
        let ids = members(&["light.a"]);
        let composite = merge_composite(
            &ids,
            &snapshot(vec![(
                "light.a",
                light(
                    PowerState::Unavailable,
                    LightAttributes {
                        brightness: Some(255),
                        supported_features: Some(1),
                        ..Default::default()
                    },
                ),
            )]),
        );
        assert_eq!(composite.power, PowerState::Unavailable);
        assert_eq!(composite.attributes.brightness, None);
        assert_eq!(composite.attributes.supported_features, Some(0));
    }

    #[test]
    fn brightness_averages_over_on_members_only() {
        let ids = members(&["light.test1", "light.test2"]);

        let one_on = snapshot(vec![(
            "light.test1",
            light(
                PowerState::On,
                LightAttributes {
                    brightness: Some(255),
                    supported_features: Some(1),
                    ..Default::default()
                },
            ),
        )]);
        let composite = merge_composite(&ids, &one_on);
        assert_eq!(composite.power, PowerState::On);
        assert_eq!(composite.attributes.brightness, Some(255));
        assert_eq!(composite.attributes.supported_features, Some(1));

        // Mean truncates: (255 + 100) / 2 == 177.
        let both_on = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::On,
                    LightAttributes {
                        brightness: Some(255),
                        supported_features: Some(1),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        brightness: Some(100),
                        supported_features: Some(1),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        assert_eq!(merge_composite(&ids, &both_on).attributes.brightness, Some(177));

        // An off member keeps reporting its last brightness but no longer
        // contributes to the mean.
        let first_off = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::Off,
                    LightAttributes {
                        brightness: Some(255),
                        supported_features: Some(1),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        brightness: Some(100),
                        supported_features: Some(1),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        let composite = merge_composite(&ids, &first_off);
        assert_eq!(composite.power, PowerState::On);
        assert_eq!(composite.attributes.brightness, Some(100));
    }

    #[test]
    fn xy_color_averages_componentwise() {
        let ids = members(&["light.test1", "light.test2"]);

        let states = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::On,
                    LightAttributes {
                        xy_color: Some((1.0, 1.0)),
                        supported_features: Some(64),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        xy_color: Some((0.5, 0.5)),
                        supported_features: Some(64),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        let composite = merge_composite(&ids, &states);
        assert_eq!(composite.attributes.xy_color, Some((0.75, 0.75)));
        assert_eq!(composite.attributes.supported_features, Some(64));

        let first_off = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::Off,
                    LightAttributes {
                        xy_color: Some((1.0, 1.0)),
                        supported_features: Some(64),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        xy_color: Some((0.5, 0.5)),
                        supported_features: Some(64),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        assert_eq!(
            merge_composite(&ids, &first_off).attributes.xy_color,
            Some((0.5, 0.5))
        );
    }

    #[test]
    fn rgb_color_averages_per_channel() {
        let ids = members(&["light.test1", "light.test2"]);

        let states = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::On,
                    LightAttributes {
                        rgb_color: Some((255, 0, 0)),
                        supported_features: Some(16),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        rgb_color: Some((255, 255, 255)),
                        supported_features: Some(16),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        assert_eq!(
            merge_composite(&ids, &states).attributes.rgb_color,
            Some((255, 127, 127))
        );
    }

    #[test]
    fn white_value_and_color_temp_average_like_brightness() {
        let ids = members(&["light.test1", "light.test2"]);

        let states = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::On,
                    LightAttributes {
                        white_value: Some(255),
                        color_temp: Some(2),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        white_value: Some(100),
                        color_temp: Some(1000),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        let composite = merge_composite(&ids, &states);
        assert_eq!(composite.attributes.white_value, Some(177));
        assert_eq!(composite.attributes.color_temp, Some(501));
    }

    #[test]
    fn mired_bounds_span_all_members_regardless_of_power() {
        let ids = members(&["light.test1", "light.test2"]);

        let states = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::Off,
                    LightAttributes {
                        min_mireds: Some(1),
                        max_mireds: Some(2),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        min_mireds: Some(7),
                        max_mireds: Some(1234567890),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        let composite = merge_composite(&ids, &states);
        assert_eq!(composite.attributes.min_mireds, Some(1));
        assert_eq!(composite.attributes.max_mireds, Some(1234567890));
    }

    #[test]
    fn effect_list_union_keeps_first_seen_order() {
        let ids = members(&["light.test1", "light.test2"]);

        let states = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::Off,
                    LightAttributes {
                        effect_list: Some(vec![
                            "None".to_string(),
                            "Colorloop".to_string(),
                            "Seven".to_string(),
                        ]),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        effect_list: Some(vec![
                            "None".to_string(),
                            "Random".to_string(),
                            "Rainbow".to_string(),
                        ]),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        assert_eq!(
            merge_composite(&ids, &states).attributes.effect_list,
            Some(vec![
                "None".to_string(),
                "Colorloop".to_string(),
                "Seven".to_string(),
                "Random".to_string(),
                "Rainbow".to_string(),
            ])
        );
    }

    #[test]
    fn effect_picks_the_most_common_value_among_on_members() {
        let ids = members(&["light.test1", "light.test2", "light.test3"]);

        let effect = |name: &str| LightAttributes {
            effect: Some(name.to_string()),
            supported_features: Some(2),
            ..Default::default()
        };

        // Two None against one Random.
        let majority = snapshot(vec![
            ("light.test1", light(PowerState::On, effect("None"))),
            ("light.test2", light(PowerState::On, effect("None"))),
            ("light.test3", light(PowerState::On, effect("Random"))),
        ]);
        assert_eq!(
            merge_composite(&ids, &majority).attributes.effect,
            Some("None".to_string())
        );

        // Once the None reporters turn off, Random is the only ON vote.
        let minority_left = snapshot(vec![
            ("light.test1", light(PowerState::Off, effect("None"))),
            ("light.test2", light(PowerState::Off, effect("None"))),
            ("light.test3", light(PowerState::On, effect("Random"))),
        ]);
        assert_eq!(
            merge_composite(&ids, &minority_left).attributes.effect,
            Some("Random".to_string())
        );
    }

    #[test]
    fn effect_ties_break_toward_the_first_observed_value() {
        let ids = members(&["light.test1", "light.test2"]);

        let tied = snapshot(vec![
            (
                "light.test1",
                light(
                    PowerState::On,
                    LightAttributes {
                        effect: Some("Colorloop".to_string()),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.test2",
                light(
                    PowerState::On,
                    LightAttributes {
                        effect: Some("Random".to_string()),
                        ..Default::default()
                    },
                ),
            ),
        ]);
        assert_eq!(
            merge_composite(&ids, &tied).attributes.effect,
            Some("Colorloop".to_string())
        );
    }

    #[test]
    fn supported_features_or_all_members_through_the_group_mask() {
        let ids = members(&["light.test1", "light.test2"]);
        let flags = |bits: u32, power: PowerState| {
            light(
                power,
                LightAttributes {
                    supported_features: Some(bits),
                    ..Default::default()
                },
            )
        };

        let composite = merge_composite(
            &ids,
            &snapshot(vec![("light.test1", flags(0, PowerState::On))]),
        );
        assert_eq!(composite.attributes.supported_features, Some(0));

        let composite = merge_composite(
            &ids,
            &snapshot(vec![
                ("light.test1", flags(0, PowerState::On)),
                ("light.test2", flags(2, PowerState::On)),
            ]),
        );
        assert_eq!(composite.attributes.supported_features, Some(2));

        let composite = merge_composite(
            &ids,
            &snapshot(vec![
                ("light.test1", flags(41, PowerState::Off)),
                ("light.test2", flags(2, PowerState::On)),
            ]),
        );
        assert_eq!(composite.attributes.supported_features, Some(43));

        // Bits above the group mask vanish: 41 | 256 == 297, masked to 41.
        let composite = merge_composite(
            &ids,
            &snapshot(vec![
                ("light.test1", flags(41, PowerState::Off)),
                ("light.test2", flags(256, PowerState::Off)),
            ]),
        );
        assert_eq!(composite.attributes.supported_features, Some(41));
    }

    #[test]
    fn attributes_nobody_reports_are_omitted() {
        let ids = members(&["light.test1"]);
        let composite = merge_composite(
            &ids,
            &snapshot(vec![("light.test1", EntityState::new(PowerState::On))]),
        );
        assert_eq!(composite.power, PowerState::On);
        assert_eq!(composite.attributes, LightAttributes::default());
    }

    #[test]
    fn snapshot_supply_order_does_not_change_the_composite() {
        let ids = members(&["light.a", "light.b", "light.c"]);
        let entries = vec![
            (
                "light.a",
                light(
                    PowerState::On,
                    LightAttributes {
                        brightness: Some(10),
                        supported_features: Some(3),
                        min_mireds: Some(4),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.b",
                light(
                    PowerState::Off,
                    LightAttributes {
                        brightness: Some(200),
                        supported_features: Some(64),
                        min_mireds: Some(2),
                        ..Default::default()
                    },
                ),
            ),
            (
                "light.c",
                light(
                    PowerState::On,
                    LightAttributes {
                        brightness: Some(31),
                        effect: Some("Random".to_string()),
                        ..Default::default()
                    },
                ),
            ),
        ];

        let forward = merge_composite(&ids, &snapshot(entries.clone()));
        let mut reversed_entries = entries;
        reversed_entries.reverse();
        let reversed = merge_composite(&ids, &snapshot(reversed_entries));

        assert_eq!(forward, reversed);
        assert_eq!(forward.attributes.brightness, Some(20));
        assert_eq!(forward.attributes.supported_features, Some(67));
        assert_eq!(forward.attributes.min_mireds, Some(2));
    }
}
