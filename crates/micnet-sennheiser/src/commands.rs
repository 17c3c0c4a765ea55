//! SSC outbound message construction.
//!
//! SSC commands are JSON objects mirroring the device's property tree. A
//! read is the path with a `null` leaf, a write is the path with a value
//! leaf, and a subscription wraps one or more paths in an options envelope
//! under `osc/state/subscribe`:
//!
//! ```text
//! {"rx1":{"gain":null}}                                   read
//! {"rx1":{"gain":6}}                                      write
//! {"osc":{"state":{"subscribe":[{"#":{...},"rx1":{"gain":null}}]}}}
//! ```
//!
//! This module is pure: message building and value mapping only, no I/O.

use serde_json::{json, Map, Value};

/// Subscription options: one immediate report, then updates for
/// `lifetime` seconds. Finite lifetime forces periodic renewal.
pub const SUBSCRIPTION_LIFETIME_SECS: u32 = 10;

/// Build a nested object for `path` with `leaf` at the end.
pub fn path_tree(path: &[&str], leaf: Value) -> Value {
    let mut value = leaf;
    for key in path.iter().rev() {
        value = json!({ *key: value });
    }
    value
}

/// Deep-merge `src` into `dst`. Objects merge recursively; any other
/// value in `src` replaces the one in `dst`.
pub fn merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, src_value) in src_map {
                match dst_map.get_mut(&key) {
                    Some(dst_value) => merge(dst_value, src_value),
                    None => {
                        dst_map.insert(key, src_value);
                    }
                }
            }
        }
        (dst_slot, src_value) => *dst_slot = src_value,
    }
}

/// Merge several null-leaf paths into a single read request.
pub fn request(paths: &[&[&str]]) -> Value {
    let mut root = Value::Object(Map::new());
    for path in paths {
        merge(&mut root, path_tree(path, Value::Null));
    }
    root
}

/// Wrap null-leaf `paths` in a subscription envelope with transaction
/// id `xid`.
pub fn subscription(xid: u32, paths: &[&[&str]]) -> Value {
    let mut body = json!({
        "#": { "min": 0, "max": 0, "count": 1000, "lifetime": SUBSCRIPTION_LIFETIME_SECS }
    });
    for path in paths {
        merge(&mut body, path_tree(path, Value::Null));
    }
    json!({
        "osc": {
            "xid": xid,
            "state": { "subscribe": [body] }
        }
    })
}

// ---------------------------------------------------------------------------
// Value mapping
// ---------------------------------------------------------------------------

/// Receiver gain is adjustable in 3 dB steps from -3 to 42 dB; requested
/// values are clamped and snapped to the nearest step.
pub fn quantize_gain(db: i32) -> i32 {
    let clamped = db.clamp(-3, 42);
    let steps = (clamped as f32 / 3.0).round() as i32;
    (steps * 3).clamp(-3, 42)
}

/// RSSI arrives in dBm; normalize -120..-50 dBm onto 0..1.
pub fn rssi_to_normalized(dbm: f32) -> f32 {
    ((dbm + 120.0) / 70.0).clamp(0.0, 1.0)
}

/// Audio level arrives as a percentage.
pub fn af_to_normalized(percent: f32) -> f32 {
    (percent / 100.0).clamp(0.0, 1.0)
}

/// Battery gauge arrives as a percentage.
pub fn battery_to_fraction(percent: f32) -> f32 {
    (percent / 100.0).clamp(0.0, 1.0)
}
