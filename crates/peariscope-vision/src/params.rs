use serde::{Deserialize, Serialize};

use crate::store::ParameterStore;

/// Store keys read and written by the pipeline.
pub mod keys {
    pub const MIN_HUE: &str = "min_hue";
    pub const MAX_HUE: &str = "max_hue";
    pub const MIN_SAT: &str = "min_sat";
    pub const MAX_SAT: &str = "max_sat";
    pub const MIN_VAL: &str = "min_val";
    pub const MAX_VAL: &str = "max_val";
    pub const MIN_AREA: &str = "min_area";
    pub const MAX_AREA: &str = "max_area";
    pub const MIN_RATIO: &str = "min_ratio";
    pub const MAX_FILL: &str = "max_fill";
    pub const MIN_WIDTH: &str = "min_width";
    pub const MAX_WIDTH: &str = "max_width";
    pub const MIN_HEIGHT: &str = "min_height";
    pub const MAX_HEIGHT: &str = "max_height";

    pub const LED_RED: &str = "led_red";
    pub const LED_GREEN: &str = "led_grn";
    pub const LED_BLUE: &str = "led_blu";

    pub const IMAGE_HEIGHT: &str = "image_height";
    pub const IMAGE_WIDTH: &str = "image_width";
    pub const X_LIST: &str = "x_list";
    pub const Y_LIST: &str = "y_list";
    pub const X_LIST_PCT: &str = "x_list_pct";
    pub const Y_LIST_PCT: &str = "y_list_pct";
    pub const DISTANCE_LIST: &str = "distance_list";
    pub const BEARING_LIST: &str = "bearing_list";
    pub const TARGET_BEARING_LIST: &str = "target_bearing_list";
    pub const ELAPSED_TIME: &str = "elapsed_time";
    pub const FPS: &str = "fps";
}

/// Per-frame tuning snapshot.
///
/// Hue follows the 8-bit OpenCV convention (0..180); saturation and value
/// are 0..255. Inverted pairs (`min > max`) are legal and simply match
/// nothing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    pub min_hue: f64,
    pub max_hue: f64,
    pub min_sat: f64,
    pub max_sat: f64,
    pub min_val: f64,
    pub max_val: f64,
    pub min_area: f64,
    pub max_area: f64,
    pub min_ratio: f64,
    pub max_fill: f64,
    pub min_width: f64,
    pub max_width: f64,
    pub min_height: f64,
    pub max_height: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_hue: 55.0,
            max_hue: 65.0,
            min_sat: 255.0,
            max_sat: 255.0,
            min_val: 40.0,
            max_val: 255.0,
            min_area: 50.0,
            max_area: 2000.0,
            min_ratio: 1.3,
            max_fill: 0.15,
            min_width: 0.0,
            max_width: 10000.0,
            min_height: 0.0,
            max_height: 10000.0,
        }
    }
}

impl DetectionParams {
    fn entries(&self) -> [(&'static str, f64); 14] {
        [
            (keys::MIN_HUE, self.min_hue),
            (keys::MAX_HUE, self.max_hue),
            (keys::MIN_SAT, self.min_sat),
            (keys::MAX_SAT, self.max_sat),
            (keys::MIN_VAL, self.min_val),
            (keys::MAX_VAL, self.max_val),
            (keys::MIN_AREA, self.min_area),
            (keys::MAX_AREA, self.max_area),
            (keys::MIN_RATIO, self.min_ratio),
            (keys::MAX_FILL, self.max_fill),
            (keys::MIN_WIDTH, self.min_width),
            (keys::MAX_WIDTH, self.max_width),
            (keys::MIN_HEIGHT, self.min_height),
            (keys::MAX_HEIGHT, self.max_height),
        ]
    }

    /// Read every field from `store`, falling back to `defaults` per key.
    pub fn from_store<S: ParameterStore + ?Sized>(store: &S, defaults: &Self) -> Self {
        let get = |key, default| store.get_number(key, default);
        Self {
            min_hue: get(keys::MIN_HUE, defaults.min_hue),
            max_hue: get(keys::MAX_HUE, defaults.max_hue),
            min_sat: get(keys::MIN_SAT, defaults.min_sat),
            max_sat: get(keys::MAX_SAT, defaults.max_sat),
            min_val: get(keys::MIN_VAL, defaults.min_val),
            max_val: get(keys::MAX_VAL, defaults.max_val),
            min_area: get(keys::MIN_AREA, defaults.min_area),
            max_area: get(keys::MAX_AREA, defaults.max_area),
            min_ratio: get(keys::MIN_RATIO, defaults.min_ratio),
            max_fill: get(keys::MAX_FILL, defaults.max_fill),
            min_width: get(keys::MIN_WIDTH, defaults.min_width),
            max_width: get(keys::MAX_WIDTH, defaults.max_width),
            min_height: get(keys::MIN_HEIGHT, defaults.min_height),
            max_height: get(keys::MAX_HEIGHT, defaults.max_height),
        }
    }

    /// Overwrite the store with these values.
    pub fn publish<S: ParameterStore + ?Sized>(&self, store: &S) {
        for (key, value) in self.entries() {
            store.put_number(key, value);
        }
    }
}

/// Whether an interval includes its end points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bounds {
    /// `[lo, hi]`
    #[default]
    Closed,
    /// `(lo, hi)`
    Open,
}

impl Bounds {
    /// NaN is never contained.
    #[inline]
    pub fn contains(self, value: f64, lo: f64, hi: f64) -> bool {
        match self {
            Bounds::Closed => lo <= value && value <= hi,
            Bounds::Open => lo < value && value < hi,
        }
    }
}

/// Interval conventions applied by the geometric filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConventions {
    /// `area ∈ [min_area, max_area]` by default.
    pub area: Bounds,
    /// `fill ∈ (0, max_fill)` by default.
    pub fill: Bounds,
    /// Bounding box width/height bounds.
    pub dimensions: Bounds,
}

impl Default for FilterConventions {
    fn default() -> Self {
        Self {
            area: Bounds::Closed,
            fill: Bounds::Open,
            dimensions: Bounds::Closed,
        }
    }
}

/// Illuminator color, one byte per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for LedColor {
    fn default() -> Self {
        Self::new(0, 255, 0)
    }
}

impl LedColor {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Read `led_red` / `led_grn` / `led_blu`, rounding and clamping into a byte.
    pub fn from_store<S: ParameterStore + ?Sized>(store: &S, defaults: &Self) -> Self {
        let channel = |key, default: u8| to_channel(store.get_number(key, default as f64));
        Self {
            red: channel(keys::LED_RED, defaults.red),
            green: channel(keys::LED_GREEN, defaults.green),
            blue: channel(keys::LED_BLUE, defaults.blue),
        }
    }

    pub fn publish<S: ParameterStore + ?Sized>(&self, store: &S) {
        store.put_number(keys::LED_RED, self.red as f64);
        store.put_number(keys::LED_GREEN, self.green as f64);
        store.put_number(keys::LED_BLUE, self.blue as f64);
    }
}

/// NaN maps to 0.
fn to_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn store_overrides_individual_fields() {
        let store = MemoryStore::new();
        store.put_number(keys::MIN_HUE, 70.0);
        store.put_number(keys::MAX_FILL, 0.3);
        let params = DetectionParams::from_store(&store, &DetectionParams::default());
        assert_eq!(params.min_hue, 70.0);
        assert_eq!(params.max_fill, 0.3);
        assert_eq!(params.max_hue, 65.0);
    }

    #[test]
    fn publish_then_read_is_identity() {
        let store = MemoryStore::new();
        let params = DetectionParams {
            min_area: 10.0,
            ..DetectionParams::default()
        };
        params.publish(&store);
        assert_eq!(store.len(), 14);
        assert_eq!(
            DetectionParams::from_store(&store, &DetectionParams::default()),
            params
        );
    }

    #[test]
    fn bounds_conventions_differ_only_at_end_points() {
        assert!(Bounds::Closed.contains(50.0, 50.0, 2000.0));
        assert!(!Bounds::Open.contains(50.0, 50.0, 2000.0));
        assert!(Bounds::Open.contains(50.5, 50.0, 2000.0));
        assert!(!Bounds::Closed.contains(f64::NAN, 0.0, 1.0));
        // Inverted interval contains nothing.
        assert!(!Bounds::Closed.contains(5.0, 10.0, 1.0));
    }

    #[test]
    fn led_color_is_rounded_and_clamped() {
        let store = MemoryStore::new();
        store.put_number(keys::LED_RED, 12.5);
        store.put_number(keys::LED_GREEN, 300.0);
        store.put_number(keys::LED_BLUE, -4.0);
        let color = LedColor::from_store(&store, &LedColor::default());
        assert_eq!(color, LedColor::new(13, 255, 0));
    }

    #[test]
    fn missing_led_keys_use_defaults() {
        let store = MemoryStore::new();
        assert_eq!(
            LedColor::from_store(&store, &LedColor::default()),
            LedColor::new(0, 255, 0)
        );
    }
}
