//! Tombstone policy: limits, durations, marker kind and protection rules.
//!
//! Loaded once by the host (JSON through `serde_json`, or built in code) and
//! validated before the manager sees it.

use crate::core::{GraveError, Millis, Result};
use crate::world::EffectSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const MINUTE_MS: Millis = 60_000;
const HOUR_MS: Millis = 60 * MINUTE_MS;

/// Upper bound for `search_radius`; the scan visits (2r+1)^2 * (r+1) cells
pub const MAX_SEARCH_RADIUS: i32 = 16;

// ============================================================================
// Marker kind
// ============================================================================

/// Block used as the physical tombstone marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MarkerKind {
    #[default]
    Chest,
    Barrel,
    PlayerHead,
    Skull,
}

impl MarkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::Chest => "chest",
            MarkerKind::Barrel => "barrel",
            MarkerKind::PlayerHead => "player_head",
            MarkerKind::Skull => "skeleton_skull",
        }
    }

    /// Parse a configured name, falling back to a chest for unknown names.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::warn!("unknown marker block '{}', using chest", name);
            MarkerKind::Chest
        })
    }
}

impl FromStr for MarkerKind {
    type Err = GraveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chest" => Ok(MarkerKind::Chest),
            "barrel" => Ok(MarkerKind::Barrel),
            "player_head" | "head" => Ok(MarkerKind::PlayerHead),
            "skeleton_skull" | "skull" => Ok(MarkerKind::Skull),
            other => Err(GraveError::Config(format!("unknown marker block '{}'", other))),
        }
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MarkerKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MarkerKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(MarkerKind::parse_or_default(&name))
    }
}

// ============================================================================
// Entitlement tiers
// ============================================================================

/// Duration overrides granted by one permission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOverride {
    pub protection_minutes: Option<u32>,
    pub despawn_hours: Option<u32>,
}

/// Entitlement tiers keyed by permission name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub permissions: BTreeMap<String, TierOverride>,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            enabled: true,
            permissions: BTreeMap::new(),
        }
    }
}

impl TierTable {
    pub fn with_tier(mut self, permission: &str, tier: TierOverride) -> Self {
        self.permissions.insert(permission.to_string(), tier);
        self
    }

    /// Trailing digits of the last dotted segment; `gravekeeper.vip3` is 3.
    pub fn tier_level(permission: &str) -> u32 {
        let last = permission.rsplit('.').next().unwrap_or(permission);
        let digits: String = last
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().unwrap_or(0)
    }

    /// Highest-level tier among the granted permissions.
    pub fn resolve<'a, I>(&self, granted: I) -> Option<(&str, &TierOverride)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if !self.enabled {
            return None;
        }
        let mut best: Option<(u32, &str, &TierOverride)> = None;
        for permission in granted {
            if let Some((name, tier)) = self.permissions.get_key_value(permission) {
                let level = Self::tier_level(name);
                if best.is_none_or(|(top, _, _)| level > top) {
                    best = Some((level, name.as_str(), tier));
                }
            }
        }
        best.map(|(_, name, tier)| (name, tier))
    }
}

/// Per-owner durations fixed at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Durations {
    pub protection_ms: Millis,
    pub despawn_ms: Millis,
}

impl Durations {
    pub fn from_config(config: &TombstoneConfig) -> Self {
        Self {
            protection_ms: Millis::from(config.protection_minutes) * MINUTE_MS,
            despawn_ms: Millis::from(config.despawn_hours) * HOUR_MS,
        }
    }

    /// Config defaults, overridden by the owner's highest entitlement tier.
    pub fn resolve<'a, I>(config: &TombstoneConfig, granted: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut durations = Self::from_config(config);
        if let Some((_, tier)) = config.tiers.resolve(granted) {
            if let Some(minutes) = tier.protection_minutes {
                durations.protection_ms = Millis::from(minutes) * MINUTE_MS;
            }
            if let Some(hours) = tier.despawn_hours {
                durations.despawn_ms = Millis::from(hours) * HOUR_MS;
            }
        }
        durations.clamped()
    }

    /// Protection is never negative and never outlasts despawn.
    pub fn clamped(self) -> Self {
        let protection_ms = self.protection_ms.max(0);
        Self {
            protection_ms,
            despawn_ms: self.despawn_ms.max(protection_ms),
        }
    }
}

// ============================================================================
// Presenter settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub enabled: bool,
    pub height_offset: f64,
    pub line_spacing: f64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            height_offset: 1.5,
            line_spacing: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub enabled: bool,
    pub kind: String,
    pub interval_ticks: u32,
    pub count: u32,
    pub range: f64,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: "soul".to_string(),
            interval_ticks: 20,
            count: 5,
            range: 0.5,
        }
    }
}

impl EffectConfig {
    pub fn spec(&self) -> EffectSpec {
        EffectSpec {
            kind: self.kind.clone(),
            interval_ticks: self.interval_ticks,
            count: self.count,
            range: self.range,
        }
    }
}

/// Marker protection, per world with a global default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkullProtection {
    pub default: bool,
    pub worlds: BTreeMap<String, bool>,
}

impl Default for SkullProtection {
    fn default() -> Self {
        Self {
            default: true,
            worlds: BTreeMap::new(),
        }
    }
}

impl SkullProtection {
    pub fn is_enabled(&self, world: &str) -> bool {
        self.worlds.get(world).copied().unwrap_or(self.default)
    }
}

// ============================================================================
// Tombstone configuration
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TombstoneConfig {
    /// Concurrent tombstones per owner
    pub max_tombstones: usize,

    /// Neighbourhood searched when the death cell is occupied
    pub search_radius: i32,

    pub protection_minutes: u32,
    pub despawn_hours: u32,

    /// Expiry sweep period; zero disables the background worker
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,

    pub marker: MarkerKind,
    pub label: LabelConfig,
    pub effect: EffectConfig,
    pub skull_protection: SkullProtection,
    pub tiers: TierTable,

    /// Radius of the reconciliation pass around a torn-down tombstone
    pub sweep_radius: f64,

    /// Radius searched for leftover label entities on label removal
    pub label_sweep_radius: f64,
}

impl Default for TombstoneConfig {
    fn default() -> Self {
        Self {
            max_tombstones: 3,
            search_radius: 5,
            protection_minutes: 60,
            despawn_hours: 24,
            cleanup_interval: Duration::from_secs(3600),
            marker: MarkerKind::Chest,
            label: LabelConfig::default(),
            effect: EffectConfig::default(),
            skull_protection: SkullProtection::default(),
            tiers: TierTable::default(),
            sweep_radius: 5.0,
            label_sweep_radius: 2.0,
        }
    }
}

impl TombstoneConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| GraveError::Config(e.to_string()))?;
        config.validate().map_err(GraveError::Config)?;
        Ok(config)
    }

    pub fn max_tombstones(mut self, max: usize) -> Self {
        self.max_tombstones = max;
        self
    }

    pub fn search_radius(mut self, radius: i32) -> Self {
        self.search_radius = radius;
        self
    }

    pub fn protection_minutes(mut self, minutes: u32) -> Self {
        self.protection_minutes = minutes;
        self
    }

    pub fn despawn_hours(mut self, hours: u32) -> Self {
        self.despawn_hours = hours;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn marker(mut self, marker: MarkerKind) -> Self {
        self.marker = marker;
        self
    }

    pub fn tiers(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn skull_protection(mut self, protection: SkullProtection) -> Self {
        self.skull_protection = protection;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_tombstones == 0 {
            return Err("max_tombstones must be > 0".to_string());
        }
        if self.search_radius < 0 {
            return Err("search_radius cannot be negative".to_string());
        }
        if self.search_radius > MAX_SEARCH_RADIUS {
            return Err(format!("search_radius cannot exceed {}", MAX_SEARCH_RADIUS));
        }
        if self.despawn_hours == 0 {
            return Err("despawn_hours must be > 0".to_string());
        }
        if u64::from(self.protection_minutes) > u64::from(self.despawn_hours) * 60 {
            return Err("protection cannot outlast despawn".to_string());
        }
        for (permission, tier) in &self.tiers.permissions {
            let despawn_hours = tier.despawn_hours.unwrap_or(self.despawn_hours);
            if despawn_hours == 0 {
                return Err(format!("tier {}: despawn_hours must be > 0", permission));
            }
            let protection_minutes = tier.protection_minutes.unwrap_or(self.protection_minutes);
            if u64::from(protection_minutes) > u64::from(despawn_hours) * 60 {
                return Err(format!("tier {}: protection cannot outlast despawn", permission));
            }
        }
        if self.sweep_radius < 0.0 || self.label_sweep_radius < 0.0 {
            return Err("sweep radii cannot be negative".to_string());
        }
        if self.label.line_spacing <= 0.0 {
            return Err("label.line_spacing must be > 0".to_string());
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
