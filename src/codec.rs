//! Item payload codec
//!
//! Inventory slots are stored as opaque blobs: MessagePack behind a two byte
//! header so payloads written by an older layout can be rejected instead of
//! being decoded into garbage.

use crate::core::{GraveError, ItemEntry, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PAYLOAD_MAGIC: u8 = 0xD7;
const PAYLOAD_VERSION: u8 = 1;

/// Materials that never count as a real item.
const EMPTY_MATERIALS: &[&str] = &["air", "cave_air", "void_air"];

/// A single inventory stack as handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub material: String,
    pub amount: u32,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl ItemStack {
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Placeholder slots (air, zero amount) are never stored.
    pub fn is_empty(&self) -> bool {
        self.amount == 0
            || EMPTY_MATERIALS
                .iter()
                .any(|m| self.material.eq_ignore_ascii_case(m))
    }
}

/// A decoded item together with the slot it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TombstoneItem {
    pub slot_index: u32,
    pub item: ItemStack,
}

pub fn encode_item(item: &ItemStack) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec_named(item)?;
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(PAYLOAD_MAGIC);
    out.push(PAYLOAD_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_item(bytes: &[u8]) -> Result<ItemStack> {
    match bytes {
        [PAYLOAD_MAGIC, PAYLOAD_VERSION, body @ ..] => Ok(rmp_serde::from_slice(body)?),
        [PAYLOAD_MAGIC, version, ..] => Err(GraveError::Codec(format!(
            "unsupported payload version {}",
            version
        ))),
        _ => Err(GraveError::Codec("payload header missing".into())),
    }
}

/// Turn a raw inventory snapshot into storable rows.
///
/// The index in `slots` is the origin slot and is kept as-is; empty and
/// placeholder slots are dropped.
pub fn collect_slots(slots: &[Option<ItemStack>]) -> Result<Vec<ItemEntry>> {
    let mut entries = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        let Some(item) = slot else { continue };
        if item.is_empty() {
            continue;
        }
        let slot_index = u32::try_from(index)
            .map_err(|_| GraveError::Codec(format!("slot index {} out of range", index)))?;
        entries.push(ItemEntry::new(slot_index, encode_item(item)?));
    }
    Ok(entries)
}

/// Decode stored rows, skipping (and logging) any row that no longer decodes.
pub fn decode_entries(entries: &[ItemEntry]) -> Vec<TombstoneItem> {
    entries
        .iter()
        .filter_map(|entry| match decode_item(&entry.payload) {
            Ok(item) => Some(TombstoneItem {
                slot_index: entry.slot_index,
                item,
            }),
            Err(err) => {
                log::warn!("skipping undecodable item in slot {}: {}", entry.slot_index, err);
                None
            }
        })
        .collect()
}
