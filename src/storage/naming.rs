/// Prefixed table names shared by every backend.
///
/// An empty prefix yields the bare names `tombstones` / `tombstone_items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub prefix: String,
    pub tombstones: String,
    pub items: String,
}

impl TableNames {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            tombstones: format!("{}tombstones", prefix),
            items: format!("{}tombstone_items", prefix),
        }
    }

    /// Prefixes must be plain identifiers since they are spliced into DDL.
    pub fn validate(prefix: &str) -> Result<(), String> {
        if prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            Ok(())
        } else {
            Err(format!("invalid table prefix '{}'", prefix))
        }
    }

    /// Index name for owner lookups
    pub fn owner_index(&self) -> String {
        format!("idx_{}_owner", self.tombstones)
    }

    /// Index name for expiry scans
    pub fn despawn_index(&self) -> String {
        format!("idx_{}_despawn", self.tombstones)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self::new("")
    }
}
