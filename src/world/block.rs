use crate::policy::MarkerKind;
use std::fmt;

/// Classification of a single world cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Air,
    CaveAir,
    VoidAir,
    Water,
    Lava,
    TallGrass,
    Grass,
    Fern,
    DeadBush,
    /// A tombstone marker block
    Marker(MarkerKind),
    /// Anything else, by material name
    Solid(String),
}

impl BlockKind {
    pub fn is_air(&self) -> bool {
        matches!(self, BlockKind::Air | BlockKind::CaveAir | BlockKind::VoidAir)
    }

    /// Cells a marker may overwrite: air and a few trivially replaceable blocks.
    pub fn is_placeable(&self) -> bool {
        self.is_air()
            || matches!(
                self,
                BlockKind::Water
                    | BlockKind::Lava
                    | BlockKind::TallGrass
                    | BlockKind::Grass
                    | BlockKind::Fern
                    | BlockKind::DeadBush
            )
    }

    pub fn from_material(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "air" => BlockKind::Air,
            "cave_air" => BlockKind::CaveAir,
            "void_air" => BlockKind::VoidAir,
            "water" => BlockKind::Water,
            "lava" => BlockKind::Lava,
            "tall_grass" => BlockKind::TallGrass,
            "grass" | "short_grass" => BlockKind::Grass,
            "fern" => BlockKind::Fern,
            "dead_bush" => BlockKind::DeadBush,
            other => match other.parse::<MarkerKind>() {
                Ok(marker) => BlockKind::Marker(marker),
                Err(_) => BlockKind::Solid(other.to_string()),
            },
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Air => f.write_str("air"),
            BlockKind::CaveAir => f.write_str("cave_air"),
            BlockKind::VoidAir => f.write_str("void_air"),
            BlockKind::Water => f.write_str("water"),
            BlockKind::Lava => f.write_str("lava"),
            BlockKind::TallGrass => f.write_str("tall_grass"),
            BlockKind::Grass => f.write_str("grass"),
            BlockKind::Fern => f.write_str("fern"),
            BlockKind::DeadBush => f.write_str("dead_bush"),
            BlockKind::Marker(kind) => write!(f, "{}", kind),
            BlockKind::Solid(name) => f.write_str(name),
        }
    }
}
