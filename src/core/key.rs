//! Composite key codec.
//!
//! A key packs {band count, band index, tile row, tile column} into 32 bits,
//! most significant field first, so plain integer order equals field order.
//! Layouts are incompatible exchange formats; a job uses exactly one.

use serde::{Deserialize, Serialize};

/// Bit widths of the four key fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLayout {
    pub name: &'static str,
    pub band_count_bits: u32,
    pub band_index_bits: u32,
    pub tile_row_bits: u32,
    pub tile_column_bits: u32,
}

impl KeyLayout {
    /// Seasonal compositing on whole tiles: 8 | 5 | 10 | 9
    pub const SEASONAL: KeyLayout = KeyLayout {
        name: "seasonal",
        band_count_bits: 8,
        band_index_bits: 5,
        tile_row_bits: 10,
        tile_column_bits: 9,
    };

    /// Micro-tiled mosaics with up to 2048 micro-tile columns: 5 | 5 | 11 | 11
    pub const MICRO_TILE: KeyLayout = KeyLayout {
        name: "micro-tile",
        band_count_bits: 5,
        band_index_bits: 5,
        tile_row_bits: 11,
        tile_column_bits: 11,
    };

    pub const fn total_bits(&self) -> u32 {
        self.band_count_bits + self.band_index_bits + self.tile_row_bits + self.tile_column_bits
    }

    pub const fn max_band_count(&self) -> u32 {
        (1 << self.band_count_bits) - 1
    }

    pub const fn max_band_index(&self) -> u32 {
        (1 << self.band_index_bits) - 1
    }

    pub const fn max_tile_row(&self) -> u32 {
        (1 << self.tile_row_bits) - 1
    }

    pub const fn max_tile_column(&self) -> u32 {
        (1 << self.tile_column_bits) - 1
    }

    pub fn from_name(name: &str) -> Option<KeyLayout> {
        match name {
            "seasonal" => Some(Self::SEASONAL),
            "micro-tile" => Some(Self::MICRO_TILE),
            _ => None,
        }
    }
}

const _: () = assert!(KeyLayout::SEASONAL.total_bits() == 32);
const _: () = assert!(KeyLayout::MICRO_TILE.total_bits() == 32);

/// Decoded key fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyFields {
    pub band_count: u32,
    pub band_index: u32,
    pub tile_row: u32,
    pub tile_column: u32,
}

/// Packed 32-bit composite key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey(pub u32);

impl CompositeKey {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Struct-to-integer codec for one key layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    layout: KeyLayout,
}

impl KeyCodec {
    pub fn new(layout: KeyLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Pack key fields.
    ///
    /// Panics when a field exceeds its bit width; callers validate tile
    /// coordinates and band tables against the layout beforehand.
    pub fn encode(&self, fields: KeyFields) -> CompositeKey {
        let l = &self.layout;
        assert!(
            fields.band_count <= l.max_band_count(),
            "band count {} exceeds {} key layout",
            fields.band_count,
            l.name
        );
        assert!(
            fields.band_index <= l.max_band_index(),
            "band index {} exceeds {} key layout",
            fields.band_index,
            l.name
        );
        assert!(
            fields.tile_row <= l.max_tile_row(),
            "tile row {} exceeds {} key layout",
            fields.tile_row,
            l.name
        );
        assert!(
            fields.tile_column <= l.max_tile_column(),
            "tile column {} exceeds {} key layout",
            fields.tile_column,
            l.name
        );
        let mut key = fields.band_count;
        key = (key << l.band_index_bits) | fields.band_index;
        key = (key << l.tile_row_bits) | fields.tile_row;
        key = (key << l.tile_column_bits) | fields.tile_column;
        CompositeKey(key)
    }

    pub fn decode(&self, key: CompositeKey) -> KeyFields {
        let l = &self.layout;
        let mut raw = key.0;
        let tile_column = raw & l.max_tile_column();
        raw >>= l.tile_column_bits;
        let tile_row = raw & l.max_tile_row();
        raw >>= l.tile_row_bits;
        let band_index = raw & l.max_band_index();
        raw >>= l.band_index_bits;
        let band_count = raw & l.max_band_count();
        KeyFields {
            band_count,
            band_index,
            tile_row,
            tile_column,
        }
    }

    /// Whether a field combination can be encoded without panicking
    pub fn fits(&self, fields: &KeyFields) -> bool {
        let l = &self.layout;
        fields.band_count <= l.max_band_count()
            && fields.band_index <= l.max_band_index()
            && fields.tile_row <= l.max_tile_row()
            && fields.tile_column <= l.max_tile_column()
    }
}
