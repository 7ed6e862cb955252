//! Partition, grouping and ordering functions, plus the in-process shuffle
//! used by the local pipeline.
//!
//! A group is one (band, tile row); every fragment of a group is routed to the
//! same partition and arrives there in ascending tile-column order.

use crate::core::key::{CompositeKey, KeyCodec};
use crate::types::BandTile;
use std::cmp::Ordering;

/// A composite band tile tagged with its key
#[derive(Debug, Clone)]
pub struct KeyedTile {
    pub key: CompositeKey,
    pub tile: BandTile,
}

/// Group identity of a key: the key without its tile-column bits
pub fn group_key(codec: &KeyCodec, key: CompositeKey) -> u32 {
    key.raw() >> codec.layout().tile_column_bits
}

/// Partition of a key; constant across the tile columns of one group
pub fn partition_of(codec: &KeyCodec, key: CompositeKey, num_partitions: usize) -> usize {
    assert!(num_partitions > 0, "number of partitions must be positive");
    (group_key(codec, key) as usize) % num_partitions
}

/// Total key order: band count, band index, tile row, tile column
pub fn compare(a: CompositeKey, b: CompositeKey) -> Ordering {
    a.raw().cmp(&b.raw())
}

/// Route fragments to partitions and sort each partition by key
pub fn shuffle(codec: &KeyCodec, fragments: Vec<KeyedTile>, num_partitions: usize) -> Vec<Vec<KeyedTile>> {
    let mut partitions: Vec<Vec<KeyedTile>> = (0..num_partitions).map(|_| Vec::new()).collect();
    for fragment in fragments {
        let partition = partition_of(codec, fragment.key, num_partitions);
        partitions[partition].push(fragment);
    }
    for (i, partition) in partitions.iter_mut().enumerate() {
        partition.sort_by(|a, b| compare(a.key, b.key));
        log::debug!("Partition {}: {} fragments", i, partition.len());
    }
    partitions
}

/// Split a sorted partition into its (band, tile row) groups
pub fn groups<'a>(codec: &KeyCodec, sorted: &'a [KeyedTile]) -> Vec<&'a [KeyedTile]> {
    let mut result = Vec::new();
    let mut start = 0;
    for i in 1..=sorted.len() {
        if i == sorted.len() || group_key(codec, sorted[i].key) != group_key(codec, sorted[start].key) {
            if i > start {
                result.push(&sorted[start..i]);
            }
            start = i;
        }
    }
    result
}
