//! Core compositing modules

pub mod assembly;
pub mod best_pixel;
pub mod compositor;
pub mod key;
pub mod pipeline;
pub mod shuffle;
pub mod single_pass;
pub mod status;

// Re-export main types
pub use assembly::{AssemblyState, AssemblyStats, TileAssembler};
pub use best_pixel::{BestPixelAggregator, BestPixelParams, CompositeTile};
pub use compositor::Compositor;
pub use key::{CompositeKey, KeyCodec, KeyFields, KeyLayout};
pub use pipeline::{LocalPipeline, PipelineSummary};
pub use shuffle::{compare, group_key, partition_of, KeyedTile};
pub use single_pass::{SinglePassAggregator, SinglePassRule};
pub use status::{AccumulatorTile, StatisticsTile, StatusAggregator, StatusResult, StatusSummary};
