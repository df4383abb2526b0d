//! Batch pipeline stages, in data-flow order.

/// Per-unit profile synthesis and checkpointing.
pub mod generate;
pub mod cache;
/// Checkpoint rollup into per-unit statistics.
pub mod aggregate;
pub mod normalize;
/// Geometry join with name correction.
pub mod bind;
pub mod daily;
pub mod region;
/// Multi-source geographic layer unification.
pub mod unify;

pub use aggregate::{StatisticsAggregator, StatsTable, UnitStatistics};
pub use bind::{GeometryBinder, GeometryNameColumns, NameCorrections};
pub use cache::{ArtifactCache, ArtifactStore, CachePolicy, FsStore, MemoryStore};
pub use daily::{DailySeries, DailySeriesBuilder};
pub use generate::{GenerationSettings, GenerationSummary, ProfileBatchGenerator};
pub use normalize::{HouseholdNormalizer, NormalizedTable};
pub use region::RegionRowExporter;
pub use unify::{MultiSourceGeoUnifier, UnifySettings};
