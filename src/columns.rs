//! Column and property names shared by the tabular and GeoJSON artifacts.
//! Readers and writers must agree on these, so they live in one place.

pub const ADM2: &str = "adm2";
pub const ADM1: &str = "adm1";

pub const MIN: &str = "min";
pub const MAX: &str = "max";
pub const SUM: &str = "sum";
pub const MEAN: &str = "mean";

pub const NUM_HH: &str = "num_hh";
pub const HH_SUM: &str = "hh_sum";
pub const HH_MEAN: &str = "hh_mean";
pub const HH_MAX: &str = "hh_max";
pub const HH_MIN: &str = "hh_min";

/// Template column holding the canonical appliance names.
pub const UNIFIED_NAMES: &str = "unified_names";

/// Index column of checkpoint files.
pub const MINUTE: &str = "minute";

pub const TIME: &str = "time";
pub const VALUE: &str = "value";

/// Synthetic feature identifier some GIS exporters add to every feature.
pub const FID: &str = "fid";

// Unified web-map layer schema.
pub const ADMIN1: &str = "admin1";
pub const ADMIN2: &str = "admin2";
pub const ISO3: &str = "ISO3";
pub const CLUSTER: &str = "cluster";

/// Columns of the aggregated statistics cache artifact.
pub const STATISTICS_COLUMNS: [&str; 6] = [ADM2, ADM1, MIN, MAX, SUM, MEAN];

/// Columns of the normalized statistics artifact.
pub const NORMALIZED_COLUMNS: [&str; 11] = [
    ADM2, ADM1, MIN, MAX, SUM, MEAN, NUM_HH, HH_SUM, HH_MEAN, HH_MAX, HH_MIN,
];

/// Property schema of the unified layer, in output order (geometry excluded).
pub const UNIFIED_COLUMNS: [&str; 13] = [
    ADMIN1, ADMIN2, ISO3, MIN, MAX, SUM, MEAN, NUM_HH, CLUSTER, HH_SUM, HH_MEAN, HH_MAX, HH_MIN,
];

/// Default probing order for the unified `admin2` field.
pub const ADMIN2_CANDIDATES: [&str; 12] = [
    "admin2",
    "adm2",
    "shapeName",
    "name",
    "locationName",
    "place_name",
    "admin_name",
    "NOM_DEP",
    "nom",
    "NAME_3",
    "NAME_2",
    "NAME_1",
];

/// Default probing order for the unified `admin1` field.
pub const ADMIN1_CANDIDATES: [&str; 5] = ["admin1", "adm1", "name_1", "NAME_1", "ADM1_EN"];
