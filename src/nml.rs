//! NetworkML vocabulary shared by the readers and writers.
//!
//! Element and attribute names follow the NetworkML v1.8 schema. The HDF5
//! encoding reuses the same names for groups, group attributes and the
//! `column_<n>` labels of data arrays.

use crate::err::SchemaError;

pub const NAMESPACE: &str = "http://morphml.org/networkml/schema";
pub const META_NAMESPACE: &str = "http://morphml.org/metadata/schema";
pub const SCHEMA_LOCATION: &str = "http://morphml.org/networkml/schema  NetworkML_v1.8.1.xsd";

pub const ROOT: &str = "networkml";
pub const NOTES: &str = "notes";
pub const LENGTH_UNITS: &str = "lengthUnits";
pub const UNITS: &str = "units";
pub const PHYSIOLOGICAL_UNITS: &str = "Physiological Units";

pub const POPULATIONS: &str = "populations";
pub const POPULATION: &str = "population";
pub const NAME: &str = "name";
pub const CELL_TYPE: &str = "cell_type";
pub const INSTANCES: &str = "instances";
pub const SIZE: &str = "size";
pub const INSTANCE: &str = "instance";
pub const ID: &str = "id";
pub const NODE_ID: &str = "node_id";
pub const LOCATION: &str = "location";
pub const X: &str = "x";
pub const Y: &str = "y";
pub const Z: &str = "z";

pub const PROJECTIONS: &str = "projections";
pub const PROJECTION: &str = "projection";
pub const SOURCE: &str = "source";
pub const TARGET: &str = "target";
pub const SYNAPSE_PROPS: &str = "synapse_props";
pub const SYNAPSE_TYPE: &str = "synapse_type";
pub const DEFAULT_VALUES: &str = "default_values";
pub const CONNECTIONS: &str = "connections";
pub const CONNECTION: &str = "connection";
pub const PRE: &str = "pre";
pub const POST: &str = "post";
pub const CELL_ID: &str = "cell_id";
pub const SEGMENT_ID: &str = "segment_id";
pub const FRACTION_ALONG: &str = "fraction_along";
pub const PRE_CELL_ID: &str = "pre_cell_id";
pub const PRE_SEGMENT_ID: &str = "pre_segment_id";
pub const PRE_FRACTION_ALONG: &str = "pre_fraction_along";
pub const POST_CELL_ID: &str = "post_cell_id";
pub const POST_SEGMENT_ID: &str = "post_segment_id";
pub const POST_FRACTION_ALONG: &str = "post_fraction_along";
pub const PROPERTIES: &str = "properties";

pub const INPUTS: &str = "inputs";
pub const INPUT: &str = "input";
pub const INPUT_POPULATION: &str = "population";
/// Pre-1.7 spelling of the input target population attribute.
pub const INPUT_CELL_GROUP: &str = "cell_group";
pub const SITES: &str = "sites";
pub const SITE: &str = "site";
pub const RANDOM_STIM: &str = "random_stim";
pub const PULSE_INPUT: &str = "pulse_input";

/// Stimulus elements recognised inside `<input>`.
pub const STIMULI: &[&str] = &[RANDOM_STIM, PULSE_INPUT];

/// HDF5 group name prefixes; the remainder of the name is the item name.
pub const POPULATION_PREFIX: &str = "population_";
pub const PROJECTION_PREFIX: &str = "projection_";
pub const SYNAPSE_PROPS_PREFIX: &str = "synapse_props_";
pub const INPUT_PREFIX: &str = "input_";
/// Suffix of the group carrying stimulus parameters below an input group.
pub const PROPERTIES_SUFFIX: &str = "_properties";
/// Suffix of the site array below an input group.
pub const SITES_SUFFIX: &str = "_input_sites";
/// Array attributes naming the semantic content of each column.
pub const COLUMN_PREFIX: &str = "column_";
/// Group attribute used to restore sibling order in HDF5.
pub const ORDER: &str = "order";

/// Sub-cellular targeting defaults.
pub const DEFAULT_SEGMENT: u64 = 0;
pub const DEFAULT_FRACTION: f64 = 0.5;

/// Parse a floating point attribute value; tolerates surrounding blanks.
pub fn number(attribute: &str, value: &str) -> Result<f64, SchemaError> {
    value.trim().parse::<f64>().map_err(|_| SchemaError::BadNumber {
        attribute: attribute.to_string(),
        value: value.to_string(),
        expected: "number",
    })
}

/// Parse a non-negative integer attribute value. Integral floats such as
/// `3.0` are accepted since HDF5 arrays store ids as floats.
pub fn index(attribute: &str, value: &str) -> Result<u64, SchemaError> {
    let value = value.trim();
    if let Ok(v) = value.parse::<u64>() {
        return Ok(v);
    }
    match value.parse::<f64>() {
        Ok(v) => from_float(attribute, v),
        Err(_) => Err(SchemaError::BadNumber {
            attribute: attribute.to_string(),
            value: value.to_string(),
            expected: "non-negative integer",
        }),
    }
}

/// Downcast an integral float (an id read back from a float array).
pub fn from_float(attribute: &str, value: f64) -> Result<u64, SchemaError> {
    if value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Ok(value as u64)
    } else {
        Err(SchemaError::BadNumber {
            attribute: attribute.to_string(),
            value: value.to_string(),
            expected: "non-negative integer",
        })
    }
}

/// Partition id of an instance. Negative values are the `-1` older writers
/// store for instances on no particular node.
pub fn node_id(value: f64) -> Result<Option<u32>, SchemaError> {
    if value < 0.0 {
        return Ok(None);
    }
    let id = from_float(NODE_ID, value)?;
    u32::try_from(id).map(Some).map_err(|_| SchemaError::BadNumber {
        attribute: NODE_ID.to_string(),
        value: value.to_string(),
        expected: "32 bit partition id",
    })
}

/// Strip an HDF5 group prefix, e.g. `population_CellsA` -> `CellsA`.
pub fn strip_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

/// Column labels for the per-synapse-type override columns in HDF5,
/// e.g. `weight_AMPA`.
pub fn synapse_column(field: &str, synapse_type: &str) -> String {
    format!("{field}_{synapse_type}")
}
