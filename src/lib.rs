pub use std::collections::BTreeMap as Map;

pub mod err;
pub mod gen;
pub mod h5;
pub mod handler;
pub mod model;
pub mod nml;
pub mod raw;
pub mod sax;
pub mod sim;
pub mod sup;
pub mod syn;

pub use handler::{ConnectionEvent, Endpoint, Event, LoggingHandler, NetworkHandler, RecordingHandler};
pub use model::{Connection, InputSource, Instance, NetworkModel, Population, Projection, Site, Stimulus};
pub use syn::{SynapseField, SynapseProperties};
