//! The event contract between the decoders and whatever builds a network.
//!
//! Both decoders drive a [`NetworkHandler`]; a decode of equivalent XML and
//! HDF5 sources yields the same sequence of calls. Every method has a default
//! that only logs, so a consumer overrides just what it needs. The decoders
//! never validate cross references (e.g. that a projection's source exists);
//! that is up to the consumer.

use crate::{
    err::Result,
    model::{Instance, Site, Stimulus},
    syn::SynapseProperties,
    Map,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// One end of a connection: a cell and a point on one of its segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub cell_id: u64,
    pub segment_id: u64,
    pub fraction_along: f64,
}

impl Endpoint {
    pub fn cell(cell_id: u64) -> Self {
        Self {
            cell_id,
            ..Default::default()
        }
    }

    pub fn is_default_site(&self) -> bool {
        self.segment_id == crate::nml::DEFAULT_SEGMENT
            && self.fraction_along == crate::nml::DEFAULT_FRACTION
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            cell_id: 0,
            segment_id: crate::nml::DEFAULT_SEGMENT,
            fraction_along: crate::nml::DEFAULT_FRACTION,
        }
    }
}

/// A single (connection, synapse type) pair. A connection carrying two
/// synapse types is delivered as two events with the same `id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionEvent<'a> {
    pub projection: &'a str,
    pub id: u64,
    pub source: &'a str,
    pub target: &'a str,
    pub synapse_type: &'a str,
    pub pre: Endpoint,
    pub post: Endpoint,
    pub props: SynapseProperties,
}

pub trait NetworkHandler {
    /// `size` is `None` when the number of instances is only known once all
    /// locations have been seen.
    fn handle_population(&mut self, name: &str, cell_type: &str, size: Option<usize>) -> Result<()> {
        match size {
            Some(n) => info!("Population {name} of {cell_type} with {n} instances"),
            None => info!("Population {name} of {cell_type}, size unknown"),
        }
        Ok(())
    }

    fn handle_location(&mut self, population: &str, cell_type: &str, instance: &Instance) -> Result<()> {
        info!(
            "Location {} of {population} ({cell_type}) at ({}, {}, {}) node {:?}",
            instance.id, instance.x, instance.y, instance.z, instance.node_id
        );
        Ok(())
    }

    fn handle_projection(
        &mut self,
        name: &str,
        source: &str,
        target: &str,
        synapses: &Map<String, SynapseProperties>,
        size: Option<usize>,
    ) -> Result<()> {
        info!(
            "Projection {name} from {source} to {target} via {:?} with {size:?} connections",
            synapses.keys().collect::<Vec<_>>()
        );
        Ok(())
    }

    fn handle_connection(&mut self, conn: &ConnectionEvent) -> Result<()> {
        info!(
            "Connection {} of {} ({}): {}.{}:{} -> {}.{}:{} weight={} delay={}",
            conn.id,
            conn.projection,
            conn.synapse_type,
            conn.pre.cell_id,
            conn.pre.segment_id,
            conn.pre.fraction_along,
            conn.post.cell_id,
            conn.post.segment_id,
            conn.post.fraction_along,
            conn.props.weight,
            conn.props.total_delay()
        );
        Ok(())
    }

    /// Called exactly once per projection, after its last connection.
    fn finalise_projection(&mut self, name: &str, source: &str, target: &str) -> Result<()> {
        info!("Projection {name} ({source} -> {target}) complete");
        Ok(())
    }

    /// Consumers must report a missing `size`; the decoders forward it as is.
    fn handle_input_source(
        &mut self,
        name: &str,
        population: &str,
        stimulus: &Stimulus,
        size: Option<usize>,
    ) -> Result<()> {
        match size {
            Some(n) => info!("Input {name} on {population}: {} x {n}", stimulus.kind),
            None => error!("Input {name} on {population} has no size; cannot allocate sources"),
        }
        Ok(())
    }

    fn handle_single_input(&mut self, input: &str, site: &Site) -> Result<()> {
        info!(
            "Input {input} at cell {} segment {} fraction {}",
            site.cell_id, site.segment_id, site.fraction_along
        );
        Ok(())
    }

    fn finalise_input_source(&mut self, name: &str) -> Result<()> {
        info!("Input {name} complete");
        Ok(())
    }

    /// Sent once, before the first instance, when instances carry node ids.
    fn set_parallel_status(&mut self, parallel: bool) -> Result<()> {
        info!("Parallel: {parallel}");
        Ok(())
    }
}

/// Prints every event; handy with `netml info`.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl NetworkHandler for LoggingHandler {}

/// Owned copy of a handler call.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Population {
        name: String,
        cell_type: String,
        size: Option<usize>,
    },
    Location {
        population: String,
        cell_type: String,
        instance: Instance,
    },
    Projection {
        name: String,
        source: String,
        target: String,
        synapses: Map<String, SynapseProperties>,
        size: Option<usize>,
    },
    Connection {
        projection: String,
        id: u64,
        source: String,
        target: String,
        synapse_type: String,
        pre: Endpoint,
        post: Endpoint,
        props: SynapseProperties,
    },
    ProjectionDone {
        name: String,
        source: String,
        target: String,
    },
    Input {
        name: String,
        population: String,
        stimulus: Stimulus,
        size: Option<usize>,
    },
    Site {
        input: String,
        site: Site,
    },
    InputDone {
        name: String,
    },
    Parallel(bool),
}

/// Records calls verbatim, so that decodes can be compared event by event.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub events: Vec<Event>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Connection { .. }))
    }
}

impl NetworkHandler for RecordingHandler {
    fn handle_population(&mut self, name: &str, cell_type: &str, size: Option<usize>) -> Result<()> {
        self.events.push(Event::Population {
            name: name.to_string(),
            cell_type: cell_type.to_string(),
            size,
        });
        Ok(())
    }

    fn handle_location(&mut self, population: &str, cell_type: &str, instance: &Instance) -> Result<()> {
        self.events.push(Event::Location {
            population: population.to_string(),
            cell_type: cell_type.to_string(),
            instance: instance.clone(),
        });
        Ok(())
    }

    fn handle_projection(
        &mut self,
        name: &str,
        source: &str,
        target: &str,
        synapses: &Map<String, SynapseProperties>,
        size: Option<usize>,
    ) -> Result<()> {
        self.events.push(Event::Projection {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            synapses: synapses.clone(),
            size,
        });
        Ok(())
    }

    fn handle_connection(&mut self, conn: &ConnectionEvent) -> Result<()> {
        self.events.push(Event::Connection {
            projection: conn.projection.to_string(),
            id: conn.id,
            source: conn.source.to_string(),
            target: conn.target.to_string(),
            synapse_type: conn.synapse_type.to_string(),
            pre: conn.pre,
            post: conn.post,
            props: conn.props,
        });
        Ok(())
    }

    fn finalise_projection(&mut self, name: &str, source: &str, target: &str) -> Result<()> {
        self.events.push(Event::ProjectionDone {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        });
        Ok(())
    }

    fn handle_input_source(
        &mut self,
        name: &str,
        population: &str,
        stimulus: &Stimulus,
        size: Option<usize>,
    ) -> Result<()> {
        self.events.push(Event::Input {
            name: name.to_string(),
            population: population.to_string(),
            stimulus: stimulus.clone(),
            size,
        });
        Ok(())
    }

    fn handle_single_input(&mut self, input: &str, site: &Site) -> Result<()> {
        self.events.push(Event::Site {
            input: input.to_string(),
            site: *site,
        });
        Ok(())
    }

    fn finalise_input_source(&mut self, name: &str) -> Result<()> {
        self.events.push(Event::InputDone {
            name: name.to_string(),
        });
        Ok(())
    }

    fn set_parallel_status(&mut self, parallel: bool) -> Result<()> {
        self.events.push(Event::Parallel(parallel));
        Ok(())
    }
}

/// Forwards every event to two handlers, first then second.
pub struct Tee<'a> {
    pub first: &'a mut dyn NetworkHandler,
    pub second: &'a mut dyn NetworkHandler,
}

impl<'a> NetworkHandler for Tee<'a> {
    fn handle_population(&mut self, name: &str, cell_type: &str, size: Option<usize>) -> Result<()> {
        self.first.handle_population(name, cell_type, size)?;
        self.second.handle_population(name, cell_type, size)
    }

    fn handle_location(&mut self, population: &str, cell_type: &str, instance: &Instance) -> Result<()> {
        self.first.handle_location(population, cell_type, instance)?;
        self.second.handle_location(population, cell_type, instance)
    }

    fn handle_projection(
        &mut self,
        name: &str,
        source: &str,
        target: &str,
        synapses: &Map<String, SynapseProperties>,
        size: Option<usize>,
    ) -> Result<()> {
        self.first.handle_projection(name, source, target, synapses, size)?;
        self.second.handle_projection(name, source, target, synapses, size)
    }

    fn handle_connection(&mut self, conn: &ConnectionEvent) -> Result<()> {
        self.first.handle_connection(conn)?;
        self.second.handle_connection(conn)
    }

    fn finalise_projection(&mut self, name: &str, source: &str, target: &str) -> Result<()> {
        self.first.finalise_projection(name, source, target)?;
        self.second.finalise_projection(name, source, target)
    }

    fn handle_input_source(
        &mut self,
        name: &str,
        population: &str,
        stimulus: &Stimulus,
        size: Option<usize>,
    ) -> Result<()> {
        self.first.handle_input_source(name, population, stimulus, size)?;
        self.second.handle_input_source(name, population, stimulus, size)
    }

    fn handle_single_input(&mut self, input: &str, site: &Site) -> Result<()> {
        self.first.handle_single_input(input, site)?;
        self.second.handle_single_input(input, site)
    }

    fn finalise_input_source(&mut self, name: &str) -> Result<()> {
        self.first.finalise_input_source(name)?;
        self.second.finalise_input_source(name)
    }

    fn set_parallel_status(&mut self, parallel: bool) -> Result<()> {
        self.first.set_parallel_status(parallel)?;
        self.second.set_parallel_status(parallel)
    }
}
