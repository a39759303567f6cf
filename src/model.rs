//! In-memory network description.
//!
//! A [`NetworkModel`] is both a consumer (it implements [`NetworkHandler`]
//! and so can be filled by either decoder) and a producer ([`NetworkModel::replay`]
//! drives any handler from its contents, and the encoders in `gen` write it
//! out). It is the pivot for converting between formats.

use crate::{
    err::{bail, Result},
    handler::{ConnectionEvent, Endpoint, NetworkHandler},
    syn::SynapseProperties,
    Map,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// A placed cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Partition (host) this cell belongs to, if the network is split.
    pub node_id: Option<u32>,
}

impl Instance {
    pub fn new(id: u64, x: f64, y: f64, z: f64) -> Self {
        Self {
            id,
            x,
            y,
            z,
            node_id: None,
        }
    }

    pub fn on_node(mut self, node_id: u32) -> Self {
        self.node_id = Some(node_id);
        self
    }
}

/// Where an input drives a cell.
pub type Site = Endpoint;

/// Stimulus kind (`random_stim`, `pulse_input`, ...) and its raw parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stimulus {
    pub kind: String,
    pub params: Map<String, String>,
}

impl Stimulus {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            params: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.trim().parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub name: String,
    pub cell_type: String,
    pub instances: Vec<Instance>,
}

impl Population {
    /// Place a cell with the next free id.
    pub fn add_instance(&mut self, x: f64, y: f64, z: f64) -> u64 {
        let id = self.instances.last().map_or(0, |i| i.id + 1);
        self.instances.push(Instance::new(id, x, y, z));
        id
    }

    pub fn push(&mut self, instance: Instance) {
        self.instances.push(instance);
    }

    pub fn size(&self) -> usize {
        self.instances.len()
    }
}

/// One pre -> post link and the effective properties of each synapse type
/// it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: u64,
    pub pre: Endpoint,
    pub post: Endpoint,
    pub synapses: Map<String, SynapseProperties>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub name: String,
    pub source: String,
    pub target: String,
    /// Per synapse type defaults.
    pub synapses: Map<String, SynapseProperties>,
    pub connections: Vec<Connection>,
}

impl Projection {
    /// Add or replace a synapse type. Existing connections that lack it
    /// receive `props` as well.
    pub fn add_synapse(&mut self, synapse_type: &str, props: SynapseProperties) {
        for conn in &mut self.connections {
            conn.synapses.entry(synapse_type.to_string()).or_insert(props);
        }
        self.synapses.insert(synapse_type.to_string(), props);
    }

    /// Connect two cells at their default sites using the projection's
    /// synapse defaults.
    pub fn add_connection(&mut self, pre: u64, post: u64) -> u64 {
        let synapses = self.synapses.clone();
        self.connect(Endpoint::cell(pre), Endpoint::cell(post), synapses)
    }

    pub fn connect(&mut self, pre: Endpoint, post: Endpoint, synapses: Map<String, SynapseProperties>) -> u64 {
        let id = self.connections.last().map_or(0, |c| c.id + 1);
        self.connections.push(Connection {
            id,
            pre,
            post,
            synapses,
        });
        id
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSource {
    pub name: String,
    pub population: String,
    pub stimulus: Stimulus,
    pub size: Option<usize>,
    pub sites: Vec<Site>,
}

impl InputSource {
    pub fn add_site(&mut self, cell_id: u64, segment_id: u64, fraction_along: f64) {
        self.sites.push(Site {
            cell_id,
            segment_id,
            fraction_along,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkModel {
    pub populations: Vec<Population>,
    pub projections: Vec<Projection>,
    pub inputs: Vec<InputSource>,
}

impl NetworkModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_population(&mut self, name: &str, cell_type: &str) -> Result<&mut Population> {
        if self.population(name).is_some() {
            bail!("Population {name} already exists");
        }
        self.populations.push(Population {
            name: name.to_string(),
            cell_type: cell_type.to_string(),
            instances: Vec::new(),
        });
        let idx = self.populations.len() - 1;
        Ok(&mut self.populations[idx])
    }

    pub fn add_projection(&mut self, name: &str, source: &str, target: &str) -> Result<&mut Projection> {
        self.add_projection_with_capacity(name, source, target, 0)
    }

    /// Reserve room for `size` connections up front. Unused capacity is
    /// never visible as connections.
    pub fn add_projection_with_capacity(
        &mut self,
        name: &str,
        source: &str,
        target: &str,
        size: usize,
    ) -> Result<&mut Projection> {
        if self.projection(name).is_some() {
            bail!("Projection {name} already exists");
        }
        self.projections.push(Projection {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            synapses: Map::new(),
            connections: Vec::with_capacity(size),
        });
        let idx = self.projections.len() - 1;
        Ok(&mut self.projections[idx])
    }

    pub fn add_input(
        &mut self,
        name: &str,
        population: &str,
        stimulus: Stimulus,
        size: Option<usize>,
    ) -> Result<&mut InputSource> {
        if self.input(name).is_some() {
            bail!("Input {name} already exists");
        }
        self.inputs.push(InputSource {
            name: name.to_string(),
            population: population.to_string(),
            stimulus,
            size,
            sites: Vec::new(),
        });
        let idx = self.inputs.len() - 1;
        Ok(&mut self.inputs[idx])
    }

    pub fn population(&self, name: &str) -> Option<&Population> {
        self.populations.iter().find(|p| p.name == name)
    }

    pub fn population_mut(&mut self, name: &str) -> Option<&mut Population> {
        self.populations.iter_mut().find(|p| p.name == name)
    }

    pub fn projection(&self, name: &str) -> Option<&Projection> {
        self.projections.iter().find(|p| p.name == name)
    }

    pub fn projection_mut(&mut self, name: &str) -> Option<&mut Projection> {
        self.projections.iter_mut().find(|p| p.name == name)
    }

    pub fn input(&self, name: &str) -> Option<&InputSource> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut InputSource> {
        self.inputs.iter_mut().find(|p| p.name == name)
    }

    pub fn is_parallel(&self) -> bool {
        self.populations
            .iter()
            .flat_map(|p| p.instances.iter())
            .any(|i| i.node_id.is_some())
    }

    pub fn instance_count(&self) -> usize {
        self.populations.iter().map(Population::size).sum()
    }

    pub fn connection_count(&self) -> usize {
        self.projections.iter().map(Projection::size).sum()
    }

    /// Drive `handler` with the same events a decoder would emit for this
    /// model: populations, then projections, then inputs, in insertion order.
    pub fn replay<H: NetworkHandler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        let mut parallel = false;
        for pop in &self.populations {
            // encoders omit empty arrays, so decoders see no size for them
            let size = (!pop.instances.is_empty()).then(|| pop.size());
            handler.handle_population(&pop.name, &pop.cell_type, size)?;
            for instance in &pop.instances {
                if instance.node_id.is_some() && !parallel {
                    parallel = true;
                    handler.set_parallel_status(true)?;
                }
                handler.handle_location(&pop.name, &pop.cell_type, instance)?;
            }
        }
        for prj in &self.projections {
            let size = (!prj.connections.is_empty()).then(|| prj.size());
            handler.handle_projection(&prj.name, &prj.source, &prj.target, &prj.synapses, size)?;
            for conn in &prj.connections {
                for (synapse_type, props) in &conn.synapses {
                    handler.handle_connection(&ConnectionEvent {
                        projection: &prj.name,
                        id: conn.id,
                        source: &prj.source,
                        target: &prj.target,
                        synapse_type,
                        pre: conn.pre,
                        post: conn.post,
                        props: *props,
                    })?;
                }
            }
            handler.finalise_projection(&prj.name, &prj.source, &prj.target)?;
        }
        for input in &self.inputs {
            handler.handle_input_source(&input.name, &input.population, &input.stimulus, input.size)?;
            for site in &input.sites {
                handler.handle_single_input(&input.name, site)?;
            }
            handler.finalise_input_source(&input.name)?;
        }
        Ok(())
    }
}

impl NetworkHandler for NetworkModel {
    fn handle_population(&mut self, name: &str, cell_type: &str, size: Option<usize>) -> Result<()> {
        let pop = self.add_population(name, cell_type)?;
        if let Some(n) = size {
            pop.instances.reserve(n);
        }
        Ok(())
    }

    fn handle_location(&mut self, population: &str, cell_type: &str, instance: &Instance) -> Result<()> {
        match self.population_mut(population) {
            Some(pop) => {
                pop.push(instance.clone());
                Ok(())
            }
            None => bail!("Location for undeclared population {population} ({cell_type})"),
        }
    }

    fn handle_projection(
        &mut self,
        name: &str,
        source: &str,
        target: &str,
        synapses: &Map<String, SynapseProperties>,
        size: Option<usize>,
    ) -> Result<()> {
        let prj = self.add_projection_with_capacity(name, source, target, size.unwrap_or_default())?;
        prj.synapses = synapses.clone();
        Ok(())
    }

    fn handle_connection(&mut self, conn: &ConnectionEvent) -> Result<()> {
        if self.projection(conn.projection).is_none() {
            debug!("Connection for undeclared projection {}; creating it", conn.projection);
            self.add_projection(conn.projection, conn.source, conn.target)?;
        }
        let Some(prj) = self.projection_mut(conn.projection) else {
            bail!("Projection {} vanished", conn.projection);
        };
        match prj.connections.last_mut() {
            Some(last) if last.id == conn.id => {
                last.synapses.insert(conn.synapse_type.to_string(), conn.props);
            }
            _ => prj.connections.push(Connection {
                id: conn.id,
                pre: conn.pre,
                post: conn.post,
                synapses: Map::from([(conn.synapse_type.to_string(), conn.props)]),
            }),
        }
        Ok(())
    }

    fn finalise_projection(&mut self, name: &str, _source: &str, _target: &str) -> Result<()> {
        if let Some(prj) = self.projection(name) {
            debug!("Projection {name} holds {} connections", prj.size());
        }
        Ok(())
    }

    fn handle_input_source(
        &mut self,
        name: &str,
        population: &str,
        stimulus: &Stimulus,
        size: Option<usize>,
    ) -> Result<()> {
        if size.is_none() {
            error!("Input {name} on {population} was declared without a size");
        }
        self.add_input(name, population, stimulus.clone(), size)?;
        Ok(())
    }

    fn handle_single_input(&mut self, input: &str, site: &Site) -> Result<()> {
        match self.input_mut(input) {
            Some(inp) => {
                inp.sites.push(*site);
                Ok(())
            }
            None => bail!("Site for undeclared input {input}"),
        }
    }

    fn finalise_input_source(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn set_parallel_status(&mut self, parallel: bool) -> Result<()> {
        debug!("Model receives partitioned stream: {parallel}");
        Ok(())
    }
}
