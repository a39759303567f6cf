use crate::{
    err::{bail, Result},
    handler::{ConnectionEvent, NetworkHandler},
    model::{Instance, NetworkModel, Site, Stimulus},
    syn::SynapseProperties,
    Map,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Incoming connections as (src_gid, tgt_gid, synapse_type, weight, delay)
type ConnectionData = (u64, u64, String, f64, f64);
/// Source index, target gid, segment, fraction along
type SiteData = (usize, u64, u64, f64);

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CellGroup {
    pub cell_type: String,
    /// Size as declared; when absent the group is sized by its locations.
    pub declared_size: Option<usize>,
    pub ids: Vec<u64>,
    pub positions: Vec<[f64; 3]>,
}

impl CellGroup {
    pub fn size(&self) -> usize {
        self.declared_size.unwrap_or(self.ids.len())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Connector {
    pub source: String,
    pub target: String,
    pub synapses: Map<String, SynapseProperties>,
    pub connections: Vec<ConnectionData>,
}

/// Array of spike generators, one per site.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpikeSources {
    pub population: String,
    pub kind: String,
    pub params: Map<String, String>,
    pub size: usize,
    pub sites: Vec<SiteData>,
}

#[derive(Debug, Default)]
struct PendingProjection {
    source: String,
    target: String,
    synapses: Map<String, SynapseProperties>,
    /// (pre id, post id, synapse type, weight, delay)
    connections: Vec<(u64, u64, String, f64, f64)>,
}

/// Simulator facing view of a network.
///
/// Cells get global ids (gids) by population in declaration order, so every
/// partition of a split network agrees on numbering. Connections are
/// collected per projection and only resolved to gids once the projection is
/// finalised.
#[derive(Debug, Default, Serialize)]
pub struct Bundle {
    /// instances were filtered to one partition
    pub parallel: bool,
    /// population names in gid order
    pub order: Vec<String>,
    pub populations: Map<String, CellGroup>,
    pub projections: Map<String, Connector>,
    pub spike_sources: Map<String, SpikeSources>,
    #[serde(skip)]
    pending: Map<String, PendingProjection>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_model(model: &NetworkModel) -> Result<Self> {
        let mut bundle = Self::new();
        model.replay(&mut bundle)?;
        Ok(bundle)
    }

    /// Total number of cells.
    pub fn size(&self) -> usize {
        self.populations.values().map(CellGroup::size).sum()
    }

    /// Global id of cell `id` in `population`.
    ///
    /// A partitioned stream only delivers this node's locations, so every
    /// population ahead of `population` must then carry a declared size.
    pub fn gid(&self, population: &str, id: u64) -> Result<u64> {
        let mut offset = 0;
        for name in &self.order {
            let Some(group) = self.populations.get(name) else {
                continue;
            };
            if name == population {
                return Ok(offset + id);
            }
            if self.parallel && group.declared_size.is_none() {
                bail!(
                    "Population {name} has no declared size; gids of {population} would differ between partitions"
                );
            }
            offset += group.size() as u64;
        }
        bail!("Unknown population {population}");
    }
}

impl NetworkHandler for Bundle {
    fn handle_population(&mut self, name: &str, cell_type: &str, size: Option<usize>) -> Result<()> {
        if self.populations.contains_key(name) {
            bail!("Population {name} declared twice");
        }
        if size.is_none() {
            debug!("Population {name} will be sized by its locations");
        }
        self.order.push(name.to_string());
        self.populations.insert(
            name.to_string(),
            CellGroup {
                cell_type: cell_type.to_string(),
                declared_size: size,
                ids: Vec::with_capacity(size.unwrap_or_default()),
                positions: Vec::with_capacity(size.unwrap_or_default()),
            },
        );
        Ok(())
    }

    fn handle_location(&mut self, population: &str, _cell_type: &str, instance: &Instance) -> Result<()> {
        let Some(group) = self.populations.get_mut(population) else {
            bail!("Location for unknown population {population}");
        };
        group.ids.push(instance.id);
        group.positions.push([instance.x, instance.y, instance.z]);
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
        if self.pending.contains_key(name) || self.projections.contains_key(name) {
            bail!("Projection {name} declared twice");
        }
        self.pending.insert(
            name.to_string(),
            PendingProjection {
                source: source.to_string(),
                target: target.to_string(),
                synapses: synapses.clone(),
                connections: Vec::with_capacity(size.unwrap_or_default()),
            },
        );
        Ok(())
    }

    fn handle_connection(&mut self, conn: &ConnectionEvent) -> Result<()> {
        let pending = self
            .pending
            .entry(conn.projection.to_string())
            .or_insert_with(|| PendingProjection {
                source: conn.source.to_string(),
                target: conn.target.to_string(),
                ..Default::default()
            });
        pending.connections.push((
            conn.pre.cell_id,
            conn.post.cell_id,
            conn.synapse_type.to_string(),
            conn.props.weight,
            conn.props.total_delay(),
        ));
        Ok(())
    }

    fn finalise_projection(&mut self, name: &str, source: &str, target: &str) -> Result<()> {
        let Some(pending) = self.pending.remove(name) else {
            bail!("Projection {name} finalised without being declared");
        };
        let mut connections = Vec::with_capacity(pending.connections.len());
        for (pre, post, synapse, weight, delay) in pending.connections {
            connections.push((self.gid(source, pre)?, self.gid(target, post)?, synapse, weight, delay));
        }
        info!("Projection {name}: {} connections {source} -> {target}", connections.len());
        self.projections.insert(
            name.to_string(),
            Connector {
                source: pending.source,
                target: pending.target,
                synapses: pending.synapses,
                connections,
            },
        );
        Ok(())
    }

    fn handle_input_source(
        &mut self,
        name: &str,
        population: &str,
        stimulus: &Stimulus,
        size: Option<usize>,
    ) -> Result<()> {
        let Some(size) = size else {
            bail!("Input {name} on {population} has no size; cannot create its spike sources");
        };
        self.spike_sources.insert(
            name.to_string(),
            SpikeSources {
                population: population.to_string(),
                kind: stimulus.kind.clone(),
                params: stimulus.params.clone(),
                size,
                sites: Vec::with_capacity(size),
            },
        );
        Ok(())
    }

    fn handle_single_input(&mut self, input: &str, site: &Site) -> Result<()> {
        let Some(sources) = self.spike_sources.get(input) else {
            bail!("Site for unknown input {input}");
        };
        // the i-th site is driven by the i-th generator
        let index = sources.sites.len();
        if index >= sources.size {
            bail!("Input {input} has {} sources but more sites", sources.size);
        }
        let gid = self.gid(&sources.population, site.cell_id)?;
        if let Some(sources) = self.spike_sources.get_mut(input) {
            sources.sites.push((index, gid, site.segment_id, site.fraction_along));
        }
        Ok(())
    }

    fn finalise_input_source(&mut self, name: &str) -> Result<()> {
        if let Some(sources) = self.spike_sources.get(name) {
            if sources.sites.len() < sources.size {
                warn!("Input {name}: {} of {} sources are unused", sources.size - sources.sites.len(), sources.size);
            }
        }
        Ok(())
    }

    fn set_parallel_status(&mut self, parallel: bool) -> Result<()> {
        self.parallel = parallel;
        Ok(())
    }
}
