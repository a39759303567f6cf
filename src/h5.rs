//! NetworkML HDF5 decoder.
//!
//! Layout, groups named by convention and metadata in group attributes:
//!
//! Path                                       Type                 Attributes
//! =========================================  ===================  =========================
//! /networkml                                 Group
//!     /populations                           Group
//!         /population_<name>                 Group                name, cell_type
//!             /<name>                        Dataset{N, 4|5}      column_<i>
//!     /projections                           Group
//!         /projection_<name>                 Group                name, source, target
//!             /synapse_props_<type>          Group                synapse_type, weight, ...
//!             /<name>                        Dataset{M, K}        column_<i>
//!     /inputs                                Group
//!         /input_<name>                      Group                name, size?
//!             /<stimulus>_properties         Group                population, parameters
//!             /<name>_input_sites            Dataset{S, 1..3}     column_<i>
//!
//! Within every group all child groups are walked before any dataset, so
//! synapse defaults are known before the connection rows are decoded. The
//! size of a population or projection is peeked from its data array before
//! it is declared. Sibling groups are visited by their `order` attribute
//! when present.

use std::path::Path;

use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
use tracing::{debug, info, warn};

use crate::{
    err::{Context, Result, SchemaError},
    handler::{ConnectionEvent, Endpoint, NetworkHandler},
    model::{Instance, Site, Stimulus},
    nml,
    raw::ReadOptions,
    syn::{SynapseField, SynapseProperties},
    Map,
};

/// Decoder for NetworkML HDF5 files.
#[derive(Debug, Clone, Default)]
pub struct Hdf5Reader {
    options: ReadOptions,
}

impl Hdf5Reader {
    pub fn new(options: ReadOptions) -> Self {
        Self { options }
    }

    /// Only forward instances whose `node_id` equals `node`; `None` accepts all.
    pub fn set_partition_filter(&mut self, node: Option<u32>) {
        self.options.partition = node;
    }

    pub fn parse_file<H: NetworkHandler + ?Sized>(&self, path: impl AsRef<Path>, handler: &mut H) -> Result<()> {
        let path = path.as_ref();
        info!("Reading NetworkML HDF5 from {path:?}");
        let file = hdf5::File::open(path).with_context(|| format!("Opening {path:?}"))?;
        let root = file
            .group(nml::ROOT)
            .with_context(|| format!("{path:?} has no /{} group", nml::ROOT))?;
        let mut walker = Walker::new(&self.options);
        walker
            .walk(&root, handler)
            .with_context(|| format!("Parsing NetworkML HDF5 {path:?}"))
    }
}

fn short_name(location: &hdf5::Location) -> String {
    location
        .name()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn has_attr(location: &hdf5::Location, name: &str) -> Result<bool> {
    Ok(location.attr_names()?.iter().any(|n| n == name))
}

/// Strings are stored either as scalars or as one-element arrays, in any of
/// the HDF5 string flavours; numbers are rendered as text.
fn attr_text(attr: &hdf5::Attribute) -> Option<String> {
    if attr.ndim() == 0 {
        if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
            return Some(s.as_str().to_string());
        }
        if let Ok(s) = attr.read_scalar::<VarLenAscii>() {
            return Some(s.as_str().to_string());
        }
        if let Ok(s) = attr.read_scalar::<FixedAscii<256>>() {
            return Some(s.as_str().to_string());
        }
        if let Ok(v) = attr.read_scalar::<f64>() {
            return Some(v.to_string());
        }
        if let Ok(v) = attr.read_scalar::<i64>() {
            return Some(v.to_string());
        }
    } else {
        if let Ok(s) = attr.read_raw::<VarLenUnicode>() {
            return s.first().map(|s| s.as_str().to_string());
        }
        if let Ok(s) = attr.read_raw::<VarLenAscii>() {
            return s.first().map(|s| s.as_str().to_string());
        }
        if let Ok(s) = attr.read_raw::<FixedAscii<256>>() {
            return s.first().map(|s| s.as_str().to_string());
        }
        if let Ok(v) = attr.read_raw::<f64>() {
            return v.first().map(|v| v.to_string());
        }
    }
    None
}

fn string_attr(location: &hdf5::Location, name: &str) -> Result<Option<String>> {
    if !has_attr(location, name)? {
        return Ok(None);
    }
    let attr = location.attr(name)?;
    match attr_text(&attr) {
        Some(s) => Ok(Some(s.trim().to_string())),
        None => anyhow::bail!("Attribute {name} of {} is neither text nor number", location.name()),
    }
}

fn number_attr(location: &hdf5::Location, name: &str) -> Result<Option<f64>> {
    if !has_attr(location, name)? {
        return Ok(None);
    }
    let attr = location.attr(name)?;
    if attr.ndim() == 0 {
        if let Ok(v) = attr.read_scalar::<f64>() {
            return Ok(Some(v));
        }
        if let Ok(v) = attr.read_scalar::<i64>() {
            return Ok(Some(v as f64));
        }
    } else if let Ok(v) = attr.read_raw::<f64>() {
        if let Some(v) = v.first() {
            return Ok(Some(*v));
        }
    }
    match attr_text(&attr) {
        Some(s) => Ok(Some(nml::number(name, &s)?)),
        None => anyhow::bail!("Attribute {name} of {} is not a number", location.name()),
    }
}

/// Label -> column index from the `column_<i>` attributes of an array.
fn column_map(ds: &hdf5::Dataset) -> Result<Map<String, usize>> {
    let mut columns = Map::new();
    for attr_name in ds.attr_names()? {
        let Some(idx) = attr_name.strip_prefix(nml::COLUMN_PREFIX) else {
            continue;
        };
        let Ok(idx) = idx.parse::<usize>() else {
            debug!("Ignoring attribute {attr_name} of {}", ds.name());
            continue;
        };
        if let Some(label) = string_attr(ds, &attr_name)? {
            columns.insert(label, idx);
        }
    }
    Ok(columns)
}

/// Row-major float table.
struct Table {
    name: String,
    rows: usize,
    cols: usize,
    data: Vec<f64>,
    columns: Map<String, usize>,
}

impl Table {
    fn read(ds: &hdf5::Dataset) -> Result<Self> {
        let name = ds.name();
        let shape = ds.shape();
        let (rows, cols) = match shape.as_slice() {
            [rows, cols] => (*rows, *cols),
            [rows] => (*rows, 1),
            _ => anyhow::bail!("Array {name} has shape {shape:?}; expected two dimensions"),
        };
        let data = ds
            .read_raw::<f64>()
            .with_context(|| format!("Reading array {name}"))?;
        let mut columns = column_map(ds)?;
        columns.retain(|label, idx| {
            let ok = *idx < cols;
            if !ok {
                warn!("Array {name}: column {label} at {idx} beyond width {cols}");
            }
            ok
        });
        Ok(Self {
            name,
            rows,
            cols,
            data,
            columns,
        })
    }

    /// Column index by label. Arrays without any column labels are read
    /// positionally using `position`.
    fn column(&self, label: &str, position: Option<usize>) -> Option<usize> {
        if self.columns.is_empty() {
            position.filter(|p| *p < self.cols)
        } else {
            self.columns.get(label).copied()
        }
    }

    fn required(&self, label: &str, position: Option<usize>) -> Result<usize> {
        self.column(label, position).ok_or_else(|| {
            SchemaError::MissingColumn {
                array: self.name.clone(),
                column: label.to_string(),
            }
            .into()
        })
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    fn index(&self, row: usize, col: usize, label: &str) -> Result<u64> {
        Ok(nml::from_float(label, self.get(row, col))?)
    }
}

fn rows(ds: &hdf5::Dataset) -> usize {
    ds.shape().first().copied().unwrap_or_default()
}

/// The array holding an item's data: the one named `name`, else the only one.
fn data_array<'d>(datasets: &'d [hdf5::Dataset], name: &str) -> Option<&'d hdf5::Dataset> {
    datasets
        .iter()
        .find(|ds| short_name(ds) == name)
        .or(match datasets {
            [only] => Some(only),
            _ => None,
        })
}

fn section_rank(name: &str) -> u64 {
    match name {
        nml::POPULATIONS => 0,
        nml::PROJECTIONS => 1,
        nml::INPUTS => 2,
        _ => u64::MAX,
    }
}

/// Child groups by `order` attribute, then well known section order, then
/// library order.
fn ordered_groups(group: &hdf5::Group) -> Result<Vec<hdf5::Group>> {
    let mut keyed = Vec::new();
    for (ix, child) in group.groups()?.into_iter().enumerate() {
        let rank = match number_attr(&child, nml::ORDER)? {
            Some(order) => order as u64,
            None => section_rank(&short_name(&child)),
        };
        keyed.push((rank, ix, child));
    }
    keyed.sort_by_key(|(rank, ix, _)| (*rank, *ix));
    Ok(keyed.into_iter().map(|(_, _, g)| g).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Populations,
    Projections,
    Inputs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Root,
    Section,
    Population,
    Projection,
    SynapseProps,
    Input,
    Stimulus,
    Other,
}

struct PopulationScope {
    name: String,
    cell_type: String,
    forwarded: usize,
}

struct ProjectionScope {
    name: String,
    source: String,
    target: String,
    globals: Map<String, SynapseProperties>,
}

struct InputScope {
    name: String,
    population: String,
    stimulus: Stimulus,
    size: Option<usize>,
}

/// Per parse decoder state.
struct Walker<'o> {
    options: &'o ReadOptions,
    parallel: bool,
    section: Section,
    population: Option<PopulationScope>,
    projection: Option<ProjectionScope>,
    input: Option<InputScope>,
}

impl<'o> Walker<'o> {
    fn new(options: &'o ReadOptions) -> Self {
        Self {
            options,
            parallel: false,
            section: Section::None,
            population: None,
            projection: None,
            input: None,
        }
    }

    fn walk<H: NetworkHandler + ?Sized>(&mut self, group: &hdf5::Group, handler: &mut H) -> Result<()> {
        let path = group.name();
        debug!("Entering group {path}");
        let datasets = group
            .datasets()
            .with_context(|| format!("Listing arrays of {path}"))?;
        let kind = self
            .enter(group, &datasets, handler)
            .with_context(|| format!("In group {path}"))?;
        for child in ordered_groups(group).with_context(|| format!("Listing groups of {path}"))? {
            self.walk(&child, handler)?;
        }
        self.declare(kind, &datasets, handler)
            .with_context(|| format!("In group {path}"))?;
        let data = self
            .data_name(kind)
            .and_then(|name| data_array(&datasets, &name));
        for ds in &datasets {
            match data {
                Some(data) if short_name(data) == short_name(ds) => self
                    .dataset(kind, ds, handler)
                    .with_context(|| format!("In array {}", ds.name()))?,
                _ => debug!("Ignoring array {}", ds.name()),
            }
        }
        self.leave(kind, handler)
            .with_context(|| format!("Leaving group {path}"))?;
        Ok(())
    }

    fn enter<H: NetworkHandler + ?Sized>(
        &mut self,
        group: &hdf5::Group,
        datasets: &[hdf5::Dataset],
        handler: &mut H,
    ) -> Result<GroupKind> {
        let name = short_name(group);
        let kind = match (self.section, name.as_str()) {
            (_, nml::ROOT) => GroupKind::Root,
            (Section::None, nml::POPULATIONS) => {
                self.section = Section::Populations;
                GroupKind::Section
            }
            (Section::None, nml::PROJECTIONS) => {
                self.section = Section::Projections;
                GroupKind::Section
            }
            (Section::None, nml::INPUTS) => {
                self.section = Section::Inputs;
                GroupKind::Section
            }
            (Section::Populations, _) if name.starts_with(nml::POPULATION_PREFIX) => {
                let pop = string_attr(group, nml::NAME)?
                    .or_else(|| nml::strip_prefix(&name, nml::POPULATION_PREFIX).map(str::to_string))
                    .unwrap_or_default();
                let cell_type = string_attr(group, nml::CELL_TYPE)?.unwrap_or_else(|| {
                    warn!("Population {pop} has no cell type");
                    String::new()
                });
                let size = data_array(datasets, &pop).map(rows);
                handler.handle_population(&pop, &cell_type, size)?;
                self.population = Some(PopulationScope {
                    name: pop,
                    cell_type,
                    forwarded: 0,
                });
                GroupKind::Population
            }
            (Section::Projections, _) if self.projection.is_none() && name.starts_with(nml::PROJECTION_PREFIX) => {
                let prj = string_attr(group, nml::NAME)?
                    .or_else(|| nml::strip_prefix(&name, nml::PROJECTION_PREFIX).map(str::to_string))
                    .unwrap_or_default();
                let source = string_attr(group, nml::SOURCE)?;
                let target = string_attr(group, nml::TARGET)?;
                if source.is_none() || target.is_none() {
                    warn!("Projection {prj} lacks source or target");
                }
                self.projection = Some(ProjectionScope {
                    name: prj,
                    source: source.unwrap_or_default(),
                    target: target.unwrap_or_default(),
                    globals: Map::new(),
                });
                GroupKind::Projection
            }
            (Section::Projections, _) if self.projection.is_some() && name.starts_with(nml::SYNAPSE_PROPS_PREFIX) => {
                let synapse_type = string_attr(group, nml::SYNAPSE_TYPE)?
                    .or_else(|| nml::strip_prefix(&name, nml::SYNAPSE_PROPS_PREFIX).map(str::to_string))
                    .unwrap_or_default();
                let mut props = SynapseProperties::default();
                for field in SynapseField::ALL {
                    if let Some(v) = number_attr(group, field.attr_name())? {
                        props.set(field, v);
                    }
                }
                if let Some(prj) = self.projection.as_mut() {
                    debug!("Projection {} synapse {synapse_type}: {props:?}", prj.name);
                    prj.globals.insert(synapse_type, props);
                }
                GroupKind::SynapseProps
            }
            (Section::Inputs, _) if self.input.is_none() && name.starts_with(nml::INPUT_PREFIX) => {
                let input = string_attr(group, nml::NAME)?
                    .or_else(|| nml::strip_prefix(&name, nml::INPUT_PREFIX).map(str::to_string))
                    .unwrap_or_default();
                let size = number_attr(group, nml::SIZE)?
                    .map(|v| nml::from_float(nml::SIZE, v))
                    .transpose()?
                    .map(|n| n as usize);
                self.input = Some(InputScope {
                    name: input,
                    population: String::new(),
                    stimulus: Stimulus::default(),
                    size,
                });
                GroupKind::Input
            }
            (Section::Inputs, _) if self.input.is_some() && name.ends_with(nml::PROPERTIES_SUFFIX) => {
                let kind = name.trim_end_matches(nml::PROPERTIES_SUFFIX).to_string();
                let mut stimulus = Stimulus::new(&kind);
                let mut population = None;
                for attr_name in group.attr_names()? {
                    let Some(value) = string_attr(group, &attr_name)? else {
                        continue;
                    };
                    match attr_name.as_str() {
                        nml::INPUT_POPULATION | nml::INPUT_CELL_GROUP => population = Some(value),
                        nml::ORDER => {}
                        _ => {
                            stimulus.params.insert(attr_name, value);
                        }
                    }
                }
                if let Some(input) = self.input.as_mut() {
                    input.population = population.unwrap_or_default();
                    input.stimulus = stimulus;
                }
                GroupKind::Stimulus
            }
            _ => {
                debug!("Ignoring unknown group {}", group.name());
                GroupKind::Other
            }
        };
        Ok(kind)
    }

    /// Runs after child groups and before arrays.
    fn declare<H: NetworkHandler + ?Sized>(
        &mut self,
        kind: GroupKind,
        datasets: &[hdf5::Dataset],
        handler: &mut H,
    ) -> Result<()> {
        match kind {
            GroupKind::Projection => {
                if let Some(prj) = self.projection.as_ref() {
                    let size = data_array(datasets, &prj.name).map(rows);
                    handler.handle_projection(&prj.name, &prj.source, &prj.target, &prj.globals, size)?;
                }
            }
            GroupKind::Input => {
                // size comes from the `size` attribute only
                if let Some(input) = self.input.as_ref() {
                    handler.handle_input_source(&input.name, &input.population, &input.stimulus, input.size)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Name of the array holding the data of the current item, if any.
    fn data_name(&self, kind: GroupKind) -> Option<String> {
        match kind {
            GroupKind::Population => self.population.as_ref().map(|pop| pop.name.clone()),
            GroupKind::Projection => self.projection.as_ref().map(|prj| prj.name.clone()),
            GroupKind::Input => self
                .input
                .as_ref()
                .map(|input| format!("{}{}", input.name, nml::SITES_SUFFIX)),
            _ => None,
        }
    }

    fn dataset<H: NetworkHandler + ?Sized>(
        &mut self,
        kind: GroupKind,
        ds: &hdf5::Dataset,
        handler: &mut H,
    ) -> Result<()> {
        let table = Table::read(ds)?;
        match kind {
            GroupKind::Population => self.locations(&table, handler),
            GroupKind::Projection => self.connections(&table, handler),
            GroupKind::Input => self.sites(&table, handler),
            _ => Ok(()),
        }
    }

    fn leave<H: NetworkHandler + ?Sized>(&mut self, kind: GroupKind, handler: &mut H) -> Result<()> {
        match kind {
            GroupKind::Section => self.section = Section::None,
            GroupKind::Population => {
                if let Some(pop) = self.population.take() {
                    info!("Population {}: dealt with {} instances", pop.name, pop.forwarded);
                }
            }
            GroupKind::Projection => {
                if let Some(prj) = self.projection.take() {
                    handler.finalise_projection(&prj.name, &prj.source, &prj.target)?;
                }
            }
            GroupKind::Input => {
                if let Some(input) = self.input.take() {
                    handler.finalise_input_source(&input.name)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn locations<H: NetworkHandler + ?Sized>(&mut self, table: &Table, handler: &mut H) -> Result<()> {
        let id_col = table.column(nml::ID, Some(0));
        let x_col = table.required(nml::X, Some(1))?;
        let y_col = table.required(nml::Y, Some(2))?;
        let z_col = table.required(nml::Z, Some(3))?;
        let node_col = table.column(nml::NODE_ID, Some(4));
        let Some(pop) = self.population.as_mut() else {
            return Ok(());
        };
        for row in 0..table.rows {
            let id = match id_col {
                Some(c) => table.index(row, c, nml::ID)?,
                None => row as u64,
            };
            let node_id = match node_col {
                Some(c) => nml::node_id(table.get(row, c))?,
                None => None,
            };
            if node_id.is_some() && !self.parallel {
                self.parallel = true;
                handler.set_parallel_status(true)?;
            }
            if let (Some(filter), Some(node)) = (self.options.partition, node_id) {
                if filter != node {
                    continue;
                }
            }
            let instance = Instance {
                id,
                x: table.get(row, x_col),
                y: table.get(row, y_col),
                z: table.get(row, z_col),
                node_id,
            };
            pop.forwarded += 1;
            handler.handle_location(&pop.name, &pop.cell_type, &instance)?;
        }
        Ok(())
    }

    /// Map a non standard column label onto (synapse type, field).
    fn synapse_column(&self, label: &str, prj: &ProjectionScope) -> Result<Option<(String, SynapseField)>> {
        for ty in prj.globals.keys() {
            for field in SynapseField::ALL {
                if label == nml::synapse_column(field.attr_name(), ty) {
                    return Ok(Some((ty.clone(), field)));
                }
            }
        }
        let Some(field) = SynapseField::ALL
            .iter()
            .filter(|f| label.contains(f.attr_name()))
            .max_by_key(|f| f.attr_name().len())
            .copied()
        else {
            debug!("Ignoring column {label} of projection {}", prj.name);
            return Ok(None);
        };
        let candidates = prj
            .globals
            .keys()
            .filter(|ty| label.contains(ty.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if let [ty] = candidates.as_slice() {
            return Ok(Some((ty.clone(), field)));
        }
        let err = SchemaError::AmbiguousSynapse {
            projection: prj.name.clone(),
            what: format!("column {label}"),
            candidates,
        };
        if self.options.strict_synapse_types {
            return Err(err.into());
        }
        warn!("{err}; column skipped");
        Ok(None)
    }

    fn connections<H: NetworkHandler + ?Sized>(&mut self, table: &Table, handler: &mut H) -> Result<()> {
        let Some(prj) = self.projection.as_ref() else {
            return Ok(());
        };
        let id_col = table.column(nml::ID, Some(0));
        let pre_col = table.required(nml::PRE_CELL_ID, Some(1))?;
        let post_col = table.required(nml::POST_CELL_ID, Some(2))?;
        let pre_segment_col = table.column(nml::PRE_SEGMENT_ID, None);
        let pre_fraction_col = table.column(nml::PRE_FRACTION_ALONG, None);
        let post_segment_col = table.column(nml::POST_SEGMENT_ID, None);
        let post_fraction_col = table.column(nml::POST_FRACTION_ALONG, None);
        let standard = [
            nml::ID,
            nml::PRE_CELL_ID,
            nml::POST_CELL_ID,
            nml::PRE_SEGMENT_ID,
            nml::PRE_FRACTION_ALONG,
            nml::POST_SEGMENT_ID,
            nml::POST_FRACTION_ALONG,
        ];
        let mut overrides = Vec::new();
        for (label, col) in &table.columns {
            if standard.contains(&label.as_str()) {
                continue;
            }
            if let Some((ty, field)) = self.synapse_column(label, prj)? {
                overrides.push((ty, field, *col));
            }
        }
        let segment = |row: usize, col: Option<usize>, label: &str| -> Result<u64> {
            match col {
                Some(c) => table.index(row, c, label),
                None => Ok(nml::DEFAULT_SEGMENT),
            }
        };
        let fraction = |row: usize, col: Option<usize>| col.map_or(nml::DEFAULT_FRACTION, |c| table.get(row, c));
        if prj.globals.is_empty() && table.rows > 0 {
            warn!("Projection {} has no synapse type; its connections are dropped", prj.name);
        }
        for row in 0..table.rows {
            let id = match id_col {
                Some(c) => table.index(row, c, nml::ID)?,
                None => row as u64,
            };
            let pre = Endpoint {
                cell_id: table.index(row, pre_col, nml::PRE_CELL_ID)?,
                segment_id: segment(row, pre_segment_col, nml::PRE_SEGMENT_ID)?,
                fraction_along: fraction(row, pre_fraction_col),
            };
            let post = Endpoint {
                cell_id: table.index(row, post_col, nml::POST_CELL_ID)?,
                segment_id: segment(row, post_segment_col, nml::POST_SEGMENT_ID)?,
                fraction_along: fraction(row, post_fraction_col),
            };
            let mut locals = prj.globals.clone();
            for (ty, field, col) in &overrides {
                if let Some(props) = locals.get_mut(ty) {
                    props.set(*field, table.get(row, *col));
                }
            }
            for (synapse_type, props) in &locals {
                handler.handle_connection(&ConnectionEvent {
                    projection: &prj.name,
                    id,
                    source: &prj.source,
                    target: &prj.target,
                    synapse_type,
                    pre,
                    post,
                    props: *props,
                })?;
            }
        }
        info!("Projection {}: {} connections", prj.name, table.rows);
        Ok(())
    }

    fn sites<H: NetworkHandler + ?Sized>(&mut self, table: &Table, handler: &mut H) -> Result<()> {
        let Some(input) = self.input.as_ref() else {
            return Ok(());
        };
        let cell_col = table.required(nml::CELL_ID, Some(0))?;
        let segment_col = table.column(nml::SEGMENT_ID, Some(1));
        let fraction_col = table.column(nml::FRACTION_ALONG, Some(2));
        for row in 0..table.rows {
            let site = Site {
                cell_id: table.index(row, cell_col, nml::CELL_ID)?,
                segment_id: match segment_col {
                    Some(c) => table.index(row, c, nml::SEGMENT_ID)?,
                    None => nml::DEFAULT_SEGMENT,
                },
                fraction_along: fraction_col.map_or(nml::DEFAULT_FRACTION, |c| table.get(row, c)),
            };
            handler.handle_single_input(&input.name, &site)?;
        }
        Ok(())
    }
}
