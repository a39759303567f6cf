//! Streaming NetworkML (XML) decoder.
//!
//! Elements are consumed one at a time; a small explicit [`State`] tracks the
//! open population, projection, connection and input. Each of those scopes is
//! dropped when its element closes, so an [`XmlReader`] can be reused for any
//! number of parses.
//!
//! Both schema shapes are understood:
//!
//! ```xml
//! <population name="P" cell_type="Cell">       <population name="P">
//!                                                 <cell_type>Cell</cell_type>
//! <projection name="C" source="P" target="P">  <projection name="C">
//!                                                 <source>P</source><target>P</target>
//! <synapse_props synapse_type="syn"            <synapse_props>
//!                weight="0.5"/>                  <synapse_type>syn</synapse_type>
//!                                                 <default_values weight="0.5"/>
//!                                               </synapse_props>
//! <connection id="0" pre_cell_id="0"           <connection id="0">
//!             post_cell_id="1"/>                 <pre cell_id="0"/><post cell_id="1"/>
//!                                               </connection>
//! ```
//!
//! Where both forms appear for the same item the attribute wins.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
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

type Attrs = Map<String, String>;

/// Decoder for NetworkML documents.
#[derive(Debug, Clone, Default)]
pub struct XmlReader {
    options: ReadOptions,
}

impl XmlReader {
    pub fn new(options: ReadOptions) -> Self {
        Self { options }
    }

    /// Only forward instances whose `node_id` equals `node`; `None` accepts all.
    pub fn set_partition_filter(&mut self, node: Option<u32>) {
        self.options.partition = node;
    }

    pub fn parse_file<H: NetworkHandler + ?Sized>(&self, path: impl AsRef<Path>, handler: &mut H) -> Result<()> {
        let path = path.as_ref();
        info!("Reading NetworkML from {path:?}");
        let file = File::open(path).with_context(|| format!("Opening {path:?}"))?;
        self.parse_reader(BufReader::new(file), handler)
            .with_context(|| format!("Parsing NetworkML {path:?}"))
    }

    pub fn parse_str<H: NetworkHandler + ?Sized>(&self, xml: &str, handler: &mut H) -> Result<()> {
        self.parse_reader(xml.as_bytes(), handler)
    }

    pub fn parse_reader<R: BufRead, H: NetworkHandler + ?Sized>(&self, rd: R, handler: &mut H) -> Result<()> {
        let mut reader = Reader::from_reader(rd);
        reader.trim_text(true);
        let mut state = State::new(&self.options);
        let mut buf = Vec::new();
        loop {
            let pos = reader.buffer_position();
            let event = reader
                .read_event_into(&mut buf)
                .with_context(|| format!("Malformed XML at byte {pos} in <{}>", state.path.join("/")))?;
            let res = match event {
                Event::Start(ref e) => state.start(e, handler),
                Event::Empty(ref e) => state.start(e, handler).and_then(|_| state.end(handler)),
                Event::End(_) => state.end(handler),
                Event::Text(ref t) => t
                    .unescape()
                    .map_err(anyhow::Error::from)
                    .map(|s| state.text.push_str(&s)),
                Event::CData(ref t) => {
                    state.text.push_str(&String::from_utf8_lossy(t.as_ref()));
                    Ok(())
                }
                Event::Eof => break,
                _ => Ok(()),
            };
            res.with_context(|| format!("At byte {pos} in <{}>", state.path.join("/")))?;
            buf.clear();
        }
        Ok(())
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart) -> Result<Attrs> {
    let mut attrs = Attrs::new();
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.trim().to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn required<'a>(attrs: &'a Attrs, element: &str, attribute: &str) -> Result<&'a str> {
    attrs.get(attribute).map(String::as_str).ok_or_else(|| {
        SchemaError::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
        .into()
    })
}

fn number(attrs: &Attrs, attribute: &str) -> Result<Option<f64>> {
    Ok(attrs
        .get(attribute)
        .map(|v| nml::number(attribute, v))
        .transpose()?)
}

fn index(attrs: &Attrs, attribute: &str) -> Result<Option<u64>> {
    Ok(attrs
        .get(attribute)
        .map(|v| nml::index(attribute, v))
        .transpose()?)
}

fn apply_synapse_attrs(props: &mut SynapseProperties, attrs: &Attrs) -> Result<()> {
    for field in SynapseField::ALL {
        if let Some(v) = number(attrs, field.attr_name())? {
            props.set(field, v);
        }
    }
    Ok(())
}

struct InstanceScope {
    id: u64,
    node_id: Option<u32>,
    keep: bool,
}

struct PopulationScope {
    name: String,
    cell_type: Option<String>,
    declared: bool,
    /// instance elements seen, used for ids not given explicitly
    seen: u64,
    forwarded: usize,
    instance: Option<InstanceScope>,
}

impl PopulationScope {
    fn declare<H: NetworkHandler + ?Sized>(&mut self, size: Option<usize>, handler: &mut H) -> Result<()> {
        if self.declared {
            return Ok(());
        }
        if self.cell_type.is_none() {
            warn!("Population {} has no cell type", self.name);
        }
        self.declared = true;
        handler.handle_population(&self.name, self.cell_type.as_deref().unwrap_or_default(), size)
    }
}

#[derive(Default)]
struct PendingSynapse {
    synapse_type: Option<String>,
    props: SynapseProperties,
}

struct ConnectionScope {
    id: u64,
    pre_cell: Option<u64>,
    pre_segment: Option<u64>,
    pre_fraction: Option<f64>,
    post_cell: Option<u64>,
    post_segment: Option<u64>,
    post_fraction: Option<f64>,
    /// snapshot of the projection defaults, overridden by `properties`
    locals: Map<String, SynapseProperties>,
}

struct ProjectionScope {
    name: String,
    source: Option<String>,
    target: Option<String>,
    declared: bool,
    globals: Map<String, SynapseProperties>,
    synapse: Option<PendingSynapse>,
    connection: Option<ConnectionScope>,
    seen: u64,
    emitted: usize,
}

impl ProjectionScope {
    fn declare<H: NetworkHandler + ?Sized>(&mut self, size: Option<usize>, handler: &mut H) -> Result<()> {
        if self.declared {
            return Ok(());
        }
        if self.source.is_none() || self.target.is_none() {
            warn!("Projection {} lacks source or target", self.name);
        }
        self.declared = true;
        handler.handle_projection(
            &self.name,
            self.source.as_deref().unwrap_or_default(),
            self.target.as_deref().unwrap_or_default(),
            &self.globals,
            size,
        )
    }
}

struct InputScope {
    name: String,
    population: Option<String>,
    stimulus: Option<Stimulus>,
    declared: bool,
}

impl InputScope {
    fn declare<H: NetworkHandler + ?Sized>(&mut self, size: Option<usize>, handler: &mut H) -> Result<()> {
        if self.declared {
            return Ok(());
        }
        self.declared = true;
        let stimulus = self.stimulus.clone().unwrap_or_default();
        handler.handle_input_source(
            &self.name,
            self.population.as_deref().unwrap_or_default(),
            &stimulus,
            size,
        )
    }
}

/// Per parse decoder state.
struct State<'o> {
    options: &'o ReadOptions,
    path: Vec<String>,
    text: String,
    parallel: bool,
    population: Option<PopulationScope>,
    projection: Option<ProjectionScope>,
    input: Option<InputScope>,
}

impl<'o> State<'o> {
    fn new(options: &'o ReadOptions) -> Self {
        Self {
            options,
            path: Vec::new(),
            text: String::new(),
            parallel: false,
            population: None,
            projection: None,
            input: None,
        }
    }

    fn start<H: NetworkHandler + ?Sized>(&mut self, e: &BytesStart, handler: &mut H) -> Result<()> {
        let name = local_name(e);
        let attrs = attributes(e)?;
        debug!("<{name}> {attrs:?}");
        self.text.clear();
        self.path.push(name.clone());
        match name.as_str() {
            nml::ROOT => {
                if let Some(units) = attrs.get(nml::LENGTH_UNITS) {
                    debug!("Length units: {units}");
                }
            }
            nml::POPULATIONS | nml::PROJECTIONS | nml::INPUTS | nml::NOTES => {}
            nml::POPULATION => {
                self.population = Some(PopulationScope {
                    name: required(&attrs, &name, nml::NAME)?.to_string(),
                    cell_type: attrs.get(nml::CELL_TYPE).cloned(),
                    declared: false,
                    seen: 0,
                    forwarded: 0,
                    instance: None,
                });
            }
            nml::CELL_TYPE => {}
            nml::INSTANCES => {
                if let Some(pop) = self.population.as_mut() {
                    let size = index(&attrs, nml::SIZE)?.map(|n| n as usize);
                    pop.declare(size, handler)?;
                }
            }
            nml::INSTANCE => self.open_instance(&attrs, handler)?,
            nml::LOCATION => self.location(&attrs, handler)?,
            nml::PROJECTION => {
                self.projection = Some(ProjectionScope {
                    name: required(&attrs, &name, nml::NAME)?.to_string(),
                    source: attrs.get(nml::SOURCE).cloned(),
                    target: attrs.get(nml::TARGET).cloned(),
                    declared: false,
                    globals: Map::new(),
                    synapse: None,
                    connection: None,
                    seen: 0,
                    emitted: 0,
                });
            }
            nml::SOURCE => {}
            nml::TARGET => {
                if let Some(input) = self.input.as_mut() {
                    input.population = attrs
                        .get(nml::INPUT_POPULATION)
                        .or_else(|| attrs.get(nml::INPUT_CELL_GROUP))
                        .cloned();
                }
            }
            nml::SYNAPSE_PROPS => {
                if let Some(prj) = self.projection.as_mut() {
                    let mut pending = PendingSynapse {
                        synapse_type: attrs.get(nml::SYNAPSE_TYPE).cloned(),
                        ..Default::default()
                    };
                    apply_synapse_attrs(&mut pending.props, &attrs)?;
                    prj.synapse = Some(pending);
                }
            }
            nml::SYNAPSE_TYPE => {}
            nml::DEFAULT_VALUES => {
                if let Some(pending) = self.projection.as_mut().and_then(|p| p.synapse.as_mut()) {
                    apply_synapse_attrs(&mut pending.props, &attrs)?;
                }
            }
            nml::CONNECTIONS => {
                if let Some(prj) = self.projection.as_mut() {
                    let size = index(&attrs, nml::SIZE)?.map(|n| n as usize);
                    prj.declare(size, handler)?;
                }
            }
            nml::CONNECTION => self.open_connection(&attrs)?,
            nml::PRE | nml::POST => self.endpoint(&name, &attrs)?,
            nml::PROPERTIES => self.properties(&attrs)?,
            nml::INPUT => {
                self.input = Some(InputScope {
                    name: required(&attrs, &name, nml::NAME)?.to_string(),
                    population: None,
                    stimulus: None,
                    declared: false,
                });
            }
            stim if nml::STIMULI.contains(&stim) => {
                if let Some(input) = self.input.as_mut() {
                    input.stimulus = Some(Stimulus {
                        kind: name.clone(),
                        params: attrs,
                    });
                }
            }
            nml::SITES => {
                if let Some(input) = self.input.as_mut() {
                    let size = index(&attrs, nml::SIZE)?.map(|n| n as usize);
                    input.declare(size, handler)?;
                }
            }
            nml::SITE => {
                if let Some(input) = self.input.as_mut() {
                    input.declare(None, handler)?;
                    let site = Site {
                        cell_id: nml::index(nml::CELL_ID, required(&attrs, &name, nml::CELL_ID)?)?,
                        segment_id: index(&attrs, nml::SEGMENT_ID)?.unwrap_or(nml::DEFAULT_SEGMENT),
                        fraction_along: number(&attrs, nml::FRACTION_ALONG)?.unwrap_or(nml::DEFAULT_FRACTION),
                    };
                    handler.handle_single_input(&input.name, &site)?;
                }
            }
            _ => debug!("Ignoring unknown element <{name}>"),
        }
        Ok(())
    }

    fn end<H: NetworkHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let Some(name) = self.path.pop() else {
            return Ok(());
        };
        let text = std::mem::take(&mut self.text).trim().to_string();
        match name.as_str() {
            nml::CELL_TYPE => {
                if let Some(pop) = self.population.as_mut() {
                    pop.cell_type.get_or_insert(text);
                }
            }
            nml::INSTANCE => {
                if let Some(pop) = self.population.as_mut() {
                    pop.instance = None;
                }
            }
            nml::INSTANCES => {
                if let Some(pop) = self.population.as_ref() {
                    info!("Population {}: dealt with {} instances", pop.name, pop.forwarded);
                }
            }
            nml::POPULATION => {
                if let Some(mut pop) = self.population.take() {
                    pop.declare(None, handler)?;
                }
            }
            nml::SOURCE => {
                if let (None, Some(prj)) = (&self.input, self.projection.as_mut()) {
                    prj.source.get_or_insert(text);
                }
            }
            nml::TARGET => {
                if let (None, Some(prj)) = (&self.input, self.projection.as_mut()) {
                    prj.target.get_or_insert(text);
                }
            }
            nml::SYNAPSE_TYPE => {
                if let Some(pending) = self.projection.as_mut().and_then(|p| p.synapse.as_mut()) {
                    pending.synapse_type.get_or_insert(text);
                }
            }
            nml::SYNAPSE_PROPS => {
                if let Some(prj) = self.projection.as_mut() {
                    match prj.synapse.take() {
                        Some(PendingSynapse {
                            synapse_type: Some(ty),
                            props,
                        }) => {
                            debug!("Projection {} synapse {ty}: {props:?}", prj.name);
                            prj.globals.insert(ty, props);
                        }
                        _ => warn!("Projection {}: synapse_props without synapse_type", prj.name),
                    }
                }
            }
            nml::CONNECTION => self.close_connection(handler)?,
            nml::PROJECTION => {
                if let Some(mut prj) = self.projection.take() {
                    prj.declare(None, handler)?;
                    if (prj.emitted as u64) < prj.seen {
                        warn!(
                            "Projection {} produced {} synapse events for {} connections",
                            prj.name, prj.emitted, prj.seen
                        );
                    }
                    info!("Projection {}: {} connections", prj.name, prj.seen);
                    handler.finalise_projection(
                        &prj.name,
                        prj.source.as_deref().unwrap_or_default(),
                        prj.target.as_deref().unwrap_or_default(),
                    )?;
                }
            }
            nml::INPUT => {
                if let Some(mut input) = self.input.take() {
                    input.declare(None, handler)?;
                    handler.finalise_input_source(&input.name)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn open_instance<H: NetworkHandler + ?Sized>(&mut self, attrs: &Attrs, handler: &mut H) -> Result<()> {
        let Some(pop) = self.population.as_mut() else {
            warn!("Instance outside of a population");
            return Ok(());
        };
        let id = index(attrs, nml::ID)?.unwrap_or(pop.seen);
        pop.seen += 1;
        let node_id = match number(attrs, nml::NODE_ID)? {
            Some(v) => nml::node_id(v)?,
            None => None,
        };
        if node_id.is_some() && !self.parallel {
            self.parallel = true;
            handler.set_parallel_status(true)?;
        }
        let keep = match (self.options.partition, node_id) {
            (Some(filter), Some(node)) => filter == node,
            _ => true,
        };
        if !keep {
            debug!("Skipping instance {id} of {} on node {node_id:?}", pop.name);
        }
        pop.instance = Some(InstanceScope { id, node_id, keep });
        Ok(())
    }

    fn location<H: NetworkHandler + ?Sized>(&mut self, attrs: &Attrs, handler: &mut H) -> Result<()> {
        let Some(pop) = self.population.as_mut() else {
            return Ok(());
        };
        let Some(instance) = pop.instance.as_ref() else {
            return Ok(());
        };
        if !instance.keep {
            return Ok(());
        }
        let instance = Instance {
            id: instance.id,
            x: number(attrs, nml::X)?.unwrap_or_default(),
            y: number(attrs, nml::Y)?.unwrap_or_default(),
            z: number(attrs, nml::Z)?.unwrap_or_default(),
            node_id: instance.node_id,
        };
        pop.declare(None, handler)?;
        pop.forwarded += 1;
        handler.handle_location(&pop.name, pop.cell_type.as_deref().unwrap_or_default(), &instance)
    }

    fn open_connection(&mut self, attrs: &Attrs) -> Result<()> {
        let Some(prj) = self.projection.as_mut() else {
            warn!("Connection outside of a projection");
            return Ok(());
        };
        let id = index(attrs, nml::ID)?.unwrap_or(prj.seen);
        prj.seen += 1;
        prj.connection = Some(ConnectionScope {
            id,
            pre_cell: index(attrs, nml::PRE_CELL_ID)?,
            pre_segment: index(attrs, nml::PRE_SEGMENT_ID)?,
            pre_fraction: number(attrs, nml::PRE_FRACTION_ALONG)?,
            post_cell: index(attrs, nml::POST_CELL_ID)?,
            post_segment: index(attrs, nml::POST_SEGMENT_ID)?,
            post_fraction: number(attrs, nml::POST_FRACTION_ALONG)?,
            locals: prj.globals.clone(),
        });
        Ok(())
    }

    /// `<pre>`/`<post>` children only fill what the connection's own
    /// attributes left open.
    fn endpoint(&mut self, name: &str, attrs: &Attrs) -> Result<()> {
        let Some(conn) = self.projection.as_mut().and_then(|p| p.connection.as_mut()) else {
            return Ok(());
        };
        let (cell, segment, fraction) = if name == nml::PRE {
            (&mut conn.pre_cell, &mut conn.pre_segment, &mut conn.pre_fraction)
        } else {
            (&mut conn.post_cell, &mut conn.post_segment, &mut conn.post_fraction)
        };
        if cell.is_none() {
            *cell = index(attrs, nml::CELL_ID)?;
        }
        if segment.is_none() {
            *segment = index(attrs, nml::SEGMENT_ID)?;
        }
        if fraction.is_none() {
            *fraction = number(attrs, nml::FRACTION_ALONG)?;
        }
        Ok(())
    }

    fn properties(&mut self, attrs: &Attrs) -> Result<()> {
        let strict = self.options.strict_synapse_types;
        let Some(prj) = self.projection.as_mut() else {
            return Ok(());
        };
        let Some(conn) = prj.connection.as_mut() else {
            return Ok(());
        };
        let synapse_type = match attrs.get(nml::SYNAPSE_TYPE) {
            Some(ty) => Some(ty.clone()),
            None if conn.locals.len() == 1 => conn.locals.keys().next().cloned(),
            None => None,
        };
        match synapse_type {
            Some(ty) => {
                let props = conn.locals.entry(ty).or_default();
                apply_synapse_attrs(props, attrs)?;
            }
            None => {
                let err = SchemaError::AmbiguousSynapse {
                    projection: prj.name.clone(),
                    what: format!("properties of connection {}", conn.id),
                    candidates: conn.locals.keys().cloned().collect(),
                };
                if strict {
                    return Err(err.into());
                }
                warn!("{err}; override skipped");
            }
        }
        Ok(())
    }

    fn close_connection<H: NetworkHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let Some(prj) = self.projection.as_mut() else {
            return Ok(());
        };
        let Some(conn) = prj.connection.take() else {
            return Ok(());
        };
        prj.declare(None, handler)?;
        let missing = |attribute: &str| SchemaError::MissingAttribute {
            element: nml::CONNECTION.to_string(),
            attribute: attribute.to_string(),
        };
        let pre = Endpoint {
            cell_id: conn.pre_cell.ok_or_else(|| missing(nml::PRE_CELL_ID))?,
            segment_id: conn.pre_segment.unwrap_or(nml::DEFAULT_SEGMENT),
            fraction_along: conn.pre_fraction.unwrap_or(nml::DEFAULT_FRACTION),
        };
        let post = Endpoint {
            cell_id: conn.post_cell.ok_or_else(|| missing(nml::POST_CELL_ID))?,
            segment_id: conn.post_segment.unwrap_or(nml::DEFAULT_SEGMENT),
            fraction_along: conn.post_fraction.unwrap_or(nml::DEFAULT_FRACTION),
        };
        if conn.locals.is_empty() {
            warn!("Connection {} of {} has no synapse type", conn.id, prj.name);
        }
        for (synapse_type, props) in &conn.locals {
            handler.handle_connection(&ConnectionEvent {
                projection: &prj.name,
                id: conn.id,
                source: prj.source.as_deref().unwrap_or_default(),
                target: prj.target.as_deref().unwrap_or_default(),
                synapse_type,
                pre,
                post,
                props: *props,
            })?;
        }
        prj.emitted += 1.min(conn.locals.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Event, RecordingHandler};

    const ATTR_FORM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<networkml xmlns="http://morphml.org/networkml/schema" lengthUnits="micron">
  <populations>
    <population name="P" cell_type="Cell">
      <instances size="2">
        <instance id="0"><location x="0" y="0" z="0"/></instance>
        <instance id="1"><location x="1" y="2" z="3"/></instance>
      </instances>
    </population>
  </populations>
  <projections units="Physiological Units">
    <projection name="C" source="P" target="P">
      <synapse_props synapse_type="exc" weight="1.0" internal_delay="1" pre_delay="2" post_delay="3" prop_delay="4"/>
      <connections size="3">
        <connection id="0" pre_cell_id="0" post_cell_id="1">
          <properties synapse_type="exc" weight="2.0"/>
        </connection>
        <connection id="1" pre_cell_id="1" post_cell_id="0"/>
        <connection id="2" pre_cell_id="1" post_cell_id="1"/>
      </connections>
    </projection>
  </projections>
</networkml>"#;

    const ELEMENT_FORM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<networkml xmlns="http://morphml.org/networkml/schema" lengthUnits="micron">
  <populations>
    <population name="P">
      <cell_type>Cell</cell_type>
      <instances size="2">
        <instance id="0"><location x="0" y="0" z="0"/></instance>
        <instance id="1"><location x="1" y="2" z="3"/></instance>
      </instances>
    </population>
  </populations>
  <projections units="Physiological Units">
    <projection name="C">
      <source>P</source>
      <target>P</target>
      <synapse_props>
        <synapse_type>exc</synapse_type>
        <default_values weight="1.0" internal_delay="1" pre_delay="2" post_delay="3" prop_delay="4"/>
      </synapse_props>
      <connections size="3">
        <connection id="0">
          <pre cell_id="0"/>
          <post cell_id="1"/>
          <properties weight="2.0"/>
        </connection>
        <connection id="1"><pre cell_id="1"/><post cell_id="0"/></connection>
        <connection id="2"><pre cell_id="1"/><post cell_id="1"/></connection>
      </connections>
    </projection>
  </projections>
</networkml>"#;

    fn record(xml: &str, options: ReadOptions) -> Vec<Event> {
        let mut rec = RecordingHandler::new();
        XmlReader::new(options).parse_str(xml, &mut rec).unwrap();
        rec.events
    }

    fn weights(events: &[Event]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Connection { props, .. } => Some(props.weight),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn both_shapes_agree() {
        let a = record(ATTR_FORM, ReadOptions::default());
        let b = record(ELEMENT_FORM, ReadOptions::default());
        assert_eq!(a, b);
    }

    #[test]
    fn event_order() {
        let ev = record(ATTR_FORM, ReadOptions::default());
        assert!(matches!(&ev[0], Event::Population { name, cell_type, size: Some(2) } if name == "P" && cell_type == "Cell"));
        assert!(matches!(&ev[1], Event::Location { instance, .. } if instance.id == 0));
        assert!(matches!(&ev[3], Event::Projection { size: Some(3), synapses, .. } if synapses.contains_key("exc")));
        assert!(matches!(ev.last(), Some(Event::ProjectionDone { name, .. }) if name == "C"));
        assert_eq!(ev.len(), 3 + 1 + 3 + 1);
    }

    #[test]
    fn local_overrides_do_not_leak() {
        let ev = record(ATTR_FORM, ReadOptions::default());
        assert_eq!(weights(&ev), vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn delays_stay_unsummed() {
        let ev = record(ATTR_FORM, ReadOptions::default());
        let Some(Event::Connection { props, pre, post, .. }) = ev.iter().find(|e| matches!(e, Event::Connection { .. })) else {
            panic!("no connection");
        };
        assert_eq!(props.internal_delay, 1.0);
        assert_eq!(props.prop_delay, 4.0);
        assert_eq!(props.total_delay(), 10.0);
        assert_eq!(pre.segment_id, 0);
        assert_eq!(post.fraction_along, 0.5);
    }

    #[test]
    fn attribute_wins_over_children() {
        let xml = r#"<networkml><projections>
            <projection name="C" source="A" target="B">
              <source>X</source><target>Y</target>
              <synapse_props synapse_type="s"/>
              <connections>
                <connection id="0" pre_cell_id="4" post_cell_id="5">
                  <pre cell_id="9" segment_id="2"/><post cell_id="9"/>
                </connection>
              </connections>
            </projection></projections></networkml>"#;
        let ev = record(xml, ReadOptions::default());
        let Some(Event::Connection { source, target, pre, post, .. }) = ev.iter().find(|e| matches!(e, Event::Connection { .. })) else {
            panic!("no connection");
        };
        assert_eq!((source.as_str(), target.as_str()), ("A", "B"));
        assert_eq!(pre.cell_id, 4);
        assert_eq!(pre.segment_id, 2);
        assert_eq!(post.cell_id, 5);
    }

    #[test]
    fn partition_filter() {
        let mut xml = String::from(r#"<networkml><populations><population name="P" cell_type="C"><instances size="10">"#);
        for i in 0..10 {
            xml.push_str(&format!(r#"<instance id="{i}" node_id="{}"><location x="{i}" y="0" z="0"/></instance>"#, i % 2));
        }
        xml.push_str("</instances></population></populations></networkml>");
        let ev = record(
            &xml,
            ReadOptions {
                partition: Some(0),
                ..Default::default()
            },
        );
        let ids = ev
            .iter()
            .filter_map(|e| match e {
                Event::Location { instance, .. } => Some(instance.id),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 2, 4, 6, 8]);
        assert_eq!(ev.iter().filter(|e| **e == Event::Parallel(true)).count(), 1);
        let first_location = ev.iter().position(|e| matches!(e, Event::Location { .. })).unwrap();
        let parallel = ev.iter().position(|e| *e == Event::Parallel(true)).unwrap();
        assert!(parallel < first_location);

        // no filter keeps all, still flags the stream as partitioned
        let ev = record(&xml, ReadOptions::default());
        assert_eq!(ev.iter().filter(|e| matches!(e, Event::Location { .. })).count(), 10);
        assert!(ev.contains(&Event::Parallel(true)));
    }

    #[test]
    fn negative_node_id_is_unpartitioned() {
        let xml = r#"<networkml><populations><population name="P" cell_type="C"><instances size="3">
            <instance id="0" node_id="-1"><location x="0" y="0" z="0"/></instance>
            <instance id="1" node_id="1"><location x="1" y="0" z="0"/></instance>
            <instance id="2"><location x="2" y="0" z="0"/></instance>
        </instances></population></populations></networkml>"#;
        let nodes = |partition| {
            record(
                xml,
                ReadOptions {
                    partition,
                    ..Default::default()
                },
            )
            .into_iter()
            .filter_map(|e| match e {
                Event::Location { instance, .. } => Some((instance.id, instance.node_id)),
                _ => None,
            })
            .collect::<Vec<_>>()
        };
        assert_eq!(nodes(None), vec![(0, None), (1, Some(1)), (2, None)]);
        assert_eq!(nodes(Some(0)), vec![(0, None), (2, None)]);

        let ev = record(xml, ReadOptions::default());
        let parallel = ev.iter().position(|e| *e == Event::Parallel(true)).unwrap();
        let second = ev.iter().position(|e| matches!(e, Event::Location { instance, .. } if instance.id == 1)).unwrap();
        // set by the first real node id, not by -1
        assert_eq!(parallel + 1, second);
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let noisy = ATTR_FORM.replace(
            "<projections",
            r#"<extension foo="bar"><deep>text</deep></extension><projections"#,
        );
        assert_eq!(
            record(&noisy, ReadOptions::default()),
            record(ATTR_FORM, ReadOptions::default())
        );
    }

    #[test]
    fn ambiguous_properties() {
        let xml = r#"<networkml><projections>
            <projection name="C" source="P" target="P">
              <synapse_props synapse_type="a" weight="1"/>
              <synapse_props synapse_type="b" weight="1"/>
              <connections size="1">
                <connection id="0" pre_cell_id="0" post_cell_id="1"><properties weight="3"/></connection>
              </connections>
            </projection></projections></networkml>"#;
        // lenient: override skipped, both types still emitted with defaults
        let ev = record(xml, ReadOptions::default());
        assert_eq!(weights(&ev), vec![1.0, 1.0]);
        let strict = XmlReader::new(ReadOptions {
            strict_synapse_types: true,
            ..Default::default()
        });
        let err = strict.parse_str(xml, &mut RecordingHandler::new()).unwrap_err();
        assert!(format!("{err:#}").contains("cannot resolve synapse type"));
    }

    #[test]
    fn projection_without_connections() {
        let xml = r#"<networkml><projections><projection name="C" source="P" target="P"/></projections></networkml>"#;
        let ev = record(xml, ReadOptions::default());
        assert_eq!(ev.len(), 2);
        assert!(matches!(&ev[0], Event::Projection { size: None, .. }));
        assert!(matches!(&ev[1], Event::ProjectionDone { .. }));
    }

    #[test]
    fn inputs() {
        let xml = r#"<networkml><inputs units="SI Units">
            <input name="stim">
              <random_stim frequency="20" synaptic_mechanism="DoubExpSyn"/>
              <target population="P">
                <sites size="2">
                  <site cell_id="0"/>
                  <site cell_id="3" segment_id="1" fraction_along="0.25"/>
                </sites>
              </target>
            </input></inputs></networkml>"#;
        let ev = record(xml, ReadOptions::default());
        assert_eq!(ev.len(), 4);
        let Event::Input { name, population, stimulus, size } = &ev[0] else {
            panic!("expected input");
        };
        assert_eq!((name.as_str(), population.as_str(), *size), ("stim", "P", Some(2)));
        assert_eq!(stimulus.kind, "random_stim");
        assert_eq!(stimulus.number("frequency"), Some(20.0));
        assert_eq!(
            ev[2],
            Event::Site {
                input: "stim".into(),
                site: Site {
                    cell_id: 3,
                    segment_id: 1,
                    fraction_along: 0.25
                }
            }
        );
        assert_eq!(ev[3], Event::InputDone { name: "stim".into() });
    }

    #[test]
    fn errors_name_the_element() {
        let xml = r#"<networkml><populations><population name="P" cell_type="C"><instances>
            <instance id="0"><location x="one" y="0" z="0"/></instance>
            </instances></population></populations></networkml>"#;
        let err = XmlReader::default()
            .parse_str(xml, &mut RecordingHandler::new())
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("networkml/populations/population/instances/instance/location"), "{msg}");
        assert!(msg.contains("'x'"), "{msg}");
    }

    #[test]
    fn reader_is_reusable() {
        let reader = XmlReader::default();
        let mut a = RecordingHandler::new();
        let mut b = RecordingHandler::new();
        reader.parse_str(ATTR_FORM, &mut a).unwrap();
        reader.parse_str(ATTR_FORM, &mut b).unwrap();
        assert_eq!(a.events, b.events);
    }
}
