//! Encoders: write a [`NetworkModel`] as NetworkML XML or HDF5.
//!
//! Output is deterministic: populations, projections and inputs in model
//! order, every instance and connection with its explicit id. Whatever is
//! written here reads back through `sax`/`h5` into an equal model.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use hdf5::types::VarLenUnicode;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use tracing::info;

use crate::{
    err::{anyhow, bail, Context, Result},
    handler::Endpoint,
    model::{Connection, InputSource, NetworkModel, Population, Projection},
    nml,
    raw::{Precision, WriteOptions, XmlStyle},
    syn::{SynapseField, SynapseProperties},
};

type XmlWriter<W> = Writer<W>;

fn open<W: Write>(writer: &mut XmlWriter<W>, elem: BytesStart) -> Result<()> {
    writer.write_event(Event::Start(elem))?;
    Ok(())
}

fn close<W: Write>(writer: &mut XmlWriter<W>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn empty<W: Write>(writer: &mut XmlWriter<W>, elem: BytesStart) -> Result<()> {
    writer.write_event(Event::Empty(elem))?;
    Ok(())
}

fn text_element<W: Write>(writer: &mut XmlWriter<W>, name: &str, text: &str) -> Result<()> {
    open(writer, BytesStart::new(name))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    close(writer, name)
}

fn push<T: ToString>(elem: &mut BytesStart, key: &str, value: T) {
    let value = value.to_string();
    elem.push_attribute((key, value.as_str()));
}

fn push_synapse_fields(elem: &mut BytesStart, props: &SynapseProperties) {
    for field in SynapseField::ALL {
        push(elem, field.attr_name(), props.get(field));
    }
}

/// Write `model` as a NetworkML document.
pub fn write_xml<W: Write>(model: &NetworkModel, out: W, options: &WriteOptions) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut root = BytesStart::new(nml::ROOT);
    root.push_attribute(("xmlns", nml::NAMESPACE));
    root.push_attribute(("xmlns:meta", nml::META_NAMESPACE));
    root.push_attribute(("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"));
    root.push_attribute(("xsi:schemaLocation", nml::SCHEMA_LOCATION));
    root.push_attribute((nml::LENGTH_UNITS, "micron"));
    open(&mut writer, root)?;
    if !options.notes.is_empty() {
        text_element(&mut writer, "meta:notes", &options.notes)?;
    }

    if !model.populations.is_empty() {
        open(&mut writer, BytesStart::new(nml::POPULATIONS))?;
        for pop in &model.populations {
            xml_population(&mut writer, pop, options.xml_style)?;
        }
        close(&mut writer, nml::POPULATIONS)?;
    }

    if !model.projections.is_empty() {
        let mut elem = BytesStart::new(nml::PROJECTIONS);
        elem.push_attribute((nml::UNITS, nml::PHYSIOLOGICAL_UNITS));
        open(&mut writer, elem)?;
        for prj in &model.projections {
            xml_projection(&mut writer, prj, options.xml_style)?;
        }
        close(&mut writer, nml::PROJECTIONS)?;
    }

    if !model.inputs.is_empty() {
        let mut elem = BytesStart::new(nml::INPUTS);
        elem.push_attribute((nml::UNITS, "SI Units"));
        open(&mut writer, elem)?;
        for input in &model.inputs {
            xml_input(&mut writer, input)?;
        }
        close(&mut writer, nml::INPUTS)?;
    }

    close(&mut writer, nml::ROOT)?;
    writer.get_mut().write_all(b"\n")?;
    Ok(())
}

pub fn write_xml_file(model: &NetworkModel, path: impl AsRef<Path>, options: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    info!("Writing NetworkML to {path:?}");
    let file = File::create(path).with_context(|| format!("Creating {path:?}"))?;
    let mut out = BufWriter::new(file);
    write_xml(model, &mut out, options).with_context(|| format!("Writing NetworkML {path:?}"))?;
    out.flush().with_context(|| format!("Flushing {path:?}"))?;
    Ok(())
}

pub fn to_xml_string(model: &NetworkModel, options: &WriteOptions) -> Result<String> {
    let mut buf = Vec::new();
    write_xml(model, &mut buf, options)?;
    Ok(String::from_utf8(buf)?)
}

fn xml_population<W: Write>(writer: &mut XmlWriter<W>, pop: &Population, style: XmlStyle) -> Result<()> {
    let mut elem = BytesStart::new(nml::POPULATION);
    push(&mut elem, nml::NAME, &pop.name);
    if style == XmlStyle::Attributes {
        push(&mut elem, nml::CELL_TYPE, &pop.cell_type);
    }
    open(writer, elem)?;
    if style == XmlStyle::Elements {
        text_element(writer, nml::CELL_TYPE, &pop.cell_type)?;
    }
    if !pop.instances.is_empty() {
        let mut elem = BytesStart::new(nml::INSTANCES);
        push(&mut elem, nml::SIZE, pop.size());
        open(writer, elem)?;
        for instance in &pop.instances {
            let mut elem = BytesStart::new(nml::INSTANCE);
            push(&mut elem, nml::ID, instance.id);
            if let Some(node) = instance.node_id {
                push(&mut elem, nml::NODE_ID, node);
            }
            open(writer, elem)?;
            let mut loc = BytesStart::new(nml::LOCATION);
            push(&mut loc, nml::X, instance.x);
            push(&mut loc, nml::Y, instance.y);
            push(&mut loc, nml::Z, instance.z);
            empty(writer, loc)?;
            close(writer, nml::INSTANCE)?;
        }
        close(writer, nml::INSTANCES)?;
    }
    close(writer, nml::POPULATION)
}

/// Readers give every connection exactly the projection's synapse types, so
/// anything else cannot be stored faithfully.
fn check_synapse_types(prj: &Projection) -> Result<()> {
    for conn in &prj.connections {
        if let Some(ty) = conn.synapses.keys().find(|ty| !prj.synapses.contains_key(*ty)) {
            bail!(
                "Connection {} of {} uses synapse type {ty} unknown to the projection",
                conn.id,
                prj.name
            );
        }
        if let Some(ty) = prj.synapses.keys().find(|ty| !conn.synapses.contains_key(*ty)) {
            bail!("Connection {} of {} lacks synapse type {ty}", conn.id, prj.name);
        }
    }
    Ok(())
}

/// Per type fields of `conn` that differ from the projection defaults.
fn overrides<'c>(prj: &Projection, conn: &'c Connection) -> Vec<(&'c str, Vec<(SynapseField, f64)>)> {
    let mut out = Vec::new();
    for (ty, props) in &conn.synapses {
        let base = prj.synapses.get(ty).copied().unwrap_or_default();
        let diff = props.diff(&base);
        if !diff.is_empty() {
            out.push((ty.as_str(), diff));
        }
    }
    out
}

fn push_endpoint(elem: &mut BytesStart, prefix: &str, end: &Endpoint) {
    push(elem, &format!("{prefix}_{}", nml::CELL_ID), end.cell_id);
    if !end.is_default_site() {
        push(elem, &format!("{prefix}_{}", nml::SEGMENT_ID), end.segment_id);
        push(elem, &format!("{prefix}_{}", nml::FRACTION_ALONG), end.fraction_along);
    }
}

fn endpoint_element(name: &str, end: &Endpoint) -> BytesStart<'static> {
    let mut elem = BytesStart::new(name.to_string());
    push(&mut elem, nml::CELL_ID, end.cell_id);
    if !end.is_default_site() {
        push(&mut elem, nml::SEGMENT_ID, end.segment_id);
        push(&mut elem, nml::FRACTION_ALONG, end.fraction_along);
    }
    elem
}

fn xml_projection<W: Write>(writer: &mut XmlWriter<W>, prj: &Projection, style: XmlStyle) -> Result<()> {
    check_synapse_types(prj)?;
    let mut elem = BytesStart::new(nml::PROJECTION);
    push(&mut elem, nml::NAME, &prj.name);
    if style == XmlStyle::Attributes {
        push(&mut elem, nml::SOURCE, &prj.source);
        push(&mut elem, nml::TARGET, &prj.target);
    }
    open(writer, elem)?;
    if style == XmlStyle::Elements {
        text_element(writer, nml::SOURCE, &prj.source)?;
        text_element(writer, nml::TARGET, &prj.target)?;
    }

    for (ty, props) in &prj.synapses {
        match style {
            XmlStyle::Attributes => {
                let mut elem = BytesStart::new(nml::SYNAPSE_PROPS);
                push(&mut elem, nml::SYNAPSE_TYPE, ty);
                push_synapse_fields(&mut elem, props);
                empty(writer, elem)?;
            }
            XmlStyle::Elements => {
                open(writer, BytesStart::new(nml::SYNAPSE_PROPS))?;
                text_element(writer, nml::SYNAPSE_TYPE, ty)?;
                let mut elem = BytesStart::new(nml::DEFAULT_VALUES);
                push_synapse_fields(&mut elem, props);
                empty(writer, elem)?;
                close(writer, nml::SYNAPSE_PROPS)?;
            }
        }
    }

    if !prj.connections.is_empty() {
        let mut elem = BytesStart::new(nml::CONNECTIONS);
        push(&mut elem, nml::SIZE, prj.size());
        open(writer, elem)?;
        for conn in &prj.connections {
            let mut elem = BytesStart::new(nml::CONNECTION);
            push(&mut elem, nml::ID, conn.id);
            if style == XmlStyle::Attributes {
                push_endpoint(&mut elem, nml::PRE, &conn.pre);
                push_endpoint(&mut elem, nml::POST, &conn.post);
            }
            let props = overrides(prj, conn);
            if style == XmlStyle::Attributes && props.is_empty() {
                empty(writer, elem)?;
                continue;
            }
            open(writer, elem)?;
            if style == XmlStyle::Elements {
                empty(writer, endpoint_element(nml::PRE, &conn.pre))?;
                empty(writer, endpoint_element(nml::POST, &conn.post))?;
            }
            for (ty, diff) in props {
                let mut elem = BytesStart::new(nml::PROPERTIES);
                push(&mut elem, nml::SYNAPSE_TYPE, ty);
                for (field, value) in diff {
                    push(&mut elem, field.attr_name(), value);
                }
                empty(writer, elem)?;
            }
            close(writer, nml::CONNECTION)?;
        }
        close(writer, nml::CONNECTIONS)?;
    }
    close(writer, nml::PROJECTION)
}

fn xml_input<W: Write>(writer: &mut XmlWriter<W>, input: &InputSource) -> Result<()> {
    let mut elem = BytesStart::new(nml::INPUT);
    push(&mut elem, nml::NAME, &input.name);
    open(writer, elem)?;
    if !input.stimulus.kind.is_empty() {
        let mut elem = BytesStart::new(input.stimulus.kind.as_str());
        for (k, v) in &input.stimulus.params {
            push(&mut elem, k, v);
        }
        empty(writer, elem)?;
    }
    let mut target = BytesStart::new(nml::TARGET);
    push(&mut target, nml::INPUT_POPULATION, &input.population);
    if input.size.is_none() && input.sites.is_empty() {
        empty(writer, target)?;
    } else {
        open(writer, target)?;
        let mut sites = BytesStart::new(nml::SITES);
        if let Some(size) = input.size {
            push(&mut sites, nml::SIZE, size);
        }
        open(writer, sites)?;
        for site in &input.sites {
            let mut elem = BytesStart::new(nml::SITE);
            push(&mut elem, nml::CELL_ID, site.cell_id);
            push(&mut elem, nml::SEGMENT_ID, site.segment_id);
            push(&mut elem, nml::FRACTION_ALONG, site.fraction_along);
            empty(writer, elem)?;
        }
        close(writer, nml::SITES)?;
        close(writer, nml::TARGET)?;
    }
    close(writer, nml::INPUT)
}

fn str_attr(location: &hdf5::Location, name: &str, value: &str) -> Result<()> {
    let value: VarLenUnicode = value
        .parse()
        .map_err(|e| anyhow!("Cannot store attribute {name}={value:?}: {e:?}"))?;
    location
        .new_attr::<VarLenUnicode>()
        .shape(())
        .create(name)
        .with_context(|| format!("Creating attribute {name} on {}", location.name()))?
        .write_scalar(&value)?;
    Ok(())
}

fn order_attr(location: &hdf5::Location, order: usize) -> Result<()> {
    location
        .new_attr::<i64>()
        .shape(())
        .create(nml::ORDER)?
        .write_scalar(&(order as i64))?;
    Ok(())
}

/// Row-major float table with `column_<i>` labels.
struct TableOut {
    labels: Vec<String>,
    data: Vec<f64>,
}

impl TableOut {
    fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            data: Vec::new(),
        }
    }

    fn row(&mut self, values: &[f64]) {
        self.data.extend_from_slice(values);
    }

    fn rows(&self) -> usize {
        self.data.len() / self.labels.len().max(1)
    }

    fn write(&self, group: &hdf5::Group, name: &str, precision: Precision) -> Result<()> {
        let shape = (self.rows(), self.labels.len());
        let ds = match precision {
            Precision::Double => {
                let ds = group.new_dataset::<f64>().shape(shape).create(name)?;
                ds.write_raw(self.data.as_slice())?;
                ds
            }
            Precision::Single => {
                let data = self.data.iter().map(|v| *v as f32).collect::<Vec<_>>();
                let ds = group.new_dataset::<f32>().shape(shape).create(name)?;
                ds.write_raw(data.as_slice())?;
                ds
            }
        };
        for (ix, label) in self.labels.iter().enumerate() {
            str_attr(&ds, &format!("{}{ix}", nml::COLUMN_PREFIX), label)?;
        }
        Ok(())
    }
}

/// Write `model` as a NetworkML HDF5 file, replacing any existing file.
pub fn write_hdf5_file(model: &NetworkModel, path: impl AsRef<Path>, options: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    info!("Writing NetworkML HDF5 to {path:?}");
    let file = hdf5::File::create(path).with_context(|| format!("Creating {path:?}"))?;
    let root = file.create_group(nml::ROOT)?;
    if !options.notes.is_empty() {
        str_attr(&root, nml::NOTES, &options.notes)?;
    }
    str_attr(&root, nml::LENGTH_UNITS, "micron")?;
    h5_populations(&root, model, options.precision)
        .and_then(|_| h5_projections(&root, model, options.precision))
        .and_then(|_| h5_inputs(&root, model, options.precision))
        .with_context(|| format!("Writing NetworkML HDF5 {path:?}"))?;
    file.flush()?;
    Ok(())
}

fn h5_populations(root: &hdf5::Group, model: &NetworkModel, precision: Precision) -> Result<()> {
    let pops = root.create_group(nml::POPULATIONS)?;
    order_attr(&pops, 0)?;
    for (ix, pop) in model.populations.iter().enumerate() {
        let group = pops.create_group(&format!("{}{}", nml::POPULATION_PREFIX, pop.name))?;
        str_attr(&group, nml::NAME, &pop.name)?;
        str_attr(&group, nml::CELL_TYPE, &pop.cell_type)?;
        order_attr(&group, ix)?;
        if pop.instances.is_empty() {
            continue;
        }
        let partitioned = pop.instances.iter().any(|i| i.node_id.is_some());
        let mut labels = vec![nml::ID, nml::X, nml::Y, nml::Z];
        if partitioned {
            labels.push(nml::NODE_ID);
        }
        let mut table = TableOut::new(labels.into_iter().map(String::from).collect());
        for i in &pop.instances {
            let mut row = vec![i.id as f64, i.x, i.y, i.z];
            if partitioned {
                // -1 marks an instance on no particular node
                row.push(i.node_id.map_or(-1.0, f64::from));
            }
            table.row(&row);
        }
        table.write(&group, &pop.name, precision)?;
    }
    Ok(())
}

fn h5_projections(root: &hdf5::Group, model: &NetworkModel, precision: Precision) -> Result<()> {
    let prjs = root.create_group(nml::PROJECTIONS)?;
    order_attr(&prjs, 1)?;
    str_attr(&prjs, nml::UNITS, nml::PHYSIOLOGICAL_UNITS)?;
    for (ix, prj) in model.projections.iter().enumerate() {
        let group = prjs.create_group(&format!("{}{}", nml::PROJECTION_PREFIX, prj.name))?;
        str_attr(&group, nml::NAME, &prj.name)?;
        str_attr(&group, nml::SOURCE, &prj.source)?;
        str_attr(&group, nml::TARGET, &prj.target)?;
        order_attr(&group, ix)?;
        check_synapse_types(prj)?;
        for (jx, (ty, props)) in prj.synapses.iter().enumerate() {
            let syn = group.create_group(&format!("{}{ty}", nml::SYNAPSE_PROPS_PREFIX))?;
            str_attr(&syn, nml::SYNAPSE_TYPE, ty)?;
            for field in SynapseField::ALL {
                str_attr(&syn, field.attr_name(), &props.get(field).to_string())?;
            }
            order_attr(&syn, jx)?;
        }
        if prj.connections.is_empty() {
            continue;
        }

        let pre_sites = prj.connections.iter().any(|c| !c.pre.is_default_site());
        let post_sites = prj.connections.iter().any(|c| !c.post.is_default_site());
        // (type, field) pairs where some connection deviates from the default
        let mut varying = Vec::new();
        for (ty, base) in &prj.synapses {
            for field in SynapseField::ALL {
                let deviates = prj
                    .connections
                    .iter()
                    .filter_map(|c| c.synapses.get(ty))
                    .any(|p| p.get(field) != base.get(field));
                if deviates {
                    varying.push((ty.as_str(), field, base.get(field)));
                }
            }
        }

        let mut labels = vec![
            nml::ID.to_string(),
            nml::PRE_CELL_ID.to_string(),
            nml::POST_CELL_ID.to_string(),
        ];
        if pre_sites {
            labels.push(nml::PRE_SEGMENT_ID.to_string());
            labels.push(nml::PRE_FRACTION_ALONG.to_string());
        }
        if post_sites {
            labels.push(nml::POST_SEGMENT_ID.to_string());
            labels.push(nml::POST_FRACTION_ALONG.to_string());
        }
        for (ty, field, _) in &varying {
            labels.push(nml::synapse_column(field.attr_name(), ty));
        }
        let mut table = TableOut::new(labels);
        for conn in &prj.connections {
            let mut row = vec![conn.id as f64, conn.pre.cell_id as f64, conn.post.cell_id as f64];
            if pre_sites {
                row.push(conn.pre.segment_id as f64);
                row.push(conn.pre.fraction_along);
            }
            if post_sites {
                row.push(conn.post.segment_id as f64);
                row.push(conn.post.fraction_along);
            }
            for (ty, field, default) in &varying {
                row.push(conn.synapses.get(*ty).map_or(*default, |p| p.get(*field)));
            }
            table.row(&row);
        }
        table.write(&group, &prj.name, precision)?;
    }
    Ok(())
}

fn h5_inputs(root: &hdf5::Group, model: &NetworkModel, precision: Precision) -> Result<()> {
    if model.inputs.is_empty() {
        return Ok(());
    }
    let inputs = root.create_group(nml::INPUTS)?;
    order_attr(&inputs, 2)?;
    for (ix, input) in model.inputs.iter().enumerate() {
        let group = inputs.create_group(&format!("{}{}", nml::INPUT_PREFIX, input.name))?;
        str_attr(&group, nml::NAME, &input.name)?;
        order_attr(&group, ix)?;
        if let Some(size) = input.size {
            str_attr(&group, nml::SIZE, &size.to_string())?;
        }
        let props = group.create_group(&format!("{}{}", input.stimulus.kind, nml::PROPERTIES_SUFFIX))?;
        str_attr(&props, nml::INPUT_POPULATION, &input.population)?;
        for (k, v) in &input.stimulus.params {
            str_attr(&props, k, v)?;
        }
        if input.sites.is_empty() {
            continue;
        }
        let mut table = TableOut::new(vec![
            nml::CELL_ID.to_string(),
            nml::SEGMENT_ID.to_string(),
            nml::FRACTION_ALONG.to_string(),
        ]);
        for site in &input.sites {
            table.row(&[site.cell_id as f64, site.segment_id as f64, site.fraction_along]);
        }
        table.write(&group, &format!("{}{}", input.name, nml::SITES_SUFFIX), precision)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Instance, Stimulus},
        sax::XmlReader,
    };

    fn sample() -> NetworkModel {
        let mut net = NetworkModel::new();
        let pop = net.add_population("P", "Cell").unwrap();
        pop.add_instance(0.0, 0.0, 0.0);
        pop.add_instance(1.0, 2.0, 3.0);
        pop.add_instance(4.0, 5.0, 6.0);
        let prj = net.add_projection("C", "P", "P").unwrap();
        prj.add_synapse(
            "syn",
            SynapseProperties {
                weight: 0.5,
                threshold: -50.0,
                ..Default::default()
            },
        );
        prj.add_connection(0, 1);
        prj.add_connection(1, 2);
        net
    }

    fn xml_round_trip(net: &NetworkModel, style: XmlStyle) -> NetworkModel {
        let options = WriteOptions {
            xml_style: style,
            ..Default::default()
        };
        let xml = to_xml_string(net, &options).unwrap();
        let mut back = NetworkModel::new();
        XmlReader::default().parse_str(&xml, &mut back).unwrap();
        back
    }

    #[test]
    fn xml_both_styles() {
        let net = sample();
        assert_eq!(xml_round_trip(&net, XmlStyle::Attributes), net);
        assert_eq!(xml_round_trip(&net, XmlStyle::Elements), net);
    }

    #[test]
    fn attribute_style_layout() {
        let xml = to_xml_string(&sample(), &WriteOptions::default()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(r#"<population name="P" cell_type="Cell">"#));
        assert!(xml.contains(r#"<connection id="1" pre_cell_id="1" post_cell_id="2"/>"#));
        assert!(xml.contains(r#"weight="0.5" threshold="-50""#));
        assert!(!xml.contains("<properties"));
    }

    #[test]
    fn overrides_are_written_as_properties() {
        let mut net = sample();
        let prj = net.projection_mut("C").unwrap();
        let mut synapses = prj.synapses.clone();
        synapses.get_mut("syn").unwrap().weight = 2.0;
        prj.connect(
            Endpoint {
                cell_id: 2,
                segment_id: 3,
                fraction_along: 0.1,
            },
            Endpoint::cell(0),
            synapses,
        );
        let xml = to_xml_string(&net, &WriteOptions::default()).unwrap();
        assert!(xml.contains(r#"<properties synapse_type="syn" weight="2"/>"#));
        assert!(xml.contains(r#"pre_segment_id="3""#));
        assert_eq!(xml_round_trip(&net, XmlStyle::Attributes), net);
        assert_eq!(xml_round_trip(&net, XmlStyle::Elements), net);
    }

    #[test]
    fn partitions_and_inputs_survive() {
        let mut net = NetworkModel::new();
        let pop = net.add_population("Q", "Gran").unwrap();
        for i in 0..4 {
            pop.push(Instance::new(i, i as f64, 0.0, -1.5).on_node((i % 2) as u32));
        }
        let input = net
            .add_input(
                "drive",
                "Q",
                Stimulus::new(nml::PULSE_INPUT)
                    .with("delay", 10)
                    .with("duration", 100)
                    .with("amplitude", 0.2),
                Some(2),
            )
            .unwrap();
        input.add_site(0, 0, 0.5);
        input.add_site(3, 2, 0.75);
        assert_eq!(xml_round_trip(&net, XmlStyle::Attributes), net);
    }

    #[test]
    fn mismatched_synapse_types_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut extra = sample();
        let prj = extra.projection_mut("C").unwrap();
        let mut synapses = prj.synapses.clone();
        synapses.insert("gaba".into(), SynapseProperties::default());
        prj.connect(Endpoint::cell(2), Endpoint::cell(0), synapses);
        let mut missing = sample();
        missing
            .projection_mut("C")
            .unwrap()
            .connect(Endpoint::cell(2), Endpoint::cell(0), Default::default());
        for net in [extra, missing] {
            assert!(to_xml_string(&net, &WriteOptions::default()).is_err());
            assert!(write_hdf5_file(&net, dir.path().join("bad.h5"), &WriteOptions::default()).is_err());
        }
    }

    #[test]
    fn mixed_partitions_in_xml() {
        let mut net = NetworkModel::new();
        let pop = net.add_population("P", "Cell").unwrap();
        pop.push(Instance::new(0, 0.0, 0.0, 0.0).on_node(1));
        pop.push(Instance::new(1, 1.0, 0.0, 0.0));
        let xml = to_xml_string(&net, &WriteOptions::default()).unwrap();
        assert!(xml.contains(r#"<instance id="1">"#));
        assert_eq!(xml_round_trip(&net, XmlStyle::Attributes), net);
    }

    #[test]
    fn notes() {
        let options = WriteOptions {
            notes: "Generated network".into(),
            ..Default::default()
        };
        let xml = to_xml_string(&sample(), &options).unwrap();
        assert!(xml.contains("<meta:notes>Generated network</meta:notes>"));
        let mut back = NetworkModel::new();
        XmlReader::default().parse_str(&xml, &mut back).unwrap();
        assert_eq!(back, sample());
    }
}
