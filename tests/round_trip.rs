use approx::assert_relative_eq;
use netml::{
    raw::{Precision, ReadOptions, WriteOptions, XmlStyle},
    sax::XmlReader,
    sim::Bundle,
    sup::{load_model, read_network, write_network},
    Endpoint, Event, Instance, Map, NetworkHandler, NetworkModel, RecordingHandler, Stimulus,
    SynapseProperties,
};
use std::path::Path;

/// One population of three cells wired 0 -> 1 -> 2.
fn chain() -> NetworkModel {
    let mut net = NetworkModel::new();
    let pop = net.add_population("P", "Cell").unwrap();
    pop.add_instance(0.0, 0.0, 0.0);
    pop.add_instance(10.0, 0.0, 0.0);
    pop.add_instance(20.0, 5.0, -2.5);
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

/// Everything the encoders know how to express.
fn rich() -> NetworkModel {
    let mut net = chain();
    net.add_population("Q", "Inh").unwrap().push(Instance::new(7, 1.0, 2.0, 3.0));
    net.add_population("Empty", "Cell").unwrap();
    let prj = net.add_projection("PQ", "P", "Q").unwrap();
    prj.add_synapse("ampa", SynapseProperties::default());
    prj.add_synapse(
        "nmda",
        SynapseProperties {
            weight: 0.25,
            prop_delay: 2.0,
            ..Default::default()
        },
    );
    prj.add_connection(0, 7);
    let mut synapses = prj.synapses.clone();
    if let Some(nmda) = synapses.get_mut("nmda") {
        nmda.weight = 0.75;
    }
    prj.connect(
        Endpoint {
            cell_id: 2,
            segment_id: 3,
            fraction_along: 0.25,
        },
        Endpoint::cell(7),
        synapses,
    );
    net.add_projection("Unused", "Q", "P")
        .unwrap()
        .add_synapse("gaba", SynapseProperties::default());
    let stim = Stimulus::new("random_stim")
        .with("frequency", 20)
        .with("synaptic_mechanism", "ampa");
    let input = net.add_input("noise", "P", stim, Some(2)).unwrap();
    input.add_site(0, 0, 0.5);
    input.add_site(2, 1, 0.75);
    net.add_input("pulse", "Q", Stimulus::new("pulse_input").with("amplitude", 0.1), None)
        .unwrap();
    net
}

fn write_options(style: XmlStyle, precision: Precision) -> WriteOptions {
    WriteOptions {
        xml_style: style,
        precision,
        ..Default::default()
    }
}

fn through(net: &NetworkModel, path: &Path, options: &WriteOptions) -> NetworkModel {
    write_network(net, path, options).unwrap();
    load_model(path, &ReadOptions::default()).unwrap()
}

fn events(path: &Path, options: &ReadOptions) -> Vec<Event> {
    let mut rec = RecordingHandler::new();
    read_network(path, &mut rec, options).unwrap();
    rec.events
}

#[test]
fn chain_survives_every_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let net = chain();
    let cases = [
        ("attr.nml", XmlStyle::Attributes, Precision::Double),
        ("elem.nml", XmlStyle::Elements, Precision::Double),
        ("double.h5", XmlStyle::Attributes, Precision::Double),
        ("single.nml.h5", XmlStyle::Attributes, Precision::Single),
    ];
    for (file, style, precision) in cases {
        let back = through(&net, &dir.path().join(file), &write_options(style, precision));
        assert_eq!(back, net, "{file}");
        let prj = back.projection("C").unwrap();
        assert_eq!(prj.size(), 2);
        assert_eq!(prj.connections[1].pre.cell_id, 1);
        assert_eq!(prj.connections[1].post.cell_id, 2);
        assert_relative_eq!(prj.connections[0].synapses["syn"].weight, 0.5);
        assert_relative_eq!(prj.connections[0].synapses["syn"].threshold, -50.0);
    }
}

#[test]
fn rich_model_survives_xml_and_hdf5() {
    let dir = tempfile::tempdir().unwrap();
    let net = rich();
    for file in ["rich.nml", "rich.h5"] {
        let back = through(&net, &dir.path().join(file), &WriteOptions::default());
        assert_eq!(back, net, "{file}");
    }
    let back = through(
        &net,
        &dir.path().join("rich_elements.xml"),
        &write_options(XmlStyle::Elements, Precision::Double),
    );
    assert_eq!(back, net);
}

#[test]
fn single_precision_is_close() {
    let dir = tempfile::tempdir().unwrap();
    let mut net = NetworkModel::new();
    net.add_population("P", "Cell").unwrap().add_instance(0.1, 1.0 / 3.0, 1e-3);
    let back = through(
        &net,
        &dir.path().join("single.h5"),
        &write_options(XmlStyle::Attributes, Precision::Single),
    );
    let instance = &back.population("P").unwrap().instances[0];
    assert_relative_eq!(instance.x, 0.1, epsilon = 1e-6);
    assert_relative_eq!(instance.y, 1.0 / 3.0, epsilon = 1e-6);
    assert_relative_eq!(instance.z, 1e-3, epsilon = 1e-9);
}

#[test]
fn formats_emit_the_same_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut net = rich();
    let pop = net.population_mut("Q").unwrap();
    pop.instances[0].node_id = Some(1);
    for instance in &mut net.population_mut("P").unwrap().instances {
        instance.node_id = Some((instance.id % 2) as u32);
    }
    let xml = dir.path().join("net.nml");
    let elements = dir.path().join("net_elements.nml");
    let h5 = dir.path().join("net.h5");
    write_network(&net, &xml, &WriteOptions::default()).unwrap();
    write_network(&net, &elements, &write_options(XmlStyle::Elements, Precision::Double)).unwrap();
    write_network(&net, &h5, &WriteOptions::default()).unwrap();

    for partition in [None, Some(0), Some(1)] {
        let options = ReadOptions {
            partition,
            ..Default::default()
        };
        let from_xml = events(&xml, &options);
        assert_eq!(from_xml, events(&elements, &options), "partition {partition:?}");
        assert_eq!(from_xml, events(&h5, &options), "partition {partition:?}");
    }

    let mut replayed = RecordingHandler::new();
    net.replay(&mut replayed).unwrap();
    assert_eq!(replayed.events, events(&xml, &ReadOptions::default()));
}

#[test]
fn instances_on_no_node_survive_both_formats() {
    let dir = tempfile::tempdir().unwrap();
    let mut net = NetworkModel::new();
    let pop = net.add_population("P", "Cell").unwrap();
    pop.push(Instance::new(0, 0.0, 0.0, 0.0).on_node(1));
    pop.push(Instance::new(1, 1.0, 0.0, 0.0));
    pop.push(Instance::new(2, 2.0, 0.0, 0.0).on_node(0));
    for file in ["mixed.nml", "mixed.h5"] {
        let back = through(&net, &dir.path().join(file), &WriteOptions::default());
        assert_eq!(back, net, "{file}");
        assert_eq!(back.population("P").unwrap().instances[1].node_id, None);
    }
}

/// A on nodes 0, 1, 0 and B on node 1.
fn split() -> NetworkModel {
    let mut net = NetworkModel::new();
    let a = net.add_population("A", "Cell").unwrap();
    for (id, node) in [(0, 0), (1, 1), (2, 0)] {
        a.push(Instance::new(id, id as f64, 0.0, 0.0).on_node(node));
    }
    net.add_population("B", "Cell")
        .unwrap()
        .push(Instance::new(0, 5.0, 0.0, 0.0).on_node(1));
    net
}

#[test]
fn partitions_agree_on_gids() {
    let dir = tempfile::tempdir().unwrap();
    let net = split();
    for file in ["split.nml", "split.h5"] {
        let path = dir.path().join(file);
        write_network(&net, &path, &WriteOptions::default()).unwrap();
        let gids = [0, 1]
            .map(|node| {
                let mut bundle = Bundle::new();
                let options = ReadOptions {
                    partition: Some(node),
                    ..Default::default()
                };
                read_network(&path, &mut bundle, &options).unwrap();
                assert!(bundle.parallel);
                bundle.gid("B", 0).unwrap()
            });
        assert_eq!(gids, [3, 3], "{file}");
    }
}

#[test]
fn unsized_partitions_refuse_gids() {
    let xml = r#"<networkml>
  <populations>
    <population name="A" cell_type="Cell">
      <instance id="0" node_id="0"><location x="0" y="0" z="0"/></instance>
      <instance id="1" node_id="1"><location x="1" y="0" z="0"/></instance>
      <instance id="2" node_id="0"><location x="2" y="0" z="0"/></instance>
    </population>
    <population name="B" cell_type="Cell">
      <instance id="0" node_id="1"><location x="5" y="0" z="0"/></instance>
    </population>
  </populations>
</networkml>"#;
    for node in [0, 1] {
        let mut bundle = Bundle::new();
        let reader = XmlReader::new(ReadOptions {
            partition: Some(node),
            ..Default::default()
        });
        reader.parse_str(xml, &mut bundle).unwrap();
        assert_eq!(bundle.gid("A", 0).unwrap(), 0);
        assert!(bundle.gid("B", 0).is_err(), "partition {node}");
    }
}

#[test]
fn synapse_defaults_layer_under_overrides() {
    let xml = r#"<networkml>
  <projections>
    <projection name="AB" source="A" target="B">
      <synapse_props synapse_type="ampa" weight="1" internal_delay="2"/>
      <synapse_props synapse_type="nmda" weight="3"/>
      <connections>
        <connection id="0" pre_cell_id="0" post_cell_id="0">
          <properties synapse_type="nmda" weight="4" pre_delay="1"/>
        </connection>
        <connection id="1" pre_cell_id="1" post_cell_id="1"/>
      </connections>
    </projection>
  </projections>
</networkml>"#;
    let mut net = NetworkModel::new();
    XmlReader::default().parse_str(xml, &mut net).unwrap();
    let prj = net.projection("AB").unwrap();
    let first = &prj.connections[0].synapses;
    assert_eq!(first["ampa"].weight, 1.0);
    assert_eq!(first["ampa"].internal_delay, 2.0);
    assert_eq!(first["nmda"].weight, 4.0);
    assert_eq!(first["nmda"].pre_delay, 1.0);
    // the override stays on its connection
    assert_eq!(prj.connections[1].synapses["nmda"], prj.synapses["nmda"]);
    assert_eq!(prj.synapses["nmda"].weight, 3.0);
}

#[test]
fn bundle_sums_delays_and_numbers_cells() {
    let xml = r#"<networkml>
  <populations>
    <population name="A" cell_type="Cell">
      <instances size="2">
        <instance id="0"><location x="0" y="0" z="0"/></instance>
        <instance id="1"><location x="1" y="0" z="0"/></instance>
      </instances>
    </population>
    <population name="B" cell_type="Cell">
      <instance id="0"><location x="2" y="0" z="0"/></instance>
    </population>
  </populations>
  <projections>
    <projection name="AB" source="A" target="B">
      <synapse_props synapse_type="exc" weight="0.5" internal_delay="1" pre_delay="2" post_delay="3" prop_delay="4"/>
      <connections size="1">
        <connection id="0" pre_cell_id="1" post_cell_id="0"/>
      </connections>
    </projection>
  </projections>
  <inputs>
    <input name="stim">
      <random_stim frequency="10" synaptic_mechanism="exc"/>
      <target population="B">
        <sites size="1">
          <site cell_id="0" segment_id="0" fraction_along="0.5"/>
        </sites>
      </target>
    </input>
  </inputs>
</networkml>"#;
    let mut bundle = Bundle::new();
    XmlReader::default().parse_str(xml, &mut bundle).unwrap();
    // B declared no size and is sized by its single location
    assert_eq!(bundle.size(), 3);
    assert_eq!(
        bundle.projections["AB"].connections,
        vec![(1, 2, "exc".to_string(), 0.5, 10.0)]
    );
    assert_eq!(bundle.spike_sources["stim"].sites, vec![(0, 2, 0, 0.5)]);
}

#[test]
fn bundle_rejects_unsized_inputs() {
    let xml = r#"<networkml>
  <inputs>
    <input name="stim">
      <pulse_input delay="0" duration="1" amplitude="0.1"/>
      <target population="A"/>
    </input>
  </inputs>
</networkml>"#;
    let mut bundle = Bundle::new();
    assert!(XmlReader::default().parse_str(xml, &mut bundle).is_err());
    // a model keeps it and leaves the decision to its user
    let mut net = NetworkModel::new();
    XmlReader::default().parse_str(xml, &mut net).unwrap();
    assert_eq!(net.input("stim").unwrap().size, None);
}

/// Counts declared capacities without storing anything.
#[derive(Default)]
struct Capacities {
    projections: Map<String, Option<usize>>,
    connections: usize,
}

impl NetworkHandler for Capacities {
    fn handle_projection(
        &mut self,
        name: &str,
        _source: &str,
        _target: &str,
        _synapses: &Map<String, SynapseProperties>,
        size: Option<usize>,
    ) -> netml::err::Result<()> {
        self.projections.insert(name.to_string(), size);
        Ok(())
    }

    fn handle_connection(&mut self, _conn: &netml::ConnectionEvent) -> netml::err::Result<()> {
        self.connections += 1;
        Ok(())
    }
}

#[test]
fn capacity_is_announced_before_connections() {
    let dir = tempfile::tempdir().unwrap();
    let mut net = NetworkModel::new();
    net.add_population("P", "Cell").unwrap().add_instance(0.0, 0.0, 0.0);
    let prj = net.add_projection_with_capacity("Big", "P", "P", 1000).unwrap();
    prj.add_synapse("syn", SynapseProperties::default());
    for _ in 0..3 {
        prj.add_connection(0, 0);
    }
    assert_eq!(net.projection("Big").unwrap().size(), 3);
    for file in ["cap.nml", "cap.h5"] {
        let path = dir.path().join(file);
        write_network(&net, &path, &WriteOptions::default()).unwrap();
        let mut caps = Capacities::default();
        read_network(&path, &mut caps, &ReadOptions::default()).unwrap();
        assert_eq!(caps.projections["Big"], Some(3), "{file}");
        assert_eq!(caps.connections, 3);
    }
}
