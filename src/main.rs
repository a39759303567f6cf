use clap::{self, Parser, Subcommand};
use netml::{
    err::{Context, Result},
    handler::Tee,
    raw::{Options, Precision, XmlStyle},
    sim::Bundle,
    sup::{read_network, write_network},
    LoggingHandler, NetworkModel,
};
use std::fs::File;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[clap(name = "netml")]
#[clap(version = "0.1.0-dev")]
struct Cli {
    /// Log every decoded event
    #[clap(long, global = true)]
    debug: bool,
    /// JSON file with read and write options
    #[clap(long, global = true)]
    options: Option<String>,
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Decode a network, logging its events, and print a summary
    Info {
        file: String,
        #[clap(long)]
        partition: Option<u32>,
    },
    /// Re-encode a network; the format follows the file extension
    Convert {
        from: String,
        to: String,
        #[clap(long)]
        style: Option<XmlStyle>,
        /// Write HDF5 arrays as 32 bit floats
        #[clap(long)]
        single: bool,
    },
    /// Build the simulator bundle as JSON, on stdout unless `to` is given
    Build {
        from: String,
        to: Option<String>,
        #[clap(long)]
        partition: Option<u32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "netml=debug" } else { "netml=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let mut options = match &cli.options {
        Some(path) => Options::from_file(path)?,
        None => Options::default(),
    };

    match cli.cmd {
        Cmd::Info { file, partition } => {
            if partition.is_some() {
                options.read.partition = partition;
            }
            let mut model = NetworkModel::new();
            let mut logger = LoggingHandler;
            let mut tee = Tee {
                first: &mut logger,
                second: &mut model,
            };
            read_network(&file, &mut tee, &options.read)?;
            println!("Network {file}");
            println!("  parallel:    {}", model.is_parallel());
            println!("  populations: {}", model.populations.len());
            for pop in &model.populations {
                println!("    {} ({}): {} cells", pop.name, pop.cell_type, pop.size());
            }
            println!("  projections: {}", model.projections.len());
            for prj in &model.projections {
                println!("    {} {} -> {}: {} connections", prj.name, prj.source, prj.target, prj.size());
            }
            println!("  inputs:      {}", model.inputs.len());
            for inp in &model.inputs {
                println!("    {} on {} ({}): {} sites", inp.name, inp.population, inp.stimulus.kind, inp.sites.len());
            }
            Ok(())
        }
        Cmd::Convert { from, to, style, single } => {
            if let Some(style) = style {
                options.write.xml_style = style;
            }
            if single {
                options.write.precision = Precision::Single;
            }
            let mut model = NetworkModel::new();
            read_network(&from, &mut model, &options.read)?;
            write_network(&model, &to, &options.write).with_context(|| format!("Writing {to}"))?;
            info!(
                "Converted {from} -> {to}: {} cells, {} connections",
                model.instance_count(),
                model.connection_count()
            );
            Ok(())
        }
        Cmd::Build { from, to, partition } => {
            if partition.is_some() {
                options.read.partition = partition;
            }
            let mut bundle = Bundle::new();
            read_network(&from, &mut bundle, &options.read)?;
            match to {
                Some(to) => {
                    let out = File::create(&to).with_context(|| format!("Creating {to}"))?;
                    serde_json::to_writer_pretty(out, &bundle).with_context(|| format!("Writing bundle {to}"))?;
                }
                None => {
                    serde_json::to_writer_pretty(std::io::stdout(), &bundle)?;
                    println!();
                }
            }
            Ok(())
        }
    }
}
