use crate::{
    err::Result,
    gen,
    h5::Hdf5Reader,
    handler::NetworkHandler,
    model::NetworkModel,
    raw::{ReadOptions, WriteOptions},
    sax::XmlReader,
};
use std::path::Path;
use tracing::debug;

/// On-disk encoding of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Hdf5,
}

impl Format {
    /// `.h5`/`.hdf5` (including `.nml.h5`) is HDF5, anything else is XML.
    pub fn detect(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("h5" | "hdf5") => Format::Hdf5,
            _ => Format::Xml,
        }
    }
}

/// Decode any supported file into `handler`.
pub fn read_network<H: NetworkHandler + ?Sized>(
    path: impl AsRef<Path>,
    handler: &mut H,
    options: &ReadOptions,
) -> Result<()> {
    let path = path.as_ref();
    let format = Format::detect(path);
    debug!("Reading {path:?} as {format:?}");
    match format {
        Format::Xml => XmlReader::new(options.clone()).parse_file(path, handler),
        Format::Hdf5 => Hdf5Reader::new(options.clone()).parse_file(path, handler),
    }
}

/// Decode into a fresh model.
pub fn load_model(path: impl AsRef<Path>, options: &ReadOptions) -> Result<NetworkModel> {
    let mut model = NetworkModel::new();
    read_network(path, &mut model, options)?;
    Ok(model)
}

pub fn write_network(model: &NetworkModel, path: impl AsRef<Path>, options: &WriteOptions) -> Result<()> {
    let path = path.as_ref();
    match Format::detect(path) {
        Format::Xml => gen::write_xml_file(model, path, options),
        Format::Hdf5 => gen::write_hdf5_file(model, path, options),
    }
}
