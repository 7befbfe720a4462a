//! Field codec: format tags, dispatch, and the read/write entry points.
//!
//! Two on-disk formats are supported:
//!
//! | Tag    | Module | Description |
//! |--------|--------|-------------|
//! | `init` | [`init`] | Legacy plain-text grid, values in a caller-given unit |
//! | `apf`  | [`apf`]  | Portable binary record, values in internal units |
//!
//! Dispatch is a single exhaustive `match` on [`FileType`].  Writers validate
//! the payload length before a single byte is produced, and file-level
//! writes go through a temporary file that is only renamed into place once
//! the encoder has succeeded.

pub mod apf;
pub mod init;

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{FieldError, Result};
use crate::field::{FieldData, FieldQuantity};
use crate::units::{UnitConverter, Units};

// ── FileType ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Legacy plain-text ASCII grid.
    Init,
    /// Binary field archive.
    Apf,
}

impl FileType {
    pub fn name(self) -> &'static str {
        match self {
            FileType::Init => "init",
            FileType::Apf  => "apf",
        }
    }

    /// Parse a format tag.
    pub fn from_name(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "init" => Ok(FileType::Init),
            "apf"  => Ok(FileType::Apf),
            other  => Err(FieldError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Infer the format from a file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_name(ext),
            None => Err(FieldError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl FromStr for FileType {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── FieldCodec ───────────────────────────────────────────────────────────────

/// Reader/writer configuration: the quantity stored per grid point, the unit
/// INIT values are expressed in, and the converter that resolves it.
#[derive(Clone)]
pub struct FieldCodec {
    quantity: FieldQuantity,
    unit:     String,
    units:    Arc<dyn UnitConverter>,
}

impl FieldCodec {
    /// Codec using the built-in unit registry.  An empty `unit` disables
    /// conversion of INIT values.
    pub fn new(quantity: FieldQuantity, unit: impl Into<String>) -> Self {
        Self {
            quantity,
            unit:  unit.into(),
            units: Arc::new(Units::new()),
        }
    }

    pub fn with_converter(mut self, units: Arc<dyn UnitConverter>) -> Self {
        self.units = units;
        self
    }

    pub fn quantity(&self) -> FieldQuantity { self.quantity }

    pub fn unit(&self) -> &str { &self.unit }

    /// Decode a field from a buffered stream.
    pub fn read_from<R: BufRead>(&self, reader: R, file_type: FileType) -> Result<FieldData> {
        match file_type {
            FileType::Init => init::read(reader, self.quantity, &self.unit, self.units.as_ref()),
            FileType::Apf  => apf::read(reader, self.quantity, &self.unit),
        }
    }

    /// Decode the field stored at `path`.
    pub fn read(&self, path: impl AsRef<Path>, file_type: FileType) -> Result<FieldData> {
        let path = path.as_ref();
        debug!("Reading {} field file \"{}\"", file_type, path.display());
        let file = File::open(path)?;
        self.read_from(BufReader::new(file), file_type)
    }

    /// Encode `field` to a stream.  Nothing is written if validation fails.
    pub fn write_to<W: Write>(&self, field: &FieldData, writer: W, file_type: FileType) -> Result<()> {
        match file_type {
            FileType::Init => init::write(field, writer, self.quantity, &self.unit, self.units.as_ref()),
            FileType::Apf  => apf::write(field, writer, self.quantity, &self.unit),
        }
    }

    /// Encode `field` to `path`.
    ///
    /// The encoder writes into a temporary file next to `path` which replaces
    /// the destination only after a successful flush; on any error the
    /// temporary file is removed and `path` is left untouched.
    pub fn write(&self, field: &FieldData, path: impl AsRef<Path>, file_type: FileType) -> Result<()> {
        let path = path.as_ref();
        field.validate(self.quantity)?;
        debug!("Writing {} field file \"{}\"", file_type, path.display());

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            self.write_to(field, &mut writer, file_type)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| FieldError::from(e.error))?;
        Ok(())
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

/// Read the field stored at `path` with the built-in unit registry.
pub fn read(
    path:      impl AsRef<Path>,
    file_type: FileType,
    quantity:  FieldQuantity,
    unit:      &str,
) -> Result<FieldData> {
    FieldCodec::new(quantity, unit).read(path, file_type)
}

/// Write `field` to `path` with the built-in unit registry.
pub fn write(
    field:     &FieldData,
    path:      impl AsRef<Path>,
    file_type: FileType,
    quantity:  FieldQuantity,
    unit:      &str,
) -> Result<()> {
    FieldCodec::new(quantity, unit).write(field, path, file_type)
}
