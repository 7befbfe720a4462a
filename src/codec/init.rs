//! Legacy INIT text format.
//!
//! ```text
//! <header line, free text>
//! ##SEED## ##EVENTS##              seed, cluster length      (ignored)
//! ##TURN## ##TILT## 1.0            incident direction        (ignored)
//! 0.0 0.0 0.0                      magnetic field            (ignored)
//! <thickness> <xpix> <ypix> 0.0 0.0 0.0 0.0 <nx> <ny> <nz> 0.0
//! <x> <y> <z> <v1> [<v2> <v3>]     one line per grid point, 1-based indices
//! ```
//!
//! Everything after the header line is read as whitespace-separated tokens,
//! so line breaks carry no meaning.  Sizes are stored in micrometres and in
//! the order `(thickness, x, y)`; in memory the size is `(x, y, thickness)`.

use std::io::{BufRead, Write};

use tracing::{debug, trace};

use crate::error::{FieldError, Result};
use crate::field::{FieldData, FieldQuantity};
use crate::units::UnitConverter;

/// Unit the pixel pitch and thickness are stored in.
const SIZE_UNIT: &str = "um";

/// Progress is logged every this many percent.
const PROGRESS_STEP: usize = 10;

// ── Tokenizer ────────────────────────────────────────────────────────────────

struct Tokens<R> {
    reader: R,
    line:   String,
    pos:    usize,
}

impl<R: BufRead> Tokens<R> {
    fn new(reader: R) -> Self {
        Self { reader, line: String::new(), pos: 0 }
    }

    /// Next whitespace-separated token, `None` at end of stream.
    fn next_token(&mut self) -> Result<Option<&str>> {
        loop {
            let rest = &self.line[self.pos..];
            if let Some(skip) = rest.find(|c: char| !c.is_whitespace()) {
                let start = self.pos + skip;
                let end = self.line[start..]
                    .find(char::is_whitespace)
                    .map_or(self.line.len(), |e| start + e);
                self.pos = end;
                return Ok(Some(&self.line[start..end]));
            }
            self.line.clear();
            self.pos = 0;
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
        }
    }

    fn header_token(&mut self, what: &str) -> Result<&str> {
        self.next_token()?.ok_or_else(|| {
            FieldError::MalformedHeader(format!("unexpected end of file while reading {what}"))
        })
    }

    fn skip_header(&mut self, count: usize, what: &str) -> Result<()> {
        for _ in 0..count {
            self.header_token(what)?;
        }
        Ok(())
    }

    fn header_value<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let token = self.header_token(what)?;
        token
            .parse()
            .map_err(|_| FieldError::MalformedHeader(format!("invalid {what} '{token}'")))
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Decode an INIT stream.  Field values are converted from `unit` into
/// internal units; pixel sizes and thickness from micrometres.
pub fn read<R: BufRead>(
    mut reader: R,
    quantity:   FieldQuantity,
    unit:       &str,
    units:      &dyn UnitConverter,
) -> Result<FieldData> {
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw)? == 0 {
        return Err(FieldError::MalformedHeader("empty file".to_string()));
    }
    let header = String::from_utf8(raw)
        .map_err(|e| FieldError::MalformedHeader(format!("header is not valid UTF-8: {e}")))?;
    let header = header.trim_end_matches(&['\n', '\r'][..]).to_string();
    trace!("Header of field file is:\n{}", header);

    let value_factor = units.factor(unit)?;

    let mut tokens = Tokens::new(reader);
    tokens.skip_header(2, "seed and cluster length")?;
    tokens.skip_header(3, "incident direction")?;
    tokens.skip_header(3, "magnetic field")?;

    let thickness: f64 = tokens.header_value("thickness")?;
    let xpixsz: f64    = tokens.header_value("x pixel size")?;
    let ypixsz: f64    = tokens.header_value("y pixel size")?;

    // temperature, flux, rhe, new_drde
    tokens.skip_header(4, "detector parameters")?;

    let nx: usize = tokens.header_value("x dimension")?;
    let ny: usize = tokens.header_value("y dimension")?;
    let nz: usize = tokens.header_value("z dimension")?;
    tokens.skip_header(1, "trailing dimension field")?;

    let dimensions = [nx, ny, nz];
    let n = quantity.components();
    let len = FieldData::expected_len(dimensions, quantity).ok_or_else(|| {
        FieldError::MalformedHeader(format!("grid dimensions {dimensions:?} are too large"))
    })?;
    let points = len / n;

    // The declared grid is untrusted: a failed allocation must surface as an error.
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| {
        FieldError::MalformedHeader(format!("grid dimensions {dimensions:?} are too large"))
    })?;
    data.resize(len, 0.0);

    let step = (points / (100 / PROGRESS_STEP)).max(1);
    for i in 0..points {
        if i % step == 0 {
            debug!("Reading field data: {}%", 100 * i / points);
        }

        let truncated = || FieldError::TruncatedInput(format!("read {i} of {points} grid points"));

        let x = grid_index(&mut tokens, 'x', nx)?.ok_or_else(truncated)?;
        let y = grid_index(&mut tokens, 'y', ny)?.ok_or_else(truncated)?;
        let z = grid_index(&mut tokens, 'z', nz)?.ok_or_else(truncated)?;

        let base = ((x * ny + y) * nz + z) * n;
        for slot in &mut data[base..base + n] {
            let token = tokens.next_token()?.ok_or_else(truncated)?;
            let value: f64 = token
                .parse()
                .map_err(|_| FieldError::InvalidValue(token.to_string()))?;
            *slot = value * value_factor;
        }
    }
    debug!("Reading field data: finished.");

    let size = [
        units.to_internal(xpixsz, SIZE_UNIT)?,
        units.to_internal(ypixsz, SIZE_UNIT)?,
        units.to_internal(thickness, SIZE_UNIT)?,
    ];
    Ok(FieldData::new(header, dimensions, size, data))
}

/// Read one 1-based index and return it 0-based.  `Ok(None)` at end of stream.
fn grid_index<R: BufRead>(tokens: &mut Tokens<R>, axis: char, dimension: usize) -> Result<Option<usize>> {
    let Some(token) = tokens.next_token()? else {
        return Ok(None);
    };
    match token.parse::<usize>() {
        Ok(index) if (1..=dimension).contains(&index) => Ok(Some(index - 1)),
        _ => Err(FieldError::InvalidGridIndex {
            axis,
            index: token.to_string(),
            dimension,
        }),
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Encode `field` as INIT text, converting values from internal units to
/// `unit` and sizes to micrometres.
pub fn write<W: Write>(
    field:      &FieldData,
    mut writer: W,
    quantity:   FieldQuantity,
    unit:       &str,
    units:      &dyn UnitConverter,
) -> Result<()> {
    field.validate(quantity)?;
    if field.header().contains(&['\n', '\r'][..]) {
        return Err(FieldError::MalformedHeader("header must be a single line".to_string()));
    }
    let [sx, sy, sz] = field.size();
    let (sx, sy, sz) = (
        units.from_internal(sx, SIZE_UNIT)?,
        units.from_internal(sy, SIZE_UNIT)?,
        units.from_internal(sz, SIZE_UNIT)?,
    );
    let value_factor = units.factor(unit)?;

    trace!("Writing INIT field data");
    writeln!(writer, "{}", field.header())?;
    writeln!(writer, "##SEED## ##EVENTS##")?;
    writeln!(writer, "##TURN## ##TILT## 1.0")?;
    writeln!(writer, "0.0 0.0 0.0")?;

    write!(writer, "{sz} {sx} {sy} ")?;
    write!(writer, "0.0 0.0 0.0 0.0 ")?;

    let [nx, ny, nz] = field.dimensions();
    writeln!(writer, "{nx} {ny} {nz} 0.0")?;

    let n = quantity.components();
    let data = field.data();
    let points = field.points();
    let step = (points / (100 / PROGRESS_STEP)).max(1);
    let mut written = 0;
    for x in 0..nx {
        for y in 0..ny {
            for z in 0..nz {
                if written % step == 0 {
                    debug!("Writing field data: {}%", 100 * written / points);
                }
                write!(writer, "{} {} {}", x + 1, y + 1, z + 1)?;
                let base = field.offset(x, y, z, n);
                for value in &data[base..base + n] {
                    write!(writer, " {}", value / value_factor)?;
                }
                writeln!(writer)?;
                written += 1;
            }
        }
    }
    debug!("Writing field data: finished.");
    Ok(())
}
