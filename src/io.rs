//! Plain-text matrix and sequence files.
//!
//! Matrices are comma-separated rows, sequences hold one value per line.
//! Blank lines and lines starting with `#` are skipped; whitespace around
//! fields is ignored.

use crate::bags::{BagDataset, BagLabels};
use crate::error::{Error, Result};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::{Array1, Array2, ArrayView2};
use std::fmt::Display;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(input)
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(str::is_empty)
}

fn line_of(record: &StringRecord) -> usize {
    record.position().map_or(0, |p| p.line() as usize)
}

fn parse_field<T>(field: &str, line: usize) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    field.parse().map_err(|err: T::Err| Error::Parse {
        line,
        message: format!("cannot parse {field:?}: {err}"),
    })
}

/// Read a comma-separated matrix. An input with no rows gives a `0 × 0`
/// matrix.
pub fn read_matrix_from<R: Read>(input: R) -> Result<Array2<f64>> {
    let mut values = Vec::new();
    let mut width = None;
    let mut rows = 0;

    for record in reader(input).records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        let line = line_of(&record);
        match width {
            None => width = Some(record.len()),
            Some(w) if w != record.len() => {
                return Err(Error::Parse {
                    line,
                    message: format!("expected {w} columns, found {}", record.len()),
                });
            }
            Some(_) => {}
        }
        for field in record.iter() {
            values.push(parse_field::<f64>(field, line)?);
        }
        rows += 1;
    }

    let cols = width.unwrap_or(0);
    Array2::from_shape_vec((rows, cols), values).map_err(|err| Error::invalid(err.to_string()))
}

pub fn read_matrix(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    read_matrix_from(std::fs::File::open(path)?)
}

/// Read one value per line, e.g. bag memberships (`usize`) or proportions
/// (`f64`).
pub fn read_sequence_from<T, R>(input: R) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
    R: Read,
{
    let mut out = Vec::new();
    for record in reader(input).records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        let line = line_of(&record);
        if record.len() != 1 {
            return Err(Error::Parse {
                line,
                message: format!("expected one value, found {}", record.len()),
            });
        }
        out.push(parse_field(&record[0], line)?);
    }
    Ok(out)
}

pub fn read_sequence<T>(path: impl AsRef<Path>) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    read_sequence_from(std::fs::File::open(path)?)
}

/// Write a matrix as comma-separated rows.
pub fn write_matrix_to<W: Write>(output: W, matrix: ArrayView2<'_, f64>) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(output);
    for row in matrix.rows() {
        writer.write_record(row.iter().map(f64::to_string))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_matrix(path: impl AsRef<Path>, matrix: ArrayView2<'_, f64>) -> Result<()> {
    write_matrix_to(std::fs::File::create(path)?, matrix)
}

/// Write one value per line.
pub fn write_sequence_to<T: Display, W: Write>(mut output: W, values: &[T]) -> Result<()> {
    for value in values {
        writeln!(output, "{value}")?;
    }
    output.flush()?;
    Ok(())
}

pub fn write_sequence<T: Display>(path: impl AsRef<Path>, values: &[T]) -> Result<()> {
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_sequence_to(file, values)
}

/// Load instances (comma-separated rows), bag membership and either
/// proportions (one per line) or intervals (`low,high` rows).
pub fn read_dataset(
    instances: impl AsRef<Path>,
    bags: impl AsRef<Path>,
    labels: impl AsRef<Path>,
) -> Result<BagDataset> {
    let instances = read_matrix(instances)?;
    let bags = read_sequence(bags)?;
    let labels = read_matrix(labels)?;
    let labels = match labels.ncols() {
        1 => BagLabels::Proportions(labels.column(0).to_owned()),
        2 => BagLabels::Intervals(labels),
        0 => BagLabels::Proportions(Array1::zeros(0)),
        n => {
            return Err(Error::invalid(format!(
                "bag labels need one or two columns, found {n}"
            )))
        }
    };
    BagDataset::new(instances, bags, labels)
}
