use std::io::Write;
use std::path::Path;

use crate::error::{PowerError, Result};

use super::dataframe::{Column, DataFrame};
use super::factor::FactorColumn;

/// Tokens read as a missing numeric value.
const MISSING_TOKENS: [&str; 2] = ["NA", ""];

impl DataFrame {
    /// Read a CSV file (typically pilot data) into a DataFrame.
    ///
    /// The first row is treated as a header. Each column is auto-detected:
    /// - If every value parses as `f64` (or is `NA`/empty, read as NaN) and at
    ///   least one value is present, it becomes a `Float` column.
    /// - Otherwise it becomes a `Factor` column.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, if the CSV is malformed,
    /// or if rows have inconsistent numbers of fields.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        Self::from_csv_reader(reader)
    }

    fn from_csv_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let ncols = headers.len();
        let mut string_columns: Vec<Vec<String>> = vec![Vec::new(); ncols];

        for result in reader.records() {
            let record = result?;
            if record.len() != ncols {
                return Err(PowerError::Data(format!(
                    "Row has {} fields but header has {} columns",
                    record.len(),
                    ncols
                )));
            }
            for (i, field) in record.iter().enumerate() {
                string_columns[i].push(field.to_string());
            }
        }

        if string_columns.first().map_or(true, |c| c.is_empty()) {
            return Ok(DataFrame::new());
        }

        let mut df = DataFrame::new();
        for (header, raw) in headers.iter().zip(string_columns.iter()) {
            match parse_numeric(raw) {
                Some(values) => df.add_float_column(header, values)?,
                None => df.add_column(header, Column::Factor(FactorColumn::from_labels(raw)))?,
            }
        }

        Ok(df)
    }

    /// Write the DataFrame as comma-separated text with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.column_names())?;
        for row in 0..self.nrows() {
            let record: Vec<String> = self.iter().map(|(_, col)| col.cell_string(row)).collect();
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the DataFrame to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }
}

fn parse_numeric(raw: &[String]) -> Option<Vec<f64>> {
    let mut any_present = false;
    let values = raw
        .iter()
        .map(|s| {
            if MISSING_TOKENS.contains(&s.as_str()) {
                Some(f64::NAN)
            } else {
                any_present = true;
                s.parse::<f64>().ok()
            }
        })
        .collect::<Option<Vec<f64>>>()?;
    any_present.then_some(values)
}
