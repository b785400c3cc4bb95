//! Per-cell power tables and their CSV form.

mod aggregate;
mod checkpoint;
mod table;

pub use aggregate::aggregate;
pub use checkpoint::CsvCheckpoint;
pub use table::{PowerRow, PowerTable, CSV_HEADER};
