//! CSV reports.
//!
//! A report is a serializable row type. Register a file for it with
//! [`ContextReportExt::add_report`], then send rows with
//! [`ContextReportExt::send_report`]; each row is written and flushed as it
//! arrives so a trajectory that fails later leaves its earlier rows intact.
use std::any::TypeId;
use std::cell::RefCell;
use std::ffi::OsStr;
use std::fs::{create_dir_all, File};
use std::path::Path;

use csv::Writer;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::StiError;
use crate::{define_data_plugin, Day, HashMap, HashMapExt};

pub trait Report: 'static {
    // Returns report type
    fn type_id(&self) -> TypeId;
    // Serializes the data with the correct writer
    fn serialize(&self, writer: &mut Writer<File>) -> Result<(), StiError>;
}

/// Use this macro to define a unique report type
#[macro_export]
macro_rules! create_report_trait {
    ($name:ident) => {
        impl $crate::report::Report for $name {
            fn type_id(&self) -> std::any::TypeId {
                std::any::TypeId::of::<$name>()
            }

            fn serialize(
                &self,
                writer: &mut csv::Writer<std::fs::File>,
            ) -> Result<(), $crate::error::StiError> {
                writer.serialize(self)?;
                Ok(())
            }
        }
    };
}

/// One measure of one snapshot window, in long format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub trajectory: usize,
    pub window: usize,
    pub day: Day,
    pub measure: String,
    pub value: u64,
}

create_report_trait!(SnapshotRecord);

struct ReportData {
    file_writers: RefCell<HashMap<TypeId, Writer<File>>>,
}

define_data_plugin!(
    ReportPlugin,
    ReportData,
    ReportData {
        file_writers: RefCell::new(HashMap::new()),
    }
);

// Checks that the path is a CSV file and creates it along with any missing
// parent directories.
fn generate_validate_filepath(path: &Path) -> Result<File, StiError> {
    match path.extension().and_then(OsStr::to_str) {
        Some("csv") => {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            Ok(File::create(path)?)
        }
        _ => Err(StiError::Other(format!(
            "report file {} is not a CSV file",
            path.display()
        ))),
    }
}

pub trait ContextReportExt {
    /// Opens `path` as the output of report type `T`, truncating any
    /// existing file.
    ///
    /// # Errors
    ///
    /// Returns an `StiError` if the path is not a CSV file or the file
    /// cannot be created.
    fn add_report<T: Report + 'static>(&mut self, path: &Path) -> Result<(), StiError>;

    /// Whether a file has been registered for report type `T`.
    fn has_report<T: Report + 'static>(&self) -> bool;

    /// Writes `report` as a new row of the file registered for its type.
    ///
    /// # Errors
    ///
    /// Returns an `StiError` if no file was registered for the report type or
    /// the row cannot be written.
    fn send_report<T: Report>(&self, report: T) -> Result<(), StiError>;
}

impl ContextReportExt for Context {
    fn add_report<T: Report + 'static>(&mut self, path: &Path) -> Result<(), StiError> {
        let file = generate_validate_filepath(path)?;
        let data_container = self.get_data_mut(ReportPlugin);
        data_container
            .file_writers
            .borrow_mut()
            .insert(TypeId::of::<T>(), Writer::from_writer(file));
        Ok(())
    }

    fn has_report<T: Report + 'static>(&self) -> bool {
        self.try_get_data::<ReportPlugin>()
            .is_some_and(|data| data.file_writers.borrow().contains_key(&TypeId::of::<T>()))
    }

    fn send_report<T: Report>(&self, report: T) -> Result<(), StiError> {
        let missing = || StiError::Other("no file registered for the report type".to_string());
        let data_container = self.try_get_data::<ReportPlugin>().ok_or_else(missing)?;
        let mut writers = data_container.file_writers.borrow_mut();
        let writer = writers.get_mut(&report.type_id()).ok_or_else(missing)?;
        report.serialize(writer)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn record(window: usize, value: u64) -> SnapshotRecord {
        SnapshotRecord {
            trajectory: 3,
            window,
            day: 30 * u32::try_from(window).unwrap(),
            measure: "infected_G".to_string(),
            value,
        }
    }

    #[test]
    fn add_and_send_report() {
        let mut context = Context::new();
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("snapshots.csv");
        assert!(!context.has_report::<SnapshotRecord>());
        context.add_report::<SnapshotRecord>(&path).unwrap();
        assert!(context.has_report::<SnapshotRecord>());

        context.send_report(record(0, 12)).unwrap();
        context.send_report(record(1, 7)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<SnapshotRecord> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(rows, vec![record(0, 12), record(1, 7)]);
    }

    #[test]
    fn only_csvs_allowed() {
        let temp_dir = tempdir().unwrap();
        let result = generate_validate_filepath(&temp_dir.path().join("snapshots.tsv"));
        assert!(matches!(result, Err(StiError::Other(_))));
    }

    #[test]
    fn sending_without_a_file_fails() {
        let context = Context::new();
        assert!(context.send_report(record(0, 1)).is_err());
    }
}
