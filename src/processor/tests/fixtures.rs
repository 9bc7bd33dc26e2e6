//! Spreadsheet fixtures shared by the processor tests

use crate::config::ReconcileConfig;
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A source test item: name, min limit, max limit (empty for none)
pub type ItemSpec<'a> = (&'a str, &'a str, &'a str);

/// A sample row: ID and one reading per item (empty for none)
pub type SampleSpec<'a> = (&'a str, &'a [&'a str]);

/// Scratch layout with source, template and output directories
pub struct Workspace {
    pub temp_dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("source")).unwrap();
        fs::create_dir_all(temp_dir.path().join("templates")).unwrap();
        Self { temp_dir }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.temp_dir.path().join("source")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("output")
    }

    pub fn template_path(&self) -> PathBuf {
        self.temp_dir.path().join("templates").join("template_report.xlsx")
    }

    /// Default configuration pointed at this workspace
    pub fn config(&self) -> ReconcileConfig {
        ReconcileConfig::default()
            .with_source_dir(self.source_dir())
            .with_output_dir(self.output_dir())
            .with_template(&self.template_path())
            .with_workers(2)
    }

    /// Template with a cover sheet followed by the two batch sheets
    pub fn write_template(&self) {
        write_template(&self.template_path(), &["Summary", "HTRB 100%", "AC"]);
    }

    pub fn write_source(&self, name: &str, items: &[ItemSpec], samples: &[SampleSpec]) -> PathBuf {
        let path = self.source_dir().join(name);
        write_source(&path, "Data", items, samples);
        path
    }
}

pub fn write_template(path: &Path, sheets: &[&str]) {
    let mut xlsx = XlsxWorkbook::new();
    for name in sheets {
        xlsx.add_worksheet()
            .set_name(*name)
            .unwrap()
            .write_string(0, 0, format!("{} report", name))
            .unwrap();
    }
    xlsx.save(path).unwrap();
}

/// Template sheets with a bold merged title, a wide column and a formula
pub fn write_formatted_template(path: &Path, sheets: &[&str]) {
    let bold = Format::new().set_bold();
    let mut xlsx = XlsxWorkbook::new();
    for name in sheets {
        let worksheet = xlsx.add_worksheet().set_name(*name).unwrap();
        worksheet
            .merge_range(0, 0, 0, 4, &format!("{} report", name), &bold)
            .unwrap();
        worksheet.set_column_width(3, 24).unwrap();
        worksheet.write_formula(40, 2, "=COUNTA(A18:A30)").unwrap();
    }
    xlsx.save(path).unwrap();
}

/// Raw XML of one part of an xlsx package
pub fn read_part(path: &Path, name: &str) -> String {
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut xml = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

/// Write a source workbook using the default positional layout
pub fn write_source(path: &Path, sheet: &str, items: &[ItemSpec], samples: &[SampleSpec]) {
    let mut xlsx = XlsxWorkbook::new();
    let worksheet = xlsx.add_worksheet().set_name(sheet).unwrap();
    worksheet.write_string(0, 0, "Lot report").unwrap();

    for (i, (name, min, max)) in items.iter().enumerate() {
        let col = 2 + i as u16;
        worksheet.write_string(15, col, *name).unwrap();
        worksheet.write_string(16, col, "VGS=0V").unwrap();
        write_cell(worksheet, 19, col, min);
        write_cell(worksheet, 20, col, max);
    }

    for (r, (id, readings)) in samples.iter().enumerate() {
        let row = 28 + r as u32;
        worksheet.write_string(row, 0, *id).unwrap();
        for (i, reading) in readings.iter().enumerate() {
            write_cell(worksheet, row, 2 + i as u16, reading);
        }
    }

    xlsx.save(path).unwrap();
}

/// Numbers are written as numeric cells, everything else as text
fn write_cell(worksheet: &mut rust_xlsxwriter::Worksheet, row: u32, col: u16, value: &str) {
    if value.is_empty() {
        return;
    }
    match value.parse::<f64>() {
        Ok(n) => worksheet.write_number(row, col, n).unwrap(),
        Err(_) => worksheet.write_string(row, col, value).unwrap(),
    };
}
