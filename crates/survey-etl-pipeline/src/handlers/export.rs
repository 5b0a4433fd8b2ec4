//! Export stage: the gold layer as an `.xlsx` workbook.

use std::path::Path;

use async_trait::async_trait;
use rust_xlsxwriter::{Format, FormatBorder, Workbook, XlsxError};
use serde_json::json;

use survey_etl_types::{Context, EtlError, Layer, Outcome, Result, Table};

use crate::artifacts::load_input;
use crate::config::EtlConfig;
use crate::handler::{Stage, StageHandler};

pub const SHEET_NAME: &str = "Sheet1";

fn xlsx_err(e: XlsxError) -> EtlError {
    EtlError::Spreadsheet(e.to_string())
}

/// The number a cell holds, if its text is exactly that number's rendering.
///
/// Anything else ("007", "1e3", "NaN") stays a string so the sheet shows the
/// same text as the CSV.
fn numeric_value(text: &str) -> Option<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && n.to_string() == text)
}

fn sheet_column(col: usize) -> Result<u16> {
    u16::try_from(col).map_err(|_| EtlError::Spreadsheet(format!("too many columns: {}", col + 1)))
}

/// Write `table` to a single-sheet workbook: header row first, no index
/// column, missing cells left blank.
pub fn write_workbook(table: &Table, path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold().set_border(FormatBorder::Thin);
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).map_err(xlsx_err)?;

    for (col, name) in table.columns().iter().enumerate() {
        sheet
            .write_string_with_format(0, sheet_column(col)?, name, &header)
            .map_err(xlsx_err)?;
    }

    for (r, row) in table.rows().iter().enumerate() {
        let r = u32::try_from(r + 1)
            .map_err(|_| EtlError::Spreadsheet(format!("too many rows: {}", r + 1)))?;
        for (col, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_deref() else {
                continue;
            };
            let col = sheet_column(col)?;
            match numeric_value(text) {
                Some(n) => sheet.write_number(r, col, n).map_err(xlsx_err)?,
                None => sheet.write_string(r, col, text).map_err(xlsx_err)?,
            };
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    workbook.save(path).map_err(xlsx_err)?;
    Ok(())
}

pub struct ExportHandler;

#[async_trait]
impl StageHandler for ExportHandler {
    fn stage(&self) -> Stage {
        Stage::Export
    }

    async fn execute(&self, context: &Context, config: &EtlConfig) -> Result<Outcome> {
        let gold = load_input(context, config, Stage::Export, Layer::Gold).await?;
        let path = config.artifacts.export_path();
        write_workbook(&gold, &path)?;
        tracing::info!(stage = "export", path = %path.display(), rows = gold.len(), "Spreadsheet exported");

        Ok(Outcome::success(format!("Exported {} rows", gold.len()))
            .with_update("export.rows", json!(gold.len()))
            .with_update("export.path", json!(path.display().to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactConfig;
    use calamine::{open_workbook, Reader, Xlsx};

    #[test]
    fn column_index_beyond_u16_is_an_error() {
        assert_eq!(sheet_column(3).unwrap(), 3);
        assert_eq!(sheet_column(usize::from(u16::MAX)).unwrap(), u16::MAX);
        assert!(matches!(
            sheet_column(usize::from(u16::MAX) + 1),
            Err(EtlError::Spreadsheet(_))
        ));
    }

    fn config_in(dir: &std::path::Path) -> EtlConfig {
        EtlConfig {
            artifacts: ArtifactConfig::in_dir(dir),
            ..EtlConfig::default()
        }
    }

    fn read_sheet(path: &Path) -> Vec<Vec<String>> {
        let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
        let range = workbook.worksheet_range(SHEET_NAME).unwrap();
        range
            .rows()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[test]
    fn numeric_value_only_for_canonical_numbers() {
        assert_eq!(numeric_value("42"), Some(42.0));
        assert_eq!(numeric_value("4.5"), Some(4.5));
        assert_eq!(numeric_value("007"), None);
        assert_eq!(numeric_value("1e3"), None);
        assert_eq!(numeric_value("NaN"), None);
        assert_eq!(numeric_value("q1"), None);
    }

    #[test]
    fn workbook_matches_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final_data.xlsx");
        let table =
            Table::from_csv_reader("id,question_id,code\n1,q1,007\n2,q2,x\n".as_bytes()).unwrap();

        write_workbook(&table, &path).unwrap();

        assert_eq!(
            read_sheet(&path),
            vec![
                vec!["id", "question_id", "code"],
                vec!["1", "q1", "007"],
                vec!["2", "q2", "x"],
            ]
        );
    }

    #[tokio::test]
    async fn exports_gold_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("gold_data.csv"), "id,answer\n1,yes\n").unwrap();

        let outcome = ExportHandler.execute(&Context::new(), &config).await.unwrap();
        assert_eq!(outcome.context_updates["export.rows"], json!(1));
        assert_eq!(
            read_sheet(&dir.path().join("final_data.xlsx")),
            vec![vec!["id", "answer"], vec!["1", "yes"]]
        );
    }

    #[tokio::test]
    async fn missing_gold_is_stage_input_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let err = ExportHandler.execute(&Context::new(), &config).await.unwrap_err();
        match err {
            EtlError::StageInputMissing { stage, path } => {
                assert_eq!(stage, "export");
                assert_eq!(path, dir.path().join("gold_data.csv"));
            }
            other => panic!("Expected StageInputMissing, got: {other:?}"),
        }
        assert!(!dir.path().join("final_data.xlsx").exists());
    }
}
