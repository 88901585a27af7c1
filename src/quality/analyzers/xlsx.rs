//! Spreadsheet (XLSX/XLS/ODS) analyzer backed by calamine.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};

use super::check_file;
use crate::error::{ConvergeError, Result};
use crate::quality::checks::{normalize, CheckRecorder};
use crate::quality::registry::OutputAnalyzer;
use crate::quality::{AnalysisPolicy, AnalysisResult, Discrepancy, Severity, TemplateSpec};

/// Facts extracted from one worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetFacts {
    pub name: String,
    /// First non-empty row, treated as the header.
    pub headers: Vec<String>,
    /// Non-empty rows after the header.
    pub data_rows: u32,
    /// A1 references of cells holding an error value (`#DIV/0!`, `#REF!`, ...).
    pub error_cells: Vec<String>,
    pub text: String,
}

impl SheetFacts {
    fn is_empty(&self) -> bool {
        self.headers.iter().all(|h| h.trim().is_empty()) && self.data_rows == 0
    }
}

/// Facts extracted from a workbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XlsxFacts {
    pub sheets: Vec<SheetFacts>,
}

/// Analyzer for spreadsheets.
#[derive(Debug, Clone, Default)]
pub struct XlsxAnalyzer {
    policy: AnalysisPolicy,
}

impl XlsxAnalyzer {
    #[must_use]
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    pub fn extract(path: &Path) -> Result<XlsxFacts> {
        check_file(path)?;
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| ConvergeError::malformed(path, format!("failed to open spreadsheet: {e}")))?;

        let names: Vec<String> = workbook.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| ConvergeError::malformed(path, format!("sheet '{name}': {e}")))?;
            sheets.push(sheet_facts(name, &range));
        }
        Ok(XlsxFacts { sheets })
    }

    #[must_use]
    pub fn evaluate(&self, facts: &XlsxFacts, template: &TemplateSpec) -> AnalysisResult {
        let mut rec = CheckRecorder::new();

        rec.check_count(
            facts.sheets.len() as u32,
            template.min_count,
            template.max_count,
            "sheets",
        );
        let names: Vec<String> = facts.sheets.iter().map(|s| s.name.clone()).collect();
        rec.check_sections(&names, &template.expected_sections, "sheet");

        for sheet in &facts.sheets {
            let location = format!("sheet '{}'", sheet.name);

            if sheet.is_empty() {
                rec.fail(
                    Discrepancy::new(Severity::Medium, "empty_sheet", &location, "data", "empty")
                        .with_suggestion("Remove the sheet or populate it"),
                );
                continue;
            }
            rec.pass();

            let headers: Vec<String> = sheet.headers.iter().map(|h| normalize(h)).collect();
            for column in &template.expected_columns {
                let wanted = normalize(column);
                rec.record((!headers.contains(&wanted)).then(|| {
                    Discrepancy::new(
                        Severity::High,
                        "missing_column",
                        &location,
                        format!("column \"{column}\""),
                        format!("headers: {}", sheet.headers.join(", ")),
                    )
                    .with_suggestion(format!("Add a \"{column}\" header column"))
                }));
            }

            if let Some(min_rows) = template.min_rows {
                rec.check_count(sheet.data_rows, Some(min_rows), None, "data rows");
            }

            rec.record((!sheet.error_cells.is_empty()).then(|| {
                let shown: Vec<&str> = sheet.error_cells.iter().take(5).map(String::as_str).collect();
                Discrepancy::new(
                    Severity::High,
                    "formula_error",
                    &location,
                    "no error values",
                    format!("{} error cell(s): {}", sheet.error_cells.len(), shown.join(", ")),
                )
                .with_suggestion("Fix the formulas producing error values")
            }));
        }

        let text = facts
            .sheets
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        rec.check_required_text(&text, &template.required_text, "workbook");
        rec.check_forbidden_text(&text, &template.forbidden_text, "workbook");
        if template.forbid_placeholders {
            rec.check_placeholders(&text, "workbook");
        }

        rec.finish(&format!("XLSX ({} sheets)", facts.sheets.len()), &self.policy.verdict)
    }
}

impl OutputAnalyzer for XlsxAnalyzer {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["xlsx", "xlsm", "xls", "ods"]
    }

    fn analyze(&self, path: &Path, template: &TemplateSpec) -> Result<AnalysisResult> {
        let facts = Self::extract(path)?;
        Ok(self.evaluate(&facts, template))
    }
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn sheet_facts(name: String, range: &Range<Data>) -> SheetFacts {
    let (row0, col0) = range.start().unwrap_or((0, 0));
    let mut facts = SheetFacts {
        name,
        ..SheetFacts::default()
    };
    let mut text = Vec::new();
    let mut header_seen = false;

    for (r, row) in range.rows().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            if let Data::Error(_) = cell {
                facts
                    .error_cells
                    .push(cell_ref(row0 + r as u32, col0 + c as u32));
            }
            if !is_blank(cell) {
                text.push(cell.to_string());
            }
        }

        if row.iter().all(is_blank) {
            continue;
        }
        if header_seen {
            facts.data_rows += 1;
        } else {
            facts.headers = row.iter().map(|c| c.to_string().trim().to_string()).collect();
            header_seen = true;
        }
    }

    facts.text = text.join(" ");
    facts
}

/// Zero-based coordinates to an A1 reference.
fn cell_ref(row: u32, col: u32) -> String {
    let mut letters = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect::<String>() + &(row + 1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::write_xlsx;
    use tempfile::TempDir;

    fn sheet(name: &str, headers: &[&str], rows: u32) -> SheetFacts {
        SheetFacts {
            name: name.to_string(),
            headers: headers.iter().map(|s| s.to_string()).collect(),
            data_rows: rows,
            error_cells: vec![],
            text: headers.join(" "),
        }
    }

    #[test]
    fn test_cell_ref() {
        assert_eq!(cell_ref(0, 0), "A1");
        assert_eq!(cell_ref(9, 25), "Z10");
        assert_eq!(cell_ref(0, 26), "AA1");
        assert_eq!(cell_ref(1, 701), "ZZ2");
    }

    #[test]
    fn test_missing_column_is_high() {
        let facts = XlsxFacts {
            sheets: vec![sheet("Data", &["Region", "Revenue"], 4)],
        };
        let template = TemplateSpec::named("report").with_columns(["region", "Revenue", "Margin"]);
        let result = XlsxAnalyzer::default().evaluate(&facts, &template);
        let missing: Vec<&str> = result
            .discrepancies
            .iter()
            .filter(|d| d.category() == "missing_column")
            .map(|d| d.expected())
            .collect();
        assert_eq!(missing, vec!["column \"Margin\""]);
    }

    #[test]
    fn test_formula_errors_reported() {
        let mut s = sheet("Data", &["A"], 2);
        s.error_cells = vec!["B2".to_string(), "B3".to_string()];
        let result = XlsxAnalyzer::default().evaluate(
            &XlsxFacts { sheets: vec![s] },
            &TemplateSpec::named("report"),
        );
        let d = result
            .discrepancies
            .iter()
            .find(|d| d.category() == "formula_error")
            .unwrap();
        assert_eq!(d.severity(), Severity::High);
        assert!(d.actual().contains("B2, B3"));
    }

    #[test]
    fn test_empty_sheet_is_medium() {
        let facts = XlsxFacts {
            sheets: vec![sheet("Data", &["A"], 1), sheet("Scratch", &[], 0)],
        };
        let result = XlsxAnalyzer::default().evaluate(&facts, &TemplateSpec::named("report"));
        assert_eq!(result.count(Severity::Medium), 1);
        assert!(result.passed);
    }

    #[test]
    fn test_min_rows() {
        let facts = XlsxFacts {
            sheets: vec![sheet("Data", &["A"], 2)],
        };
        let mut template = TemplateSpec::named("report");
        template.min_rows = Some(5);
        let result = XlsxAnalyzer::default().evaluate(&facts, &template);
        assert_eq!(result.count(Severity::High), 1);
    }

    #[test]
    fn test_analyze_real_workbook() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.xlsx");
        write_xlsx(
            &path,
            &[(
                "Summary",
                vec![
                    vec!["Region", "Revenue"],
                    vec!["North", "120"],
                    vec!["South", "95"],
                ],
            )],
        )
        .unwrap();

        let template = TemplateSpec::named("report")
            .with_sections(["Summary"])
            .with_columns(["Region", "Revenue"]);
        let facts = XlsxAnalyzer::extract(&path).unwrap();
        assert_eq!(facts.sheets[0].headers, vec!["Region", "Revenue"]);
        assert_eq!(facts.sheets[0].data_rows, 2);

        let result = XlsxAnalyzer::default().evaluate(&facts, &template);
        assert!(result.passed, "{}", result.headline());
        assert!(result.discrepancies.is_empty());
    }
}
