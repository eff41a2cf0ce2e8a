use crate::index::FieldIndex;
use crate::matcher::resolve;
use crate::normalize::normalize;
use crate::schema::{MatchPolicy, TemplateDocument};
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilledRow {
    pub table: usize,
    pub row: usize,
    /// Label cell text as it appears in the template
    pub label: String,
    /// Normalized key of the field that supplied the value
    pub field_key: String,
    /// False when the value cell already held exactly this value
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedRow {
    pub table: usize,
    pub row: usize,
    pub label: String,
}

/// Outcome of one pass over a document.
///
/// Unmatched rows are expected (section headers, fields the extraction did
/// not produce); they are listed here so callers can surface them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub filled: Vec<FilledRow>,
    pub unmatched: Vec<UnmatchedRow>,
    /// Rows with fewer than two cells
    pub skipped_rows: usize,
}

impl FillReport {
    pub fn changed_cells(&self) -> usize {
        self.filled.iter().filter(|r| r.changed).count()
    }

    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }
}

/// Writes resolved field values into the value cell of every eligible row.
///
/// Reads only the first cell of a row and writes only the second, so rows
/// never influence each other and a second pass with the same fields is a
/// no-op.
pub struct TableWalker<'a> {
    index: &'a FieldIndex,
    policy: MatchPolicy,
}

impl<'a> TableWalker<'a> {
    pub fn new(index: &'a FieldIndex, policy: MatchPolicy) -> Self {
        Self { index, policy }
    }

    pub fn fill(&self, document: &mut TemplateDocument) -> FillReport {
        let mut report = FillReport::default();

        for (t, table) in document.tables.iter_mut().enumerate() {
            for (r, row) in table.rows.iter_mut().enumerate() {
                let [label_cell, value_cell, ..] = row.cells.as_mut_slice() else {
                    report.skipped_rows += 1;
                    continue;
                };

                let label = normalize(&label_cell.text);
                match resolve(&label, self.index, self.policy) {
                    Some(field) => {
                        let changed = value_cell.text != field.value;
                        if changed {
                            value_cell.text = field.value.clone();
                        }
                        debug!(
                            "Table {} row {}: {:?} filled from field {:?}",
                            t, r, label, field.key
                        );
                        report.filled.push(FilledRow {
                            table: t,
                            row: r,
                            label: label_cell.text.clone(),
                            field_key: field.key.clone(),
                            changed,
                        });
                    }
                    None => {
                        debug!("Table {} row {}: no field matches {:?}", t, r, label);
                        report.unmatched.push(UnmatchedRow {
                            table: t,
                            row: r,
                            label: label_cell.text.clone(),
                        });
                    }
                }
            }
        }

        report
    }
}

/// Fills `document` and hands it back together with the report.
pub fn fill_document(
    mut document: TemplateDocument,
    index: &FieldIndex,
    policy: MatchPolicy,
) -> (TemplateDocument, FillReport) {
    let report = TableWalker::new(index, policy).fill(&mut document);
    (document, report)
}
