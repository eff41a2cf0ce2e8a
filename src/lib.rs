//! # Template Field Filler
//!
//! Fills the label/value tables of a document template with fields produced
//! by an upstream extraction pipeline.
//!
//! ## Core Concepts
//!
//! - **Field map**: extracted field labels and values, in declaration order
//! - **Normalized key**: whitespace-collapsed, lower-cased label used only for comparison
//! - **Containment match**: a field applies to a row when its normalized key
//!   occurs inside the row's normalized label
//! - **Label / value cell**: the first cell of a row is read, the second is written
//!
//! ## Example
//!
//! ```rust,ignore
//! use template_field_filler::*;
//!
//! let fields: FieldMap = vec![
//!     ("Protocol Title", "Study ABC-123"),
//!     ("Sponsor Name", "Acme Pharma"),
//! ]
//! .into_iter()
//! .collect();
//!
//! let report = fill_template(&fields, "Summary.docx", "Filled_Summary.docx").unwrap();
//! for row in &report.unmatched {
//!     println!("no value for {:?}", row.label);
//! }
//! ```

pub mod docx;
pub mod error;
pub mod index;
pub mod matcher;
pub mod normalize;
pub mod schema;
pub mod store;
pub mod walker;

pub use docx::{DocxStore, DocxTemplate};
pub use error::{Result, TemplateFillError};
pub use index::{FieldIndex, IndexedField};
pub use matcher::{resolve, resolve_value};
pub use normalize::normalize;
pub use schema::*;
pub use store::{DocumentStore, JsonStore, TemplateFormat};
pub use walker::{fill_document, FillReport, FilledRow, TableWalker, UnmatchedRow};

use log::info;
use std::path::Path;

/// Runs one load → fill → save cycle against a [`DocumentStore`].
pub struct TemplateFiller<S> {
    store: S,
    options: FillOptions,
}

impl<S: DocumentStore> TemplateFiller<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, FillOptions::default())
    }

    pub fn with_options(store: S, options: FillOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &FillOptions {
        &self.options
    }

    /// Fills the template at `template` and writes the result to `output`.
    ///
    /// A load failure returns before anything is touched. A save failure is
    /// returned as is; the filled document is discarded with it.
    pub fn fill(&self, fields: &FieldMap, template: &Path, output: &Path) -> Result<FillReport> {
        let mut document = self.store.load_template(template)?;

        info!(
            "Filling {} ({} tables, {} rows) from {} fields",
            template.display(),
            document.as_ref().tables.len(),
            document.as_ref().row_count(),
            fields.len()
        );

        let index = FieldIndex::build(fields);
        let report = TableWalker::new(&index, self.options.match_policy).fill(document.as_mut());

        self.store.save_document(&document, output)?;

        info!(
            "Saved {}: {} rows filled ({} changed), {} unmatched, {} skipped",
            output.display(),
            report.filled.len(),
            report.changed_cells(),
            report.unmatched.len(),
            report.skipped_rows
        );

        Ok(report)
    }
}

/// Fills a `.json` or `.docx` template. The output must use the same format.
pub fn fill_template(
    fields: &FieldMap,
    template: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<FillReport> {
    fill_template_with_options(fields, template, output, FillOptions::default())
}

pub fn fill_template_with_options(
    fields: &FieldMap,
    template: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: FillOptions,
) -> Result<FillReport> {
    let template = template.as_ref();
    let output = output.as_ref();

    let format = TemplateFormat::from_path(template)?;
    let output_format = TemplateFormat::from_path(output)?;
    if format != output_format {
        return Err(TemplateFillError::UnsupportedFormat(format!(
            "cannot write a {} template to {} output {}",
            format.name(),
            output_format.name(),
            output.display()
        )));
    }

    match format {
        TemplateFormat::Json => {
            TemplateFiller::with_options(JsonStore::new(), options).fill(fields, template, output)
        }
        TemplateFormat::Docx => {
            TemplateFiller::with_options(DocxStore::new(), options).fill(fields, template, output)
        }
    }
}

/// Reads the field map from a JSON object file, then fills the template.
pub fn fill_template_from_files(
    fields_path: impl AsRef<Path>,
    template: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: FillOptions,
) -> Result<FillReport> {
    let fields = FieldMap::load(fields_path)?;
    fill_template_with_options(&fields, template, output, options)
}
