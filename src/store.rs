use crate::docx::DocxStore;
use crate::error::{Result, TemplateFillError};
use crate::schema::TemplateDocument;
use std::path::Path;

/// Loads templates from, and persists filled documents to, one file format.
///
/// `Document` is whatever the format needs to write the file back; the
/// walker only ever sees the [`TemplateDocument`] inside it.
pub trait DocumentStore {
    type Document: AsRef<TemplateDocument> + AsMut<TemplateDocument>;

    fn load_template(&self, path: &Path) -> Result<Self::Document>;

    fn save_document(&self, document: &Self::Document, path: &Path) -> Result<()>;
}

/// Templates stored as the JSON form of [`TemplateDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonStore {
    pub pretty: bool,
}

impl JsonStore {
    pub fn new() -> Self {
        Self { pretty: true }
    }
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for JsonStore {
    type Document = TemplateDocument;

    fn load_template(&self, path: &Path) -> Result<TemplateDocument> {
        let text = std::fs::read_to_string(path).map_err(|e| TemplateFillError::load(path, e))?;
        serde_json::from_str(&text).map_err(|e| TemplateFillError::load(path, e))
    }

    fn save_document(&self, document: &TemplateDocument, path: &Path) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(document)
        } else {
            serde_json::to_string(document)
        }
        .map_err(|e| TemplateFillError::save(path, e))?;

        std::fs::write(path, json).map_err(|e| TemplateFillError::save(path, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFormat {
    Json,
    Docx,
}

impl TemplateFormat {
    /// Detects the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("docx") => Ok(Self::Docx),
            _ => Err(TemplateFillError::UnsupportedFormat(format!(
                "{} (expected a .json or .docx file)",
                path.display()
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Docx => "DOCX",
        }
    }

    /// Reads a template of this format as a plain [`TemplateDocument`].
    pub fn read_tables(&self, path: &Path) -> Result<TemplateDocument> {
        match self {
            Self::Json => JsonStore::new().load_template(path),
            Self::Docx => Ok(DocxStore::new().load_template(path)?.into_tables()),
        }
    }
}
