//! Bridge to the external rich-text document component.
use serde_json::Value;

use crate::model::TextData;

/// Serialization contract of the rich-text component: a structured
/// document and its HTML form, convertible both ways.
pub trait RichTextCodec {
    fn to_html(&self, document: &Value) -> String;
    fn from_html(&self, html: &str) -> Value;
}

impl TextData {
    /// Editor produced a new document; keep the HTML in step.
    pub fn set_document(&mut self, codec: &dyn RichTextCodec, document: Value) {
        self.html = codec.to_html(&document);
        self.json = Some(document);
    }

    /// HTML arrived from outside (paste, legacy data); rebuild the document.
    pub fn set_html(&mut self, codec: &dyn RichTextCodec, html: impl Into<String>) {
        let html = html.into();
        self.json = Some(codec.from_html(&html));
        self.html = html;
    }

    /// Fill in whichever side is missing, as loaded data may carry only one.
    pub fn ensure_synced(&mut self, codec: &dyn RichTextCodec) {
        if self.json.is_none() && !self.html.is_empty() {
            self.json = Some(codec.from_html(&self.html));
        } else if self.html.is_empty() {
            if let Some(doc) = &self.json {
                self.html = codec.to_html(doc);
            }
        }
    }
}
