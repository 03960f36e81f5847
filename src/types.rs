use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;

use crate::traits::CacheEntity;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Note {
    pub id:          String,
    pub owner_id:    String,
    pub title:       String,
    pub description: String,
    pub is_favorite: bool,
    pub page_count:  u32,
    pub created_at:  Option<DateTime<Utc>>,
    pub updated_at:  Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Page {
    pub id:              String,
    pub note_id:         String,
    pub page_number:     u32,
    pub original_text:   String,
    pub translated_text: String,
    pub image_url:       Option<String>,
    pub created_at:      Option<DateTime<Utc>>,
    pub updated_at:      Option<DateTime<Utc>>,
}

/// How OCR output of a page is split before translation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TextProcessingMode {
    #[default]
    Segment,
    Paragraph,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Segment {
    pub original_text:   String,
    pub pronunciation:   String,
    pub translated_text: String,
}

/// OCR + translation output for one page in one processing mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessedText {
    pub mode:               TextProcessingMode,
    pub original_text:      String,
    pub translated_text:    String,
    pub segments:           Vec<Segment>,
    pub show_full_text:     bool,
    pub show_pronunciation: bool,
    pub show_translation:   bool,
}

impl Default for ProcessedText {
    fn default() -> Self {
        Self {
            mode:               TextProcessingMode::default(),
            original_text:      String::new(),
            translated_text:    String::new(),
            segments:           Vec::new(),
            show_full_text:     false,
            show_pronunciation: true,
            show_translation:   true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Translation {
    pub target_language: String,
    pub translated_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pronunciation {
    pub language:      String,
    pub pronunciation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DictionarySource {
    #[default]
    Bundled,
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DictionaryEntry {
    pub word:          String,
    pub pronunciation: String,
    pub meaning:       String,
    pub source:        DictionarySource,
}

impl CacheEntity for Note {
    const KIND: &'static str = "note";
}

impl CacheEntity for Page {
    const KIND: &'static str = "page";
}

impl CacheEntity for ProcessedText {
    const KIND: &'static str = "processed_text";
}

impl CacheEntity for Translation {
    const KIND: &'static str = "translation";
}

impl CacheEntity for Pronunciation {
    const KIND: &'static str = "pronunciation";
}

impl CacheEntity for DictionaryEntry {
    const KIND: &'static str = "dictionary";
}

/// Memory tier diagnostics of one typed cache. For monitoring only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name:             &'static str,
    pub item_count:       usize,
    pub capacity:         usize,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheReport {
    pub caches:      Vec<CacheStats>,
    pub total_items: usize,
}

/// Result of asking for every page of a note.
///
/// `missing` lists page ids the relationship index knows about but neither tier holds anymore. Callers re-fetch those
/// from the document store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLookup {
    pub pages:   Vec<Page>,
    pub missing: Vec<String>,
}

impl PageLookup {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && !self.pages.is_empty()
    }
}
