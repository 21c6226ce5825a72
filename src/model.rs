use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use crate::video::VideoProvider;

/// Identifier of a block: a client-local placeholder until the server
/// assigns an integer id on save.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockId {
    Persisted(i64),
    Local(String),
}

impl BlockId {
    /// Fresh placeholder id: `block-<millis>-<random suffix>`.
    pub fn generate_local() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        BlockId::Local(format!(
            "block-{}-{}",
            Utc::now().timestamp_millis(),
            &suffix[..9]
        ))
    }

    pub fn persisted(&self) -> Option<i64> {
        match self {
            BlockId::Persisted(id) => Some(*id),
            BlockId::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, BlockId::Local(_))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Persisted(id) => write!(f, "{id}"),
            BlockId::Local(id) => f.write_str(id),
        }
    }
}

impl From<i64> for BlockId {
    fn from(id: i64) -> Self {
        BlockId::Persisted(id)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        BlockId::Local(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Video,
    Image,
    Gallery,
    Link,
    Homework,
}

impl BlockType {
    pub const ALL: [BlockType; 6] = [
        BlockType::Text,
        BlockType::Video,
        BlockType::Image,
        BlockType::Gallery,
        BlockType::Link,
        BlockType::Homework,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Video => "video",
            BlockType::Image => "image",
            BlockType::Gallery => "gallery",
            BlockType::Link => "link",
            BlockType::Homework => "homework",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        BlockType::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    /// Human label used by the toolbar and drag overlay.
    pub fn label(&self) -> &'static str {
        match self {
            BlockType::Text => "Text",
            BlockType::Video => "Video",
            BlockType::Image => "Image",
            BlockType::Gallery => "Gallery",
            BlockType::Link => "Link",
            BlockType::Homework => "Homework",
        }
    }

    /// Types offered by the add toolbar. News containers hide homework.
    pub fn toolbar(hide_homework: bool) -> Vec<BlockType> {
        BlockType::ALL
            .into_iter()
            .filter(|t| !(hide_homework && *t == BlockType::Homework))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TextData {
    pub html: String,
    pub json: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoData {
    #[serde(deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub title: String,
    pub provider: Option<VideoProvider>,
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImageData {
    pub url: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub alt: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub caption: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub filename: String,
}

impl ImageData {
    /// Remove the picture: url, alt, caption and filename all reset.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GalleryImage {
    #[serde(deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub caption: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub alt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GalleryData {
    pub images: Vec<GalleryImage>,
}

impl GalleryData {
    /// Replace caption/alt of one image. Out-of-range index is ignored.
    pub fn update_image(&mut self, index: usize, caption: Option<&str>, alt: Option<&str>) {
        if let Some(image) = self.images.get_mut(index) {
            if let Some(caption) = caption {
                image.caption = caption.to_string();
            }
            if let Some(alt) = alt {
                image.alt = alt.to_string();
            }
        }
    }

    pub fn remove_image(&mut self, index: usize) -> Option<GalleryImage> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkData {
    #[serde(deserialize_with = "null_as_empty")]
    pub url: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub text: String,
    /// New tab unless the author turned it off.
    #[serde(deserialize_with = "null_as_true")]
    pub open_in_new_tab: bool,
}

impl Default for LinkData {
    fn default() -> Self {
        Self {
            url: String::new(),
            text: String::new(),
            open_in_new_tab: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionFormat {
    Pdf,
    Doc,
    Txt,
    Zip,
    Image,
    Video,
}

impl SubmissionFormat {
    pub const ALL: [SubmissionFormat; 6] = [
        SubmissionFormat::Pdf,
        SubmissionFormat::Doc,
        SubmissionFormat::Txt,
        SubmissionFormat::Zip,
        SubmissionFormat::Image,
        SubmissionFormat::Video,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SubmissionFormat::Pdf => "PDF",
            SubmissionFormat::Doc => "DOC/DOCX",
            SubmissionFormat::Txt => "TXT",
            SubmissionFormat::Zip => "ZIP/RAR",
            SubmissionFormat::Image => "Images",
            SubmissionFormat::Video => "Video",
        }
    }
}

pub const MIN_HOMEWORK_FILE_MB: u32 = 1;
pub const MAX_HOMEWORK_FILE_MB: u32 = 100;
pub const DEFAULT_HOMEWORK_FILE_MB: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct HomeworkData {
    #[serde(deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub deadline: String,
    #[serde(deserialize_with = "lenient_formats")]
    pub allowed_formats: BTreeSet<SubmissionFormat>,
    #[serde(deserialize_with = "lenient_file_size")]
    pub max_file_size: u32,
}

impl Default for HomeworkData {
    fn default() -> Self {
        Self {
            description: String::new(),
            deadline: String::new(),
            allowed_formats: BTreeSet::new(),
            max_file_size: DEFAULT_HOMEWORK_FILE_MB,
        }
    }
}

// Payloads written by the editor carry `null` for cleared inputs and
// `NaN` (serialized as null) for an emptied number field.

fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

fn null_as_true<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(de)?.unwrap_or(true))
}

/// Unknown format names are dropped instead of failing the whole payload.
fn lenient_formats<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeSet<SubmissionFormat>, D::Error> {
    let raw = Option::<Vec<Value>>::deserialize(de)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

/// Missing, zero or non-numeric sizes read as the default; the rest is
/// truncated to whole megabytes and clamped.
fn lenient_file_size<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    let mb = match Value::deserialize(de)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|mb| mb.is_finite())
    .map(f64::trunc)
    .filter(|mb| *mb != 0.0);
    Ok(match mb {
        Some(mb) => mb.clamp(MIN_HOMEWORK_FILE_MB as f64, MAX_HOMEWORK_FILE_MB as f64) as u32,
        None => DEFAULT_HOMEWORK_FILE_MB,
    })
}

impl HomeworkData {
    /// Checklist toggle: adds the format if absent, removes it otherwise.
    pub fn toggle_format(&mut self, format: SubmissionFormat) {
        if !self.allowed_formats.remove(&format) {
            self.allowed_formats.insert(format);
        }
    }

    /// Input-level clamp to `[1, 100]` MB.
    pub fn set_max_file_size(&mut self, mb: i64) {
        self.max_file_size = mb.clamp(MIN_HOMEWORK_FILE_MB as i64, MAX_HOMEWORK_FILE_MB as i64) as u32;
    }

    /// Deadline as an instant. Accepts RFC 3339 or the zone-less
    /// `YYYY-MM-DDThh:mm` form written by datetime inputs (read as UTC).
    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.deadline.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

/// Type-tagged payload. `Unknown` carries content the client does not
/// understand so it survives a load/save cycle untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockData {
    Text(TextData),
    Video(VideoData),
    Image(ImageData),
    Gallery(GalleryData),
    Link(LinkData),
    Homework(HomeworkData),
    Unknown { content_type: String, raw: Value },
}

impl BlockData {
    pub fn empty(kind: BlockType) -> Self {
        match kind {
            BlockType::Text => BlockData::Text(TextData::default()),
            BlockType::Video => BlockData::Video(VideoData::default()),
            BlockType::Image => BlockData::Image(ImageData::default()),
            BlockType::Gallery => BlockData::Gallery(GalleryData::default()),
            BlockType::Link => BlockData::Link(LinkData::default()),
            BlockType::Homework => BlockData::Homework(HomeworkData::default()),
        }
    }

    pub fn kind(&self) -> Option<BlockType> {
        match self {
            BlockData::Text(_) => Some(BlockType::Text),
            BlockData::Video(_) => Some(BlockType::Video),
            BlockData::Image(_) => Some(BlockType::Image),
            BlockData::Gallery(_) => Some(BlockType::Gallery),
            BlockData::Link(_) => Some(BlockType::Link),
            BlockData::Homework(_) => Some(BlockType::Homework),
            BlockData::Unknown { .. } => None,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            BlockData::Unknown { content_type, .. } => content_type,
            known => known.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }

    /// Build a payload from the wire `content_type` and `data` object.
    pub fn from_parts(content_type: &str, raw: Value) -> Self {
        let raw = if raw.is_null() { json!({}) } else { raw };
        let Some(kind) = BlockType::parse(content_type) else {
            return BlockData::Unknown {
                content_type: content_type.to_string(),
                raw,
            };
        };
        let parsed = match kind {
            BlockType::Text => serde_json::from_value(raw.clone()).map(BlockData::Text),
            BlockType::Video => serde_json::from_value(raw.clone()).map(BlockData::Video),
            BlockType::Image => serde_json::from_value(raw.clone()).map(BlockData::Image),
            BlockType::Gallery => serde_json::from_value(raw.clone()).map(BlockData::Gallery),
            BlockType::Link => serde_json::from_value(raw.clone()).map(BlockData::Link),
            BlockType::Homework => serde_json::from_value(raw.clone()).map(BlockData::Homework),
        };
        parsed.unwrap_or_else(|err| {
            warn!(?err, content_type, "payload does not match its type; keeping raw data");
            BlockData::Unknown {
                content_type: content_type.to_string(),
                raw,
            }
        })
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            BlockData::Text(d) => serde_json::to_value(d),
            BlockData::Video(d) => serde_json::to_value(d),
            BlockData::Image(d) => serde_json::to_value(d),
            BlockData::Gallery(d) => serde_json::to_value(d),
            BlockData::Link(d) => serde_json::to_value(d),
            BlockData::Homework(d) => serde_json::to_value(d),
            BlockData::Unknown { raw, .. } => return raw.clone(),
        };
        // Plain derived structs always serialize.
        value.unwrap_or_else(|_| json!({}))
    }
}

/// One content unit of a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBlock", into = "RawBlock")]
pub struct Block {
    pub id: BlockId,
    pub data: BlockData,
    pub order: usize,
    pub title: Option<String>,
    pub publish_datetime: Option<DateTime<Utc>>,
    pub is_published: Option<bool>,
}

impl Block {
    pub fn new(kind: BlockType, order: usize) -> Self {
        Self {
            id: BlockId::generate_local(),
            data: BlockData::empty(kind),
            order,
            title: None,
            publish_datetime: None,
            is_published: None,
        }
    }

    pub fn kind(&self) -> Option<BlockType> {
        self.data.kind()
    }

    pub fn content_type(&self) -> &str {
        self.data.content_type()
    }

    /// 1:1 field mapping from a persisted element.
    pub fn from_element(element: ElementRecord) -> Self {
        Self {
            id: BlockId::Persisted(element.id),
            data: BlockData::from_parts(&element.content_type, element.data),
            order: element.order.max(0) as usize,
            title: Some(element.title).filter(|t| !t.is_empty()),
            publish_datetime: element.publish_datetime,
            is_published: element.is_published,
        }
    }

    /// Request body for create/update. `order` is the list position at
    /// save time, never the cached field.
    pub fn to_element_body(&self, order: usize) -> ElementBody {
        ElementBody {
            section: None,
            news: None,
            content_type: self.content_type().to_string(),
            title: self.title.clone().unwrap_or_default(),
            data: self.data.to_value(),
            order,
            is_published: self.is_published.unwrap_or(true),
            publish_datetime: self.publish_datetime,
        }
    }
}

/// On-disk / JSON form of a block: `{id, type, data, order, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawBlock {
    id: BlockId,
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    order: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_datetime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_published: Option<bool>,
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        Self {
            id: raw.id,
            data: BlockData::from_parts(&raw.content_type, raw.data),
            order: raw.order,
            title: raw.title,
            publish_datetime: raw.publish_datetime,
            is_published: raw.is_published,
        }
    }
}

impl From<Block> for RawBlock {
    fn from(block: Block) -> Self {
        Self {
            content_type: block.content_type().to_string(),
            data: block.data.to_value(),
            id: block.id,
            order: block.order,
            title: block.title,
            publish_datetime: block.publish_datetime,
            is_published: block.is_published,
        }
    }
}

/// Parent entity owning an ordered block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRef {
    Section(i64),
    News(i64),
}

impl ContainerRef {
    /// Query/body key the backend uses for the parent reference.
    pub fn key(&self) -> &'static str {
        match self {
            ContainerRef::Section(_) => "section",
            ContainerRef::News(_) => "news",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            ContainerRef::Section(id) | ContainerRef::News(id) => *id,
        }
    }

    /// Homework is only offered inside course sections.
    pub fn allows_homework(&self) -> bool {
        matches!(self, ContainerRef::Section(_))
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key(), self.id())
    }
}

/// Persisted element as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementRecord {
    pub id: i64,
    pub content_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub publish_datetime: Option<DateTime<Utc>>,
}

/// Body of create (POST) and update (PATCH) element requests.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ElementBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub news: Option<i64>,
    pub content_type: String,
    pub title: String,
    pub data: Value,
    pub order: usize,
    pub is_published: bool,
    pub publish_datetime: Option<DateTime<Utc>>,
}

impl ElementBody {
    pub fn in_container(mut self, container: ContainerRef) -> Self {
        match container {
            ContainerRef::Section(id) => self.section = Some(id),
            ContainerRef::News(id) => self.news = Some(id),
        }
        self
    }
}

/// Course section with its elements, as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[serde(default)]
    pub publish_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elements: Vec<ElementRecord>,
}

fn default_true() -> bool {
    true
}
