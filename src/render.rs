//! Type dispatch for the two block views: the editable form and the
//! read-only preview. Unknown types get a visible fallback in both.
use chrono::{DateTime, Utc};
use reqwest::Url;
use std::ops::RangeInclusive;

use crate::error::ValidationError;
use crate::model::{
    Block, BlockData, GalleryImage, HomeworkData, SectionRecord, SubmissionFormat, MAX_HOMEWORK_FILE_MB,
    MIN_HOMEWORK_FILE_MB,
};
use crate::video::{embed_for, parse_video_url};
use crate::visibility::{gated_blocks, homework_open, section_visibility, Viewer, Visibility};

#[derive(Debug, Clone, PartialEq)]
pub struct VideoForm {
    pub url: String,
    pub title: String,
    pub provider: Option<&'static str>,
    pub embed_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageForm<'a> {
    pub url: Option<&'a str>,
    pub alt: &'a str,
    pub caption: &'a str,
    pub filename: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkForm<'a> {
    pub url: &'a str,
    pub text: &'a str,
    pub open_in_new_tab: bool,
    pub error: Option<ValidationError>,
    /// Set only when the URL is valid.
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomeworkForm<'a> {
    pub description: &'a str,
    pub deadline: &'a str,
    pub formats: Vec<(SubmissionFormat, bool)>,
    pub max_file_size: u32,
    pub size_range: RangeInclusive<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditView<'a> {
    Text { html: &'a str },
    Video(VideoForm),
    Image(ImageForm<'a>),
    Gallery { images: &'a [GalleryImage] },
    Link(LinkForm<'a>),
    Homework(HomeworkForm<'a>),
    Unknown { content_type: &'a str },
}

/// Live URL check for link blocks. Empty input is not an error; an
/// invalid URL only disables the preview, the raw value is still stored.
pub fn link_url_error(url: &str) -> Option<ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    Url::parse(url)
        .err()
        .map(|_| ValidationError::InvalidUrl(url.to_string()))
}

pub fn edit_view(block: &Block) -> EditView<'_> {
    match &block.data {
        BlockData::Text(text) => EditView::Text { html: &text.html },
        BlockData::Video(video) => {
            // Re-derive from the URL so a stale provider never drives the embed.
            let parsed = parse_video_url(&video.url);
            EditView::Video(VideoForm {
                url: video.url.clone(),
                title: video.title.clone(),
                provider: parsed.as_ref().map(|p| p.provider.display_name()),
                embed_url: parsed.map(|p| p.embed_url()),
            })
        }
        BlockData::Image(image) => EditView::Image(ImageForm {
            url: image.url.as_deref().filter(|u| !u.is_empty()),
            alt: &image.alt,
            caption: &image.caption,
            filename: &image.filename,
        }),
        BlockData::Gallery(gallery) => EditView::Gallery {
            images: &gallery.images,
        },
        BlockData::Link(link) => {
            let error = link_url_error(&link.url);
            let preview_url = (error.is_none() && !link.url.trim().is_empty()).then(|| link.url.trim().to_string());
            EditView::Link(LinkForm {
                url: &link.url,
                text: &link.text,
                open_in_new_tab: link.open_in_new_tab,
                error,
                preview_url,
            })
        }
        BlockData::Homework(hw) => EditView::Homework(homework_form(hw)),
        BlockData::Unknown { content_type, .. } => EditView::Unknown { content_type },
    }
}

fn homework_form(hw: &HomeworkData) -> HomeworkForm<'_> {
    HomeworkForm {
        description: &hw.description,
        deadline: &hw.deadline,
        formats: SubmissionFormat::ALL
            .into_iter()
            .map(|f| (f, hw.allowed_formats.contains(&f)))
            .collect(),
        max_file_size: hw.max_file_size,
        size_range: MIN_HOMEWORK_FILE_MB..=MAX_HOMEWORK_FILE_MB,
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_attr(s: &str) -> String {
    html_escape(s).replace('"', "&quot;")
}

fn display_datetime(at: DateTime<Utc>) -> String {
    at.format("%d.%m.%Y %H:%M").to_string()
}

/// Preview markup of one block, or `None` when its payload is still empty.
pub fn preview_block(block: &Block, now: DateTime<Utc>) -> Option<String> {
    match &block.data {
        BlockData::Text(text) => {
            (!text.html.is_empty()).then(|| format!("<div class=\"preview-text\">{}</div>", text.html))
        }
        BlockData::Video(video) => {
            let src = embed_for(video)?;
            let heading = if video.title.is_empty() {
                String::new()
            } else {
                format!("<h4>{}</h4>", html_escape(&video.title))
            };
            let title = if video.title.is_empty() { "Video" } else { video.title.as_str() };
            Some(format!(
                "<div class=\"preview-video\">{heading}<iframe src=\"{}\" title=\"{}\" allowfullscreen></iframe></div>",
                html_attr(&src),
                html_attr(title)
            ))
        }
        BlockData::Image(image) => {
            let url = image.url.as_deref().filter(|u| !u.is_empty())?;
            let alt = if image.alt.is_empty() { "Image" } else { image.alt.as_str() };
            let caption = if image.caption.is_empty() {
                String::new()
            } else {
                format!("<div class=\"caption\">{}</div>", html_escape(&image.caption))
            };
            Some(format!(
                "<div class=\"preview-image\"><img src=\"{}\" alt=\"{}\">{caption}</div>",
                html_attr(url),
                html_attr(alt)
            ))
        }
        BlockData::Gallery(gallery) => {
            if gallery.images.is_empty() {
                return None;
            }
            let figures: String = gallery
                .images
                .iter()
                .map(|img| {
                    let caption = if img.caption.is_empty() {
                        String::new()
                    } else {
                        format!("<figcaption>{}</figcaption>", html_escape(&img.caption))
                    };
                    format!(
                        "<figure><img src=\"{}\" alt=\"{}\">{caption}</figure>",
                        html_attr(&img.url),
                        html_attr(&img.alt)
                    )
                })
                .collect();
            Some(format!("<div class=\"preview-gallery\">{figures}</div>"))
        }
        BlockData::Link(link) => {
            if link.url.trim().is_empty() {
                return None;
            }
            let label = if link.text.is_empty() { &link.url } else { &link.text };
            let (target, marker) = if link.open_in_new_tab {
                (" target=\"_blank\" rel=\"noopener noreferrer\"", " ↗")
            } else {
                ("", "")
            };
            Some(format!(
                "<div class=\"preview-link\"><a href=\"{}\"{target}>{}{marker}</a></div>",
                html_attr(&link.url),
                html_escape(label)
            ))
        }
        BlockData::Homework(hw) => preview_homework(hw, now),
        BlockData::Unknown { content_type, .. } => Some(format!(
            "<div class=\"block-unknown\">Unknown block type: {}</div>",
            html_escape(content_type)
        )),
    }
}

fn preview_homework(hw: &HomeworkData, now: DateTime<Utc>) -> Option<String> {
    if hw.description.is_empty() {
        return None;
    }
    let mut meta = String::new();
    if let Some(deadline) = hw.deadline_at() {
        let state = if homework_open(hw, now) { "open" } else { "closed" };
        meta.push_str(&format!(
            "<div class=\"deadline {state}\"><strong>Deadline:</strong> {}</div>",
            display_datetime(deadline)
        ));
    }
    if !hw.allowed_formats.is_empty() {
        let labels: Vec<&str> = hw.allowed_formats.iter().map(|f| f.label()).collect();
        meta.push_str(&format!(
            "<div><strong>Allowed formats:</strong> {}</div>",
            html_escape(&labels.join(", "))
        ));
    }
    meta.push_str(&format!(
        "<div><strong>Max file size:</strong> {} MB</div>",
        hw.max_file_size
    ));
    Some(format!(
        "<div class=\"preview-homework\"><h4>Homework</h4><div class=\"preview-homework-content\">{}</div><div class=\"preview-homework-meta\">{meta}</div></div>",
        html_escape(&hw.description)
    ))
}

const EMPTY_PREVIEW: &str =
    "<div class=\"empty-state\"><h3>Nothing to preview</h3><p>Add blocks in the editor to see them here</p></div>";

/// Editor preview of the whole list, ungated.
pub fn preview_blocks(blocks: &[Block], now: DateTime<Utc>) -> String {
    if blocks.is_empty() {
        return EMPTY_PREVIEW.to_string();
    }
    let inner: String = blocks
        .iter()
        .map(|b| {
            format!(
                "<div class=\"preview-block\">{}</div>",
                preview_block(b, now).unwrap_or_default()
            )
        })
        .collect();
    format!("<div class=\"block-preview\">{inner}</div>")
}

/// Viewer-facing rendering: hidden blocks are skipped, locked ones show
/// when they open instead of their content.
pub fn render_for_viewer(blocks: &[Block], viewer: Viewer, now: DateTime<Utc>) -> String {
    let inner: String = gated_blocks(blocks, viewer, now)
        .into_iter()
        .map(|(block, visibility)| match visibility {
            Visibility::Locked { until } => format!(
                "<div class=\"locked-content\">Opens {}</div>",
                display_datetime(until)
            ),
            _ => preview_block(block, now).unwrap_or_default(),
        })
        .filter(|html| !html.is_empty())
        .collect();
    format!("<div class=\"block-content\">{inner}</div>")
}

/// One course section as a viewer sees it. `None` when the section is
/// hidden from them; a locked section shows only its title and opening date.
pub fn render_section(section: &SectionRecord, viewer: Viewer, now: DateTime<Utc>) -> Option<String> {
    let title = html_escape(&section.title);
    match section_visibility(section, viewer, now) {
        Visibility::Hidden => None,
        Visibility::Locked { until } => Some(format!(
            "<section class=\"locked-section\"><h2>{title}</h2><div class=\"locked-content\">Opens {}</div></section>",
            display_datetime(until)
        )),
        Visibility::Visible => {
            let blocks: Vec<Block> = section.elements.iter().cloned().map(Block::from_element).collect();
            Some(format!(
                "<section><h2>{title}</h2>{}</section>",
                render_for_viewer(&blocks, viewer, now)
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockType, GalleryData, LinkData, VideoData};
    use crate::video::VideoProvider;
    use chrono::Duration;
    use serde_json::json;

    fn block_with(data: BlockData) -> Block {
        let kind = data.kind().unwrap_or(BlockType::Text);
        let mut block = Block::new(kind, 0);
        block.data = data;
        block
    }

    #[test]
    fn unknown_type_falls_back_in_both_views() {
        let block = block_with(BlockData::from_parts("quiz", json!({})));
        assert_eq!(edit_view(&block), EditView::Unknown { content_type: "quiz" });
        let html = preview_block(&block, Utc::now()).unwrap();
        assert!(html.contains("Unknown block type: quiz"));
    }

    #[test]
    fn link_validation_only_gates_preview() {
        let block = block_with(BlockData::Link(LinkData {
            url: "not a url".into(),
            text: "x".into(),
            open_in_new_tab: false,
        }));
        match edit_view(&block) {
            EditView::Link(form) => {
                assert!(matches!(form.error, Some(ValidationError::InvalidUrl(_))));
                assert_eq!(form.preview_url, None);
                assert_eq!(form.url, "not a url");
            }
            other => panic!("unexpected view {other:?}"),
        }
        assert_eq!(link_url_error(""), None);
        assert_eq!(link_url_error("https://example.com"), None);
    }

    #[test]
    fn link_preview_new_tab_and_label_fallback() {
        let block = block_with(BlockData::Link(LinkData {
            url: "https://example.com/?a=1&b=2".into(),
            text: String::new(),
            open_in_new_tab: true,
        }));
        let html = preview_block(&block, Utc::now()).unwrap();
        assert!(html.contains("target=\"_blank\""));
        assert!(html.contains(">https://example.com/?a=1&amp;b=2 ↗</a>"));
    }

    #[test]
    fn video_views_use_embed_url() {
        let block = block_with(BlockData::Video(VideoData {
            url: "https://vimeo.com/12345".into(),
            title: "Intro".into(),
            provider: Some(VideoProvider::Vimeo),
            video_id: Some("12345".into()),
        }));
        match edit_view(&block) {
            EditView::Video(form) => {
                assert_eq!(form.provider, Some("Vimeo"));
                assert_eq!(form.embed_url.as_deref(), Some("https://player.vimeo.com/video/12345"));
            }
            other => panic!("unexpected view {other:?}"),
        }
        let html = preview_block(&block, Utc::now()).unwrap();
        assert!(html.contains("src=\"https://player.vimeo.com/video/12345\""));
        assert!(html.contains("<h4>Intro</h4>"));
    }

    #[test]
    fn empty_payloads_render_nothing() {
        let now = Utc::now();
        for kind in BlockType::ALL {
            assert_eq!(preview_block(&Block::new(kind, 0), now), None, "{kind:?}");
        }
        assert!(preview_blocks(&[], now).contains("Nothing to preview"));
    }

    #[test]
    fn gallery_preview_escapes_captions() {
        let block = block_with(BlockData::Gallery(GalleryData {
            images: vec![GalleryImage {
                url: "https://cdn/a.jpg".into(),
                caption: "<b>A</b>".into(),
                alt: "a".into(),
            }],
        }));
        let html = preview_block(&block, Utc::now()).unwrap();
        assert!(html.contains("&lt;b&gt;A&lt;/b&gt;"));
    }

    #[test]
    fn homework_form_lists_every_format() {
        let mut hw = HomeworkData::default();
        hw.toggle_format(SubmissionFormat::Txt);
        let block = block_with(BlockData::Homework(hw));
        match edit_view(&block) {
            EditView::Homework(form) => {
                assert_eq!(form.formats.len(), 6);
                assert!(form.formats.contains(&(SubmissionFormat::Txt, true)));
                assert_eq!(form.size_range, 1..=100);
                assert_eq!(form.max_file_size, 10);
            }
            other => panic!("unexpected view {other:?}"),
        }
    }

    #[test]
    fn viewer_rendering_shows_lock_placeholder() {
        let now = Utc::now();
        let mut locked = block_with(BlockData::Link(LinkData {
            url: "https://example.com".into(),
            ..Default::default()
        }));
        locked.publish_datetime = Some(now + Duration::days(1));
        let blocks = vec![locked];

        let regular = render_for_viewer(&blocks, Viewer::Regular, now);
        assert!(regular.contains("locked-content"));
        assert!(!regular.contains("example.com"));

        let admin = render_for_viewer(&blocks, Viewer::Privileged, now);
        assert!(admin.contains("example.com"));
    }

    #[test]
    fn sections_follow_their_own_gate() {
        let now = Utc::now();
        let mut section = SectionRecord {
            id: 1,
            title: "Week <1>".into(),
            order: 0,
            is_published: true,
            publish_datetime: Some(now + Duration::hours(2)),
            elements: Vec::new(),
        };

        let locked = render_section(&section, Viewer::Regular, now).unwrap();
        assert!(locked.contains("Week &lt;1&gt;"));
        assert!(locked.contains("Opens"));

        section.is_published = false;
        assert!(render_section(&section, Viewer::Regular, now).is_none());
        assert!(render_section(&section, Viewer::Privileged, now).is_some());
    }
}
