//! Video URL classification and embed URL derivation.
//!
//! Known hosts are matched by URL shape; anything else that is a
//! well-formed embed-looking URL is accepted as `custom` and embedded as-is.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::VideoData;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VideoProvider {
    Youtube,
    Vimeo,
    Vk,
    Rutube,
    Dzen,
    Custom,
}

impl VideoProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoProvider::Youtube => "youtube",
            VideoProvider::Vimeo => "vimeo",
            VideoProvider::Vk => "vk",
            VideoProvider::Rutube => "rutube",
            VideoProvider::Dzen => "dzen",
            VideoProvider::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoProvider::Youtube => "YouTube",
            VideoProvider::Vimeo => "Vimeo",
            VideoProvider::Vk => "VK Video",
            VideoProvider::Rutube => "Rutube",
            VideoProvider::Dzen => "Dzen",
            VideoProvider::Custom => "Embed video",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVideo {
    pub provider: VideoProvider,
    pub video_id: String,
}

impl ParsedVideo {
    pub fn embed_url(&self) -> String {
        embed_url(self.provider, &self.video_id)
    }
}

static YOUTUBE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"youtube\.com/watch\?(?:[^#]*&)?v=([A-Za-z0-9_-]{11})",
        r"youtu\.be/([A-Za-z0-9_-]{11})",
        r"youtube(?:-nocookie)?\.com/embed/([A-Za-z0-9_-]{11})",
        r"youtube\.com/v/([A-Za-z0-9_-]{11})",
        r"youtube\.com/shorts/([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid youtube pattern"))
    .collect()
});

static VIMEO: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"player\.vimeo\.com/video/(\d+)",
        r"vimeo\.com/(?:channels/[^/]+/|groups/[^/]+/videos/|video/)?(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid vimeo pattern"))
    .collect()
});

static VK_EXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:vk\.com|vkvideo\.ru)/video_ext\.php\?(?:[^#]*&)?oid=(-?\d+)&(?:[^#]*&)?id=(\d+)")
        .expect("valid vk embed pattern")
});

static VK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:vk\.com|vkvideo\.ru)/(?:[^#]*[?&]z=)?video(-?\d+)_(\d+)").expect("valid vk pattern")
});

static RUTUBE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"rutube\.ru/(?:video|play/embed|shorts)/([A-Za-z0-9]+)").expect("valid rutube pattern")
});

static DZEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"dzen\.ru/(?:video/watch|embed|shorts)/([A-Za-z0-9_-]+)").expect("valid dzen pattern")
});

static IFRAME_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid iframe pattern")
});

/// Classify a URL. Returns `None` when nothing recognizes it, including
/// strings that are not URLs at all.
pub fn parse_video_url(url: &str) -> Option<ParsedVideo> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let found = |provider: VideoProvider, video_id: String| Some(ParsedVideo { provider, video_id });

    if let Some(id) = YOUTUBE.iter().find_map(|re| re.captures(url).map(|c| c[1].to_string())) {
        return found(VideoProvider::Youtube, id);
    }
    if let Some(id) = VIMEO.iter().find_map(|re| re.captures(url).map(|c| c[1].to_string())) {
        return found(VideoProvider::Vimeo, id);
    }
    if let Some(c) = VK_EXT.captures(url).or_else(|| VK.captures(url)) {
        return found(VideoProvider::Vk, format!("{}_{}", &c[1], &c[2]));
    }
    if let Some(c) = RUTUBE.captures(url) {
        return found(VideoProvider::Rutube, c[1].to_string());
    }
    if let Some(c) = DZEN.captures(url) {
        return found(VideoProvider::Dzen, c[1].to_string());
    }

    let parsed = Url::parse(url).ok()?;
    let embed_like = url.contains("/embed/") || url.contains("player.");
    match parsed.scheme() {
        "https" => found(VideoProvider::Custom, url.to_string()),
        "http" if embed_like => found(VideoProvider::Custom, url.to_string()),
        _ => None,
    }
}

pub fn embed_url(provider: VideoProvider, video_id: &str) -> String {
    match provider {
        VideoProvider::Youtube => format!("https://www.youtube.com/embed/{video_id}"),
        VideoProvider::Vimeo => format!("https://player.vimeo.com/video/{video_id}"),
        VideoProvider::Vk => {
            let (oid, id) = video_id.split_once('_').unwrap_or((video_id, ""));
            format!("https://vk.com/video_ext.php?oid={oid}&id={id}&hd=2")
        }
        VideoProvider::Rutube => format!("https://rutube.ru/play/embed/{video_id}"),
        VideoProvider::Dzen => format!(
            "https://dzen.ru/embed/{video_id}?from_block=partner&from=zen&mute=0&autoplay=0&tv=0"
        ),
        VideoProvider::Custom => video_id.to_string(),
    }
}

/// Pull the `src` attribute out of a pasted `<iframe>` snippet.
pub fn extract_url_from_iframe(code: &str) -> Option<String> {
    IFRAME_SRC
        .captures(code)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Apply what the author typed into the URL field of a video block.
///
/// Empty input clears the video. On error the caller keeps the previous
/// payload and shows no preview.
pub fn apply_url_input(current: &VideoData, input: &str) -> Result<VideoData, ValidationError> {
    let mut input = input.trim().to_string();
    if input.is_empty() {
        return Ok(VideoData {
            title: current.title.clone(),
            ..VideoData::default()
        });
    }

    if input.starts_with("<iframe") {
        input = extract_url_from_iframe(&input).ok_or(ValidationError::IframeWithoutSrc)?;
    }

    let parsed = parse_video_url(&input).ok_or_else(|| ValidationError::UnsupportedVideoUrl(input.clone()))?;
    Ok(VideoData {
        url: input,
        title: current.title.clone(),
        provider: Some(parsed.provider),
        video_id: Some(parsed.video_id),
    })
}

/// Embed URL of a stored payload, if it carries a classified video.
pub fn embed_for(data: &VideoData) -> Option<String> {
    match (data.provider, data.video_id.as_deref()) {
        (Some(provider), Some(id)) if !id.is_empty() => Some(embed_url(provider, id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(url: &str) -> (VideoProvider, String) {
        let p = parse_video_url(url).unwrap_or_else(|| panic!("no match for {url}"));
        (p.provider, p.video_id)
    }

    #[test]
    fn youtube_shapes() {
        let id = "dQw4w9WgXcQ".to_string();
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            assert_eq!(parsed(url), (VideoProvider::Youtube, id.clone()), "{url}");
        }
    }

    #[test]
    fn vimeo_shapes() {
        assert_eq!(parsed("https://vimeo.com/12345"), (VideoProvider::Vimeo, "12345".into()));
        assert_eq!(
            parsed("https://player.vimeo.com/video/76979871"),
            (VideoProvider::Vimeo, "76979871".into())
        );
    }

    #[test]
    fn vk_keeps_negative_owner() {
        assert_eq!(
            parsed("https://vk.com/video-22822305_456239018"),
            (VideoProvider::Vk, "-22822305_456239018".into())
        );
        assert_eq!(
            parsed("https://vk.com/video_ext.php?oid=123&id=456&hash=abc"),
            (VideoProvider::Vk, "123_456".into())
        );
        assert_eq!(
            embed_url(VideoProvider::Vk, "-22822305_456239018"),
            "https://vk.com/video_ext.php?oid=-22822305&id=456239018&hd=2"
        );
    }

    #[test]
    fn rutube_and_dzen() {
        assert_eq!(
            parsed("https://rutube.ru/video/c6cc4d620b1d4338901770a44b3e82f4/"),
            (VideoProvider::Rutube, "c6cc4d620b1d4338901770a44b3e82f4".into())
        );
        let (provider, id) = parsed("https://dzen.ru/video/watch/6450b2c0e4ad0a1c4e0a12b3");
        assert_eq!(provider, VideoProvider::Dzen);
        assert!(embed_url(provider, &id).starts_with("https://dzen.ru/embed/6450b2c0e4ad0a1c4e0a12b3?"));
    }

    #[test]
    fn permissive_custom_fallback() {
        let url = "https://media.example.org/watch/abc";
        assert_eq!(parsed(url), (VideoProvider::Custom, url.into()));
        assert_eq!(embed_url(VideoProvider::Custom, url), url);

        let http_embed = "http://cdn.example.org/embed/42";
        assert_eq!(parsed(http_embed).0, VideoProvider::Custom);
        assert!(parse_video_url("http://example.org/plain").is_none());
    }

    #[test]
    fn rejects_non_urls() {
        assert!(parse_video_url("not a url").is_none());
        assert!(parse_video_url("").is_none());
    }

    #[test]
    fn iframe_input_is_unwrapped() {
        let code = r#"<iframe width="560" src="https://www.youtube.com/embed/dQw4w9WgXcQ" allowfullscreen></iframe>"#;
        let data = apply_url_input(&VideoData::default(), code).unwrap();
        assert_eq!(data.url, "https://www.youtube.com/embed/dQw4w9WgXcQ");
        assert_eq!(data.provider, Some(VideoProvider::Youtube));

        let err = apply_url_input(&VideoData::default(), "<iframe></iframe>").unwrap_err();
        assert_eq!(err, ValidationError::IframeWithoutSrc);
    }

    #[test]
    fn invalid_input_is_a_validation_error_and_empty_clears() {
        let current = VideoData {
            url: "https://vimeo.com/1".into(),
            title: "Lecture".into(),
            provider: Some(VideoProvider::Vimeo),
            video_id: Some("1".into()),
        };
        assert!(matches!(
            apply_url_input(&current, "garbage"),
            Err(ValidationError::UnsupportedVideoUrl(_))
        ));

        let cleared = apply_url_input(&current, "   ").unwrap();
        assert_eq!(cleared.title, "Lecture");
        assert_eq!(cleared.provider, None);
        assert_eq!(embed_for(&cleared), None);
    }
}
