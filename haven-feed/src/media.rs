//! Media references found in records.

use once_cell::sync::Lazy;
use regex::Regex;

use haven_core::types::{MediaKind, MediaReference, RecordKind};
use haven_core::Record;

static MEDIA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(https?://\S+?\.(?:jpg|jpeg|png|gif|webp|mp4|mov|webm)(?:\?\S+)?)|(https?://\S+?/blossom/[a-f0-9]{64})",
    )
    .expect("valid media regex")
});

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".webm"];

/// Media carried by `record`: the `url` tag of a file-metadata record, or
/// every image/video URL in a note's text.
pub fn extract_media(record: &Record) -> Vec<MediaReference> {
    let added_at = record.created_at_utc();
    if record.kind == RecordKind::FILE_METADATA {
        let Some(url) = record.tag_value("url").filter(|url| is_http(url)) else {
            return Vec::new();
        };
        let kind = match record.tag_value("m") {
            Some(mime) if mime.starts_with("video/") => MediaKind::Video,
            Some(_) => MediaKind::Image,
            None => kind_from_url(url),
        };
        return vec![MediaReference::new(url, kind, added_at)];
    }
    media_urls(&record.content)
        .map(|url| MediaReference::new(url, kind_from_url(url), added_at))
        .collect()
}

/// Image and video URLs embedded in free text, in order of appearance.
pub fn media_urls(content: &str) -> impl Iterator<Item = &str> {
    MEDIA_URL.find_iter(content).map(|m| m.as_str())
}

pub fn kind_from_url(url: &str) -> MediaKind {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(kind: u32, content: &str, tags: &[&[&str]]) -> Record {
        Record {
            id: "id".to_string(),
            author_key: "pk".to_string(),
            created_at: 1_700_000_000,
            kind: RecordKind(kind),
            tags: tags
                .iter()
                .map(|tag| tag.iter().map(|s| s.to_string()).collect())
                .collect(),
            content: content.to_string(),
            sig: None,
        }
    }

    #[rstest]
    #[case("look https://img.example.com/cat.JPG nice", vec!["https://img.example.com/cat.JPG"])]
    #[case("https://x.io/a.png?w=200 and http://y.io/b.mp4", vec!["https://x.io/a.png?w=200", "http://y.io/b.mp4"])]
    #[case(
        "blob https://cdn.example.com/blossom/0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef end",
        vec!["https://cdn.example.com/blossom/0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"]
    )]
    #[case("https://example.com/page.html", vec![])]
    #[case("no links at all", vec![])]
    fn finds_media_urls(#[case] content: &str, #[case] expected: Vec<&str>) {
        assert_eq!(media_urls(content).collect::<Vec<_>>(), expected);
    }

    #[rstest]
    #[case("https://a.io/v.mp4", MediaKind::Video)]
    #[case("https://a.io/v.WEBM?x=1", MediaKind::Video)]
    #[case("https://a.io/p.gif", MediaKind::Image)]
    fn kinds(#[case] url: &str, #[case] kind: MediaKind) {
        assert_eq!(kind_from_url(url), kind);
    }

    #[test]
    fn note_media_from_content() {
        let media = extract_media(&record(1, "https://a.io/x.mov https://a.io/y.png", &[]));
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].kind, MediaKind::Video);
        assert_eq!(media[1].kind, MediaKind::Image);
        assert_eq!(media[0].added_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn file_metadata_uses_url_tag() {
        let rec = record(
            1063,
            "ignored https://a.io/z.png",
            &[&["url", "https://files.io/clip"], &["m", "video/mp4"]],
        );
        let media = extract_media(&rec);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].url, "https://files.io/clip");
        assert_eq!(media[0].kind, MediaKind::Video);

        assert!(extract_media(&record(1063, "", &[&["url", "not a url"]])).is_empty());
        assert!(extract_media(&record(1063, "", &[])).is_empty());
    }
}
