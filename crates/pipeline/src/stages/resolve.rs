//! Resolve stage: turn a remote page URL into a direct media URL.
//!
//! Direct media links (by content type or extension) pass through
//! untouched. For HTML pages we extract the first media candidate:
//! `og:video`/`og:audio` meta tags, then `<video>`/`<audio>`/`<source>`
//! elements, then bare media-file links.

use regex::Regex;

use es_domain::error::{Error, Result};

const MEDIA_EXTENSIONS: &[&str] = &[
    ".mp3", ".mp4", ".m4a", ".wav", ".flac", ".ogg", ".webm", ".aac", ".mov", ".mkv",
];

fn looks_like_media_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Pull the first direct media URL out of an HTML document.
pub fn extract_media_url(html: &str) -> Option<String> {
    // og:video / og:audio meta content.
    let og = Regex::new(
        r#"<meta[^>]+property=["']og:(?:video|audio)(?::url|:secure_url)?["'][^>]+content=["']([^"']+)["']"#,
    )
    .expect("static regex");
    if let Some(cap) = og.captures(html) {
        return Some(cap[1].to_string());
    }

    // <video src=>, <audio src=>, <source src=>.
    let tag = Regex::new(r#"<(?:video|audio|source)[^>]+src=["']([^"']+)["']"#).expect("static regex");
    if let Some(cap) = tag.captures(html) {
        return Some(cap[1].to_string());
    }

    // Bare links to media files.
    let link = Regex::new(r#"href=["']([^"']+)["']"#).expect("static regex");
    for cap in link.captures_iter(html) {
        if looks_like_media_url(&cap[1]) {
            return Some(cap[1].to_string());
        }
    }

    None
}

/// Resolve a remote URL to something downloadable.
pub async fn resolve(client: &reqwest::Client, url: &str) -> Result<String> {
    if looks_like_media_url(url) {
        return Ok(url.to_string());
    }

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // The URL itself serves media despite its shape.
    if content_type.starts_with("audio/") || content_type.starts_with("video/") {
        return Ok(url.to_string());
    }

    let html = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
    extract_media_url(&html).ok_or_else(|| {
        Error::InvalidFormat(format!("no media URL found at {url}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_media_urls_are_recognized() {
        assert!(looks_like_media_url("https://cdn.example.com/ep1.mp3"));
        assert!(looks_like_media_url("https://cdn.example.com/ep1.MP4?sig=x"));
        assert!(!looks_like_media_url("https://example.com/watch?v=abc"));
    }

    #[test]
    fn og_video_meta_wins() {
        let html = r#"
            <html><head>
            <meta property="og:video:secure_url" content="https://cdn.example.com/talk.mp4"/>
            </head><body><video src="https://cdn.example.com/other.mp4"></video></body></html>
        "#;
        assert_eq!(
            extract_media_url(html).as_deref(),
            Some("https://cdn.example.com/talk.mp4")
        );
    }

    #[test]
    fn falls_back_to_source_tags_then_links() {
        let html = r#"<audio><source src="https://cdn.example.com/pod.m4a"></audio>"#;
        assert_eq!(
            extract_media_url(html).as_deref(),
            Some("https://cdn.example.com/pod.m4a")
        );

        let links = r#"<a href="/about">about</a> <a href="/files/ep2.mp3">episode</a>"#;
        assert_eq!(extract_media_url(links).as_deref(), Some("/files/ep2.mp3"));
    }

    #[test]
    fn pages_without_media_yield_none() {
        assert_eq!(extract_media_url("<html><body>nothing here</body></html>"), None);
    }
}
