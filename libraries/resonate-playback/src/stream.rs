//! Live-stream detection
//!
//! Live sources have no meaningful duration, so seeking and rate changes are
//! disabled for them. Detection is a fixed set of URL heuristics.

/// Case-insensitive substrings that mark a URL as a live stream
pub const LIVE_STREAM_PATTERNS: &[&str] = &[
    ".m3u8",
    ".pls",
    "/stream",
    "/live",
    "icecast",
    "shoutcast",
    ":8000/",
    ":8443/",
    "radio.",
];

/// Whether `url` looks like a live stream
pub fn is_live_stream(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    LIVE_STREAM_PATTERNS
        .iter()
        .any(|pattern| url.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_stream_shapes() {
        assert!(is_live_stream("https://cdn.example.com/hls/master.m3u8"));
        assert!(is_live_stream("http://example.com/listen.pls"));
        assert!(is_live_stream("https://example.com/stream"));
        assert!(is_live_stream("https://Example.com/LIVE/news"));
        assert!(is_live_stream("http://icecast.example.org/jazz"));
        assert!(is_live_stream("http://203.0.113.5:8000/mount"));
        assert!(is_live_stream("https://radio.example.fm/aac"));
    }

    #[test]
    fn plain_files_are_not_streams() {
        assert!(!is_live_stream("https://cdn.example.com/album/01.mp3"));
        assert!(!is_live_stream("blob:https://app/3f2a"));
        assert!(!is_live_stream("file:///music/track.flac"));
    }
}
