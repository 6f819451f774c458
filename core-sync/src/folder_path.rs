//! Folder template expansion for copy-in.
//!
//! A template such as `"%a/%b"` is split on `/`; each non-empty segment has
//! `%a` (artist), `%b` (album) and `%g` (genre) substituted, with
//! "Unknown Artist", "Unknown Album" and "Unknown Genre" standing in for
//! missing values. Any other `%` sequence is kept as written. The expanded
//! segments are resolved one level at a time below the device's default
//! parent folder by [`DeviceSession::resolve_folder_path`].
//!
//! [`DeviceSession::resolve_folder_path`]: core_device::DeviceSession::resolve_folder_path

use core_library::HostTrack;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_GENRE: &str = "Unknown Genre";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Artist,
    Album,
    Genre,
}

/// Parsed folder template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderTemplate {
    raw: String,
    segments: Vec<Vec<Token>>,
}

impl FolderTemplate {
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .filter(|s| !s.trim().is_empty())
            .map(tokenize)
            .collect();
        Self {
            raw: template.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// No segments: tracks go straight into the default parent folder.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Folder names for `track`, outermost first.
    pub fn expand(&self, track: &HostTrack) -> Vec<String> {
        let artist = or_unknown(&track.artist, UNKNOWN_ARTIST);
        let album = or_unknown(&track.album, UNKNOWN_ALBUM);
        let genre = or_unknown(&track.genre, UNKNOWN_GENRE);

        self.segments
            .iter()
            .map(|tokens| {
                let mut name = String::new();
                for token in tokens {
                    match token {
                        Token::Literal(text) => name.push_str(text),
                        Token::Artist => name.push_str(&artist),
                        Token::Album => name.push_str(&album),
                        Token::Genre => name.push_str(&genre),
                    }
                }
                name.trim().to_string()
            })
            .filter(|name| !name.is_empty())
            .collect()
    }
}

impl Default for FolderTemplate {
    fn default() -> Self {
        Self::parse(core_runtime::config::DEFAULT_FOLDER_TEMPLATE)
    }
}

impl std::fmt::Display for FolderTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn tokenize(segment: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            literal.push(c);
            continue;
        }
        let token = match chars.peek() {
            Some('a') => Token::Artist,
            Some('b') => Token::Album,
            Some('g') => Token::Genre,
            _ => {
                literal.push(c);
                continue;
            }
        };
        chars.next();
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        tokens.push(token);
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

/// Metadata value with a fallback. A `/` would read as a path separator on
/// most devices and is replaced.
fn or_unknown(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.replace('/', "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> HostTrack {
        HostTrack::new("Song")
            .with_artist("Foo")
            .with_album("Bar")
            .with_genre("Rock")
    }

    #[test]
    fn test_expand_default_template() {
        let template = FolderTemplate::parse("%a/%b");
        assert_eq!(template.depth(), 2);
        assert_eq!(template.expand(&track()), vec!["Foo", "Bar"]);
    }

    #[test]
    fn test_mixed_literals_and_genre() {
        let template = FolderTemplate::parse("%g/%a - %b");
        assert_eq!(template.expand(&track()), vec!["Rock", "Foo - Bar"]);
    }

    #[test]
    fn test_missing_values_use_fallbacks() {
        let template = FolderTemplate::parse("%a/%b/%g");
        let bare = HostTrack::new("Song");
        assert_eq!(
            template.expand(&bare),
            vec![UNKNOWN_ARTIST, UNKNOWN_ALBUM, UNKNOWN_GENRE]
        );
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let template = FolderTemplate::parse("/%a//%b/");
        assert_eq!(template.depth(), 2);
        assert!(FolderTemplate::parse("").is_empty());
        assert!(FolderTemplate::parse(" / ").is_empty());
    }

    #[test]
    fn test_unknown_placeholders_are_literal() {
        let template = FolderTemplate::parse("%x%%a/100%");
        assert_eq!(template.expand(&track()), vec!["%x%Foo", "100%"]);
    }

    #[test]
    fn test_slash_in_value_is_replaced() {
        let template = FolderTemplate::parse("%a");
        let track = HostTrack::new("Song").with_artist("AC/DC");
        assert_eq!(template.expand(&track), vec!["AC-DC"]);
    }
}
