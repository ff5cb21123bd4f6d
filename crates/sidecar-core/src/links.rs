//! Minimal wiki link scanner for sidecar bodies.
//!
//! Recognizes `[[target]]` and `![[target]]`, with optional `|alias` and
//! `#heading` / `#^block` fragments, which are dropped from `target`.

/// A wiki link found in a sidecar body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLink {
    /// Link target with any fragment or alias removed: "photo.jpg"
    pub target: String,
    /// Whether this is an embed (`![[...]]`)
    pub is_embed: bool,
}

/// Parse all wiki links from `content`, in document order.
pub fn parse_wiki_links(content: &str) -> Vec<WikiLink> {
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();
    let mut links = Vec::new();
    let mut i = 0;

    while i + 1 < len {
        if chars[i] == '[' && chars[i + 1] == '[' {
            let is_embed = i > 0 && chars[i - 1] == '!';
            if let Some((target, end)) = parse_link_at(&chars, i) {
                links.push(WikiLink { target, is_embed });
                i = end;
                continue;
            }
        }
        i += 1;
    }

    links
}

/// Parse the link whose `[[` starts at `start`.
/// Returns the target and the position after the closing `]]`.
fn parse_link_at(chars: &[char], start: usize) -> Option<(String, usize)> {
    let content_start = start + 2;
    let mut depth = 1;
    let mut i = content_start;

    while i + 1 < chars.len() {
        if chars[i] == '[' && chars[i + 1] == '[' {
            depth += 1;
            i += 2;
            continue;
        }
        if chars[i] == ']' && chars[i + 1] == ']' {
            depth -= 1;
            if depth == 0 {
                let inner: String = chars[content_start..i].iter().collect();
                return Some((link_target(&inner), i + 2));
            }
            i += 2;
            continue;
        }
        i += 1;
    }

    None
}

fn link_target(inner: &str) -> String {
    let target = inner.split('|').next().unwrap_or(inner);
    let target = target.split('#').next().unwrap_or(target);
    target.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::render;

    #[test]
    fn test_parse_rendered_sidecar() {
        let links = parse_wiki_links(&render("photo.jpg"));
        assert_eq!(
            links,
            vec![
                WikiLink {
                    target: "photo.jpg".into(),
                    is_embed: false
                },
                WikiLink {
                    target: "photo.jpg".into(),
                    is_embed: true
                },
            ]
        );
    }

    #[test]
    fn test_parse_alias_and_fragments() {
        let links = parse_wiki_links("[[a.png|Alias]] ![[b.pdf#page=2]] [[Note#^block]]");
        let targets: Vec<_> = links.iter().map(|l| l.target.as_str()).collect();
        assert_eq!(targets, vec!["a.png", "b.pdf", "Note"]);
        assert!(links[1].is_embed);
    }

    #[test]
    fn test_parse_brackets_in_name() {
        let links = parse_wiki_links("![[scan [2024].pdf]]");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "scan [2024].pdf");
    }

    #[test]
    fn test_unclosed_link_ignored() {
        assert!(parse_wiki_links("[[dangling and text").is_empty());
    }
}
