//! Sidecar body rendering.
//!
//! Every sidecar has the same fixed shape: a frontmatter block whose `file`
//! property links to the main file, followed by an embed of that file.
//!
//! ```markdown
//! ---
//! file: "[[photo.jpg]]"
//! ---
//! ![[photo.jpg]]
//! ```

/// Wiki link to a file: `[[name]]`.
pub fn link(name: &str) -> String {
    format!("[[{}]]", name)
}

/// Embedded preview of a file: `![[name]]`.
pub fn embed(name: &str) -> String {
    format!("![[{}]]", name)
}

/// Render the sidecar body for the main file called `name`.
pub fn render(name: &str) -> String {
    format!("---\nfile: \"{}\"\n---\n{}", link(name), embed(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_render_golden() {
        assert_eq!(
            render("photo.jpg"),
            "---\nfile: \"[[photo.jpg]]\"\n---\n![[photo.jpg]]"
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render("clip (final).mp4"), render("clip (final).mp4"));
    }

    #[test]
    fn test_render_frontmatter_is_valid_yaml() {
        let body = render("scan [2024].pdf");
        let yaml = body
            .strip_prefix("---\n")
            .and_then(|rest| rest.split("\n---\n").next())
            .unwrap();

        let parsed: HashMap<String, String> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed["file"], "[[scan [2024].pdf]]");
        assert!(body.ends_with("\n---\n![[scan [2024].pdf]]"));
    }
}
