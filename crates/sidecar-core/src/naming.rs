//! Path convention linking a main file to its sidecar.
//!
//! A sidecar lives next to its main file and is named by appending
//! [`SIDECAR_SUFFIX`] to the main file's full path:
//!
//! ```text
//! attachments/photo.jpg  ->  attachments/photo.jpg.md.md
//! ```
//!
//! Files whose own extension is [`SIDECAR_EXTENSION`] never get a sidecar,
//! which keeps sidecars of sidecars (and of ordinary notes) from appearing.

/// Extension that marks a file as a note (and so never a main file).
pub const SIDECAR_EXTENSION: &str = "md";

/// Suffix appended to a main file's path to form its sidecar path.
pub const SIDECAR_SUFFIX: &str = ".md.md";

/// What a path denotes under the sidecar convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// An attachment that should have a sidecar.
    Main,
    /// A sidecar, with the path of the main file it belongs to.
    Sidecar { main_path: String },
    /// Anything else (ordinary notes, extensionless markdown, ...).
    Other,
}

/// Sidecar path for a main file path.
pub fn sidecar_path_for(main_path: &str) -> String {
    format!("{}{}", main_path, SIDECAR_SUFFIX)
}

/// Main file path for a sidecar path, or `None` if `path` is not sidecar-shaped.
pub fn main_path_for(sidecar_path: &str) -> Option<String> {
    sidecar_path
        .strip_suffix(SIDECAR_SUFFIX)
        .filter(|main| !main.is_empty() && !main.ends_with('/'))
        .map(str::to_string)
}

/// Whether `path` carries the sidecar suffix.
pub fn is_sidecar(path: &str) -> bool {
    main_path_for(path).is_some()
}

/// Whether a file with this extension may own a sidecar.
pub fn is_eligible_main(extension: &str) -> bool {
    extension != SIDECAR_EXTENSION
}

/// Final segment of a slash-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Extension of a file name: the text after the last dot, empty if none.
pub fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => "",
    }
}

/// Classify a path once so callers can match on the result.
pub fn classify(path: &str) -> FileKind {
    if let Some(main_path) = main_path_for(path) {
        return FileKind::Sidecar { main_path };
    }
    if is_eligible_main(extension(file_name(path))) {
        FileKind::Main
    } else {
        FileKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path_appends_suffix() {
        assert_eq!(sidecar_path_for("photo.jpg"), "photo.jpg.md.md");
        assert_eq!(sidecar_path_for("a/b/clip.mp4"), "a/b/clip.mp4.md.md");
    }

    #[test]
    fn test_main_path_round_trip() {
        for path in ["photo.jpg", "a/b/clip.mp4", "no-extension", "a(1).png", "dir.v2/file"] {
            assert_eq!(main_path_for(&sidecar_path_for(path)).as_deref(), Some(path));
        }
    }

    #[test]
    fn test_main_path_requires_suffix() {
        assert_eq!(main_path_for("notes/todo.md"), None);
        assert_eq!(main_path_for("photo.jpg"), None);
        assert_eq!(main_path_for(".md.md"), None);
        assert_eq!(main_path_for("folder/.md.md"), None);
    }

    #[test]
    fn test_eligibility_excludes_markdown() {
        assert!(is_eligible_main("png"));
        assert!(is_eligible_main(""));
        assert!(!is_eligible_main("md"));
    }

    #[test]
    fn test_file_name_and_extension() {
        assert_eq!(file_name("a/b/photo.jpg"), "photo.jpg");
        assert_eq!(file_name("photo.jpg"), "photo.jpg");
        assert_eq!(extension("photo.jpg"), "jpg");
        assert_eq!(extension("archive.tar.gz"), "gz");
        assert_eq!(extension("Makefile"), "");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("img/photo.jpg"), FileKind::Main);
        assert_eq!(
            classify("img/photo.jpg.md.md"),
            FileKind::Sidecar {
                main_path: "img/photo.jpg".into()
            }
        );
        assert_eq!(classify("notes/todo.md"), FileKind::Other);
    }
}
