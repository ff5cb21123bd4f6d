//! Bulk passes over the whole store.
//!
//! [`reconcile`] fills gaps: every main file without a sidecar gets one.
//! It never reads or rewrites an existing sidecar.
//!
//! [`repair`] is the follow-up for sidecars whose back-references went stale
//! (a rename interrupted between moving the sidecar and rewriting it).

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

use crate::links::parse_wiki_links;
use crate::naming::{self, FileKind};
use crate::rewrite::rewrite;
use crate::store::{FileHandle, Result, Store, StoreError};
use crate::template;

/// Default number of sidecars created concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Report from a reconciliation pass. Paths are main-file paths, sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Main files that received a new sidecar
    pub created: Vec<String>,
    /// Main files that already had one
    pub skipped: Vec<String>,
    /// Main files whose sidecar could not be created, with the error
    pub failed: Vec<(String, String)>,
    /// Sidecars whose main file is not in the store (reported, left alone)
    pub orphaned: Vec<String>,
}

impl ReconcileReport {
    /// Check if any sidecar was created
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty()
    }

    /// Number of eligible main files examined
    pub fn total_processed(&self) -> usize {
        self.created.len() + self.skipped.len() + self.failed.len()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sidecar creation complete: {} created, {} skipped",
            self.created.len(),
            self.skipped.len()
        )?;
        if !self.failed.is_empty() {
            write!(f, ", {} failed", self.failed.len())?;
        }
        if !self.orphaned.is_empty() {
            write!(f, ", {} orphaned", self.orphaned.len())?;
        }
        Ok(())
    }
}

enum Gap {
    Filled,
    AlreadyFilled,
    Failed(String),
}

/// Create the missing sidecar for every eligible main file in `store`.
///
/// Up to `concurrency` files are handled at once; each touches only its own
/// sidecar path. Only a failure to list the store is returned as an error.
pub async fn reconcile<S: Store + ?Sized>(store: &S, concurrency: usize) -> Result<ReconcileReport> {
    let files = store.list().await?;
    let listed: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

    let mut report = ReconcileReport::default();
    let mut mains = Vec::new();
    for file in &files {
        match naming::classify(&file.path) {
            FileKind::Main => mains.push(file),
            FileKind::Sidecar { main_path } => {
                if !listed.contains(main_path.as_str()) {
                    report.orphaned.push(file.path.clone());
                }
            }
            FileKind::Other => {}
        }
    }

    info!("Found {} main files", mains.len());

    let results: Vec<(String, Gap)> = stream::iter(mains)
        .map(move |file| async move { (file.path.clone(), fill_gap(store, file).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for (path, gap) in results {
        match gap {
            Gap::Filled => report.created.push(path),
            Gap::AlreadyFilled => report.skipped.push(path),
            Gap::Failed(error) => report.failed.push((path, error)),
        }
    }
    report.created.sort();
    report.skipped.sort();
    report.failed.sort();
    report.orphaned.sort();

    info!("{}", report);
    Ok(report)
}

async fn fill_gap<S: Store + ?Sized>(store: &S, file: &FileHandle) -> Gap {
    let sidecar_path = naming::sidecar_path_for(&file.path);

    match store.lookup(&sidecar_path).await {
        Ok(Some(_)) => {
            debug!("Skipping {} - sidecar already exists", file.path);
            return Gap::AlreadyFilled;
        }
        Ok(None) => {}
        Err(e) => {
            warn!("Failed to look up sidecar for {}: {}", file.path, e);
            return Gap::Failed(e.to_string());
        }
    }

    match store
        .create(&sidecar_path, &template::render(&file.name))
        .await
    {
        Ok(()) => {
            info!("Created sidecar for: {}", file.path);
            Gap::Filled
        }
        // Someone else (usually the reactor) got there first.
        Err(StoreError::AlreadyExists(_)) => Gap::AlreadyFilled,
        Err(e) => {
            warn!("Failed to create sidecar for {}: {}", file.path, e);
            Gap::Failed(e.to_string())
        }
    }
}

/// Report from a repair pass. Paths are sidecar paths, sorted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Sidecars whose back-references were rewritten
    pub repaired: Vec<String>,
    /// Sidecars that already pointed at their main file
    pub unchanged: Vec<String>,
    /// Sidecars that could not be read or written, with the error
    pub failed: Vec<(String, String)>,
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sidecar repair complete: {} repaired, {} unchanged",
            self.repaired.len(),
            self.unchanged.len()
        )?;
        if !self.failed.is_empty() {
            write!(f, ", {} failed", self.failed.len())?;
        }
        Ok(())
    }
}

/// Point every sidecar's back-references at its main file's current name.
///
/// The frontmatter `file` link (or, without one, a leading embed) is the
/// sidecar's own back-reference; when it names something other than the main
/// file, that name is treated as the stale one and rewritten throughout.
/// Orphaned sidecars are left alone.
pub async fn repair<S: Store + ?Sized>(store: &S) -> Result<RepairReport> {
    let files = store.list().await?;
    let listed: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let mut report = RepairReport::default();

    for file in &files {
        let FileKind::Sidecar { main_path } = naming::classify(&file.path) else {
            continue;
        };
        if !listed.contains(main_path.as_str()) {
            continue;
        }

        match repair_one(store, file, naming::file_name(&main_path)).await {
            Ok(true) => report.repaired.push(file.path.clone()),
            Ok(false) => report.unchanged.push(file.path.clone()),
            Err(e) => {
                warn!("Failed to repair {}: {}", file.path, e);
                report.failed.push((file.path.clone(), e.to_string()));
            }
        }
    }

    report.repaired.sort();
    report.unchanged.sort();
    report.failed.sort();
    info!("{}", report);
    Ok(report)
}

/// Split a leading `---` frontmatter block from the rest of the body.
fn split_frontmatter(body: &str) -> (Option<&str>, &str) {
    let Some(rest) = body.strip_prefix("---\n") else {
        return (None, body);
    };
    let (frontmatter, after) = if let Some(after) = rest.strip_prefix("---") {
        ("", after)
    } else if let Some(end) = rest.find("\n---") {
        (&rest[..end], &rest[end + 4..])
    } else {
        return (None, body);
    };
    (Some(frontmatter), after.strip_prefix('\n').unwrap_or(after))
}

/// The name a sidecar's own back-reference points at, if it is not
/// `main_name`.
///
/// Only the frontmatter `file` link counts, or failing that an embed opening
/// the body as the template lays it out. Other links belong to the user.
fn stale_reference(body: &str, main_name: &str) -> Option<String> {
    let (frontmatter, content) = split_frontmatter(body);

    let file_link = frontmatter.and_then(|fm| {
        fm.lines()
            .find_map(|line| line.trim_start().strip_prefix("file:"))
            .and_then(|value| parse_wiki_links(value).into_iter().next())
    });

    let reference = file_link.or_else(|| {
        let first_line = content.lines().find(|line| !line.trim().is_empty())?;
        if !first_line.trim_start().starts_with("![[") {
            return None;
        }
        parse_wiki_links(first_line)
            .into_iter()
            .next()
            .filter(|link| link.is_embed)
    })?;

    (reference.target != main_name).then_some(reference.target)
}

async fn repair_one<S: Store + ?Sized>(store: &S, sidecar: &FileHandle, main_name: &str) -> Result<bool> {
    let body = store.read(sidecar).await?;
    let Some(stale) = stale_reference(&body, main_name) else {
        return Ok(false);
    };

    let updated = rewrite(&body, &stale, main_name);
    if updated == body {
        return Ok(false);
    }
    store.modify(sidecar, &updated).await?;
    info!("Repaired {}: {} -> {}", sidecar.path, stale, main_name);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_reconcile_fills_gaps() {
        let store = InMemoryStore::new();
        store.insert("a.png", "binary");
        store.insert("docs/b.pdf", "binary");
        store.insert("docs/b.pdf.md.md", "custom notes");
        store.insert("todo.md", "# Todo");

        let report = reconcile(&store, DEFAULT_CONCURRENCY).await.unwrap();

        assert_eq!(report.created, vec!["a.png".to_string()]);
        assert_eq!(report.skipped, vec!["docs/b.pdf".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(report.total_processed(), 2);
        assert_eq!(
            store.contents("a.png.md.md"),
            Some(template::render("a.png"))
        );
        // Existing sidecars are never rewritten.
        assert_eq!(
            store.contents("docs/b.pdf.md.md").as_deref(),
            Some("custom notes")
        );
        assert!(!store.exists("todo.md.md.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_is_complete_and_repeatable() {
        let store = InMemoryStore::new();
        for i in 0..20 {
            store.insert(&format!("img/{}.jpg", i), "binary");
        }

        let first = reconcile(&store, 4).await.unwrap();
        assert_eq!(first.created.len(), 20);

        let second = reconcile(&store, 4).await.unwrap();
        assert!(!second.has_changes());
        assert_eq!(second.skipped.len(), 20);

        for i in 0..20 {
            assert!(store.exists(&format!("img/{}.jpg.md.md", i)).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_reconcile_counts_failures() {
        let store = InMemoryStore::new();
        store.insert("a.png", "binary");
        store.insert("b.png", "binary");
        store.insert("c.png", "binary");
        store.insert("c.png.md.md", "");
        store.fail_on("b.png.md.md");

        let report = reconcile(&store, DEFAULT_CONCURRENCY).await.unwrap();

        assert_eq!(report.created, vec!["a.png".to_string()]);
        assert_eq!(report.skipped, vec!["c.png".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b.png");
        assert_eq!(report.total_processed(), 3);
        assert_eq!(
            report.to_string(),
            "Sidecar creation complete: 1 created, 1 skipped, 1 failed"
        );
    }

    #[tokio::test]
    async fn test_reconcile_reports_orphans() {
        let store = InMemoryStore::new();
        store.insert("gone.png.md.md", &template::render("gone.png"));

        let report = reconcile(&store, DEFAULT_CONCURRENCY).await.unwrap();

        assert_eq!(report.orphaned, vec!["gone.png.md.md".to_string()]);
        assert!(store.exists("gone.png.md.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_skips_hidden_folders() {
        let store = InMemoryStore::new();
        store.insert(".obsidian/icon.png", "binary");

        let report = reconcile(&store, DEFAULT_CONCURRENCY).await.unwrap();

        assert_eq!(report.total_processed(), 0);
        assert_eq!(store.paths(), vec![".obsidian/icon.png".to_string()]);
    }

    #[tokio::test]
    async fn test_repair_fixes_interrupted_rename() {
        let store = InMemoryStore::new();
        // Sidecar already moved to b.png's path but still names a.png.
        store.insert("b.png", "binary");
        store.insert("b.png.md.md", &template::render("a.png"));
        store.insert("c.png", "binary");
        store.insert("c.png.md.md", &template::render("c.png"));
        store.insert("orphan.png.md.md", &template::render("x.png"));

        let report = repair(&store).await.unwrap();

        assert_eq!(report.repaired, vec!["b.png.md.md".to_string()]);
        assert_eq!(report.unchanged, vec!["c.png.md.md".to_string()]);
        assert_eq!(store.contents("b.png.md.md"), Some(template::render("b.png")));
        assert_eq!(
            store.contents("orphan.png.md.md"),
            Some(template::render("x.png"))
        );
    }

    #[tokio::test]
    async fn test_repair_leaves_user_content() {
        let store = InMemoryStore::new();
        store.insert("b.png", "binary");
        store.insert(
            "b.png.md.md",
            "---\nfile: \"[[a.png]]\"\n---\n![[a.png]]\n\nTaken with [[Camera Notes]].",
        );

        repair(&store).await.unwrap();

        assert_eq!(
            store.contents("b.png.md.md").as_deref(),
            Some("---\nfile: \"[[b.png]]\"\n---\n![[b.png]]\n\nTaken with [[Camera Notes]].")
        );
    }

    #[tokio::test]
    async fn test_repair_ignores_unrelated_links() {
        let store = InMemoryStore::new();
        store.insert("b.png", "binary");
        store.insert("b.png.md.md", "Shot for [[Trip Log]]. See also [[Trip Log]].");

        let report = repair(&store).await.unwrap();

        assert!(report.repaired.is_empty());
        assert_eq!(report.unchanged, vec!["b.png.md.md".to_string()]);
        assert_eq!(
            store.contents("b.png.md.md").as_deref(),
            Some("Shot for [[Trip Log]]. See also [[Trip Log]].")
        );
    }

    #[tokio::test]
    async fn test_repair_ignores_frontmatter_without_file_link() {
        let store = InMemoryStore::new();
        let body = "---\ntags: [x]\n---\nRelated: [[Other]]\n![[b.png]]";
        store.insert("b.png", "binary");
        store.insert("b.png.md.md", body);

        let report = repair(&store).await.unwrap();

        assert_eq!(report.unchanged, vec!["b.png.md.md".to_string()]);
        assert_eq!(store.contents("b.png.md.md").as_deref(), Some(body));
    }

    #[tokio::test]
    async fn test_repair_uses_leading_embed() {
        let store = InMemoryStore::new();
        store.insert("b.png", "binary");
        store.insert("b.png.md.md", "![[a.png]]\n\nCompare with [[c.png]].");

        let report = repair(&store).await.unwrap();

        assert_eq!(report.repaired, vec!["b.png.md.md".to_string()]);
        assert_eq!(
            store.contents("b.png.md.md").as_deref(),
            Some("![[b.png]]\n\nCompare with [[c.png]].")
        );
    }

    #[test]
    fn test_stale_reference() {
        assert_eq!(
            stale_reference(&template::render("a.png"), "b.png").as_deref(),
            Some("a.png")
        );
        assert_eq!(stale_reference(&template::render("b.png"), "b.png"), None);
        assert_eq!(stale_reference("---\n---\n![[a.png]]", "b.png").as_deref(), Some("a.png"));
        assert_eq!(stale_reference("Intro\n![[a.png]]", "b.png"), None);
    }

    #[tokio::test]
    async fn test_repair_ignores_sidecar_without_links() {
        let store = InMemoryStore::new();
        store.insert("a.png", "binary");
        store.insert("a.png.md.md", "plain text");

        let report = repair(&store).await.unwrap();

        assert_eq!(report.unchanged, vec!["a.png.md.md".to_string()]);
        assert_eq!(store.contents("a.png.md.md").as_deref(), Some("plain text"));
    }
}
