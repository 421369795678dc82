use crate::types::{
    Entity, EntityKind, Location, ParseOutcome, Relationship, RelationshipKind,
};
use std::path::Path;
use tokio::process::Command;

/// Default number of commits inspected by the history pass.
pub const DEFAULT_COMMIT_LIMIT: usize = 100;

/// Builds commit/author entities and authored/modified/changed_by edges from
/// `git log`. A root that is not a repository degrades to an empty outcome
/// with a recorded error.
pub struct GitHistoryAnalyzer {
    root: std::path::PathBuf,
    limit: usize,
}

impl GitHistoryAnalyzer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            limit: DEFAULT_COMMIT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub async fn analyze_history(&self) -> ParseOutcome {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .arg("log")
            .arg("--numstat")
            .arg("--no-merges")
            .arg("-n")
            .arg(self.limit.to_string())
            // hash \t author name \t author email \t unix time \t subject
            .arg("--pretty=format:@@%H\t%an\t%ae\t%ct\t%s")
            .output()
            .await;

        let output = match output {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                let reason = String::from_utf8_lossy(&out.stderr).trim().to_string();
                return ParseOutcome {
                    file_path: "git-history".to_string(),
                    errors: vec![format!("git log failed: {reason}")],
                    ..Default::default()
                };
            }
            Err(e) => {
                return ParseOutcome {
                    file_path: "git-history".to_string(),
                    errors: vec![format!("git unavailable: {e}")],
                    ..Default::default()
                };
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        let outcome = parse_git_log(&text);
        log::debug!(
            "Temporal pass: {} entities, {} relationships",
            outcome.entities.len(),
            outcome.relationships.len()
        );
        outcome
    }
}

/// Stable id for a commit entity.
pub fn commit_entity_id(hash: &str) -> String {
    format!("git::commit::{hash}")
}

/// Stable id for an author entity.
pub fn author_entity_id(email: &str) -> String {
    format!("git::author::{email}")
}

fn module_id_for(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path);
    format!("{path}::{stem}")
}

fn parse_git_log(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::new("git-history");
    let mut seen_authors = std::collections::HashSet::new();
    let mut current_commit: Option<String> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("@@") {
            let mut parts = rest.splitn(5, '\t');
            let (Some(hash), Some(author), Some(email), Some(timestamp)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let subject = parts.next().unwrap_or("");

            let commit_id = commit_entity_id(hash);
            let author_id = author_entity_id(email);

            if seen_authors.insert(author_id.clone()) {
                let mut author_entity = Entity::new(
                    EntityKind::Author,
                    author,
                    email,
                    Location::new("git", 1, 1),
                );
                author_entity.id = author_id.clone();
                author_entity.attrs.insert("email".into(), email.into());
                outcome.entities.push(author_entity);
            }

            let mut commit_entity = Entity::new(
                EntityKind::Commit,
                &hash[..hash.len().min(7)],
                hash,
                Location::new("git", 1, 1),
            )
            .with_docstring(subject);
            commit_entity.id = commit_id.clone();
            commit_entity
                .attrs
                .insert("timestamp".into(), timestamp.into());
            outcome.entities.push(commit_entity);

            outcome.relationships.push(Relationship::new(
                author_id,
                commit_id.clone(),
                RelationshipKind::Authored,
            ));
            current_commit = Some(commit_id);
            continue;
        }

        // numstat line: "<insertions>\t<deletions>\t<path>"
        let Some(commit_id) = current_commit.as_ref() else {
            continue;
        };
        let mut parts = line.splitn(3, '\t');
        let (Some(insertions), Some(deletions), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if path.is_empty() {
            continue;
        }
        let module_id = module_id_for(path.trim());

        outcome.relationships.push(
            Relationship::new(commit_id.clone(), module_id.clone(), RelationshipKind::Modified)
                .with_attr("insertions", insertions.trim())
                .with_attr("deletions", deletions.trim()),
        );
        outcome.relationships.push(Relationship::new(
            module_id,
            commit_id.clone(),
            RelationshipKind::ChangedBy,
        ));
    }

    outcome
}
