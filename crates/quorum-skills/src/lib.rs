// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill catalog: a directory tree of markdown guidance documents.
//!
//! Each immediate subdirectory of the catalog root that contains a
//! `SKILL.md` file is one skill.  The file opens with a YAML front-matter
//! block:
//!
//! ```markdown
//! ---
//! name: release-checklist
//! description: Steps for cutting a release.
//! allowed-tools: [echo]
//! license: MIT
//! ---
//!
//! # Body here…
//! ```
//!
//! Front matter is indexed once at startup; bodies are read lazily by
//! [`SkillCatalog::load`] so a large catalog costs nothing until a skill is
//! actually used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Front-matter size cap; anything larger is assumed to be a data file that
/// wandered into the catalog.
const MAX_SKILL_FILE_BYTES: u64 = 256 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("unknown skill: {0}")]
    Unknown(String),
    #[error("failed to read skill {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Indexed metadata for one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
    /// Tool names this skill expects the agent to have; informational.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
    /// Absolute path of the backing `SKILL.md`.
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    #[serde(default)]
    name: Option<String>,
    description: String,
    #[serde(default, rename = "allowed-tools")]
    allowed_tools: Vec<String>,
    #[serde(default)]
    license: Option<String>,
}

/// Parsed front matter plus the body that follows it.
pub struct ParsedSkill {
    pub name: Option<String>,
    pub description: String,
    pub allowed_tools: Vec<String>,
    pub license: Option<String>,
    pub body: String,
}

/// Parse a raw `SKILL.md` string.  Returns `None` when the front matter is
/// missing, malformed, or lacks a non-empty `description`.
#[must_use]
pub fn parse_skill_file(raw: &str) -> Option<ParsedSkill> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: RawFrontmatter = serde_yaml::from_str(yaml_block).ok()?;
    if fm.description.trim().is_empty() {
        return None;
    }

    Some(ParsedSkill {
        name: fm.name.filter(|n| !n.trim().is_empty()),
        description: fm.description,
        allowed_tools: fm.allowed_tools,
        license: fm.license,
        body,
    })
}

/// An indexed skill catalog.
#[derive(Debug, Default)]
pub struct SkillCatalog {
    skills: HashMap<String, SkillMeta>,
}

impl SkillCatalog {
    /// Index `root`, reading front matter from every `<root>/<dir>/SKILL.md`.
    ///
    /// Malformed or oversized files are skipped with a warning; a missing
    /// root yields an empty catalog (skills are an optional feature).
    pub fn index(root: &Path) -> Self {
        let mut skills = HashMap::new();
        let Ok(entries) = std::fs::read_dir(root) else {
            return Self { skills };
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let skill_md = dir.join("SKILL.md");
            if !skill_md.is_file() {
                continue;
            }
            let size = skill_md.metadata().map(|m| m.len()).unwrap_or(0);
            if size > MAX_SKILL_FILE_BYTES {
                warn!(path = %skill_md.display(), size, "skipping oversized SKILL.md");
                continue;
            }
            let raw = match std::fs::read_to_string(&skill_md) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %skill_md.display(), error = %e, "failed to read SKILL.md");
                    continue;
                }
            };
            let Some(parsed) = parse_skill_file(&raw) else {
                warn!(path = %skill_md.display(), "invalid SKILL.md front matter; skipping");
                continue;
            };

            // Display name: front matter wins, else the directory name.
            let name = parsed.name.unwrap_or_else(|| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            if name.is_empty() {
                continue;
            }
            if skills.contains_key(&name) {
                warn!(name, "duplicate skill name; keeping the first indexed");
                continue;
            }
            skills.insert(
                name.clone(),
                SkillMeta {
                    name,
                    description: parsed.description.trim().to_string(),
                    allowed_tools: parsed.allowed_tools,
                    license: parsed.license,
                    path: skill_md,
                },
            );
        }

        Self { skills }
    }

    /// All indexed skills, sorted by name.
    pub fn list(&self) -> Vec<&SkillMeta> {
        let mut v: Vec<&SkillMeta> = self.skills.values().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    pub fn get(&self, name: &str) -> Option<&SkillMeta> {
        self.skills.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Read the full body of one skill (everything after the front matter).
    pub fn load(&self, name: &str) -> Result<String, SkillError> {
        let meta = self
            .skills
            .get(name)
            .ok_or_else(|| SkillError::Unknown(name.to_string()))?;
        let raw = std::fs::read_to_string(&meta.path).map_err(|source| SkillError::Io {
            name: name.to_string(),
            source,
        })?;
        // Re-parse so edits between index time and load time are honoured.
        match parse_skill_file(&raw) {
            Some(parsed) => Ok(parsed.body),
            None => Ok(raw),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_skill(root: &Path, dir: &str, frontmatter: &str, body: &str) {
        let skill_dir = root.join(dir);
        fs::create_dir_all(&skill_dir).unwrap();
        fs::write(
            skill_dir.join("SKILL.md"),
            format!("---\n{frontmatter}\n---\n\n{body}"),
        )
        .unwrap();
    }

    // ── parse_skill_file ──────────────────────────────────────────────────────

    #[test]
    fn parse_valid_front_matter() {
        let raw = "---\nname: deploy\ndescription: Deploy steps.\n---\n\nBody here.";
        let parsed = parse_skill_file(raw).expect("should parse");
        assert_eq!(parsed.name.as_deref(), Some("deploy"));
        assert_eq!(parsed.description, "Deploy steps.");
        assert_eq!(parsed.body, "Body here.");
    }

    #[test]
    fn parse_allowed_tools_and_license() {
        let raw =
            "---\ndescription: X.\nallowed-tools: [echo, get_skill]\nlicense: MIT\n---\n\nB.";
        let parsed = parse_skill_file(raw).unwrap();
        assert_eq!(parsed.allowed_tools, vec!["echo", "get_skill"]);
        assert_eq!(parsed.license.as_deref(), Some("MIT"));
    }

    #[test]
    fn parse_missing_description_is_none() {
        assert!(parse_skill_file("---\nname: x\n---\n\nBody.").is_none());
    }

    #[test]
    fn parse_no_front_matter_is_none() {
        assert!(parse_skill_file("# Just markdown").is_none());
    }

    #[test]
    fn parse_body_keeps_later_dashes() {
        let raw = "---\ndescription: D.\n---\n\nOne.\n\n---\n\nTwo.";
        let parsed = parse_skill_file(raw).unwrap();
        assert!(parsed.body.contains("One."));
        assert!(parsed.body.contains("Two."));
    }

    // ── SkillCatalog ──────────────────────────────────────────────────────────

    #[test]
    fn index_missing_root_is_empty() {
        let catalog = SkillCatalog::index(Path::new("/nonexistent/skills"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn index_finds_skills_and_sorts_list() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "zeta", "description: Z.", "zbody");
        write_skill(tmp.path(), "alpha", "description: A.", "abody");

        let catalog = SkillCatalog::index(tmp.path());
        let names: Vec<&str> = catalog.list().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn name_from_front_matter_overrides_dir_name() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "dir-name", "name: pretty\ndescription: D.", "b");
        let catalog = SkillCatalog::index(tmp.path());
        assert!(catalog.get("pretty").is_some());
        assert!(catalog.get("dir-name").is_none());
    }

    #[test]
    fn load_returns_body_without_front_matter() {
        let tmp = TempDir::new().unwrap();
        write_skill(tmp.path(), "deploy", "description: D.", "## Steps\n\n1. Ship it.");
        let catalog = SkillCatalog::index(tmp.path());
        let body = catalog.load("deploy").unwrap();
        assert!(body.contains("## Steps"));
        assert!(!body.contains("description:"));
    }

    #[test]
    fn load_unknown_skill_errors() {
        let catalog = SkillCatalog::default();
        assert!(matches!(
            catalog.load("missing"),
            Err(SkillError::Unknown(_))
        ));
    }

    #[test]
    fn dirs_without_skill_md_are_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("not-a-skill")).unwrap();
        fs::write(tmp.path().join("not-a-skill/README.md"), "no").unwrap();
        assert!(SkillCatalog::index(tmp.path()).is_empty());
    }

    #[test]
    fn malformed_front_matter_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("broken");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("SKILL.md"), "---\n: not yaml ::\n---\nbody").unwrap();
        assert!(SkillCatalog::index(tmp.path()).is_empty());
    }

    #[test]
    fn oversized_skill_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("big");
        fs::create_dir_all(&dir).unwrap();
        let content = format!("---\ndescription: big\n---\n{}", "x".repeat(260 * 1024));
        fs::write(dir.join("SKILL.md"), content).unwrap();
        assert!(SkillCatalog::index(tmp.path()).is_empty());
    }
}
