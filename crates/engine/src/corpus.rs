use regex::Regex;
use skillevo_core::{Error, Paths, Result, SemVer};
use std::path::PathBuf;
use tracing::warn;

/// Typed view of one skill document's metadata, produced by the front-matter
/// parser. The engine core never greps documents ad hoc; everything it needs
/// to know about a document's shape lives here.
#[derive(Debug, Clone)]
pub struct SkillDescriptor {
    pub name: String,
    pub path: PathBuf,
    /// Declared version from `evolution.version` (or a bare `version:` key).
    pub version: Option<SemVer>,
    /// Whether the front matter carries an `evolution` block at all.
    pub has_evolution_metadata: bool,
    /// `evolution.enabled`; opting out takes an explicit false, so documents
    /// without any metadata still participate.
    pub evolution_enabled: bool,
    /// `## `-level headings present in the body.
    pub headings: Vec<String>,
}

/// Document boundary: get/put of full skill text plus descriptor parsing.
/// Directories without a SKILL.md and names starting with `_` (archived,
/// shared assets) are not part of the corpus.
pub struct SkillCorpus {
    skills_dir: PathBuf,
}

impl SkillCorpus {
    pub fn new(paths: &Paths) -> Self {
        Self {
            skills_dir: paths.skills_dir(),
        }
    }

    pub fn with_dir(skills_dir: PathBuf) -> Self {
        Self { skills_dir }
    }

    /// Descriptors for every skill in the corpus, sorted by name. A document
    /// that fails to parse is skipped with a warning so one broken file
    /// never aborts a whole analysis run.
    pub fn list(&self) -> Result<Vec<SkillDescriptor>> {
        if !self.skills_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.skills_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('_') {
                continue;
            }
            if path.join("SKILL.md").exists() {
                names.push(name);
            }
        }
        names.sort();

        let mut descriptors = Vec::new();
        for name in names {
            match self.describe(&name) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => {
                    warn!(skill = %name, error = %e, "Skipping unreadable skill document");
                }
            }
        }
        Ok(descriptors)
    }

    pub fn describe(&self, name: &str) -> Result<SkillDescriptor> {
        let content = self.read(name)?;
        Ok(describe_content(
            name,
            self.skills_dir.join(name).join("SKILL.md"),
            &content,
        ))
    }

    pub fn read(&self, name: &str) -> Result<String> {
        let file = self.skills_dir.join(name).join("SKILL.md");
        if !file.exists() {
            return Err(Error::NotFound(format!("Skill {}", name)));
        }
        Ok(std::fs::read_to_string(file)?)
    }

    /// Persist a document's full text in a single write.
    pub fn write(&self, name: &str, content: &str) -> Result<()> {
        let dir = self.skills_dir.join(name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("SKILL.md"), content)?;
        Ok(())
    }
}

fn describe_content(name: &str, path: PathBuf, content: &str) -> SkillDescriptor {
    let front_matter = parse_front_matter(content);

    let evolution = front_matter.as_ref().and_then(|fm| fm.get("evolution"));
    let has_evolution_metadata = evolution.is_some();
    let evolution_enabled = evolution
        .and_then(|e| e.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let headings = content
        .lines()
        .filter_map(|l| l.strip_prefix("## "))
        .map(|h| h.trim().to_string())
        .collect();

    SkillDescriptor {
        name: name.to_string(),
        path,
        version: extract_version(content),
        has_evolution_metadata,
        evolution_enabled,
        headings,
    }
}

/// YAML front matter between the leading `---` fences, if present and valid.
pub fn parse_front_matter(content: &str) -> Option<serde_yaml::Value> {
    let re = Regex::new(r"(?s)\A---\n(.*?)\n---").ok()?;
    let captured = re.captures(content)?;
    serde_yaml::from_str(captured.get(1)?.as_str()).ok()
}

/// Declared document version. Prefers `evolution.version`, falls back to a
/// bare `version:` key anywhere in the text. The applier assumes 1.0.0 for
/// documents that predate evolution tracking.
pub fn extract_version(content: &str) -> Option<SemVer> {
    if let Some(fm) = parse_front_matter(content) {
        let declared = fm
            .get("evolution")
            .and_then(|e| e.get("version"))
            .or_else(|| fm.get("version"));
        if let Some(version) = declared.and_then(|v| v.as_str()) {
            if let Ok(parsed) = version.parse() {
                return Some(parsed);
            }
        }
    }

    let re = Regex::new(r#"version:\s*["']?(\d+\.\d+\.\d+)["']?"#).ok()?;
    re.captures(content)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOC: &str = r#"---
name: pine-lead
description: Lead triage workflow
evolution:
  enabled: true
  version: "1.2.0"
---

# Pine Lead

## Workflow

Steps here.

## Verification

Check outputs.
"#;

    fn corpus_with(name: &str, content: &str) -> (TempDir, SkillCorpus) {
        let temp = TempDir::new().unwrap();
        let skills_dir = temp.path().join("skills");
        std::fs::create_dir_all(skills_dir.join(name)).unwrap();
        std::fs::write(skills_dir.join(name).join("SKILL.md"), content).unwrap();
        (temp, SkillCorpus::with_dir(skills_dir))
    }

    #[test]
    fn test_describe_parses_front_matter() {
        let (_t, corpus) = corpus_with("pine-lead", DOC);
        let d = corpus.describe("pine-lead").unwrap();
        assert!(d.has_evolution_metadata);
        assert!(d.evolution_enabled);
        assert_eq!(d.version.unwrap().to_string(), "1.2.0");
        assert_eq!(d.headings, vec!["Workflow", "Verification"]);
    }

    #[test]
    fn test_document_without_metadata() {
        let (_t, corpus) = corpus_with("bare", "# Bare\n\nNo front matter.\n");
        let d = corpus.describe("bare").unwrap();
        assert!(!d.has_evolution_metadata);
        assert!(d.version.is_none());
        // No metadata is not an opt-out.
        assert!(d.evolution_enabled);
    }

    #[test]
    fn test_explicit_opt_out() {
        let content = "---\nname: x\nevolution:\n  enabled: false\n---\n\n# X\n";
        let (_t, corpus) = corpus_with("x", content);
        let d = corpus.describe("x").unwrap();
        assert!(d.has_evolution_metadata);
        assert!(!d.evolution_enabled);
    }

    #[test]
    fn test_list_skips_underscore_dirs() {
        let (_t, corpus) = corpus_with("pine-lead", DOC);
        let archived = corpus.skills_dir.join("_archived");
        std::fs::create_dir_all(&archived).unwrap();
        std::fs::write(archived.join("SKILL.md"), "old").unwrap();
        // A dir without SKILL.md is not a skill either.
        std::fs::create_dir_all(corpus.skills_dir.join("notes")).unwrap();

        let names: Vec<_> = corpus.list().unwrap().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["pine-lead"]);
    }

    #[test]
    fn test_version_fallback_regex() {
        let content = "---\nname: x\n---\n\nversion: 2.1.3\n";
        assert_eq!(extract_version(content).unwrap().to_string(), "2.1.3");
        assert_eq!(extract_version("nothing here"), None);
    }
}
