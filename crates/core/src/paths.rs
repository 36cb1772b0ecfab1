use std::path::PathBuf;

/// Filesystem layout for all evolution state. Every store takes a `Paths`
/// instead of reaching for ambient directories, so tests can point the whole
/// engine at a temp dir via `with_base`.
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".skillevo"))
            .unwrap_or_else(|| PathBuf::from(".skillevo"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.base.join("skills")
    }

    pub fn skill_file(&self, skill: &str) -> PathBuf {
        self.skills_dir().join(skill).join("SKILL.md")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.base.join("events")
    }

    pub fn event_file(&self, date: &str) -> PathBuf {
        self.events_dir().join(format!("{}.jsonl", date))
    }

    pub fn proposals_dir(&self) -> PathBuf {
        self.base.join("proposals")
    }

    pub fn proposal_file(&self, proposal_id: &str) -> PathBuf {
        let safe_id = proposal_id.replace([':', '/', '\\'], "_");
        self.proposals_dir().join(format!("{}.yaml", safe_id))
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.base.join("backups")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.base.join("reports")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.skills_dir())?;
        std::fs::create_dir_all(self.events_dir())?;
        std::fs::create_dir_all(self.proposals_dir())?;
        std::fs::create_dir_all(self.backups_dir())?;
        std::fs::create_dir_all(self.reports_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
