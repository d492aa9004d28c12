#![forbid(unsafe_code)]

//! Markdown document library.
//!
//! Three scopes: `docs/shared/<name>.md`, `issues/<id>/docs/<name>.md`,
//! and `issues/<id>/tasks/<task_id>.docs/<name>.md`. Names may contain
//! subdirectories; they are cleaned and must stay inside their scope.

use crate::{CoordError, Result};

use super::DocsService;
use super::support::clean_doc_name;

impl DocsService {
    pub fn write_shared_doc(&self, name: &str, content: &str) -> Result<String> {
        let name = clean_doc_name(name)?;
        self.write_doc(&["docs", "shared"], &name, content)?;
        Ok(name)
    }

    pub fn read_shared_doc(&self, name: &str) -> Result<String> {
        let name = clean_doc_name(name)?;
        self.read_doc(&["docs", "shared"], &name)
    }

    pub fn list_shared_docs(&self) -> Result<Vec<String>> {
        self.list_docs(&["docs", "shared"])
    }

    pub fn write_issue_doc(&self, issue_id: &str, name: &str, content: &str) -> Result<String> {
        require_id("issue_id", issue_id)?;
        let name = clean_doc_name(name)?;
        self.write_doc(&["issues", issue_id, "docs"], &name, content)?;
        Ok(name)
    }

    pub fn read_issue_doc(&self, issue_id: &str, name: &str) -> Result<String> {
        require_id("issue_id", issue_id)?;
        let name = clean_doc_name(name)?;
        self.read_doc(&["issues", issue_id, "docs"], &name)
    }

    pub fn list_issue_docs(&self, issue_id: &str) -> Result<Vec<String>> {
        require_id("issue_id", issue_id)?;
        self.list_docs(&["issues", issue_id, "docs"])
    }

    pub fn write_task_doc(
        &self,
        issue_id: &str,
        task_id: &str,
        name: &str,
        content: &str,
    ) -> Result<String> {
        require_id("issue_id", issue_id)?;
        require_id("task_id", task_id)?;
        let name = clean_doc_name(name)?;
        let dir = format!("{task_id}.docs");
        self.write_doc(&["issues", issue_id, "tasks", &dir], &name, content)?;
        Ok(name)
    }

    pub fn read_task_doc(&self, issue_id: &str, task_id: &str, name: &str) -> Result<String> {
        require_id("issue_id", issue_id)?;
        require_id("task_id", task_id)?;
        let name = clean_doc_name(name)?;
        let dir = format!("{task_id}.docs");
        self.read_doc(&["issues", issue_id, "tasks", &dir], &name)
    }

    pub fn list_task_docs(&self, issue_id: &str, task_id: &str) -> Result<Vec<String>> {
        require_id("issue_id", issue_id)?;
        require_id("task_id", task_id)?;
        let dir = format!("{task_id}.docs");
        self.list_docs(&["issues", issue_id, "tasks", &dir])
    }

    fn write_doc(&self, scope: &[&str], name: &str, content: &str) -> Result<()> {
        let path = self.store.path(scope).join(format!("{name}.md"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content.as_bytes())?;
        Ok(())
    }

    fn read_doc(&self, scope: &[&str], name: &str) -> Result<String> {
        let path = self.store.path(scope).join(format!("{name}.md"));
        std::fs::read_to_string(&path)
            .map_err(|_| CoordError::NotFound(format!("doc '{name}' not found")))
    }

    /// Top-level `.md` file names in the scope, sorted.
    fn list_docs(&self, scope: &[&str]) -> Result<Vec<String>> {
        let dir = self.store.path(scope);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                out.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

fn require_id(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CoordError::InvalidArgument(format!("{name} is required")));
    }
    Ok(())
}
