//! Test utilities for creating temporary log files and manipulating them the
//! way loggers and rotation tools do.

#[cfg(test)]
use std::fs::{File, OpenOptions};
#[cfg(test)]
use std::io::Write;
#[cfg(test)]
use std::path::{Path, PathBuf};

#[cfg(test)]
pub struct TempLogFile {
    pub path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

#[cfg(test)]
impl TempLogFile {
    /// Create a new temporary log file for testing
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("test.log");

        // Create the file
        File::create(&path)?;

        Ok(Self {
            path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a temporary log file with one initial line
    pub fn with_content(content: &str) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append_content(content)?;
        Ok(temp_file)
    }

    /// Create a temporary log file holding exactly `content`
    pub fn with_raw(content: &str) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append_raw(content)?;
        Ok(temp_file)
    }

    /// Append a line to the temporary log file
    pub fn append_content(&self, content: &str) -> std::io::Result<()> {
        self.append_raw(&format!("{}\n", content))
    }

    /// Append bytes as-is, without adding a terminator
    pub fn append_raw(&self, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;

        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Truncate the file in place (copytruncate-style rotation)
    pub fn truncate(&self) -> std::io::Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    /// Truncate the file in place and write new content
    pub fn truncate_with(&self, content: &str) -> std::io::Result<()> {
        let mut file = File::create(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Delete the file, keeping the temporary directory
    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }

    /// Create the file again with `content` after it was removed
    pub fn recreate(&self, content: &str) -> std::io::Result<()> {
        std::fs::write(&self.path, content)
    }

    /// Move the file aside under `name` in the same directory
    pub fn rename_to(&self, name: &str) -> std::io::Result<PathBuf> {
        let target = self.path.with_file_name(name);
        std::fs::rename(&self.path, &target)?;
        Ok(target)
    }

    /// Get the path to the temporary file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_log_file_creation() {
        let temp_file = TempLogFile::new().unwrap();
        assert!(temp_file.path().exists());
    }

    #[tokio::test]
    async fn test_temp_log_file_with_content() {
        let content = "test line";
        let temp_file = TempLogFile::with_content(content).unwrap();

        let file_content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(file_content, "test line\n");
    }

    #[tokio::test]
    async fn test_append_raw_keeps_bytes() {
        let temp_file = TempLogFile::with_raw("hel").unwrap();
        temp_file.append_raw("lo\n").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[tokio::test]
    async fn test_truncate_with() {
        let temp_file = TempLogFile::with_content("initial content").unwrap();
        temp_file.truncate_with("new").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "new");
    }

    #[tokio::test]
    async fn test_remove_and_recreate() {
        let temp_file = TempLogFile::with_content("initial content").unwrap();
        temp_file.remove().unwrap();
        assert!(!temp_file.path().exists());

        temp_file.recreate("again\n").unwrap();
        assert_eq!(std::fs::read_to_string(temp_file.path()).unwrap(), "again\n");
    }

    #[tokio::test]
    async fn test_rename_to() {
        let temp_file = TempLogFile::with_content("initial content").unwrap();
        let rotated = temp_file.rename_to("test.log.1").unwrap();

        assert!(rotated.exists());
        assert!(!temp_file.path().exists());
    }
}
