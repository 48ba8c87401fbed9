use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ShelfError;

/// Desktop/start-menu integration. The coordinator only ever calls these two
/// operations and decides per action whether a failure is fatal.
pub trait ShortcutIntegration: Send + Sync {
    fn create_shortcut(&self, target: &Path, display_name: &str) -> Result<(), ShelfError>;
    fn remove_shortcut(&self, display_name: &str) -> Result<(), ShelfError>;
}

impl<T: ShortcutIntegration + ?Sized> ShortcutIntegration for Box<T> {
    fn create_shortcut(&self, target: &Path, display_name: &str) -> Result<(), ShelfError> {
        (**self).create_shortcut(target, display_name)
    }

    fn remove_shortcut(&self, display_name: &str) -> Result<(), ShelfError> {
        (**self).remove_shortcut(display_name)
    }
}

/// Launchers in `dir` when one is configured, otherwise no integration at all.
pub fn shortcuts_for(dir: Option<&Utf8Path>) -> Box<dyn ShortcutIntegration> {
    match dir {
        Some(dir) => Box::new(DesktopEntryShortcuts::new(dir.to_path_buf())),
        None => Box::new(NoShortcuts),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoShortcuts;

impl ShortcutIntegration for NoShortcuts {
    fn create_shortcut(&self, _target: &Path, _display_name: &str) -> Result<(), ShelfError> {
        Ok(())
    }

    fn remove_shortcut(&self, _display_name: &str) -> Result<(), ShelfError> {
        Ok(())
    }
}

/// Writes freedesktop `.desktop` launchers into one directory.
#[derive(Debug, Clone)]
pub struct DesktopEntryShortcuts {
    dir: Utf8PathBuf,
}

impl DesktopEntryShortcuts {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn entry_path(&self, display_name: &str) -> Utf8PathBuf {
        self.dir.join(format!("{}.desktop", launcher_stem(display_name)))
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }
}

impl ShortcutIntegration for DesktopEntryShortcuts {
    fn create_shortcut(&self, target: &Path, display_name: &str) -> Result<(), ShelfError> {
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| ShelfError::Shortcut(format!("{}: {err}", self.dir)))?;
        let content = format!(
            "[Desktop Entry]\nType=Application\nName={display_name}\nExec=\"{}\"\nTerminal=false\n",
            target.display()
        );
        let path = self.entry_path(display_name);
        fs::write(path.as_std_path(), content)
            .map_err(|err| ShelfError::Shortcut(format!("{path}: {err}")))
    }

    fn remove_shortcut(&self, display_name: &str) -> Result<(), ShelfError> {
        let path = self.entry_path(display_name);
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ShelfError::Shortcut(format!("{path}: {err}"))),
        }
    }
}

fn launcher_stem(display_name: &str) -> String {
    display_name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_removes_launcher() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().join("launchers")).unwrap();
        let shortcuts = DesktopEntryShortcuts::new(dir);

        shortcuts
            .create_shortcut(Path::new("/apps/x/app.exe"), "My App")
            .unwrap();
        let path = shortcuts.entry_path("My App");
        assert!(path.ends_with("My-App.desktop"));
        let content = fs::read_to_string(path.as_std_path()).unwrap();
        assert!(content.contains("Exec=\"/apps/x/app.exe\""));

        shortcuts.remove_shortcut("My App").unwrap();
        assert!(!path.as_std_path().exists());
        shortcuts.remove_shortcut("My App").unwrap();
    }
}
