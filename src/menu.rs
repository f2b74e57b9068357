//! Line-based interactive menu
//!
//! Pure prompt/parse logic over any `BufRead`/`Write` pair. Running the
//! chosen action is the caller's job.

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::paths::RootValidator;

/// Actions offered by the main menu, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Status,
    InstallPackage,
    InstallLiveries,
    UninstallLiveries,
    UpdateCatalog,
    FetchUpdater,
    ChangeRoot,
    SetOverride,
    UninstallPackage,
    Exit,
}

impl MenuAction {
    pub const ALL: [MenuAction; 10] = [
        MenuAction::Status,
        MenuAction::InstallPackage,
        MenuAction::InstallLiveries,
        MenuAction::UninstallLiveries,
        MenuAction::UpdateCatalog,
        MenuAction::FetchUpdater,
        MenuAction::ChangeRoot,
        MenuAction::SetOverride,
        MenuAction::UninstallPackage,
        MenuAction::Exit,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MenuAction::Status => "Show installation status",
            MenuAction::InstallPackage => "Install or reinstall the aircraft",
            MenuAction::InstallLiveries => "Install liveries",
            MenuAction::UninstallLiveries => "Uninstall liveries",
            MenuAction::UpdateCatalog => "Update the livery list",
            MenuAction::FetchUpdater => "Download the latest updater",
            MenuAction::ChangeRoot => "Change X-Plane directory",
            MenuAction::SetOverride => "Set aircraft directory manually",
            MenuAction::UninstallPackage => "Uninstall the aircraft",
            MenuAction::Exit => "Exit",
        }
    }

    /// Parse a 1-based menu number
    pub fn from_choice(input: &str) -> Option<Self> {
        let n: usize = input.trim().parse().ok()?;
        n.checked_sub(1).and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Parse "1,3 5" or "all" into sorted, deduplicated 0-based indices
pub fn parse_selection(input: &str, count: usize) -> Option<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Some((0..count).collect());
    }
    let mut picked = Vec::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let n: usize = token.parse().ok()?;
        if n == 0 || n > count {
            return None;
        }
        picked.push(n - 1);
    }
    if picked.is_empty() {
        return None;
    }
    picked.sort_unstable();
    picked.dedup();
    Some(picked)
}

/// Prompt driver over an input and output stream
pub struct Menu<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Menu<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn output(&mut self) -> &mut W {
        &mut self.output
    }

    /// Print `prompt` and read one trimmed line; `None` at end of input
    pub fn prompt_line(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}", prompt).context("Failed to write prompt")?;
        self.output.flush().context("Failed to flush prompt")?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("Failed to read input")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Show the main menu until a valid choice is made
    pub fn choose(&mut self) -> Result<MenuAction> {
        writeln!(self.output)?;
        for (i, action) in MenuAction::ALL.iter().enumerate() {
            writeln!(self.output, "  {}) {}", i + 1, action.label())?;
        }
        loop {
            let Some(line) = self.prompt_line("Select an option: ")? else {
                return Ok(MenuAction::Exit);
            };
            match MenuAction::from_choice(&line) {
                Some(action) => return Ok(action),
                None => writeln!(
                    self.output,
                    "Invalid choice '{}'. Enter a number from 1 to {}.",
                    line,
                    MenuAction::ALL.len()
                )?,
            }
        }
    }

    /// Ask for an X-Plane root until one validates; `None` at end of input
    pub fn prompt_root(&mut self, validator: &RootValidator) -> Result<Option<PathBuf>> {
        loop {
            let Some(line) = self.prompt_line("X-Plane directory: ")? else {
                return Ok(None);
            };
            let path = PathBuf::from(line.trim_matches('"'));
            let validation = validator.validate(&path);
            if validation.ok {
                return Ok(Some(path));
            }
            writeln!(self.output, "That does not look like an X-Plane directory.")?;
            for missing in &validation.missing {
                writeln!(self.output, "  missing: {}", missing)?;
            }
        }
    }

    /// Pick items from a numbered list; empty input cancels
    pub fn select(&mut self, title: &str, items: &[String]) -> Result<Vec<String>> {
        if items.is_empty() {
            writeln!(self.output, "Nothing to choose from.")?;
            return Ok(Vec::new());
        }
        writeln!(self.output, "{}", title)?;
        for (i, item) in items.iter().enumerate() {
            writeln!(self.output, "  {}) {}", i + 1, item)?;
        }
        loop {
            let Some(line) = self.prompt_line("Numbers (e.g. 1,3) or 'all', empty to cancel: ")?
            else {
                return Ok(Vec::new());
            };
            if line.is_empty() {
                return Ok(Vec::new());
            }
            match parse_selection(&line, items.len()) {
                Some(indices) => return Ok(indices.into_iter().map(|i| items[i].clone()).collect()),
                None => writeln!(self.output, "Invalid selection '{}'.", line)?,
            }
        }
    }

    /// Yes/no question; anything but y/yes is no
    pub fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.prompt_line(&format!("{} [y/N]: ", question))?;
        Ok(matches!(
            answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn menu(input: &str) -> Menu<Cursor<Vec<u8>>, Vec<u8>> {
        Menu::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn printed(menu: &mut Menu<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(menu.output()).into_owned()
    }

    #[test]
    fn test_from_choice() {
        assert_eq!(MenuAction::from_choice("1"), Some(MenuAction::Status));
        assert_eq!(MenuAction::from_choice(" 10 "), Some(MenuAction::Exit));
        assert_eq!(MenuAction::from_choice("0"), None);
        assert_eq!(MenuAction::from_choice("11"), None);
        assert_eq!(MenuAction::from_choice("two"), None);
    }

    #[test]
    fn test_choose_reprompts_on_invalid_input() {
        let mut m = menu("abc\n42\n3\n");
        assert_eq!(m.choose().unwrap(), MenuAction::InstallLiveries);
        let out = printed(&mut m);
        assert!(out.contains("Invalid choice 'abc'"));
        assert!(out.contains("Invalid choice '42'"));
    }

    #[test]
    fn test_choose_exits_at_end_of_input() {
        let mut m = menu("");
        assert_eq!(m.choose().unwrap(), MenuAction::Exit);
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(parse_selection("3, 1 3", 4), Some(vec![0, 2]));
        assert_eq!(parse_selection("ALL", 3), Some(vec![0, 1, 2]));
        assert_eq!(parse_selection("5", 4), None);
        assert_eq!(parse_selection("0", 4), None);
        assert_eq!(parse_selection(" , ", 4), None);
    }

    #[test]
    fn test_select_items() {
        let items = vec!["Air China".to_string(), "Cathay".to_string()];
        let mut m = menu("9\n2\n");
        assert_eq!(m.select("Liveries:", &items).unwrap(), vec!["Cathay"]);

        let mut m = menu("\n");
        assert!(m.select("Liveries:", &items).unwrap().is_empty());
    }

    #[test]
    fn test_prompt_root_loops_until_valid() {
        let root = tempdir().unwrap();
        let validator = RootValidator::new(["Aircraft", "X-Plane.exe"]);
        std::fs::create_dir(root.path().join("Aircraft")).unwrap();
        std::fs::write(root.path().join("X-Plane.exe"), b"MZ").unwrap();

        let input = format!("relative/path\n{}\n", root.path().display());
        let mut m = menu(&input);
        let chosen = m.prompt_root(&validator).unwrap();
        assert_eq!(chosen.as_deref(), Some(root.path()));
        assert!(printed(&mut m).contains(crate::paths::ABSOLUTE_PATH_REQUIRED));

        let mut m = menu("relative/path\n");
        assert_eq!(m.prompt_root(&validator).unwrap(), None);
    }

    #[test]
    fn test_confirm() {
        assert!(menu("y\n").confirm("Remove?").unwrap());
        assert!(menu("YES\n").confirm("Remove?").unwrap());
        assert!(!menu("n\n").confirm("Remove?").unwrap());
        assert!(!menu("").confirm("Remove?").unwrap());
    }
}
