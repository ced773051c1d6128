// ABOUTME: Table selection for mirror runs
// ABOUTME: Applies an allow-list and a resume-from-table point, matching names case-insensitively

use anyhow::{bail, Result};

/// Which of the primary's tables a run processes.
///
/// Names are compared trimmed and case-insensitively, so a list typed in
/// lowercase still matches `Orders` on a case-sensitive server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSelection {
    include: Option<Vec<String>>,
    start_from: Option<String>,
}

/// The catalog split by a [`TableSelection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedTables {
    /// Tables to process, in catalog order.
    pub selected: Vec<String>,
    /// Tables passed over because they precede the resume point.
    pub skipped: Vec<String>,
    /// Allow-list entries that matched no table.
    pub unmatched: Vec<String>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl TableSelection {
    /// Creates a selection from an allow-list (empty means all) and a resume point.
    pub fn new(include: Vec<String>, start_from: Option<String>) -> Self {
        let include: Vec<String> = include
            .iter()
            .map(|t| normalize(t))
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            include: if include.is_empty() {
                None
            } else {
                Some(include)
            },
            start_from: start_from.map(|t| normalize(&t)).filter(|t| !t.is_empty()),
        }
    }

    /// Creates an empty selection (every table)
    pub fn all() -> Self {
        Self::default()
    }

    /// Checks if any restriction is active
    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.start_from.is_none()
    }

    /// Whether a single table passes the allow-list.
    pub fn includes(&self, table: &str) -> bool {
        match &self.include {
            Some(include) => include.contains(&normalize(table)),
            None => true,
        }
    }

    /// Split the catalog's tables into selected and skipped.
    ///
    /// Tables before the resume point are skipped; the resume table itself
    /// and everything after it are kept, subject to the allow-list.
    ///
    /// # Errors
    ///
    /// Fails when the resume table is not in the catalog, since every table
    /// would otherwise be skipped silently.
    pub fn apply(&self, catalog: &[String]) -> Result<SelectedTables> {
        let mut result = SelectedTables::default();

        let start_index = match &self.start_from {
            Some(start) => match catalog.iter().position(|t| normalize(t) == *start) {
                Some(index) => index,
                None => bail!("Resume table '{}' not found on the primary", start),
            },
            None => 0,
        };

        for (index, table) in catalog.iter().enumerate() {
            if !self.includes(table) {
                continue;
            }
            if index < start_index {
                result.skipped.push(table.clone());
            } else {
                result.selected.push(table.clone());
            }
        }

        if let Some(include) = &self.include {
            result.unmatched = include
                .iter()
                .filter(|name| !catalog.iter().any(|t| normalize(t) == **name))
                .cloned()
                .collect();
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<String> {
        ["a", "b", "Orders", "d", "e"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_all_selects_everything() {
        let selection = TableSelection::all();
        assert!(selection.is_empty());
        let result = selection.apply(&catalog()).unwrap();
        assert_eq!(result.selected, catalog());
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_allow_list_is_case_insensitive() {
        let selection = TableSelection::new(vec![" orders ".to_string(), "E".to_string()], None);
        let result = selection.apply(&catalog()).unwrap();
        assert_eq!(result.selected, vec!["Orders", "e"]);
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn test_allow_list_reports_unmatched() {
        let selection = TableSelection::new(vec!["orders".to_string(), "ghost".to_string()], None);
        let result = selection.apply(&catalog()).unwrap();
        assert_eq!(result.unmatched, vec!["ghost"]);
    }

    #[test]
    fn test_start_from_skips_earlier_tables() {
        let selection = TableSelection::new(Vec::new(), Some("ORDERS".to_string()));
        let result = selection.apply(&catalog()).unwrap();
        assert_eq!(result.selected, vec!["Orders", "d", "e"]);
        assert_eq!(result.skipped, vec!["a", "b"]);
    }

    #[test]
    fn test_start_from_missing_is_an_error() {
        let selection = TableSelection::new(Vec::new(), Some("zzz".to_string()));
        assert!(selection.apply(&catalog()).is_err());
    }

    #[test]
    fn test_blank_entries_are_ignored() {
        let selection = TableSelection::new(vec!["  ".to_string()], Some(" ".to_string()));
        assert!(selection.is_empty());
    }
}
