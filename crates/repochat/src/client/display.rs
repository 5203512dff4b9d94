use std::collections::BTreeSet;

use super::state::ChatState;

/// A result panel a chat view can show next to the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Panel {
    Commits,
    Issues,
    PullRequests,
    Screenshots,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRule {
    pub keywords: Vec<String>,
    pub panel: Panel,
}

impl DisplayRule {
    pub fn new(panel: Panel, keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            panel,
        }
    }
}

/// Which panels to show for a question, decided by keywords in it
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRules {
    rules: Vec<DisplayRule>,
}

impl Default for DisplayRules {
    fn default() -> Self {
        Self::new(vec![
            DisplayRule::new(Panel::Commits, &["commit", "history", "changes"]),
            DisplayRule::new(Panel::Issues, &["issue", "bug"]),
            DisplayRule::new(Panel::PullRequests, &["pull request", "pr ", "prs", "merge"]),
            DisplayRule::new(Panel::Screenshots, &["screenshot", "picture", "capture"]),
        ])
    }
}

impl DisplayRules {
    pub fn new(rules: Vec<DisplayRule>) -> Self {
        Self { rules }
    }

    pub fn panels(&self, question: &str) -> BTreeSet<Panel> {
        // pad so a keyword with a trailing space also matches at the very end
        let question = format!("{} ", question.to_lowercase());
        self.rules
            .iter()
            .filter(|rule| rule.keywords.iter().any(|k| question.contains(k.as_str())))
            .map(|rule| rule.panel)
            .collect()
    }

    /// Panels for the latest question in `state`
    pub fn panels_for(&self, state: &ChatState) -> BTreeSet<Panel> {
        state
            .last_user_text()
            .map(|question| self.panels(question))
            .unwrap_or_default()
    }
}
