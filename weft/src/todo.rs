//! Ordered todo list collected after plan approval.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub description: String,
    pub completed: bool,
}

/// Ordered todos plus a cursor. Invariant: `current <= items.len()`;
/// completion is a free bit and does not constrain ordering.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub items: Vec<TodoItem>,
    pub current: usize,
}

impl TodoList {
    pub fn from_descriptions(descriptions: impl IntoIterator<Item = String>) -> Self {
        Self {
            items: descriptions
                .into_iter()
                .map(|description| TodoItem {
                    description,
                    completed: false,
                })
                .collect(),
            current: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Marks the current item completed and advances the cursor. No-op when
    /// the cursor is already past the end.
    pub fn complete_current(&mut self) {
        if let Some(item) = self.items.get_mut(self.current) {
            item.completed = true;
            self.current += 1;
        }
    }

    pub fn remaining(&self) -> usize {
        self.items.iter().filter(|t| !t.completed).count()
    }

    /// Checklist rendering used in coding prompts.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|t| {
                let mark = if t.completed { 'x' } else { ' ' };
                format!("[{mark}] {}", t.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_current_advances_cursor_and_stops_at_end() {
        let mut list = TodoList::from_descriptions(vec!["a".into(), "b".into()]);
        assert_eq!(list.remaining(), 2);
        list.complete_current();
        assert_eq!(list.current, 1);
        list.complete_current();
        assert_eq!(list.current, 2);
        assert_eq!(list.remaining(), 0);
        // Cursor never exceeds len.
        list.complete_current();
        assert_eq!(list.current, 2);
    }

    #[test]
    fn render_marks_completed_items() {
        let mut list = TodoList::from_descriptions(vec!["first".into(), "second".into()]);
        list.complete_current();
        let text = list.render();
        assert!(text.contains("[x] first"));
        assert!(text.contains("[ ] second"));
    }

    #[test]
    fn serde_round_trip() {
        let list = TodoList::from_descriptions(vec!["a".into()]);
        let json = serde_json::to_value(&list).unwrap();
        let back: TodoList = serde_json::from_value(json).unwrap();
        assert_eq!(back, list);
    }
}
