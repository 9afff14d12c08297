//! Console transcript
//!
//! Host-local record of everything the run printed and everything the
//! user submitted. Adjacent entries of the same kind are merged so the
//! transcript stays one entry per visual block.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleEntryKind {
    /// Text the user submitted
    Input,
    /// Program stdout
    Output,
    /// Program stderr and run errors
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub kind: ConsoleEntryKind,
    pub value: String,
}

/// Listener handle returned by `add_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&ConsoleEntry) + Send>;

#[derive(Default)]
pub struct Console {
    entries: Vec<ConsoleEntry>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text; listeners see exactly the appended piece
    pub fn append(&mut self, kind: ConsoleEntryKind, text: &str) {
        if text.is_empty() {
            return;
        }

        match self.entries.last_mut() {
            Some(last) if last.kind == kind => last.value.push_str(text),
            _ => self.entries.push(ConsoleEntry {
                kind,
                value: text.to_string(),
            }),
        }

        let piece = ConsoleEntry {
            kind,
            value: text.to_string(),
        };
        for (_, listener) in self.listeners.iter_mut() {
            listener(&piece);
        }
    }

    pub fn entries(&self) -> &[ConsoleEntry] {
        &self.entries
    }

    /// Full transcript as one string
    pub fn text(&self) -> String {
        self.entries.iter().map(|e| e.value.as_str()).collect()
    }

    /// Text of the given kind only
    pub fn text_of(&self, kind: ConsoleEntryKind) -> String {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value.as_str())
            .collect()
    }

    /// The unterminated last line, i.e. what an input prompt looks like
    pub fn current_prompt(&self) -> String {
        let text = self.text();
        match text.rfind('\n') {
            Some(pos) => text[pos + 1..].to_string(),
            None => text,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_listener(&mut self, listener: impl FnMut(&ConsoleEntry) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if the listener was not registered
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Entries as JSON, for the browser surface
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("entries", &self.entries)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
