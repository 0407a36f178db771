//! Cursor over a session's notes for one-at-a-time review.

use curation_layer_schemas::{Decision, Note, NoteId, ReviewAction, ReviewSession};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ReviewDeck {
    session: ReviewSession,
    notes: Vec<Note>,
    decisions: HashMap<NoteId, Decision>,
    cursor: usize,
}

impl ReviewDeck {
    /// Build a deck positioned on the first undecided note
    pub fn new(session: ReviewSession, notes: Vec<Note>, actions: &[ReviewAction]) -> Self {
        let decisions = actions
            .iter()
            .map(|action| (action.note_id.clone(), action.decision))
            .collect();

        let mut deck = Self {
            session,
            notes,
            decisions,
            cursor: 0,
        };
        deck.cursor = deck.first_pending().unwrap_or(0);
        deck
    }

    pub fn session(&self) -> &ReviewSession {
        &self.session
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Note> {
        self.notes.get(self.cursor)
    }

    /// Advance one note; stays on the last note at the end
    pub fn next(&mut self) -> Option<&Note> {
        if self.cursor + 1 < self.notes.len() {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn previous(&mut self) -> Option<&Note> {
        self.cursor = self.cursor.saturating_sub(1);
        self.current()
    }

    /// Move to `index`; out-of-range indexes leave the cursor where it is
    pub fn jump(&mut self, index: usize) -> Option<&Note> {
        if index < self.notes.len() {
            self.cursor = index;
            self.current()
        } else {
            None
        }
    }

    /// Index of the first note without a decision
    pub fn first_pending(&self) -> Option<usize> {
        self.notes
            .iter()
            .position(|note| !self.decisions.contains_key(&note.id))
    }

    pub fn decision(&self, note_id: &NoteId) -> Option<Decision> {
        self.decisions.get(note_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.notes
            .iter()
            .filter(|note| !self.decisions.contains_key(&note.id))
            .count()
    }

    /// Mirror a submitted decision locally, taking the refreshed session
    pub fn record(&mut self, note: Note, decision: Decision, session: ReviewSession) {
        self.decisions.insert(note.id.clone(), decision);
        if let Some(slot) = self.notes.iter_mut().find(|n| n.id == note.id) {
            *slot = note;
        }
        self.session = session;
    }

    /// Mirror a cleared decision locally
    pub fn forget(&mut self, note: Note, session: ReviewSession) {
        self.decisions.remove(&note.id);
        if let Some(slot) = self.notes.iter_mut().find(|n| n.id == note.id) {
            *slot = note;
        }
        self.session = session;
    }
}
