//! # Smoothing Module
//!
//! Debounces the frame-by-frame note classification. A note is only
//! reported once it holds a strict majority of the recent window, and only
//! if it differs from the note reported last.

use std::collections::{HashMap, VecDeque};

use crate::config::DEFAULT_SMOOTHING_WINDOW;

/// Fixed-capacity window of recent note names with a majority vote.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    notes: VecDeque<String>,
    capacity: usize,
    last_decided: Option<String>,
}

impl Default for SmoothingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_WINDOW)
    }
}

impl SmoothingBuffer {
    /// Creates an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            notes: VecDeque::with_capacity(capacity + 1),
            capacity,
            last_decided: None,
        }
    }

    /// Appends a note name, evicting the oldest one when full.
    pub fn push(&mut self, note: impl Into<String>) {
        self.notes.push_back(note.into());
        if self.notes.len() > self.capacity {
            self.notes.pop_front();
        }
    }

    /// The note holding a strict majority of the capacity, if any.
    ///
    /// The vote is measured against the full capacity, not the current
    /// fill level: with a capacity of 5 a note needs at least 3 entries.
    /// On equal counts the note that reached the count first wins.
    pub fn majority_note(&self) -> Option<&str> {
        let mut counts: HashMap<&str, usize> = HashMap::with_capacity(self.notes.len());
        let mut max_count = 0;
        let mut candidate = None;

        for note in &self.notes {
            let count = counts.entry(note.as_str()).or_insert(0);
            *count += 1;
            if *count > max_count {
                max_count = *count;
                candidate = Some(note.as_str());
            }
        }

        if max_count * 2 > self.capacity {
            candidate
        } else {
            None
        }
    }

    /// Pushes a note and returns the majority note if it changed.
    ///
    /// Returns `None` when there is no majority, or when the majority is
    /// the note already returned by a previous call.
    pub fn decide(&mut self, note: impl Into<String>) -> Option<String> {
        self.push(note);
        let majority = self.majority_note()?;
        if self.last_decided.as_deref() == Some(majority) {
            return None;
        }
        let majority = majority.to_owned();
        self.last_decided = Some(majority.clone());
        Some(majority)
    }

    /// Clears the window and forgets the last decided note.
    pub fn reset(&mut self) {
        self.notes.clear();
        self.last_decided = None;
    }

    pub fn last_decided(&self) -> Option<&str> {
        self.last_decided.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Buffered note names, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.notes.iter().map(String::as_str)
    }
}
