//! Read-only contact directory
//!
//! Each contact carries the system prompt used verbatim for calls placed to
//! it. Numbers are compared after stripping spaces and dashes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Message shown when a dialled number has no contact
pub const NOT_IN_SERVICE_MESSAGE: &str = "The number you have dialled is not in service.";

/// A dialable contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialError {
    #[error("{}", NOT_IN_SERVICE_MESSAGE)]
    NotInService { number: String },
}

/// Strip formatting characters from a dialled number
pub fn normalize_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Phonebook {
    contacts: Vec<Contact>,
    by_number: HashMap<String, usize>,
}

impl Phonebook {
    pub fn new(contacts: Vec<Contact>) -> Self {
        let mut by_number = HashMap::with_capacity(contacts.len());
        for (idx, contact) in contacts.iter().enumerate() {
            // First entry wins; duplicates are rejected by settings validation
            by_number
                .entry(normalize_number(&contact.number))
                .or_insert(idx);
        }
        Self {
            contacts,
            by_number,
        }
    }

    /// Resolve a dialled number to a contact
    pub fn dial(&self, number: &str) -> Result<&Contact, DialError> {
        self.by_number
            .get(&normalize_number(number))
            .and_then(|&idx| self.contacts.get(idx))
            .ok_or_else(|| DialError::NotInService {
                number: number.to_string(),
            })
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}
