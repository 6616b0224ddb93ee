//! Contact directory contract and the in-memory name-ordered book used for
//! the directory, pending invites and the live membership alike.

use std::collections::BTreeMap;

use crate::contact::Contact;

/// Name → contact lookup the protocol needs. Storage format is up to the implementor.
pub trait Directory: Send {
    fn lookup(&self, name: &str) -> Option<&Contact>;

    /// Insert, replacing any contact with the same name.
    fn upsert(&mut self, contact: Contact);

    fn remove(&mut self, name: &str) -> Option<Contact>;

    /// All contacts ordered by name.
    fn contacts(&self) -> Vec<&Contact>;

    fn len(&self) -> usize;

    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contacts keyed and ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    entries: BTreeMap<String, Contact>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.entries.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Directory for ContactBook {
    fn lookup(&self, name: &str) -> Option<&Contact> {
        self.entries.get(name)
    }

    fn upsert(&mut self, contact: Contact) {
        self.entries.insert(contact.name().to_owned(), contact);
    }

    fn remove(&mut self, name: &str) -> Option<Contact> {
        self.entries.remove(name)
    }

    fn contacts(&self) -> Vec<&Contact> {
        self.entries.values().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl FromIterator<Contact> for ContactBook {
    fn from_iter<I: IntoIterator<Item = Contact>>(iter: I) -> Self {
        let mut book = ContactBook::new();
        for c in iter {
            book.upsert(c);
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Endpoint;
    use crate::identity::Keypair;

    fn contact(name: &str, port: u16) -> Contact {
        let kp = Keypair::generate();
        Contact::new(
            name,
            *kp.public_key(),
            Endpoint::new([127, 0, 0, 1].into(), port),
        )
        .unwrap()
    }

    #[test]
    fn ordered_by_name() {
        let book: ContactBook = [contact("carol", 3), contact("alice", 1), contact("bob", 2)]
            .into_iter()
            .collect();
        let names: Vec<&str> = book.contacts().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert_eq!(book.len(), 3);
    }

    #[test]
    fn upsert_replaces_same_name() {
        let mut book = ContactBook::new();
        book.upsert(contact("bob", 1));
        book.upsert(contact("bob", 2));
        assert_eq!(book.len(), 1);
        assert_eq!(book.lookup("bob").unwrap().primary_endpoint().port(), 2);
    }

    #[test]
    fn remove_and_contains() {
        let mut book = ContactBook::new();
        book.upsert(contact("bob", 1));
        assert!(book.contains("bob"));
        assert!(book.remove("bob").is_some());
        assert!(!book.contains("bob"));
        assert!(book.remove("bob").is_none());
        assert!(book.is_empty());
    }
}
