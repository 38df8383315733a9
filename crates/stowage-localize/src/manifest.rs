use std::collections::HashMap;

use stowage_types::Uri;

/// Original-to-localized URI mapping for one top-level call.
///
/// Doubles as the visited set of the recursive walk: a URI already present
/// is never localized again within the same call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: HashMap<Uri, Uri>,
    order: Vec<Uri>,
    /// Localized URI back to the original that claimed it.
    claims: HashMap<Uri, Uri>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, original: &Uri) -> Option<&Uri> {
        self.entries.get(original)
    }

    pub fn contains(&self, original: &Uri) -> bool {
        self.entries.contains_key(original)
    }

    /// The original already mapped to `localized`, if any.
    pub fn claimant(&self, localized: &Uri) -> Option<&Uri> {
        self.claims.get(localized)
    }

    /// Map `original`, replacing any earlier assignment.
    ///
    /// The earlier localized URI is released for other originals to claim.
    pub fn insert(&mut self, original: Uri, localized: Uri) {
        self.claims.insert(localized.clone(), original.clone());
        match self.entries.insert(original.clone(), localized.clone()) {
            None => self.order.push(original),
            Some(previous) if previous != localized => {
                if self.claims.get(&previous) == Some(&original) {
                    self.claims.remove(&previous);
                }
            }
            Some(_) => {}
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order originals were first mapped.
    pub fn iter(&self) -> impl Iterator<Item = (&Uri, &Uri)> {
        self.order
            .iter()
            .filter_map(move |original| self.entries.get(original).map(|l| (original, l)))
    }
}
