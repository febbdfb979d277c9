//! Client-side ordering of search entries.
//!
//! Servers are not required to return entries in any order; these
//! helpers sort a collected result set by attribute values after the
//! fact.

use std::cmp::Ordering;

use xavyo_ldap_proto::SearchEntry;

/// One ordering criterion: an attribute name and a direction.
///
/// Comparison uses each entry's first value of the attribute,
/// case-insensitively unless [`case_sensitive`] is set. Entries
/// missing the attribute order after entries that have it, in either
/// direction.
///
/// [`case_sensitive`]: SortKey::case_sensitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub reverse: bool,
    pub case_sensitive: bool,
}

impl SortKey {
    /// Ascending on `attribute`.
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            reverse: false,
            case_sensitive: false,
        }
    }

    /// Descending on `attribute`.
    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            reverse: true,
            ..Self::asc(attribute)
        }
    }

    /// Compare values byte-for-byte instead of ASCII-case-folded.
    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

/// Multi-key comparison: the first key that distinguishes the entries
/// decides.
pub fn compare_entries(a: &SearchEntry, b: &SearchEntry, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_by_key(a, b, key);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sorts in place by `keys`. The sort is stable: entries equal under
/// every key keep their arrival order.
pub fn sort_entries(entries: &mut [SearchEntry], keys: &[SortKey]) {
    entries.sort_by(|a, b| compare_entries(a, b, keys));
}

fn compare_by_key(a: &SearchEntry, b: &SearchEntry, key: &SortKey) -> Ordering {
    match (a.attr_first(&key.attribute), b.attr_first(&key.attribute)) {
        (Some(x), Some(y)) => {
            let ord = if key.case_sensitive {
                x.cmp(y)
            } else {
                cmp_ignore_ascii_case(x, y)
            };
            if key.reverse {
                ord.reverse()
            } else {
                ord
            }
        }
        // Absent attributes sort last regardless of direction.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_ignore_ascii_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}
