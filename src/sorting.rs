//! Ordering of sibling descriptors.
//!
//! Children are re-sorted one directory at a time whenever that directory
//! gains or loses a child. A whole-tree sort only happens when the sort
//! configuration changes or a fresh snapshot arrives.

use std::{cmp::Ordering, iter::Peekable, str::Chars};

use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;

/// Which field orders files among themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortKey {
    #[default]
    Name,
    Modified,
    Created,
}

/// How names are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collation {
    /// Case-insensitive, with runs of digits compared by numeric value, so
    /// `note2` sorts before `note10`.
    #[default]
    Natural,
    /// Plain byte-wise comparison.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SortConfig {
    pub key: SortKey,
    pub collation: Collation,
    /// Directories always form one group. This decides whether that group
    /// comes before or after the files.
    pub directories_first: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            key: SortKey::Name,
            collation: Collation::Natural,
            directories_first: true,
        }
    }
}

/// Builds a total, deterministic comparator for siblings.
///
/// Directories are ordered among themselves by name no matter which key is
/// configured. Files use the configured key, then name, then path, so two
/// distinct descriptors never compare equal.
pub fn make_comparator(config: &SortConfig) -> impl Fn(&Descriptor, &Descriptor) -> Ordering {
    let config = *config;

    move |a, b| {
        let group = match (a.is_dir(), b.is_dir()) {
            (true, false) if config.directories_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if config.directories_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => Ordering::Equal,
        };

        let by_key = || match config.key {
            _ if a.is_dir() => Ordering::Equal,
            SortKey::Name => Ordering::Equal,
            SortKey::Modified => a.modified_time.cmp(&b.modified_time),
            SortKey::Created => a.created_time.cmp(&b.created_time),
        };

        group
            .then_with(by_key)
            .then_with(|| compare_names(&a.name, &b.name, config.collation))
            .then_with(|| a.path.cmp(&b.path))
    }
}

/// Sorts the immediate children of `directory`. Does nothing for files.
pub fn sort_children(directory: &mut Descriptor, config: &SortConfig) {
    if let Some(children) = directory.children_mut() {
        children.sort_by(make_comparator(config));
    }
}

/// Sorts every directory in the tree.
pub fn sort_recursive(tree: &mut Descriptor, config: &SortConfig) {
    let comparator = make_comparator(config);
    sort_recursive_with(tree, &comparator);
}

fn sort_recursive_with(
    tree: &mut Descriptor,
    comparator: &impl Fn(&Descriptor, &Descriptor) -> Ordering,
) {
    if let Some(children) = tree.children_mut() {
        children.sort_by(comparator);

        for child in children {
            sort_recursive_with(child, comparator);
        }
    }
}

pub fn compare_names(a: &str, b: &str, collation: Collation) -> Ordering {
    match collation {
        Collation::Raw => a.cmp(b),
        Collation::Natural => natural_cmp(a, b),
    }
}

/// Compares two strings case-insensitively, treating runs of ASCII digits as
/// numbers. Falls back to a raw comparison so that names differing only in
/// case or leading zeros still have a fixed order.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        let ordering = match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                compare_digit_runs(&mut left, &mut right)
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                l.to_lowercase().cmp(r.to_lowercase())
            }
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn compare_digit_runs(
    left: &mut Peekable<Chars<'_>>,
    right: &mut Peekable<Chars<'_>>,
) -> Ordering {
    let left_digits = take_digits(left);
    let right_digits = take_digits(right);

    let left_trimmed = left_digits.trim_start_matches('0');
    let right_trimmed = right_digits.trim_start_matches('0');

    left_trimmed
        .len()
        .cmp(&right_trimmed.len())
        .then_with(|| left_trimmed.cmp(right_trimmed))
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();

    while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
        digits.push(c);
    }

    digits
}
