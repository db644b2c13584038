//! Column-class aware value comparison.
//!
//! Two values are *similar* when they differ only in ways a human would not
//! call an edit: case, spacing, phone formatting, URL scheme, and so on.

use crate::record::Record;

/// Preferred-phone values with fewer digits than this are treated as blank.
pub const MIN_PREFERRED_PHONE_DIGITS: usize = 2;

/// Phone numbers must share at least this many trailing digits.
pub const MIN_PHONE_SUFFIX_DIGITS: usize = 8;

/// Comparison class of a column, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    Phone { preferred: bool },
    Role,
    Address,
    Url,
    Text,
}

impl ColumnClass {
    pub fn of(column: &str) -> Self {
        let lower = column.to_lowercase();
        if lower.contains("phone") {
            Self::Phone {
                preferred: lower.contains("pref"),
            }
        } else if lower.trim() == "role" {
            Self::Role
        } else if lower.contains("address") && !lower.contains("mail") {
            Self::Address
        } else if lower.contains("web site") || lower.contains("website") || lower.contains("url") {
            Self::Url
        } else {
            Self::Text
        }
    }
}

/// Clean a raw value before any comparison.
pub fn sanitize(class: ColumnClass, value: &str) -> String {
    match class {
        ColumnClass::Phone { preferred: true } if digits(value).len() < MIN_PREFERRED_PHONE_DIGITS => {
            String::new()
        }
        _ => value.to_string(),
    }
}

/// Case- and whitespace-insensitive form of a value.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

pub fn similar_text(a: &str, b: &str) -> bool {
    normalize_text(a) == normalize_text(b)
}

/// Phone numbers match when their trailing digits agree over the length of
/// the shorter number, which drops differing area and country codes.
/// Trunk-prefix zeros are ignored.
pub fn similar_phone(a: &str, b: &str) -> bool {
    let a = digits(a);
    let b = digits(b);
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    let len = a.len().min(b.len());
    len >= MIN_PHONE_SUFFIX_DIGITS && a[a.len() - len..] == b[b.len() - len..]
}

fn normalize_role(value: &str) -> String {
    let role = normalize_text(value);
    if role == "rn" {
        String::new()
    } else {
        role
    }
}

/// `RN` is the default role and compares equal to no role at all.
pub fn similar_role(a: &str, b: &str) -> bool {
    normalize_role(a) == normalize_role(b)
}

fn normalize_url(value: &str) -> String {
    let url = normalize_text(value);
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(&url);
    let url = url.strip_prefix("www.").unwrap_or(url);
    url.trim_end_matches('/').to_string()
}

pub fn similar_url(a: &str, b: &str) -> bool {
    normalize_url(a) == normalize_url(b)
}

/// Similarity of two non-identical values of `class`. Only decides the
/// classes that need no record context; addresses go through
/// [`ContactAddress`].
pub fn similar(class: ColumnClass, a: &str, b: &str) -> bool {
    if class == ColumnClass::Role {
        return similar_role(a, b);
    }
    if a.trim().is_empty() && b.trim().is_empty() {
        return true;
    }
    if a.trim().is_empty() || b.trim().is_empty() {
        return false;
    }
    match class {
        ColumnClass::Phone { .. } => similar_phone(a, b) || similar_text(a, b),
        ColumnClass::Role => similar_role(a, b),
        ColumnClass::Url => similar_url(a, b) || similar_text(a, b),
        ColumnClass::Address | ColumnClass::Text => similar_text(a, b),
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Structured address assembled from an address column's component columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactAddress {
    pub building: String,
    pub thoroughfare: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
}

impl ContactAddress {
    /// Read each component column of `record` into the field its name names.
    /// Columns naming no known field are street lines.
    pub fn from_record(record: &Record, components: &[String]) -> Self {
        let mut address = Self::default();
        for column in components {
            let value = record.value(column).trim();
            if value.is_empty() {
                continue;
            }
            let lower = column.to_lowercase();
            let field = if lower.contains("country") {
                &mut address.country
            } else if lower.contains("state") {
                &mut address.state
            } else if lower.contains("postcode") || lower.contains("post code") || lower.contains("zip") {
                &mut address.postcode
            } else if lower.contains("city") || lower.contains("suburb") {
                &mut address.city
            } else if lower.contains("building") || lower.contains("company") {
                &mut address.building
            } else {
                &mut address.thoroughfare
            };
            if !field.is_empty() {
                field.push(' ');
            }
            field.push_str(value);
        }
        address
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn normalized(&self) -> [String; 6] {
        let clean = |v: &str| normalize_text(&v.replace([',', '.'], " "));
        [
            clean(&self.building),
            clean(&self.thoroughfare),
            clean(&self.city),
            clean(&self.state),
            clean(&self.postcode),
            clean(&self.country),
        ]
    }

    /// Field-by-field comparison ignoring case, spacing and punctuation.
    pub fn similar(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}
