//! Human-enterable voucher reference numbers.
//!
//! References look like `BB-240115-AB12`: a configurable prefix, the issuance
//! date as `YYMMDD`, and four random uppercase alphanumerics. Uniqueness is not
//! guaranteed here; the issuance engine checks each candidate inside its
//! transaction and asks for another on collision.

use chrono::NaiveDate;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 4;

/// Source of candidate reference numbers.
pub trait ReferenceGenerator: Send + Sync {
    /// Produce a candidate reference for a voucher issued on `date`.
    fn generate(&self, date: NaiveDate) -> String;
}

/// Production generator: prefix, date stamp, random suffix
#[derive(Debug, Clone)]
pub struct RandomReferenceGenerator {
    prefix: String,
}

impl RandomReferenceGenerator {
    /// Creates a generator using `prefix`
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ReferenceGenerator for RandomReferenceGenerator {
    fn generate(&self, date: NaiveDate) -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| char::from(SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())]))
            .collect();
        format_reference(&self.prefix, date, &suffix)
    }
}

/// Hands out a fixed list of references in order, then repeats the last one.
///
/// Lets tests force collisions deterministically.
#[derive(Debug)]
pub struct ScriptedReferenceGenerator {
    queue: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedReferenceGenerator {
    /// Creates a generator that yields `references` in order
    #[must_use]
    pub fn new<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(references.into_iter().map(Into::into).collect()),
            last: Mutex::new(String::new()),
        }
    }
}

impl ReferenceGenerator for ScriptedReferenceGenerator {
    fn generate(&self, _date: NaiveDate) -> String {
        let next = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        match (next, self.last.lock()) {
            (Some(reference), Ok(mut last)) => {
                last.clone_from(&reference);
                reference
            }
            (Some(reference), Err(_)) => reference,
            (None, Ok(last)) => last.clone(),
            (None, Err(_)) => String::new(),
        }
    }
}

/// Assemble `PREFIX-YYMMDD-SUFFIX`
#[must_use]
pub fn format_reference(prefix: &str, date: NaiveDate, suffix: &str) -> String {
    format!("{prefix}-{}-{suffix}", date.format("%y%m%d"))
}

/// Normalize scanner or keyboard input before lookup.
#[must_use]
pub fn normalize(input: &str) -> String {
    input.trim().to_ascii_uppercase()
}

/// Whether `reference` has the `PREFIX-YYMMDD-XXXX` shape.
#[must_use]
pub fn is_well_formed(reference: &str, prefix: &str) -> bool {
    let mut parts = reference.splitn(3, '-');
    let (Some(head), Some(date), Some(suffix)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    head == prefix
        && date.len() == 6
        && NaiveDate::parse_from_str(&format!("20{date}"), "%Y%m%d").is_ok()
        && suffix.len() == SUFFIX_LEN
        && suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b))
}
