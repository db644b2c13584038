use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::ReconError;
use crate::model::{Match, MatchList, MatchType};
use crate::record::{
    column_key, normalized_column_key, KeyFn, Record, RecordFilter, Register, RegisterMode, Side,
};

pub const USERNAME_COLUMN: &str = "Username";
pub const CARD_COLUMN: &str = "Card ID";
pub const EMAIL_COLUMN: &str = "E-mail";
pub const CATEGORY_COLUMN: &str = "taxosum";
pub const PRODUCT_COLUMN: &str = "codesum";

// ---------------------------------------------------------------------------
// Buckets
// ---------------------------------------------------------------------------

/// Matches produced by one matcher, split by classification.
#[derive(Debug, Clone)]
pub struct MatchBuckets {
    pub pure: MatchList,
    pub masterless: MatchList,
    pub slaveless: MatchList,
    pub duplicate: MatchList,
    pub all: MatchList,
}

impl MatchBuckets {
    fn new(index_fn: &KeyFn) -> Self {
        let list = || MatchList::with_index_fn(index_fn.clone());
        Self {
            pure: list(),
            masterless: list(),
            slaveless: list(),
            duplicate: list(),
            all: list(),
        }
    }

    pub fn bucket(&self, match_type: MatchType) -> Option<&MatchList> {
        match match_type {
            MatchType::Pure => Some(&self.pure),
            MatchType::Masterless => Some(&self.masterless),
            MatchType::Slaveless => Some(&self.slaveless),
            MatchType::Duplicate => Some(&self.duplicate),
            MatchType::Empty => None,
        }
    }

    fn add(&mut self, m: Match) -> Result<(), ReconError> {
        let target = match m.match_type() {
            MatchType::Empty => return Ok(()),
            MatchType::Pure => &mut self.pure,
            MatchType::Masterless => &mut self.masterless,
            MatchType::Slaveless => &mut self.slaveless,
            MatchType::Duplicate => &mut self.duplicate,
        };
        target.add(m.clone())?;
        self.all.add(m)
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// State shared by every matcher: the key, optional side filters, results.
pub struct MatcherState {
    key_fn: KeyFn,
    master_filter: Option<RecordFilter>,
    slave_filter: Option<RecordFilter>,
    buckets: MatchBuckets,
}

impl MatcherState {
    pub fn new(key_fn: KeyFn) -> Self {
        Self {
            buckets: MatchBuckets::new(&key_fn),
            key_fn,
            master_filter: None,
            slave_filter: None,
        }
    }

    /// A state whose filters drop records already claimed in `prior`.
    pub fn excluding(key_fn: KeyFn, prior: &MatchList) -> Self {
        let mut state = Self::new(key_fn);
        state.exclude(prior);
        state
    }

    pub fn exclude(&mut self, prior: &MatchList) {
        self.master_filter = Some(exclude_indices(prior.indices(Side::Master).clone()));
        self.slave_filter = Some(exclude_indices(prior.indices(Side::Slave).clone()));
    }

    pub fn set_filter(&mut self, side: Side, filter: RecordFilter) {
        match side {
            Side::Master => self.master_filter = Some(filter),
            Side::Slave => self.slave_filter = Some(filter),
        }
    }

    fn filtered(filter: Option<&RecordFilter>, records: Vec<Record>) -> Vec<Record> {
        match filter {
            Some(keep) => records.into_iter().filter(|r| keep(r)).collect(),
            None => records,
        }
    }
}

fn exclude_indices(claimed: HashSet<String>) -> RecordFilter {
    Arc::new(move |r: &Record| !claimed.contains(r.index()))
}

/// Pairs master and slave records sharing a key.
pub trait Matcher {
    fn name(&self) -> &'static str;
    fn mode(&self) -> RegisterMode;
    fn state(&self) -> &MatcherState;
    fn state_mut(&mut self) -> &mut MatcherState;

    fn key_fn(&self) -> KeyFn {
        self.state().key_fn.clone()
    }

    fn buckets(&self) -> &MatchBuckets {
        &self.state().buckets
    }

    /// Restrict this matcher to records not already claimed in `prior`.
    fn exclude_matched(&mut self, prior: &MatchList) {
        self.state_mut().exclude(prior);
    }

    fn retrieve_objects(&self, register: &Register, key: &str) -> Vec<Record> {
        register.get(key).into_iter().cloned().collect()
    }

    /// Pair every slave key with its master records, then emit the master
    /// keys that had no slave counterpart.
    fn process_registers(
        &mut self,
        slave_register: &Register,
        master_register: &Register,
    ) -> Result<(), ReconError> {
        let mut master_keys: IndexSet<&str> = master_register.keys().into_iter().collect();

        for slave_key in slave_register.keys() {
            let slaves = self.retrieve_objects(slave_register, slave_key);
            let masters = if master_keys.shift_remove(slave_key) {
                self.retrieve_objects(master_register, slave_key)
            } else {
                Vec::new()
            };
            self.process_objects(masters, slaves)?;
        }

        for master_key in master_keys {
            let masters = self.retrieve_objects(master_register, master_key);
            self.process_objects(masters, Vec::new())?;
        }

        let buckets = self.buckets();
        log::debug!(
            "{} matcher: {} pure, {} masterless, {} slaveless, {} duplicate",
            self.name(),
            buckets.pure.len(),
            buckets.masterless.len(),
            buckets.slaveless.len(),
            buckets.duplicate.len(),
        );
        Ok(())
    }

    fn process_objects(
        &mut self,
        masters: Vec<Record>,
        slaves: Vec<Record>,
    ) -> Result<(), ReconError> {
        let state = self.state_mut();
        let masters = MatcherState::filtered(state.master_filter.as_ref(), masters);
        let slaves = MatcherState::filtered(state.slave_filter.as_ref(), slaves);
        state.buckets.add(Match::new(masters, slaves))
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

macro_rules! matcher_state_impl {
    ($name:literal, $mode:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn mode(&self) -> RegisterMode {
            $mode
        }

        fn state(&self) -> &MatcherState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut MatcherState {
            &mut self.state
        }
    };
}

/// Matches user accounts by username. Duplicate usernames are kept as
/// duplicate matches.
pub struct UsernameMatcher {
    state: MatcherState,
}

impl UsernameMatcher {
    pub fn new() -> Self {
        Self::with_column(USERNAME_COLUMN)
    }

    pub fn with_column(column: &str) -> Self {
        Self {
            state: MatcherState::new(column_key(column)),
        }
    }
}

impl Default for UsernameMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for UsernameMatcher {
    matcher_state_impl!("username", RegisterMode::Nonsingular);
}

/// Matches by card ID among records no earlier pass has claimed.
pub struct CardMatcher {
    state: MatcherState,
}

impl CardMatcher {
    pub fn new(column: &str, prior: &MatchList) -> Self {
        Self {
            state: MatcherState::excluding(column_key(column), prior),
        }
    }
}

impl Matcher for CardMatcher {
    matcher_state_impl!("card", RegisterMode::Nonsingular);
}

/// Matches by case-folded email among records no earlier pass has claimed.
pub struct EmailMatcher {
    state: MatcherState,
}

impl EmailMatcher {
    pub fn new(column: &str, prior: &MatchList) -> Self {
        Self {
            state: MatcherState::excluding(normalized_column_key(column), prior),
        }
    }
}

impl Matcher for EmailMatcher {
    matcher_state_impl!("email", RegisterMode::Nonsingular);
}

/// Matches product categories by their title path.
///
/// Not part of the configured pass chain; callers syncing catalogs drive it
/// with [`run_matcher`] directly.
pub struct CategoryMatcher {
    state: MatcherState,
}

impl CategoryMatcher {
    pub fn new() -> Self {
        Self::with_column(CATEGORY_COLUMN)
    }

    pub fn with_column(column: &str) -> Self {
        Self {
            state: MatcherState::new(column_key(column)),
        }
    }
}

impl Default for CategoryMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for CategoryMatcher {
    matcher_state_impl!("category", RegisterMode::Singular);
}

/// Matches products by product code. Like [`CategoryMatcher`], it is driven
/// directly by catalog callers rather than by a configured pass.
pub struct ProductMatcher {
    state: MatcherState,
}

impl ProductMatcher {
    pub fn new() -> Self {
        Self::with_column(PRODUCT_COLUMN)
    }

    pub fn with_column(column: &str) -> Self {
        Self {
            state: MatcherState::new(column_key(column)),
        }
    }
}

impl Default for ProductMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for ProductMatcher {
    matcher_state_impl!("product", RegisterMode::Singular);
}

/// Take every record keyed `key` out of a singular register, with the
/// records that collided on it.
fn take_contested(register: &mut Register, collisions: &[Record], key: &str, key_fn: &KeyFn) -> Vec<Record> {
    let mut records = register.take(key);
    records.extend(collisions.iter().filter(|r| key_fn(r) == key).cloned());
    records
}

/// Key both sources with the matcher's key and run it.
///
/// A key carried by several records of a singular source is ambiguous: all
/// records with that key, from both sources, become one duplicate match.
pub fn run_matcher<M: Matcher + ?Sized>(
    matcher: &mut M,
    masters: &[Record],
    slaves: &[Record],
) -> Result<(), ReconError> {
    let key_fn = matcher.key_fn();
    let mut master_keyed = Register::build(masters, &key_fn, matcher.mode());
    let mut slave_keyed = Register::build(slaves, &key_fn, matcher.mode());
    if !master_keyed.unkeyed.is_empty() || !slave_keyed.unkeyed.is_empty() {
        log::debug!(
            "{} matcher: {} master and {} slave records have no key",
            matcher.name(),
            master_keyed.unkeyed.len(),
            slave_keyed.unkeyed.len(),
        );
    }

    let contested: IndexSet<String> = master_keyed
        .collisions
        .iter()
        .chain(&slave_keyed.collisions)
        .map(|r| key_fn(r))
        .collect();
    let mut contested_objects = Vec::with_capacity(contested.len());
    for key in &contested {
        let masters = take_contested(&mut master_keyed.register, &master_keyed.collisions, key, &key_fn);
        let slaves = take_contested(&mut slave_keyed.register, &slave_keyed.collisions, key, &key_fn);
        contested_objects.push((masters, slaves));
    }
    if !contested.is_empty() {
        log::warn!(
            "{} matcher: {} keys are shared by several records of one source",
            matcher.name(),
            contested.len(),
        );
    }

    matcher.process_registers(&slave_keyed.register, &master_keyed.register)?;
    for (masters, slaves) in contested_objects {
        matcher.process_objects(masters, slaves)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(index: &str, username: &str) -> Record {
        Record::new(index, 1).with(USERNAME_COLUMN, username)
    }

    fn register(records: &[Record], key: &str, mode: RegisterMode) -> Register {
        Register::build(records, &column_key(key), mode).register
    }

    #[test]
    fn username_matcher_buckets() {
        let masters = vec![user("m1", "abe"), user("m2", "bob"), user("m3", "cat")];
        let slaves = vec![
            user("s1", "abe"),
            user("s2", "cat"),
            user("s3", "cat"),
            user("s4", "dan"),
        ];
        let mut matcher = UsernameMatcher::new();
        matcher
            .process_registers(
                &register(&slaves, USERNAME_COLUMN, RegisterMode::Nonsingular),
                &register(&masters, USERNAME_COLUMN, RegisterMode::Nonsingular),
            )
            .unwrap();

        let b = matcher.buckets();
        assert_eq!(b.pure.len(), 1);
        assert_eq!(b.pure.matches()[0].master().unwrap().index, "m1");
        assert_eq!(b.duplicate.len(), 1);
        assert_eq!(b.duplicate.matches()[0].slave_records.len(), 2);
        assert_eq!(b.masterless.len(), 1);
        assert_eq!(b.masterless.matches()[0].slave().unwrap().index, "s4");
        assert_eq!(b.slaveless.len(), 1);
        assert_eq!(b.slaveless.matches()[0].master().unwrap().index, "m2");
        assert_eq!(b.all.len(), 4);
    }

    #[test]
    fn filtering_matcher_skips_claimed_records() {
        let masters = vec![
            Record::new("m1", 1).with(CARD_COLUMN, "C1"),
            Record::new("m2", 2).with(CARD_COLUMN, "C2"),
        ];
        let slaves = vec![
            Record::new("s1", 1).with(CARD_COLUMN, "C1"),
            Record::new("s2", 2).with(CARD_COLUMN, "C2"),
        ];
        let mut prior = MatchList::new();
        prior
            .add(Match::new(vec![masters[0].clone()], vec![Record::new("s9", 9)]))
            .unwrap();

        let mut matcher = CardMatcher::new(CARD_COLUMN, &prior);
        run_matcher(&mut matcher, &masters, &slaves).unwrap();

        let b = matcher.buckets();
        assert_eq!(b.pure.len(), 1);
        assert_eq!(b.pure.matches()[0].master().unwrap().index, "m2");
        // C1: master m1 was claimed, so its slave is left masterless
        assert_eq!(b.masterless.len(), 1);
        assert_eq!(b.masterless.matches()[0].slave().unwrap().index, "s1");
        assert!(b.slaveless.is_empty());
    }

    #[test]
    fn fully_filtered_pairs_are_dropped() {
        let masters = vec![Record::new("m1", 1).with(CARD_COLUMN, "C1")];
        let slaves = vec![Record::new("s1", 1).with(CARD_COLUMN, "C1")];
        let mut prior = MatchList::new();
        prior
            .add(Match::new(masters.clone(), slaves.clone()))
            .unwrap();

        let mut matcher = CardMatcher::new(CARD_COLUMN, &prior);
        run_matcher(&mut matcher, &masters, &slaves).unwrap();
        assert!(matcher.buckets().all.is_empty());
    }

    #[test]
    fn email_matcher_ignores_case() {
        let masters = vec![Record::new("m1", 1).with(EMAIL_COLUMN, "Abe@Example.com")];
        let slaves = vec![Record::new("s1", 1).with(EMAIL_COLUMN, "abe@example.COM ")];
        let mut matcher = EmailMatcher::new(EMAIL_COLUMN, &MatchList::new());
        run_matcher(&mut matcher, &masters, &slaves).unwrap();
        assert_eq!(matcher.buckets().pure.len(), 1);
    }

    #[test]
    fn product_matcher_is_singular() {
        let masters = vec![
            Record::new("1", 1).with(PRODUCT_COLUMN, "ACA"),
            Record::new("2", 2).with(PRODUCT_COLUMN, "ACB"),
        ];
        let slaves = vec![Record::new("10", 1).with(PRODUCT_COLUMN, "ACB")];
        let mut matcher = ProductMatcher::new();
        assert_eq!(matcher.mode(), RegisterMode::Singular);
        run_matcher(&mut matcher, &masters, &slaves).unwrap();
        assert_eq!(matcher.buckets().pure.len(), 1);
        assert_eq!(matcher.buckets().slaveless.len(), 1);
    }

    #[test]
    fn singular_key_collision_becomes_duplicate() {
        let masters = vec![
            Record::new("1", 1).with(PRODUCT_COLUMN, "ACA"),
            Record::new("2", 2).with(PRODUCT_COLUMN, "ACA"),
            Record::new("3", 3).with(PRODUCT_COLUMN, "ACB"),
        ];
        let slaves = vec![
            Record::new("10", 1).with(PRODUCT_COLUMN, "ACA"),
            Record::new("11", 2).with(PRODUCT_COLUMN, "ACB"),
        ];
        let mut matcher = ProductMatcher::new();
        run_matcher(&mut matcher, &masters, &slaves).unwrap();

        let b = matcher.buckets();
        assert_eq!(b.pure.len(), 1);
        assert_eq!(b.pure.matches()[0].master().unwrap().index, "3");
        assert_eq!(b.duplicate.len(), 1);
        let dup = &b.duplicate.matches()[0];
        assert_eq!(dup.master_records.len(), 2);
        assert_eq!(dup.slave_records.len(), 1);
        assert_eq!(dup.slave_records[0].index, "10");
        assert!(b.slaveless.is_empty());
        assert_eq!(b.all.len(), 2);
    }

    #[test]
    fn category_matcher_pairs_titles() {
        let masters = vec![Record::new("c1", 1).with(CATEGORY_COLUMN, "Tanning > Solution")];
        let slaves = vec![Record::new("7", 1).with(CATEGORY_COLUMN, "Tanning > Solution")];
        let mut matcher = CategoryMatcher::new();
        run_matcher(&mut matcher, &masters, &slaves).unwrap();
        assert_eq!(matcher.buckets().pure.len(), 1);
        assert!(matcher.buckets().bucket(MatchType::Empty).is_none());
    }
}
