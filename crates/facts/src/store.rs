use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::trace;

use crate::error::FactError;
use crate::fact::{Fact, FactId};
use crate::value::Value;

/// Read access to a collection of facts.
///
/// Implemented by the live [`FactStore`] and by frozen [`FactSnapshot`]s so
/// that matching and expression evaluation can run against either.
pub trait FactSource {
    /// Look up a fact by identity.
    fn get(&self, id: &FactId) -> Option<&Fact>;

    /// The generation at which the fact last changed.
    fn stamp(&self, id: &FactId) -> Option<u64>;

    /// Facts of the given type (or all facts when `None`), in id order.
    fn candidates<'a>(&'a self, fact_type: Option<&str>)
    -> Box<dyn Iterator<Item = &'a Fact> + 'a>;
}

/// A single stored fact together with the generation that last touched it.
#[derive(Debug, Clone)]
struct Entry {
    fact: Fact,
    stamp: u64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    facts: BTreeMap<FactId, Entry>,
    by_type: BTreeMap<String, BTreeSet<FactId>>,
}

impl Tables {
    fn index(&mut self, fact_type: &str, id: &FactId) {
        self.by_type
            .entry(fact_type.to_owned())
            .or_default()
            .insert(id.clone());
    }

    fn unindex(&mut self, fact_type: &str, id: &FactId) {
        if let Some(ids) = self.by_type.get_mut(fact_type) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_type.remove(fact_type);
            }
        }
    }
}

/// An immutable view of the store at one generation.
///
/// Taking a snapshot is O(1): storage is shared with the store until the
/// store's next write, which copies it.
#[derive(Debug, Clone, Default)]
pub struct FactSnapshot {
    tables: Arc<Tables>,
    generation: u64,
}

impl FactSnapshot {
    /// The generation this snapshot was taken at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.tables.facts.len()
    }

    /// Returns `true` if there are no facts.
    pub fn is_empty(&self) -> bool {
        self.tables.facts.is_empty()
    }

    /// Returns `true` if a fact with this id exists.
    pub fn contains(&self, id: &FactId) -> bool {
        self.tables.facts.contains_key(id)
    }

    /// Look up a fact by identity.
    pub fn get(&self, id: &FactId) -> Option<&Fact> {
        self.tables.facts.get(id).map(|e| &e.fact)
    }

    /// The generation at which the fact last changed.
    pub fn stamp(&self, id: &FactId) -> Option<u64> {
        self.tables.facts.get(id).map(|e| e.stamp)
    }

    /// All facts in id order.
    pub fn facts(&self) -> impl Iterator<Item = &Fact> + '_ {
        self.tables.facts.values().map(|e| &e.fact)
    }

    /// Facts of one type in id order.
    pub fn of_type<'a>(&'a self, fact_type: &str) -> impl Iterator<Item = &'a Fact> + use<'a> {
        self.tables
            .by_type
            .get(fact_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(id))
    }

    /// Lazily yield the facts matching `predicate`, in id order.
    pub fn query<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Fact> + 'a
    where
        P: Fn(&Fact) -> bool + 'a,
    {
        self.facts().filter(move |fact| predicate(fact))
    }
}

impl FactSource for FactSnapshot {
    fn get(&self, id: &FactId) -> Option<&Fact> {
        FactSnapshot::get(self, id)
    }

    fn stamp(&self, id: &FactId) -> Option<u64> {
        FactSnapshot::stamp(self, id)
    }

    fn candidates<'a>(
        &'a self,
        fact_type: Option<&str>,
    ) -> Box<dyn Iterator<Item = &'a Fact> + 'a> {
        match fact_type {
            Some(t) => Box::new(self.of_type(t)),
            None => Box::new(self.facts()),
        }
    }
}

/// Mutable working memory.
///
/// Every effective mutation advances the generation counter and stamps the
/// touched fact with the new generation. Writes that leave the content
/// unchanged (re-asserting an identical fact, setting an attribute to its
/// current value) are not mutations. The generation never decreases.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    state: FactSnapshot,
}

impl FactStore {
    /// Create an empty store at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation.
    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Returns `true` if the store holds no facts.
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Returns `true` if a fact with this id exists.
    pub fn contains(&self, id: &FactId) -> bool {
        self.state.contains(id)
    }

    /// Look up a fact by identity.
    pub fn get(&self, id: &FactId) -> Option<&Fact> {
        self.state.get(id)
    }

    /// The generation at which the fact last changed.
    pub fn stamp(&self, id: &FactId) -> Option<u64> {
        self.state.stamp(id)
    }

    /// All facts in id order.
    pub fn facts(&self) -> impl Iterator<Item = &Fact> + '_ {
        self.state.facts()
    }

    /// Facts of one type in id order.
    pub fn of_type<'a>(&'a self, fact_type: &str) -> impl Iterator<Item = &'a Fact> + use<'a> {
        self.state.of_type(fact_type)
    }

    /// Lazily yield the facts currently matching `predicate`.
    ///
    /// The sequence is finite and each call observes the store as it is at
    /// that moment.
    pub fn query<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a Fact> + 'a
    where
        P: Fn(&Fact) -> bool + 'a,
    {
        self.state.query(predicate)
    }

    /// Ids of the facts changed after `generation`, in id order.
    pub fn changed_since(&self, generation: u64) -> impl Iterator<Item = &FactId> + '_ {
        self.state
            .tables
            .facts
            .iter()
            .filter(move |(_, entry)| entry.stamp > generation)
            .map(|(id, _)| id)
    }

    /// Take an O(1) frozen view of the current state.
    pub fn snapshot(&self) -> FactSnapshot {
        self.state.clone()
    }

    /// Roll the content back to an earlier snapshot.
    ///
    /// The generation is not rewound: if anything changed since the
    /// snapshot was taken, restoring counts as one more mutation.
    pub fn restore(&mut self, snapshot: FactSnapshot) {
        let changed = snapshot.generation != self.state.generation;
        self.state.tables = snapshot.tables;
        if changed {
            let generation = self.bump();
            trace!(generation, "fact store restored");
        }
    }

    /// Insert a fact, replacing any fact with the same identity.
    ///
    /// Facts without an id are identified by content fingerprint.
    pub fn assert(&mut self, fact: Fact) -> FactId {
        let fact = fact.identified();
        let id = fact.id().clone();
        if self.state.get(&id) == Some(&fact) {
            return id;
        }
        let stamp = self.bump();
        let tables = Arc::make_mut(&mut self.state.tables);
        let fact_type = fact.fact_type().to_owned();
        if let Some(previous) = tables.facts.insert(id.clone(), Entry { fact, stamp }) {
            tables.unindex(previous.fact.fact_type(), &id);
        }
        tables.index(&fact_type, &id);
        trace!(fact = %id, generation = stamp, "fact asserted");
        id
    }

    /// Remove a fact. Returns `false` if no such fact existed.
    pub fn retract(&mut self, id: &FactId) -> bool {
        self.retract_strict(id).is_ok()
    }

    /// Remove a fact, returning it, or fail with [`FactError::NotFound`].
    pub fn retract_strict(&mut self, id: &FactId) -> Result<Fact, FactError> {
        if !self.state.contains(id) {
            return Err(FactError::NotFound(id.clone()));
        }
        let generation = self.bump();
        let tables = Arc::make_mut(&mut self.state.tables);
        let entry = tables
            .facts
            .remove(id)
            .ok_or_else(|| FactError::NotFound(id.clone()))?;
        tables.unindex(entry.fact.fact_type(), id);
        trace!(fact = %id, generation, "fact retracted");
        Ok(entry.fact)
    }

    /// Update one attribute of an existing fact in place.
    pub fn modify(
        &mut self,
        id: &FactId,
        attribute: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), FactError> {
        self.modify_many(id, [(attribute.into(), value.into())])
            .map(|_| ())
    }

    /// Update several attributes of an existing fact as one mutation.
    ///
    /// Returns whether anything changed.
    pub fn modify_many<I>(&mut self, id: &FactId, changes: I) -> Result<bool, FactError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let current = self
            .state
            .get(id)
            .ok_or_else(|| FactError::NotFound(id.clone()))?;
        let mut effective = Vec::new();
        for (attribute, value) in changes {
            if attribute.is_empty() {
                return Err(FactError::InvalidAttribute(
                    "attribute name must not be empty".to_owned(),
                ));
            }
            if current.get(&attribute) != Some(&value) {
                effective.push((attribute, value));
            }
        }
        if effective.is_empty() {
            return Ok(false);
        }
        let stamp = self.bump();
        let tables = Arc::make_mut(&mut self.state.tables);
        let entry = tables
            .facts
            .get_mut(id)
            .ok_or_else(|| FactError::NotFound(id.clone()))?;
        for (attribute, value) in effective {
            entry.fact.set(attribute, value);
        }
        entry.stamp = stamp;
        trace!(fact = %id, generation = stamp, "fact modified");
        Ok(true)
    }

    /// Assert every fact in a JSON document.
    ///
    /// The document is either a single fact object or an array of them, in
    /// the shape accepted by [`Fact::from_json`]. Nothing is asserted if any
    /// entry is malformed.
    pub fn load_json(&mut self, json: &str) -> Result<Vec<FactId>, FactError> {
        let document: serde_json::Value =
            serde_json::from_str(json).map_err(|e| FactError::Json(e.to_string()))?;
        let entries = match document {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        let facts = entries
            .into_iter()
            .map(Fact::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(facts.into_iter().map(|fact| self.assert(fact)).collect())
    }

    fn bump(&mut self) -> u64 {
        self.state.generation += 1;
        self.state.generation
    }
}

impl FactSource for FactStore {
    fn get(&self, id: &FactId) -> Option<&Fact> {
        self.state.get(id)
    }

    fn stamp(&self, id: &FactId) -> Option<u64> {
        self.state.stamp(id)
    }

    fn candidates<'a>(
        &'a self,
        fact_type: Option<&str>,
    ) -> Box<dyn Iterator<Item = &'a Fact> + 'a> {
        self.state.candidates(fact_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: &str, fever: bool) -> Fact {
        Fact::new("Patient").with_id(id).with("fever", fever)
    }

    #[test]
    fn assert_bumps_generation_and_stamps() {
        let mut store = FactStore::new();
        assert_eq!(store.generation(), 0);

        let id = store.assert(patient("p1", true));
        assert_eq!(store.generation(), 1);
        assert_eq!(store.stamp(&id), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reasserting_identical_fact_is_not_a_mutation() {
        let mut store = FactStore::new();
        let a = store.assert(Fact::new("Diagnosis").with("name", "flu"));
        let b = store.assert(Fact::new("Diagnosis").with("name", "flu"));
        assert_eq!(a, b);
        assert_eq!(store.generation(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn assert_replaces_by_identity() {
        let mut store = FactStore::new();
        store.assert(patient("p1", true));
        store.assert(Fact::new("Doctor").with_id("p1"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.of_type("Patient").count(), 0);
        assert_eq!(store.of_type("Doctor").count(), 1);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn retract_unknown_returns_false() {
        let mut store = FactStore::new();
        assert!(!store.retract(&FactId::from("missing")));
        assert_eq!(store.generation(), 0);
        assert_eq!(
            store.retract_strict(&FactId::from("missing")),
            Err(FactError::NotFound(FactId::from("missing")))
        );
    }

    #[test]
    fn retract_removes_fact_and_index() {
        let mut store = FactStore::new();
        let id = store.assert(patient("p1", true));
        assert!(store.retract(&id));
        assert!(store.is_empty());
        assert_eq!(store.of_type("Patient").count(), 0);
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn modify_updates_in_place() {
        let mut store = FactStore::new();
        let id = store.assert(patient("p1", true));
        store.modify(&id, "fever", false).unwrap();
        assert_eq!(store.get(&id).unwrap().get("fever"), Some(&Value::Bool(false)));
        assert_eq!(store.generation(), 2);
        assert_eq!(store.stamp(&id), Some(2));

        // Same value again: no mutation.
        store.modify(&id, "fever", false).unwrap();
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn modify_unknown_fact_fails() {
        let mut store = FactStore::new();
        let err = store.modify(&FactId::from("nope"), "x", 1).unwrap_err();
        assert_eq!(err, FactError::NotFound(FactId::from("nope")));
    }

    #[test]
    fn modify_rejects_empty_attribute() {
        let mut store = FactStore::new();
        let id = store.assert(patient("p1", true));
        assert!(matches!(
            store.modify(&id, "", 1),
            Err(FactError::InvalidAttribute(_))
        ));
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn query_reflects_current_state() {
        let mut store = FactStore::new();
        store.assert(patient("p1", true));
        store.assert(patient("p2", false));

        let feverish = |f: &Fact| f.get("fever") == Some(&Value::Bool(true));
        assert_eq!(store.query(feverish).count(), 1);

        store.modify(&FactId::from("p2"), "fever", true).unwrap();
        let ids: Vec<_> = store.query(feverish).map(|f| f.id().as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut store = FactStore::new();
        store.assert(patient("p1", true));
        let snapshot = store.snapshot();

        store.assert(patient("p2", true));
        store.retract(&FactId::from("p1"));

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&FactId::from("p1")));
        assert_eq!(snapshot.generation(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn restore_rolls_back_content_but_not_generation() {
        let mut store = FactStore::new();
        let id = store.assert(patient("p1", true));
        let checkpoint = store.snapshot();

        store.modify(&id, "fever", false).unwrap();
        store.assert(patient("p2", true));
        assert_eq!(store.generation(), 3);

        store.restore(checkpoint);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).unwrap().get("fever"), Some(&Value::Bool(true)));
        assert_eq!(store.generation(), 4);
    }

    #[test]
    fn changed_since_lists_touched_facts() {
        let mut store = FactStore::new();
        store.assert(patient("p1", true));
        let mark = store.generation();
        store.assert(patient("p2", true));
        let changed: Vec<_> = store.changed_since(mark).cloned().collect();
        assert_eq!(changed, vec![FactId::from("p2")]);
    }

    #[test]
    fn load_json_asserts_all_or_nothing() {
        let mut store = FactStore::new();
        let ids = store
            .load_json(
                r#"[
                    {"type": "Patient", "attributes": {"fever": true}},
                    {"type": "Patient", "id": "p2", "attributes": {"cough": true}}
                ]"#,
            )
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.len(), 2);

        let err = store
            .load_json(r#"[{"type": "Patient"}, {"id": "no-type"}]"#)
            .unwrap_err();
        assert!(matches!(err, FactError::Json(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn fact_source_candidates_filter_by_type() {
        let mut store = FactStore::new();
        store.assert(patient("p1", true));
        store.assert(Fact::new("Doctor").with_id("d1"));
        let source: &dyn FactSource = &store;
        assert_eq!(source.candidates(Some("Doctor")).count(), 1);
        assert_eq!(source.candidates(None).count(), 2);
        assert_eq!(source.candidates(Some("Nurse")).count(), 0);
    }
}
