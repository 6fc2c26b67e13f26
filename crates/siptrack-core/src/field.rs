//! # Storage Fields
//!
//! A [`Field<T>`] is bound to one backend key of one node. It validates on
//! `set`, queues a `write_data` action instead of writing, and loads lazily
//! from the backend on the first `get` that misses the cache.
//!
//! Reference-typed fields (`Field<Oid>`, `Field<Vec<Oid>>`) heal
//! themselves: a reference to a node that is no longer live is dropped on
//! access and the corrected value is queued for write-back.
//!
//! Uncached fields never keep a value in memory past the write that
//! produced it, so large payloads are read from the backend on demand.

use crate::formats::decode_value;
use crate::journal::Journal;
use crate::storage::Storage;
use crate::types::{Oid, Result, SiptrackError, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

/// Preloaded field data of one node, keyed by field name.
pub type DataMap = BTreeMap<String, Value>;

/// Validation hook run before anything is queued.
pub type Validator<T> = fn(&T) -> Result<()>;

/// How a field's stored value relates to other nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// A single node reference; `None` is a valid stored value.
    Reference,
    ReferenceList,
}

/// Conversion between a typed field value and its stored [`Value`].
pub trait FieldType: Clone + Send + Sync + 'static {
    const KIND: FieldKind;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> SiptrackError {
    SiptrackError::InvalidData(format!(
        "invalid value for type {expected}: got {}",
        value.type_name()
    ))
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Scalar;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl FieldType for i64 {
    const KIND: FieldKind = FieldKind::Scalar;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_int().ok_or_else(|| mismatch("int", &value))
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Scalar;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl FieldType for Value {
    const KIND: FieldKind = FieldKind::Scalar;

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl FieldType for Vec<Value> {
    const KIND: FieldKind = FieldKind::Scalar;

    fn to_value(&self) -> Value {
        Value::List(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl FieldType for Oid {
    const KIND: FieldKind = FieldKind::Reference;

    fn to_value(&self) -> Value {
        Value::Ref(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_ref_oid().ok_or_else(|| mismatch("node", &value))
    }
}

impl FieldType for Vec<Oid> {
    const KIND: FieldKind = FieldKind::ReferenceList;

    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|oid| Value::Ref(*oid)).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items
                .iter()
                .map(|item| item.as_ref_oid().ok_or_else(|| mismatch("node list", item)))
                .collect(),
            other => Err(mismatch("node list", &other)),
        }
    }
}

/// What a field needs from its surroundings to load and heal.
pub struct FieldContext<'a> {
    pub oid: Oid,
    pub storage: &'a dyn Storage,
    /// True while the referenced oid names a live node.
    pub is_live: &'a (dyn Fn(Oid) -> bool + Sync),
}

#[derive(Debug, Clone)]
enum Slot<T> {
    Unloaded,
    Loaded(Option<T>),
}

/// A typed, validated, lazily loaded node field.
#[derive(Debug, Clone)]
pub struct Field<T: FieldType> {
    name: &'static str,
    slot: Slot<T>,
    uncached: bool,
    validator: Option<Validator<T>>,
}

impl<T: FieldType> Field<T> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Slot::Unloaded,
            uncached: false,
            validator: None,
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Validator<T>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn set_uncached(&mut self, uncached: bool) {
        self.uncached = uncached;
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.slot, Slot::Loaded(_))
    }

    /// The in-memory value, without touching the backend.
    pub fn peek(&self) -> Option<Option<&T>> {
        match &self.slot {
            Slot::Loaded(v) => Some(v.as_ref()),
            Slot::Unloaded => None,
        }
    }

    fn validate(&self, value: &T) -> Result<()> {
        match self.validator {
            Some(validator) => validator(value),
            None => Ok(()),
        }
    }

    fn from_stored(value: Value) -> Result<Option<T>> {
        if value.is_none() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }

    /// Install a constructor-supplied value. Nothing is queued until
    /// [`Field::commit`].
    pub fn prime(&mut self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.slot = Slot::Loaded(Some(value));
        Ok(())
    }

    /// Validate, queue a write and update the cache.
    ///
    /// An empty scalar is cached but never written.
    pub fn set(&mut self, value: Option<T>, journal: &mut Journal) -> Result<()> {
        if let Some(v) = &value {
            self.validate(v)?;
        }
        let stored = match (&value, T::KIND) {
            (Some(v), _) => Some(v.to_value()),
            (None, FieldKind::Scalar) => None,
            (None, _) => Some(Value::None),
        };
        if let Some(stored) = stored {
            journal.write(self.name, stored);
        }
        self.slot = if self.uncached {
            Slot::Unloaded
        } else {
            Slot::Loaded(value)
        };
        Ok(())
    }

    /// Queue the primed value, if any, for writing.
    pub fn commit(&mut self, journal: &mut Journal) -> Result<()> {
        match std::mem::replace(&mut self.slot, Slot::Unloaded) {
            Slot::Loaded(value) => self.set(value, journal),
            Slot::Unloaded => Ok(()),
        }
    }

    /// Install already-fetched data without touching the backend.
    pub fn preload(&mut self, data: &DataMap) -> Result<()> {
        if self.uncached {
            return Ok(());
        }
        if let Some(value) = data.get(self.name) {
            self.slot = Slot::Loaded(Self::from_stored(value.clone())?);
        }
        Ok(())
    }

    /// Current value, reading the backend on a cache miss.
    pub async fn get(
        &mut self,
        ctx: &FieldContext<'_>,
        journal: &mut Journal,
    ) -> Result<Option<T>> {
        let current = match &self.slot {
            Slot::Loaded(value) => value.clone(),
            Slot::Unloaded => match ctx.storage.read_data(ctx.oid, self.name).await? {
                Some(bytes) => Self::from_stored(decode_value(&bytes)?)?,
                None => None,
            },
        };
        let current = self.heal(current, ctx, journal)?;
        if !self.uncached {
            self.slot = Slot::Loaded(current.clone());
        }
        Ok(current)
    }

    fn heal(
        &mut self,
        current: Option<T>,
        ctx: &FieldContext<'_>,
        journal: &mut Journal,
    ) -> Result<Option<T>> {
        if T::KIND == FieldKind::Scalar {
            return Ok(current);
        }
        let Some(value) = current else {
            return Ok(None);
        };
        let mut stored = value.to_value();
        if !stored.prune_dangling(ctx.is_live) {
            return Ok(Some(value));
        }
        debug!(oid = %ctx.oid, field = self.name, "dropping dangling references");
        let healed = Self::from_stored(stored)?;
        self.set(healed.clone(), journal)?;
        Ok(healed)
    }
}

// =============================================================================
// DYNAMIC ACCESS
// =============================================================================

/// Object-safe view of a [`Field<T>`], addressed by name through
/// [`Value`]s.
#[async_trait]
pub trait StoredField: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> FieldKind;

    fn peek_value(&self) -> Option<Value>;

    fn set_value(&mut self, value: Value, journal: &mut Journal) -> Result<()>;

    fn prime_value(&mut self, value: Value) -> Result<()>;

    fn commit(&mut self, journal: &mut Journal) -> Result<()>;

    fn preload(&mut self, data: &DataMap) -> Result<()>;

    async fn get_value<'a>(
        &mut self,
        ctx: &FieldContext<'a>,
        journal: &mut Journal,
    ) -> Result<Value>;
}

#[async_trait]
impl<T: FieldType> StoredField for Field<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> FieldKind {
        T::KIND
    }

    fn peek_value(&self) -> Option<Value> {
        self.peek()
            .map(|v| v.map(T::to_value).unwrap_or(Value::None))
    }

    fn set_value(&mut self, value: Value, journal: &mut Journal) -> Result<()> {
        let typed = Self::from_stored(value)?;
        self.set(typed, journal)
    }

    fn prime_value(&mut self, value: Value) -> Result<()> {
        match Self::from_stored(value)? {
            Some(typed) => self.prime(typed),
            None => {
                self.slot = Slot::Loaded(None);
                Ok(())
            }
        }
    }

    fn commit(&mut self, journal: &mut Journal) -> Result<()> {
        Field::commit(self, journal)
    }

    fn preload(&mut self, data: &DataMap) -> Result<()> {
        Field::preload(self, data)
    }

    async fn get_value<'a>(
        &mut self,
        ctx: &FieldContext<'a>,
        journal: &mut Journal,
    ) -> Result<Value> {
        Ok(self
            .get(ctx, journal)
            .await?
            .map(|v| v.to_value())
            .unwrap_or(Value::None))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::formats::encode_value;
    use crate::journal::StorageAction;
    use crate::storage::MemoryStorage;

    fn positive(value: &i64) -> Result<()> {
        if *value < 0 {
            return Err(SiptrackError::InvalidData("negative".into()));
        }
        Ok(())
    }

    fn all_live(_: Oid) -> bool {
        true
    }

    #[test]
    fn set_validates_before_queueing() {
        let mut field = Field::<i64>::new("count").with_validator(positive);
        let mut journal = Journal::new();

        assert!(field.set(Some(-1), &mut journal).is_err());
        assert!(journal.is_empty());
        assert!(!field.is_loaded());

        field.set(Some(4), &mut journal).expect("set");
        assert_eq!(field.peek(), Some(Some(&4)));
        assert_eq!(
            journal.actions(),
            &[StorageAction::WriteData {
                name: "count".into(),
                value: Value::Int(4)
            }]
        );
    }

    #[test]
    fn empty_scalar_is_not_written_but_empty_reference_is() {
        let mut journal = Journal::new();
        let mut text = Field::<String>::new("name");
        text.set(None, &mut journal).expect("set");
        assert!(journal.is_empty());

        let mut node = Field::<Oid>::new("user_manager");
        node.set(None, &mut journal).expect("set");
        assert_eq!(journal.actions().len(), 1);
    }

    #[test]
    fn dynamic_set_rejects_wrong_type() {
        let mut field = Field::<bool>::new("recursive");
        let mut journal = Journal::new();
        let err = field
            .set_value(Value::from("yes"), &mut journal)
            .expect_err("type mismatch");
        assert!(matches!(err, SiptrackError::InvalidData(_)));
        assert!(journal.is_empty());
    }

    #[test]
    fn preload_skips_uncached_fields() {
        let mut data = DataMap::new();
        data.insert("value".into(), Value::Binary(vec![1, 2]));

        let mut cached = Field::<Value>::new("value");
        cached.preload(&data).expect("preload");
        assert!(cached.is_loaded());

        let mut uncached = Field::<Value>::new("value");
        uncached.set_uncached(true);
        uncached.preload(&data).expect("preload");
        assert!(!uncached.is_loaded());
    }

    #[tokio::test]
    async fn get_reads_backend_once_then_caches() {
        let storage = MemoryStorage::new();
        storage
            .write_data(Oid(5), "name", &encode_value(&Value::from("sw1")).expect("encode"))
            .await
            .expect("write");
        let ctx = FieldContext {
            oid: Oid(5),
            storage: &storage,
            is_live: &all_live,
        };
        let mut journal = Journal::new();
        let mut field = Field::<String>::new("name");

        assert_eq!(
            field.get(&ctx, &mut journal).await.expect("get"),
            Some("sw1".to_string())
        );
        assert!(field.is_loaded());
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn missing_backend_value_reads_as_none() {
        let storage = MemoryStorage::new();
        let ctx = FieldContext {
            oid: Oid(1),
            storage: &storage,
            is_live: &all_live,
        };
        let mut journal = Journal::new();
        let mut field = Field::<bool>::new("recursive");
        assert_eq!(field.get(&ctx, &mut journal).await.expect("get"), None);
    }

    #[tokio::test]
    async fn uncached_field_rereads_backend() {
        let storage = MemoryStorage::new();
        let ctx = FieldContext {
            oid: Oid(1),
            storage: &storage,
            is_live: &all_live,
        };
        let mut journal = Journal::new();
        let mut field = Field::<Value>::new("value");
        field.set_uncached(true);

        field
            .set(Some(Value::Binary(vec![9; 4])), &mut journal)
            .expect("set");
        assert!(!field.is_loaded());
        // Not committed yet, so the backend has nothing.
        assert_eq!(field.get(&ctx, &mut journal).await.expect("get"), None);
    }

    #[tokio::test]
    async fn reference_list_heals_and_writes_back() {
        let storage = MemoryStorage::new();
        let dead = |oid: Oid| oid != Oid(2);
        let ctx = FieldContext {
            oid: Oid(9),
            storage: &storage,
            is_live: &dead,
        };
        let mut journal = Journal::new();
        let mut field = Field::<Vec<Oid>>::new("users");
        field.prime(vec![Oid(1), Oid(2), Oid(3)]).expect("prime");

        let value = field.get(&ctx, &mut journal).await.expect("get");
        assert_eq!(value, Some(vec![Oid(1), Oid(3)]));
        assert_eq!(
            journal.actions(),
            &[StorageAction::WriteData {
                name: "users".into(),
                value: Value::List(vec![Value::Ref(Oid(1)), Value::Ref(Oid(3))])
            }]
        );

        // Already healed: a second access queues nothing new.
        field.get(&ctx, &mut journal).await.expect("get");
        assert_eq!(journal.actions().len(), 1);
    }

    #[tokio::test]
    async fn single_reference_heals_to_none() {
        let storage = MemoryStorage::new();
        let nothing_live = |_: Oid| false;
        let ctx = FieldContext {
            oid: Oid(0),
            storage: &storage,
            is_live: &nothing_live,
        };
        let mut journal = Journal::new();
        let mut field = Field::<Oid>::new("user_manager");
        field.prime(Oid(4)).expect("prime");

        assert_eq!(field.get(&ctx, &mut journal).await.expect("get"), None);
        assert_eq!(
            journal.actions(),
            &[StorageAction::WriteData {
                name: "user_manager".into(),
                value: Value::None
            }]
        );
    }
}
