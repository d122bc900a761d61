//! Per-source object slots kept in lock-step with the columns.
//!
//! Rows of an aligned feature table carry one optional object per raw data
//! source, for example the feature detected in each input file. Those slots
//! are not attributes: the set of sources is fixed when the table is built,
//! and every source gets a dense slot array that grows together with the
//! schema's columns.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use crate::columnar::buffer::ObjectBuffer;
use crate::columnar::column::{Column, ConcurrentColumn};
use crate::columnar::row::Row;
use crate::columnar::schema::{Schema, SchemaExtension, SchemaOptions};
use crate::error::{Error, Result};

/// Schema with one feature slot per source and row.
pub type MultiFileSchema<S, F> = Schema<FeatureSlots<S, F>>;

/// Row of a [`MultiFileSchema`].
pub type MultiFileRow<S, F> = Row<FeatureSlots<S, F>>;

/// One slot array per known source.
pub struct FeatureSlots<S, F: Clone + Send + Sync + 'static> {
    sources: Vec<S>,
    positions: FxHashMap<S, usize>,
    slots: Vec<ConcurrentColumn<ObjectBuffer<F>>>,
    len: AtomicUsize,
}

impl<S, F> FeatureSlots<S, F>
where
    S: Clone + Eq + Hash + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    /// Empty slot arrays for `sources`. Duplicate sources are rejected.
    pub fn new<I>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
    {
        let sources: Vec<S> = sources.into_iter().collect();
        let mut positions = FxHashMap::default();
        for (position, source) in sources.iter().enumerate() {
            if positions.insert(source.clone(), position).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "Source at position {} is listed more than once",
                    position
                )));
            }
        }

        let slots = sources
            .iter()
            .map(|_| ConcurrentColumn::new(ObjectBuffer::new(0)))
            .collect();

        Ok(FeatureSlots {
            sources,
            positions,
            slots,
            len: AtomicUsize::new(0),
        })
    }

    #[inline]
    fn slot(&self, source: &S) -> Option<&ConcurrentColumn<ObjectBuffer<F>>> {
        self.positions.get(source).map(|&position| &self.slots[position])
    }

    /// Sources in construction order.
    pub fn sources(&self) -> &[S] {
        &self.sources
    }

    /// Whether `source` has a slot array.
    pub fn has_source(&self, source: &S) -> bool {
        self.positions.contains_key(source)
    }

    /// Length of every slot array.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether the slot arrays have no room yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize, source: &S) -> Option<F> {
        self.slot(source).and_then(|slot| slot.get(index))
    }

    fn set(&self, index: usize, source: &S, feature: Option<F>) -> Option<F> {
        self.slot(source).and_then(|slot| slot.set(index, feature))
    }
}

impl<S, F> SchemaExtension for FeatureSlots<S, F>
where
    S: Clone + Eq + Hash + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    fn grow_to(&self, rows: usize) -> Result<()> {
        for slot in &self.slots {
            slot.resize_to(rows)?;
        }
        self.len.fetch_max(rows, Ordering::AcqRel);
        log::debug!("grew {} feature slot arrays to {} rows", self.slots.len(), rows);
        Ok(())
    }

    fn reclaim_retired(&mut self) -> usize {
        self.slots.iter_mut().map(|slot| slot.reclaim_retired()).sum()
    }
}

impl<S, F: Clone + Send + Sync + 'static> fmt::Debug for FeatureSlots<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureSlots")
            .field("sources", &self.sources.len())
            .field("len", &self.len.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S, F> Schema<FeatureSlots<S, F>>
where
    S: Clone + Eq + Hash + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    /// Create a schema with a feature slot per row for each of `sources`.
    pub fn multi_file<I>(sources: I, options: SchemaOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
    {
        Schema::with_extension(options, FeatureSlots::new(sources)?)
    }

    /// Feature of `source` in row `index`. `None` if unset or if the source
    /// is unknown.
    #[inline]
    pub fn get_feature(&self, index: usize, source: &S) -> Option<F> {
        self.extension().get(index, source)
    }

    /// Store the feature of `source` in row `index`, returning the previous
    /// one. An unknown source is ignored and yields `None`.
    #[inline]
    pub fn set_feature(&self, index: usize, source: &S, feature: impl Into<Option<F>>) -> Option<F> {
        self.extension().set(index, source, feature.into())
    }

    /// Features of row `index` for every source that has one, in source
    /// order.
    pub fn stream_features(&self, index: usize) -> impl Iterator<Item = (&S, F)> + '_ {
        let slots = self.extension();
        slots
            .sources
            .iter()
            .zip(slots.slots.iter())
            .filter_map(move |(source, slot)| slot.get(index).map(|feature| (source, feature)))
    }

    /// Known sources in construction order.
    pub fn sources(&self) -> &[S] {
        self.extension().sources()
    }

    /// Whether `source` is known.
    pub fn has_source(&self, source: &S) -> bool {
        self.extension().has_source(source)
    }

    /// Length of the slot array of `source`, `None` for an unknown source.
    pub fn feature_slots_len(&self, source: &S) -> Option<usize> {
        if self.has_source(source) {
            Some(self.extension().len())
        } else {
            None
        }
    }
}

impl<S, F> Row<FeatureSlots<S, F>>
where
    S: Clone + Eq + Hash + Send + Sync + 'static,
    F: Clone + Send + Sync + 'static,
{
    /// Feature of `source` in this row.
    pub fn get_feature(&self, source: &S) -> Option<F> {
        self.schema().get_feature(self.index(), source)
    }

    /// Store the feature of `source` in this row, returning the previous one.
    pub fn set_feature(&self, source: &S, feature: impl Into<Option<F>>) -> Option<F> {
        self.schema().set_feature(self.index(), source, feature)
    }

    /// Every feature of this row, in source order.
    pub fn features(&self) -> Vec<(S, F)> {
        self.schema()
            .stream_features(self.index())
            .map(|(source, feature)| (source.clone(), feature))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type Table = MultiFileSchema<String, Arc<str>>;

    fn feature(name: &str) -> Arc<str> {
        Arc::from(name)
    }

    fn table(sources: &[&str], capacity: usize, increment: usize) -> Arc<Table> {
        let options = SchemaOptions::new()
            .initial_capacity(capacity)
            .increment(increment);
        Arc::new(Schema::multi_file(sources.iter().map(|s| s.to_string()), options).unwrap())
    }

    #[test]
    fn slot_arrays_start_at_initial_capacity() {
        let table = table(&["a.mzML", "b.mzML"], 6, 6);
        assert_eq!(table.sources().len(), 2);
        assert_eq!(table.feature_slots_len(&"a.mzML".to_string()), Some(6));
        assert_eq!(table.feature_slots_len(&"c.mzML".to_string()), None);
        assert!(table.extension().slots.iter().all(|slot| slot.capacity() >= 6));
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let result = Table::multi_file(vec!["a".to_string(), "a".to_string()], SchemaOptions::new());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn unknown_sources_are_ignored() {
        let table = table(&["a"], 2, 2);
        let ghost = "ghost".to_string();
        assert_eq!(table.set_feature(0, &ghost, feature("f")), None);
        assert_eq!(table.get_feature(0, &ghost), None);
        assert!(!table.has_source(&ghost));
    }

    #[test]
    fn row_features_follow_source_order() {
        let table = table(&["a", "b", "c"], 2, 2);
        let row = Row::new(&table).unwrap();
        let (a, c) = ("a".to_string(), "c".to_string());
        row.set_feature(&c, feature("peak-c"));
        row.set_feature(&a, feature("peak-a"));

        let features: Vec<_> = row
            .features()
            .into_iter()
            .map(|(source, feature)| format!("{}={}", source, feature))
            .collect();
        assert_eq!(features, vec!["a=peak-a", "c=peak-c"]);
        assert_eq!(row.set_feature(&a, None).as_deref(), Some("peak-a"));
        assert_eq!(row.get_feature(&a), None);
    }

    #[test]
    fn reclaim_covers_slot_arrays() {
        let mut table: Table = Schema::multi_file(
            vec!["a".to_string(), "b".to_string()],
            SchemaOptions::new().initial_capacity(2).increment(2),
        )
        .unwrap();
        let a = "a".to_string();
        table.set_feature(1, &a, feature("kept"));
        table.resize_columns_to(3).unwrap();
        table.resize_columns_to(9).unwrap();

        // initial grow_to(2) from empty plus two growths, per source
        assert_eq!(table.reclaim_retired(), 6);
        assert_eq!(table.reclaim_retired(), 0);
        assert_eq!(table.get_feature(1, &a).as_deref(), Some("kept"));
    }
}
