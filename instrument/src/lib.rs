//! Event panels for frame simulations.
//!
//! The simulation logs structured `tracing` events (one per period, birth batch,
//! frame evaluation and aggregate update). `PanelSubscriber` files each event into
//! the table named by its target and grows columns as new fields show up, so the
//! schema follows whatever the simulation emits.
//!
//! # Usage
//!
//! ```ignore
//! // In simulation code:
//! tracing::info!(target: "aggregate", period, variable = "PlvlAgg", value);
//!
//! // In a test:
//! tracing::subscriber::with_default(instrument::PanelSubscriber, || sim.run(10));
//! let recorder = instrument::drain();
//! let levels = recorder.table("aggregate").and_then(|t| t.f64("value"));
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;

use polars::prelude::*;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Metadata, Subscriber};

/// One typed column of an event table.
#[derive(Debug, Clone, PartialEq)]
pub enum EventColumn {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl EventColumn {
    pub fn len(&self) -> usize {
        match self {
            EventColumn::U64(v) => v.len(),
            EventColumn::I64(v) => v.len(),
            EventColumn::F64(v) => v.len(),
            EventColumn::Bool(v) => v.len(),
            EventColumn::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill missing rows with the column's zero value up to `rows`.
    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            EventColumn::U64(v) => v.resize(rows, 0),
            EventColumn::I64(v) => v.resize(rows, 0),
            EventColumn::F64(v) => v.resize(rows, 0.0),
            EventColumn::Bool(v) => v.resize(rows, false),
            EventColumn::Str(v) => v.resize(rows, String::new()),
        }
    }
}

/// Rows of events that share a `tracing` target.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    pub columns: BTreeMap<String, EventColumn>,
    pub rows: usize,
}

impl EventTable {
    fn align(&mut self) {
        let rows = self.rows;
        for column in self.columns.values_mut() {
            column.pad_to(rows);
        }
    }

    pub fn column(&self, name: &str) -> Option<&EventColumn> {
        self.columns.get(name)
    }

    pub fn f64(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            EventColumn::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn u64(&self, name: &str) -> Option<&[u64]> {
        match self.columns.get(name)? {
            EventColumn::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn str(&self, name: &str) -> Option<&[String]> {
        match self.columns.get(name)? {
            EventColumn::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to a polars DataFrame, one series per column.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| match column {
                EventColumn::U64(v) => Column::new(name.into(), v),
                EventColumn::I64(v) => Column::new(name.into(), v),
                EventColumn::F64(v) => Column::new(name.into(), v),
                EventColumn::Bool(v) => Column::new(name.into(), v),
                EventColumn::Str(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

/// Event tables keyed by target.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: BTreeMap<String, EventTable>,
}

impl Recorder {
    pub fn table(&self, target: &str) -> Option<&EventTable> {
        self.tables.get(target)
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

/// Appends the fields of one event to the current row of a table.
struct RowVisitor<'a> {
    table: &'a mut EventTable,
}

impl RowVisitor<'_> {
    /// Column for `field`, created and back-filled for earlier rows if new.
    fn column(&mut self, field: &Field, empty: fn(usize) -> EventColumn) -> &mut EventColumn {
        let rows = self.table.rows;
        self.table
            .columns
            .entry(field.name().to_string())
            .or_insert_with(|| empty(rows))
    }
}

impl Visit for RowVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if let EventColumn::U64(v) = self.column(field, |n| EventColumn::U64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if let EventColumn::I64(v) = self.column(field, |n| EventColumn::I64(vec![0; n])) {
            v.push(value);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let EventColumn::F64(v) = self.column(field, |n| EventColumn::F64(vec![0.0; n])) {
            v.push(value);
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if let EventColumn::Bool(v) = self.column(field, |n| EventColumn::Bool(vec![false; n])) {
            v.push(value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if let EventColumn::Str(v) =
            self.column(field, |n| EventColumn::Str(vec![String::new(); n]))
        {
            v.push(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{:?}", value));
    }
}

/// Subscriber that files info-level events into per-target tables.
pub struct PanelSubscriber;

impl Subscriber for PanelSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= tracing::Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target().to_string();
        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target).or_default();
            table.align();
            event.record(&mut RowVisitor { table: &mut *table });
            table.rows += 1;
            table.align();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Take everything recorded on this thread.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

/// Drop everything recorded on this thread.
pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

/// Mean, min, max and count of `value` per distinct `key`, sorted by key.
pub fn summarize_by(df: &DataFrame, key: &str, value: &str) -> PolarsResult<DataFrame> {
    df.clone()
        .lazy()
        .group_by([col(key)])
        .agg([
            col(value).mean().alias("mean"),
            col(value).min().alias("min"),
            col(value).max().alias("max"),
            col(value).count().alias("n"),
        ])
        .sort([key], SortMultipleOptions::default())
        .collect()
}
