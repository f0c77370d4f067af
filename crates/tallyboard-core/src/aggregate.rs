//! Time-bucketed aggregation of the consumption log.
//!
//! Two modes share one bucketing rule, `key = floor(t / bucket_width)`:
//!
//! - **Windowed**: a dense series of exactly `buckets` entries ending with
//!   the bucket that contains `now`. Empty minutes are present with no
//!   counts so charts render zero-filled gaps.
//! - **Historical**: the same rule over the whole log, used for the
//!   running cumulative totals and the history endpoint.
//!
//! Every function here is a pure function of an [`EventStore`] and a
//! caller-supplied `now`; insertion order of the log never matters.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tallyboard_types::{Bucket, ConsumptionRecord, DashboardStats, HistorySeries, WindowedStats};

use crate::store::EventStore;

/// Upper bound on buckets in a history series (one week of minutes).
///
/// A record stamped by a badly skewed client clock would otherwise
/// stretch the dense series back to that instant.
pub const MAX_HISTORY_BUCKETS: u32 = 10_080;

/// Bucket width and window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    bucket: TimeDelta,
    buckets: u32,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::new(TimeDelta::minutes(1), 60)
    }
}

impl WindowSpec {
    /// A window of `buckets` buckets, each `bucket` wide.
    pub const fn new(bucket: TimeDelta, buckets: u32) -> Self {
        Self { bucket, buckets }
    }

    /// Number of buckets in the window.
    pub const fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Width of one bucket.
    pub const fn bucket_width(&self) -> TimeDelta {
        self.bucket
    }

    fn bucket_millis(&self) -> i64 {
        self.bucket.num_milliseconds().max(1)
    }

    /// Bucket key of an instant. Boundaries resolve by floor division, so
    /// an instant exactly on a boundary opens the later bucket.
    pub fn bucket_key(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp_millis().div_euclid(self.bucket_millis())
    }

    /// Inclusive start of the bucket with the given key.
    pub fn bucket_start(&self, key: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(key.saturating_mul(self.bucket_millis()))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// First and last bucket keys of the window ending at `now`.
    pub fn window_keys(&self, now: DateTime<Utc>) -> (i64, i64) {
        let last = self.bucket_key(now);
        let span = i64::from(self.buckets.saturating_sub(1));
        (last.saturating_sub(span), last)
    }
}

/// Per-item totals of everything strictly before a cutoff bucket.
///
/// Recomputed on a timer because it scans the whole log; between
/// recomputations [`dashboard_stats`] adds whatever lies between the
/// cutoff and `now`, so cumulative totals stay exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    cutoff_key: i64,
    totals: BTreeMap<String, u64>,
    computed_at: DateTime<Utc>,
}

impl Baseline {
    /// A baseline that covers nothing; every record counts as "after" it.
    pub fn empty() -> Self {
        Self {
            cutoff_key: i64::MIN,
            totals: BTreeMap::new(),
            computed_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Per-item totals before the cutoff.
    pub const fn totals(&self) -> &BTreeMap<String, u64> {
        &self.totals
    }

    /// When this baseline was computed.
    pub const fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Count a record committed after this baseline was computed.
    ///
    /// Only back-dated records that fall before the cutoff change
    /// anything; later ones are picked up by [`dashboard_stats`].
    pub fn absorb(&mut self, spec: &WindowSpec, record: &ConsumptionRecord) {
        if spec.bucket_key(record.occurred_at) < self.cutoff_key {
            bump(&mut self.totals, &record.item_name);
        }
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self::empty()
    }
}

/// Trailing-window view ending at `now`.
pub fn windowed_stats(store: &EventStore, now: DateTime<Utc>, spec: &WindowSpec) -> WindowedStats {
    tally(store, now, spec, i64::MAX).0
}

/// Totals of every record before the current window.
pub fn compute_baseline(store: &EventStore, now: DateTime<Utc>, spec: &WindowSpec) -> Baseline {
    let (first, _) = spec.window_keys(now);
    let mut totals = BTreeMap::new();
    for record in store.consumptions() {
        if spec.bucket_key(record.occurred_at) < first {
            bump(&mut totals, &record.item_name);
        }
    }
    Baseline {
        cutoff_key: first,
        totals,
        computed_at: now,
    }
}

/// The full `stats` payload: windowed view plus exact cumulative totals.
pub fn dashboard_stats(
    store: &EventStore,
    now: DateTime<Utc>,
    spec: &WindowSpec,
    baseline: &Baseline,
) -> DashboardStats {
    let (window, after_cutoff) = tally(store, now, spec, baseline.cutoff_key);

    let mut window_totals: BTreeMap<String, u64> = BTreeMap::new();
    for bucket in &window.buckets {
        for (name, count) in &bucket.counts {
            add(&mut window_totals, name, *count);
        }
    }

    let mut totals = baseline.totals.clone();
    for (name, count) in after_cutoff {
        add(&mut totals, &name, count);
    }
    let total_consumed = totals.values().fold(0_u64, |acc, n| acc.saturating_add(*n));

    DashboardStats {
        generated_at: now,
        window,
        window_totals,
        totals,
        total_consumed,
        items: store.items().to_vec(),
    }
}

/// Historical aggregation over the whole log, dense from the earliest
/// record's bucket (capped at [`MAX_HISTORY_BUCKETS`]) to `now`.
pub fn history(store: &EventStore, now: DateTime<Utc>, spec: &WindowSpec) -> HistorySeries {
    let last = spec.bucket_key(now);
    let earliest = store
        .consumptions()
        .iter()
        .map(|r| spec.bucket_key(r.occurred_at))
        .filter(|key| *key <= last)
        .min();

    let Some(earliest) = earliest else {
        return HistorySeries {
            buckets: Vec::new(),
            totals: BTreeMap::new(),
        };
    };
    let first = earliest.max(last.saturating_sub(i64::from(MAX_HISTORY_BUCKETS.saturating_sub(1))));

    let mut buckets = dense_buckets(spec, first, last);
    let mut totals = BTreeMap::new();
    for record in store.consumptions() {
        let key = spec.bucket_key(record.occurred_at);
        if key > last {
            continue;
        }
        bump(&mut totals, &record.item_name);
        if let Some(bucket) = slot(&mut buckets, first, key) {
            bump(&mut bucket.counts, &record.item_name);
        }
    }
    HistorySeries { buckets, totals }
}

/// Single pass over both logs: fills the window and counts records at or
/// after `cutoff_key` (up to `now`'s bucket) per item.
fn tally(
    store: &EventStore,
    now: DateTime<Utc>,
    spec: &WindowSpec,
    cutoff_key: i64,
) -> (WindowedStats, BTreeMap<String, u64>) {
    let (first, last) = spec.window_keys(now);
    let mut buckets = dense_buckets(spec, first, last);
    let mut after_cutoff = BTreeMap::new();

    for record in store.consumptions() {
        let key = spec.bucket_key(record.occurred_at);
        if key > last {
            continue;
        }
        if key >= cutoff_key {
            bump(&mut after_cutoff, &record.item_name);
        }
        if let Some(bucket) = slot(&mut buckets, first, key) {
            bump(&mut bucket.counts, &record.item_name);
        }
    }

    let mut recent_markers: Vec<_> = store
        .markers()
        .iter()
        .filter(|m| {
            let key = spec.bucket_key(m.occurred_at);
            key >= first && key <= last
        })
        .cloned()
        .collect();
    recent_markers.sort_by_key(|m| m.occurred_at);

    (
        WindowedStats {
            buckets,
            recent_markers,
        },
        after_cutoff,
    )
}

fn dense_buckets(spec: &WindowSpec, first: i64, last: i64) -> Vec<Bucket> {
    (first..=last)
        .map(|key| Bucket {
            start: spec.bucket_start(key),
            counts: BTreeMap::new(),
        })
        .collect()
}

fn slot(buckets: &mut [Bucket], first: i64, key: i64) -> Option<&mut Bucket> {
    let offset = usize::try_from(key.checked_sub(first)?).ok()?;
    buckets.get_mut(offset)
}

fn bump(counts: &mut BTreeMap<String, u64>, name: &str) {
    add(counts, name, 1);
}

fn add(counts: &mut BTreeMap<String, u64>, name: &str, n: u64) {
    let entry = counts.entry(name.to_owned()).or_insert(0);
    *entry = entry.saturating_add(n);
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::store::{Mutation, NewConsumption, NewItem, NewMarker};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn store_with(records: &[(&str, &str)]) -> EventStore {
        let mut store = EventStore::new();
        for name in ["Beer", "Wine"] {
            store
                .apply(
                    Mutation::AddItem(NewItem {
                        name: name.to_owned(),
                        emoji: None,
                        image_ref: None,
                        color: None,
                    }),
                    Utc::now(),
                )
                .unwrap();
        }
        for (item, when) in records {
            store
                .apply(
                    Mutation::AddConsumption(NewConsumption {
                        item_name: (*item).to_owned(),
                        participant_id: None,
                        occurred_at: Some(at(when)),
                    }),
                    Utc::now(),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn window_is_dense_even_when_empty() {
        let store = EventStore::new();
        let now = at("2026-03-01T21:30:15Z");
        let stats = windowed_stats(&store, now, &WindowSpec::default());
        assert_eq!(stats.buckets.len(), 60);
        assert!(stats.buckets.iter().all(|b| b.counts.is_empty()));
        assert_eq!(stats.buckets[59].start, at("2026-03-01T21:30:00Z"));
        assert_eq!(stats.buckets[0].start, at("2026-03-01T20:31:00Z"));
        assert!(stats.buckets.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn records_land_in_their_minute_regardless_of_insert_order() {
        let store = store_with(&[
            ("Beer", "2026-03-01T21:29:59Z"),
            ("Beer", "2026-03-01T21:10:00Z"),
            ("Wine", "2026-03-01T21:29:00Z"),
        ]);
        let now = at("2026-03-01T21:30:15Z");
        let stats = windowed_stats(&store, now, &WindowSpec::default());
        assert_eq!(stats.buckets[58].counts.get("Beer"), Some(&1));
        assert_eq!(stats.buckets[58].counts.get("Wine"), Some(&1));
        assert_eq!(stats.buckets[39].counts.get("Beer"), Some(&1));
        let total: u64 = stats.buckets.iter().map(Bucket::total).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn boundary_instant_opens_the_later_bucket() {
        let store = store_with(&[("Beer", "2026-03-01T21:29:00Z")]);
        let now = at("2026-03-01T21:30:00Z");
        let stats = windowed_stats(&store, now, &WindowSpec::default());
        assert_eq!(stats.buckets[58].start, at("2026-03-01T21:29:00Z"));
        assert_eq!(stats.buckets[58].counts.get("Beer"), Some(&1));
    }

    #[test]
    fn out_of_window_records_are_excluded() {
        let store = store_with(&[
            ("Beer", "2026-03-01T20:30:59Z"),
            ("Beer", "2026-03-01T21:31:00Z"),
            ("Beer", "2026-03-01T20:31:00Z"),
        ]);
        let now = at("2026-03-01T21:30:15Z");
        let stats = windowed_stats(&store, now, &WindowSpec::default());
        let total: u64 = stats.buckets.iter().map(Bucket::total).sum();
        assert_eq!(total, 1);
        assert_eq!(stats.buckets[0].counts.get("Beer"), Some(&1));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let store = store_with(&[("Beer", "2026-03-01T21:00:00Z")]);
        let now = at("2026-03-01T21:30:15Z");
        let spec = WindowSpec::default();
        assert_eq!(
            windowed_stats(&store, now, &spec),
            windowed_stats(&store, now, &spec)
        );
    }

    #[test]
    fn markers_in_window_are_sorted() {
        let mut store = EventStore::new();
        for (label, when) in [
            ("late", "2026-03-01T21:20:00Z"),
            ("early", "2026-03-01T21:00:00Z"),
            ("stale", "2026-03-01T19:00:00Z"),
        ] {
            store
                .apply(
                    Mutation::AddMarker(NewMarker {
                        label: label.to_owned(),
                        color: None,
                        occurred_at: Some(at(when)),
                    }),
                    Utc::now(),
                )
                .unwrap();
        }
        let stats = windowed_stats(&store, at("2026-03-01T21:30:00Z"), &WindowSpec::default());
        let labels: Vec<_> = stats.recent_markers.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, ["early", "late"]);
    }

    #[test]
    fn cumulative_totals_stay_exact_with_a_stale_baseline() {
        let store = store_with(&[
            ("Beer", "2026-03-01T18:00:00Z"),
            ("Beer", "2026-03-01T20:45:00Z"),
            ("Wine", "2026-03-01T21:29:00Z"),
        ]);
        let spec = WindowSpec::default();
        let baseline = compute_baseline(&store, at("2026-03-01T21:00:00Z"), &spec);
        assert_eq!(baseline.totals().get("Beer"), Some(&1));

        // Twenty minutes later the 20:45 record has slid out of the window
        // but is not yet in the baseline.
        let stats = dashboard_stats(&store, at("2026-03-01T21:50:00Z"), &spec, &baseline);
        assert_eq!(stats.totals.get("Beer"), Some(&2));
        assert_eq!(stats.totals.get("Wine"), Some(&1));
        assert_eq!(stats.total_consumed, 3);
        assert_eq!(stats.window_totals.get("Beer"), None);
        assert_eq!(stats.window_totals.get("Wine"), Some(&1));
    }

    #[test]
    fn back_dated_record_is_absorbed_into_the_baseline() {
        let mut store = store_with(&[("Beer", "2026-03-01T18:00:00Z")]);
        let spec = WindowSpec::default();
        let now = at("2026-03-01T21:30:00Z");
        let mut baseline = compute_baseline(&store, now, &spec);

        let late = NewConsumption {
            item_name: "Wine".to_owned(),
            participant_id: None,
            occurred_at: Some(at("2026-03-01T12:00:00Z")),
        };
        let Ok(crate::store::Applied::ConsumptionAdded(record)) =
            store.apply(Mutation::AddConsumption(late), now)
        else {
            panic!("consumption rejected");
        };
        baseline.absorb(&spec, &record);

        assert_eq!(baseline, compute_baseline(&store, now, &spec));
        let stats = dashboard_stats(&store, now, &spec, &baseline);
        assert_eq!(stats.totals.get("Wine"), Some(&1));
        assert_eq!(stats.total_consumed, 2);
    }

    #[test]
    fn empty_baseline_counts_everything() {
        let store = store_with(&[
            ("Beer", "2026-03-01T10:00:00Z"),
            ("Beer", "2026-03-01T21:00:00Z"),
        ]);
        let stats = dashboard_stats(
            &store,
            at("2026-03-01T21:30:00Z"),
            &WindowSpec::default(),
            &Baseline::empty(),
        );
        assert_eq!(stats.totals.get("Beer"), Some(&2));
        assert_eq!(stats.window_totals.get("Beer"), Some(&1));
        assert_eq!(stats.items.len(), 2);
    }

    #[test]
    fn history_is_dense_from_first_record() {
        let store = store_with(&[
            ("Beer", "2026-03-01T21:25:30Z"),
            ("Wine", "2026-03-01T21:20:10Z"),
        ]);
        let series = history(&store, at("2026-03-01T21:30:00Z"), &WindowSpec::default());
        assert_eq!(series.buckets.len(), 11);
        assert_eq!(series.buckets[0].start, at("2026-03-01T21:20:00Z"));
        assert_eq!(series.buckets[0].counts.get("Wine"), Some(&1));
        assert_eq!(series.buckets[5].counts.get("Beer"), Some(&1));
        assert_eq!(series.totals.len(), 2);
    }

    #[test]
    fn history_of_empty_log_is_empty() {
        let series = history(&EventStore::new(), Utc::now(), &WindowSpec::default());
        assert!(series.buckets.is_empty());
        assert!(series.totals.is_empty());
    }

    #[test]
    fn custom_bucket_width() {
        let spec = WindowSpec::new(TimeDelta::seconds(300), 12);
        let (first, last) = spec.window_keys(at("2026-03-01T21:07:00Z"));
        assert_eq!(last - first, 11);
        assert_eq!(spec.bucket_start(last), at("2026-03-01T21:05:00Z"));
    }
}
