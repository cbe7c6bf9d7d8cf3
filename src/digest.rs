//! Groups canonical records by caller and host and summarizes each group.

use std::collections::HashMap;

use crate::config::SamplingRate;
use crate::records::CanonicalQueryRecord;

/// Statistics of all queries made by one caller from one host.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub query: String,
    pub original_query: String,
    pub method: String,
    pub dbname: String,
    pub source_host: String,
    pub count: usize,
    pub percentage: String,
    pub time_sum: f64,
    pub time_median: f64,
    pub rows_sum: u64,
    pub rows_median: f64,
    /// Whether any query of the group went to the master; `None` when the
    /// log source does not say.
    pub from_master: Option<bool>,
    /// Sampling rate of the log stream the group was read from.
    pub sampling: SamplingRate,
}

/// Transactions, status checks and binlog markers are not worth reporting.
pub fn filter_query(record: &CanonicalQueryRecord) -> bool {
    let query = &record.query;

    !query.contains("BEGIN")
        && !query.contains("COMMIT")
        && !query.starts_with("SHOW")
        && !query.starts_with("Important table write")
}

/// Middle value of the list, or the mean of the two middle values.
///
/// Returns 0 for an empty list.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[middle]
    } else {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    }
}

#[derive(Debug)]
struct Group {
    first: CanonicalQueryRecord,
    times: Vec<f64>,
    rows: Vec<u64>,
    master_hits: usize,
}

/// Accumulates records one at a time.
///
/// Groups are keyed by `(method, source_host)` and keep the order in which
/// they were first seen.
#[derive(Debug, Default)]
pub struct Digest {
    groups: Vec<Group>,
    index: HashMap<(String, String), usize>,
    total: usize,
    filtered: usize,
}

impl Digest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, returns `false` when [`filter_query`] dropped it.
    pub fn push(&mut self, record: CanonicalQueryRecord) -> bool {
        if !filter_query(&record) {
            self.filtered += 1;
            return false;
        }

        self.total += 1;

        let key = (record.method.clone(), record.source_host.clone());
        let position = match self.index.get(&key) {
            Some(position) => *position,
            None => {
                self.index.insert(key, self.groups.len());
                self.groups.push(Group {
                    first: record.clone(),
                    times: Vec::new(),
                    rows: Vec::new(),
                    master_hits: 0,
                });
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[position];
        group.times.push(record.time);
        group.rows.push(record.rows);
        if record.from_master == Some(true) {
            group.master_hits += 1;
        }

        true
    }

    /// Number of records that passed the filter.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of records dropped by the filter.
    pub fn filtered(&self) -> usize {
        self.filtered
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Summarizes every group, the most time consuming first.
    pub fn finish(self) -> Vec<AggregatedRecord> {
        let total = self.total;

        let mut data: Vec<AggregatedRecord> = self
            .groups
            .into_iter()
            .map(|group| {
                let count = group.times.len();
                let rows: Vec<f64> = group.rows.iter().map(|rows| *rows as f64).collect();
                let first = group.first;

                AggregatedRecord {
                    query: first.query,
                    original_query: first.original_query,
                    method: first.method,
                    dbname: first.dbname,
                    source_host: first.source_host,
                    count,
                    percentage: format!("{:.2}%", 100.0 * count as f64 / total as f64),
                    time_sum: group.times.iter().sum(),
                    time_median: median(&group.times),
                    rows_sum: group.rows.iter().sum(),
                    rows_median: median(&rows),
                    from_master: first.from_master.map(|_| group.master_hits > 0),
                    sampling: first.sampling,
                }
            })
            .collect();

        data.sort_by(|a, b| b.time_sum.total_cmp(&a.time_sum));
        data
    }
}

impl Extend<CanonicalQueryRecord> for Digest {
    fn extend<I: IntoIterator<Item = CanonicalQueryRecord>>(&mut self, iter: I) {
        for record in iter {
            self.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(query: &str, method: &str, host: &str, time: f64, rows: u64) -> CanonicalQueryRecord {
        CanonicalQueryRecord {
            original_query: query.to_string(),
            query: query.to_string(),
            method: method.to_string(),
            dbname: "local".to_string(),
            source_host: host.to_string(),
            rows,
            time,
            from_master: Some(false),
            sampling: SamplingRate::UNSAMPLED,
        }
    }

    #[test]
    fn medians() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 3.0, 2.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0]), 1.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn keeps_regular_queries() {
        for query in ["SELECT foo FROM bar", r#"UPDATE foo SET bar = "123" WHERE id = 1"#] {
            assert!(filter_query(&record(query, "m", "ap", 0.0, 0)), "{query}");
        }
    }

    #[test]
    fn filters_out_transactions_and_status() {
        for query in [
            "BEGIN",
            "COMMIT",
            "SHOW TABLES",
            "SHOW SLAVES STATUS",
            r#"Important table write: UPDATE foo SET bar = "123" WHERE id = 1"#,
        ] {
            assert!(!filter_query(&record(query, "m", "ap", 0.0, 0)), "{query}");
        }
    }

    #[test]
    fn groups_by_method_and_host() {
        let mut digest = Digest::new();
        digest.extend([
            record("SELECT a FROM t", "Foo::a", "ap", 1.0, 10),
            record("SELECT a FROM t", "Foo::a", "ap", 3.0, 20),
            record("SELECT a FROM t", "Foo::a", "cron", 50.0, 1),
            record("SELECT b FROM t", "Foo::b", "ap", 2.0, 5),
            record("BEGIN", "Foo::a", "ap", 2.0, 5),
        ]);

        assert_eq!(digest.total(), 4);
        assert_eq!(digest.filtered(), 1);

        let data = digest.finish();
        assert_eq!(data.len(), 3);

        // most time consuming first
        assert_eq!(data[0].source_host, "cron");
        assert_eq!(data[0].percentage, "25.00%");

        assert_eq!(data[1].method, "Foo::a");
        assert_eq!(data[1].count, 2);
        assert_eq!(data[1].percentage, "50.00%");
        assert_eq!(data[1].time_sum, 4.0);
        assert_eq!(data[1].time_median, 2.0);
        assert_eq!(data[1].rows_sum, 30);
        assert_eq!(data[1].rows_median, 15.0);
        assert_eq!(data[1].from_master, Some(false));

        assert_eq!(data[2].method, "Foo::b");
    }

    #[test]
    fn keeps_the_sampling_rate_of_the_group() {
        let mut sampled = record("SELECT a FROM t", "Foo::a", "ap", 1.0, 1);
        sampled.sampling = SamplingRate::new(0.05).unwrap();

        let mut digest = Digest::new();
        digest.extend([sampled, record("SELECT a FROM t", "a.pl line 1", "job", 2.0, 1)]);

        let data = digest.finish();
        assert_eq!(data[0].sampling, SamplingRate::UNSAMPLED);
        assert_eq!(data[1].sampling.rate(), 0.05);
    }

    #[test]
    fn master_hits() {
        let mut master = record("SELECT a FROM t", "Foo::a", "ap", 1.0, 1);
        master.from_master = Some(true);

        let mut digest = Digest::new();
        digest.extend([record("SELECT a FROM t", "Foo::a", "ap", 1.0, 1), master]);
        assert_eq!(digest.finish()[0].from_master, Some(true));

        let mut unknown = record("SELECT a FROM t", "abc", "k8s", 1.0, 1);
        unknown.from_master = None;
        let mut digest = Digest::new();
        digest.push(unknown);
        assert_eq!(digest.finish()[0].from_master, None);
    }
}
