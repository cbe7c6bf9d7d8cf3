//! Time-windowed, paginated reads from the Elasticsearch log store.
//!
//! Results are scanned with the scroll API so more than 10k hits can be
//! fetched. Pages are requested lazily while the caller iterates, and the
//! scroll context is cleared once the iterator is exhausted or dropped.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::records::RawLogRecord;

const SCROLL_TTL: &str = "1m";

/// Seconds in 24h, used to also query yesterday's index.
pub const DAY: i64 = 86_400;

/// `logstash-other-2017.05.09`
pub fn format_index(prefix: &str, ts: i64) -> String {
    let date = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default();
    format!("{prefix}-{}", date.format("%Y.%m.%d"))
}

/// UTC timestamp as Elasticsearch expects it, e.g. `2014-07-09T08:37:18.000Z`.
pub fn format_timestamp(ts: i64) -> String {
    let date = DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default();
    date.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
}

/// The `[since, until]` range of log messages to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub now: i64,
    pub since: i64,
    pub until: i64,
}

impl TimeWindow {
    /// The last `period` seconds, minus `safety_delay` seconds for log
    /// messages still being shipped.
    pub fn at(now: i64, period: u64, safety_delay: u64) -> Self {
        TimeWindow {
            now,
            since: now - period as i64,
            until: now - safety_delay as i64,
        }
    }

    pub fn ending_now(period: u64, safety_delay: u64) -> Self {
        Self::at(Utc::now().timestamp(), period, safety_delay)
    }

    /// Today's and yesterday's indices.
    pub fn indices(&self, prefix: &str) -> String {
        [
            format_index(prefix, self.now - DAY),
            format_index(prefix, self.now),
        ]
        .join(",")
    }

    fn range_filter(&self) -> Value {
        json!({
            "range": {
                "@timestamp": {
                    "gte": format_timestamp(self.since),
                    "lte": format_timestamp(self.until),
                }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source", default)]
    source: Value,
}

/// Interface for querying the log messages stored in Elasticsearch.
#[derive(Debug)]
pub struct ElasticsearchQuery {
    client: reqwest::blocking::Client,
    host: String,
    index: String,
    window: TimeWindow,
    batch_size: usize,
}

impl ElasticsearchQuery {
    pub fn new(config: &RetrievalConfig, index_prefix: &str) -> Result<Self, RetrievalError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.read_timeout)
            .gzip(true)
            .no_proxy()
            .build()?;

        let window = TimeWindow::ending_now(config.period, config.safety_delay);
        let index = window.indices(index_prefix);

        info!("Using {index} indices");
        info!(
            "Querying for messages from between {} and {}",
            format_timestamp(window.since),
            format_timestamp(window.until)
        );

        Ok(ElasticsearchQuery {
            client,
            host: config.es_host.trim_end_matches('/').to_string(),
            index,
            window,
            batch_size: config.batch_size.max(1),
        })
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    fn scroll_url(&self) -> String {
        format!("{}/_search/scroll", self.host)
    }

    /// Search body for a Lucene query string within the time window.
    pub fn search_body(&self, query: &str, fields: &[&str]) -> Value {
        let mut body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "query_string": { "query": query } },
                        self.window.range_filter(),
                    ]
                }
            },
            "sort": ["_doc"],
            "size": self.batch_size,
        });

        if !fields.is_empty() {
            body["_source"] = json!(fields);
        }

        body
    }

    /// Lazily yields at most `limit` messages matching the query string,
    /// e.g. `@message:"^PHP Fatal"`.
    pub fn query_by_string(&self, query: &str, fields: &[&str], limit: usize) -> ScrollIter<'_> {
        let body = self.search_body(query, fields);
        debug!("Running {body} query (limit set to {limit})");

        ScrollIter {
            es: self,
            body: Some(body),
            scroll_id: None,
            page: VecDeque::new(),
            remaining: limit,
            fetched: 0,
            done: limit == 0,
        }
    }

    fn post(&self, url: &str, body: &Value) -> Result<SearchResponse, RetrievalError> {
        let response = self.client.post(url).json(body).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        response
            .json::<SearchResponse>()
            .map_err(|err| RetrievalError::Response(err.to_string()))
    }
}

/// Lazy, finite and non-restartable sequence of raw log messages.
pub struct ScrollIter<'a> {
    es: &'a ElasticsearchQuery,
    body: Option<Value>,
    scroll_id: Option<String>,
    page: VecDeque<RawLogRecord>,
    remaining: usize,
    fetched: usize,
    done: bool,
}

impl ScrollIter<'_> {
    fn next_page(&mut self) -> Result<(), RetrievalError> {
        let response = match (self.body.take(), &self.scroll_id) {
            (Some(body), _) => {
                let url = format!(
                    "{}/{}/_search?scroll={SCROLL_TTL}",
                    self.es.host, self.es.index
                );
                self.es.post(&url, &body)?
            }
            (None, Some(scroll_id)) => {
                let body = json!({ "scroll": SCROLL_TTL, "scroll_id": scroll_id });
                self.es.post(&self.es.scroll_url(), &body)?
            }
            (None, None) => {
                return Err(RetrievalError::Response(
                    "no scroll id returned".to_string(),
                ));
            }
        };

        self.scroll_id = response.scroll_id;
        self.page
            .extend(response.hits.hits.into_iter().map(|hit| hit.source));

        debug!("Fetched a page of {} rows", self.page.len());
        Ok(())
    }

    /// Clears the server side scroll context, if one is open.
    fn release(&mut self) {
        let Some(scroll_id) = self.scroll_id.take() else {
            return;
        };

        let body = json!({ "scroll_id": [scroll_id] });
        match self.es.client.delete(self.es.scroll_url()).json(&body).send() {
            Ok(response) if response.status().is_success() => {
                debug!("Cleared scroll context");
            }
            Ok(response) => warn!("Unable to clear scroll context: HTTP {}", response.status()),
            Err(err) => warn!("Unable to clear scroll context: {err}"),
        }
    }
}

impl Drop for ScrollIter<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl Iterator for ScrollIter<'_> {
    type Item = Result<RawLogRecord, RetrievalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.page.is_empty() {
            if let Err(err) = self.next_page() {
                self.done = true;
                return Some(Err(err));
            }
        }

        match self.page.pop_front() {
            Some(record) => {
                self.remaining -= 1;
                self.fetched += 1;
                if self.remaining == 0 {
                    self.done = true;
                    self.release();
                }
                Some(Ok(record))
            }
            None => {
                self.done = true;
                self.release();
                info!("{} rows returned", self.fetched);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    use super::*;

    // 2017-05-09T12:00:00Z
    const NOW: i64 = 1_494_331_200;

    #[test]
    fn index_names() {
        assert_eq!(format_index("logstash-other", NOW), "logstash-other-2017.05.09");

        let window = TimeWindow::at(NOW, 3600, 5);
        assert_eq!(
            window.indices("logstash-mediawiki-sql"),
            "logstash-mediawiki-sql-2017.05.08,logstash-mediawiki-sql-2017.05.09"
        );
    }

    #[test]
    fn window_bounds() {
        let window = TimeWindow::at(NOW, 3600, 5);
        assert_eq!(window.since, NOW - 3600);
        assert_eq!(window.until, NOW - 5);
        assert_eq!(format_timestamp(window.since), "2017-05-09T11:00:00.000Z");
        assert_eq!(format_timestamp(window.until), "2017-05-09T11:59:55.000Z");
    }

    #[test]
    fn search_body() {
        let config = RetrievalConfig {
            batch_size: 250,
            ..RetrievalConfig::default()
        };
        let es = ElasticsearchQuery::new(&config, "logstash-backend-sql").unwrap();
        let body = es.search_body("program:\"backend\"", &["@message", "@source_host"]);

        assert_eq!(body["size"], 250);
        assert_eq!(body["sort"], json!(["_doc"]));
        assert_eq!(body["_source"], json!(["@message", "@source_host"]));
        assert_eq!(
            body["query"]["bool"]["must"][0]["query_string"]["query"],
            "program:\"backend\""
        );
        let range = &body["query"]["bool"]["must"][1]["range"]["@timestamp"];
        assert_eq!(range["gte"], format_timestamp(es.window().since));
        assert_eq!(range["lte"], format_timestamp(es.window().until));
    }

    #[test]
    fn zero_limit_fetches_nothing() {
        let es = ElasticsearchQuery::new(&RetrievalConfig::default(), "logstash-other").unwrap();
        assert_eq!(es.query_by_string("*", &[], 0).count(), 0);
    }

    /// Answers one connection per canned response body and returns the
    /// request lines it received.
    fn serve(responses: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut requests = Vec::new();

            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();

                let mut length = 0;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header == "\r\n" {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            length = value.trim().parse().unwrap();
                        }
                    }
                }
                let mut payload = vec![0; length];
                reader.read_exact(&mut payload).unwrap();
                requests.push(request_line.trim_end().to_string());

                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                )
                .unwrap();
            }

            requests
        });

        (host, handle)
    }

    fn query(host: String) -> ElasticsearchQuery {
        let config = RetrievalConfig {
            es_host: host,
            ..RetrievalConfig::default()
        };
        ElasticsearchQuery::new(&config, "logstash-test").unwrap()
    }

    #[test]
    fn scroll_is_cleared_at_the_limit() {
        let (host, server) = serve(vec![
            r#"{"_scroll_id":"abc","hits":{"hits":[{"_source":{"n":1}},{"_source":{"n":2}}]}}"#,
            r#"{"_scroll_id":"abc","hits":{"hits":[{"_source":{"n":3}},{"_source":{"n":4}}]}}"#,
            r#"{"succeeded":true,"num_freed":1}"#,
        ]);

        let es = query(host);
        let rows: Vec<RawLogRecord> = es
            .query_by_string("*", &[], 3)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].starts_with("POST /logstash-test-"), "{}", requests[0]);
        assert!(requests[0].contains("/_search?scroll=1m"), "{}", requests[0]);
        assert_eq!(requests[1], "POST /_search/scroll HTTP/1.1");
        assert_eq!(requests[2], "DELETE /_search/scroll HTTP/1.1");
    }

    #[test]
    fn scroll_is_cleared_after_the_last_page() {
        let (host, server) = serve(vec![
            r#"{"_scroll_id":"abc","hits":{"hits":[]}}"#,
            r#"{"succeeded":true,"num_freed":1}"#,
        ]);

        let es = query(host);
        assert_eq!(es.query_by_string("*", &[], 10).count(), 0);

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], "DELETE /_search/scroll HTTP/1.1");
    }
}
