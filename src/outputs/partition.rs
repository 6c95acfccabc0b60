//! Grouping of scored records into date/domain partitions.
//!
//! Every record lands in the partition `(date, url suffix, domain)` derived
//! from its own link and matched date, so `news.example.co.uk` articles from
//! 2023-08-20 end up in `2023-08-20/co.uk/example.parquet`.
//!
//! Partitions are written in key order. An empty input writes nothing.

use crate::error::WriteError;
use crate::models::ScoredRecord;
use crate::outputs::encode::encode_partition;
use crate::outputs::sink::ArtifactSink;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, instrument};
use url::Url;

/// Public suffixes made of two labels. Anything else is treated as a
/// single-label suffix.
const TWO_LABEL_SUFFIXES: &[&str] = &[
    "ac.uk", "co.uk", "gov.uk", "ltd.uk", "me.uk", "org.uk", "plc.uk", "com.au", "edu.au",
    "gov.au", "net.au", "org.au", "co.nz", "org.nz", "co.jp", "ne.jp", "or.jp", "co.za",
    "co.in", "co.kr", "com.ar", "com.br", "com.cn", "com.hk", "com.mx", "com.sg", "com.tr",
    "com.tw",
];

/// Split a host name into `(suffix, domain)`.
///
/// `www.bbc.co.uk` gives `("co.uk", "bbc")`, `edition.cnn.com` gives
/// `("com", "cnn")`. Returns `None` for single-label hosts.
pub fn split_host(host: &str) -> Option<(String, String)> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }

    let n = labels.len();
    let last_two = format!("{}.{}", labels[n - 2], labels[n - 1]);
    if n >= 3 && TWO_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        Some((last_two, labels[n - 3].to_string()))
    } else {
        Some((labels[n - 1].to_string(), labels[n - 2].to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    /// `YYYY-MM-DD`.
    pub date_id: String,
    pub url_suffix: String,
    pub domain: String,
}

impl PartitionKey {
    /// Key of an article at `link` published on `date`, if its host has a
    /// registrable domain.
    pub fn for_link(link: &str, date: NaiveDate) -> Option<Self> {
        let url = Url::parse(link).ok()?;
        // IP literals have no domain
        let (url_suffix, domain) = split_host(url.domain()?)?;
        Some(Self {
            date_id: date.format("%Y-%m-%d").to_string(),
            url_suffix,
            domain,
        })
    }

    pub fn for_record(record: &ScoredRecord) -> Result<Self, WriteError> {
        Self::for_link(&record.link, record.date).ok_or_else(|| WriteError::PartitionKey {
            link: record.link.clone(),
        })
    }

    /// Relative artifact path: `<date>/<suffix>/<domain>.parquet`.
    pub fn object_key(&self) -> String {
        format!("{}/{}/{}.parquet", self.date_id, self.url_suffix, self.domain)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.date_id, self.url_suffix, self.domain)
    }
}

/// One published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionHandle {
    pub key: PartitionKey,
    pub location: String,
    pub rows: usize,
}

/// Group records by partition key, keeping input order within a group.
pub fn group_records(
    records: Vec<ScoredRecord>,
) -> Result<BTreeMap<PartitionKey, Vec<ScoredRecord>>, WriteError> {
    let mut groups: BTreeMap<PartitionKey, Vec<ScoredRecord>> = BTreeMap::new();
    for record in records {
        let key = PartitionKey::for_record(&record)?;
        groups.entry(key).or_default().push(record);
    }
    Ok(groups)
}

#[derive(Debug)]
pub struct PartitionWriter<K> {
    sink: K,
}

impl<K: ArtifactSink> PartitionWriter<K> {
    pub fn new(sink: K) -> Self {
        Self { sink }
    }

    /// Encode and publish one artifact per partition.
    ///
    /// Each artifact is fully encoded before it is published, so a failure
    /// never leaves a truncated file behind.
    #[instrument(level = "info", skip_all, fields(records = records.len()))]
    pub async fn write(&self, records: Vec<ScoredRecord>) -> Result<Vec<PartitionHandle>, WriteError> {
        let groups = group_records(records)?;
        let mut handles = Vec::with_capacity(groups.len());

        for (key, rows) in groups {
            let object_key = key.object_key();
            let bytes = encode_partition(&object_key, &rows)?;
            let size = bytes.len();
            let location = self.sink.publish(&object_key, bytes).await?;
            info!(partition = %key, rows = rows.len(), bytes = size, %location, "Wrote partition");
            handles.push(PartitionHandle {
                key,
                location,
                rows: rows.len(),
            });
        }
        Ok(handles)
    }
}
