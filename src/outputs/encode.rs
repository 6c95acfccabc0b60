//! Parquet encoding of one partition.
//!
//! Columns, in order:
//!
//! | Column | Arrow type |
//! |--------|------------|
//! | `source` | `Utf8` |
//! | `link` | `Utf8` |
//! | `summary` | `Utf8` |
//! | `sentiment_label` | `Dictionary(Int8, Utf8)` |
//! | `sentiment_score` | `Float64` |
//! | `sentiment_model` | `Utf8` |
//! | `summarization_model` | `Utf8` |

use crate::error::WriteError;
use crate::models::ScoredRecord;
use arrow_array::types::Int8Type;
use arrow_array::{ArrayRef, DictionaryArray, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

pub const COLUMNS: [&str; 7] = [
    "source",
    "link",
    "summary",
    "sentiment_label",
    "sentiment_score",
    "sentiment_model",
    "summarization_model",
];

pub fn schema() -> SchemaRef {
    let label_type = DataType::Dictionary(Box::new(DataType::Int8), Box::new(DataType::Utf8));
    Arc::new(Schema::new(vec![
        Field::new(COLUMNS[0], DataType::Utf8, false),
        Field::new(COLUMNS[1], DataType::Utf8, false),
        Field::new(COLUMNS[2], DataType::Utf8, false),
        Field::new(COLUMNS[3], label_type, false),
        Field::new(COLUMNS[4], DataType::Float64, false),
        Field::new(COLUMNS[5], DataType::Utf8, false),
        Field::new(COLUMNS[6], DataType::Utf8, false),
    ]))
}

fn strings<'a>(records: &'a [ScoredRecord], f: impl Fn(&'a ScoredRecord) -> &'a str) -> ArrayRef {
    Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
}

/// Encode `records` as one Parquet file held in memory.
///
/// `key` only labels errors.
pub fn encode_partition(key: &str, records: &[ScoredRecord]) -> Result<Vec<u8>, WriteError> {
    let encode_err = |message: String| WriteError::Encode {
        key: key.to_string(),
        message,
    };

    let labels: DictionaryArray<Int8Type> = records
        .iter()
        .map(|r| r.sentiment_label.as_str())
        .collect();
    let scores = Float64Array::from(records.iter().map(|r| r.sentiment_score).collect::<Vec<_>>());

    let columns: Vec<ArrayRef> = vec![
        strings(records, |r| r.source.as_str()),
        strings(records, |r| r.link.as_str()),
        strings(records, |r| r.summary.as_str()),
        Arc::new(labels),
        Arc::new(scores),
        strings(records, |r| r.sentiment_model.as_str()),
        strings(records, |r| r.summarization_model.as_str()),
    ];
    let batch = RecordBatch::try_new(schema(), columns).map_err(|e| encode_err(e.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props))
        .map_err(|e| encode_err(e.to_string()))?;
    writer.write(&batch).map_err(|e| encode_err(e.to_string()))?;
    writer.into_inner().map_err(|e| encode_err(e.to_string()))
}
