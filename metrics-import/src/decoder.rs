use std::io::{BufReader, Read};

use crate::api::ImportError;
use crate::encoding::ContentEncoding;
use crate::metric::MetricBatch;

/// Decodes a request body sent with the given encoding into a batch.
///
/// The decompressor only lives for the duration of this call.
pub fn decode_body(encoding: ContentEncoding, body: &[u8]) -> Result<MetricBatch, ImportError> {
    let reader = encoding.reader(body)?;
    decode_batch(reader)
}

/// Reads the whole stream as a single JSON array of metric records.
/// A corrupt compressed stream surfaces here as a parse failure.
pub fn decode_batch<R: Read>(reader: R) -> Result<MetricBatch, ImportError> {
    let batch = serde_json::from_reader(BufReader::new(reader))?;
    Ok(batch)
}
