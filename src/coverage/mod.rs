//! Coverage ingestion: payload parsing, rate computation, and recording.

mod ingest;
mod payload;
mod rate;

pub use ingest::{
    CoverageReport, FileReport, IngestReceipt, RecordedCoverage, ingest, ingest_into,
};
pub use payload::{CoverallsPayload, GitHead, GitInfo, SourceFile};
pub use rate::{LineStatus, LineTally};
