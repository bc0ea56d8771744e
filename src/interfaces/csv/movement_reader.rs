use super::reader_builder;
use crate::application::service::CreateMovement;
use crate::error::{LedgerError, Result};
use std::io::Read;

/// Reads movement requests from a CSV source.
///
/// Expected columns are `account_id,type,amount,description`; `description`
/// may be empty or missing. Rows are not validated here: `CreateMovement`
/// goes through the service, which rejects bad amounts and ids.
pub struct MovementReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> MovementReader<R> {
    /// Creates a new `MovementReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        Self {
            reader: reader_builder().from_reader(source),
        }
    }

    /// Returns an iterator that lazily reads and deserializes requests, so
    /// large inputs are streamed rather than loaded up front.
    pub fn movements(self) -> impl Iterator<Item = Result<CreateMovement>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
