//! CSV input and output for the batch driver.

pub mod account_reader;
pub mod movement_reader;
pub mod writer;

fn reader_builder() -> ::csv::ReaderBuilder {
    let mut builder = ::csv::ReaderBuilder::new();
    builder.trim(::csv::Trim::All).flexible(true);
    builder
}
