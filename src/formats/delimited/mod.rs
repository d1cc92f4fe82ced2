//! Headerless delimited text (CSV, TSV) read in fixed-size row chunks

pub mod reader;
