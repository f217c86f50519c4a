pub mod manifest;
pub mod tracks;
pub mod tsv;
