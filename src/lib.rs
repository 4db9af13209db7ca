pub mod decode;
pub mod error;
pub mod io;
pub mod types;
pub mod viterbi;

pub use decode::from_probabilities;
pub use error::DecodeError;
pub use io::{from_file, from_file_to_file, from_files_to_files};
pub use types::{DecodedBatch, Device, Observation};
