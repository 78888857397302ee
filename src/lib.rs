pub mod classifier;
pub mod cli;
pub mod config;
pub mod distance;
pub mod error;
pub mod extract;
pub mod index;
pub mod kmeans;
pub mod manifest;
pub mod reference;
pub mod report;
pub mod store;
pub mod svm;
pub mod training;
pub mod utils;
pub mod vocabulary;

pub use classifier::{Classifier, ClassifierConfig};
pub use config::Opts;
pub use error::{BowError, BowResult};
pub use vocabulary::Vocabulary;
