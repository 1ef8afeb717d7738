
mod checkpoint;
mod config;
mod corpus;
mod export;
mod model;
mod pipeline;
mod train;

pub use checkpoint::{Checkpoint, Fingerprint, CHECKPOINT_FILE};
pub use config::{files_handling, ComputeDevice, Config};
pub use corpus::{Cardinalities, Corpus, DataSet, TokenBundle, VOCAB_FILE};
pub use export::{export_topics, TopicsPayload};
pub use model::{Lda2Vec, LossType};
pub use pipeline::Pipeline;
pub use train::Trainer;
