

use crate::model::Lda2Vec;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::{self, File};
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FILE: &str = "model.bin";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureShape {
    pub name: String,
    pub n_categories: usize,
    pub n_topics: usize,
    pub supervised: bool,
}

// the shape of a model, stored next to the weights. a checkpoint written
// under different hyper parameters is refused on load instead of being
// poured into mismatched matrices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub n_words: usize,
    pub n_hidden: usize,
    pub features: Vec<FeatureShape>,
}

impl Fingerprint {

    pub fn of(model: &Lda2Vec) -> Fingerprint {
        Fingerprint {
            n_words: model.n_words(),
            n_hidden: model.n_hidden(),
            features: model.features().iter().map(|f| FeatureShape {
                name: f.name.clone(),
                n_categories: f.n_categories,
                n_topics: f.n_topics,
                supervised: f.has_head(),
            }).collect(),
        }
    }

}

pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {

    pub fn new(output_dir: &str) -> Checkpoint {
        Checkpoint { path: Path::new(output_dir).join(CHECKPOINT_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    // gzipped bincode, written to a temp file and renamed over the previous
    // snapshot. a crash mid write leaves the last good checkpoint in place.
    pub fn save(&self, model: &Lda2Vec) -> Result<(), Box<dyn Error>> {

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("bin.tmp");
        {
            let f = BufWriter::new(File::create(&tmp)?);
            let mut encoder = GzEncoder::new(f, Compression::default());
            bincode::serialize_into(&mut encoder, &(Fingerprint::of(model), model))?;
            let mut inner = encoder.finish()?;
            inner.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        return Ok(())
    }

    pub fn load_file(path: &Path) -> Result<(Fingerprint, Lda2Vec), Box<dyn Error>> {

        let f = BufReader::new(File::open(path)?);
        let decoder = GzDecoder::new(f);
        let (fingerprint, model): (Fingerprint, Lda2Vec) = bincode::deserialize_from(decoder)?;
        Ok((fingerprint, model))
    }

    // restore a stored snapshot into a freshly finalized model of the same
    // shape, optimizer accumulators included
    pub fn restore(&self, model: &mut Lda2Vec) -> Result<(), Box<dyn Error>> {

        if !model.is_finalized() {
            return Err(format!("model must be finalized before restoring a checkpoint").into());
        }

        let (fingerprint, loaded) = Checkpoint::load_file(&self.path)?;
        let expected = Fingerprint::of(model);
        if fingerprint != expected {
            return Err(format!("checkpoint at {} was written with shape {:?}, model has shape {:?}",
                self.path.display(), fingerprint, expected).into());
        }

        *model = loaded;
        info!("restored checkpoint from {}", self.path.display());
        Ok(())
    }

}
