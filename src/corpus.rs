

use crate::config::files_handling::{self, ReadFile, SaveFile};

use log::{info, warn};
use ndarray::Array1;
use ndarray_npy::{NpzReader, NpzWriter};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};

// fixed artifact names, produced by the preprocessing step
pub const CORPUS_FILE: &str = "corpus";
pub const VOCAB_FILE: &str = "vocab";
pub const FEATURES_FILE: &str = "features.csv";
pub const DATA_FILE: &str = "data";

// per compact token id frequency counts over the whole corpus
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Corpus {
    pub keys_counts: Vec<u64>,
}

impl Corpus {

    // display strings for the first n_words compact ids. the vocabulary can
    // come up short against the token id range, that mismatch is surfaced
    // with placeholders instead of shrinking the model dimension under us.
    pub fn word_list(&self, vocab: &[String], n_words: usize) -> Vec<String> {

        if vocab.len() < n_words {
            warn!("vocabulary has {} entries but token ids reach {}, padding with placeholders", vocab.len(), n_words);
        }

        (0..n_words).map(|i| {
            match vocab.get(i) {
                Some(w) => w.to_owned(),
                None => format!("<oov#{}>", i)
            }
        }).collect()
    }

    // counts for the first n_words compact ids
    pub fn counts(&self, n_words: usize) -> Vec<u64> {

        if self.keys_counts.len() < n_words {
            warn!("corpus has counts for {} tokens but token ids reach {}", self.keys_counts.len(), n_words);
        }

        (0..n_words).map(|i| *self.keys_counts.get(i).unwrap_or(&0)).collect()
    }

}

impl ReadFile for Corpus {
    type Error = Box<dyn Error>;
    type Item = Self;
    fn read_file(file_path: &str) -> Result<Self::Item, Self::Error> {
        let f = BufReader::new(File::open(file_path)?);
        let item = bincode::deserialize_from(f)?;
        return Ok(item)
    }
}

impl SaveFile for Corpus {
    type Error = Box<dyn Error>;
    fn save_file(&self, output_dir: &str, file_name: &str) -> Result<(), Self::Error> {
        let out = output_dir.to_string() + "/" + file_name;
        let mut f = BufWriter::new(File::create(out)?);
        bincode::serialize_into(&mut f, self)?;
        return Ok(())
    }
}

// tabular side information. loaded and retained but not consumed by the
// training loop, kept available for extension.
#[derive(Clone, Debug)]
pub struct FeatureTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FeatureTable {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }
}

impl ReadFile for FeatureTable {
    type Error = Box<dyn Error>;
    type Item = Self;
    fn read_file(file_path: &str) -> Result<Self::Item, Self::Error> {

        let mut rdr = csv::Reader::from_path(file_path)?;
        let headers = rdr.headers()?.iter().map(|h| h.to_string()).collect();

        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(|x| x.to_string()).collect());
        }

        Ok( FeatureTable { headers: headers, rows: rows } )
    }
}

// the flat token stream with its aligned per token label arrays and the
// auxiliary outcome signals, all parallel and of equal length
#[derive(Clone, Debug)]
pub struct TokenBundle {
    pub flattened: Array1<i64>,
    pub story_id: Array1<i64>,
    pub author_id: Array1<i64>,
    pub time_id: Array1<i64>,
    pub ranking: Array1<i64>,
    pub score: Array1<i64>,
}

impl TokenBundle {

    pub fn len(&self) -> usize {
        self.flattened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flattened.is_empty()
    }

}

// numpy keeps entries of a savez bundle under name.npy, plain names are
// tried first for bundles written by this crate
fn npz_field(npz: &mut NpzReader<File>, name: &str) -> Result<Array1<i64>, Box<dyn Error>> {
    match npz.by_name(name) {
        Ok(arr) => Ok(arr),
        Err(_) => Ok(npz.by_name(&format!("{}.npy", name))?)
    }
}

impl ReadFile for TokenBundle {
    type Error = Box<dyn Error>;
    type Item = Self;
    fn read_file(file_path: &str) -> Result<Self::Item, Self::Error> {

        let mut npz = NpzReader::new(File::open(file_path)?)?;

        let bundle = TokenBundle {
            flattened: npz_field(&mut npz, "flattened")?,
            story_id: npz_field(&mut npz, "story_id")?,
            author_id: npz_field(&mut npz, "author_id")?,
            time_id: npz_field(&mut npz, "time_id")?,
            ranking: npz_field(&mut npz, "ranking")?,
            score: npz_field(&mut npz, "score")?,
        };

        let n = bundle.flattened.len();
        for (name, arr) in [("story_id", &bundle.story_id), ("author_id", &bundle.author_id),
                            ("time_id", &bundle.time_id), ("ranking", &bundle.ranking), ("score", &bundle.score)] {
            if arr.len() != n {
                return Err(format!("array {} has {} entries, token stream has {}", name, arr.len(), n).into());
            }
        }

        Ok(bundle)
    }
}

impl SaveFile for TokenBundle {
    type Error = Box<dyn Error>;
    fn save_file(&self, output_dir: &str, file_name: &str) -> Result<(), Self::Error> {

        let out = output_dir.to_string() + "/" + file_name;
        let mut npz = NpzWriter::new_compressed(File::create(out)?);

        npz.add_array("flattened", &self.flattened)?;
        npz.add_array("story_id", &self.story_id)?;
        npz.add_array("author_id", &self.author_id)?;
        npz.add_array("time_id", &self.time_id)?;
        npz.add_array("ranking", &self.ranking)?;
        npz.add_array("score", &self.score)?;
        npz.finish()?;

        return Ok(())
    }
}

// everything the preprocessing step hands over, loaded in one shot.
// any missing or undecodable artifact fails the whole load, nothing
// downstream is touched in that case.
pub struct DataSet {
    pub corpus: Corpus,
    pub vocab: Vec<String>,
    pub features: FeatureTable,
    pub bundle: TokenBundle,
}

impl DataSet {

    pub fn load(data_dir: &str) -> Result<DataSet, Box<dyn Error>> {

        let path = |name: &str| data_dir.to_string() + "/" + name;

        let corpus = files_handling::read_input::<Corpus>(&path(CORPUS_FILE))?;
        let vocab = files_handling::read_input::<Vec<String>>(&path(VOCAB_FILE))?;
        let features = files_handling::read_input::<FeatureTable>(&path(FEATURES_FILE))?;
        let bundle = files_handling::read_input::<TokenBundle>(&path(DATA_FILE))?;

        info!("loaded {} tokens, {} vocab entries, {} feature rows",
              bundle.len(), vocab.len(), features.n_rows());

        Ok( DataSet { corpus: corpus, vocab: vocab, features: features, bundle: bundle } )
    }

}

// category space sizes, derived as max id + 1. ids are assumed zero based
// and dense up to the max, that is on the preprocessing step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cardinalities {
    pub n_stories: usize,
    pub n_authors: usize,
    pub n_times: usize,
    pub n_words: usize,
}

impl Cardinalities {

    pub fn derive(bundle: &TokenBundle) -> Result<Cardinalities, Box<dyn Error>> {

        let max_plus_one = |arr: &Array1<i64>, name: &str| -> Result<usize, Box<dyn Error>> {
            match arr.max() {
                Ok(m) if *m >= 0 => Ok(*m as usize + 1),
                Ok(m) => Err(format!("array {} holds a negative id {}", name, m).into()),
                Err(_) => Err(format!("array {} is empty, nothing to derive", name).into())
            }
        };

        Ok( Cardinalities {
            n_stories: max_plus_one(&bundle.story_id, "story_id")?,
            n_authors: max_plus_one(&bundle.author_id, "author_id")?,
            n_times: max_plus_one(&bundle.time_id, "time_id")?,
            n_words: max_plus_one(&bundle.flattened, "flattened")?,
        } )
    }

}

// tokens per category, used for the visualization payloads
pub fn doc_lengths(labels: &Array1<i64>, n_categories: usize) -> Array1<i64> {

    let mut lengths = Array1::zeros(n_categories);
    for id in labels.iter() {
        lengths[*id as usize] += 1;
    }
    lengths
}
