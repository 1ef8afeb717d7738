
use core::panic;
use std::env;
use std::path::Path;
extern crate topic_trainer;
use topic_trainer::{files_handling, Checkpoint};

// this module has some checks on a trained model, functionality to print
// the k best words for every topic of a categorical feature.
// treated as binary executable so it can be ran independently from main

fn main() {

    // arguments to this executable should be:
    // a feature name ("story_id", "author_id" or "time_id")
    // path to a saved checkpoint
    // path to the vocabulary (json)
    // example: ... story_id model.bin vocab
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 { panic!("input arguments should be a feature name, a checkpoint path and a vocab path"); }
    let feature = &args[1];

    // read in the trained model and tokens
    let (fingerprint, model) = match Checkpoint::load_file(Path::new(&args[2])) {
        Ok(loaded) => loaded,
        Err(e) => panic!("{}", e)
    };
    let vocab = match files_handling::read_input::<Vec<String>>(&args[3]) {
        Ok(vocab) => vocab,
        Err(e) => panic!("{}", e)
    };

    // the checkpoint dictates the vocabulary size, pad if the file is short
    let words: Vec<String> = (0..fingerprint.n_words).map(|i| {
        match vocab.get(i) {
            Some(w) => w.to_owned(),
            None => format!("<oov#{}>", i)
        }
    }).collect();

    let k = 10;
    println!("printing the {} best words per topic of {}", k, feature);
    if let Err(e) = model.top_words_per_topic(feature, &words, k) {
        panic!("{}", e);
    }

}
