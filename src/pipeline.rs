

// imports
use crate::checkpoint::Checkpoint;
use crate::config::{Config, ComputeDevice};
use crate::corpus::{Cardinalities, DataSet};
use crate::export;
use crate::model::{Lda2Vec, LossType};
use crate::train::Trainer;

use core::panic;
use log::info;
use ndarray::Array1;
use std::env;
use std::time::Instant;

pub struct Pipeline {}

impl Pipeline {

    // runs the main procedure of 5 steps -
    // -> configuration of arguments
    // -> loading the preprocessed artifacts
    // -> model construction
    // -> training with a checkpoint after every iteration
    // -> topic payload export

    pub fn run() {

        info!("entering program...");
        let args: Vec<String> = env::args().collect();

        info!("building parameters...");
        let params = match Config::new(&args) {
            Ok(config) => config.get_params(),
            Err(e) => panic!("{}", e)
        };
        info!("{}", params);

        // placement is decided once here and handed to the training calls
        let device = ComputeDevice::resolve(params.num_threads);
        info!("compute placement: {}", device);
        if let Err(e) = device.install_pool() {
            panic!("{}", e)
        }

        let timer = Instant::now();
        info!("loading artifacts from {} ...", params.data_dir);
        let data = match DataSet::load(&params.data_dir) {
            Ok(data) => data,
            Err(e) => panic!("{}", e)
        };

        let dims = match Cardinalities::derive(&data.bundle) {
            Ok(dims) => dims,
            Err(e) => panic!("{}", e)
        };
        info!("derived cardinalities: {} stories, {} authors, {} time periods, {} words",
            dims.n_stories, dims.n_authors, dims.n_times, dims.n_words);

        let words = data.corpus.word_list(&data.vocab, dims.n_words);
        let counts = data.corpus.counts(dims.n_words);
        info!("finished loading, took {} seconds ...", timer.elapsed().as_secs());

        // topics over stories should correlate with the story score, topics
        // over authors with how their comments rank. time periods get no
        // outcome attached. the ranking and score arrays stay unused until
        // targets are wired into fit.
        let mut model = match Lda2Vec::new(dims.n_words, params.train.n_hidden, counts, params.train.dropout) {
            Ok(model) => model,
            Err(e) => panic!("{}", e)
        };
        if let Err(e) = model.add_categorical_feature_with_loss(dims.n_stories, params.train.n_topic_stories, "story_id", LossType::MeanSquaredError) {
            panic!("{}", e)
        }
        if let Err(e) = model.add_categorical_feature_with_loss(dims.n_authors, params.train.n_topic_authors, "author_id", LossType::MeanSquaredError) {
            panic!("{}", e)
        }
        if let Err(e) = model.add_categorical_feature(dims.n_times, params.train.n_topic_times, "time_id") {
            panic!("{}", e)
        }
        if let Err(e) = model.finalize() {
            panic!("{}", e)
        }

        // reload model if pre-existing
        let checkpoint = Checkpoint::new(&params.output_dir);
        if checkpoint.exists() {
            info!("found checkpoint at {}, resuming from it...", checkpoint.path().display());
            if let Err(e) = checkpoint.restore(&mut model) {
                panic!("{}", e)
            }
        }

        let mut trainer = match Trainer::new(&params.train, device, model.counts()) {
            Ok(trainer) => trainer,
            Err(e) => panic!("{}", e)
        };
        let labels: Vec<&Array1<i64>> = vec![&data.bundle.story_id, &data.bundle.author_id, &data.bundle.time_id];

        let timer = Instant::now();
        info!("starting training part...");
        for iteration in 0..params.train.n_iterations {

            let loss = match trainer.fit(&mut model, &data.bundle.flattened, &labels, &[]) {
                Ok(loss) => loss,
                Err(e) => panic!("{}", e)
            };

            if let Err(e) = checkpoint.save(&model) {
                panic!("{}", e)
            }

            info!("iteration {} / {}, loss {}", iteration + 1, params.train.n_iterations, loss);
            for feature in ["story_id", "author_id", "time_id"] {
                if let Err(e) = model.top_words_per_topic(feature, &words, params.train.top_words) {
                    panic!("{}", e)
                }
            }

        }
        info!("finished training, took {} seconds ...", timer.elapsed().as_secs());

        // payloads for the visualization notebook
        match export::export_topics(&model, &labels, &params.output_dir) {
            Ok(saved) => info!("saved {} topic payloads", saved.len()),
            Err(e) => panic!("{}", e)
        };

    }

}
