

use ndarray::prelude::*;
use ndarray::Array;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use serde::{Deserialize, Serialize};
use std::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossType {
    MeanSquaredError,
}

// the model graph is locked after finalize, a one way transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum ModelState {
    Building,
    Finalized,
}

// regresses the per category topic mixture against an outcome value
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegressionHead {
    pub loss_type: LossType,
    pub(crate) weights: Array1<f32>,
    pub(crate) bias: f32,
    pub(crate) ag_weights: Array1<f32>,
    pub(crate) ag_bias: f32,
}

// a side channel grouping of tokens, with its own topic space.
// weights rows are unnormalized category-topic mixtures, softmaxed on use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoricalFeature {
    pub name: String,
    pub n_categories: usize,
    pub n_topics: usize,
    pub(crate) topic_vectors: Array2<f32>,
    pub(crate) weights: Array2<f32>,
    pub(crate) head: Option<RegressionHead>,
    pub(crate) ag_topic_vectors: Array2<f32>,
    pub(crate) ag_weights: Array2<f32>,
}

impl CategoricalFeature {

    pub fn has_head(&self) -> bool {
        self.head.is_some()
    }

    // softmaxed topic mixture of one category
    pub fn topic_mixture(&self, category: usize) -> Array1<f32> {
        softmax(self.weights.slice(s![category, ..]))
    }

}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lda2Vec {
    n_words: usize,
    n_hidden: usize,
    dropout: f32,
    counts: Vec<u64>,
    pub(crate) word_vectors: Array2<f32>,
    pub(crate) context_vectors: Array2<f32>,
    pub(crate) features: Vec<CategoricalFeature>,
    state: ModelState,
    pub(crate) ag_word: Array2<f32>,
    pub(crate) ag_context: Array2<f32>,
}

impl Lda2Vec {

    pub fn new(n_words: usize, n_hidden: usize, counts: Vec<u64>, dropout: f32) -> Result<Lda2Vec, Box<dyn Error>> {

        if n_words == 0 || n_hidden == 0 {
            return Err(format!("model needs positive dimensions, got {} words and {} hidden", n_words, n_hidden).into());
        }
        if counts.len() != n_words {
            return Err(format!("got counts for {} tokens but vocabulary size is {}", counts.len(), n_words).into());
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(format!("dropout ratio {} is outside [0, 1)", dropout).into());
        }

        Ok( Self {
            n_words: n_words,
            n_hidden: n_hidden,
            dropout: dropout,
            counts: counts,
            word_vectors: Array::random((n_words, n_hidden), Uniform::new(-0.5, 0.5)) / n_hidden as f32,
            context_vectors: Array::random((n_words, n_hidden), Uniform::new(-0.5, 0.5)) / n_hidden as f32,
            features: Vec::new(),
            state: ModelState::Building,
            // init to 1.0 makes the initial eta equal to initial learning rate
            ag_word: Array2::from_elem((n_words, n_hidden), 1.0),
            ag_context: Array2::from_elem((n_words, n_hidden), 1.0),
        } )
    }

    pub fn n_words(&self) -> usize {
        self.n_words
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn is_finalized(&self) -> bool {
        self.state == ModelState::Finalized
    }

    pub fn features(&self) -> &[CategoricalFeature] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Result<&CategoricalFeature, Box<dyn Error>> {
        match self.features.iter().find(|f| f.name == name) {
            Some(f) => Ok(f),
            None => Err(format!("no categorical feature named {}", name).into())
        }
    }

    pub fn add_categorical_feature(&mut self, n_categories: usize, n_topics: usize, name: &str) -> Result<(), Box<dyn Error>> {
        self.attach_feature(n_categories, n_topics, name, None)
    }

    pub fn add_categorical_feature_with_loss(&mut self, n_categories: usize, n_topics: usize, name: &str, loss_type: LossType) -> Result<(), Box<dyn Error>> {
        self.attach_feature(n_categories, n_topics, name, Some(loss_type))
    }

    // attachment order fixes feature indices, the name is the lookup key
    fn attach_feature(&mut self, n_categories: usize, n_topics: usize, name: &str, loss_type: Option<LossType>) -> Result<(), Box<dyn Error>> {

        if self.state == ModelState::Finalized {
            return Err(format!("cannot add feature {} to a finalized model", name).into());
        }
        if n_categories == 0 || n_topics == 0 {
            return Err(format!("feature {} needs positive sizes, got {} categories and {} topics", name, n_categories, n_topics).into());
        }
        if self.features.iter().any(|f| f.name == name) {
            return Err(format!("feature named {} was already added", name).into());
        }

        let head = loss_type.map(|loss_type| RegressionHead {
            loss_type: loss_type,
            weights: Array::random(n_topics, Uniform::new(-0.5, 0.5)) / n_topics as f32,
            bias: 0.0,
            ag_weights: Array1::from_elem(n_topics, 1.0),
            ag_bias: 1.0,
        });

        self.features.push(CategoricalFeature {
            name: name.to_string(),
            n_categories: n_categories,
            n_topics: n_topics,
            topic_vectors: Array::random((n_topics, self.n_hidden), Uniform::new(-0.5, 0.5)) / self.n_hidden as f32,
            weights: Array::random((n_categories, n_topics), Uniform::new(-0.5, 0.5)) / n_topics as f32,
            head: head,
            ag_topic_vectors: Array2::from_elem((n_topics, self.n_hidden), 1.0),
            ag_weights: Array2::from_elem((n_categories, n_topics), 1.0),
        });

        Ok(())
    }

    pub fn finalize(&mut self) -> Result<(), Box<dyn Error>> {

        if self.state == ModelState::Finalized {
            return Err(format!("model was already finalized").into());
        }
        self.state = ModelState::Finalized;
        Ok(())
    }

    // dot scores of one topic vector against every word vector
    pub fn topic_word_scores(&self, feature: &CategoricalFeature, topic: usize) -> Array1<f32> {
        let t = feature.topic_vectors.slice(s![topic, ..]);
        self.word_vectors.dot(&t)
    }

    // the read only diagnostic printed after every training iteration.
    // ranks every word against each topic vector and returns the k best.
    pub fn top_words_per_topic(&self, name: &str, words: &[String], k: usize) -> Result<Vec<Vec<(String, f32)>>, Box<dyn Error>> {

        if !self.is_finalized() {
            return Err(format!("model must be finalized before reading topics").into());
        }
        if words.len() != self.n_words {
            return Err(format!("got {} word strings for {} vocabulary entries", words.len(), self.n_words).into());
        }

        let feature = self.feature(name)?;
        let mut per_topic: Vec<Vec<(String, f32)>> = Vec::new();

        for topic in 0..feature.n_topics {

            let scores = self.topic_word_scores(feature, topic);
            let mut indexed: Vec<(usize, f32)> = scores.iter().map(|x| x.to_owned()).enumerate().collect();

            // sort by most associated in descending order
            indexed.sort_by(|(_i, s), (_j, t)| t.total_cmp(s));
            indexed.truncate(k);

            let top: Vec<(String, f32)> = indexed.iter().map(|(i, s)| (words[*i].to_owned(), *s)).collect();
            let line = top.iter().map(|(w, _s)| w.to_owned()).collect::<Vec<String>>().join(" ");
            println!("{} topic {}: {}", name, topic, line);

            per_topic.push(top);
        }

        Ok(per_topic)
    }

}

// numerically stable softmax over one row
pub(crate) fn softmax(row: ArrayView1<f32>) -> Array1<f32> {

    let max = row.iter().fold(f32::NEG_INFINITY, |a, b| a.max(*b));
    let exps = row.mapv(|x| (x - max).exp());
    let denom = exps.sum();
    exps / denom
}
