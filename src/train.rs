

use crate::config::{ComputeDevice, TrainParams};
use crate::model::Lda2Vec;

use log::{debug, info};
use ndarray::prelude::*;
use rand::distributions::{Bernoulli, Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::error::Error;
use std::ops::{AddAssign, SubAssign};
use std::time::Instant;

// one sampled pivot with everything drawn for it up front. gradients are
// computed from these without touching the rng, so a batch can go to the
// rayon pool and still replay exactly under a fixed seed.
struct Example {
    pivot: usize,
    contexts: Vec<usize>,
    negatives: Vec<usize>,
    categories: Vec<usize>,
    mask: Vec<f32>,
    targets: Vec<Option<f32>>,
}

struct FeatureGrad {
    category: usize,
    mixture: Array1<f32>,
    g_context: Array1<f32>,
    weight_grad: Array1<f32>,
    head_grad: Option<(Array1<f32>, f32)>,
}

struct ExampleGrad {
    loss: f32,
    pivot: usize,
    pivot_grad: Array1<f32>,
    ctx_grads: Vec<(usize, Array1<f32>)>,
    feature_grads: Vec<FeatureGrad>,
}

struct EpochProgress {
    epoch_loss: f32,   // summed example losses
    n_examples: f32,   // examples that contributed a gradient
    n_skipped: usize,  // pivots with no usable context window
}

impl EpochProgress {

    fn new() -> Self {
        Self { epoch_loss: 0.0, n_examples: 0.0, n_skipped: 0 }
    }

    fn mean_loss(&self) -> f32 {
        if self.n_examples > 0.0 {
            self.epoch_loss / self.n_examples
        } else {
            0.0
        }
    }

}

pub struct Trainer {
    params: TrainParams,
    device: ComputeDevice,
    rng: StdRng,
    negative_table: WeightedIndex<f64>,
}

impl Trainer {

    pub fn new(params: &TrainParams, device: ComputeDevice, counts: &[u64]) -> Result<Trainer, Box<dyn Error>> {

        if counts.is_empty() {
            return Err(format!("cannot build a negative sampling table without counts").into());
        }

        // unigram distribution raised to 3/4, the word2vec convention
        let mut weights: Vec<f64> = counts.iter().map(|c| (*c as f64).powf(0.75)).collect();
        if weights.iter().sum::<f64>() == 0.0 {
            weights = vec![1.0; counts.len()];
        }

        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy()
        };

        Ok( Self {
            params: params.clone(),
            device: device,
            rng: rng,
            negative_table: WeightedIndex::new(&weights)?,
        } )
    }

    // one call is `epochs_per_iteration` epochs of stochastic fitting over a
    // `fraction` sample of the token stream. the label arrays are aligned with
    // the stream, one per attached feature in attachment order, and the first
    // one delimits the windows (tokens of different documents never share a
    // context). optional per token regression targets drive the supervised
    // heads, an empty slice leaves them untouched.
    pub fn fit(&mut self,
        model: &mut Lda2Vec,
        flattened: &Array1<i64>,
        categorical_features: &[&Array1<i64>],
        targets: &[Option<Array1<f32>>],
    ) -> Result<f32, Box<dyn Error>> {

        if !model.is_finalized() {
            return Err(format!("model must be finalized before fitting").into());
        }
        if categorical_features.len() != model.features().len() {
            return Err(format!("got {} label arrays for {} categorical features",
                categorical_features.len(), model.features().len()).into());
        }
        if !targets.is_empty() && targets.len() != model.features().len() {
            return Err(format!("got {} target arrays for {} categorical features",
                targets.len(), model.features().len()).into());
        }

        let n = flattened.len();
        if n == 0 {
            return Err(format!("token stream is empty, nothing to fit").into());
        }
        for (i, labels) in categorical_features.iter().enumerate() {
            if labels.len() != n {
                return Err(format!("label array {} has {} entries, token stream has {}", i, labels.len(), n).into());
            }
        }
        for (i, t) in targets.iter().enumerate() {
            if let Some(t) = t {
                if t.len() != n {
                    return Err(format!("target array {} has {} entries, token stream has {}", i, t.len(), n).into());
                }
            }
        }

        let sample_n = ((n as f64 * self.params.fraction).ceil() as usize).clamp(1, n);
        let mut last_loss = 0.0;

        for epoch in 0..self.params.epochs_per_iteration {

            let timer = Instant::now();
            let mut progress = EpochProgress::new();

            // fresh sample of pivot positions each epoch
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut self.rng);
            order.truncate(sample_n);

            for batch in order.chunks(self.params.batch_size) {

                let examples = self.prepare_batch(model, batch, flattened, categorical_features, targets, &mut progress);

                // gradients of a batch come from the same snapshot of the
                // weights, applying them in order keeps runs reproducible
                // on any device placement
                let grads: Vec<ExampleGrad> = {
                    let frozen: &Lda2Vec = model;
                    if self.device.is_parallel() {
                        examples.par_iter().map(|ex| compute_gradients(frozen, ex, self.params.negative_samples)).collect()
                    } else {
                        examples.iter().map(|ex| compute_gradients(frozen, ex, self.params.negative_samples)).collect()
                    }
                };

                for grad in &grads {
                    progress.epoch_loss += grad.loss;
                    progress.n_examples += 1.0;
                    apply_gradients(model, grad, self.params.learning_rate);
                }

            }

            last_loss = progress.mean_loss();
            if self.params.progress_verbose {
                info!("epoch {} over {} sampled tokens ({} skipped), loss {}, took {} ms",
                    epoch, sample_n, progress.n_skipped, last_loss, timer.elapsed().as_millis());
            } else {
                debug!("epoch {} loss {}", epoch, last_loss);
            }

        }

        Ok(last_loss)
    }

    fn prepare_batch(&mut self,
        model: &Lda2Vec,
        batch: &[usize],
        flattened: &Array1<i64>,
        categorical_features: &[&Array1<i64>],
        targets: &[Option<Array1<f32>>],
        progress: &mut EpochProgress,
    ) -> Vec<Example> {

        let n = flattened.len();
        let window = self.params.window_size;
        let k = self.params.negative_samples;
        let dropout = model.dropout();
        let keep = Bernoulli::new(1.0 - dropout as f64).expect("dropout was validated on construction");

        let mut examples: Vec<Example> = Vec::with_capacity(batch.len());

        for &pos in batch {

            // window clipped to the document of the pivot, the first label
            // array is the document grouping
            let lo = pos.saturating_sub(window);
            let hi = (pos + window).min(n - 1);
            let mut contexts: Vec<usize> = Vec::new();
            for j in lo..=hi {
                if j == pos {
                    continue;
                }
                if let Some(docs) = categorical_features.first() {
                    if docs[j] != docs[pos] {
                        continue;
                    }
                }
                contexts.push(flattened[j] as usize);
            }

            if contexts.is_empty() {
                progress.n_skipped += 1;
                continue;
            }

            let negatives: Vec<usize> = (0..contexts.len() * k)
                .map(|_| self.negative_table.sample(&mut self.rng))
                .collect();

            let mask: Vec<f32> = if dropout > 0.0 {
                let scale = 1.0 / (1.0 - dropout);
                (0..model.n_hidden())
                    .map(|_| if keep.sample(&mut self.rng) { scale } else { 0.0 })
                    .collect()
            } else {
                vec![1.0; model.n_hidden()]
            };

            let categories: Vec<usize> = categorical_features.iter().map(|labels| labels[pos] as usize).collect();
            let example_targets: Vec<Option<f32>> = if targets.is_empty() {
                vec![None; categorical_features.len()]
            } else {
                targets.iter().map(|t| t.as_ref().map(|t| t[pos])).collect()
            };

            examples.push(Example {
                pivot: flattened[pos] as usize,
                contexts: contexts,
                negatives: negatives,
                categories: categories,
                mask: mask,
                targets: example_targets,
            });

        }

        examples
    }

}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// skip gram with negative sampling, where the context vector is the dropout
// masked pivot word vector plus the document topic mixture of every attached
// feature. everything here reads the model, updates happen in apply_gradients.
fn compute_gradients(model: &Lda2Vec, example: &Example, negative_samples: usize) -> ExampleGrad {

    let n_hidden = model.n_hidden();
    let mask = Array1::from_vec(example.mask.clone());
    let masked_pivot = &model.word_vectors.slice(s![example.pivot, ..]).to_owned() * &mask;

    // per feature softmaxed mixtures and their blended topic vectors
    let mixtures: Vec<Array1<f32>> = model.features().iter().zip(&example.categories)
        .map(|(feature, cat)| feature.topic_mixture(*cat))
        .collect();

    let mut context_vec = masked_pivot.clone();
    for (feature, mixture) in model.features().iter().zip(&mixtures) {
        context_vec.add_assign(&mixture.dot(&feature.topic_vectors));
    }

    let mut loss = 0.0;
    let mut g_context: Array1<f32> = Array1::zeros(n_hidden);
    let mut ctx_grads: Vec<(usize, Array1<f32>)> = Vec::with_capacity(example.contexts.len() * (1 + negative_samples));

    const EPS: f32 = 1e-10;

    for (c, &target_word) in example.contexts.iter().enumerate() {

        let out = model.context_vectors.slice(s![target_word, ..]);
        let p = sigmoid(context_vec.dot(&out));
        loss += -(p.max(EPS)).ln();
        let coef = p - 1.0;
        g_context.add_assign(&(&out * coef));
        ctx_grads.push((target_word, &context_vec * coef));

        for neg in 0..negative_samples {
            let negative_word = example.negatives[c * negative_samples + neg];
            let out = model.context_vectors.slice(s![negative_word, ..]);
            let p = sigmoid(context_vec.dot(&out));
            loss += -((1.0 - p).max(EPS)).ln();
            g_context.add_assign(&(&out * p));
            ctx_grads.push((negative_word, &context_vec * p));
        }

    }

    let pivot_grad = &g_context * &mask;

    let mut feature_grads: Vec<FeatureGrad> = Vec::with_capacity(model.features().len());
    for ((feature, mixture), (category, target)) in model.features().iter().zip(&mixtures)
        .zip(example.categories.iter().zip(&example.targets)) {

        // gradient reaching the mixture, through the blended topic vector
        let mut s = feature.topic_vectors.dot(&g_context);

        let head_grad = match (&feature.head, target) {
            (Some(head), Some(y)) => {
                let prediction = head.weights.dot(mixture) + head.bias;
                let err = prediction - y;
                loss += err * err;
                s.add_assign(&(&head.weights * (2.0 * err)));
                Some((mixture * (2.0 * err), 2.0 * err))
            },
            _ => None
        };

        // softmax jacobian folds s into the unnormalized weights row
        let inner = mixture.dot(&s);
        let weight_grad = mixture * &(&s - inner);

        feature_grads.push(FeatureGrad {
            category: *category,
            mixture: mixture.clone(),
            g_context: g_context.clone(),
            weight_grad: weight_grad,
            head_grad: head_grad,
        });

    }

    ExampleGrad {
        loss: loss,
        pivot: example.pivot,
        pivot_grad: pivot_grad,
        ctx_grads: ctx_grads,
        feature_grads: feature_grads,
    }
}

// adagrad row update, divide by the accumulated squares then accumulate
fn adagrad_row(matrix: &mut Array2<f32>, accumulator: &mut Array2<f32>, row: usize, grad: &Array1<f32>, learning_rate: f32) {

    let denom = accumulator.slice(s![row, ..]).mapv(f32::sqrt);
    let update = grad / &denom * learning_rate;
    matrix.slice_mut(s![row, ..]).sub_assign(&update);
    accumulator.slice_mut(s![row, ..]).add_assign(&(grad * grad));
}

fn apply_gradients(model: &mut Lda2Vec, grad: &ExampleGrad, learning_rate: f32) {

    adagrad_row(&mut model.word_vectors, &mut model.ag_word, grad.pivot, &grad.pivot_grad, learning_rate);

    for (row, g) in &grad.ctx_grads {
        adagrad_row(&mut model.context_vectors, &mut model.ag_context, *row, g, learning_rate);
    }

    for (feature, fg) in model.features.iter_mut().zip(&grad.feature_grads) {

        // the topic matrix gradient is rank one, expand it row by row
        for topic in 0..feature.n_topics {
            let row_grad = &fg.g_context * fg.mixture[topic];
            adagrad_row(&mut feature.topic_vectors, &mut feature.ag_topic_vectors, topic, &row_grad, learning_rate);
        }

        adagrad_row(&mut feature.weights, &mut feature.ag_weights, fg.category, &fg.weight_grad, learning_rate);

        if let (Some(head), Some((gw, gb))) = (&mut feature.head, &fg.head_grad) {
            let denom = head.ag_weights.mapv(f32::sqrt);
            head.weights.sub_assign(&(gw / &denom * learning_rate));
            head.ag_weights.add_assign(&(gw * gw));
            head.bias -= learning_rate * gb / head.ag_bias.sqrt();
            head.ag_bias += gb * gb;
        }

    }

}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::config::ComputeDevice;
    use crate::model::LossType;
    use ndarray::array;

    fn toy_params(seed: u64) -> TrainParams {
        TrainParams {
            n_hidden: 8,
            n_topic_stories: 4,
            n_topic_authors: 4,
            n_topic_times: 2,
            dropout: 0.2,
            n_iterations: 1,
            epochs_per_iteration: 1,
            fraction: 1.0,
            window_size: 2,
            negative_samples: 2,
            learning_rate: 0.05,
            batch_size: 2,
            top_words: 3,
            seed: Some(seed),
            progress_verbose: false,
        }
    }

    fn toy_model() -> Lda2Vec {
        let mut model = Lda2Vec::new(3, 8, vec![2, 4, 2], 0.2).unwrap();
        model.add_categorical_feature_with_loss(2, 4, "story_id", LossType::MeanSquaredError).unwrap();
        model.add_categorical_feature_with_loss(2, 4, "author_id", LossType::MeanSquaredError).unwrap();
        model.add_categorical_feature(1, 2, "time_id").unwrap();
        model.finalize().unwrap();
        model
    }

    fn toy_stream() -> (Array1<i64>, [Array1<i64>; 3]) {
        let flattened = array![0, 1, 2, 1, 0, 2, 1, 1];
        let story_id = array![0, 0, 0, 0, 1, 1, 1, 1];
        let author_id = array![0, 0, 0, 0, 1, 1, 1, 1];
        let time_id = array![0, 0, 0, 0, 0, 0, 0, 0];
        (flattened, [story_id, author_id, time_id])
    }

    #[test]
    fn fit_changes_weights_test() {

        let mut model = toy_model();
        let before = model.word_vectors.clone();

        let (flattened, labels) = toy_stream();
        let label_refs: Vec<&Array1<i64>> = labels.iter().collect();

        let mut trainer = Trainer::new(&toy_params(7), ComputeDevice::SingleThread, model.counts()).unwrap();
        let loss = trainer.fit(&mut model, &flattened, &label_refs, &[]).unwrap();

        assert!(loss.is_finite());
        assert!(loss > 0.0);
        assert_ne!(before, model.word_vectors);

    }

    #[test]
    fn fit_requires_finalize_test() {

        let mut model = Lda2Vec::new(3, 8, vec![2, 4, 2], 0.2).unwrap();
        model.add_categorical_feature(2, 4, "story_id").unwrap();
        model.add_categorical_feature(2, 4, "author_id").unwrap();
        model.add_categorical_feature(1, 2, "time_id").unwrap();

        let (flattened, labels) = toy_stream();
        let label_refs: Vec<&Array1<i64>> = labels.iter().collect();

        let mut trainer = Trainer::new(&toy_params(7), ComputeDevice::SingleThread, model.counts()).unwrap();
        assert!(trainer.fit(&mut model, &flattened, &label_refs, &[]).is_err());

    }

    #[test]
    fn fit_rejects_misaligned_inputs_test() {

        let mut model = toy_model();
        let (flattened, labels) = toy_stream();

        // wrong number of label arrays
        let short: Vec<&Array1<i64>> = labels.iter().take(2).collect();
        let mut trainer = Trainer::new(&toy_params(7), ComputeDevice::SingleThread, model.counts()).unwrap();
        assert!(trainer.fit(&mut model, &flattened, &short, &[]).is_err());

        // label array of the wrong length
        let bad = array![0, 0];
        let label_refs: Vec<&Array1<i64>> = vec![&labels[0], &labels[1], &bad];
        assert!(trainer.fit(&mut model, &flattened, &label_refs, &[]).is_err());

        // empty stream
        let empty: Array1<i64> = array![];
        let empty_labels: Vec<&Array1<i64>> = vec![&empty, &empty, &empty];
        assert!(trainer.fit(&mut model, &empty, &empty_labels, &[]).is_err());

    }

    #[test]
    fn seeded_fit_is_deterministic_test() {

        let model = toy_model();
        let (flattened, labels) = toy_stream();
        let label_refs: Vec<&Array1<i64>> = labels.iter().collect();

        let mut a = model.clone();
        let mut trainer = Trainer::new(&toy_params(11), ComputeDevice::SingleThread, a.counts()).unwrap();
        let loss_a = trainer.fit(&mut a, &flattened, &label_refs, &[]).unwrap();

        let mut b = model.clone();
        let mut trainer = Trainer::new(&toy_params(11), ComputeDevice::SingleThread, b.counts()).unwrap();
        let loss_b = trainer.fit(&mut b, &flattened, &label_refs, &[]).unwrap();

        assert_eq!(loss_a, loss_b);
        assert_eq!(a.word_vectors, b.word_vectors);
        assert_eq!(a.context_vectors, b.context_vectors);
        assert_eq!(a.features[0].weights, b.features[0].weights);

    }

    #[test]
    fn supervised_head_moves_only_with_targets_test() {

        let mut model = toy_model();
        let (flattened, labels) = toy_stream();
        let label_refs: Vec<&Array1<i64>> = labels.iter().collect();

        let head_before = model.features[0].head.as_ref().unwrap().weights.clone();

        // no targets supplied, the heads stay put
        let mut trainer = Trainer::new(&toy_params(3), ComputeDevice::SingleThread, model.counts()).unwrap();
        trainer.fit(&mut model, &flattened, &label_refs, &[]).unwrap();
        assert_eq!(head_before, model.features[0].head.as_ref().unwrap().weights);

        // a score like target per token drives the story head
        let score = Array1::from_elem(flattened.len(), 1.5);
        let targets = vec![Some(score), None, None];
        trainer.fit(&mut model, &flattened, &label_refs, &targets).unwrap();
        assert_ne!(head_before, model.features[0].head.as_ref().unwrap().weights);

    }

    #[test]
    fn isolated_tokens_are_skipped_test() {

        // every token is its own document, no window survives the clipping
        let mut model = Lda2Vec::new(3, 8, vec![2, 4, 2], 0.2).unwrap();
        model.add_categorical_feature(4, 4, "story_id").unwrap();
        model.add_categorical_feature(2, 4, "author_id").unwrap();
        model.add_categorical_feature(1, 2, "time_id").unwrap();
        model.finalize().unwrap();

        let flattened = array![0, 1, 2, 1];
        let story_id = array![0, 1, 2, 3];
        let author_id = array![0, 1, 0, 1];
        let time_id = array![0, 0, 0, 0];
        let label_refs: Vec<&Array1<i64>> = vec![&story_id, &author_id, &time_id];

        let before = model.word_vectors.clone();
        let mut trainer = Trainer::new(&toy_params(5), ComputeDevice::SingleThread, model.counts()).unwrap();
        let loss = trainer.fit(&mut model, &flattened, &label_refs, &[]).unwrap();

        assert_eq!(loss, 0.0);
        assert_eq!(before, model.word_vectors);

    }

}
