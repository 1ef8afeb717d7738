

use crate::config::files_handling::{self, SaveFile};
use crate::corpus::doc_lengths;
use crate::model::{softmax, Lda2Vec};

use log::info;
use ndarray::prelude::*;
use ndarray_npy::NpzWriter;
use std::error::Error;
use std::fs::File;

// per feature bundle of topic-word and category-topic associations, shaped
// for an offline pyLDAvis style rendering. the word strings themselves stay
// in the vocab artifact.
#[derive(Clone, Debug, PartialEq)]
pub struct TopicsPayload {
    pub name: String,
    pub topic_term_dists: Array2<f32>,
    pub doc_topic_dists: Array2<f32>,
    pub doc_lengths: Array1<i64>,
    pub term_frequency: Array1<i64>,
}

impl TopicsPayload {

    pub fn file_name(&self) -> String {
        format!("topics.{}.pyldavis.npz", self.name)
    }

}

impl SaveFile for TopicsPayload {
    type Error = Box<dyn Error>;
    fn save_file(&self, output_dir: &str, file_name: &str) -> Result<(), Self::Error> {

        let out = output_dir.to_string() + "/" + file_name;
        let mut npz = NpzWriter::new_compressed(File::create(out)?);

        npz.add_array("topic_term_dists", &self.topic_term_dists)?;
        npz.add_array("doc_topic_dists", &self.doc_topic_dists)?;
        npz.add_array("doc_lengths", &self.doc_lengths)?;
        npz.add_array("term_frequency", &self.term_frequency)?;
        npz.finish()?;

        return Ok(())
    }
}

impl Lda2Vec {

    // read only summary of one categorical feature. both distributions are
    // softmaxed rows, so every row sums to one.
    pub fn prepare_topics(&self, name: &str, doc_lengths: &Array1<i64>) -> Result<TopicsPayload, Box<dyn Error>> {

        if !self.is_finalized() {
            return Err(format!("model must be finalized before preparing topics").into());
        }

        let feature = self.feature(name)?;
        if doc_lengths.len() != feature.n_categories {
            return Err(format!("got {} document lengths for {} categories of {}",
                doc_lengths.len(), feature.n_categories, name).into());
        }

        let mut topic_term_dists = Array2::zeros((feature.n_topics, self.n_words()));
        for topic in 0..feature.n_topics {
            let scores = self.topic_word_scores(feature, topic);
            topic_term_dists.slice_mut(s![topic, ..]).assign(&softmax(scores.view()));
        }

        let mut doc_topic_dists = Array2::zeros((feature.n_categories, feature.n_topics));
        for category in 0..feature.n_categories {
            doc_topic_dists.slice_mut(s![category, ..]).assign(&feature.topic_mixture(category));
        }

        let term_frequency: Array1<i64> = self.counts().iter().map(|c| *c as i64).collect();

        Ok( TopicsPayload {
            name: name.to_string(),
            topic_term_dists: topic_term_dists,
            doc_topic_dists: doc_topic_dists,
            doc_lengths: doc_lengths.clone(),
            term_frequency: term_frequency,
        } )
    }

}

// after training, one payload file per categorical feature, labels aligned
// with the features in attachment order
pub fn export_topics(model: &Lda2Vec, categorical_features: &[&Array1<i64>], output_dir: &str) -> Result<Vec<String>, Box<dyn Error>> {

    if categorical_features.len() != model.features().len() {
        return Err(format!("got {} label arrays for {} categorical features",
            categorical_features.len(), model.features().len()).into());
    }

    let mut saved: Vec<String> = Vec::new();
    for (feature, labels) in model.features().iter().zip(categorical_features) {

        let lengths = doc_lengths(labels, feature.n_categories);
        let payload = model.prepare_topics(&feature.name, &lengths)?;
        let file_name = payload.file_name();

        files_handling::save_output::<TopicsPayload>(output_dir, &file_name, &payload)?;
        info!("saved topic payload {}", file_name);
        saved.push(file_name);
    }

    Ok(saved)
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::model::LossType;
    use ndarray::array;
    use ndarray_npy::NpzReader;
    use std::env;
    use std::fs;

    fn toy_model() -> Lda2Vec {
        let mut model = Lda2Vec::new(3, 8, vec![2, 4, 2], 0.2).unwrap();
        model.add_categorical_feature_with_loss(2, 4, "story_id", LossType::MeanSquaredError).unwrap();
        model.add_categorical_feature_with_loss(2, 4, "author_id", LossType::MeanSquaredError).unwrap();
        model.add_categorical_feature(1, 2, "time_id").unwrap();
        model.finalize().unwrap();
        model
    }

    fn read_f32(npz: &mut NpzReader<fs::File>, name: &str) -> Array2<f32> {
        match npz.by_name(name) {
            Ok(arr) => arr,
            Err(_) => npz.by_name(&format!("{}.npy", name)).unwrap()
        }
    }

    fn read_i64(npz: &mut NpzReader<fs::File>, name: &str) -> Array1<i64> {
        match npz.by_name(name) {
            Ok(arr) => arr,
            Err(_) => npz.by_name(&format!("{}.npy", name)).unwrap()
        }
    }

    #[test]
    fn payload_shapes_and_rows_sum_to_one_test() {

        let model = toy_model();
        let lengths = array![2, 2];
        let payload = model.prepare_topics("story_id", &lengths).unwrap();

        assert_eq!(payload.topic_term_dists.dim(), (4, 3));
        assert_eq!(payload.doc_topic_dists.dim(), (2, 4));
        assert_eq!(payload.doc_lengths, lengths);
        assert_eq!(payload.term_frequency, array![2, 4, 2]);

        for row in payload.topic_term_dists.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        for row in payload.doc_topic_dists.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }

    }

    #[test]
    fn prepare_topics_is_idempotent_test() {

        // two exports with no training in between are identical
        let model = toy_model();
        let lengths = array![2, 2];

        let first = model.prepare_topics("story_id", &lengths).unwrap();
        let second = model.prepare_topics("story_id", &lengths).unwrap();
        assert_eq!(first, second);

    }

    #[test]
    fn prepare_topics_rejects_bad_inputs_test() {

        let model = toy_model();
        assert!(model.prepare_topics("tag_id", &array![2, 2]).is_err());
        assert!(model.prepare_topics("story_id", &array![2, 2, 2]).is_err());

        let mut building = Lda2Vec::new(3, 8, vec![2, 4, 2], 0.2).unwrap();
        building.add_categorical_feature(2, 4, "story_id").unwrap();
        assert!(building.prepare_topics("story_id", &array![2, 2]).is_err());

    }

    #[test]
    fn export_roundtrip_test() {

        let dir = env::temp_dir().join("topic_trainer_export_roundtrip");
        fs::create_dir_all(&dir).unwrap();
        let dir = dir.to_str().unwrap().to_string();

        let model = toy_model();
        let story_id = array![0, 0, 1, 1];
        let author_id = array![0, 1, 0, 1];
        let time_id = array![0, 0, 0, 0];
        let labels: Vec<&Array1<i64>> = vec![&story_id, &author_id, &time_id];

        let saved = export_topics(&model, &labels, &dir).unwrap();
        assert_eq!(saved, vec![
            "topics.story_id.pyldavis.npz".to_string(),
            "topics.author_id.pyldavis.npz".to_string(),
            "topics.time_id.pyldavis.npz".to_string(),
        ]);

        // what was written is what prepare_topics said
        let expected = model.prepare_topics("story_id", &array![2, 2]).unwrap();
        let mut npz = NpzReader::new(fs::File::open(dir.clone() + "/topics.story_id.pyldavis.npz").unwrap()).unwrap();

        assert_eq!(read_f32(&mut npz, "topic_term_dists"), expected.topic_term_dists);
        assert_eq!(read_f32(&mut npz, "doc_topic_dists"), expected.doc_topic_dists);
        assert_eq!(read_i64(&mut npz, "doc_lengths"), expected.doc_lengths);
        assert_eq!(read_i64(&mut npz, "term_frequency"), expected.term_frequency);

    }

    #[test]
    fn export_rejects_misaligned_labels_test() {

        let dir = env::temp_dir().join("topic_trainer_export_misaligned");
        fs::create_dir_all(&dir).unwrap();

        let model = toy_model();
        let story_id = array![0, 0, 1, 1];
        let labels: Vec<&Array1<i64>> = vec![&story_id];

        assert!(export_topics(&model, &labels, dir.to_str().unwrap()).is_err());

    }

}
