

use serde_json::Value;
use std::error::Error;
use std::fmt::Display;
use std::fs;
use std::thread;

#[derive(Clone, Debug)]
pub struct TrainParams {
    pub n_hidden: usize,
    pub n_topic_stories: usize,
    pub n_topic_authors: usize,
    pub n_topic_times: usize,
    pub dropout: f32,
    pub n_iterations: usize,
    pub epochs_per_iteration: usize,
    pub fraction: f64,
    pub window_size: usize,
    pub negative_samples: usize,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub top_words: usize,
    pub seed: Option<u64>,
    pub progress_verbose: bool,
}

impl Display for TrainParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "training hyper parameters:
        n_hidden: {},
        n_topic_stories: {},
        n_topic_authors: {},
        n_topic_times: {},
        dropout: {},
        n_iterations: {},
        epochs_per_iteration: {},
        fraction: {},
        window_size: {},
        negative_samples: {},
        learning_rate: {},
        batch_size: {},
        top_words: {},
        seed: {:?},
        progress_verbose: {}",
        self.n_hidden, self.n_topic_stories, self.n_topic_authors, self.n_topic_times,
        self.dropout, self.n_iterations, self.epochs_per_iteration, self.fraction,
        self.window_size, self.negative_samples, self.learning_rate, self.batch_size,
        self.top_words, self.seed, self.progress_verbose
        )
    }
}

#[derive(Clone, Debug)]
pub struct Params {
    pub data_dir: String,
    pub output_dir: String,
    pub num_threads: usize,
    pub train: TrainParams,
}

impl Display for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        data_dir: {}
        output_dir: {}
        num_threads: {},
        Using training hyper-params: {}",
        self.data_dir, self.output_dir, self.num_threads, self.train)
    }
}

pub struct Config {
    params: Params,
}

impl Config {

    pub fn get_params(&self) -> Params {
        return self.params.clone()
    }

    // the configuration is an optional json file. every field has a default,
    // running with no arguments trains with the stock hyper parameters on
    // artifacts in the current directory.
    pub fn new(args: &[String]) -> Result<Config, Box<dyn Error>> {

        if args.len() > 2 {
            return Err(format!("input should be a path to a json file at most").into());
        }

        let json: Value = match args.get(1) {
            Some(path) => {
                let f = fs::File::open(path)?;
                serde_json::from_reader(f)?
            },
            None => Value::Object(serde_json::Map::new())
        };

        // handle default vs input parameters
        let data_dir = match json.get("data_dir") {
            Some(data_dir) => data_dir.as_str().expect("panic since given data_dir is not a string").to_owned(),
            None => ".".to_string()
        };
        let output_dir = match json.get("output_dir") {
            Some(output_dir) => output_dir.as_str().expect("panic since given output_dir is not a string").to_owned(),
            None => ".".to_string()
        };
        let n_hidden = match json.get("n_hidden") {
            Some(n_hidden) => n_hidden.as_i64().expect("panic since given n_hidden is not numeric"),
            None => 300
        };
        let n_topic_stories = match json.get("n_topic_stories") {
            Some(n) => n.as_i64().expect("panic since given n_topic_stories is not numeric"),
            None => 30
        };
        let n_topic_authors = match json.get("n_topic_authors") {
            Some(n) => n.as_i64().expect("panic since given n_topic_authors is not numeric"),
            None => 30
        };
        let n_topic_times = match json.get("n_topic_times") {
            Some(n) => n.as_i64().expect("panic since given n_topic_times is not numeric"),
            None => 30
        };
        let dropout = match json.get("dropout") {
            Some(dropout) => dropout.as_f64().expect("panic since given dropout is not numeric"),
            None => 0.2
        };
        let n_iterations = match json.get("n_iterations") {
            Some(n) => n.as_i64().expect("panic since given n_iterations is not numeric"),
            None => 200
        };
        let epochs_per_iteration = match json.get("epochs_per_iteration") {
            Some(n) => n.as_i64().expect("panic since given epochs_per_iteration is not numeric"),
            None => 1
        };
        let fraction = match json.get("fraction") {
            Some(fraction) => fraction.as_f64().expect("panic since given fraction is not numeric"),
            None => 1e-3
        };
        let window_size = match json.get("window_size") {
            Some(window_size) => window_size.as_i64().expect("panic since given window_size is not numeric"),
            None => 5
        };
        let negative_samples = match json.get("negative_samples") {
            Some(n) => n.as_i64().expect("panic since given negative_samples is not numeric"),
            None => 5
        };
        let learning_rate = match json.get("learning_rate") {
            Some(learning_rate) => learning_rate.as_f64().expect("panic since given learning_rate is not numeric"),
            None => 0.05
        };
        let batch_size = match json.get("batch_size") {
            Some(batch_size) => batch_size.as_i64().expect("panic since given batch_size is not numeric"),
            None => 64
        };
        let num_threads = match json.get("num_threads") {
            Some(n) => n.as_i64().expect("panic since given num_threads is not numeric"),
            None => 1
        };
        let top_words = match json.get("top_words") {
            Some(top_words) => top_words.as_i64().expect("panic since given top_words is not numeric"),
            None => 10
        };
        let seed = match json.get("seed") {
            Some(seed) => Some(seed.as_u64().expect("panic since given seed is not numeric")),
            None => None
        };
        let progress_verbose = match json.get("progress_verbose") {
            Some(v) => v.as_bool().expect("panic since given progress_verbose is not boolean"),
            None => false
        };

        let params = Params {
            data_dir: data_dir,
            output_dir: output_dir,
            num_threads: num_threads as usize,
            train: TrainParams {
                n_hidden: n_hidden as usize,
                n_topic_stories: n_topic_stories as usize,
                n_topic_authors: n_topic_authors as usize,
                n_topic_times: n_topic_times as usize,
                dropout: dropout as f32,
                n_iterations: n_iterations as usize,
                epochs_per_iteration: epochs_per_iteration as usize,
                fraction: fraction,
                window_size: window_size as usize,
                negative_samples: negative_samples as usize,
                learning_rate: learning_rate as f32,
                batch_size: batch_size as usize,
                top_words: top_words as usize,
                seed: seed,
                progress_verbose: progress_verbose,
            }
        };

        Ok (
            Self {
                params: params
            }
        )
    }

}

// where computation is placed, decided once at startup and handed to the
// training calls. multi threaded means gradients of a batch are computed
// on a rayon pool, updates stay sequential either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComputeDevice {
    SingleThread,
    MultiThread(usize),
}

impl ComputeDevice {

    pub fn resolve(num_threads: usize) -> ComputeDevice {
        let available = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let n = num_threads.min(available);
        if n <= 1 {
            ComputeDevice::SingleThread
        } else {
            ComputeDevice::MultiThread(n)
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, ComputeDevice::MultiThread(_))
    }

    pub fn install_pool(&self) -> Result<(), Box<dyn Error>> {
        if let ComputeDevice::MultiThread(n) = self {
            rayon::ThreadPoolBuilder::new().num_threads(*n).build_global()?;
        }
        Ok(())
    }

}

impl Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::SingleThread => write!(f, "single thread"),
            ComputeDevice::MultiThread(n) => write!(f, "{} threads", n),
        }
    }
}

pub mod files_handling {

    use std::fs::{self, File};
    use std::io::{BufReader, BufWriter};

    pub fn read_input<R: ReadFile>(file_path: &str) -> Result<<R as ReadFile>::Item, <R as ReadFile>::Error> {
        let input = <R as ReadFile>::read_file(file_path)?;
        Ok(input)
    }

    pub fn save_output<S: SaveFile>(output_dir: &str, file_name: &str, item: &S) -> Result<(), <S as SaveFile>::Error> {

        // create output folder
        if let Err(e) = fs::create_dir_all(output_dir) {
            panic!("{}", e)
        }

        item.save_file(output_dir, file_name)?;
        return Ok(())

    }

    pub trait ReadFile {
        type Error;
        type Item;
        fn read_file(file_path: &str) -> Result<Self::Item, Self::Error>;
    }

    pub trait SaveFile {
        type Error;
        fn save_file(&self, output_dir: &str, file_name: &str) -> Result<(), Self::Error>;
    }

    // the vocabulary artifact, one display string per compact token id
    impl ReadFile for Vec<String> {
        type Error = std::io::Error;
        type Item = Self;
        fn read_file(file_path: &str) -> Result<Self::Item, Self::Error> {
            let f = BufReader::new(File::open(file_path)?);
            let item = serde_json::from_reader(f)?;
            return Ok(item)
        }
    }

    impl SaveFile for Vec<String> {
        type Error = std::io::Error;
        fn save_file(&self, output_dir: &str, file_name: &str) -> Result<(), Self::Error> {
            let out = output_dir.to_string() + "/" + file_name;
            let f = BufWriter::new(File::create(out)?);
            serde_json::to_writer(f, self)?;
            return Ok(())
        }
    }

}


#[cfg(test)]
mod tests {

    use super::{ComputeDevice, Config};

    #[test]
    fn default_params_test() {

        let args = vec!["topic_trainer".to_string()];
        let params = Config::new(&args).unwrap().get_params();

        assert_eq!(params.data_dir, ".");
        assert_eq!(params.train.n_hidden, 300);
        assert_eq!(params.train.n_topic_stories, 30);
        assert_eq!(params.train.n_topic_authors, 30);
        assert_eq!(params.train.n_topic_times, 30);
        assert_eq!(params.train.n_iterations, 200);
        assert_eq!(params.train.epochs_per_iteration, 1);
        assert_eq!(params.train.fraction, 1e-3);
        assert_eq!(params.train.dropout, 0.2);
        assert!(params.train.seed.is_none());

    }

    #[test]
    fn too_many_args_test() {

        let args = vec!["topic_trainer".to_string(), "a.json".to_string(), "b.json".to_string()];
        assert!(Config::new(&args).is_err());

    }

    #[test]
    fn device_resolve_test() {

        // one requested thread is always single threaded placement
        assert_eq!(ComputeDevice::resolve(1), ComputeDevice::SingleThread);
        assert_eq!(ComputeDevice::resolve(0), ComputeDevice::SingleThread);

        // more threads than the machine has are clamped
        let device = ComputeDevice::resolve(1024);
        if let ComputeDevice::MultiThread(n) = device {
            assert!(n <= 1024);
            assert!(n >= 2);
        }

    }

}
