
use env_logger::Env;
use topic_trainer::Pipeline;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    Pipeline::run();
}
