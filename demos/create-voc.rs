use bovw::{io::load_labeled_images, train, LabelEncoder, PipelineConfig, Sift, TrainedVocabulary};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load training images, labeled by subdirectory name
    let (images, labels) = load_labeled_images("data/train", &|done: usize, total: usize| {
        if done % 100 == 0 || done == total {
            println!("Loaded {}/{} images", done, total);
        }
    })
    .unwrap();

    // Extract SIFT descriptors, build the vocabulary and encode the training set
    let config = PipelineConfig::default();
    let out = train(&images, labels, &Sift::default(), &config, &bovw::NoProgress).unwrap();
    println!("\nVocabulary = {:#?}", out.vocabulary.vocabulary());
    println!("Training features: {} x {}", out.features.n_rows(), out.k);

    let (encoder, codes) = LabelEncoder::fit_transform(&out.labels);
    println!("Classes: {:?}", encoder.classes());

    // Save vocab and features, then load the vocab again just for fun
    std::fs::create_dir_all("vocabs").unwrap();
    out.vocabulary.save("vocabs/train.voc").unwrap();
    out.features.save("vocabs/train.features").unwrap();
    encoder.save(&codes, "vocabs/train.labels").unwrap();
    let loaded_voc = TrainedVocabulary::load("vocabs/train.voc").unwrap();

    // Make sure save & load worked
    assert_eq!(out.vocabulary, loaded_voc);
}
