use bovw::{io::load_labeled_images, test, BoWTrait, NoProgress, PipelineConfig, Sift, TrainedVocabulary};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load existing vocabulary
    let voc = TrainedVocabulary::load("vocabs/train.voc").unwrap();
    println!("Vocabulary: {:#?}", voc.vocabulary());

    // Create BoW vectors from the test data, reusing the training vocabulary.
    let (images, labels) = load_labeled_images("data/test", &NoProgress).unwrap();
    let out = test(&images, labels, &voc, &Sift::default(), &PipelineConfig::default(), &NoProgress)
        .unwrap();
    let bows: Vec<_> = out.features.rows().iter().map(BoWTrait::normalized).collect();

    // Match every image to every other image
    for (i, bow1) in bows.iter().enumerate().take(6) {
        let mut scores: Vec<(f32, usize)> = bows
            .iter()
            .enumerate()
            .map(|(j, bow2)| (bow1.l1(bow2), j))
            .collect();

        // Print out the top 5 matches for each image
        println!("\nTop 5 Matches for image {} ({}):", i, out.labels[i]);
        println!("Match      |      Score");
        scores.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        for (score, j) in scores.iter().take(5) {
            println!("{} ({}) | {:.3}", j, out.labels[*j], score);
        }
    }
}
