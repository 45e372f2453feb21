use log::{info, warn};

use clap::ArgMatches;

use optical_speech::prelude::*;

/// Turns the configured class directories into the dataset file
pub fn process(args: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = crate::load_config(args)?;
    let osr = OpticalSpeechRecognizer::new(cfg)?;

    let summary = osr.process_training_data()?;

    info!(
        "Wrote {} samples for classes {:?}",
        summary.sample_count, summary.classes
    );

    for skipped in summary.skipped.iter() {
        warn!("Skipped video without usable frames : {}", skipped.display());
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
