use log::info;

use std::path::PathBuf;
use std::time::Instant;

use clap::ArgMatches;

use optical_speech::prelude::*;

/// Trains on the configured dataset file, either from scratch or
/// continuing from `--state`, then saves the model
pub fn train(args: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = crate::load_config(args)?;

    if let Some(epochs) = args.get_one::<usize>("Epochs") {
        info!("Epochs : {}", epochs);
        cfg.epochs = *epochs;
    }

    if let Some(batch_size) = args.get_one::<usize>("BatchSize") {
        info!("Batch size : {}", batch_size);
        cfg.batch_size = *batch_size;
    }

    let model_state = args.get_one::<String>("ModelState").map(PathBuf::from);
    if let Some(state) = model_state.as_ref() {
        cfg.model_path = state.clone();
    }

    let mut osr = OpticalSpeechRecognizer::new(cfg)?.stop_flag(crate::interrupt_flag()?);

    if let Some(state) = model_state {
        info!("Continue training from state : {}", state.display());
        osr.load_model()?;
    } else {
        osr.generate_model()?;
    }

    osr.model_summary()?;

    let now_time = Instant::now();
    let history = osr.train_model()?;

    info!("Elapsed for training : {} ms", now_time.elapsed().as_millis());

    if let Some(last) = history.last() {
        info!(
            "Finished after epoch {} => Accuracy: {} | Loss: {}",
            last.epoch,
            last.accuracy,
            last.loss
        );
    }

    if history.stopped {
        info!("Training was interrupted, saving the model state so far");
    }

    osr.save_model()?;

    Ok(())
}
