extern crate optical_speech;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{App, Arg, ArgAction, ArgMatches, Command};

use log::error;

#[cfg(feature = "log_log4rs")]
use log::LevelFilter;
#[cfg(feature = "log_log4rs")]
use log4rs::append::console::ConsoleAppender;
#[cfg(feature = "log_log4rs")]
use log4rs::append::file::FileAppender;
#[cfg(feature = "log_log4rs")]
use log4rs::config::{Appender, Config, Root};
#[cfg(feature = "log_log4rs")]
use log4rs::encode::pattern::PatternEncoder;

#[cfg(all(feature = "log_env_logger", not(feature = "log_log4rs")))]
use env_logger::Env;

use optical_speech::prelude::*;

pub mod dataset_info;
pub mod process;
pub mod train;

#[cfg(feature = "log_log4rs")]
fn init_logger() -> Result<(), Box<dyn std::error::Error>> {
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::default()))
        .build("osr.log")?;

    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::default()))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(
            Root::builder()
                .appender("console")
                .appender("logfile")
                .build(LevelFilter::Info),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}

#[cfg(all(feature = "log_env_logger", not(feature = "log_log4rs")))]
fn init_logger() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    Ok(())
}

#[cfg(not(any(feature = "log_env_logger", feature = "log_log4rs")))]
fn init_logger() -> Result<(), Box<dyn std::error::Error>> {
    Ok(())
}

fn config_arg() -> Arg<'static> {
    Arg::new("Config")
        .long("config")
        .short('c')
        .help("Pipeline configuration yaml file")
        .takes_value(true)
        .require_equals(true)
        .default_value("osr.yaml")
}

/// Loads the pipeline config named by `--config`
pub fn load_config(args: &ArgMatches) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let path = args.get_one::<String>("Config").ok_or(OsrError::WrongArg)?;
    Ok(PipelineConfig::from_file(&PathBuf::from(path))?)
}

/// Stop flag raised by SIGINT, checked by the training loop between batches
pub fn interrupt_flag() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone())?;
    Ok(flag)
}

fn run_pipeline(args: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config(args)?;
    let mut osr = OpticalSpeechRecognizer::new(cfg)?.stop_flag(interrupt_flag()?);

    osr.process_training_data()?;
    osr.generate_model()?;
    osr.model_summary()?;
    osr.train_model()?;
    osr.save_model()?;
    osr.load_model()?;

    Ok(())
}

fn summary(args: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load_config(args)?;
    let mut osr = OpticalSpeechRecognizer::new(cfg)?;

    if osr.config().model_path.exists() {
        osr.load_model()?;
    } else {
        osr.generate_model()?;
    }

    println!("{}", osr.model_summary()?);

    Ok(())
}

fn main() {
    if let Err(e) = init_logger() {
        eprintln!("Couldn't initialize logger : {}", e);
    }

    let matches = App::new("optical speech tool")
        .version("0.1.0")
        .about("Build lip-reading datasets from videos, train and inspect sequence classifiers")
        .subcommand_required(true)
        .subcommand(
            Command::new("process")
                .about("Localize oral regions in the training videos and write the dataset file")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("dataset_info")
                .about("Inspect a dataset file")
                .arg(config_arg())
                .arg(
                    Arg::new("Data")
                        .long("dataset")
                        .short('d')
                        .help("Dataset file, overrides the configured one")
                        .takes_value(true)
                        .require_equals(true),
                )
                .arg(
                    Arg::new("ShowN")
                        .long("show_n")
                        .help("Print labels of the first N rows")
                        .takes_value(true)
                        .require_equals(true)
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("train")
                .about("Train a model on the dataset file and save it")
                .arg(config_arg())
                .arg(
                    Arg::new("Epochs")
                        .long("epochs")
                        .help("Overrides the configured number of epochs")
                        .action(ArgAction::Set)
                        .value_parser(clap::value_parser!(usize))
                        .require_equals(true),
                )
                .arg(
                    Arg::new("BatchSize")
                        .long("batch_size")
                        .help("Overrides the configured batch size")
                        .action(ArgAction::Set)
                        .value_parser(clap::value_parser!(usize))
                        .require_equals(true),
                )
                .arg(
                    Arg::new("ModelState")
                        .short('s')
                        .long("state")
                        .help("Saved model state to continue training from")
                        .takes_value(true)
                        .require_equals(true),
                ),
        )
        .subcommand(
            Command::new("summary")
                .about("Print the model summary")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Process, train, save and reload in one go")
                .arg(config_arg()),
        )
        .get_matches();

    let res = match matches.subcommand() {
        Some(("process", args)) => process::process(args),
        Some(("dataset_info", args)) => dataset_info::dataset_info(args),
        Some(("train", args)) => train::train(args),
        Some(("summary", args)) => summary(args),
        Some(("run", args)) => run_pipeline(args),
        _ => Err(Box::new(OsrError::WrongArg) as Box<dyn std::error::Error>),
    };

    if let Err(e) = res {
        error!("{}", e);
        std::process::exit(1);
    }
}
