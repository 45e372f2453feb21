use std::path::PathBuf;

use clap::ArgMatches;

use optical_speech::dataset::TableReader;
use optical_speech::util::array_helpers;

pub fn dataset_info(args: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let filepath = match args.get_one::<String>("Data") {
        Some(path) => PathBuf::from(path),
        None => crate::load_config(args)?.dataset_path,
    };

    let table = TableReader::open(&filepath)?;
    let header = table.header();

    println!("Dataset : {}", filepath.display());
    println!("Classes : {}", header.training_classes.join(", "));
    println!("Sample shape : {:?}", header.sample_shape());
    println!("Dataset length : {}", table.sample_count());

    if let Some(show_n) = args.get_one::<usize>("ShowN") {
        let n = (*show_n).min(table.sample_count());
        let indices: Vec<usize> = (0..n).collect();
        let (x, y) = table.read_rows(&indices)?;

        for (idx, (row, label)) in x.outer_iter().zip(y.outer_iter()).enumerate() {
            let class_idx = label.iter().position(|v| *v == 1);
            let class = class_idx
                .and_then(|i| header.training_classes.get(i))
                .map(String::as_str)
                .unwrap_or("?");

            println!(
                "#{} : {} {:?} | max pixel {}",
                idx,
                class,
                label.to_vec(),
                array_helpers::max(&row)
            );
        }
    }

    Ok(())
}
