use std::{env, path::PathBuf, process};

use anyhow::Context;
use skelbridge::convert::{ConversionOptions, import_stage, load_options};
use skelbridge::gltf_source::load_stage;
use skelbridge::{ReportList, log_error, log_warn};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        log_error!("{err:#}");
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if !(2..=3).contains(&args.len()) {
        eprintln!("Usage: skelbridge <input.glb|gltf> [options.json]");
        process::exit(2);
    }

    let input = PathBuf::from(&args[1]);
    let options = match args.get(2) {
        Some(path) => {
            let path = PathBuf::from(path);
            load_options(&path)
                .with_context(|| format!("failed to load options: {}", path.display()))?
        }
        None => ConversionOptions::default(),
    };

    let stage = load_stage(&input)?;
    let mut reports = ReportList::new();
    let (_scene, summary) = import_stage(&stage, &options.import, &mut reports);
    if reports.warning_count() > 0 {
        log_warn!(
            "{} finished with {} warnings",
            input.display(),
            reports.warning_count()
        );
    }

    let json = serde_json::to_string_pretty(&summary).context("failed to serialize summary")?;
    println!("{json}");

    Ok(())
}
