use anyhow::{Context, Result};
use bbox::prelude::*;
use clap::{ArgEnum, Parser};
use prettytable::{cell, row, Table};
use rcnn_target::{assign_anchor_targets, assign_proposal_targets, Config, RawBatch, Sample};
use std::{env, path::PathBuf};
use tracing::info;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ArgEnum)]
enum Stage {
    Rpn,
    Roi,
}

#[derive(Debug, Clone, Parser)]
/// Inspect training target assignment of two-stage detectors
enum Opts {
    /// Print the match of every candidate
    Match {
        #[clap(long)]
        /// configuration file
        config: Option<PathBuf>,
        #[clap(long)]
        /// input batch in JSON
        input: PathBuf,
        #[clap(long, arg_enum, default_value = "rpn")]
        stage: Stage,
    },
    /// Run the stage assigner and print per-image statistics
    Assign {
        #[clap(long)]
        /// configuration file
        config: Option<PathBuf>,
        #[clap(long)]
        /// input batch in JSON
        input: PathBuf,
        #[clap(long, arg_enum, default_value = "rpn")]
        stage: Stage,
    },
    /// Print the default configuration
    DefaultConfig,
}

fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    match Opts::parse() {
        Opts::Match {
            config,
            input,
            stage,
        } => {
            let (config, samples) = load(config, input)?;
            print_matches(&config, &samples, stage)?;
        }
        Opts::Assign {
            config,
            input,
            stage,
        } => {
            let (config, samples) = load(config, input)?;
            print_assignment(&config, &samples, stage)?;
        }
        Opts::DefaultConfig => {
            let text = serde_json::to_string_pretty(&Config::default())?;
            println!("{}", text);
        }
    }

    Ok(())
}

fn load(config_file: Option<PathBuf>, input_file: PathBuf) -> Result<(Config, Vec<Sample>)> {
    let config = match config_file {
        Some(path) => Config::open(&path)
            .with_context(|| format!("failed to load config file '{}'", path.display()))?,
        None => Config::default(),
    };
    let batch = RawBatch::open(&input_file)
        .with_context(|| format!("failed to load input file '{}'", input_file.display()))?;
    let samples = batch
        .to_samples()
        .with_context(|| format!("invalid input file '{}'", input_file.display()))?;

    info!("loaded {} images", samples.len());
    Ok((config, samples))
}

fn print_matches(config: &Config, samples: &[Sample], stage: Stage) -> Result<()> {
    let matcher = match stage {
        Stage::Rpn => config.rpn.to_init().matcher.build()?,
        Stage::Roi => config.roi_heads.to_init().matcher.build()?,
    };

    for (image_index, sample) in samples.iter().enumerate() {
        let gt = &sample.ground_truth;
        let output = matcher.match_boxes(&sample.candidates, gt.boxes());

        let labels: Vec<String> = match stage {
            Stage::Rpn => assign_anchor_targets(&output.matches, gt.boxes())?
                .labels
                .into_iter()
                .map(|label| format!("{}", label))
                .collect(),
            Stage::Roi => assign_proposal_targets(&output.matches, gt.classes())?
                .labels
                .into_iter()
                .map(|label| format!("{}", label))
                .collect(),
        };

        println!("image {}", image_index);
        let mut table = Table::new();
        table.add_row(row!["candidate", "box", "match", "max IoU", "label"]);

        sample
            .candidates
            .iter()
            .zip(&output.matches)
            .zip(&output.max_ious)
            .zip(&labels)
            .enumerate()
            .for_each(|(index, (((candidate, matched), max_iou), label))| {
                table.add_row(row![
                    index,
                    format!("{:?}", candidate.xyxy()),
                    format!("{} ({})", matched, matched.to_index()),
                    format!("{:.4}", max_iou),
                    label
                ]);
            });

        table.printstd();
    }

    Ok(())
}

fn print_assignment(config: &Config, samples: &[Sample], stage: Stage) -> Result<()> {
    let mut table = Table::new();

    match stage {
        Stage::Rpn => {
            let assigner = config.rpn.to_init().build()?;
            let targets = assigner.assign_batch(samples, &config.execution)?;

            table.add_row(row![
                "image",
                "anchors",
                "foreground",
                "background",
                "ignored",
                "sampled pos",
                "sampled neg"
            ]);
            targets.iter().enumerate().for_each(|(index, targets)| {
                let output = &targets.match_output;
                table.add_row(row![
                    index,
                    output.len(),
                    output.num_foreground(),
                    output.num_background(),
                    output.num_ignored(),
                    targets.sampled.num_positive(),
                    targets.sampled.num_negative()
                ]);
            });
        }
        Stage::Roi => {
            let assigner = config.roi_heads.to_init().build()?;
            let targets = assigner.assign_batch(samples, &config.execution)?;

            table.add_row(row!["image", "sampled", "positive", "negative", "masks"]);
            targets.iter().enumerate().for_each(|(index, targets)| {
                let num_positive = targets.positive_positions().len();
                let num_masks = targets
                    .mask_targets
                    .as_ref()
                    .map(|masks| format!("{}", masks.len()))
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(row![
                    index,
                    targets.labels.len(),
                    num_positive,
                    targets.labels.len() - num_positive,
                    num_masks
                ]);
            });
        }
    }

    table.printstd();
    Ok(())
}
