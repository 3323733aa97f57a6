/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info, LevelFilter};

use fstress::args::Args;
use fstress::config::Config;
use fstress::runner::Runner;

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_logger() {
        eprintln!("failed to init logger: {:?}", err);
        return ExitCode::FAILURE;
    }
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:?}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<bool> {
    info!("read configuration");
    let config = Config::from_args(&args)?;
    let runner = Runner::create(config, Path::new(&args.testdir))?;
    let report = runner.run()?;
    Ok(report.clean)
}

/// `log4rs.yml` next to the binary wins; without it, a plain console
/// appender at INFO.
fn init_logger() -> anyhow::Result<()> {
    if Path::new("log4rs.yml").exists() {
        log4rs::init_file("log4rs.yml", Default::default())
            .with_context(|| "failed to init logger")?;
        return Ok(());
    }
    use log4rs::append::console::ConsoleAppender;
    use log4rs::config::{Appender, Config as LogConfig, Root};
    use log4rs::encode::pattern::PatternEncoder;
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {m}{n}",
        )))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .with_context(|| "failed to build logger config")?;
    log4rs::init_config(config).with_context(|| "failed to init logger")?;
    Ok(())
}
