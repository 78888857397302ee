use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use bowsvm::Opts;
use bowsvm::cli::SubCommandExtend;
use bowsvm::config::SubCommand;

fn main() -> Result<()> {
    let opts = Opts::parse();
    let level = if opts.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts),
        SubCommand::Train(config) => config.run(&opts),
        SubCommand::Test(config) => config.run(&opts),
        SubCommand::Show(config) => config.run(&opts),
        SubCommand::Export(config) => config.run(&opts),
    }
}
