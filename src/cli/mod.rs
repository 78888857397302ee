mod build;
mod export;
mod show;
mod train;

pub use build::*;
pub use export::*;
pub use show::*;
pub use test::*;
pub use train::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
