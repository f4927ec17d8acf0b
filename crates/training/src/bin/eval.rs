use clap::Parser;
use training::{run_eval, EvalArgs};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = EvalArgs::parse();
    run_eval(args)
}
