//! `translator <source> <target>`: translate a source program into a JSON
//! program image.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Translate Forth-like source into a program image")]
struct Args {
    /// Source program (UTF-8 text)
    source: PathBuf,
    /// Where to write the image JSON
    target: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let source = fs::read_to_string(&args.source)?;
    let image = stackforge::translator::translate(&source)?;
    fs::write(&args.target, image.to_json()?)?;

    println!(
        "source LoC: {} code instr: {}",
        source.lines().count(),
        image.code.len()
    );
    Ok(())
}
