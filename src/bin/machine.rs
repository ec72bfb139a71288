//! `machine <image> <input>`: execute a program image and print its output
//! followed by the instruction and tick counters.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stackforge::isa::Image;
use stackforge::machine::run_image;

#[derive(Parser, Debug)]
#[command(version, about = "Run a program image on the stack machine")]
struct Args {
    /// Program image (JSON)
    image: PathBuf,
    /// Input fed to the read port, one character per read
    input: PathBuf,
    /// Stop after this many instructions
    #[arg(long, default_value_t = 10_000_000)]
    limit: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let image = Image::from_json(&fs::read_to_string(&args.image)?)?;
    let input = fs::read_to_string(&args.input)?;

    let report = run_image(&image, &input, args.limit)?;

    println!("{}", report.output);
    println!(
        "instr_counter: {} ticks: {}",
        report.instr_count, report.ticks
    );
    Ok(())
}
