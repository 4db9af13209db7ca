use std::path::PathBuf;

use clap::Parser;
use trellis::{from_files_to_files, DecodeError, Device};

#[derive(Debug, Parser)]
#[command(name = "decode")]
#[command(about = "Decode time-varying categorical distributions to state index sequences")]
struct Args {
    /// Tensor files holding (frames, states) observations.
    #[arg(long = "input_files", num_args = 1.., required = true)]
    input_files: Vec<PathBuf>,
    /// Where to write each decoded index sequence; one per input file.
    #[arg(long = "output_files", num_args = 1.., required = true)]
    output_files: Vec<PathBuf>,
    /// Transition tensor file of shape (states, states); uniform when absent.
    #[arg(long = "transition_file")]
    transition_file: Option<PathBuf>,
    /// Initial distribution tensor file of shape (states,); uniform when absent.
    #[arg(long = "initial_file")]
    initial_file: Option<PathBuf>,
    /// Treat all inputs as natural-log scores instead of probabilities.
    #[arg(long = "log_probs")]
    log_probs: bool,
    /// GPU index to decode on; CPU when absent.
    #[arg(long)]
    gpu: Option<usize>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), DecodeError> {
    let args = Args::parse();
    let device = match args.gpu {
        Some(index) => Device::Gpu(index),
        None => Device::Cpu,
    };
    from_files_to_files(
        &args.input_files,
        &args.output_files,
        args.transition_file.as_deref(),
        args.initial_file.as_deref(),
        args.log_probs,
        device,
    )
}
