//! The stack-machine emulator: data path plus microcoded control unit.

pub mod signals;

pub mod control;
pub mod datapath;

pub use control::{ControlUnit, MachineFault, RunReport, StopReason};
pub use datapath::DataPath;

use crate::isa::Image;

/// Load an image and run it against the given input with an instruction
/// limit. Convenience wrapper wiring [`DataPath`] and [`ControlUnit`].
pub fn run_image(image: &Image, input: &str, limit: u64) -> Result<RunReport, MachineFault> {
    let data_path = DataPath::new(image.data_words(), input);
    let mut control_unit = ControlUnit::new(image.code.clone(), data_path);
    control_unit.run(limit)
}
