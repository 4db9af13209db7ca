//! Tensor-file decode wrappers.
//!
//! Observations, transitions, and initial distributions are read from
//! safetensors containers (memory-mapped, row-major, shape-preserving);
//! decoded index sequences are written back the same way. A file must hold
//! exactly one `F32` tensor; outputs hold a single `U32` tensor named
//! `indices`.

use std::fs::File;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use memmap2::Mmap;
use safetensors::tensor::{Dtype, SafeTensors, TensorView};

use crate::decode::from_probabilities;
use crate::error::DecodeError;
use crate::types::{Device, Observation};

/// How many input files are padded into one decode batch.
const FILE_BATCH: usize = 8;

/// Decode a single `(frames, states)` tensor file and return the indices.
pub fn from_file(
    input_file: &Path,
    transition_file: Option<&Path>,
    initial_file: Option<&Path>,
    log_probs: bool,
    device: Device,
) -> Result<Vec<u32>, DecodeError> {
    let observation = load_rank2(input_file)?;
    let side = SideParams::load(transition_file, initial_file)?;

    let (frames, states) = (observation.shape[0], observation.shape[1]);
    let obs = Observation::single(&observation.data, frames, states)?;
    let decoded = from_probabilities(
        &obs,
        None,
        side.transition(),
        side.initial(),
        log_probs,
        device,
    )?;
    Ok(decoded.into_indices())
}

/// Decode a tensor file and persist the indices.
pub fn from_file_to_file(
    input_file: &Path,
    output_file: &Path,
    transition_file: Option<&Path>,
    initial_file: Option<&Path>,
    log_probs: bool,
    device: Device,
) -> Result<(), DecodeError> {
    let indices = from_file(input_file, transition_file, initial_file, log_probs, device)?;
    save_indices(output_file, &indices)
}

/// Decode a list of tensor files and persist each result.
///
/// Consecutive files are padded into common batches with per-item frame
/// counts, so one kernel launch covers several files. All files must share
/// the same state count.
pub fn from_files_to_files(
    input_files: &[PathBuf],
    output_files: &[PathBuf],
    transition_file: Option<&Path>,
    initial_file: Option<&Path>,
    log_probs: bool,
    device: Device,
) -> Result<(), DecodeError> {
    if input_files.len() != output_files.len() {
        return Err(DecodeError::invalid_argument(format!(
            "{} input files but {} output files",
            input_files.len(),
            output_files.len()
        )));
    }
    let side = SideParams::load(transition_file, initial_file)?;

    let progress = ProgressBar::new(input_files.len() as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );

    for (inputs, outputs) in input_files
        .chunks(FILE_BATCH)
        .zip(output_files.chunks(FILE_BATCH))
    {
        let loaded: Vec<LoadedTensor> =
            inputs.iter().map(|path| load_rank2(path)).collect::<Result<_, _>>()?;

        let states = loaded[0].shape[1];
        if let Some((path, tensor)) = inputs
            .iter()
            .zip(loaded.iter())
            .find(|(_, tensor)| tensor.shape[1] != states)
        {
            return Err(DecodeError::invalid_argument(format!(
                "'{}' has {} states, expected {states} as in '{}'",
                path.display(),
                tensor.shape[1],
                inputs[0].display()
            )));
        }

        let frame_counts: Vec<usize> = loaded.iter().map(|tensor| tensor.shape[0]).collect();
        let max_frames = frame_counts.iter().copied().max().unwrap_or(1);

        // Pad every item to the longest in the chunk; the padding is never
        // read because the decoder honors per-item frame counts.
        let mut scores = vec![0.0f32; loaded.len() * max_frames * states];
        for (b, tensor) in loaded.iter().enumerate() {
            let start = b * max_frames * states;
            scores[start..start + tensor.data.len()].copy_from_slice(&tensor.data);
        }

        let obs = Observation::new(&scores, loaded.len(), max_frames, states)?;
        let decoded = from_probabilities(
            &obs,
            Some(&frame_counts),
            side.transition(),
            side.initial(),
            log_probs,
            device,
        )?;

        tracing::debug!(
            files = inputs.len(),
            max_frames,
            states,
            "decoded file batch"
        );
        for (b, output) in outputs.iter().enumerate() {
            progress.set_message(output.display().to_string());
            save_indices(output, &decoded.row(b)[..frame_counts[b]])?;
            progress.inc(1);
        }
    }
    progress.finish_and_clear();
    Ok(())
}

/// Optional transition/initial distributions loaded from disk.
struct SideParams {
    transition: Option<LoadedTensor>,
    initial: Option<LoadedTensor>,
}

impl SideParams {
    fn load(
        transition_file: Option<&Path>,
        initial_file: Option<&Path>,
    ) -> Result<Self, DecodeError> {
        let transition = transition_file.map(load_rank2).transpose()?;
        let initial = initial_file.map(load_rank1).transpose()?;
        Ok(Self {
            transition,
            initial,
        })
    }

    fn transition(&self) -> Option<&[f32]> {
        self.transition.as_ref().map(|tensor| tensor.data.as_slice())
    }

    fn initial(&self) -> Option<&[f32]> {
        self.initial.as_ref().map(|tensor| tensor.data.as_slice())
    }
}

struct LoadedTensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

fn load_rank2(path: impl AsRef<Path>) -> Result<LoadedTensor, DecodeError> {
    let tensor = load_tensor(path.as_ref())?;
    if tensor.shape.len() != 2 {
        return Err(DecodeError::invalid_argument(format!(
            "'{}' has rank {}, expected a 2-D tensor",
            path.as_ref().display(),
            tensor.shape.len()
        )));
    }
    Ok(tensor)
}

fn load_rank1(path: impl AsRef<Path>) -> Result<LoadedTensor, DecodeError> {
    let tensor = load_tensor(path.as_ref())?;
    if tensor.shape.len() != 1 {
        return Err(DecodeError::invalid_argument(format!(
            "'{}' has rank {}, expected a 1-D tensor",
            path.as_ref().display(),
            tensor.shape.len()
        )));
    }
    Ok(tensor)
}

/// Load the sole `F32` tensor of a safetensors file.
fn load_tensor(path: &Path) -> Result<LoadedTensor, DecodeError> {
    let file = File::open(path).map_err(|e| DecodeError::io("opening tensor file", e))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| DecodeError::io("mapping tensor file", e))?;
    let tensors = SafeTensors::deserialize(&mmap)
        .map_err(|e| DecodeError::tensor_file("parsing tensor file", e))?;

    let names = tensors.names();
    let name = match names.as_slice() {
        [name] => *name,
        _ => {
            return Err(DecodeError::tensor_file(
                "selecting tensor",
                format!("'{}' holds {} tensors, expected 1", path.display(), names.len()),
            ))
        }
    };
    let view = tensors
        .tensor(name)
        .map_err(|e| DecodeError::tensor_file("reading tensor", e))?;
    if view.dtype() != Dtype::F32 {
        return Err(DecodeError::tensor_file(
            "checking dtype",
            format!("'{}' is {:?}, expected F32", path.display(), view.dtype()),
        ));
    }

    let data = view
        .data()
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(LoadedTensor {
        data,
        shape: view.shape().to_vec(),
    })
}

/// Write decoded indices as a single `U32` tensor named `indices`.
fn save_indices(path: &Path, indices: &[u32]) -> Result<(), DecodeError> {
    let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
    let view = TensorView::new(Dtype::U32, vec![indices.len()], &bytes)
        .map_err(|e| DecodeError::tensor_file("building output tensor", e))?;
    safetensors::serialize_to_file([("indices", view)], &None, path)
        .map_err(|e| DecodeError::tensor_file("writing output tensor", e))
}
