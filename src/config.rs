use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::analysis::PipelineOptions;
use crate::model::{ExecutionDevice, OnnxModelLoader};
use crate::preprocess::{ChannelOrder, DEFAULT_INPUT_SIZE};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory holding `<id>.jpg` images and `<id>.json` annotations
    #[arg(long, global = true, default_value = "data/TTPLA/data_original_size")]
    pub dataset_root: PathBuf,

    /// Segmentation weights; when absent every analysis uses annotations
    #[arg(short, long, global = true, default_value = "models/unet_ttpla_final.onnx")]
    pub model_path: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = ExecutionDevice::Auto)]
    pub device: ExecutionDevice,

    #[arg(short, long, global = true, default_value_t = 0)]
    pub device_id: i32,

    /// Intra-op threads for inference (0 lets the runtime decide)
    #[arg(short, long, global = true, default_value_t = 0)]
    pub num_threads: usize,

    #[arg(long, global = true, default_value_t = DEFAULT_INPUT_SIZE, value_parser = check_input_size)]
    pub input_size: u32,

    #[arg(long, global = true, value_enum, default_value_t = ChannelOrder::Rgb)]
    pub channel_order: ChannelOrder,

    /// Also report vegetation touching towers
    #[arg(long, global = true)]
    pub tower_risk: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Analyze images by id and print one JSON payload per id
    Analyze {
        #[arg(required = true)]
        image_ids: Vec<String>,

        #[arg(long)]
        pretty: bool,
    },
    /// Print a random dataset image record
    Random,
    /// Analyze every dataset image, writing JSON lines
    Batch {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Config {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            input_size: self.input_size,
            channel_order: self.channel_order,
            include_towers: self.tower_risk,
        }
    }

    pub fn model_loader(&self) -> OnnxModelLoader {
        OnnxModelLoader {
            device: self.device,
            device_id: self.device_id,
            num_threads: self.num_threads,
            fallback_input_size: self.input_size,
        }
    }
}

fn check_input_size(s: &str) -> Result<u32, String> {
    let size = s
        .parse::<u32>()
        .map_err(|e| format!("{} is not a valid size: {}", s, e))?;
    if size == 0 || size % 32 != 0 {
        return Err(format!("{} must be a positive multiple of 32", size));
    }
    Ok(size)
}
