use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use count_core::CountingLine;

#[derive(Clone, Debug)]
pub struct CountConfig {
    pub source_uri: String,
    pub model_path: PathBuf,
    pub width: i32,
    pub height: i32,
    pub line: CountingLine,
    pub serial_port: Option<String>,
    pub baud: u32,
    pub loop_video: bool,
    pub preview_dir: PathBuf,
    pub confidence: f32,
    pub verbose: bool,
}

const COUNT_USAGE: &str = "Usage: linetally count [--source <uri>] [--model <path>] \
[--line-y <px>] [--band <px>] [--line-x1 <px>] [--line-x2 <px>] [--serial <port>] \
[--baud <n>] [--loop] [--width <px>] [--height <px>] [--preview-dir <dir>] \
[--conf <0..1>] [--verbose]\n\nPositional form is also supported: \
count <source-uri> <model-path> [...flags...]";

impl CountConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            bail!(COUNT_USAGE);
        }

        let mut source_uri: Option<String> = None;
        let mut model_path: Option<PathBuf> = None;
        let mut width: Option<i32> = None;
        let mut height: Option<i32> = None;
        let mut line_y: Option<i32> = None;
        let mut band: Option<i32> = None;
        let mut line_x1: Option<i32> = None;
        let mut line_x2: Option<i32> = None;
        let mut serial_port: Option<String> = None;
        let mut baud: Option<u32> = None;
        let mut loop_video = false;
        let mut preview_dir: Option<PathBuf> = None;
        let mut confidence: Option<f32> = None;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?
                        .clone();
                    source_uri = Some(value);
                    idx += 1;
                }
                "--model" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--model requires a value"))?
                        .clone();
                    model_path = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--width" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--width requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--width must be an integer".to_string())?;
                    if value <= 0 {
                        bail!("--width must be a positive integer");
                    }
                    width = Some(value);
                    idx += 1;
                }
                "--height" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--height requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--height must be an integer".to_string())?;
                    if value <= 0 {
                        bail!("--height must be a positive integer");
                    }
                    height = Some(value);
                    idx += 1;
                }
                "--line-y" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--line-y requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--line-y must be an integer".to_string())?;
                    line_y = Some(value);
                    idx += 1;
                }
                "--band" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--band requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--band must be an integer".to_string())?;
                    if value < 0 {
                        bail!("--band must not be negative");
                    }
                    band = Some(value);
                    idx += 1;
                }
                "--line-x1" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--line-x1 requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--line-x1 must be an integer".to_string())?;
                    line_x1 = Some(value);
                    idx += 1;
                }
                "--line-x2" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--line-x2 requires a value"))?
                        .parse::<i32>()
                        .with_context(|| "--line-x2 must be an integer".to_string())?;
                    line_x2 = Some(value);
                    idx += 1;
                }
                "--serial" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--serial requires a value"))?
                        .clone();
                    serial_port = Some(value);
                    idx += 1;
                }
                "--baud" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--baud requires a value"))?
                        .parse::<u32>()
                        .with_context(|| "--baud must be a positive integer".to_string())?;
                    if value == 0 {
                        bail!("--baud must be at least 1");
                    }
                    baud = Some(value);
                    idx += 1;
                }
                "--preview-dir" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--preview-dir requires a value"))?
                        .clone();
                    preview_dir = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--conf" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--conf requires a value"))?
                        .parse::<f32>()
                        .with_context(|| "--conf must be a number between 0 and 1".to_string())?;
                    if !(0.0..=1.0).contains(&value) {
                        bail!("--conf must be between 0 and 1");
                    }
                    confidence = Some(value);
                    idx += 1;
                }
                "--loop" => {
                    loop_video = true;
                    idx += 1;
                }
                "--verbose" => {
                    verbose = true;
                    idx += 1;
                }
                arg if arg.starts_with('-') => {
                    bail!("Unrecognised flag: {arg}");
                }
                other => {
                    positional.push(other.to_string());
                    idx += 1;
                }
            }
        }

        let mut positional = positional.into_iter();
        if source_uri.is_none() {
            source_uri = positional.next();
        }
        if model_path.is_none() {
            if let Some(path) = positional.next() {
                model_path = Some(PathBuf::from(path));
            }
        }

        let source_uri = source_uri.ok_or_else(|| {
            anyhow!("Missing source. Provide --source <uri> or positional <source-uri>.")
        })?;
        let model_path = model_path.ok_or_else(|| {
            anyhow!("Missing model path. Provide --model <path> or positional <model-path>.")
        })?;

        let width = width.unwrap_or(640);
        let height = height.unwrap_or(480);
        let line_y = line_y.unwrap_or(240);
        let band = band.unwrap_or(15);
        let line_x1 = line_x1.unwrap_or(10);
        let line_x2 = line_x2.unwrap_or(width - 10);

        Ok(Self {
            source_uri,
            model_path,
            width,
            height,
            line: CountingLine::horizontal(line_x1, line_x2, line_y, band),
            serial_port,
            baud: baud.unwrap_or(9600),
            loop_video,
            preview_dir: preview_dir.unwrap_or_else(|| PathBuf::from("preview")),
            confidence: confidence.unwrap_or(0.4),
            verbose,
        })
    }
}
