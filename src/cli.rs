// ============================================================================
// IconFE CLI: headless icon conversion via command-line arguments
// ============================================================================
//
// Usage examples:
//   IconFE -i logo.png -o logo.ico
//   IconFE -i logo.png -o logo.ico --size 32 --palette pico-8 --kernel atkinson
//   IconFE -i "sprites/*.png" --output-dir icons/ --contrast 20 --serpentine
//   IconFE -i app.ico --output-dir out/ --palette my_colors.hex
//
// Every file goes through a DocumentController, so adjustments run as the
// same transactions the interactive tools use.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::Size;
use crate::components::colors::{Palette, PaletteLibrary, PaletteStore};
use crate::components::tools::AdjustParams;
use crate::error::{EditorError, Result};
use crate::io::import_image;
use crate::ops::adjustments::DitherKernel;
use crate::ops::transform::ImageResampler;
use crate::project::DocumentController;
use crate::settings::EditorSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// IconFE headless icon converter.
#[derive(Parser, Debug)]
#[command(
    name = "IconFE",
    about = "IconFE headless icon converter",
    long_about = "Convert images to .ico icon containers, optionally resizing them and\n\
                  reducing them to a palette with error-diffusion dithering.\n\n\
                  Example:\n  \
                  IconFE -i logo.png -o logo.ico --size 32 --palette pico-8"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "sprites/*.bmp").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing (`<stem>.ico` per input).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Fit the image inside SIZE×SIZE before encoding (1–256).
    #[arg(long, value_name = "PIXELS", value_parser = clap::value_parser!(u32).range(1..=256))]
    pub size: Option<u32>,

    /// Brightness offset added to every channel.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-255..255")]
    pub brightness: i32,

    /// Contrast adjustment.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true, value_name = "-255..255")]
    pub contrast: i32,

    /// Dither onto a palette: a built-in name (pico-8, game boy, cga, 1-bit)
    /// or a file with one hex color per line.
    #[arg(long, value_name = "NAME|FILE")]
    pub palette: Option<String>,

    /// Diffusion kernel (floyd-steinberg, false-floyd-steinberg, stucki,
    /// atkinson, jarvis, burkes, sierra, two-row-sierra, sierra-lite).
    #[arg(long, value_name = "KERNEL")]
    pub kernel: Option<String>,

    /// Alternate the scan direction per row while dithering.
    #[arg(long)]
    pub serpentine: bool,

    /// Settings file to use instead of the platform default.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Session log location.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Print per-file timing information and log debug output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Per-run options resolved from the arguments once.
struct Job {
    size: Option<u32>,
    params: AdjustParams,
    palette: Option<Palette>,
    verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let mut settings = match &args.config {
        Some(path) => EditorSettings::load_from(path),
        None => EditorSettings::load(),
    };
    // Batch conversions never touch the interactive session's store.
    settings.autosave = false;
    settings.show_preview = false;
    if let Some(name) = &args.kernel {
        match DitherKernel::from_key(name) {
            Some(k) => settings.default_kernel = k,
            None => {
                eprintln!("error: unknown kernel '{}'.", name);
                return ExitCode::FAILURE;
            }
        }
    }
    settings.serpentine |= args.serpentine;

    let palette = match args.palette.as_deref().map(resolve_palette).transpose() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Resolve glob patterns / literal paths → concrete PathBufs
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    // Multiple inputs require --output-dir, not --output
    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let job = Job {
        size: args.size,
        params: AdjustParams { brightness: args.brightness, contrast: args.contrast, dither: None },
        palette,
        verbose: args.verbose,
    };

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref())
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &job, &settings) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: &Path, job: &Job, settings: &EditorSettings) -> Result<()> {
    // -- Step 1: Load ----------------------------------------------------
    let mut pixels = import_image(input)?
        .into_iter()
        .max_by_key(|p| p.pixel_count())
        .ok_or_else(|| EditorError::invalid_image("file contains no images"))?;

    // -- Step 2: Fit to the requested size -------------------------------
    if let Some(size) = job.size {
        let mut resampler = ImageResampler::new(settings.resample_threshold);
        pixels = resampler.resize_to_contain(&pixels, Size::new(size, size))?;
    }

    let name = input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    let mut doc = DocumentController::from_buffer(name, pixels, settings.clone())?;

    // -- Step 3: Adjust --------------------------------------------------
    let mut params = job.params.clone();
    if let Some(palette) = &job.palette {
        params.dither = Some(doc.dither_options(palette));
    }
    if !params.is_neutral() {
        doc.update_adjustments(params)?;
        doc.apply_adjustments()?;
        if job.verbose {
            println!("  adjusted: {}", doc.editor().undo_history().join(", "));
        }
    }

    // -- Step 4: Encode --------------------------------------------------
    doc.export_icon_to(output)
}

// ============================================================================
// Helpers
// ============================================================================

/// Built-in palette by name, then a saved user palette, otherwise a
/// hex-list file.
fn resolve_palette(arg: &str) -> Result<Palette> {
    if let Some(p) = Palette::native_by_name(arg) {
        return Ok(p);
    }
    if let Some(p) = PaletteLibrary::open_default()
        .get_all_palettes()
        .into_iter()
        .find(|p| p.name.eq_ignore_ascii_case(arg) || p.id.as_deref() == Some(arg))
    {
        return Ok(p);
    }
    let path = Path::new(arg);
    let text = std::fs::read_to_string(path)
        .map_err(|e| EditorError::File { path: path.to_path_buf(), message: e.to_string() })?;
    let name = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let palette = Palette::from_hex_list(name, &text)?;
    if palette.is_empty() {
        return Err(EditorError::File { path: path.to_path_buf(), message: "palette has no colors".into() });
    }
    Ok(palette)
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    log::warn!("pattern '{}' matched no files", pattern);
                }
            }
            Err(e) => {
                log::warn!("invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: next to the input as `<stem>.ico` (`<stem>_out.ico` when the
///    input is itself an .ico)
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.ico", stem)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.ico", stem));
    if candidate == input {
        Some(parent.join(format!("{}_out.ico", stem)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_priority() {
        let input = Path::new("art/logo.png");
        assert_eq!(
            build_output_path(input, Some(Path::new("x.ico")), Some(Path::new("d"))),
            Some(PathBuf::from("x.ico"))
        );
        assert_eq!(build_output_path(input, None, Some(Path::new("d"))), Some(PathBuf::from("d/logo.ico")));
        assert_eq!(build_output_path(input, None, None), Some(PathBuf::from("art/logo.ico")));
        assert_eq!(
            build_output_path(Path::new("art/app.ico"), None, None),
            Some(PathBuf::from("art/app_out.ico"))
        );
    }

    #[test]
    fn arguments_parse() {
        let args = CliArgs::try_parse_from([
            "IconFE", "-i", "a.png", "b.png", "--size", "32", "--brightness", "-10", "--palette", "pico-8",
        ])
        .unwrap();
        assert_eq!(args.input, vec!["a.png", "b.png"]);
        assert_eq!(args.size, Some(32));
        assert_eq!(args.brightness, -10);
        assert!(CliArgs::try_parse_from(["IconFE", "-i", "a.png", "--size", "300"]).is_err());
    }

    #[test]
    fn converts_a_png_into_a_dithered_icon() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let mut buf = crate::canvas::PixelBuffer::new(40, 20);
        buf.fill(image::Rgba([90, 140, 200, 255]));
        crate::io::write_file(&input, &crate::io::encode_png(&buf).unwrap()).unwrap();

        let output = dir.path().join("out.ico");
        let job = Job {
            size: Some(16),
            params: AdjustParams { brightness: 5, ..Default::default() },
            palette: Palette::native_by_name("1-bit"),
            verbose: false,
        };
        let mut settings = EditorSettings::default();
        settings.autosave = false;
        run_one(&input, &output, &job, &settings).unwrap();

        let icons = crate::io::decode_icon(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(icons.len(), 1);
        assert_eq!(icons[0].pixels.width(), 16);
        assert_eq!(icons[0].pixels.height(), 8);
        for px in icons[0].pixels.data().chunks_exact(4) {
            assert!(px[..3] == [0, 0, 0] || px[..3] == [255, 255, 255]);
        }
    }
}
