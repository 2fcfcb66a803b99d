use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use crate::resolve::OutputDirState;
use crate::{
    output_dir_for, prepare_output_dir, resolve_input_path, sheet_names, split_workbook,
    ExistingFilePolicy, SheetErrorPolicy, SplitError, SplitEvent, SplitOptions, SplitReport,
};

const BANNER: &str = "--- Excel Tab Separator (Preserves Formatting) ---";
const SEPARATOR: &str = "------------------------------";

#[derive(Debug, Parser)]
#[command(
    name = "sheetsplit",
    version,
    about = "Split an XLSX workbook into one workbook per sheet, keeping all formatting."
)]
pub struct Args {
    /// Workbook to split. Prompted for on stdin when omitted.
    path: Option<String>,

    /// What to do when an output file already exists.
    #[arg(long, value_enum, default_value_t = ExistingFilePolicy::Overwrite)]
    existing: ExistingFilePolicy,

    /// What to do when a single sheet cannot be split.
    #[arg(long = "on-error", value_enum, default_value_t = SheetErrorPolicy::Abort)]
    on_error: SheetErrorPolicy,

    /// Exit without waiting for Enter.
    #[arg(long)]
    no_pause: bool,
}

impl Args {
    pub fn options(&self) -> SplitOptions {
        SplitOptions {
            existing: self.existing,
            on_error: self.on_error,
            ..SplitOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    let mut input = stdin.lock();
    let mut out = io::stdout().lock();
    if run_with_args(&args, &mut input, &mut out, interactive) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run the splitter against explicit console streams.
///
/// Returns `true` when every sheet was written. The closing "Press Enter" pause only happens
/// when `interactive` is set and `--no-pause` was not given.
pub fn run_with_args<R: BufRead, W: Write>(
    args: &Args,
    input: &mut R,
    out: &mut W,
    interactive: bool,
) -> bool {
    let pause = interactive && !args.no_pause;
    let result = split_interactive(args, input, out);
    let (ok, prompt) = match result {
        Ok(report) if report.failed.is_empty() => {
            let _ = print_success(out, &report);
            (true, "Press Enter to close...")
        }
        Ok(report) => {
            let _ = print_failures(out, &report);
            (false, "Press Enter to exit...")
        }
        Err(err) => {
            let _ = writeln!(out, "\n{err:#}");
            (false, "Press Enter to exit...")
        }
    };

    if pause {
        let _ = write!(out, "\n{prompt}");
        let _ = out.flush();
        let mut line = String::new();
        let _ = input.read_line(&mut line);
    }
    let _ = out.flush();
    ok
}

fn split_interactive<R: BufRead, W: Write>(
    args: &Args,
    input: &mut R,
    out: &mut W,
) -> Result<SplitReport> {
    crate::package::codec_self_check()
        .context("preflight failed: the built-in zip codec cannot round-trip a package")?;

    writeln!(out, "{BANNER}")?;
    if let Some(dir) = running_from() {
        writeln!(out, "Running from: {}", dir.display())?;
    }
    let raw = match &args.path {
        Some(path) => path.clone(),
        None => prompt_for_path(input, out)?,
    };

    let path = resolve_input_path(&raw).map_err(|err| match err {
        SplitError::InputNotFound(path) => anyhow!(
            "ERROR: The file was not found at:\n{}\nCheck the path and try again.",
            path.display()
        ),
        other => anyhow!(other),
    })?;

    let output_dir = output_dir_for(&path)?;
    match prepare_output_dir(&output_dir)
        .with_context(|| format!("Error creating output folder {}", output_dir.display()))?
    {
        OutputDirState::Created => {
            writeln!(out, "Created output folder: {}", output_dir.display())?
        }
        OutputDirState::Existing => {
            writeln!(out, "Using existing output folder: {}", output_dir.display())?
        }
    }

    writeln!(out, "Analyzing file...")?;
    let options = args.options();
    let sheets = sheet_names(&path, options.limits).context("Error opening file")?;
    writeln!(out, "Found {} tabs to process.", sheets.len())?;

    let report = split_workbook(&path, &output_dir, &sheets, &options, |event| match event {
        SplitEvent::Processing {
            position,
            total,
            sheet,
        } => {
            let _ = writeln!(out, "[{position}/{total}] Processing: {sheet}...");
        }
        SplitEvent::Written(_) => {}
        SplitEvent::Failed(failure) => {
            let _ = writeln!(out, "  FAILED: {}", failure.error);
        }
    })?;
    Ok(report)
}

fn running_from() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}

fn prompt_for_path<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> Result<String> {
    writeln!(out, "Tip: You can drag and drop your file into this window.")?;
    writeln!(
        out,
        "Note: If drag & drop is blocked (Admin Mode), right-click file -> 'Copy as Path' -> Paste here."
    )?;
    write!(out, "\nPaste path or drag file here: ")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        bail!("no workbook path given");
    }
    Ok(line)
}

fn print_success<W: Write>(out: &mut W, report: &SplitReport) -> io::Result<()> {
    writeln!(out, "\n{SEPARATOR}")?;
    writeln!(out, "SUCCESS! All tabs have been separated.")?;
    writeln!(out, "Location: {}", report.output_dir.display())
}

fn print_failures<W: Write>(out: &mut W, report: &SplitReport) -> io::Result<()> {
    writeln!(out, "\n{SEPARATOR}")?;
    writeln!(
        out,
        "Finished with errors: {} of {} tabs could not be separated.",
        report.failed.len(),
        report.total
    )?;
    for failure in &report.failed {
        writeln!(out, "  [{}] {}: {}", failure.position, failure.sheet, failure.error)?;
    }
    writeln!(out, "Location: {}", report.output_dir.display())
}
