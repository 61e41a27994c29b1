#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use depmat::align::{align_columns, read_sample_titles, verify_alignment, write_alignment};
use depmat::artifact::is_source_name;
use depmat::batch::{BatchOutcome, BatchRequest, PairData, default_source, run_statistic_batch};
use depmat::compile::{CompileOptions, DuplicatePolicy, Precision, compile_dir};
use depmat::config::JobConfig;
use depmat::import::{ImportOptions, import_tab};
use depmat::plan::{PlanRun, check_tiling, plan_ranges, read_plan, run_plan, write_plan};
use depmat::progress::{PairProgressObserver, PairProgressStage};
use depmat::{MaskedMatrix, PairRange, PairSpace, Statistic};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    name = "depmat",
    about = "All-pairs dependency matrices computed in independent, resumable batches",
    long_about = "Scores every unordered pair of rows of a masked numeric matrix (or every row \
                 pair across two column-aligned matrices) with a chosen dependency statistic, \
                 split into ranges that can run anywhere, then compiles the partial results."
)]
struct Cli {
    /// Optional TOML job configuration; flags override its values
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// The matrix (or pair of aligned matrices) a command reads.
#[derive(Args)]
struct InputArgs {
    /// Binary masked matrix produced by `import`
    #[arg(long, value_name = "PATH")]
    matrix: PathBuf,

    /// Second, column-aligned matrix for cross-matrix pairs
    #[arg(long, value_name = "PATH")]
    second: Option<PathBuf>,

    /// Aligned column titles to verify both matrices against before computing
    #[arg(long, value_name = "PATH", requires = "second")]
    titles: Option<PathBuf>,
}

struct LoadedInput {
    first: MaskedMatrix,
    second: Option<MaskedMatrix>,
}

impl LoadedInput {
    fn data(&self) -> PairData<'_> {
        match &self.second {
            Some(second) => PairData::Cross {
                left: &self.first,
                right: second,
            },
            None => PairData::Single(&self.first),
        }
    }
}

impl InputArgs {
    fn load(&self) -> Result<LoadedInput, Box<dyn std::error::Error>> {
        let first = MaskedMatrix::load(&self.matrix)?;
        log::info!("{}: {}", self.matrix.display(), first.summary());
        let second = match &self.second {
            Some(path) => {
                let second = MaskedMatrix::load(path)?;
                log::info!("{}: {}", path.display(), second.summary());
                if let Some(titles) = &self.titles {
                    verify_alignment(titles, &first, &second)?;
                }
                Some(second)
            }
            None => None,
        };
        Ok(LoadedInput { first, second })
    }

    /// Artifact source for `statistic`, `{stem}_{statistic}` or `{a}_vs_{b}_{statistic}`.
    fn source(&self, statistic: Statistic) -> String {
        match &self.second {
            Some(second) => format!("{}_vs_{}_{statistic}", file_stem(&self.matrix), file_stem(second)),
            None => default_source(&self.matrix, statistic),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "matrix".to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a tab-delimited matrix into a binary masked matrix and variable list
    #[command(about = "Import a tab-delimited matrix (outputs: .matrix, .varlist.txt)")]
    Import {
        /// Tab-delimited input: variable name, then one value per sample
        #[arg(value_name = "TABFILE")]
        tabfile: PathBuf,

        /// Output directory
        #[arg(long, value_name = "DIR", default_value = ".")]
        outdir: PathBuf,

        /// Rebuild outputs even when they already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Align the columns of two matrices on shared sample titles
    #[command(about = "Column-align two matrices (outputs: aligned .matrix files, .coltitles.txt)")]
    Align {
        #[arg(long, value_name = "PATH")]
        matrix1: PathBuf,

        /// Comma-separated sample titles of the first matrix
        #[arg(long, value_name = "PATH")]
        titles1: PathBuf,

        #[arg(long, value_name = "PATH")]
        matrix2: PathBuf,

        /// Comma-separated sample titles of the second matrix
        #[arg(long, value_name = "PATH")]
        titles2: PathBuf,

        #[arg(long, value_name = "DIR", default_value = ".")]
        outdir: PathBuf,
    },

    /// Partition the pair space into ranges and write them as a plan file
    #[command(about = "Write a range plan (outputs: start<TAB>end per line)")]
    Plan {
        #[command(flatten)]
        input: InputArgs,

        /// Pairs per range; defaults to the configured range size
        #[arg(long, value_name = "K")]
        range_size: Option<usize>,

        /// First pair index to plan from
        #[arg(long, value_name = "INDEX", default_value_t = 0)]
        start_offset: usize,

        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Also write the effective job configuration here, for workers to share via --config
        #[arg(long, value_name = "PATH")]
        save_config: Option<PathBuf>,
    },

    /// Compute one range of pairs and write one artifact per channel
    #[command(about = "Run a single batch over [start, end)")]
    Batch {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_name = "NAME")]
        statistic: Statistic,

        #[arg(long)]
        start: usize,

        #[arg(long)]
        end: usize,

        #[arg(long, value_name = "DIR")]
        work_dir: PathBuf,

        /// Artifact source name; defaults to the matrix stem and statistic
        #[arg(long, value_parser = parse_source)]
        source: Option<String>,
    },

    /// Run every range of a plan on a local thread pool
    #[command(about = "Run a plan locally")]
    Run {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_name = "NAME")]
        statistic: Statistic,

        #[arg(long, value_name = "DIR")]
        work_dir: PathBuf,

        /// Plan file; without one the whole space is planned with the range size
        #[arg(long, value_name = "PATH")]
        plan: Option<PathBuf>,

        #[arg(long, value_name = "K")]
        range_size: Option<usize>,

        #[arg(long, value_name = "N")]
        threads: Option<usize>,

        #[arg(long, value_parser = parse_source)]
        source: Option<String>,
    },

    /// Merge the artifacts of a working directory into dense results
    #[command(about = "Compile artifacts (outputs: {prefix}.{channel}.values, .isset)")]
    Compile {
        #[command(flatten)]
        input: InputArgs,

        #[arg(long, value_name = "DIR")]
        work_dir: PathBuf,

        #[arg(long, value_name = "DIR")]
        outdir: Option<PathBuf>,

        #[arg(long)]
        prefix: String,

        #[arg(long)]
        precision: Option<Precision>,

        #[arg(long)]
        duplicate_policy: Option<DuplicatePolicy>,
    },
}

/// Progress bars on stderr, one per stage.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());

    pb
}

impl PairProgressObserver for BarProgress {
    fn on_stage_start(&mut self, stage: PairProgressStage, total: usize) {
        self.bar = Some(create_progress_bar(total as u64, stage.describe()));
    }
    fn on_stage_advance(&mut self, stage: PairProgressStage, processed: usize) {
        let _ = stage;
        if let Some(bar) = &self.bar {
            bar.set_position(processed as u64);
        }
    }
    fn on_stage_finish(&mut self, stage: PairProgressStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("{stage} done"));
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { config, command } = Cli::parse();
    let result = JobConfig::load_or_default(config.as_deref())
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        .and_then(|config| match command {
            Some(Commands::Import {
                tabfile,
                outdir,
                overwrite,
            }) => run_import(&config, &tabfile, &outdir, overwrite),
            Some(Commands::Align {
                matrix1,
                titles1,
                matrix2,
                titles2,
                outdir,
            }) => run_align(&matrix1, &titles1, &matrix2, &titles2, &outdir),
            Some(Commands::Plan {
                input,
                range_size,
                start_offset,
                output,
                save_config,
            }) => run_plan_file(
                &config,
                &input,
                range_size,
                start_offset,
                &output,
                save_config.as_deref(),
            ),
            Some(Commands::Batch {
                input,
                statistic,
                start,
                end,
                work_dir,
                source,
            }) => run_single_batch(&config, &input, statistic, PairRange::new(start, end), &work_dir, source),
            Some(Commands::Run {
                input,
                statistic,
                work_dir,
                plan,
                range_size,
                threads,
                source,
            }) => run_local(
                &config,
                &input,
                statistic,
                &work_dir,
                plan.as_deref(),
                range_size,
                threads,
                source,
            ),
            Some(Commands::Compile {
                input,
                work_dir,
                outdir,
                prefix,
                precision,
                duplicate_policy,
            }) => run_compile(
                &config,
                &input,
                &work_dir,
                outdir.as_deref(),
                &prefix,
                precision,
                duplicate_policy,
            ),
            None => {
                let _ = Cli::command().print_help();
                println!();
                Ok(())
            }
        });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn parse_source(text: &str) -> Result<String, String> {
    if is_source_name(text) {
        Ok(text.to_string())
    } else {
        Err(format!(
            "'{text}' cannot name artifacts; use a non-empty name without path separators"
        ))
    }
}

fn run_import(config: &JobConfig, tabfile: &Path, outdir: &Path, overwrite: bool) -> CliResult {
    let options = ImportOptions {
        missing_tokens: config.missing_tokens.clone(),
        overwrite,
    };
    let imported = import_tab(tabfile, outdir, &options)?;
    println!(
        "{} variables x {} samples -> {} and {}",
        imported.variables.len(),
        imported.matrix.ncols(),
        imported.matrix_path.display(),
        imported.varlist_path.display()
    );
    Ok(())
}

fn run_align(matrix1: &Path, titles1: &Path, matrix2: &Path, titles2: &Path, outdir: &Path) -> CliResult {
    let m1 = MaskedMatrix::load(matrix1)?;
    let m2 = MaskedMatrix::load(matrix2)?;
    let t1 = read_sample_titles(titles1)?;
    let t2 = read_sample_titles(titles2)?;
    let alignment = align_columns(&m1, &t1, &m2, &t2)?;

    let (name_a, name_b) = if alignment.swapped {
        (file_stem(matrix2), file_stem(matrix1))
    } else {
        (file_stem(matrix1), file_stem(matrix2))
    };
    let paths = write_alignment(&alignment, &name_a, &name_b, outdir)?;
    println!(
        "{} shared columns -> {}, {}, {}",
        alignment.titles.len(),
        paths.first.display(),
        paths.second.display(),
        paths.titles.display()
    );
    Ok(())
}

fn run_plan_file(
    config: &JobConfig,
    input: &InputArgs,
    range_size: Option<usize>,
    start_offset: usize,
    output: &Path,
    save_config: Option<&Path>,
) -> CliResult {
    let loaded = input.load()?;
    let space = loaded.data().space();
    let range_size = range_size.unwrap_or(config.range_size);
    let ranges = plan_ranges(space.total(), range_size, start_offset)?;
    write_plan(output, &ranges)?;
    println!("{} ranges over {space} -> {}", ranges.len(), output.display());
    if let Some(path) = save_config {
        let effective = JobConfig {
            range_size,
            ..config.clone()
        };
        effective.save(path)?;
        println!("job configuration -> {}", path.display());
    }
    Ok(())
}

fn run_single_batch(
    config: &JobConfig,
    input: &InputArgs,
    statistic: Statistic,
    range: PairRange,
    work_dir: &Path,
    source: Option<String>,
) -> CliResult {
    let loaded = input.load()?;
    let data = loaded.data();
    let source = source.unwrap_or_else(|| input.source(statistic));
    let request = BatchRequest::new(data.space(), range, work_dir, &source)
        .with_report_every(config.report_every);
    let outcome = run_statistic_batch(
        &data,
        &request,
        statistic,
        &config.scorer_params(),
        &mut BarProgress::default(),
    )?;
    match outcome {
        BatchOutcome::Skipped { existing } => {
            println!("{}: skipped, {} outputs already present", request.batch_name, existing.len());
        }
        BatchOutcome::Completed(report) => {
            println!(
                "{}: wrote {} artifacts ({} NaN)",
                report.name,
                report.outputs.len(),
                report.total_nan()
            );
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_local(
    config: &JobConfig,
    input: &InputArgs,
    statistic: Statistic,
    work_dir: &Path,
    plan: Option<&Path>,
    range_size: Option<usize>,
    threads: Option<usize>,
    source: Option<String>,
) -> CliResult {
    let loaded = input.load()?;
    let data = loaded.data();
    let total = data.space().total();
    let ranges = match plan {
        Some(path) => read_plan(path)?,
        None => plan_ranges(total, range_size.unwrap_or(config.range_size), 0)?,
    };
    let tiling = check_tiling(&ranges, total);
    if !tiling.is_exact() {
        log::warn!(
            "plan does not tile [0, {total}) exactly: {} gaps, {} overlaps, {} out of bounds",
            tiling.gaps.len(),
            tiling.overlaps.len(),
            tiling.out_of_bounds.len()
        );
    }

    std::fs::create_dir_all(work_dir)?;
    let source = source.unwrap_or_else(|| input.source(statistic));
    let run = PlanRun {
        statistic,
        params: config.scorer_params(),
        work_dir,
        source: &source,
        threads: threads.unwrap_or_else(|| config.thread_count()),
        report_every: config.report_every,
    };
    let summary = run_plan(&data, &ranges, &run, &mut BarProgress::default())?;
    println!(
        "{} completed, {} skipped, {} failed",
        summary.completed,
        summary.skipped,
        summary.failed.len()
    );
    if let Some((range, err)) = summary.failed.first() {
        return Err(format!("{} batches failed; first was {range}: {err}", summary.failed.len()).into());
    }
    Ok(())
}

fn run_compile(
    config: &JobConfig,
    input: &InputArgs,
    work_dir: &Path,
    outdir: Option<&Path>,
    prefix: &str,
    precision: Option<Precision>,
    duplicate_policy: Option<DuplicatePolicy>,
) -> CliResult {
    let space: PairSpace = input.load()?.data().space();
    let options = CompileOptions {
        space,
        precision: precision.unwrap_or(config.precision),
        duplicate_policy: duplicate_policy.unwrap_or(config.duplicate_policy),
    };
    let compiled = compile_dir(work_dir, &options, &mut BarProgress::default())?;

    let outdir = outdir.unwrap_or(work_dir);
    std::fs::create_dir_all(outdir)?;
    for channel in &compiled {
        let written = channel.persist(outdir, prefix, space, options.precision)?;
        let completeness = match &written.is_set {
            Some(mask) => format!("incomplete, mask at {}", mask.display()),
            None => "complete".to_string(),
        };
        println!(
            "{}: {} of {} set -> {} ({completeness})",
            channel.channel,
            channel.counts.set,
            channel.total(),
            written.values.display()
        );
    }
    Ok(())
}
