use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ValueEnum;
use env_logger;
use log;

use ext_line_sort::{
    CancellationToken, ExternalSorterBuilder, Outcome, SortAlgorithm, SortSummary, EXIT_FAILURE, EXIT_INTERRUPTED,
    EXIT_OK,
};

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let arg_parser = build_arg_parser();

    let verbose = arg_parser.is_present("verbose");
    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level, verbose);

    let algorithm: Algorithm = arg_parser.value_of_t_or_exit("algorithm");
    let buffer_size = arg_parser.value_of("buffer_size").expect("value has a default");
    let tmp_dir = arg_parser.value_of("tmp_dir").expect("value has a default");
    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_source(path::Path::new(input))
        .with_destination(path::Path::new(output))
        .with_tmp_dir(path::Path::new(tmp_dir))
        .with_buffer_size(buffer_size.parse::<ByteSize>().expect("value is pre-validated").as_u64())
        .with_algorithm(algorithm.into())
        .with_keep_temps(arg_parser.is_present("keep_temps"));
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            return err.exit_code();
        }
    };
    log::debug!("options: {:?}", sorter.options());

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        if handler_token.cancel() {
            log::warn!("interrupt received, cleaning up ...");
        }
    }) {
        log::error!("interrupt handler installation error: {}", err);
        return EXIT_FAILURE;
    }

    match sorter.sort(&cancel) {
        Ok(summary) => {
            if verbose {
                log_summary(&summary);
            }
            match summary.outcome {
                Outcome::Completed => EXIT_OK,
                Outcome::Interrupted => EXIT_INTERRUPTED,
            }
        }
        Err(err) => {
            log::error!("data sorting error: {}", err);
            err.exit_code()
        }
    }
}

fn log_summary(summary: &SortSummary) {
    log::info!(
        "{} lines read, {} lines written, {} chunks, peak buffered {}",
        summary.lines_read,
        summary.lines_written,
        summary.chunks,
        ByteSize(summary.peak_buffered_bytes)
    );
    log::info!("timings (not fully accurate, just for reference):");
    log::info!("  backpressure wait: {:?}", summary.timings.waited);
    log::info!("  read: {:?}", summary.timings.read);
    log::info!("  sort: {:?}", summary.timings.sort);
    log::info!("  spill: {:?}", summary.timings.spill);
    log::info!("  write: {:?}", summary.timings.write);
}

#[derive(Copy, Clone, PartialEq, PartialOrd, clap::ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ValueEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum Algorithm {
    Library,
    Heap,
}

impl Algorithm {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Algorithm::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Algorithm as clap::ValueEnum>::from_str(s, false)
    }
}

impl From<Algorithm> for SortAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Library => SortAlgorithm::Library,
            Algorithm::Heap => SortAlgorithm::Heap,
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::Command::new("ext-line-sort")
        .about("sorts a text file larger than memory, case-insensitively")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("buffer_size")
                .short('b')
                .long("buffer-size")
                .help("memory budget for buffered lines and I/O buffers")
                .takes_value(true)
                .default_value("100MB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() > 0 => Ok(()),
                    Ok(_) => Err("Buffer size must be positive".to_string()),
                    Err(err) => Err(format!("Buffer size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("algorithm")
                .short('a')
                .long("algorithm")
                .help("chunk sorting algorithm")
                .takes_value(true)
                .default_value("heap")
                .possible_values(Algorithm::possible_values()),
        )
        .arg(
            clap::Arg::new("keep_temps")
                .short('k')
                .long("keep-temps")
                .help("keep temporary chunk files"),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true)
                .default_value("cache"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel chunk sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("debug logging and a timing report"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel, verbose: bool) {
    let log_level = if verbose && log_level < LogLevel::Debug {
        LogLevel::Debug
    } else {
        log_level
    };

    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
