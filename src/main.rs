use chrono::Local;
use clap::Parser;
use crossbeam_channel::bounded;
use siglent_logger::{
    acquire::run_acquisition,
    archive::Run,
    args::{convert_filter, AcquireArgs, Args, Command, PlotArgs},
    instrument::SpectrumAnalyzer,
    render::render_waterfall,
    waterfall::{load_spectrogram, Waterfall},
    Result,
};
use std::time::Duration;
use tracing::info;

fn acquire(args: AcquireArgs) -> Result<()> {
    // Find the analyzer before touching the disk
    let timeout = Duration::from_secs_f64(args.timeout);
    let mut analyzer = SpectrumAnalyzer::connect(&args.socket_address(), timeout)?;

    let label = args
        .label
        .clone()
        .unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string());
    let run = Run::create(&args.root, &label)?;

    // Ctrl-C only asks the loop to stop; the analyzer is restored when it goes out of scope
    let (sd_s, sd_r) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = sd_s.try_send(());
    })?;

    let stats = run_acquisition(&mut analyzer, &run, &args.config(), &sd_r)?;
    stats.report();
    Ok(())
}

fn plot(args: PlotArgs) -> Result<()> {
    let options = args.options();
    let run = Run::open(&args.root, &args.label, args.run)?;
    let spectrogram = load_spectrogram(&run, options.reload)?;
    let waterfall = Waterfall::new(spectrogram, &options);
    info!(
        "SNR mean={:.2} dB, stddev={:.2} dB",
        waterfall.snr_summary.mean, waterfall.snr_summary.std
    );
    info!(
        "Frequency mean={:.2} MHz, stddev={:.2} MHz",
        waterfall.freq_summary.mean, waterfall.freq_summary.std
    );
    let path = run.figure_path();
    render_waterfall(&waterfall, &options, &run.title(), &path)?;
    info!("Saved {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    // Set the log level
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();
    match args.command {
        Command::Acquire(acquire_args) => acquire(acquire_args),
        Command::Plot(plot_args) => plot(plot_args),
    }
}
