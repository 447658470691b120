use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use earshot::audio::CaptureSource;
use earshot::cli::Cli;
use earshot::monitor::MeasurementSink;
use earshot::Engine;

fn main() {
    earshot::init_logging();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help goes to stdout and exits cleanly; anything else is usage
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("earshot: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let params = cli.into_options().resolve()?;

    let sink = match params.monitor_fd {
        Some(fd) => Some(
            MeasurementSink::from_raw_fd(fd)
                .with_context(|| format!("unusable measurement descriptor: {fd}"))?,
        ),
        None => None,
    };

    let capture = CaptureSource::open(params.device.as_deref(), params.channels, params.rate)?;

    let (signal_tx, signal_rx) = crossbeam_channel::bounded(4);
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })
    .context("failed to install signal handler")?;

    let mut engine = Engine::new(params, sink);
    engine.run(&capture, &signal_rx)?;
    Ok(())
}
