use hcapture::configuration::{usage, Config};
use hcapture::recorder::Recorder;
use log::{info, warn};

/// Fatal diagnostics go to stderr whatever the log filter says.
fn fail(message: std::fmt::Arguments<'_>) -> ! {
    eprintln!("hcapture: {}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .target(env_logger::Target::Stdout)
        .init();

    let config = match Config::from_args() {
        Ok(config) => config,
        Err(e) => fail(format_args!("{}\n\n{}", e, usage())),
    };

    let recorder = match Recorder::prepare(config) {
        Ok(recorder) => recorder,
        Err(e) => fail(format_args!("unable to start the capture: {}", e)),
    };
    let stopper = recorder.stopper();

    let mut capture = tokio::task::spawn_blocking(move || recorder.run());

    let joined = tokio::select! {
        joined = &mut capture => joined,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("Interrupted, finishing the capture");
                    stopper.stop();
                }
                Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
            }
            capture.await
        }
    };

    match joined {
        Ok(Ok(report)) => {
            info!(
                "Wrote {} records ({} bytes) from {} packets",
                report.records_written, report.bytes_written, report.engine.packets
            );
        }
        Ok(Err(e)) => fail(format_args!("{}", e)),
        Err(e) => fail(format_args!("capture task failed: {}", e)),
    }
}
