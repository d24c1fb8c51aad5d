//! One capture run, end to end.
//!
//! `Recorder` is a small façade over the pieces a run needs: it creates the
//! output file, opens the packet source, then on [`Recorder::run`] starts the
//! session clock, writes the header and drives the reassembly engine with a
//! [`CaptureController`] until the input ends, the run is stopped, or a fatal
//! write error halts it. The sink is always flushed before `run` returns.
//!
//! ```no_run
//! use hcapture::configuration::Config;
//! use hcapture::recorder::Recorder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = Recorder::prepare(Config::from_args()?)?;
//! let stopper = recorder.stopper();
//! // hand `stopper` to a signal handler, then:
//! let report = recorder.run()?;
//! println!("{} streams admitted", report.stats.streams_admitted);
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};

use log::{debug, info};

use crate::capture::{AdmissionPolicy, CaptureController, CaptureStats};
use crate::clock::{wall_clock_now_secs, SystemMonotonic};
use crate::configuration::Config;
use crate::error_handling::types::{ControllerError, SessionError};
use crate::event_log::StreamId;
use crate::reassembly::{
    open_source, CaptureStopper, ConnectionHandle, EngineSummary, PacketSource, ReassemblyEngine,
    TcpReassembler,
};

/// Outcome of a run that was not aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub stats: CaptureStats,
    pub engine: EngineSummary,
    pub open_streams: Vec<StreamId>,
    pub records_written: u64,
    pub bytes_written: u64,
}

pub struct Recorder {
    config: Config,
    output: Box<dyn Write + Send>,
    source: Box<dyn PacketSource + Send>,
    stopper: CaptureStopper,
}

impl Recorder {
    /// Creates (or truncates) the output file, then opens the packet source.
    pub fn prepare(config: Config) -> Result<Self, ControllerError> {
        let file = File::create(&config.output).map_err(ControllerError::OutputUnavailable)?;
        info!("Writing event log to {}", config.output.display());
        let (source, stopper) = open_source(&config.source, config.snaplen)?;
        Ok(Self::with_parts(
            config,
            Box::new(BufWriter::new(file)),
            Box::new(source),
            stopper,
        ))
    }

    /// Builds a recorder over an already opened sink and source.
    pub fn with_parts(
        config: Config,
        output: Box<dyn Write + Send>,
        source: Box<dyn PacketSource + Send>,
        stopper: CaptureStopper,
    ) -> Self {
        Self {
            config,
            output,
            source,
            stopper,
        }
    }

    /// Handle that ends the run from another thread or task.
    pub fn stopper(&self) -> CaptureStopper {
        self.stopper.clone()
    }

    pub fn run(self) -> Result<RunReport, ControllerError> {
        let Recorder {
            config,
            output,
            source,
            stopper,
        } = self;

        let wall_clock_start = wall_clock_now_secs().map_err(SessionError::from)?;
        let session = crate::session_management::Session::start(
            output,
            SystemMonotonic::new(),
            wall_clock_start,
        )?;
        info!(
            "Capture started at {} (admitting destination port {})",
            wall_clock_start, config.admission_port
        );

        let mut controller: CaptureController<_, _, ConnectionHandle> = CaptureController::new(
            session,
            AdmissionPolicy::destination_port(config.admission_port),
            config.on_write_error,
        );
        let mut engine = TcpReassembler::new(source, stopper.flag(), config.max_pending_bytes)
            .with_max_connections(config.max_connections);
        let engine_result = engine.run(&mut controller);

        let records_written = controller.session().records_written();
        let bytes_written = controller.session().bytes_written();
        let finished = controller.finish();
        stopper.reap();

        let report = finished?;
        let summary = engine_result?;
        debug!("Engine summary: {:?}", summary);
        if let Some(fatal) = report.fatal {
            return Err(ControllerError::Aborted(fatal.to_string()));
        }

        Ok(RunReport {
            stats: report.stats,
            engine: summary,
            open_streams: report.open_streams,
            records_written,
            bytes_written,
        })
    }
}
