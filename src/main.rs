#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context};
use indicatif::{ProgressBar, ProgressStyle};

use otgw_gateway::dispatcher::Callback;
use otgw_gateway::{CommandError, Event, Gateway, Options, Report};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "9600")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Operation {
    /// Print published records as the trace is decoded
    Monitor,

    /// Send commands such as `TT=19.5` and wait for their replies
    Send { commands: Vec<String> },

    /// Reprogram the PIC. Relative names are looked up per processor
    /// under the firmware directory.
    Upgrade {
        #[structopt(parse(from_os_str))]
        hexfile: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    info!("Connecting to serial port");

    let mut gw = Gateway::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("opening {}", o.port))?;

    let prefix = o.options.topic_prefix.clone();
    let mut print = |e: &Event| {
        if let Some(r) = e.record(&prefix) {
            println!("{} {}", r.topic, r.payload);
        }
    };

    match o.operation {
        Operation::Monitor => loop {
            gw.poll(Instant::now(), &mut print)
                .map_err(|e| anyhow!("serial error: {:?}", e))?;
        },
        Operation::Send { commands } => {
            for c in commands {
                let text = c.clone();
                let cb: Callback = Box::new(move |r: Result<String, CommandError>| match r {
                    Ok(v) => println!("{}: {}", text, v),
                    Err(e) => println!("{}: {}", text, e),
                });
                gw.send_command(&c, Instant::now(), Some(cb))
                    .with_context(|| format!("queueing {}", c))?;
            }
            while gw.pending() > 0 {
                gw.poll(Instant::now(), &mut print)
                    .map_err(|e| anyhow!("serial error: {:?}", e))?;
            }
        }
        Operation::Upgrade { hexfile } => {
            if let Ok(m) = std::fs::metadata(&hexfile) {
                info!("Image {} ({})", hexfile.display(), bytefmt::format(m.len()));
            }

            gw.start_upgrade(&hexfile, Instant::now())
                .with_context(|| format!("starting upgrade with {}", hexfile.display()))?;

            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}%")
                    .progress_chars("=> "),
            );

            let mut report: Option<Report> = None;
            while report.is_none() {
                let mut sub = |e: &Event| match e {
                    Event::Progress(p) => bar.set_position(*p as u64),
                    Event::UpgradeFinished(r) => report = Some(r.clone()),
                    _ => (),
                };
                gw.poll(Instant::now(), &mut sub)
                    .map_err(|e| anyhow!("serial error: {:?}", e))?;
            }

            let report = report.ok_or_else(|| anyhow!("upgrade ended without a report"))?;
            bar.finish_with_message(&report.to_string());
            report.result.map_err(|e| anyhow!("upgrade failed: {}", e))?;
            info!("Upgrade complete");
        }
    }

    Ok(())
}
