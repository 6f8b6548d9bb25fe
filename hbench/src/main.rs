use core::error::Error;

use clap::{error::ErrorKind, CommandFactory, Parser};
use hbench::{
    cfg::Config,
    cmd::Cmd,
    pacer::PaceBounds,
    resolve::DnsResolver,
    runtime::Runtime,
    stat::StatSnapshot,
    transport::{self, PlainConnector, SecureConnector},
};
use tokio::runtime::Builder;

pub fn main() {
    let cmd = match Cmd::try_parse() {
        Ok(cmd) => cmd,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            // Printing to a closed pipe is not worth a panic.
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if cmd.url.is_none() {
        let _ = Cmd::command().print_help();
        return;
    }

    if let Err(err) = hbench::logging::init(cmd.verbose as usize) {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }

    match run(cmd) {
        Ok(snapshot) => {
            println!("{}", snapshot.summary());
        }
        Err(err) => {
            eprintln!("ERROR: {err}");
            eprintln!();
            eprintln!("{}", Cmd::command().render_usage());
            std::process::exit(1);
        }
    }
}

fn run(cmd: Cmd) -> Result<StatSnapshot, Box<dyn Error>> {
    let cfg: Config = cmd.try_into()?;

    // Sessions of a single run share one I/O driver across all workers.
    let runtime = Builder::new_multi_thread()
        .worker_threads(cfg.workers.get())
        .enable_io()
        .enable_time()
        .thread_name("hbench:w")
        .build()?;

    let snapshot = if cfg.use_tls {
        let connector = SecureConnector::new(&cfg.target.host, transport::load_root_certificates())?;
        runtime.block_on(Runtime::new(cfg, DnsResolver, connector, PaceBounds::default()).run())?
    } else {
        runtime.block_on(Runtime::new(cfg, DnsResolver, PlainConnector, PaceBounds::default()).run())?
    };

    // Joins all workers.
    drop(runtime);

    Ok(snapshot)
}
